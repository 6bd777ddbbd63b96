use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::budget::TokenBudgetController;
use crate::error::ConfigError;
use crate::memory::{
    MemoryLimits, ANALYSIS_CHAR_LIMIT, CONCLUSION_CHAR_LIMIT, MAX_ANALYSES, MAX_CONCLUSIONS,
};
use crate::types::{ProviderConfig, ProviderId};

const CONFIG_FILE_PATH: &str = "analyst.toml";
const DEFAULT_TEMP_DIR: &str = "temp_files";
const DEFAULT_MAX_TOKENS: u32 = 1500;
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 180;

/// Raw provider section as written in config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl ProviderSettings {
    pub fn for_provider(provider: ProviderId) -> Self {
        Self {
            provider: provider.as_str().to_string(),
            model: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            timeout_seconds: None,
            max_retries: None,
        }
    }
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetSettings {
    /// Provider name to token ceiling, layered over the built-in table.
    #[serde(default)]
    pub ceilings: HashMap<String, u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_wait_seconds")]
    pub default_wait_seconds: u64,
    #[serde(default = "default_max_wait_seconds")]
    pub max_wait_seconds: u64,
    #[serde(default = "default_transient_delay_ms")]
    pub transient_delay_ms: u64,
}

fn default_wait_seconds() -> u64 {
    15
}

fn default_max_wait_seconds() -> u64 {
    30
}

fn default_transient_delay_ms() -> u64 {
    1000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            default_wait_seconds: default_wait_seconds(),
            max_wait_seconds: default_max_wait_seconds(),
            transient_delay_ms: default_transient_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySettings {
    /// Directory for session memory files. Defaults to `<TEMP_DIR>/memory`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_max_analyses")]
    pub max_analyses: usize,
    #[serde(default = "default_max_conclusions")]
    pub max_conclusions: usize,
    #[serde(default = "default_analysis_chars")]
    pub analysis_chars: usize,
    #[serde(default = "default_conclusion_chars")]
    pub conclusion_chars: usize,
}

fn default_max_analyses() -> usize {
    MAX_ANALYSES
}

fn default_max_conclusions() -> usize {
    MAX_CONCLUSIONS
}

fn default_analysis_chars() -> usize {
    ANALYSIS_CHAR_LIMIT
}

fn default_conclusion_chars() -> usize {
    CONCLUSION_CHAR_LIMIT
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            dir: None,
            max_analyses: MAX_ANALYSES,
            max_conclusions: MAX_CONCLUSIONS,
            analysis_chars: ANALYSIS_CHAR_LIMIT,
            conclusion_chars: CONCLUSION_CHAR_LIMIT,
        }
    }
}

impl MemorySettings {
    pub fn limits(&self) -> MemoryLimits {
        MemoryLimits {
            max_analyses: self.max_analyses.max(1),
            max_conclusions: self.max_conclusions.max(1),
            analysis_chars: self.analysis_chars.max(1),
            conclusion_chars: self.conclusion_chars.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystConfig {
    pub provider: ProviderSettings,
    #[serde(default)]
    pub fallback: Option<ProviderSettings>,
    #[serde(default)]
    pub budget: BudgetSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub memory: MemorySettings,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECONDS
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from(DEFAULT_TEMP_DIR)
}

fn analyst_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".analyst")
}

fn analyst_config_json_path() -> PathBuf {
    analyst_dir().join("config.json")
}

impl Default for AnalystConfig {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::for_provider(ProviderId::OpenAi),
            fallback: None,
            budget: BudgetSettings::default(),
            retry: RetrySettings::default(),
            memory: MemorySettings::default(),
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECONDS,
            temp_dir: default_temp_dir(),
        }
    }
}

impl AnalystConfig {
    /// Loads `~/.analyst/config.json`, else `analyst.toml`, else defaults,
    /// then applies environment overrides.
    pub fn load() -> Self {
        let mut config = Self::default();

        let json_path = analyst_config_json_path();
        let toml_path = Path::new(CONFIG_FILE_PATH);
        if json_path.exists() {
            match Self::from_path(&json_path) {
                Ok(file_config) => config = file_config,
                Err(e) => log::warn!("Ignoring {:?}: {}", json_path, e),
            }
        } else if toml_path.exists() {
            match Self::from_path(toml_path) {
                Ok(file_config) => config = file_config,
                Err(e) => log::warn!("Ignoring {:?}: {}", toml_path, e),
            }
        }

        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Reads a config file; `.json` is parsed as JSON, anything else as TOML.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        if path.extension().map_or(false, |ext| ext == "json") {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Self::from_toml_str(&content)
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Applies environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(provider) = lookup("ANALYST_PROVIDER") {
            self.provider = ProviderSettings {
                max_tokens: self.provider.max_tokens,
                ..ProviderSettings::for_provider_name(provider)
            };
        }
        if let Some(fallback) = lookup("ANALYST_FALLBACK_PROVIDER") {
            self.fallback = if fallback.trim().is_empty() {
                None
            } else {
                Some(ProviderSettings::for_provider_name(fallback))
            };
        }
        if let Some(max_tokens) = lookup("ANALYST_MAX_TOKENS").and_then(|v| v.parse().ok()) {
            self.provider.max_tokens = max_tokens;
        }
        if let Some(timeout) = lookup("ANALYST_REQUEST_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.request_timeout_seconds = timeout;
        }
        if let Some(temp_dir) = lookup("TEMP_DIR") {
            self.temp_dir = PathBuf::from(temp_dir);
        }

        for (var, provider) in [
            ("GROQ_MODEL", ProviderId::Groq),
            ("OPENAI_MODEL", ProviderId::OpenAi),
            ("GEMINI_MODEL", ProviderId::Gemini),
        ] {
            if let Some(model) = lookup(var) {
                for settings in std::iter::once(&mut self.provider).chain(self.fallback.as_mut())
                {
                    if settings.provider.eq_ignore_ascii_case(provider.as_str()) {
                        settings.model = Some(model.clone());
                    }
                }
            }
        }
    }

    pub fn primary_config(&self) -> Result<ProviderConfig, ConfigError> {
        ProviderConfig::try_from(self.provider.clone())
    }

    pub fn fallback_config(&self) -> Result<Option<ProviderConfig>, ConfigError> {
        self.fallback
            .clone()
            .map(ProviderConfig::try_from)
            .transpose()
    }

    pub fn budget_controller(&self) -> Result<TokenBudgetController, ConfigError> {
        let mut overrides = HashMap::new();
        for (name, ceiling) in &self.budget.ceilings {
            overrides.insert(name.parse::<ProviderId>()?, *ceiling);
        }
        Ok(TokenBudgetController::with_overrides(&overrides))
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.memory
            .dir
            .clone()
            .unwrap_or_else(|| self.temp_dir.join("memory"))
    }

    /// Environment variables for configured providers that are not set.
    pub fn missing_api_keys(&self, lookup: impl Fn(&str) -> Option<String>) -> Vec<&'static str> {
        let mut providers = vec![self.provider.provider.as_str()];
        if let Some(fallback) = &self.fallback {
            providers.push(fallback.provider.as_str());
        }

        let mut missing = Vec::new();
        for name in providers {
            if let Ok(provider) = name.parse::<ProviderId>() {
                let var = provider.api_key_var();
                let set = lookup(var).map_or(false, |value| !value.trim().is_empty());
                if !set && !missing.contains(&var) {
                    missing.push(var);
                }
            }
        }
        missing
    }
}

impl ProviderSettings {
    fn for_provider_name(provider: String) -> Self {
        Self {
            provider: provider.trim().to_ascii_lowercase(),
            ..Self::for_provider(ProviderId::OpenAi)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = AnalystConfig::default();
        let primary = config.primary_config().unwrap();
        assert_eq!(primary.provider_id(), ProviderId::OpenAi);
        assert_eq!(primary.max_tokens(), 1500);
        assert!(config.fallback_config().unwrap().is_none());
        assert_eq!(config.memory_dir(), PathBuf::from("temp_files/memory"));
        assert_eq!(config.memory.limits(), MemoryLimits::default());
    }

    #[test]
    fn parses_toml_sections() {
        let config = AnalystConfig::from_toml_str(
            r#"
            request_timeout_seconds = 90

            [provider]
            provider = "groq"
            max_tokens = 800

            [fallback]
            provider = "openai"
            model = "gpt-4o"

            [budget.ceilings]
            groq = 350

            [memory]
            max_analyses = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.request_timeout_seconds, 90);
        let primary = config.primary_config().unwrap();
        assert_eq!(primary.provider_id(), ProviderId::Groq);
        let controller = config.budget_controller().unwrap();
        assert_eq!(controller.clamp(&primary).config.max_tokens(), 350);
        let fallback = config.fallback_config().unwrap().unwrap();
        assert_eq!(fallback.model_name(), "gpt-4o");
        assert_eq!(config.memory.limits().max_analyses, 4);
        assert_eq!(config.retry, RetrySettings::default());
    }

    #[test]
    fn unknown_ceiling_provider_is_an_error() {
        let mut config = AnalystConfig::default();
        config.budget.ceilings.insert("mistral".to_string(), 10);
        assert!(matches!(
            config.budget_controller(),
            Err(ConfigError::UnknownProvider(_))
        ));
    }

    #[test]
    fn env_overrides() {
        let mut config = AnalystConfig::default();
        config.apply_env(env(&[
            ("ANALYST_PROVIDER", "Groq"),
            ("ANALYST_FALLBACK_PROVIDER", "openai"),
            ("ANALYST_MAX_TOKENS", "450"),
            ("GROQ_MODEL", "llama-3.3-70b-versatile"),
            ("OPENAI_MODEL", "gpt-3.5-turbo"),
            ("TEMP_DIR", "/tmp/analyst"),
        ]));

        let primary = config.primary_config().unwrap();
        assert_eq!(primary.provider_id(), ProviderId::Groq);
        assert_eq!(primary.model_name(), "llama-3.3-70b-versatile");
        assert_eq!(primary.max_tokens(), 450);
        let fallback = config.fallback_config().unwrap().unwrap();
        assert_eq!(fallback.model_name(), "gpt-3.5-turbo");
        assert_eq!(config.memory_dir(), PathBuf::from("/tmp/analyst/memory"));
    }

    #[test]
    fn missing_keys_are_reported_once() {
        let mut config = AnalystConfig::default();
        config.fallback = Some(ProviderSettings::for_provider(ProviderId::OpenAi));
        assert_eq!(config.missing_api_keys(env(&[])), vec!["OPENAI_API_KEY"]);
        assert!(config
            .missing_api_keys(env(&[("OPENAI_API_KEY", "sk-x")]))
            .is_empty());
    }
}
