use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ProviderSettings;
use crate::error::{ConfigError, ErrorKind};

/// A user question as it arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    text: String,
    asked_at: DateTime<Utc>,
}

impl Question {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            asked_at: Utc::now(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn asked_at(&self) -> DateTime<Utc> {
        self.asked_at
    }
}

/// Read-only view of the loaded CSV, produced by the loader collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetContext {
    pub name: String,
    #[serde(default)]
    pub source: String,
    pub shape: (usize, usize),
    pub columns: Vec<String>,
    #[serde(default)]
    pub dtypes: HashMap<String, String>,
    #[serde(default)]
    pub sample_rows: Vec<serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub loaded_at: DateTime<Utc>,
}

impl DatasetContext {
    pub fn new(name: impl Into<String>, rows: usize, columns: Vec<String>) -> Self {
        let cols = columns.len();
        Self {
            name: name.into(),
            source: String::new(),
            shape: (rows, cols),
            columns,
            dtypes: HashMap::new(),
            sample_rows: Vec::new(),
            loaded_at: Utc::now(),
        }
    }

    pub fn with_dtype(mut self, column: impl Into<String>, dtype: impl Into<String>) -> Self {
        self.dtypes.insert(column.into(), dtype.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Columns whose dtype looks numeric, in column order.
    pub fn numeric_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|column| {
                self.dtypes
                    .get(column.as_str())
                    .map(|dtype| is_numeric_dtype(dtype))
                    .unwrap_or(false)
            })
            .map(String::as_str)
            .collect()
    }

    /// Case-insensitive column lookup, returning the dataset's spelling.
    pub fn find_column(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|column| column.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    /// One-line description used in memory summaries.
    pub fn summary_line(&self) -> String {
        format!(
            "{} ({} rows x {} columns)",
            self.name, self.shape.0, self.shape.1
        )
    }

    /// Context block handed to engines with every step.
    pub fn describe(&self) -> String {
        let preview: Vec<&str> = self.columns.iter().take(10).map(String::as_str).collect();
        let mut out = format!(
            "File: {}\nShape: {} rows x {} columns\nColumns: {}",
            self.name,
            self.shape.0,
            self.shape.1,
            preview.join(", ")
        );
        if !self.source.is_empty() {
            out.push_str(&format!("\nSource: {}", self.source));
        }
        out
    }

    /// Direct answer for "which file are we analysing?" questions.
    pub fn metadata_answer(&self) -> String {
        let mut answer = format!(
            "**Dataset under analysis:** {}\n**Loaded at:** {}\n**Shape:** {} rows x {} columns",
            self.name,
            self.loaded_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.shape.0,
            self.shape.1
        );
        if !self.source.is_empty() {
            answer.push_str(&format!("\n**Source:** {}", self.source));
        }
        if !self.columns.is_empty() {
            let mut preview = self
                .columns
                .iter()
                .take(8)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            if self.columns.len() > 8 {
                preview.push_str(&format!("... (total: {} columns)", self.columns.len()));
            }
            answer.push_str(&format!("\n**Main columns:** {}", preview));
        }
        answer
    }
}

fn is_numeric_dtype(dtype: &str) -> bool {
    let dtype = dtype.to_ascii_lowercase();
    ["int", "uint", "float", "number", "numeric", "double", "decimal"]
        .iter()
        .any(|prefix| dtype.starts_with(prefix))
}

/// LLM backends known to the budget policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Groq,
    OpenAi,
    Gemini,
}

impl ProviderId {
    pub const ALL: [ProviderId; 3] = [ProviderId::Groq, ProviderId::OpenAi, ProviderId::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Groq => "groq",
            ProviderId::OpenAi => "openai",
            ProviderId::Gemini => "gemini",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderId::Groq => "llama-3.1-8b-instant",
            ProviderId::OpenAi => "gpt-4o-mini",
            ProviderId::Gemini => "gemini-1.5-flash",
        }
    }

    fn default_timeout_seconds(&self) -> u64 {
        match self {
            ProviderId::Groq => 30,
            ProviderId::OpenAi | ProviderId::Gemini => 60,
        }
    }

    fn default_max_retries(&self) -> u32 {
        match self {
            ProviderId::Groq => 1,
            ProviderId::OpenAi | ProviderId::Gemini => 2,
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            ProviderId::Groq => "GROQ_API_KEY",
            ProviderId::OpenAi => "OPENAI_API_KEY",
            ProviderId::Gemini => "GOOGLE_API_KEY",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "groq" => Ok(ProviderId::Groq),
            "openai" => Ok(ProviderId::OpenAi),
            "gemini" | "google" => Ok(ProviderId::Gemini),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// Validated per-call provider settings.
///
/// Values are replaced, never patched: `max_tokens` only changes through
/// [`crate::budget::TokenBudgetController`], which hands back a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProviderSettings", into = "ProviderSettings")]
pub struct ProviderConfig {
    provider_id: ProviderId,
    model_name: String,
    max_tokens: u32,
    temperature: f32,
    timeout_seconds: u64,
    max_retries: u32,
}

impl ProviderConfig {
    /// Build a config with the provider's default timeout and retry count.
    pub fn new(
        provider_id: ProviderId,
        model_name: impl Into<String>,
        max_tokens: u32,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            provider_id,
            model_name: model_name.into(),
            max_tokens,
            temperature: DEFAULT_TEMPERATURE,
            timeout_seconds: provider_id.default_timeout_seconds(),
            max_retries: provider_id.default_max_retries(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_defaults(provider_id: ProviderId, max_tokens: u32) -> Result<Self, ConfigError> {
        Self::new(provider_id, provider_id.default_model(), max_tokens)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Result<Self, ConfigError> {
        self.temperature = temperature;
        self.validate()?;
        Ok(self)
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Result<Self, ConfigError> {
        self.timeout_seconds = timeout_seconds;
        self.validate()?;
        Ok(self)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub(crate) fn with_max_tokens(&self, max_tokens: u32) -> Self {
        Self {
            max_tokens,
            ..self.clone()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.model_name.trim().is_empty() {
            return Err(ConfigError::InvalidProvider(
                "model name must not be empty".to_string(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::InvalidProvider(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidProvider(format!(
                "temperature {} is outside 0.0..=2.0",
                self.temperature
            )));
        }
        if self.timeout_seconds == 0 {
            return Err(ConfigError::InvalidProvider(
                "timeout_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn provider_id(&self) -> ProviderId {
        self.provider_id
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl TryFrom<ProviderSettings> for ProviderConfig {
    type Error = ConfigError;

    fn try_from(settings: ProviderSettings) -> Result<Self, Self::Error> {
        let provider_id: ProviderId = settings.provider.parse()?;
        let model = settings
            .model
            .unwrap_or_else(|| provider_id.default_model().to_string());
        let mut config = ProviderConfig::new(provider_id, model, settings.max_tokens)?;
        if let Some(temperature) = settings.temperature {
            config = config.with_temperature(temperature)?;
        }
        if let Some(timeout) = settings.timeout_seconds {
            config = config.with_timeout_seconds(timeout)?;
        }
        if let Some(retries) = settings.max_retries {
            config = config.with_max_retries(retries);
        }
        Ok(config)
    }
}

impl From<ProviderConfig> for ProviderSettings {
    fn from(config: ProviderConfig) -> Self {
        ProviderSettings {
            provider: config.provider_id.as_str().to_string(),
            model: Some(config.model_name),
            max_tokens: config.max_tokens,
            temperature: Some(config.temperature),
            timeout_seconds: Some(config.timeout_seconds),
            max_retries: Some(config.max_retries),
        }
    }
}

/// Reference to a chart rendered by the chart engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartRef {
    pub location: String,
    #[serde(default)]
    pub caption: String,
}

/// Successful output of an engine call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationOutput {
    Text { text: String },
    Chart { chart: ChartRef },
}

impl OperationOutput {
    pub fn text(text: impl Into<String>) -> Self {
        OperationOutput::Text { text: text.into() }
    }

    pub fn chart(location: impl Into<String>, caption: impl Into<String>) -> Self {
        OperationOutput::Chart {
            chart: ChartRef {
                location: location.into(),
                caption: caption.into(),
            },
        }
    }

    /// Renders the output as answer text.
    pub fn body(&self) -> String {
        match self {
            OperationOutput::Text { text } => text.clone(),
            OperationOutput::Chart { chart } if chart.caption.is_empty() => {
                format!("[chart: {}]", chart.location)
            }
            OperationOutput::Chart { chart } => {
                format!("[chart: {}]\n{}", chart.location, chart.caption)
            }
        }
    }
}

/// Which provider finally handled a call and how many attempts it took.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptReport {
    pub provider_id: ProviderId,
    pub model_name: String,
    pub attempts: u32,
    pub fallback_used: bool,
}

impl AttemptReport {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            provider_id: config.provider_id(),
            model_name: config.model_name().to_string(),
            attempts: 0,
            fallback_used: false,
        }
    }
}

/// Terminal outcome of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationResult {
    Success {
        output: OperationOutput,
        report: AttemptReport,
    },
    Failure {
        error: ErrorKind,
        detail: String,
        report: AttemptReport,
    },
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationResult::Success { .. })
    }

    pub fn report(&self) -> &AttemptReport {
        match self {
            OperationResult::Success { report, .. } | OperationResult::Failure { report, .. } => {
                report
            }
        }
    }

    pub fn error(&self) -> Option<&ErrorKind> {
        match self {
            OperationResult::Success { .. } => None,
            OperationResult::Failure { error, .. } => Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_config_uses_provider_defaults() {
        let groq = ProviderConfig::with_defaults(ProviderId::Groq, 300).unwrap();
        assert_eq!(groq.model_name(), "llama-3.1-8b-instant");
        assert_eq!(groq.timeout_seconds(), 30);
        assert_eq!(groq.max_retries(), 1);

        let openai = ProviderConfig::with_defaults(ProviderId::OpenAi, 1500).unwrap();
        assert_eq!(openai.timeout_seconds(), 60);
        assert_eq!(openai.max_retries(), 2);
        assert!((openai.temperature() - DEFAULT_TEMPERATURE).abs() < f32::EPSILON);
    }

    #[test]
    fn provider_config_rejects_invalid_values() {
        assert!(ProviderConfig::new(ProviderId::OpenAi, "", 100).is_err());
        assert!(ProviderConfig::new(ProviderId::OpenAi, "gpt-4o-mini", 0).is_err());
        let config = ProviderConfig::with_defaults(ProviderId::OpenAi, 100).unwrap();
        assert!(config.clone().with_temperature(3.5).is_err());
        assert!(config.with_timeout_seconds(0).is_err());
    }

    #[test]
    fn provider_config_deserializes_through_validation() {
        let config: ProviderConfig =
            serde_json::from_str(r#"{"provider":"groq","max_tokens":250}"#).unwrap();
        assert_eq!(config.provider_id(), ProviderId::Groq);
        assert_eq!(config.model_name(), "llama-3.1-8b-instant");

        let invalid = serde_json::from_str::<ProviderConfig>(r#"{"provider":"x","max_tokens":1}"#);
        assert!(invalid.is_err());
    }

    #[test]
    fn provider_id_parses_aliases() {
        assert_eq!("OpenAI".parse::<ProviderId>().unwrap(), ProviderId::OpenAi);
        assert_eq!("google".parse::<ProviderId>().unwrap(), ProviderId::Gemini);
        assert!("mistral".parse::<ProviderId>().is_err());
    }

    #[test]
    fn dataset_numeric_columns_follow_column_order() {
        let dataset = DatasetContext::new(
            "titanic.csv",
            891,
            vec!["Survived".into(), "Sex".into(), "Age".into(), "Fare".into()],
        )
        .with_dtype("Age", "float64")
        .with_dtype("Sex", "object")
        .with_dtype("Survived", "int64")
        .with_dtype("Fare", "float64");

        assert_eq!(dataset.numeric_columns(), vec!["Survived", "Age", "Fare"]);
        assert_eq!(dataset.find_column("sex"), Some("Sex"));
        assert_eq!(dataset.find_column("pclass"), None);
    }

    #[test]
    fn metadata_answer_lists_columns() {
        let columns: Vec<String> = (0..10).map(|i| format!("c{i}")).collect();
        let dataset = DatasetContext::new("data.csv", 5, columns);
        let answer = dataset.metadata_answer();
        assert!(answer.contains("data.csv"));
        assert!(answer.contains("5 rows x 10 columns"));
        assert!(answer.contains("(total: 10 columns)"));
    }

    #[test]
    fn chart_body_includes_caption() {
        let chart = OperationOutput::chart("charts/corr.png", "Correlation heatmap");
        assert_eq!(chart.body(), "[chart: charts/corr.png]\nCorrelation heatmap");
    }
}
