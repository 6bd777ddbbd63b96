use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;

use analyst_core::{
    AnalystConfig, IntentRouter, JsonMemoryStorage, ProviderConfig, ProviderId, Question,
    SessionMemoryStore,
};

#[derive(Parser)]
#[command(name = "analyst")]
#[command(about = "Inspect routing, token budgets and session memory of the analysis assistant")]
#[command(version)]
struct Cli {
    /// Config file (JSON or TOML); defaults to ~/.analyst/config.json, then analyst.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true, default_value = "false")]
    debug: bool,

    /// Log level (overrides debug flag)
    #[arg(long, env = "RUST_LOG", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the analysis plan for a question
    Classify {
        question: String,
        /// Dataset columns, comma separated
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
    },
    /// Show how a provider token limit is clamped
    Clamp {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        max_tokens: u32,
        #[arg(long)]
        model: Option<String>,
    },
    /// Inspect or reset a session memory file
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
        /// Memory directory; defaults to the configured one
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Print the resolved configuration and missing API keys
    Config,
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Print the raw memory record
    Show { session_id: String },
    /// Print the summary handed to the conclusions step
    Summary { session_id: String },
    /// Empty the session memory, keeping the dataset line
    Clear { session_id: String },
}

fn logger(debug: bool, log_level: Option<&str>) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    match log_level {
        Some(filters) => builder.parse_filters(filters),
        None if debug => builder.filter_level(log::LevelFilter::Debug),
        None => builder.filter_level(log::LevelFilter::Info),
    };
    builder
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AnalystConfig> {
    match path {
        Some(path) => {
            let mut config = AnalystConfig::from_path(path)
                .with_context(|| format!("failed to load config from {:?}", path))?;
            config.apply_env(|key| std::env::var(key).ok());
            Ok(config)
        }
        None => Ok(AnalystConfig::load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logger(cli.debug, cli.log_level.as_deref()).init();

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Classify { question, columns } => classify(&question, &columns)?,
        Commands::Clamp {
            provider,
            max_tokens,
            model,
        } => clamp(&config, &provider, max_tokens, model)?,
        Commands::Memory { action, dir } => {
            let dir = dir.unwrap_or_else(|| config.memory_dir());
            memory(&config, JsonMemoryStorage::new(dir), action).await?
        }
        Commands::Config => show_config(&config)?,
    }

    Ok(())
}

fn classify(question: &str, columns: &[String]) -> anyhow::Result<()> {
    let router = IntentRouter::new();
    let question = Question::new(question);
    let plan = router.classify(&question, columns);

    println!("{}", serde_json::to_string_pretty(&plan)?);
    match router.explain(&question) {
        Some(category) => println!("{} {:?}", "matched category:".dimmed(), category),
        None => println!("{}", "no category matched".dimmed()),
    }
    Ok(())
}

fn clamp(
    config: &AnalystConfig,
    provider: &str,
    max_tokens: u32,
    model: Option<String>,
) -> anyhow::Result<()> {
    let provider: ProviderId = provider.parse()?;
    let requested = match model {
        Some(model) => ProviderConfig::new(provider, model, max_tokens)?,
        None => ProviderConfig::with_defaults(provider, max_tokens)?,
    };

    let controller = config.budget_controller()?;
    let clamped = controller.clamp(&requested);

    println!("{}", serde_json::to_string_pretty(&clamped.config)?);
    match clamped.downgrade {
        Some(downgrade) => println!(
            "{} {} -> {} tokens",
            "downgraded:".yellow(),
            downgrade.from,
            downgrade.to
        ),
        None => println!("{}", "within budget".green()),
    }
    println!(
        "{} {:?}",
        "requested limit is".dimmed(),
        controller.assess(&requested)
    );
    Ok(())
}

async fn memory(
    config: &AnalystConfig,
    storage: JsonMemoryStorage,
    action: MemoryAction,
) -> anyhow::Result<()> {
    let limits = config.memory.limits();

    match action {
        MemoryAction::Show { session_id } => match storage.load_record(&session_id).await? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => println!("{} {}", "no memory for session".yellow(), session_id),
        },
        MemoryAction::Summary { session_id } => {
            let store = storage
                .load_record(&session_id)
                .await?
                .map(|record| SessionMemoryStore::from_record(record, limits))
                .unwrap_or_else(|| SessionMemoryStore::new(limits));
            println!("{}", store.default_summary());
        }
        MemoryAction::Clear { session_id } => {
            let Some(record) = storage.load_record(&session_id).await? else {
                println!("{} {}", "no memory for session".yellow(), session_id);
                return Ok(());
            };
            let mut store = SessionMemoryStore::from_record(record, limits);
            let dataset_info = store.dataset_info().map(str::to_string);
            store.clear();
            if let Some(info) = dataset_info {
                store.set_dataset_info(info);
            }
            storage.save_record(&session_id, &store.record()).await?;
            println!("{} {}", "cleared memory for session".green(), session_id);
        }
    }
    Ok(())
}

fn show_config(config: &AnalystConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);

    let missing = config.missing_api_keys(|key| std::env::var(key).ok());
    if missing.is_empty() {
        println!("{}", "all provider API keys are set".green());
    } else {
        for key in missing {
            println!("{} {}", "missing API key:".red(), key);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::LevelFilter;

    #[test]
    fn log_level_flag_sets_the_filter() {
        assert_eq!(logger(false, Some("debug")).build().filter(), LevelFilter::Debug);
        assert_eq!(logger(true, Some("warn")).build().filter(), LevelFilter::Warn);
    }

    #[test]
    fn debug_flag_applies_without_log_level() {
        assert_eq!(logger(true, None).build().filter(), LevelFilter::Debug);
        assert_eq!(logger(false, None).build().filter(), LevelFilter::Info);
    }
}
