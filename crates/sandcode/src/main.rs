//! Sandcode - tool runtime for coding agents.
//!
//! This is the main entry point for the sandcode CLI.

mod consent;
mod replay;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sandcode_core::{Config, Instance};
use sandcode_tools::consent::AutoApprove;
use sandcode_tools::ConsentHandler;
use sandcode_util::log::{self, LogConfig, LogLevel};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Parser)]
#[command(name = "sandcode")]
#[command(author, version, about = "Tool runtime for coding agents", long_about = None)]
struct Cli {
    /// Project directory (defaults to the current directory)
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Only expose tools that do not modify state
    #[arg(long, global = true)]
    read_only: bool,

    /// Approve every tool call without asking
    #[arg(short, long, global = true)]
    yes: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the definitions of the active tools as JSON
    Tools,
    /// Show configuration
    Config,
    /// Replay a JSON-lines file of tool-call chunks
    Replay {
        /// File with one chunk per line
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let root = match &cli.project {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };
    let root = std::fs::canonicalize(&root)
        .with_context(|| format!("Invalid project directory {}", root.display()))?;
    if !root.is_dir() {
        anyhow::bail!("{} is not a directory", root.display());
    }

    let (mut config, sources) = Config::load(Some(root.as_path())).await?;
    init_logging(&cli, &config);
    debug!(root = %root.display(), sources = sources.len(), "Loaded configuration");

    if cli.read_only {
        config.read_only = Some(true);
    }

    match cli.command {
        Commands::Config => show_config(&config, &sources),
        Commands::Tools => {
            let instance = Instance::from_config(&root, config, sources)?;
            list_tools(&instance)
        }
        Commands::Replay { file } => {
            let instance = Instance::from_config(&root, config, sources)?;
            let consent: Arc<dyn ConsentHandler> = if cli.yes {
                Arc::new(AutoApprove)
            } else {
                Arc::new(consent::PromptConsent::stdin())
            };
            replay::run(&instance, &file, consent).await
        }
    }
}

fn init_logging(cli: &Cli, config: &Config) {
    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        config.log_level.map(Into::into).unwrap_or(LogLevel::Warn)
    };
    log::init(LogConfig {
        print: true,
        level,
        include_location: cli.verbose,
    });
}

fn show_config(config: &Config, sources: &[PathBuf]) -> anyhow::Result<()> {
    println!("Configuration sources:");
    if sources.is_empty() {
        println!("  (none)");
    } else {
        for source in sources {
            println!("  {}", source.display());
        }
    }
    println!();

    println!("Current configuration:");
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn list_tools(instance: &Instance) -> anyhow::Result<()> {
    let ctx = instance.context(None, Arc::new(AutoApprove));
    let definitions = instance.dispatcher().definitions(&ctx);
    println!("{}", serde_json::to_string_pretty(&definitions)?);
    Ok(())
}
