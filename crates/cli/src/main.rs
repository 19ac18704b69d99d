//! SkillBus CLI, the main entry point.
//!
//! Commands:
//! - `exec`        Run a task on one skill
//! - `capability`  Run a task on every skill with a capability
//! - `list`        List running skills
//! - `health`      Per-skill health report
//! - `stats`       Manager and bus statistics
//! - `config`      Show or initialize the config file
//! - `doctor`      Diagnose the installation

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use skillbus_config::{LogFormat, LoggingConfig};
use skillbus_core::Capability;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "skillbus",
    about = "SkillBus: event-driven skill runtime",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.skillbus/config.toml
    #[arg(short, long, global = true, env = "SKILLBUS_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a task on a single skill
    Exec {
        /// Skill name (e.g. `memory`)
        skill: String,

        /// Task text handed to the skill
        task: String,

        /// Task context as a JSON object
        #[arg(long)]
        context: Option<String>,
    },

    /// Execute a task on every ready skill with a capability
    Capability {
        /// research, code, memory, system, communication or analysis
        capability: Capability,

        task: String,

        /// Task context as a JSON object
        #[arg(long)]
        context: Option<String>,
    },

    /// List running skills
    List,

    /// Show per-skill health
    Health,

    /// Show manager and event bus statistics
    Stats,

    /// Show the effective configuration
    Config {
        /// Write a default config file
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long, requires = "init")]
        force: bool,

        /// Print the config file path and exit
        #[arg(long, conflicts_with = "init")]
        path: bool,
    },

    /// Diagnose configuration and skills
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let loaded = commands::load_config(cli.config.as_deref());
    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    init_tracing(&logging, cli.verbose);

    match cli.command {
        Commands::Exec {
            skill,
            task,
            context,
        } => commands::exec::run(loaded?, &skill, &task, context.as_deref()).await?,
        Commands::Capability {
            capability,
            task,
            context,
        } => commands::exec::by_capability(loaded?, capability, &task, context.as_deref()).await?,
        Commands::List => commands::inspect::list(loaded?).await?,
        Commands::Health => commands::inspect::health(loaded?).await?,
        Commands::Stats => commands::inspect::stats(loaded?).await?,
        Commands::Config { init, force, path } => {
            let target = cli.config.unwrap_or_else(skillbus_config::AppConfig::config_path);
            if path {
                commands::config_cmd::path(&target);
            } else if init {
                commands::config_cmd::init(&target, force)?;
            } else {
                commands::config_cmd::show(loaded?)?;
            }
        }
        Commands::Doctor => commands::doctor::run(cli.config.as_deref(), loaded).await?,
    }

    Ok(())
}

/// `SKILLBUS_LOG` wins, then `-v`, then `logging.level` from config.
fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let fallback = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_env("SKILLBUS_LOG")
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
