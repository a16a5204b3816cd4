mod cmd;
mod output;
mod root;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, runs::RunsSubcommand};
use std::path::PathBuf;
use stepgate_core::config::Config;

#[derive(Parser)]
#[command(
    name = "stepgate",
    about = "Rate-limited, credential-gated workflow gateway",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file (default: ./stepgate.yaml when present)
    #[arg(long, global = true, env = "STEPGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP ingress
    Serve {
        /// Address to listen on (overrides `bind`)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run one payload through the configured route, bypassing the gates
    Invoke {
        /// JSON payload
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// Inspect the resolved configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Inspect recorded workflow runs
    Runs {
        #[command(subcommand)]
        subcommand: RunsSubcommand,
    },
}

fn load_config(explicit: Option<&std::path::Path>) -> anyhow::Result<Config> {
    let path = root::resolve_config_path(explicit);
    Config::load(path.as_deref()).context("failed to load configuration")
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Serve { bind } => cmd::serve::run(config, bind),
        Commands::Invoke { payload } => cmd::invoke::run(&config, &payload, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&config, subcommand),
        Commands::Runs { subcommand } => cmd::runs::run(&config, subcommand, cli.json),
    });

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
