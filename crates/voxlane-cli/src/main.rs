use std::sync::Arc;

use clap::{Parser, Subcommand};

use voxlane_core::config::Config;
use voxlane_gateway::GatewayState;

mod logging;

#[derive(Parser)]
#[command(
    name = "voxlane",
    about = "Real-time voice session gateway: streamed replies, spoken sentence by sentence",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default: ~/.voxlane/config.json5)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the session gateway
    Serve {
        /// Port to listen on (default: 8765)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Query a running gateway's health endpoint
    Status {
        /// Gateway port (default: from config)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Validate the configuration
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    logging::init(&config.logging(), cli.verbose);
    tracing::debug!(path = %config_path.display(), "Config loaded");

    match cli.command {
        Commands::Serve { port } => serve(config, port).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Check => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} configuration error(s)", errors.len());
                }
                println!("Config OK: {}", config_path.display());
            }
        },
        Commands::Status { port } => {
            let port = port.unwrap_or_else(|| config.gateway_port());
            let url = format!("http://127.0.0.1:{port}/health");
            match reqwest::get(&url).await {
                Ok(resp) => {
                    let body: serde_json::Value = resp.json().await?;
                    println!("{}", serde_json::to_string_pretty(&body)?);
                }
                Err(e) => {
                    println!("Gateway not reachable at {url}: {e}");
                }
            }
        }
    }

    Ok(())
}

async fn serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    if !errors.is_empty() {
        for error in &errors {
            tracing::error!("{error}");
        }
        anyhow::bail!("Refusing to start with {} configuration error(s)", errors.len());
    }

    let port = port.unwrap_or_else(|| config.gateway_port());
    let state = GatewayState::from_config(config)?;

    #[cfg(feature = "metrics")]
    let state = state.with_metrics(voxlane_gateway::metrics::install_prometheus_recorder()?);

    tracing::info!("Starting voxlane gateway v{} on port {port}", env!("CARGO_PKG_VERSION"));
    voxlane_gateway::start_gateway(Arc::new(state), port).await
}
