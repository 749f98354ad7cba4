mod config;
mod fetcher;
mod replay;

use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use config::{load_config_file, Cli, ConfigError, RuntimeConfig};

fn runtime_config(cli: &Cli) -> Result<RuntimeConfig, ConfigError> {
    let file = load_config_file(cli.config.as_ref())?;
    RuntimeConfig::from_cli_and_file(cli, file)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match runtime_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    tokio::select! {
        outcome = replay::run(&config) => match outcome {
            Ok(summary) => {
                println!("{summary}");
                if !summary.all_verified() {
                    std::process::exit(2);
                }
            }
            Err(e) => {
                eprintln!("replay error: {}", e);
                std::process::exit(1);
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            std::process::exit(130);
        }
    }
}
