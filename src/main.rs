//! screencap - Screen, window and application recording with pause/resume
//!
//! Entry point for the screencap CLI application.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use screencap::cli::{Cli, Commands};
use screencap::config::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Completions { shell } => {
            screencap::cli::completions::print(shell);
        }
        command => {
            // Load configuration only for runtime commands.
            let settings = Settings::load()?;

            // Execute command
            match command {
                Commands::Record(args) => {
                    screencap::cli::commands::record(&settings, args).await?;
                }
                Commands::Recent { limit, json } => {
                    screencap::cli::commands::list_recent(&settings, limit, json)?;
                }
                Commands::Permissions { json } => {
                    screencap::cli::commands::check_permissions(&settings, json).await?;
                }
                Commands::Config(config_cmd) => {
                    screencap::cli::commands::config_command(&settings, config_cmd)?;
                }
                Commands::Completions { .. } => unreachable!(),
            }
        }
    }

    Ok(())
}
