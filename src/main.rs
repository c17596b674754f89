//! Oppsum CLI entry point.

use anyhow::Result;
use clap::Parser;
use oppsum::cli::{commands, Cli, Commands};
use oppsum::config::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("oppsum={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::load_from(Some(&std::path::PathBuf::from(path)))?,
        None => Settings::load()?,
    };

    // Ensure the data directory exists
    std::fs::create_dir_all(settings.data_dir())?;

    // Execute command
    match &cli.command {
        Commands::Init => {
            commands::run_init(&settings)?;
        }

        Commands::Summarize {
            input,
            language,
            budget,
            map_model,
            reduce_model,
            output,
            no_cache,
        } => {
            commands::run_summarize(
                input,
                language.clone(),
                *budget,
                map_model.clone(),
                reduce_model.clone(),
                output.clone(),
                *no_cache,
                settings,
            )
            .await?;
        }

        Commands::Cache { action } => {
            commands::run_cache(action, settings).await?;
        }

        Commands::Serve { host, port } => {
            commands::run_serve(host, *port, settings).await?;
        }

        Commands::Config { action } => {
            commands::run_config(action, settings)?;
        }
    }

    Ok(())
}
