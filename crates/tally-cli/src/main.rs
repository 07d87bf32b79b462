//! Tally CLI - Bank statement ingestion and categorization
//!
//! Usage:
//!   tally init                                   Initialize database
//!   tally upload --bank BANCOLOMBIA --user ID F  Process statements locally
//!   tally status BATCH_ID                        Show batch progress
//!   tally serve --port 3000                      Start web server

mod cli;
mod commands;

#[cfg(test)]
mod tests;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Serve {
            port,
            host,
            no_auth,
        } => {
            let service = commands::load_config(config_path)?;
            commands::cmd_serve(&cli.db, &service, &host, port, no_auth, cli.no_encrypt).await
        }
        Commands::Upload { bank, user, files } => {
            let service = commands::load_config(config_path)?;
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_upload(&db, &service, &bank, &user, &files).await
        }
        Commands::Status { batch_id, json } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_status(&db, &batch_id, json)
        }
        Commands::Classify {
            description,
            amount,
            explain,
        } => {
            let service = commands::load_config(config_path)?;
            commands::cmd_classify(&service, &description, amount, explain).await
        }
        Commands::Config => {
            let service = commands::load_config(config_path)?;
            commands::cmd_config(&service, config_path)
        }
    }
}
