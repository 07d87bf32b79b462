//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tally - Bank statement ingestion and categorization
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Bank statement ingestion and transaction categorization", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "tally.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set TALLY_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    /// Config file overriding the built-in defaults
    ///
    /// Defaults to ~/.local/share/tally/config.toml when that file exists.
    /// Environment variables (RABBITMQ_HOST, ML_MODELS_PATH, ...) override both.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database and register supported banks
    Init,

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Disable token validation and trust the X-User-Id header (local development only!)
        #[arg(long)]
        no_auth: bool,
    },

    /// Process statement files and wait for the batch to finish
    Upload {
        /// Bank code (e.g. BANCOLOMBIA)
        #[arg(short, long)]
        bank: String,

        /// User id the transactions belong to
        #[arg(short, long)]
        user: String,

        /// Spreadsheet files (.xlsx or .xls)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show the processing status of a batch
    Status {
        /// Batch id returned by an upload
        batch_id: String,

        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Classify a single transaction description
    Classify {
        /// Transaction description as it appears in the statement
        description: String,

        /// Signed amount (negative for expenses)
        #[arg(short, long, allow_hyphen_values = true)]
        amount: Option<f64>,

        /// Show the cleaned text, confidence and runner-up labels
        #[arg(long)]
        explain: bool,
    },

    /// Print the resolved configuration (secrets masked)
    Config,
}
