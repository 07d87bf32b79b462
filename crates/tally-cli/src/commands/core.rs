//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `load_config` - Resolve the layered service configuration
//! - `cmd_init` - Initialize the database
//! - `cmd_config` - Print the resolved configuration

use std::path::Path;

use anyhow::{Context, Result};
use tally_core::config::default_config_path;
use tally_core::{db::Database, ParserFactory, ServiceConfig};

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path must be valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Defaults, then the override file, then the environment
pub fn load_config(override_path: Option<&Path>) -> Result<ServiceConfig> {
    ServiceConfig::load(override_path).context("Failed to load configuration")
}

/// Register every bank with a built-in parser
pub fn seed_banks(db: &Database) -> Result<usize> {
    db.seed_banks(ParserFactory::new().supported_codes())
        .context("Failed to seed banks")
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;

    let added = seed_banks(&db)?;
    let banks = db.list_banks().context("Failed to list banks")?;
    println!(
        "   Registered {} bank(s) ({} new): {}",
        banks.len(),
        added,
        banks
            .iter()
            .map(|b| b.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Process a statement: tally upload --bank BANCOLOMBIA --user <id> march.xlsx");
    println!("  2. Start the API: tally serve");

    Ok(())
}

pub fn cmd_config(service: &ServiceConfig, override_path: Option<&Path>) -> Result<()> {
    let source = match override_path {
        Some(path) => path.display().to_string(),
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => path.display().to_string(),
            None => "built-in defaults".to_string(),
        },
    };

    println!("# Source: {} (environment overrides applied)", source);
    print!("{}", service.to_masked_toml().context("Failed to render config")?);

    Ok(())
}
