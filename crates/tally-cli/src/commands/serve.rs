//! Server command implementation

use std::path::Path;

use anyhow::Result;
use tally_core::{ClassifierKind, ServiceConfig};

use super::open_db;

pub async fn cmd_serve(
    db_path: &Path,
    service: &ServiceConfig,
    host: &str,
    port: u16,
    no_auth: bool,
    no_encrypt: bool,
) -> Result<()> {
    println!("🚀 Starting Tally web server...");
    println!("   Database: {}", db_path.display());
    println!("   Listening: http://{}:{}", host, port);
    match service.classifier.kind {
        ClassifierKind::Ml => println!(
            "   Classifier: ml ({})",
            service.classifier.models_path.display()
        ),
        ClassifierKind::Fallback => println!("   Classifier: fallback (every transaction is \"Other\")"),
    }
    println!("   Chunk size: {}", service.pipeline.chunk_size);

    match service.broker.base_url() {
        Some(url) => println!(
            "   📨 Batch events: {} (queue {})",
            url, service.broker.queue_name
        ),
        None => println!("   📨 Batch events: disabled (set RABBITMQ_HOST)"),
    }

    if no_auth {
        println!();
        println!("   ⚠️  Authentication DISABLED - do not expose to network!");
    } else {
        match &service.identity.url {
            Some(url) => println!("   🔐 Authentication: identity service at {}", url),
            None => {
                println!("   🔒 Authentication: X-User-Id header");
                println!("      Set IDENTITY_SERVICE_URL to validate bearer tokens");
            }
        }
    }
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let db = open_db(db_path, no_encrypt)?;

    let config = tally_server::ServerConfig {
        require_auth: !no_auth,
        allowed_origins: vec![],
    };

    tally_server::serve_with_config(db, host, port, service, config).await?;

    Ok(())
}
