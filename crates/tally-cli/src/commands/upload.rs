//! Local statement processing
//!
//! Runs the same pipeline as the upload endpoint, in-process, and waits for
//! the batch to reach a terminal state.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tally_core::db::Database;
use tally_core::{
    is_spreadsheet_filename, BatchOrchestrator, BatchStatus, ClassifierClient, MemoryPublisher,
    ParserFactory, ServiceConfig, UploadedFile,
};

use super::{print_status, seed_banks};

pub async fn cmd_upload(
    db: &Database,
    service: &ServiceConfig,
    bank: &str,
    user: &str,
    files: &[PathBuf],
) -> Result<()> {
    let parsers = ParserFactory::new();
    let parser = parsers.get(bank)?;
    seed_banks(db)?;

    let mut uploads = Vec::with_capacity(files.len());
    for path in files {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        if !is_spreadsheet_filename(&filename) {
            bail!("File {} is not a valid Excel file", path.display());
        }
        let content =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        uploads.push(UploadedFile::new(filename, content));
    }

    println!(
        "📥 Processing {} file(s) for bank {}...",
        uploads.len(),
        parser.bank_code()
    );

    let classifier = ClassifierClient::from_config(&service.classifier);
    classifier.warm_up().await;

    let publisher = MemoryPublisher::new();
    let orchestrator = BatchOrchestrator::new(
        db.clone(),
        Arc::new(classifier),
        Arc::new(publisher.clone()),
    )
    .with_chunk_size(service.pipeline.chunk_size);

    let submission = orchestrator.execute(&uploads, parser.as_ref(), user)?;
    println!("   Batch: {}", submission.batch_id);
    println!("   Items: {}", submission.items);

    submission
        .task
        .await
        .context("Batch task panicked")?;

    let view = orchestrator
        .status(&submission.batch_id)?
        .context("Batch disappeared while processing")?;
    print_status(&view);

    for event in publisher.events() {
        println!("   Event: {}", serde_json::to_string(&event)?);
    }

    if view.status != BatchStatus::Completed {
        bail!("Batch {} ended in status {}", view.batch_id, view.status.as_str());
    }

    let per_category = db.count_transactions_by_category(&submission.batch_id)?;
    if !per_category.is_empty() {
        println!();
        println!("   Categories:");
        for (category, count) in per_category {
            println!("   {:>6}  {}", count, category);
        }
    }

    println!("✅ Batch completed");
    Ok(())
}
