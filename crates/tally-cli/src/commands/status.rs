//! Batch status command

use anyhow::{Context, Result};
use tally_core::db::Database;
use tally_core::{BatchStatus, BatchStatusView};

pub fn cmd_status(db: &Database, batch_id: &str, json: bool) -> Result<()> {
    let batch = db
        .get_batch(batch_id)
        .context("Failed to load batch")?
        .with_context(|| format!("Batch {} not found", batch_id))?;
    let view = batch.status_view();

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_status(&view);
    }

    Ok(())
}

/// Human-readable batch summary
pub fn print_status(view: &BatchStatusView) {
    let icon = match view.status {
        BatchStatus::Pending => "⏳",
        BatchStatus::Processing => "⚙️ ",
        BatchStatus::Completed => "✅",
        BatchStatus::Error => "❌",
    };

    println!();
    println!("{} Batch {}", icon, view.batch_id);
    println!("   Status:    {}", view.status.as_str());
    println!(
        "   Progress:  {}/{} ({:.1}%)",
        view.processed_count, view.total_count, view.processed_percentage
    );
    println!(
        "   Started:   {}",
        view.start_time.format("%Y-%m-%d %H:%M:%S UTC")
    );
    match view.end_time {
        Some(end) => {
            let elapsed = end - view.start_time;
            println!(
                "   Finished:  {} ({} ms)",
                end.format("%Y-%m-%d %H:%M:%S UTC"),
                elapsed.num_milliseconds()
            );
        }
        None => println!("   Finished:  -"),
    }
}
