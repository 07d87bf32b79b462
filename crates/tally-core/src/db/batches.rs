//! Batch lifecycle operations
//!
//! Every status change is a guarded `UPDATE ... WHERE status IN (...)` so a
//! terminal row is never rewritten, even by a stale task.

use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{info, warn};

use super::{format_datetime, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Batch, BatchStatus};

const BATCH_COLUMNS: &str = "id, status, start_time, end_time, size, processed_count";

fn row_to_batch(row: &Row<'_>) -> rusqlite::Result<Batch> {
    let status: String = row.get(1)?;
    let start_time: String = row.get(2)?;
    let end_time: Option<String> = row.get(3)?;
    Ok(Batch {
        id: row.get(0)?,
        status: status.parse().unwrap_or(BatchStatus::Error),
        start_time: parse_datetime(&start_time),
        end_time: end_time.as_deref().map(parse_datetime),
        size: row.get(4)?,
        processed_count: row.get(5)?,
    })
}

/// Insert a `pending` batch on `conn`, which may be inside a transaction
pub(super) fn insert_batch(conn: &Connection, size: i64) -> Result<Batch> {
    let now = Utc::now();
    let batch = Batch {
        id: uuid::Uuid::new_v4().to_string(),
        status: BatchStatus::Pending,
        start_time: now,
        end_time: None,
        size,
        processed_count: 0,
    };

    let stamp = format_datetime(&now);
    conn.execute(
        "INSERT INTO batches (id, status, start_time, size, processed_count, updated_at)
         VALUES (?, ?, ?, ?, 0, ?)",
        params![batch.id, batch.status.as_str(), stamp, size, stamp],
    )?;

    Ok(batch)
}

impl Database {
    /// Create a new `pending` batch for `size` line items
    pub fn create_batch(&self, size: i64) -> Result<Batch> {
        let conn = self.conn()?;
        insert_batch(&conn, size)
    }

    /// Get a batch by id
    pub fn get_batch(&self, id: &str) -> Result<Option<Batch>> {
        let conn = self.conn()?;
        let batch = conn
            .query_row(
                &format!("SELECT {} FROM batches WHERE id = ?", BATCH_COLUMNS),
                params![id],
                row_to_batch,
            )
            .optional()?;
        Ok(batch)
    }

    /// List batches, newest first
    pub fn list_batches(&self, limit: i64) -> Result<Vec<Batch>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM batches ORDER BY start_time DESC LIMIT ?",
            BATCH_COLUMNS
        ))?;
        let batches = stmt
            .query_map(params![limit], row_to_batch)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(batches)
    }

    /// Move a batch to `next`, provided it is currently in an allowed predecessor state
    ///
    /// Terminal transitions also stamp `end_time`. Returns `InvalidData` when
    /// the batch does not exist or is in a state that cannot move to `next`.
    pub fn transition_batch(&self, id: &str, next: BatchStatus) -> Result<()> {
        let allowed = next.predecessors();
        if allowed.is_empty() {
            return Err(Error::InvalidData(format!(
                "Batch {} cannot move back to {}",
                id, next
            )));
        }

        let placeholders = vec!["?"; allowed.len()].join(", ");
        let end_time = if next.is_terminal() { ", end_time = ?" } else { "" };
        let sql = format!(
            "UPDATE batches SET status = ?, updated_at = ?{} WHERE id = ? AND status IN ({})",
            end_time, placeholders
        );

        let now = format_datetime(&Utc::now());
        let mut values: Vec<&dyn rusqlite::ToSql> = vec![&next, &now];
        if next.is_terminal() {
            values.push(&now);
        }
        values.push(&id);
        for status in allowed {
            values.push(status);
        }

        let conn = self.conn()?;
        let updated = conn.execute(&sql, values.as_slice())?;

        if updated == 0 {
            let current = self.get_batch(id)?;
            return Err(match current {
                Some(batch) => Error::InvalidData(format!(
                    "Batch {} cannot move from {} to {}",
                    id, batch.status, next
                )),
                None => Error::NotFound(format!("Batch {} not found", id)),
            });
        }

        Ok(())
    }

    pub fn mark_batch_processing(&self, id: &str) -> Result<()> {
        self.transition_batch(id, BatchStatus::Processing)
    }

    pub fn mark_batch_completed(&self, id: &str) -> Result<()> {
        self.transition_batch(id, BatchStatus::Completed)
    }

    pub fn mark_batch_error(&self, id: &str) -> Result<()> {
        self.transition_batch(id, BatchStatus::Error)
    }

    /// Fail batches stranded in `pending` or `processing`
    ///
    /// A batch whose last update is older than `max_age` has no live task
    /// driving it. At process start every non-terminal batch qualifies, so
    /// callers pass `Duration::ZERO` there.
    pub fn recover_stuck_batches(&self, max_age: Duration) -> Result<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| Error::InvalidData(format!("Invalid recovery age: {}", e)))?;
        let now = Utc::now();
        let cutoff = format_datetime(&(now - max_age));
        let stamp = format_datetime(&now);

        let conn = self.conn()?;
        let stranded: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT id FROM batches
                 WHERE status IN ('pending', 'processing') AND updated_at <= ?",
            )?;
            let ids = stmt
                .query_map(params![cutoff], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            ids
        };

        for id in &stranded {
            warn!(batch_id = %id, "Failing stranded batch");
        }

        let updated = conn.execute(
            "UPDATE batches SET status = 'error', end_time = ?, updated_at = ?
             WHERE status IN ('pending', 'processing') AND updated_at <= ?",
            params![stamp, stamp, cutoff],
        )?;

        if updated > 0 {
            info!(count = updated, "Recovered stuck batches");
        }
        Ok(updated)
    }
}

impl rusqlite::ToSql for BatchStatus {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}
