//! File upload ledger
//!
//! `(user_id, file_hash)` is unique: a user's content appears at most once,
//! tied to the batch it produced.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::info;

use super::batches::insert_batch;
use super::{format_datetime, parse_datetime, Database};
use crate::dedup::FileDigest;
use crate::error::{Error, Result};
use crate::models::{Batch, FileUploadRecord};

const UPLOAD_COLUMNS: &str =
    "id, user_id, file_hash, file_name, bank_code, upload_date, batch_id, file_size";

fn row_to_upload(row: &Row<'_>) -> rusqlite::Result<FileUploadRecord> {
    let upload_date: String = row.get(5)?;
    Ok(FileUploadRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        file_hash: row.get(2)?,
        file_name: row.get(3)?,
        bank_code: row.get(4)?,
        upload_date: parse_datetime(&upload_date),
        batch_id: row.get(6)?,
        file_size: row.get(7)?,
    })
}

/// Fields of a new ledger entry
#[derive(Debug, Clone)]
pub struct NewFileUpload<'a> {
    pub user_id: &'a str,
    pub file_hash: &'a str,
    pub file_name: &'a str,
    pub bank_code: &'a str,
    pub batch_id: &'a str,
    pub file_size: i64,
}

/// The conflict reported when `filename` repeats content from `prior`
pub(crate) fn duplicate_of(filename: &str, prior: FileUploadRecord) -> Error {
    Error::DuplicateFile {
        filename: filename.to_string(),
        batch_id: prior.batch_id,
        uploaded_at: prior.upload_date,
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn find_upload_in(
    conn: &Connection,
    user_id: &str,
    file_hash: &str,
) -> rusqlite::Result<Option<FileUploadRecord>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM file_uploads WHERE user_id = ? AND file_hash = ?",
            UPLOAD_COLUMNS
        ),
        params![user_id, file_hash],
        row_to_upload,
    )
    .optional()
}

fn insert_upload(
    conn: &Connection,
    upload: &NewFileUpload<'_>,
) -> rusqlite::Result<FileUploadRecord> {
    let record = FileUploadRecord {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: upload.user_id.to_string(),
        file_hash: upload.file_hash.to_string(),
        file_name: upload.file_name.to_string(),
        bank_code: upload.bank_code.to_string(),
        upload_date: Utc::now(),
        batch_id: upload.batch_id.to_string(),
        file_size: upload.file_size,
    };

    conn.execute(
        "INSERT INTO file_uploads
            (id, user_id, file_hash, file_name, bank_code, upload_date, batch_id, file_size)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            record.id,
            record.user_id,
            record.file_hash,
            record.file_name,
            record.bank_code,
            format_datetime(&record.upload_date),
            record.batch_id,
            record.file_size,
        ],
    )?;

    Ok(record)
}

impl Database {
    /// Upload of this content by this user, if any
    ///
    /// Served by the unique `(user_id, file_hash)` index.
    pub fn find_upload_by_hash(
        &self,
        user_id: &str,
        file_hash: &str,
    ) -> Result<Option<FileUploadRecord>> {
        let conn = self.conn()?;
        Ok(find_upload_in(&conn, user_id, file_hash)?)
    }

    /// Append a single ledger entry
    pub fn record_upload(&self, upload: &NewFileUpload<'_>) -> Result<FileUploadRecord> {
        let conn = self.conn()?;
        Ok(insert_upload(&conn, upload)?)
    }

    /// Create a `pending` batch together with the ledger entries of its files
    ///
    /// Runs as one `BEGIN IMMEDIATE` transaction: the duplicate lookup, the
    /// batch row and every ledger row commit together or not at all. Content
    /// this user already uploaded comes back as [`Error::DuplicateFile`] and
    /// leaves nothing behind.
    pub fn create_batch_with_uploads(
        &self,
        size: i64,
        user_id: &str,
        bank_code: &str,
        files: &[FileDigest],
    ) -> Result<(Batch, Vec<FileUploadRecord>)> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for file in files {
            if let Some(prior) = find_upload_in(&tx, user_id, &file.hash)? {
                return Err(duplicate_of(&file.filename, prior));
            }
        }

        let batch = insert_batch(&tx, size)?;

        let mut records = Vec::with_capacity(files.len());
        for file in files {
            let upload = NewFileUpload {
                user_id,
                file_hash: &file.hash,
                file_name: &file.filename,
                bank_code,
                batch_id: &batch.id,
                file_size: file.size,
            };
            let inserted = insert_upload(&tx, &upload);
            match inserted {
                Ok(record) => records.push(record),
                Err(e) if is_unique_violation(&e) => {
                    // Rolls back the batch and any rows inserted so far
                    drop(tx);
                    info!(user_id, file = %file.filename, "Upload lost a duplicate race");
                    return Err(self.conflicting_upload(user_id, file));
                }
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit()?;
        Ok((batch, records))
    }

    /// Describe the row that beat `file` to the unique index
    fn conflicting_upload(&self, user_id: &str, file: &FileDigest) -> Error {
        match self.find_upload_by_hash(user_id, &file.hash) {
            Ok(Some(prior)) => duplicate_of(&file.filename, prior),
            // The other copy was in this same request and was rolled back with it
            Ok(None) => Error::DuplicateFile {
                filename: file.filename.clone(),
                batch_id: String::new(),
                uploaded_at: Utc::now(),
            },
            Err(e) => e,
        }
    }

    /// Ledger entries that produced a batch
    pub fn list_uploads_for_batch(&self, batch_id: &str) -> Result<Vec<FileUploadRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM file_uploads WHERE batch_id = ? ORDER BY upload_date",
            UPLOAD_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![batch_id], row_to_upload)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn count_uploads_for_user(&self, user_id: &str) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM file_uploads WHERE user_id = ?",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
