//! Duplicate upload detection
//!
//! Files are identified by the SHA-256 of their raw bytes, scoped to the
//! uploading user. A repeat is reported as [`Error::DuplicateFile`] before any
//! batch is created for it.

use std::collections::HashMap;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::db::{duplicate_of, Database};
use crate::error::{Error, Result};
use crate::models::{Batch, FileUploadRecord};
use crate::pipeline::UploadedFile;

/// Lowercase hex SHA-256 of `content`
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Short form of a hash for log fields
pub(crate) fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(16)]
}

/// Identity of one uploaded file: name, size and content hash
#[derive(Debug, Clone, PartialEq)]
pub struct FileDigest {
    pub filename: String,
    pub hash: String,
    pub size: i64,
}

impl FileDigest {
    pub fn of(file: &UploadedFile) -> Self {
        Self {
            filename: file.filename.clone(),
            hash: content_hash(&file.content),
            size: file.content.len() as i64,
        }
    }
}

/// Upload ledger lookups backed by the `file_uploads` table
#[derive(Clone)]
pub struct DuplicateDetector {
    db: Database,
}

impl DuplicateDetector {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Prior upload of this content by this user
    pub fn find_by_hash(&self, user_id: &str, hash: &str) -> Result<Option<FileUploadRecord>> {
        self.db.find_upload_by_hash(user_id, hash)
    }

    /// Create the batch for an accepted request and record its files against it
    ///
    /// The lookup and the inserts share one write transaction, so of two
    /// concurrent uploads of the same content only one gets a batch.
    pub fn open_batch(
        &self,
        user_id: &str,
        files: &[FileDigest],
        bank_code: &str,
        size: i64,
    ) -> Result<Batch> {
        let (batch, records) = self
            .db
            .create_batch_with_uploads(size, user_id, bank_code, files)?;
        for record in &records {
            debug!(
                user_id,
                batch_id = %batch.id,
                file = %record.file_name,
                hash = short_hash(&record.file_hash),
                "Recorded upload"
            );
        }
        Ok(batch)
    }

    /// Reject the whole request if any file was uploaded before
    ///
    /// Also rejects a request that carries the same bytes twice; that
    /// conflict has no earlier batch, so its batch id is empty.
    pub fn ensure_new(&self, user_id: &str, files: &[FileDigest]) -> Result<()> {
        let mut seen: HashMap<&str, &str> = HashMap::new();

        for file in files {
            if let Some(record) = self.find_by_hash(user_id, &file.hash)? {
                info!(
                    user_id,
                    file = %file.filename,
                    hash = short_hash(&file.hash),
                    original_batch = %record.batch_id,
                    "Duplicate upload rejected"
                );
                return Err(duplicate_of(&file.filename, record));
            }

            if let Some(first) = seen.insert(file.hash.as_str(), file.filename.as_str()) {
                info!(
                    user_id,
                    file = %file.filename,
                    same_as = first,
                    "Same content submitted twice in one request"
                );
                return Err(Error::DuplicateFile {
                    filename: file.filename.clone(),
                    batch_id: String::new(),
                    uploaded_at: Utc::now(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_of_file() {
        let digest = FileDigest::of(&UploadedFile::new("a.xlsx", b"abc".to_vec()));
        assert_eq!(digest.size, 3);
        assert_eq!(digest.hash, content_hash(b"abc"));
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_hash(b"abc").len(), 64);
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
        assert_eq!(short_hash(&content_hash(b"abc")).len(), 16);
    }

    #[test]
    fn test_ensure_new_rejects_prior_upload() {
        let db = Database::in_memory().unwrap();
        let detector = DuplicateDetector::new(db.clone());
        let file = FileDigest::of(&UploadedFile::new("march.xlsx", b"statement".to_vec()));

        detector.ensure_new("u1", std::slice::from_ref(&file)).unwrap();

        let batch = detector
            .open_batch("u1", std::slice::from_ref(&file), "BANCOLOMBIA", 1)
            .unwrap();
        assert_eq!(db.list_uploads_for_batch(&batch.id).unwrap().len(), 1);

        match detector.ensure_new("u1", std::slice::from_ref(&file)) {
            Err(Error::DuplicateFile { batch_id, filename, .. }) => {
                assert_eq!(batch_id, batch.id);
                assert_eq!(filename, "march.xlsx");
            }
            other => panic!("expected duplicate, got {:?}", other),
        }

        // Another user may upload the same statement
        detector.ensure_new("u2", &[file]).unwrap();
    }

    #[test]
    fn test_ensure_new_rejects_repeat_within_request() {
        let db = Database::in_memory().unwrap();
        let detector = DuplicateDetector::new(db);
        let files: Vec<FileDigest> = [
            UploadedFile::new("a.xlsx", b"same".to_vec()),
            UploadedFile::new("b.xlsx", b"same".to_vec()),
        ]
        .iter()
        .map(FileDigest::of)
        .collect();

        match detector.ensure_new("u1", &files) {
            Err(Error::DuplicateFile { batch_id, filename, .. }) => {
                assert!(batch_id.is_empty());
                assert_eq!(filename, "b.xlsx");
            }
            other => panic!("expected duplicate, got {:?}", other),
        }
    }

    #[test]
    fn test_open_batch_rejects_recorded_content() {
        let db = Database::in_memory().unwrap();
        let detector = DuplicateDetector::new(db.clone());
        let first = FileDigest::of(&UploadedFile::new("a.xlsx", b"one".to_vec()));
        let repeat = FileDigest::of(&UploadedFile::new("b.xlsx", b"one".to_vec()));
        let fresh = FileDigest::of(&UploadedFile::new("c.xlsx", b"two".to_vec()));

        let batch = detector
            .open_batch("u1", std::slice::from_ref(&first), "BANCOLOMBIA", 1)
            .unwrap();

        // Skipping the early check still cannot record the content twice
        match detector.open_batch("u1", &[fresh.clone(), repeat], "BANCOLOMBIA", 2) {
            Err(Error::DuplicateFile { batch_id, filename, .. }) => {
                assert_eq!(batch_id, batch.id);
                assert_eq!(filename, "b.xlsx");
            }
            other => panic!("expected duplicate, got {:?}", other),
        }

        // Nothing from the rejected request was kept
        assert_eq!(db.list_batches(10).unwrap().len(), 1);
        assert_eq!(db.count_uploads_for_user("u1").unwrap(), 1);
        assert!(db.find_upload_by_hash("u1", &fresh.hash).unwrap().is_none());
    }
}
