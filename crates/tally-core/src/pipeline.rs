//! Batch orchestration
//!
//! An upload is accepted synchronously (bank lookup, duplicate check,
//! parsing, batch creation) and then processed by a detached task:
//!
//! ```text
//! pending -> processing -> completed
//!                       \-> error
//! ```
//!
//! The task walks the parsed line items in fixed-size chunks, strictly in
//! order. Each chunk is classified with one batch call and committed as one
//! database transaction together with the batch's progress counter. When the
//! batch reaches a terminal state one event is published; a failed publish is
//! logged and never changes the batch.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::classifier::Classifier;
use crate::db::{CategoryCache, Database};
use crate::dedup::{DuplicateDetector, FileDigest};
use crate::error::{Error, Result};
use crate::events::{BatchEvent, EventPublisher};
use crate::models::{BatchStatusView, NewTransaction, RawLineItem};
use crate::parsers::ExcelParser;

/// Line items per committed chunk
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Accepted spreadsheet extensions
const SPREADSHEET_EXTENSIONS: &[&str] = &[".xlsx", ".xls"];

/// Whether a filename looks like a spreadsheet we can parse
pub fn is_spreadsheet_filename(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    SPREADSHEET_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// One file from an upload request
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content,
        }
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// An accepted upload
#[derive(Debug)]
pub struct Submission {
    pub batch_id: String,
    /// Total line items across all files
    pub items: usize,
    /// Background task driving the batch; detaching it is fine
    pub task: JoinHandle<()>,
}

/// Everything the background task needs, owned so it can outlive the request
struct BatchJob {
    batch_id: String,
    user_id: String,
    bank_id: i64,
    items: Vec<RawLineItem>,
}

/// Drives batches from upload to terminal state
#[derive(Clone)]
pub struct BatchOrchestrator {
    db: Database,
    detector: DuplicateDetector,
    classifier: Arc<dyn Classifier>,
    publisher: Arc<dyn EventPublisher>,
    chunk_size: usize,
}

impl BatchOrchestrator {
    pub fn new(
        db: Database,
        classifier: Arc<dyn Classifier>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            detector: DuplicateDetector::new(db.clone()),
            db,
            classifier,
            publisher,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Override the chunk size (minimum 1)
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn classifier(&self) -> &Arc<dyn Classifier> {
        &self.classifier
    }

    pub fn publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.publisher
    }

    /// Accept an upload and start processing it in the background
    ///
    /// Every input problem (no files, unknown bank, duplicate content, a
    /// malformed spreadsheet) is returned here, before any batch exists.
    /// Must be called from within a Tokio runtime.
    pub fn execute(
        &self,
        files: &[UploadedFile],
        parser: &dyn ExcelParser,
        user_id: &str,
    ) -> Result<Submission> {
        if files.is_empty() {
            return Err(Error::InvalidData("No files provided".to_string()));
        }
        if user_id.trim().is_empty() {
            return Err(Error::InvalidData("Missing user id".to_string()));
        }

        let bank_code = parser.bank_code();
        let bank = self.db.require_bank(bank_code)?;

        // Whole-request veto: one repeat rejects every file
        let digests: Vec<FileDigest> = files.iter().map(FileDigest::of).collect();
        self.detector.ensure_new(user_id, &digests)?;

        let mut items = Vec::new();
        for file in files {
            let parsed = parser.parse(&file.content).map_err(|e| match e {
                Error::Format(msg) => Error::Format(format!("{}: {}", file.filename, msg)),
                other => other,
            })?;
            debug!(file = %file.filename, items = parsed.len(), "Parsed file");
            items.extend(parsed);
        }

        // Re-checked under the write lock; a concurrent twin loses here
        let batch = self
            .detector
            .open_batch(user_id, &digests, bank_code, items.len() as i64)?;

        info!(
            batch_id = %batch.id,
            user_id,
            bank = bank_code,
            files = files.len(),
            items = items.len(),
            "Batch accepted"
        );

        let job = BatchJob {
            batch_id: batch.id.clone(),
            user_id: user_id.to_string(),
            bank_id: bank.id,
            items,
        };
        let items = job.items.len();
        let orchestrator = self.clone();
        let task = tokio::spawn(async move { orchestrator.run(job).await });

        Ok(Submission {
            batch_id: batch.id,
            items,
            task,
        })
    }

    /// Status projection for a batch; `None` when the id is unknown
    pub fn status(&self, batch_id: &str) -> Result<Option<BatchStatusView>> {
        Ok(self.db.get_batch(batch_id)?.map(|b| b.status_view()))
    }

    /// Drive one batch to a terminal state and announce it
    async fn run(self, job: BatchJob) {
        let batch_id = job.batch_id.clone();
        let user_id = job.user_id.clone();
        let items = job.items.len();

        // A panicking classifier must still leave the batch terminal
        let worker = self.clone();
        let outcome = match tokio::spawn(async move { worker.process(&job).await }).await {
            Ok(result) => result,
            Err(e) => Err(Error::Aborted(e.to_string())),
        };

        let event = match outcome {
            Ok(()) => {
                info!(batch_id = %batch_id, items, "Batch completed");
                BatchEvent::completed(&batch_id, &user_id)
            }
            Err(e) => {
                error!(batch_id = %batch_id, error = %e, "Batch failed");
                if let Err(mark_err) = self.db.mark_batch_error(&batch_id) {
                    error!(
                        batch_id = %batch_id,
                        error = %mark_err,
                        "Failed to mark batch as error"
                    );
                }
                BatchEvent::failed(&batch_id, &user_id)
            }
        };

        if let Err(e) = self.publisher.publish_batch_processed(&event).await {
            error!(
                batch_id = %batch_id,
                publisher = self.publisher.name(),
                error = %e,
                "Failed to publish batch event"
            );
        }
    }

    async fn process(&self, job: &BatchJob) -> Result<()> {
        self.db.mark_batch_processing(&job.batch_id)?;

        let mut categories = CategoryCache::new();
        let total_chunks = job.items.len().div_ceil(self.chunk_size);

        for (index, chunk) in job.items.chunks(self.chunk_size).enumerate() {
            let descriptions: Vec<String> =
                chunk.iter().map(|item| item.description.clone()).collect();
            let amounts: Vec<f64> = chunk.iter().map(|item| item.amount).collect();

            let labels = self
                .classifier
                .classify_batch(&descriptions, Some(amounts.as_slice()))
                .await;
            if labels.len() != chunk.len() {
                return Err(Error::Classifier(format!(
                    "Classifier returned {} labels for {} items",
                    labels.len(),
                    chunk.len()
                )));
            }

            let category_ids = {
                let conn = self.db.conn()?;
                categories.resolve_all(&conn, &labels)?
            };

            let rows: Vec<NewTransaction> = chunk
                .iter()
                .zip(category_ids)
                .map(|(item, category_id)| {
                    NewTransaction::from_line_item(
                        item,
                        &job.user_id,
                        job.bank_id,
                        &job.batch_id,
                        category_id,
                    )
                })
                .collect();

            self.db.commit_chunk(&job.batch_id, &rows)?;
            debug!(
                batch_id = %job.batch_id,
                chunk = index + 1,
                of = total_chunks,
                items = rows.len(),
                "Committed chunk"
            );
        }

        self.db.mark_batch_completed(&job.batch_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifierStatus, FallbackClassifier};
    use crate::events::MemoryPublisher;
    use crate::models::BatchStatus;
    use chrono::NaiveDate;
    use std::time::Duration;

    struct FixedParser(Vec<f64>);

    impl ExcelParser for FixedParser {
        fn bank_code(&self) -> &'static str {
            "BANCOLOMBIA"
        }

        fn parse(&self, _content: &[u8]) -> Result<Vec<RawLineItem>> {
            Ok(self
                .0
                .iter()
                .enumerate()
                .map(|(i, amount)| RawLineItem {
                    date: NaiveDate::from_ymd_opt(2024, 1, 1 + i as u32).unwrap(),
                    description: format!("ITEM {}", i),
                    reference: None,
                    amount: *amount,
                })
                .collect())
        }
    }

    /// Holds the request in parsing long enough for another to catch up
    struct SlowParser;

    impl ExcelParser for SlowParser {
        fn bank_code(&self) -> &'static str {
            "BANCOLOMBIA"
        }

        fn parse(&self, content: &[u8]) -> Result<Vec<RawLineItem>> {
            std::thread::sleep(Duration::from_millis(50));
            FixedParser(vec![1.0]).parse(content)
        }
    }

    struct PanickingClassifier;

    #[async_trait::async_trait]
    impl Classifier for PanickingClassifier {
        async fn classify(&self, _description: &str, _amount: Option<f64>) -> String {
            panic!("model exploded")
        }

        async fn classify_batch(
            &self,
            _descriptions: &[String],
            _amounts: Option<&[f64]>,
        ) -> Vec<String> {
            panic!("model exploded")
        }

        fn status(&self) -> ClassifierStatus {
            ClassifierStatus {
                mode: "ml",
                ready: true,
                detail: None,
            }
        }
    }

    fn orchestrator(db: &Database, publisher: &MemoryPublisher) -> BatchOrchestrator {
        BatchOrchestrator::new(
            db.clone(),
            Arc::new(FallbackClassifier),
            Arc::new(publisher.clone()),
        )
    }

    #[test]
    fn test_spreadsheet_filenames() {
        assert!(is_spreadsheet_filename("march.xlsx"));
        assert!(is_spreadsheet_filename("MARCH.XLS"));
        assert!(!is_spreadsheet_filename("march.csv"));
        assert!(!is_spreadsheet_filename("xlsx"));
    }

    #[test]
    fn test_chunk_size_floor() {
        let db = Database::in_memory().unwrap();
        let o = orchestrator(&db, &MemoryPublisher::new()).with_chunk_size(0);
        assert_eq!(o.chunk_size(), 1);
    }

    #[tokio::test]
    async fn test_execute_runs_to_completion() {
        let db = Database::in_memory().unwrap();
        db.seed_banks(["BANCOLOMBIA"]).unwrap();
        let publisher = MemoryPublisher::new();
        let o = orchestrator(&db, &publisher).with_chunk_size(2);

        let files = vec![UploadedFile::new("a.xlsx", b"a".to_vec())];
        let submission = o
            .execute(&files, &FixedParser(vec![1.0, -2.0, 3.0]), "u1")
            .unwrap();
        assert_eq!(submission.items, 3);
        submission.task.await.unwrap();

        let view = o.status(&submission.batch_id).unwrap().unwrap();
        assert_eq!(view.status, BatchStatus::Completed);
        assert_eq!(view.processed_count, 3);
        assert_eq!(view.processed_percentage, 100.0);
        assert_eq!(
            publisher.events(),
            vec![BatchEvent::completed(&submission.batch_id, "u1")]
        );
    }

    #[tokio::test]
    async fn test_execute_rejects_empty_request() {
        let db = Database::in_memory().unwrap();
        let o = orchestrator(&db, &MemoryPublisher::new());
        assert!(matches!(
            o.execute(&[], &FixedParser(vec![]), "u1"),
            Err(Error::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_bank_creates_nothing() {
        let db = Database::in_memory().unwrap();
        let o = orchestrator(&db, &MemoryPublisher::new());
        let files = vec![UploadedFile::new("a.xlsx", b"a".to_vec())];

        let err = o
            .execute(&files, &FixedParser(vec![1.0]), "u1")
            .unwrap_err();
        assert!(matches!(err, Error::BankNotFound(_)));
        assert!(db.list_batches(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_statement_completes() {
        let db = Database::in_memory().unwrap();
        db.seed_banks(["BANCOLOMBIA"]).unwrap();
        let o = orchestrator(&db, &MemoryPublisher::new());
        let files = vec![UploadedFile::new("a.xlsx", b"a".to_vec())];

        let submission = o.execute(&files, &FixedParser(vec![]), "u1").unwrap();
        submission.task.await.unwrap();

        let view = o.status(&submission.batch_id).unwrap().unwrap();
        assert_eq!(view.status, BatchStatus::Completed);
        assert_eq!(view.total_count, 0);
    }

    #[test]
    fn test_status_unknown_batch() {
        let db = Database::in_memory().unwrap();
        let o = orchestrator(&db, &MemoryPublisher::new());
        assert!(o.status("nope").unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_identical_uploads_accept_one() {
        let db = Database::in_memory().unwrap();
        db.seed_banks(["BANCOLOMBIA"]).unwrap();
        let o = orchestrator(&db, &MemoryPublisher::new());
        let barrier = Arc::new(std::sync::Barrier::new(2));

        let attempts: Vec<_> = (0..2)
            .map(|i| {
                let o = o.clone();
                let barrier = barrier.clone();
                tokio::task::spawn_blocking(move || {
                    let name = format!("copy{}.xlsx", i);
                    let files = vec![UploadedFile::new(name, b"same".to_vec())];
                    barrier.wait();
                    o.execute(&files, &SlowParser, "u1")
                })
            })
            .collect();

        let mut accepted = Vec::new();
        let mut duplicates = Vec::new();
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(submission) => accepted.push(submission),
                Err(Error::DuplicateFile { batch_id, .. }) => duplicates.push(batch_id),
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(accepted.len(), 1);
        assert_eq!(duplicates.len(), 1);
        let submission = accepted.remove(0);
        assert_eq!(duplicates[0], submission.batch_id);
        submission.task.await.unwrap();

        assert_eq!(db.list_batches(10).unwrap().len(), 1);
        assert_eq!(db.count_uploads_for_user("u1").unwrap(), 1);
        assert_eq!(
            o.status(&submission.batch_id).unwrap().unwrap().status,
            BatchStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_classifier_panic_fails_batch() {
        let db = Database::in_memory().unwrap();
        db.seed_banks(["BANCOLOMBIA"]).unwrap();
        let publisher = MemoryPublisher::new();
        let o = BatchOrchestrator::new(
            db.clone(),
            Arc::new(PanickingClassifier),
            Arc::new(publisher.clone()),
        );

        let files = vec![UploadedFile::new("a.xlsx", b"a".to_vec())];
        let submission = o
            .execute(&files, &FixedParser(vec![1.0, 2.0]), "u1")
            .unwrap();
        submission.task.await.unwrap();

        let view = o.status(&submission.batch_id).unwrap().unwrap();
        assert_eq!(view.status, BatchStatus::Error);
        assert_eq!(view.processed_count, 0);
        assert_eq!(
            publisher.events(),
            vec![BatchEvent::failed(&submission.batch_id, "u1")]
        );
        assert_eq!(db.count_transactions_for_batch(&submission.batch_id).unwrap(), 0);
    }
}
