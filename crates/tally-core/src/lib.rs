//! Tally Core Library
//!
//! Shared functionality for the Tally statement ingestion pipeline:
//! - Bank statement spreadsheet parsers, selected by bank code
//! - Transaction classifiers (constant fallback and TF-IDF + logistic model)
//! - Duplicate upload detection by content hash
//! - Database access and migrations
//! - Chunked batch orchestration with progress tracking
//! - Batch-processed event publishing
//! - Layered service configuration

pub mod classifier;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod events;
pub mod identity;
pub mod models;
pub mod parsers;
pub mod pipeline;

/// Test utilities including mock broker and identity servers
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use classifier::{
    normalize_description, Classifier, ClassifierClient, ClassifierStatus, Explanation,
    FallbackClassifier, MlClassifier, ModelArtifacts, Prediction, TypeToken, FALLBACK_LABEL,
};
pub use config::{
    BrokerConfig, ClassifierConfig, ClassifierKind, IdentityConfig, PipelineConfig, ServiceConfig,
};
pub use db::Database;
pub use dedup::{content_hash, DuplicateDetector, FileDigest};
pub use error::{Error, Result};
pub use events::{
    BatchEvent, EventPublisher, EventStatus, MemoryPublisher, NoopPublisher, Publisher,
    RabbitMqPublisher,
};
pub use identity::IdentityClient;
pub use models::*;
pub use parsers::{BancolombiaParser, ExcelParser, ParserFactory};
pub use pipeline::{
    is_spreadsheet_filename, BatchOrchestrator, Submission, UploadedFile, DEFAULT_CHUNK_SIZE,
};
