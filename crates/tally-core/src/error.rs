//! Error types for Tally

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The statement is not in the layout the bank parser expects
    #[error("Invalid file format: {0}")]
    Format(String),

    #[error("Unsupported bank '{code}'. Supported banks: {}", supported.join(", "))]
    UnsupportedBank { code: String, supported: Vec<String> },

    #[error("Bank with name {0} not found")]
    BankNotFound(String),

    /// A file with identical content was already uploaded by the same user
    #[error("File {filename} was already uploaded on {uploaded_at}")]
    DuplicateFile {
        filename: String,
        batch_id: String,
        uploaded_at: DateTime<Utc>,
    },

    #[error("Classifier error: {0}")]
    Classifier(String),

    /// The processing task died before finishing (e.g. a panic)
    #[error("Batch processing aborted: {0}")]
    Aborted(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether this error was caused by the caller's input rather than the service
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::Format(_)
                | Error::Spreadsheet(_)
                | Error::UnsupportedBank { .. }
                | Error::BankNotFound(_)
                | Error::InvalidData(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_bank_lists_codes() {
        let err = Error::UnsupportedBank {
            code: "ACME".to_string(),
            supported: vec!["BANCOLOMBIA".to_string(), "DAVIVIENDA".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Unsupported bank 'ACME'. Supported banks: BANCOLOMBIA, DAVIVIENDA"
        );
        assert!(err.is_input_error());
    }

    #[test]
    fn test_duplicate_is_not_input_error() {
        let err = Error::DuplicateFile {
            filename: "march.xlsx".to_string(),
            batch_id: "abc".to_string(),
            uploaded_at: Utc::now(),
        };
        assert!(!err.is_input_error());
        assert!(err.to_string().starts_with("File march.xlsx was already uploaded on"));
    }
}
