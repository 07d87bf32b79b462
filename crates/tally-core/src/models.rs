//! Domain models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ========== Batch Models ==========

/// Processing state of an upload batch
///
/// Transitions only move forward: `pending -> processing -> completed | error`.
/// A batch may also fail straight from `pending` (e.g. the process restarted
/// before the background task picked it up).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Error,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// States a batch may be in immediately before entering `self`
    pub fn predecessors(&self) -> &'static [BatchStatus] {
        match self {
            Self::Pending => &[],
            Self::Processing => &[Self::Pending],
            Self::Completed => &[Self::Processing],
            Self::Error => &[Self::Pending, Self::Processing],
        }
    }

    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        next.predecessors().contains(self)
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown batch status: {}", s)),
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One upload-triggered unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub status: BatchStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Number of raw line items parsed at upload time
    pub size: i64,
    /// Items persisted so far (advanced once per committed chunk)
    pub processed_count: i64,
}

impl Batch {
    /// Completion percentage in the range 0..=100
    pub fn processed_percentage(&self) -> f64 {
        match self.status {
            BatchStatus::Completed => 100.0,
            BatchStatus::Pending => 0.0,
            BatchStatus::Processing | BatchStatus::Error => {
                if self.size <= 0 {
                    return 0.0;
                }
                let done = self.processed_count.clamp(0, self.size) as f64;
                done / self.size as f64 * 100.0
            }
        }
    }

    pub fn status_view(&self) -> BatchStatusView {
        BatchStatusView {
            batch_id: self.id.clone(),
            status: self.status,
            total_count: self.size,
            processed_count: self.processed_count,
            processed_percentage: self.processed_percentage(),
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

/// Read-only projection returned by the status query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusView {
    pub batch_id: String,
    pub status: BatchStatus,
    pub total_count: i64,
    pub processed_count: i64,
    pub processed_percentage: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

// ========== Transaction Models ==========

/// Direction of money movement, derived from the sign of the raw amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    Expense,
}

impl TransactionType {
    /// Positive amounts are income; zero and negative amounts are expenses
    pub fn from_amount(amount: f64) -> Self {
        if amount > 0.0 {
            Self::Income
        } else {
            Self::Expense
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            _ => Err(format!("Unknown transaction type: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unclassified row decoded from a bank statement
#[derive(Debug, Clone, PartialEq)]
pub struct RawLineItem {
    pub date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    /// Signed amount as it appears in the statement
    pub amount: f64,
}

/// A classified transaction ready to be persisted
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub user_id: String,
    pub category_id: i64,
    pub bank_id: i64,
    pub batch_id: String,
    pub name: String,
    pub reference: Option<String>,
    /// Non-negative magnitude of the raw amount
    pub value: f64,
    pub transaction_date: NaiveDate,
    pub transaction_type: TransactionType,
}

impl NewTransaction {
    pub fn from_line_item(
        item: &RawLineItem,
        user_id: &str,
        bank_id: i64,
        batch_id: &str,
        category_id: i64,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            category_id,
            bank_id,
            batch_id: batch_id.to_string(),
            name: item.description.clone(),
            reference: item.reference.clone(),
            value: item.amount.abs(),
            transaction_date: item.date,
            transaction_type: TransactionType::from_amount(item.amount),
        }
    }
}

/// A persisted transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub category_id: i64,
    pub bank_id: i64,
    pub batch_id: String,
    pub name: String,
    pub reference: Option<String>,
    pub value: f64,
    pub transaction_date: NaiveDate,
    pub transaction_type: TransactionType,
}

// ========== Reference Data ==========

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: i64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bank {
    pub id: i64,
    pub name: String,
}

// ========== Upload History ==========

/// Ledger entry for an accepted upload, used for duplicate detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUploadRecord {
    pub id: String,
    pub user_id: String,
    /// Lowercase hex SHA-256 of the file content
    pub file_hash: String,
    pub file_name: String,
    pub bank_code: String,
    pub upload_date: DateTime<Utc>,
    pub batch_id: String,
    pub file_size: i64,
}
