//! Transaction classification
//!
//! A classifier maps a description (plus the optional signed amount) to a
//! category label. Classification never fails from the caller's point of
//! view: anything that goes wrong degrades to [`FALLBACK_LABEL`].
//!
//! # Architecture
//!
//! - `Classifier` trait: single-item and batch paths
//! - `ClassifierClient` enum: concrete wrapper chosen from configuration
//! - Implementations: `FallbackClassifier` (constant label), `MlClassifier`
//!   (TF-IDF + logistic regression artifacts, loaded once on first use)

mod fallback;
mod ml;
pub mod model;

pub use fallback::FallbackClassifier;
pub use ml::{Explanation, MlClassifier};
pub use model::{ModelArtifacts, Prediction};

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;

use crate::config::{ClassifierConfig, ClassifierKind};

/// Label used whenever no confident category can be produced
pub const FALLBACK_LABEL: &str = "Other";

/// Transaction-type token fed to the model alongside the text features
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeToken {
    Income,
    Expense,
    Neutral,
}

impl TypeToken {
    /// Token for a signed amount; missing or zero amounts are neutral
    pub fn from_amount(amount: Option<f64>) -> Self {
        match amount {
            Some(a) if a > 0.0 => Self::Income,
            Some(a) if a < 0.0 => Self::Expense,
            _ => Self::Neutral,
        }
    }

    /// Token spelling the model was trained with
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "ingreso",
            Self::Expense => "egreso",
            Self::Neutral => "neutro",
        }
    }
}

fn non_alnum_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Z0-9\s]").expect("valid regex"))
}

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Normalize a description the same way the training data was
///
/// Upper-cases, replaces everything but `A-Z`, `0-9` and whitespace with a
/// space, collapses runs of whitespace and trims.
pub fn normalize_description(text: &str) -> String {
    let upper = text.to_uppercase();
    let stripped = non_alnum_regex().replace_all(&upper, " ");
    whitespace_regex()
        .replace_all(&stripped, " ")
        .trim()
        .to_string()
}

/// Readiness of a classifier, surfaced on the health endpoint
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClassifierStatus {
    /// `ml`, `fallback`, `degraded` (model failed to load) or `unloaded`
    pub mode: &'static str,
    /// False only when a model was expected but could not be loaded
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Trait implemented by every classifier
///
/// Implementations must be Send + Sync so one instance can be shared by the
/// request handlers and every background batch task.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify one description
    async fn classify(&self, description: &str, amount: Option<f64>) -> String;

    /// Classify many descriptions
    ///
    /// The result has exactly one label per description, in input order.
    /// `amounts`, when given, must line up with `descriptions`; otherwise every
    /// item is treated as having no amount.
    async fn classify_batch(&self, descriptions: &[String], amounts: Option<&[f64]>)
        -> Vec<String>;

    fn status(&self) -> ClassifierStatus;
}

/// Concrete classifier selected from configuration
#[derive(Clone)]
pub enum ClassifierClient {
    Fallback(FallbackClassifier),
    Ml(MlClassifier),
}

impl ClassifierClient {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        match config.kind {
            ClassifierKind::Fallback => ClassifierClient::Fallback(FallbackClassifier),
            ClassifierKind::Ml => ClassifierClient::Ml(MlClassifier::new(
                &config.models_path,
                config.inference_timeout(),
            )),
        }
    }

    /// Load model artifacts now instead of on the first upload
    pub async fn warm_up(&self) {
        if let ClassifierClient::Ml(ml) = self {
            ml.warm_up().await;
        }
    }
}

#[async_trait]
impl Classifier for ClassifierClient {
    async fn classify(&self, description: &str, amount: Option<f64>) -> String {
        match self {
            ClassifierClient::Fallback(c) => c.classify(description, amount).await,
            ClassifierClient::Ml(c) => c.classify(description, amount).await,
        }
    }

    async fn classify_batch(
        &self,
        descriptions: &[String],
        amounts: Option<&[f64]>,
    ) -> Vec<String> {
        match self {
            ClassifierClient::Fallback(c) => c.classify_batch(descriptions, amounts).await,
            ClassifierClient::Ml(c) => c.classify_batch(descriptions, amounts).await,
        }
    }

    fn status(&self) -> ClassifierStatus {
        match self {
            ClassifierClient::Fallback(c) => c.status(),
            ClassifierClient::Ml(c) => c.status(),
        }
    }
}
