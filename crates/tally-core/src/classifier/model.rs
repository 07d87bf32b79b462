//! Trained model artifacts: TF-IDF vectorizer, type encoder, logistic regression
//!
//! Artifacts are JSON exports of the fitted training pipeline. The feature
//! vector for one description is its normalized TF-IDF row followed by the
//! encoded transaction-type token as a single extra column.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use super::TypeToken;
use crate::error::{Error, Result};

pub const VECTORIZER_FILE: &str = "vectorizer.json";
pub const ENCODER_FILE: &str = "label_encoder.json";
pub const CLASSIFIER_FILE: &str = "classifier.json";
pub const METADATA_FILE: &str = "metadata.json";

/// Sparse feature row as (column, value) pairs, sorted by column
pub type SparseRow = Vec<(usize, f64)>;

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Default TF-IDF token pattern: two or more word characters
    RE.get_or_init(|| Regex::new(r"(?u)\b\w\w+\b").expect("valid regex"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Norm {
    L1,
    #[default]
    L2,
}

fn default_ngram_range() -> (usize, usize) {
    (1, 1)
}

fn default_norm() -> Option<Norm> {
    Some(Norm::L2)
}

fn default_true() -> bool {
    true
}

/// Fitted TF-IDF vectorizer
#[derive(Debug, Clone, Deserialize)]
pub struct TfidfVectorizer {
    pub vocabulary: HashMap<String, usize>,
    pub idf: Vec<f64>,
    #[serde(default = "default_ngram_range")]
    pub ngram_range: (usize, usize),
    #[serde(default)]
    pub sublinear_tf: bool,
    #[serde(default = "default_norm")]
    pub norm: Option<Norm>,
    #[serde(default = "default_true")]
    pub lowercase: bool,
}

impl TfidfVectorizer {
    pub fn n_features(&self) -> usize {
        self.idf.len()
    }

    fn analyze(&self, doc: &str) -> Vec<String> {
        let doc = if self.lowercase {
            doc.to_lowercase()
        } else {
            doc.to_string()
        };
        let tokens: Vec<&str> = token_regex().find_iter(&doc).map(|m| m.as_str()).collect();

        let (min_n, max_n) = self.ngram_range;
        let mut terms = Vec::new();
        for n in min_n.max(1)..=max_n {
            if n > tokens.len() {
                break;
            }
            for window in tokens.windows(n) {
                terms.push(window.join(" "));
            }
        }
        terms
    }

    /// Vectorize one document
    pub fn transform_one(&self, doc: &str) -> SparseRow {
        let mut counts: HashMap<usize, f64> = HashMap::new();
        for term in self.analyze(doc) {
            if let Some(&col) = self.vocabulary.get(&term) {
                *counts.entry(col).or_insert(0.0) += 1.0;
            }
        }

        let mut row: SparseRow = counts
            .into_iter()
            .filter(|(col, _)| *col < self.idf.len())
            .map(|(col, tf)| {
                let tf = if self.sublinear_tf { 1.0 + tf.ln() } else { tf };
                (col, tf * self.idf[col])
            })
            .collect();
        row.sort_unstable_by_key(|(col, _)| *col);

        let norm = match self.norm {
            Some(Norm::L2) => row.iter().map(|(_, v)| v * v).sum::<f64>().sqrt(),
            Some(Norm::L1) => row.iter().map(|(_, v)| v.abs()).sum::<f64>(),
            None => 1.0,
        };
        if norm > 0.0 {
            for (_, v) in row.iter_mut() {
                *v /= norm;
            }
        }
        row
    }

    /// Vectorize each document in order
    pub fn transform(&self, docs: &[&str]) -> Vec<SparseRow> {
        docs.iter().map(|doc| self.transform_one(doc)).collect()
    }
}

/// Maps a transaction-type token to its numeric feature value (its class index)
#[derive(Debug, Clone, Deserialize)]
pub struct TypeEncoder {
    pub classes: Vec<String>,
}

impl TypeEncoder {
    pub fn encode(&self, token: TypeToken) -> Result<f64> {
        self.classes
            .iter()
            .position(|c| c == token.as_str())
            .map(|idx| idx as f64)
            .ok_or_else(|| {
                Error::Classifier(format!("Type token '{}' unknown to encoder", token.as_str()))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MultiClass {
    #[default]
    Multinomial,
    Ovr,
}

/// Fitted logistic regression
#[derive(Debug, Clone, Deserialize)]
pub struct LogisticModel {
    pub classes: Vec<String>,
    /// One row per class (or a single row for a binary model)
    pub coef: Vec<Vec<f64>>,
    pub intercept: Vec<f64>,
    #[serde(default)]
    pub multi_class: MultiClass,
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl LogisticModel {
    fn is_binary(&self) -> bool {
        self.classes.len() == 2 && self.coef.len() == 1
    }

    fn decision(&self, text: &SparseRow, type_col: usize, type_value: f64) -> Vec<f64> {
        self.coef
            .iter()
            .zip(&self.intercept)
            .map(|(weights, bias)| {
                let text_score: f64 = text.iter().map(|(col, v)| weights[*col] * v).sum();
                bias + text_score + weights[type_col] * type_value
            })
            .collect()
    }

    /// Class probabilities for one feature row
    pub fn predict_proba(&self, text: &SparseRow, type_col: usize, type_value: f64) -> Vec<f64> {
        let scores = self.decision(text, type_col, type_value);

        if self.is_binary() {
            let p = sigmoid(scores[0]);
            return vec![1.0 - p, p];
        }

        match self.multi_class {
            MultiClass::Multinomial => {
                let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
                let total: f64 = exps.iter().sum();
                exps.into_iter().map(|e| e / total).collect()
            }
            MultiClass::Ovr => {
                let raw: Vec<f64> = scores.into_iter().map(sigmoid).collect();
                let total: f64 = raw.iter().sum();
                if total > 0.0 {
                    raw.into_iter().map(|p| p / total).collect()
                } else {
                    raw
                }
            }
        }
    }
}

/// Optional training metadata, logged on load
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModelMetadata {
    pub model_type: Option<String>,
    pub accuracy: Option<f64>,
}

/// One model output
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    /// Probability of the predicted label (0..=1)
    pub confidence: f64,
    /// Probability per class, aligned with [`ModelArtifacts::classes`]
    pub probabilities: Vec<f64>,
}

/// Everything needed to score descriptions
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    pub vectorizer: TfidfVectorizer,
    pub encoder: TypeEncoder,
    pub model: LogisticModel,
    pub metadata: ModelMetadata,
}

fn read_json<T: serde::de::DeserializeOwned>(dir: &Path, name: &str) -> Result<T> {
    let path = dir.join(name);
    let content = fs::read_to_string(&path).map_err(|e| {
        Error::Classifier(format!("Failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Classifier(format!("Invalid {}: {}", path.display(), e)))
}

impl ModelArtifacts {
    /// Load and validate artifacts from a directory
    pub fn load(dir: &Path) -> Result<Self> {
        info!(path = %dir.display(), "Loading classifier model");

        let vectorizer: TfidfVectorizer = read_json(dir, VECTORIZER_FILE)?;
        let encoder: TypeEncoder = read_json(dir, ENCODER_FILE)?;
        let model: LogisticModel = read_json(dir, CLASSIFIER_FILE)?;

        let metadata = if dir.join(METADATA_FILE).exists() {
            match read_json::<ModelMetadata>(dir, METADATA_FILE) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(error = %e, "Could not load model metadata");
                    ModelMetadata::default()
                }
            }
        } else {
            ModelMetadata::default()
        };

        let artifacts = Self::from_parts(vectorizer, encoder, model, metadata)?;
        info!(
            model_type = artifacts.metadata.model_type.as_deref().unwrap_or("unknown"),
            accuracy = artifacts.metadata.accuracy.unwrap_or(0.0) * 100.0,
            classes = artifacts.model.classes.len(),
            features = artifacts.vectorizer.n_features() + 1,
            "Classifier model loaded"
        );
        Ok(artifacts)
    }

    /// Assemble artifacts, checking that their dimensions agree
    pub fn from_parts(
        vectorizer: TfidfVectorizer,
        encoder: TypeEncoder,
        model: LogisticModel,
        metadata: ModelMetadata,
    ) -> Result<Self> {
        let features = vectorizer.n_features() + 1;

        if model.classes.is_empty() {
            return Err(Error::Classifier("Model has no classes".to_string()));
        }
        let expected_rows = if model.classes.len() == 2 && model.coef.len() == 1 {
            1
        } else {
            model.classes.len()
        };
        if model.coef.len() != expected_rows || model.intercept.len() != expected_rows {
            return Err(Error::Classifier(format!(
                "Model shape mismatch: {} classes, {} coefficient rows, {} intercepts",
                model.classes.len(),
                model.coef.len(),
                model.intercept.len()
            )));
        }
        if let Some(row) = model.coef.iter().find(|row| row.len() != features) {
            return Err(Error::Classifier(format!(
                "Model expects {} features, vectorizer produces {}",
                row.len(),
                features
            )));
        }
        if let Some((term, col)) = vectorizer.vocabulary.iter().find(|(_, c)| **c >= features - 1) {
            return Err(Error::Classifier(format!(
                "Vocabulary term '{}' maps to column {} outside the idf vector",
                term, col
            )));
        }
        for token in [TypeToken::Income, TypeToken::Expense, TypeToken::Neutral] {
            encoder.encode(token)?;
        }

        Ok(Self {
            vectorizer,
            encoder,
            model,
            metadata,
        })
    }

    pub fn classes(&self) -> &[String] {
        &self.model.classes
    }

    /// Score already-normalized descriptions
    ///
    /// All descriptions are vectorized together, then every row is scored.
    /// `docs` and `tokens` must have the same length.
    pub fn predict_batch(&self, docs: &[&str], tokens: &[TypeToken]) -> Result<Vec<Prediction>> {
        if docs.len() != tokens.len() {
            return Err(Error::Classifier(format!(
                "{} descriptions but {} type tokens",
                docs.len(),
                tokens.len()
            )));
        }

        let rows = self.vectorizer.transform(docs);
        let type_values = tokens
            .iter()
            .map(|t| self.encoder.encode(*t))
            .collect::<Result<Vec<f64>>>()?;
        let type_col = self.vectorizer.n_features();

        rows.iter()
            .zip(type_values)
            .map(|(row, type_value)| {
                let probabilities = self.model.predict_proba(row, type_col, type_value);
                let (best, confidence) = probabilities
                    .iter()
                    .enumerate()
                    .fold((0usize, f64::NEG_INFINITY), |acc, (i, p)| {
                        if *p > acc.1 {
                            (i, *p)
                        } else {
                            acc
                        }
                    });
                if !confidence.is_finite() {
                    return Err(Error::Classifier("Model produced non-finite scores".to_string()));
                }
                Ok(Prediction {
                    label: self.model.classes[best].clone(),
                    confidence,
                    probabilities,
                })
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Three-class model where each class is driven by one keyword
    pub(crate) fn sample_artifacts() -> ModelArtifacts {
        let vectorizer: TfidfVectorizer = serde_json::from_value(json!({
            "vocabulary": {"netflix": 0, "uber": 1, "nomina": 2, "pago": 3},
            "idf": [1.5, 1.5, 1.5, 1.0]
        }))
        .unwrap();
        let encoder: TypeEncoder =
            serde_json::from_value(json!({"classes": ["egreso", "ingreso", "neutro"]})).unwrap();
        let model: LogisticModel = serde_json::from_value(json!({
            "classes": ["Entertainment", "Salary", "Transport"],
            "coef": [
                [4.0, 0.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 4.0, 0.5, 0.5],
                [0.0, 4.0, 0.0, 0.0, 0.0]
            ],
            "intercept": [0.1, 0.0, 0.0]
        }))
        .unwrap();
        ModelArtifacts::from_parts(vectorizer, encoder, model, ModelMetadata::default()).unwrap()
    }

    #[test]
    fn test_transform_l2_normalized() {
        let artifacts = sample_artifacts();
        let row = artifacts.vectorizer.transform_one("PAGO NOMINA PAGO");
        assert_eq!(row.len(), 2);
        assert_eq!(row[0].0, 2);
        assert_eq!(row[1].0, 3);
        let norm: f64 = row.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
        // tf("pago") = 2 * idf 1.0 vs tf("nomina") = 1 * idf 1.5
        assert!(row[1].1 > row[0].1);
    }

    #[test]
    fn test_transform_ignores_unknown_and_short_tokens() {
        let artifacts = sample_artifacts();
        assert!(artifacts.vectorizer.transform_one("A B XYZ").is_empty());
    }

    #[test]
    fn test_bigrams() {
        let vectorizer: TfidfVectorizer = serde_json::from_value(json!({
            "vocabulary": {"pago nomina": 0, "pago": 1},
            "idf": [1.0, 1.0],
            "ngram_range": [1, 2],
            "norm": null
        }))
        .unwrap();
        let row = vectorizer.transform_one("PAGO NOMINA");
        assert_eq!(row, vec![(0, 1.0), (1, 1.0)]);
    }

    #[test]
    fn test_predict_batch() {
        let artifacts = sample_artifacts();
        let predictions = artifacts
            .predict_batch(
                &["NETFLIX COM", "UBER TRIP", "PAGO NOMINA ACME"],
                &[TypeToken::Expense, TypeToken::Expense, TypeToken::Income],
            )
            .unwrap();
        let labels: Vec<&str> = predictions.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["Entertainment", "Transport", "Salary"]);
        for p in &predictions {
            let total: f64 = p.probabilities.iter().sum();
            assert!((total - 1.0).abs() < 1e-9);
            assert!(p.confidence > 0.5);
        }
    }

    #[test]
    fn test_predict_batch_length_mismatch() {
        let artifacts = sample_artifacts();
        assert!(artifacts
            .predict_batch(&["NETFLIX"], &[TypeToken::Expense, TypeToken::Income])
            .is_err());
    }

    #[test]
    fn test_binary_model() {
        let vectorizer: TfidfVectorizer =
            serde_json::from_value(json!({"vocabulary": {"nomina": 0}, "idf": [1.0]})).unwrap();
        let encoder: TypeEncoder =
            serde_json::from_value(json!({"classes": ["egreso", "ingreso", "neutro"]})).unwrap();
        let model: LogisticModel = serde_json::from_value(json!({
            "classes": ["Other", "Salary"],
            "coef": [[5.0, 0.0]],
            "intercept": [-1.0]
        }))
        .unwrap();
        let artifacts =
            ModelArtifacts::from_parts(vectorizer, encoder, model, ModelMetadata::default())
                .unwrap();
        let predictions = artifacts
            .predict_batch(&["NOMINA", "MERCADO"], &[TypeToken::Income, TypeToken::Expense])
            .unwrap();
        assert_eq!(predictions[0].label, "Salary");
        assert_eq!(predictions[1].label, "Other");
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let vectorizer: TfidfVectorizer =
            serde_json::from_value(json!({"vocabulary": {"uber": 0}, "idf": [1.0]})).unwrap();
        let encoder: TypeEncoder =
            serde_json::from_value(json!({"classes": ["egreso", "ingreso", "neutro"]})).unwrap();
        let model: LogisticModel = serde_json::from_value(json!({
            "classes": ["A", "B", "C"],
            "coef": [[1.0], [1.0], [1.0]],
            "intercept": [0.0, 0.0, 0.0]
        }))
        .unwrap();
        let err = ModelArtifacts::from_parts(vectorizer, encoder, model, ModelMetadata::default())
            .unwrap_err();
        assert!(err.to_string().contains("features"));
    }

    #[test]
    fn test_encoder_requires_all_tokens() {
        let vectorizer: TfidfVectorizer =
            serde_json::from_value(json!({"vocabulary": {}, "idf": []})).unwrap();
        let encoder: TypeEncoder =
            serde_json::from_value(json!({"classes": ["egreso", "ingreso"]})).unwrap();
        let model: LogisticModel = serde_json::from_value(json!({
            "classes": ["A", "B", "C"],
            "coef": [[1.0], [1.0], [1.0]],
            "intercept": [0.0, 0.0, 0.0]
        }))
        .unwrap();
        assert!(
            ModelArtifacts::from_parts(vectorizer, encoder, model, ModelMetadata::default())
                .is_err()
        );
    }

    #[test]
    fn test_load_missing_directory() {
        let err = ModelArtifacts::load(Path::new("/nonexistent/tally-models")).unwrap_err();
        assert!(matches!(err, Error::Classifier(_)));
    }
}
