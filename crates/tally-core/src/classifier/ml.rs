//! Model-backed classifier
//!
//! Artifacts are loaded lazily, at most once per instance, and shared by every
//! clone. Concurrent first calls wait on the same load. A failed load is
//! remembered so the classifier settles into fallback mode instead of hitting
//! the disk on every batch; the failure is visible through [`Classifier::status`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use super::model::{ModelArtifacts, Prediction};
use super::{normalize_description, Classifier, ClassifierStatus, TypeToken, FALLBACK_LABEL};
use crate::error::{Error, Result};

type LoadedModel = std::result::Result<Arc<ModelArtifacts>, String>;

#[derive(Clone)]
pub struct MlClassifier {
    models_path: PathBuf,
    inference_timeout: Duration,
    state: Arc<OnceCell<LoadedModel>>,
}

/// Detailed prediction for a single description
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub description: String,
    pub cleaned: String,
    pub prediction: String,
    /// Confidence in percent
    pub confidence: f64,
    pub type_token: &'static str,
    /// Best three labels with their probability in percent
    pub top_3: Vec<(String, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MlClassifier {
    pub fn new(models_path: impl AsRef<Path>, inference_timeout: Duration) -> Self {
        Self {
            models_path: models_path.as_ref().to_path_buf(),
            inference_timeout,
            state: Arc::new(OnceCell::new()),
        }
    }

    /// Classifier over artifacts that are already in memory
    pub fn from_artifacts(artifacts: ModelArtifacts, inference_timeout: Duration) -> Self {
        Self {
            models_path: PathBuf::new(),
            inference_timeout,
            state: Arc::new(OnceCell::new_with(Some(Ok(Arc::new(artifacts))))),
        }
    }

    pub fn models_path(&self) -> &Path {
        &self.models_path
    }

    async fn model(&self) -> LoadedModel {
        self.state
            .get_or_init(|| async {
                let path = self.models_path.clone();
                match tokio::task::spawn_blocking(move || ModelArtifacts::load(&path)).await {
                    Ok(Ok(artifacts)) => Ok(Arc::new(artifacts)),
                    Ok(Err(e)) => {
                        error!(
                            path = %self.models_path.display(),
                            error = %e,
                            "Failed to load classifier model, every prediction will be '{}'",
                            FALLBACK_LABEL
                        );
                        Err(e.to_string())
                    }
                    Err(e) => {
                        error!(error = %e, "Classifier model loader panicked");
                        Err(format!("model loader panicked: {}", e))
                    }
                }
            })
            .await
            .clone()
    }

    /// Trigger the one-time model load; returns whether the model is usable
    pub async fn warm_up(&self) -> bool {
        self.model().await.is_ok()
    }

    /// Run the model over normalized descriptions, off the async runtime and
    /// under the inference timeout
    async fn predict(&self, docs: Vec<String>, tokens: Vec<TypeToken>) -> Result<Vec<Prediction>> {
        let artifacts = self.model().await.map_err(Error::Classifier)?;

        let task = tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
            artifacts.predict_batch(&refs, &tokens)
        });

        match tokio::time::timeout(self.inference_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::Classifier(format!("inference task failed: {}", e))),
            Err(_) => Err(Error::Classifier(format!(
                "inference timed out after {:?}",
                self.inference_timeout
            ))),
        }
    }

    /// Prediction with confidence and runner-up labels
    pub async fn explain(&self, description: &str, amount: Option<f64>) -> Explanation {
        let cleaned = normalize_description(description);
        let token = TypeToken::from_amount(amount);
        let mut explanation = Explanation {
            description: description.to_string(),
            cleaned: cleaned.clone(),
            prediction: FALLBACK_LABEL.to_string(),
            confidence: 0.0,
            type_token: token.as_str(),
            top_3: Vec::new(),
            error: None,
        };

        if cleaned.is_empty() {
            explanation.error = Some("Empty description after cleaning".to_string());
            return explanation;
        }

        let classes = match self.model().await {
            Ok(artifacts) => artifacts.classes().to_vec(),
            Err(e) => {
                explanation.error = Some(e);
                return explanation;
            }
        };

        match self.predict(vec![cleaned], vec![token]).await {
            Ok(mut predictions) if !predictions.is_empty() => {
                let prediction = predictions.remove(0);
                let mut ranked: Vec<(String, f64)> = classes
                    .into_iter()
                    .zip(prediction.probabilities.iter().map(|p| p * 100.0))
                    .collect();
                ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
                ranked.truncate(3);

                explanation.prediction = prediction.label;
                explanation.confidence = prediction.confidence * 100.0;
                explanation.top_3 = ranked;
            }
            Ok(_) => explanation.error = Some("Model returned no prediction".to_string()),
            Err(e) => explanation.error = Some(e.to_string()),
        }
        explanation
    }
}

#[async_trait]
impl Classifier for MlClassifier {
    async fn classify(&self, description: &str, amount: Option<f64>) -> String {
        let cleaned = normalize_description(description);
        if cleaned.is_empty() {
            warn!(description, "Empty description after cleaning");
            return FALLBACK_LABEL.to_string();
        }
        let token = TypeToken::from_amount(amount);

        match self.predict(vec![cleaned], vec![token]).await {
            Ok(mut predictions) if !predictions.is_empty() => {
                let prediction = predictions.remove(0);
                debug!(
                    description,
                    label = %prediction.label,
                    confidence = prediction.confidence * 100.0,
                    type_token = token.as_str(),
                    "Classified transaction"
                );
                prediction.label
            }
            Ok(_) => FALLBACK_LABEL.to_string(),
            Err(e) => {
                error!(description, error = %e, "Error classifying transaction");
                FALLBACK_LABEL.to_string()
            }
        }
    }

    async fn classify_batch(
        &self,
        descriptions: &[String],
        amounts: Option<&[f64]>,
    ) -> Vec<String> {
        if descriptions.is_empty() {
            return Vec::new();
        }

        let cleaned: Vec<String> = descriptions
            .iter()
            .map(|d| normalize_description(d))
            .collect();

        let tokens: Vec<TypeToken> = match amounts {
            Some(values) if values.len() == descriptions.len() => values
                .iter()
                .map(|v| TypeToken::from_amount(Some(*v)))
                .collect(),
            Some(values) => {
                warn!(
                    amounts = values.len(),
                    descriptions = descriptions.len(),
                    "Amounts do not line up with descriptions, using neutral type for all"
                );
                vec![TypeToken::Neutral; descriptions.len()]
            }
            None => vec![TypeToken::Neutral; descriptions.len()],
        };

        let valid: Vec<usize> = (0..cleaned.len()).filter(|i| !cleaned[*i].is_empty()).collect();
        if valid.is_empty() {
            warn!(count = descriptions.len(), "All descriptions are empty after cleaning");
            return vec![FALLBACK_LABEL.to_string(); descriptions.len()];
        }

        let docs: Vec<String> = valid.iter().map(|i| cleaned[*i].clone()).collect();
        let valid_tokens: Vec<TypeToken> = valid.iter().map(|i| tokens[*i]).collect();

        let predictions = match self.predict(docs, valid_tokens).await {
            Ok(p) if p.len() == valid.len() => p,
            Ok(p) => {
                error!(
                    expected = valid.len(),
                    got = p.len(),
                    "Batch classification returned wrong number of predictions"
                );
                return vec![FALLBACK_LABEL.to_string(); descriptions.len()];
            }
            Err(e) => {
                error!(count = descriptions.len(), error = %e, "Error in batch classification");
                return vec![FALLBACK_LABEL.to_string(); descriptions.len()];
            }
        };

        let avg_confidence =
            predictions.iter().map(|p| p.confidence).sum::<f64>() / predictions.len() as f64;
        info!(
            count = predictions.len(),
            avg_confidence = %format!("{:.1}", avg_confidence * 100.0),
            "Batch classified transactions"
        );

        let mut labels = vec![FALLBACK_LABEL.to_string(); descriptions.len()];
        for (idx, prediction) in valid.into_iter().zip(predictions) {
            labels[idx] = prediction.label;
        }
        labels
    }

    fn status(&self) -> ClassifierStatus {
        match self.state.get() {
            None => ClassifierStatus {
                mode: "unloaded",
                ready: true,
                detail: Some("model loads on first use".to_string()),
            },
            Some(Ok(_)) => ClassifierStatus {
                mode: "ml",
                ready: true,
                detail: None,
            },
            Some(Err(e)) => ClassifierStatus {
                mode: "degraded",
                ready: false,
                detail: Some(e.clone()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::model::tests::sample_artifacts;

    fn classifier() -> MlClassifier {
        MlClassifier::from_artifacts(sample_artifacts(), Duration::from_secs(5))
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_classify() {
        let ml = classifier();
        assert_eq!(ml.classify("Netflix.com", Some(-15.0)).await, "Entertainment");
        assert_eq!(ml.classify("UBER *TRIP", None).await, "Transport");
        assert_eq!(ml.classify("!!!", Some(1.0)).await, "Other");
        assert_eq!(ml.status().mode, "ml");
    }

    #[tokio::test]
    async fn test_batch_preserves_length_and_order() {
        let ml = classifier();
        let descriptions = strings(&["UBER TRIP", "", "PAGO NOMINA", "###", "NETFLIX"]);
        let amounts = [-10.0, 5.0, 2000.0, -1.0, -15.0];
        let labels = ml.classify_batch(&descriptions, Some(&amounts[..])).await;
        assert_eq!(
            labels,
            vec!["Transport", "Other", "Salary", "Other", "Entertainment"]
        );
    }

    #[tokio::test]
    async fn test_batch_all_empty() {
        let ml = classifier();
        let labels = ml.classify_batch(&strings(&["", "  ", "--"]), None).await;
        assert_eq!(labels, vec!["Other"; 3]);
    }

    #[tokio::test]
    async fn test_batch_mismatched_amounts_still_classifies() {
        let ml = classifier();
        let labels = ml
            .classify_batch(&strings(&["NETFLIX", "UBER"]), Some(&[1.0][..]))
            .await;
        assert_eq!(labels, vec!["Entertainment", "Transport"]);
    }

    #[tokio::test]
    async fn test_single_and_batch_agree() {
        let ml = classifier();
        for (description, amount) in [
            ("PAGO NOMINA ACME", Some(3000.0)),
            ("NETFLIX", Some(-15.0)),
            ("PAGO", None),
            ("", Some(-1.0)),
            ("ZZZ UNKNOWN", Some(0.0)),
        ] {
            let single = ml.classify(description, amount).await;
            let amounts = amount.map(|a| vec![a]);
            let batch = ml
                .classify_batch(&[description.to_string()], amounts.as_deref())
                .await;
            assert_eq!(single, batch[0], "mismatch for {:?}", description);
        }
    }

    #[tokio::test]
    async fn test_missing_model_degrades_to_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let ml = MlClassifier::new(dir.path().join("missing"), Duration::from_secs(5));
        assert_eq!(ml.status().mode, "unloaded");

        let labels = ml
            .classify_batch(&strings(&["NETFLIX", "UBER"]), Some(&[-1.0, -2.0][..]))
            .await;
        assert_eq!(labels, vec!["Other", "Other"]);
        assert_eq!(ml.classify("NETFLIX", None).await, "Other");

        let status = ml.status();
        assert_eq!(status.mode, "degraded");
        assert!(!status.ready);
        assert!(!ml.warm_up().await);
    }

    #[tokio::test]
    async fn test_clones_share_loaded_model() {
        let dir = tempfile::tempdir().unwrap();
        let ml = MlClassifier::new(dir.path(), Duration::from_secs(5));
        let clone = ml.clone();
        ml.warm_up().await;
        assert_eq!(clone.status().mode, "degraded");
    }

    #[tokio::test]
    async fn test_explain() {
        let ml = classifier();
        let explanation = ml.explain("Pago nómina ACME", Some(100.0)).await;
        assert_eq!(explanation.prediction, "Salary");
        assert_eq!(explanation.type_token, "ingreso");
        assert_eq!(explanation.cleaned, "PAGO N MINA ACME");
        assert_eq!(explanation.top_3.len(), 3);
        assert!(explanation.top_3[0].1 >= explanation.top_3[1].1);
        assert!(explanation.error.is_none());
    }

    #[tokio::test]
    async fn test_explain_empty() {
        let explanation = classifier().explain("..", None).await;
        assert_eq!(explanation.prediction, "Other");
        assert!(explanation.error.is_some());
    }
}
