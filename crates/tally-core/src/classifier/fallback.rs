//! Constant classifier
//!
//! Labels everything [`FALLBACK_LABEL`]. Used when no model is deployed.

use async_trait::async_trait;

use super::{Classifier, ClassifierStatus, FALLBACK_LABEL};

#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackClassifier;

#[async_trait]
impl Classifier for FallbackClassifier {
    async fn classify(&self, _description: &str, _amount: Option<f64>) -> String {
        FALLBACK_LABEL.to_string()
    }

    async fn classify_batch(
        &self,
        descriptions: &[String],
        _amounts: Option<&[f64]>,
    ) -> Vec<String> {
        vec![FALLBACK_LABEL.to_string(); descriptions.len()]
    }

    fn status(&self) -> ClassifierStatus {
        ClassifierStatus {
            mode: "fallback",
            ready: true,
            detail: None,
        }
    }
}
