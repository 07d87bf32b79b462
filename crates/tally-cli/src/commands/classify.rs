//! Single-description classification

use anyhow::Result;
use tally_core::{Classifier, ClassifierClient, ServiceConfig};

pub async fn cmd_classify(
    service: &ServiceConfig,
    description: &str,
    amount: Option<f64>,
    explain: bool,
) -> Result<()> {
    let classifier = ClassifierClient::from_config(&service.classifier);

    match (&classifier, explain) {
        (ClassifierClient::Ml(ml), true) => {
            let explanation = ml.explain(description, amount).await;
            println!("🔎 {}", explanation.description);
            println!("   Cleaned:    {}", explanation.cleaned);
            println!("   Type token: {}", explanation.type_token);
            println!(
                "   Prediction: {} ({:.1}%)",
                explanation.prediction, explanation.confidence
            );
            if !explanation.top_3.is_empty() {
                println!("   Top candidates:");
                for (label, probability) in &explanation.top_3 {
                    println!("     {:>5.1}%  {}", probability, label);
                }
            }
            if let Some(error) = &explanation.error {
                println!("   ⚠️  {}", error);
            }
        }
        (ClassifierClient::Fallback(_), true) => {
            println!("   💡 The fallback classifier has nothing to explain; set CLASSIFIER=ml");
            println!("{}", classifier.classify(description, amount).await);
        }
        (_, false) => {
            println!("{}", classifier.classify(description, amount).await);
        }
    }

    let status = classifier.status();
    if !status.ready {
        eprintln!(
            "⚠️  Classifier is {}: {}",
            status.mode,
            status.detail.as_deref().unwrap_or("model unavailable")
        );
    }

    Ok(())
}
