use tracing::info;

use zenreader_core::classify::{ClassificationRequest, ClassifyError, ExternalClassifier, Tier};
use zenreader_extensions::gemini::{GeminiClassifier, GeminiConfig};

mod common;
use common::{get_api_key_or_skip, setup_tracing};

#[tokio::test]
#[ignore]
async fn test_gemini_classifies_document() {
    setup_tracing();
    let Some(api_key) = get_api_key_or_skip("GEMINI_API_KEY", "test_gemini_classifies_document") else {
        return;
    };
    let classifier = GeminiClassifier::new(api_key).expect("Failed to create GeminiClassifier");

    let request = ClassificationRequest::new("scan_0042.pdf")
        .with_title(Some("Mastering the Art of French Cooking".into()))
        .with_snippet("Boeuf bourguignon. Serves six. Cut the beef into 2-inch cubes", 500)
        .with_known_folders(vec!["Finance".into(), "Cooking".into()]);

    match classifier.classify(&request).await {
        Ok(result) => {
            info!(category = %result.category, confidence = result.confidence, reason = %result.reason, "Classified");
            assert_eq!(result.tier, Tier::Ai);
            assert!(!result.category.trim().is_empty());
            assert!((0.0..=1.0).contains(&result.confidence));
        }
        // A free-tier key can legitimately be out of quota.
        Err(ClassifyError::QuotaExceeded { message, retry_after }) => {
            info!(%message, ?retry_after, "Quota exceeded during live test");
        }
        Err(e) => panic!("Gemini classification failed: {}", e),
    }
}

#[tokio::test]
#[ignore]
async fn test_gemini_invalid_key_is_not_quota() {
    setup_tracing();
    let classifier = GeminiClassifier::with_config(GeminiConfig::new("invalid-key").unwrap(), None).unwrap();
    let err = classifier
        .classify(&ClassificationRequest::new("invoice.pdf"))
        .await
        .expect_err("an invalid key must fail");
    assert!(!zenreader_core::classify::is_quota_exceeded(&err), "got {:?}", err);
}
