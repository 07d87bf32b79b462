//! CLI command tests
//!
//! This module contains all tests for the CLI commands.

use std::io::Write;

use tally_core::db::Database;
use tally_core::{BatchStatus, ClassifierKind, ServiceConfig};

use crate::commands;

fn setup_test_db() -> Database {
    let db = Database::in_memory().unwrap();
    commands::seed_banks(&db).unwrap();
    db
}

fn fallback_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.classifier.kind = ClassifierKind::Fallback;
    config
}

// ========== Init / Config ==========

#[test]
fn test_cmd_init_unencrypted() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("tally.db");

    commands::cmd_init(&path, true).unwrap();
    assert!(path.exists());

    // Running it again changes nothing
    commands::cmd_init(&path, true).unwrap();
    let db = commands::open_db(&path, true).unwrap();
    assert_eq!(db.list_banks().unwrap().len(), 1);
    assert!(db.get_bank_by_name("BANCOLOMBIA").unwrap().is_some());
}

#[test]
fn test_seed_banks_idempotent() {
    let db = setup_test_db();
    assert_eq!(commands::seed_banks(&db).unwrap(), 0);
}

#[test]
fn test_load_config_missing_override() {
    let result = commands::load_config(Some(std::path::Path::new("/nonexistent/tally.toml")));
    assert!(result.is_err());
}

#[test]
fn test_cmd_config_with_override_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[broker]\nhost = \"rabbit.internal\"\npassword = \"s3cret\"\n\n[pipeline]\nchunk_size = 50"
    )
    .unwrap();

    let config = ServiceConfig::load_file(Some(file.path())).unwrap();
    assert_eq!(config.pipeline.chunk_size, 50);
    assert!(!config.to_masked_toml().unwrap().contains("s3cret"));

    commands::cmd_config(&config, Some(file.path())).unwrap();
}

// ========== Status ==========

#[test]
fn test_cmd_status_unknown_batch() {
    let db = setup_test_db();
    let err = commands::cmd_status(&db, "missing", false).unwrap_err();
    assert!(err.to_string().contains("Batch missing not found"));
}

#[test]
fn test_cmd_status_existing_batch() {
    let db = setup_test_db();
    let batch = db.create_batch(4).unwrap();
    db.mark_batch_processing(&batch.id).unwrap();

    commands::cmd_status(&db, &batch.id, false).unwrap();
    commands::cmd_status(&db, &batch.id, true).unwrap();

    db.mark_batch_error(&batch.id).unwrap();
    let view = db.get_batch(&batch.id).unwrap().unwrap().status_view();
    assert_eq!(view.status, BatchStatus::Error);
    commands::print_status(&view);
}

// ========== Upload ==========

#[tokio::test]
async fn test_cmd_upload_unknown_bank() {
    let db = setup_test_db();
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("march.xlsx");
    std::fs::write(&path, b"x").unwrap();

    let err = commands::cmd_upload(&db, &fallback_config(), "NOBANK", "u1", &[path])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Unsupported bank"));
    assert!(db.list_batches(10).unwrap().is_empty());
}

#[tokio::test]
async fn test_cmd_upload_rejects_non_spreadsheet() {
    let db = setup_test_db();
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("march.csv");
    std::fs::write(&path, b"a,b,c").unwrap();

    let err = commands::cmd_upload(&db, &fallback_config(), "BANCOLOMBIA", "u1", &[path])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not a valid Excel file"));
}

#[tokio::test]
async fn test_cmd_upload_missing_file() {
    let db = setup_test_db();
    let path = std::path::PathBuf::from("/nonexistent/march.xlsx");

    let err = commands::cmd_upload(&db, &fallback_config(), "BANCOLOMBIA", "u1", &[path])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Failed to read"));
}

#[tokio::test]
async fn test_cmd_upload_corrupt_spreadsheet() {
    let db = setup_test_db();
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("march.xlsx");
    std::fs::write(&path, b"not really a workbook").unwrap();

    assert!(
        commands::cmd_upload(&db, &fallback_config(), "bancolombia", "u1", &[path])
            .await
            .is_err()
    );
    // Rejected before a batch was created
    assert!(db.list_batches(10).unwrap().is_empty());
}

// ========== Classify ==========

#[tokio::test]
async fn test_cmd_classify_fallback() {
    let config = fallback_config();
    commands::cmd_classify(&config, "NETFLIX.COM", Some(-45000.0), false)
        .await
        .unwrap();
    commands::cmd_classify(&config, "NETFLIX.COM", None, true)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cmd_classify_missing_model_still_answers() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = ServiceConfig::default();
    config.classifier.kind = ClassifierKind::Ml;
    config.classifier.models_path = dir.path().to_path_buf();

    commands::cmd_classify(&config, "PAGO PSE", Some(-10.0), true)
        .await
        .unwrap();
}
