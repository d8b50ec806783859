mod common;

use std::fs;

use common::config_json;
use mysql_table_sync::config::DEFAULT_BIND;
use mysql_table_sync::load_config;
use sync_core::{ReplicationMode, TrackingMode};
use tempfile::TempDir;

#[test]
fn test_local_config_wins_over_default() {
    let dir = TempDir::new().unwrap();
    let mut local = config_json(&["k"]);
    local["mode"] = "master-master".into();
    fs::write(dir.path().join("config.local.json"), local.to_string()).unwrap();
    fs::write(dir.path().join("config.json"), config_json(&[]).to_string()).unwrap();

    let (path, config) = load_config(None, dir.path()).unwrap();
    assert_eq!(path, dir.path().join("config.local.json"));
    assert_eq!(config.replication_mode().unwrap(), ReplicationMode::MasterMaster);
    assert_eq!(config.api.keys, vec!["k".to_string()]);
    assert_eq!(config.server.bind, DEFAULT_BIND);
}

#[test]
fn test_explicit_path_then_example_fallback() {
    let dir = TempDir::new().unwrap();
    let explicit = dir.path().join("custom.json");
    let mut doc = config_json(&[]);
    doc["replication"]["enableTracking"] = false.into();
    fs::write(&explicit, doc.to_string()).unwrap();
    fs::write(
        dir.path().join("config.example.json"),
        config_json(&[]).to_string(),
    )
    .unwrap();

    let (path, config) = load_config(Some(&explicit), dir.path()).unwrap();
    assert_eq!(path, explicit);
    assert_eq!(config.tracking(), TrackingMode::Untracked);

    let missing = dir.path().join("missing.json");
    let (path, config) = load_config(Some(&missing), dir.path()).unwrap();
    assert_eq!(path, dir.path().join("config.example.json"));
    assert_eq!(config.tracking(), TrackingMode::Tracked);
}

#[test]
fn test_no_config_file() {
    let dir = TempDir::new().unwrap();
    let err = load_config(None, dir.path()).unwrap_err();
    assert!(err.to_string().contains("No configuration file found"));
}

#[test]
fn test_invalid_documents_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");

    fs::write(&path, "{ not json").unwrap();
    let err = load_config(None, dir.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Invalid JSON"));

    let mut doc = config_json(&[]);
    doc["databases"].as_object_mut().unwrap().remove("slave");
    fs::write(&path, doc.to_string()).unwrap();
    let err = load_config(None, dir.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Slave database configuration is required"));

    let mut doc = config_json(&[]);
    doc["replication"]["tables"][0]["primaryKey"] = "id`; --".into();
    fs::write(&path, doc.to_string()).unwrap();
    let err = load_config(None, dir.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Invalid primary key for table customers"));
}
