//! Configuration loading tests from the daemon's point of view.
//!
//! Covers the shipped example file, loading from disk with environment
//! overrides, and the TOML shape the daemon writes back out.

use std::env;

use serial_test::serial;
use trapwire_core::config::TrapwireConfig;
use trapwire_core::types::SourceSystem;

const EXAMPLE: &str = include_str!("../../trapwire.toml.example");

#[test]
fn test_example_config_parses_and_validates() {
    let config = TrapwireConfig::parse(EXAMPLE).expect("example config should parse");
    config.validate().expect("example config should validate");

    assert_eq!(config.ingest.sources.len(), 2);
    assert_eq!(config.ingest.sources[0].source, SourceSystem::Cowrie);
    assert_eq!(config.ingest.sources[1].source, SourceSystem::Dionaea);
    assert_eq!(config.ingest.buffer_capacity, 10_000);
    assert_eq!(config.ingest.max_concurrent_flushes, 4);
    assert_eq!(config.store.kind, "jsonl");
    assert_eq!(config.live.bind, "127.0.0.1:7070");
    assert!(!config.metrics.enabled);
}

#[test]
fn test_partial_config_fills_defaults() {
    let config = TrapwireConfig::parse(
        r#"
[ingest]
batch_size = 5

[[ingest.sources]]
source = "web"
path = "/var/log/glastopf/glastopf.json"
destination_port = 8080
"#,
    )
    .expect("partial config should parse");

    assert_eq!(config.ingest.batch_size, 5);
    assert_eq!(config.ingest.flush_interval_ms, 5000);
    assert_eq!(config.ingest.sources.len(), 1);
    assert_eq!(config.ingest.sources[0].source, SourceSystem::Glastopf);
    assert_eq!(config.ingest.sources[0].destination_port, Some(8080));
    assert_eq!(config.live.subscriber_capacity, 256);
}

#[test]
fn test_malformed_toml_fails() {
    assert!(TrapwireConfig::parse("[ingest\nbatch_size = ").is_err());
}

#[test]
fn test_unknown_source_fails() {
    let result = TrapwireConfig::parse(
        r#"
[[ingest.sources]]
source = "kippo"
path = "/var/log/kippo.json"
"#,
    );
    assert!(result.is_err());
}

#[test]
fn test_serialized_config_parses_back() {
    let config = TrapwireConfig::parse(EXAMPLE).expect("example config should parse");
    let rendered = toml::to_string(&config).expect("config should serialize");
    let reparsed = TrapwireConfig::parse(&rendered).expect("rendered config should parse");

    assert_eq!(reparsed.ingest.sources, config.ingest.sources);
    assert_eq!(reparsed.store.path, config.store.path);
    assert_eq!(reparsed.general.log_format, config.general.log_format);
}

#[tokio::test]
#[serial]
async fn test_load_applies_env_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trapwire.toml");
    std::fs::write(&path, EXAMPLE).unwrap();

    // SAFETY: serialized with every other env-mutating test.
    unsafe {
        env::set_var("TRAPWIRE_INGEST_BATCH_SIZE", "7");
        env::set_var(
            "TRAPWIRE_INGEST_SOURCES",
            "glastopf=/srv/glastopf/log.json",
        );
    }

    let result = TrapwireConfig::load(&path).await;

    unsafe {
        env::remove_var("TRAPWIRE_INGEST_BATCH_SIZE");
        env::remove_var("TRAPWIRE_INGEST_SOURCES");
    }

    let config = result.expect("config should load");
    assert_eq!(config.ingest.batch_size, 7);
    assert_eq!(config.ingest.sources.len(), 1);
    assert_eq!(config.ingest.sources[0].source, SourceSystem::Glastopf);
    assert_eq!(config.ingest.sources[0].path, "/srv/glastopf/log.json");
}

#[tokio::test]
#[serial]
async fn test_load_rejects_invalid_env_value_after_override() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trapwire.toml");
    std::fs::write(&path, EXAMPLE).unwrap();

    unsafe {
        env::set_var("TRAPWIRE_STORE_KIND", "postgres");
    }
    let result = TrapwireConfig::load(&path).await;
    unsafe {
        env::remove_var("TRAPWIRE_STORE_KIND");
    }

    assert!(result.is_err(), "unsupported store kind should fail validation");
}

#[tokio::test]
async fn test_load_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let result = TrapwireConfig::load(dir.path().join("absent.toml")).await;
    assert!(result.is_err());
}
