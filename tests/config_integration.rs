//! Integration tests for loading and saving engine configuration

use pipeflow::{EmptyEmitPolicy, EngineConfig, EngineError, PoolConfig};

#[test]
fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("engine.toml");

    let config = EngineConfig::new()
        .with_queue_capacity(16)
        .with_empty_emit(EmptyEmitPolicy::Error)
        .with_pool(PoolConfig::fixed(32));
    config.save(&path).unwrap();

    let loaded = EngineConfig::load(&path).unwrap();
    assert_eq!(loaded.queue_capacity, 16);
    assert_eq!(loaded.empty_emit, EmptyEmitPolicy::Error);
    assert_eq!(loaded.pool, PoolConfig::fixed(32));
    assert!(loaded.stop_on_error);
}

#[test]
fn test_partial_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(
        &path,
        r#"
stop_on_error = false

[logging]
filter = "debug"
"#,
    )
    .unwrap();

    let loaded = EngineConfig::load(&path).unwrap();
    assert!(!loaded.stop_on_error);
    assert_eq!(loaded.logging.filter, "debug");
    assert_eq!(loaded.queue_capacity, EngineConfig::default().queue_capacity);
}

#[test]
fn test_invalid_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(&path, "queue_capacity = 0\n").unwrap();

    assert!(matches!(
        EngineConfig::load(&path),
        Err(EngineError::Config(_))
    ));
    assert_eq!(EngineConfig::load_or_default(&path), EngineConfig::default());
}

#[test]
fn test_missing_file_falls_back_to_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    match EngineConfig::load(&path) {
        Err(EngineError::WithContext { context, source }) => {
            assert!(context.contains("absent.toml"));
            assert!(matches!(*source, EngineError::Io(_)));
        }
        other => panic!("expected a read error, got {:?}", other),
    }
    assert_eq!(EngineConfig::load_or_default(&path), EngineConfig::default());
}
