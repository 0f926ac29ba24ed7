//! Config environment variable tests
//!
//! These tests verify that Config::from_env() reads and validates
//! environment variable overrides. Tests use #[serial] because they share
//! process-wide env vars, and each one removes what it set.

use bichat_core::config::{CheckpointConfig, Config, LogFormat};
use bichat_core::AppError;
use serial_test::serial;
use std::env;

fn clear(vars: &[&str]) {
    for var in vars {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_config_defaults() {
    clear(&[
        "DATABASE_PATH",
        "DATABASE_MAX_CONNECTIONS",
        "LOG_FORMAT",
        "CHECKPOINT_TTL_SECS",
        "MEMORY_SEARCH_LIMIT",
    ]);

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.max_connections, 5);
    assert_eq!(config.logging.format, LogFormat::Pretty);
    assert_eq!(config.checkpoint.ttl_secs, 24 * 60 * 60);
    assert_eq!(config.memory.search_limit, 10);
}

#[test]
#[serial]
fn test_config_from_env_custom_database() {
    env::set_var("DATABASE_PATH", "/custom/bichat.db");
    env::set_var("DATABASE_MAX_CONNECTIONS", "10");
    env::set_var("DATABASE_BUSY_TIMEOUT_MS", "250");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.path.to_str().unwrap(), "/custom/bichat.db");
    assert_eq!(config.database.max_connections, 10);
    assert_eq!(config.database.busy_timeout_ms, 250);

    clear(&[
        "DATABASE_PATH",
        "DATABASE_MAX_CONNECTIONS",
        "DATABASE_BUSY_TIMEOUT_MS",
    ]);
}

#[test]
#[serial]
fn test_config_from_env_json_log_format() {
    env::set_var("LOG_FORMAT", "JSON");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);

    env::set_var("LOG_FORMAT", "something-else");
    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Pretty);

    clear(&["LOG_FORMAT"]);
}

#[test]
#[serial]
fn test_config_from_env_checkpoint_settings() {
    env::set_var("CHECKPOINT_TTL_SECS", "600");
    env::set_var("CHECKPOINT_SWEEP_INTERVAL_SECS", "30");

    let config = Config::from_env().unwrap();
    assert_eq!(config.checkpoint.ttl(), chrono::Duration::minutes(10));
    assert_eq!(
        config.checkpoint.sweep_interval(),
        std::time::Duration::from_secs(30)
    );

    clear(&["CHECKPOINT_TTL_SECS", "CHECKPOINT_SWEEP_INTERVAL_SECS"]);
}

#[test]
#[serial]
fn test_config_rejects_zero_ttl() {
    env::set_var("CHECKPOINT_TTL_SECS", "0");

    let result = Config::from_env();
    assert!(matches!(result, Err(AppError::Config { .. })));

    clear(&["CHECKPOINT_TTL_SECS"]);
}

#[test]
#[serial]
fn test_config_rejects_ttl_beyond_duration_range() {
    for raw in ["18446744073709551615", "10000000000000000"] {
        env::set_var("CHECKPOINT_TTL_SECS", raw);

        match Config::from_env() {
            Err(AppError::Config { message }) => {
                assert!(message.contains("CHECKPOINT_TTL_SECS"));
                assert!(message.contains(raw));
            }
            other => panic!("expected a config error for {}, got {:?}", raw, other.map(|_| ())),
        }
    }

    clear(&["CHECKPOINT_TTL_SECS"]);
}

#[test]
fn test_oversized_ttl_saturates() {
    let config = CheckpointConfig {
        ttl_secs: u64::MAX,
        ..CheckpointConfig::default()
    };
    assert!(config.ttl() > chrono::Duration::zero());
}

#[test]
#[serial]
fn test_config_rejects_invalid_numbers() {
    env::set_var("MEMORY_SEARCH_LIMIT", "lots");

    match Config::from_env() {
        Err(AppError::Config { message }) => assert!(message.contains("MEMORY_SEARCH_LIMIT")),
        other => panic!("expected a config error, got {:?}", other.map(|_| ())),
    }

    clear(&["MEMORY_SEARCH_LIMIT"]);
}

#[test]
#[serial]
fn test_config_from_env_search_limit() {
    env::set_var("MEMORY_SEARCH_LIMIT", " 25 ");

    let config = Config::from_env().unwrap();
    assert_eq!(config.memory.search_limit, 25);

    clear(&["MEMORY_SEARCH_LIMIT"]);
}
