//! Configuration integration tests.
//!
//! Tests for configuration loading, layering and substitution.

use std::time::Duration;
use zcswitch_core::{BackendPreference, Config, ConfigError, CoreError};
use zcswitch_test_utils::TestProject;

/// Test that config loads from the project directory.
#[tokio::test]
async fn test_load_project_config() {
    let project = TestProject::new()
        .with_file(
            "zcswitch.json",
            r#"{ "backend": "native", "scan_time_ms": 1500 }"#,
        )
        .build();

    let (config, sources) = Config::load_from(None, Some(project.path()))
        .await
        .expect("Failed to load config");

    assert_eq!(config.backend(), BackendPreference::Native);
    assert_eq!(config.scan_time_ms, Some(1500));
    assert_eq!(sources, vec![project.path().join("zcswitch.json")]);
}

/// Test that JSONC comments are handled and `.jsonc` wins over `.json`.
#[tokio::test]
async fn test_load_jsonc_config() {
    let project = TestProject::new()
        .with_file(
            "zcswitch.jsonc",
            r#"{
                // Only scan on the wired interface
                "interfaces": ["en0"],
                /* Multi-line
                   comment */
                "browse_domain_protocols": ["_ipp._tcp.local."]
            }"#,
        )
        .with_file("zcswitch.json", r#"{ "retries": 9 }"#)
        .build();

    let (config, sources) = Config::load_from(None, Some(project.path()))
        .await
        .expect("Failed to load config");

    assert_eq!(config.interfaces, Some(vec!["en0".to_string()]));
    assert_eq!(config.browse_domain_protocols(), vec!["_ipp._tcp.local."]);
    assert_eq!(config.retries, None);
    assert_eq!(sources.len(), 1);
}

/// Test that project config overrides global config field by field.
#[tokio::test]
async fn test_project_overrides_global() {
    let global = TestProject::new()
        .with_file(
            "config.json",
            r#"{ "retries": 4, "scan_time_ms": 3000, "listener": { "query_interval_ms": 8000 } }"#,
        )
        .build();
    let project = TestProject::new()
        .with_file(
            "zcswitch.jsonc",
            r#"{ "scan_time_ms": 500, "listener": { "pings_until_remove": 5 } }"#,
        )
        .build();

    let (config, sources) = Config::load_from(Some(global.path()), Some(project.path()))
        .await
        .expect("Failed to load config");

    assert_eq!(sources.len(), 2);
    assert_eq!(config.retries, Some(4));
    assert_eq!(config.scan_time_ms, Some(500));

    let listener = config.listener_options(["_http._tcp.local."]);
    assert_eq!(listener.query_interval, Duration::from_secs(8));
    assert_eq!(listener.pings_until_remove, 5);
    assert_eq!(listener.retries, 4);
}

/// Test default config when no file exists.
#[tokio::test]
async fn test_default_config() {
    let project = TestProject::new().build();

    let (config, sources) = Config::load_from(None, Some(project.path()))
        .await
        .expect("Failed to load config");

    assert!(sources.is_empty());
    assert_eq!(config.backend(), BackendPreference::Auto);
    let options = config.resolve_options(["_http._tcp.local."]);
    assert_eq!(options.scan_time, Duration::from_secs(2));
    assert_eq!(options.retries, 2);
}

/// Test `{env:..}` and `{file:..}` substitution.
#[tokio::test]
async fn test_variable_substitution() {
    std::env::set_var("ZCSWITCH_TEST_IFACE", "eth1");
    let project = TestProject::new()
        .with_file("protocol.txt", "_ipp._tcp.local.\n")
        .with_file(
            "zcswitch.json",
            r#"{
                "interfaces": ["{env:ZCSWITCH_TEST_IFACE}"],
                "browse_domain_protocols": ["{file:protocol.txt}"]
            }"#,
        )
        .build();

    let (config, _) = Config::load_from(None, Some(project.path()))
        .await
        .expect("Failed to load config");

    assert_eq!(config.interfaces, Some(vec!["eth1".to_string()]));
    assert_eq!(
        config.browse_domain_protocols,
        Some(vec!["_ipp._tcp.local.".to_string()])
    );
}

/// Test that a missing environment variable is reported.
#[tokio::test]
async fn test_missing_env_var() {
    let project = TestProject::new()
        .with_file(
            "zcswitch.json",
            r#"{ "interfaces": ["{env:ZCSWITCH_TEST_UNSET_VARIABLE}"] }"#,
        )
        .build();

    let err = Config::load_from(None, Some(project.path()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::Config(ConfigError::EnvVarNotFound { ref name }) if name == "ZCSWITCH_TEST_UNSET_VARIABLE"
    ));
}

/// Test that invalid settings are rejected at load time.
#[tokio::test]
async fn test_invalid_values_rejected() {
    let project = TestProject::new()
        .with_file("zcswitch.json", r#"{ "retry_delay_ms": 0 }"#)
        .build();

    let err = Config::load_from(None, Some(project.path()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::Config(ConfigError::Validation { .. })
    ));
}
