//! Tests for messaging configuration loading.

use super::*;
use serial_test::serial;
use std::io::Write;

#[test]
fn test_defaults() {
    let config = MessagingConfig::default();

    assert!(config.service_bus_connection_string.is_none());
    assert!(config.storage_account_key.is_none());
    assert_eq!(config.stale_after(), Duration::from_secs(300));
    assert_eq!(config.request_timeout(), Duration::from_secs(30));
}

#[test]
fn test_load_from_explicit_yaml_file() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        file,
        "storage_connection_string: \"UseDevelopmentStorage=true\"\n\
         storage_account_name: devstoreaccount1\n\
         message_considered_stale_after: 42.5"
    )
    .unwrap();

    let config =
        MessagingConfig::load_with_prefix(Some(file.path()), "QP_TEST_YAML_UNUSED").unwrap();

    assert_eq!(
        config.storage_connection_string.as_deref(),
        Some("UseDevelopmentStorage=true")
    );
    assert_eq!(config.storage_account_name.as_deref(), Some("devstoreaccount1"));
    assert_eq!(config.stale_after(), Duration::from_millis(42_500));
    assert_eq!(config.request_timeout_seconds, 30);
}

#[test]
fn test_load_from_explicit_toml_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        "service_bus_partner_dispatch_queue_name = \"partner-dispatch\"\n\
         request_timeout_seconds = 5"
    )
    .unwrap();

    let config =
        MessagingConfig::load_with_prefix(Some(file.path()), "QP_TEST_TOML_UNUSED").unwrap();

    assert_eq!(
        config.service_bus_partner_dispatch_queue_name.as_deref(),
        Some("partner-dispatch")
    );
    assert_eq!(config.request_timeout(), Duration::from_secs(5));
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(file, "storage_account_name: from-file").unwrap();

    std::env::set_var("QP_TEST_ENV__STORAGE_ACCOUNT_NAME", "from-env");
    let config = MessagingConfig::load_with_prefix(Some(file.path()), "QP_TEST_ENV");
    std::env::remove_var("QP_TEST_ENV__STORAGE_ACCOUNT_NAME");

    assert_eq!(
        config.unwrap().storage_account_name.as_deref(),
        Some("from-env")
    );
}

#[test]
fn test_missing_explicit_file_is_loading_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.yaml");

    let err = MessagingConfig::load_with_prefix(Some(&missing), "QP_TEST_MISSING").unwrap_err();

    assert!(matches!(err, ConfigurationError::Loading { .. }));
}

#[test]
fn test_wrong_type_is_loading_error() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(file, "request_timeout_seconds: soon").unwrap();

    let err =
        MessagingConfig::load_with_prefix(Some(file.path()), "QP_TEST_BADTYPE").unwrap_err();

    assert!(matches!(err, ConfigurationError::Loading { .. }));
}

#[test]
fn test_required_rejects_absent_and_empty() {
    let absent: Option<String> = None;
    let empty = Some(String::new());
    let present = Some("value".to_string());

    let err = required(&absent, "storage_account_name").unwrap_err();
    assert_eq!(err.to_string(), "storage_account_name cannot be null or empty.");
    assert!(required(&empty, "storage_account_name").is_err());
    assert_eq!(required(&present, "storage_account_name").unwrap(), "value");
}

#[test]
fn test_negative_staleness_clamps_to_zero() {
    let config = MessagingConfig {
        message_considered_stale_after: -1.0,
        ..Default::default()
    };
    assert_eq!(config.stale_after(), Duration::ZERO);
}

#[test]
fn test_debug_redacts_secrets() {
    let config = MessagingConfig {
        service_bus_connection_string: Some("Endpoint=sb://x/;SharedAccessKey=secret".into()),
        storage_account_key: Some("c2VjcmV0".into()),
        storage_account_name: Some("acct".into()),
        ..Default::default()
    };

    let debug = format!("{:?}", config);

    assert!(!debug.contains("secret"));
    assert!(!debug.contains("c2VjcmV0"));
    assert!(debug.contains("<REDACTED>"));
    assert!(debug.contains("acct"));
}
