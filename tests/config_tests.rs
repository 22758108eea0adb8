//! Tests for configuration loading, saving, and migration

use bt_audio_receiver::settings::config::{
    AppConfig, ConfigManager, CONFIG_VERSION, MAX_CONFIG_FILE_SIZE,
};
use std::fs;
use std::time::Duration;

#[test]
fn test_default_config() {
    let config = AppConfig::default();

    assert_eq!(config.config_version, CONFIG_VERSION);
    assert!(!config.general.auto_connect);
    assert!(config.general.show_notifications);
    assert!(config.general.language.is_none());
    assert!(config.general.last_device_id.is_none());
}

#[test]
fn test_default_connection_config() {
    let policy = AppConfig::default().connection.retry_policy();

    assert_eq!(policy.max_attempts, 3);
    assert_eq!(policy.retry_delay, Duration::from_millis(500));
    assert_eq!(policy.state_wait_timeout, Duration::from_millis(500));
}

#[test]
fn test_default_logging_config() {
    let config = AppConfig::default();

    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.max_file_size, 5 * 1024 * 1024);
    assert_eq!(config.logging.max_files, 3);
}

#[test]
fn test_config_roundtrip() {
    let mut config = AppConfig::default();
    config.general.auto_connect = true;
    config.general.language = Some("ja".to_string());
    config.general.last_device_id = Some("BTHENUM#dev1".to_string());
    config.connection.max_attempts = 5;

    let toml_str = toml::to_string(&config).expect("Serialization failed");
    let parsed: AppConfig = toml::from_str(&toml_str).expect("Deserialization failed");

    assert_eq!(parsed, config);
}

#[test]
fn test_config_with_extra_fields() {
    // Unknown fields are ignored
    let toml_with_extra = r#"
        config_version = 2
        unknown_field = "should be ignored"

        [general]
        auto_connect = true
        also_unknown = 123

        [connection]
        retry_delay_ms = 1000
    "#;

    let config: AppConfig =
        toml::from_str(toml_with_extra).expect("Deserialization with extra fields failed");
    assert!(config.general.auto_connect);
    assert_eq!(config.connection.retry_delay_ms, 1000);
    assert_eq!(config.connection.max_attempts, 3);
}

#[test]
fn test_load_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let manager = ConfigManager::with_path(dir.path().join("config.toml"));

    let config = manager.load().unwrap();

    assert_eq!(config, AppConfig::default());
    assert!(!manager.config_path().exists());
}

#[test]
fn test_save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let manager = ConfigManager::with_path(dir.path().join("nested").join("config.toml"));
    let mut config = AppConfig::default();
    config.general.show_notifications = false;

    manager.save(&config).unwrap();

    assert_eq!(manager.load().unwrap(), config);
}

#[test]
fn test_oversized_file_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let mut content = String::from("[general]\nauto_connect = true\n");
    content.push_str(&"#".repeat(MAX_CONFIG_FILE_SIZE as usize));
    fs::write(&path, content).unwrap();

    let config = ConfigManager::with_path(&path).load().unwrap();

    assert!(!config.general.auto_connect);
}

#[test]
fn test_invalid_toml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[general\nauto_connect = ").unwrap();

    assert!(ConfigManager::with_path(&path).load().is_err());
}

#[test]
fn test_old_version_is_migrated_and_saved() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "config_version = 1\n\n[general]\nauto_connect = true\n").unwrap();

    let config = ConfigManager::with_path(&path).load().unwrap();

    assert_eq!(config.config_version, CONFIG_VERSION);
    assert!(config.general.auto_connect);
    let saved = fs::read_to_string(&path).unwrap();
    assert!(saved.contains(&format!("config_version = {}", CONFIG_VERSION)));
    assert!(saved.contains("[connection]"));
}

#[test]
fn test_remember_device_persists() {
    let dir = tempfile::tempdir().unwrap();
    let manager = ConfigManager::with_path(dir.path().join("config.toml"));
    let mut config = AppConfig::default();
    config.general.auto_connect = true;

    manager.remember_device(&mut config, "dev1", "Phone").unwrap();

    let loaded = manager.load().unwrap();
    assert_eq!(loaded.general.last_device_id.as_deref(), Some("dev1"));
    assert_eq!(loaded.general.last_device_name.as_deref(), Some("Phone"));
    assert_eq!(loaded.auto_connect_device(), Some("dev1"));
}

#[test]
fn test_portable_log_dir() {
    let dir = tempfile::tempdir().unwrap();
    let manager = ConfigManager::with_path(dir.path().join("config.toml"));

    assert!(manager.is_portable());
    assert_eq!(manager.log_dir(), dir.path().join("logs"));
}
