//! Loading configuration files from disk

use std::io::Write;
use std::time::Duration;

use socksrelay::config::ConfigManager;
use tempfile::{Builder, NamedTempFile};

#[test]
fn test_load_toml_file() {
    let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[server]
listen_port = 1081
tcp_listen = "127.0.0.1:2080"
udp_advertised_ip = "203.0.113.7"
tcp_timeout = "1m"
udp_timeout = "30s"

[auth]
username = "alice"
password = "secret"

[logging]
level = "debug"
"#
    )
    .unwrap();

    let config = ConfigManager::load_from_file(file.path()).unwrap();
    assert_eq!(config.server.listen_port, 1081);
    assert_eq!(config.server.tcp_listen_addr(), "127.0.0.1:2080".parse().unwrap());
    assert_eq!(config.server.udp_listen_addr(), "0.0.0.0:1081".parse().unwrap());
    assert_eq!(config.server.udp_advertised_ip, Some("203.0.113.7".parse().unwrap()));
    assert_eq!(config.server.tcp_timeout, Duration::from_secs(60));
    assert_eq!(config.server.udp_timeout, Duration::from_secs(30));
    assert_eq!(config.server.dial_timeout, Duration::from_secs(3));
    assert!(config.auth.is_enabled());
    assert_eq!(config.logging.level, "debug");
    config.validate().unwrap();
}

#[test]
fn test_load_json_file() {
    let mut file = Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        file,
        r#"{{"server": {{"listen_port": 9050, "dial_timeout": "500ms"}}}}"#
    )
    .unwrap();

    let config = ConfigManager::load_from_file(file.path()).unwrap();
    assert_eq!(config.server.listen_port, 9050);
    assert_eq!(config.server.dial_timeout, Duration::from_millis(500));
    assert!(!config.auth.is_enabled());
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigManager::load_from_file(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.server.listen_port, 1080);
    assert_eq!(config.server.tcp_timeout, Duration::from_secs(300));
    assert_eq!(config.server.udp_timeout, Duration::from_secs(90));
    assert_eq!(config.logging.level, "error");
}

#[test]
fn test_malformed_file_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[server\nlisten_port = ").unwrap();
    assert!(ConfigManager::load_from_file(file.path()).is_err());
}

#[test]
fn test_load_validates() {
    let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[auth]\nusername = \"only-user\"").unwrap();
    assert!(ConfigManager::load(file.path()).is_err());
}
