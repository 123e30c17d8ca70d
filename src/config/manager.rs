//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Values supplied on the command line. `None` leaves the loaded value alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub tcp_listen: Option<SocketAddr>,
    pub udp_listen: Option<SocketAddr>,
    pub port: Option<u16>,
    pub udp_advertised_ip: Option<IpAddr>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tcp_timeout_secs: Option<u64>,
    pub udp_timeout_secs: Option<u64>,
    pub log_level: Option<String>,
}

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load file, then environment, then validate.
    pub fn load(path: &Path) -> Result<Config> {
        let mut config = Self::load_from_file(path)?;
        Self::apply_env(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML or JSON file. A missing file yields defaults.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if !path.exists() {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            return Ok(Config::default());
        }

        tracing::info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let config: Config = if is_json {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        };

        Ok(config)
    }

    /// Defaults overridden by `SOCKS5_*` environment variables.
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();
        Self::apply_env(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Override `config` with any `SOCKS5_*` environment variables that are set.
    pub fn apply_env(config: &mut Config) -> Result<()> {
        Self::apply_vars(config, |key| std::env::var(key).ok())
    }

    fn apply_vars<F>(config: &mut Config, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = var("SOCKS5_LISTEN_PORT") {
            config.server.listen_port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid SOCKS5_LISTEN_PORT: {}", port))?;
        }

        if let Some(addr) = var("SOCKS5_TCP_LISTEN") {
            config.server.tcp_listen = Some(
                addr.parse::<SocketAddr>()
                    .with_context(|| format!("Invalid SOCKS5_TCP_LISTEN: {}", addr))?,
            );
        }

        if let Some(addr) = var("SOCKS5_UDP_LISTEN") {
            config.server.udp_listen = Some(
                addr.parse::<SocketAddr>()
                    .with_context(|| format!("Invalid SOCKS5_UDP_LISTEN: {}", addr))?,
            );
        }

        if let Some(ip) = var("SOCKS5_UDP_ADVERTISED_IP") {
            config.server.udp_advertised_ip = Some(
                ip.parse::<IpAddr>()
                    .with_context(|| format!("Invalid SOCKS5_UDP_ADVERTISED_IP: {}", ip))?,
            );
        }

        if let Some(timeout) = var("SOCKS5_TCP_TIMEOUT") {
            config.server.tcp_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid SOCKS5_TCP_TIMEOUT: {}", timeout))?;
        }

        if let Some(timeout) = var("SOCKS5_UDP_TIMEOUT") {
            config.server.udp_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid SOCKS5_UDP_TIMEOUT: {}", timeout))?;
        }

        if let Some(timeout) = var("SOCKS5_DIAL_TIMEOUT") {
            config.server.dial_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid SOCKS5_DIAL_TIMEOUT: {}", timeout))?;
        }

        if let Some(username) = var("SOCKS5_USERNAME") {
            config.auth.username = username;
        }

        if let Some(password) = var("SOCKS5_PASSWORD") {
            config.auth.password = password;
        }

        if let Some(level) = var("SOCKS5_LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(())
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .context("Server configuration validation failed")?;
        self.validate_auth_config()
            .context("Authentication configuration validation failed")?;
        self.validate_logging_config()
            .context("Logging configuration validation failed")?;
        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        if self.server.udp_timeout.is_zero() {
            bail!("udp_timeout must be greater than 0");
        }

        if self.server.dial_timeout.is_zero() {
            bail!("dial_timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_auth_config(&self) -> Result<()> {
        if self.auth.username.is_empty() != self.auth.password.is_empty() {
            bail!("username and password must be set together");
        }

        if self.auth.username.len() > 255 {
            bail!("username exceeds 255 bytes");
        }

        if self.auth.password.len() > 255 {
            bail!("password exceeds 255 bytes");
        }

        Ok(())
    }

    fn validate_logging_config(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!("logging.level must be one of: {}", VALID_LOG_LEVELS.join(", "));
        }
        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(&mut self, cli: &CliOverrides) {
        if let Some(port) = cli.port {
            self.server.listen_port = port;
            tracing::info!("CLI override: listen port set to {}", port);
        }

        if let Some(addr) = cli.tcp_listen {
            self.server.tcp_listen = Some(addr);
            tracing::info!("CLI override: tcp listen address set to {}", addr);
        }

        if let Some(addr) = cli.udp_listen {
            self.server.udp_listen = Some(addr);
            tracing::info!("CLI override: udp listen address set to {}", addr);
        }

        if let Some(ip) = cli.udp_advertised_ip {
            self.server.udp_advertised_ip = Some(ip);
            tracing::info!("CLI override: udp advertised ip set to {}", ip);
        }

        if let Some(username) = &cli.username {
            self.auth.username = username.clone();
            tracing::info!("CLI override: username set");
        }

        if let Some(password) = &cli.password {
            self.auth.password = password.clone();
            tracing::info!("CLI override: password set");
        }

        if let Some(secs) = cli.tcp_timeout_secs {
            self.server.tcp_timeout = Duration::from_secs(secs);
            tracing::info!("CLI override: tcp timeout set to {}s", secs);
        }

        if let Some(secs) = cli.udp_timeout_secs {
            self.server.udp_timeout = Duration::from_secs(secs);
            tracing::info!("CLI override: udp timeout set to {}s", secs);
        }

        if let Some(level) = &cli.log_level {
            self.logging.level = level.clone();
        }
    }
}
