//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::protocol::Address;

pub const DEFAULT_LISTEN_PORT: u16 = 1080;
pub const DEFAULT_TCP_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_UDP_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_LOG_LEVEL: &str = "error";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

/// Listener and timeout settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port used for whichever of `tcp_listen` / `udp_listen` is unset.
    pub listen_port: u16,
    pub tcp_listen: Option<SocketAddr>,
    pub udp_listen: Option<SocketAddr>,
    /// Address handed to UDP ASSOCIATE clients instead of the local one.
    pub udp_advertised_ip: Option<IpAddr>,
    /// Per-direction relay idle timeout. Zero disables it.
    #[serde(with = "humantime_serde")]
    pub tcp_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub udp_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
}

/// Credentials enforced on SOCKS5 clients. Empty means no authentication.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            tcp_listen: None,
            udp_listen: None,
            udp_advertised_ip: None,
            tcp_timeout: DEFAULT_TCP_TIMEOUT,
            udp_timeout: DEFAULT_UDP_TIMEOUT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn tcp_listen_addr(&self) -> SocketAddr {
        self.tcp_listen
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.listen_port))
    }

    pub fn udp_listen_addr(&self) -> SocketAddr {
        self.udp_listen
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.listen_port))
    }
}

/// Authentication is on only when both halves of the pair are configured.
fn credentials_set(username: &str, password: &str) -> bool {
    !username.is_empty() && !password.is_empty()
}

impl AuthConfig {
    pub fn is_enabled(&self) -> bool {
        credentials_set(&self.username, &self.password)
    }
}

impl Config {
    /// Per-connection settings, given the port the UDP relay actually bound.
    pub fn conn_config(&self, udp_port: u16) -> ConnConfig {
        ConnConfig {
            username: self.auth.username.clone(),
            password: self.auth.password.clone(),
            tcp_timeout: self.server.tcp_timeout,
            dial_timeout: self.server.dial_timeout,
            udp_advertised_ip: self.server.udp_advertised_ip,
            udp_port,
        }
    }
}

/// Read-only parameters handed to every accepted connection.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    pub username: String,
    pub password: String,
    pub tcp_timeout: Duration,
    pub dial_timeout: Duration,
    pub udp_advertised_ip: Option<IpAddr>,
    pub udp_port: u16,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Config::default().conn_config(DEFAULT_LISTEN_PORT)
    }
}

impl ConnConfig {
    pub fn requires_auth(&self) -> bool {
        credentials_set(&self.username, &self.password)
    }

    /// The relay address told to a UDP ASSOCIATE client: the configured
    /// advertised ip, else the ip the client reached us on.
    pub fn udp_advertised_addr(&self, local_addr: SocketAddr) -> Address {
        let ip = self.udp_advertised_ip.unwrap_or_else(|| local_addr.ip());
        Address::from(SocketAddr::new(ip, self.udp_port))
    }
}

/// Settings for the client side of either protocol.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_addr: String,
    pub username: String,
    pub password: String,
    /// Deadline for reaching the proxy server. Zero disables it.
    #[serde(with = "humantime_serde")]
    pub tcp_timeout: Duration,
    /// Read timeout for relayed UDP datagrams. Zero disables it.
    #[serde(with = "humantime_serde")]
    pub udp_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{}", DEFAULT_LISTEN_PORT),
            username: String::new(),
            password: String::new(),
            tcp_timeout: DEFAULT_DIAL_TIMEOUT,
            udp_timeout: DEFAULT_UDP_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            ..Self::default()
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn has_credentials(&self) -> bool {
        credentials_set(&self.username, &self.password)
    }
}
