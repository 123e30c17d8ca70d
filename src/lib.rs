//! socksrelay
//!
//! SOCKS4/4a and SOCKS5 proxy engine: wire codecs, the per-connection
//! handshake, a bidirectional relay with idle timeouts and a UDP relay with a
//! per-client session table.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod shutdown;
pub mod udp;

pub use config::Config;
pub use connection::ConnectionManager;
pub use error::{Error, ErrorKind};
pub use shutdown::ShutdownCoordinator;

/// Application-level result used by configuration, the listener and binaries.
pub type Result<T> = anyhow::Result<T>;
