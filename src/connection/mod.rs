//! Connection Management Module
//!
//! Accepts TCP connections, sniffs the protocol version and runs the matching
//! handshake.

pub mod dispatch;
pub mod hook;
pub mod manager;
pub mod socks4;
pub mod socks5;

pub use dispatch::{serve_connection, ConnContext};
pub use hook::{Accept, ConnectedInfo, ConnectionHook, NoopHook};
pub use manager::ConnectionManager;
