//! UDP Relay Module
//!
//! Serves the datagram side of SOCKS5 UDP ASSOCIATE.

pub mod server;
pub mod sessions;

pub use server::UdpRelay;
pub use sessions::{SessionTable, UdpSession};
