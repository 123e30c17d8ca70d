//! Connection Hooks
//!
//! Extension points injected into the listener at construction time.

use std::net::SocketAddr;

use tokio::net::TcpStream;

use crate::protocol::Address;

/// What the listener should do with a freshly accepted stream.
pub enum Accept {
    /// Run the normal SOCKS handshake on the stream.
    Continue(TcpStream),
    /// The hook took ownership of the stream.
    Handled,
}

/// Details of a proxied connection once the destination has been dialed.
#[derive(Debug, Clone)]
pub struct ConnectedInfo<'a> {
    pub connection_id: &'a str,
    pub client_addr: SocketAddr,
    pub target: &'a Address,
    pub bound_addr: SocketAddr,
}

pub trait ConnectionHook: Send + Sync {
    /// Called for every accepted stream before any byte is read. Returning
    /// `Accept::Handled` replaces the SOCKS handling for that stream.
    fn on_accept(&self, stream: TcpStream, _peer: SocketAddr) -> Accept {
        Accept::Continue(stream)
    }

    /// Called after a successful dial, before the success reply and the relay.
    fn on_connected(&self, _info: &ConnectedInfo<'_>) {}
}

/// Hook that changes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl ConnectionHook for NoopHook {}
