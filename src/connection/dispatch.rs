//! Version Sniff
//!
//! Reads the first byte of a connection and hands the stream to the matching
//! protocol state machine.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::debug;

use super::hook::ConnectionHook;
use super::socks4::Socks4Connection;
use super::socks5::Socks5Connection;
use crate::config::ConnConfig;
use crate::error::{Error, ErrorKind};
use crate::protocol::constants::*;

/// Everything a handshake needs to know about the connection it runs on.
#[derive(Clone)]
pub struct ConnContext {
    pub id: String,
    pub peer_addr: SocketAddr,
    /// Local end of the accepted stream.
    pub local_addr: SocketAddr,
    pub config: Arc<ConnConfig>,
    pub hook: Arc<dyn ConnectionHook>,
}

impl fmt::Debug for ConnContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnContext")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

/// Serve one client connection to completion.
///
/// A peer that disconnects before sending anything, and a destination that
/// could not be reached, both end in `Ok`.
pub async fn serve_connection<S>(mut stream: S, ctx: ConnContext) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let version = match stream.read_u8().await {
        Ok(version) => version,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            debug!("Connection {} closed before sending a version byte", ctx.id);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let result = match version {
        SOCKS5_VERSION => Socks5Connection::new(stream, ctx).serve().await,
        SOCKS4_VERSION => Socks4Connection::new(stream, ctx).serve().await,
        other => Err(Error::Version(other)),
    };

    match result {
        Err(e) if e.kind() == ErrorKind::Destination => Ok(()),
        other => other,
    }
}
