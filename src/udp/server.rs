//! UDP Relay Engine
//!
//! A single relay socket receives envelopes from every associated client.
//! Each client address gets its own outbound socket and a reply task that
//! wraps answers back into envelopes. A session lives until it has been idle
//! for the configured window.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::sessions::{SessionTable, UdpSession};
use crate::error::Error;
use crate::protocol::constants::MAX_SEGMENT_SIZE;
use crate::protocol::socks5::encode_udp_datagram;
use crate::protocol::{Address, UdpDatagram};

pub struct UdpRelay {
    socket: Arc<UdpSocket>,
    sessions: Arc<SessionTable>,
    idle_timeout: Duration,
}

impl UdpRelay {
    pub async fn bind(addr: SocketAddr, idle_timeout: Duration) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self::from_socket(socket, idle_timeout))
    }

    pub fn from_socket(socket: UdpSocket, idle_timeout: Duration) -> Self {
        Self {
            socket: Arc::new(socket),
            sessions: Arc::new(SessionTable::new()),
            idle_timeout,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn sessions(&self) -> Arc<SessionTable> {
        Arc::clone(&self.sessions)
    }

    /// Receive loop. Bad datagrams are dropped; only a socket error ends it.
    pub async fn run(&self) -> io::Result<()> {
        info!("UDP relay listening on {}", self.local_addr()?);

        let mut buf = vec![0u8; MAX_SEGMENT_SIZE];
        loop {
            let (n, client) = self.socket.recv_from(&mut buf).await?;
            if let Err(e) = self.relay_to_remote(&buf[..n], client).await {
                debug!("Dropped datagram from {}: {}", client, e);
            }
        }
    }

    async fn relay_to_remote(&self, packet: &[u8], client: SocketAddr) -> Result<(), Error> {
        let datagram = UdpDatagram::from_bytes(packet)?;
        datagram.ensure_unfragmented()?;

        let target = datagram.address.resolve_for(false).await?;

        let (session, created) = self.sessions.get_or_create(client)?;
        if created {
            tokio::spawn(relay_to_client(
                Arc::clone(&self.socket),
                Arc::clone(&session),
                Arc::clone(&self.sessions),
                self.idle_timeout,
            ));
        }

        debug!("udp {} -> {} ({} bytes)", client, datagram.address, datagram.data.len());
        session.touch();
        session
            .socket()
            .send_to(&datagram.data, session.outbound_target(target))
            .await?;
        Ok(())
    }
}

/// Forward replies from a session's outbound socket back to its client. Ends,
/// and tears the session down, once nothing has moved for `idle_timeout`.
async fn relay_to_client(
    relay: Arc<UdpSocket>,
    session: Arc<UdpSession>,
    sessions: Arc<SessionTable>,
    idle_timeout: Duration,
) {
    let mut buf = vec![0u8; MAX_SEGMENT_SIZE];
    let result: io::Result<()> = loop {
        let remaining = idle_timeout.saturating_sub(session.idle_for());
        if remaining.is_zero() {
            break Ok(());
        }

        let (n, origin) = match timeout(remaining, session.socket().recv_from(&mut buf)).await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => break Err(e),
            // Outbound traffic may have refreshed the session meanwhile.
            Err(_) => continue,
        };

        session.touch();
        let envelope = encode_udp_datagram(&Address::from(origin), &buf[..n]);
        if let Err(e) = relay.send_to(&envelope, session.client_addr).await {
            break Err(e);
        }
    };

    sessions.remove(&session);
    match result {
        Ok(()) => debug!("UDP session for {} expired", session.client_addr),
        Err(e) => warn!("UDP session for {} closed: {}", session.client_addr, e),
    }
}
