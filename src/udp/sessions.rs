//! UDP Session Table
//!
//! One outbound socket per client source address, shared between the relay's
//! receive loop and each session's reply task.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::debug;

/// A client flow and the socket that carries it to the outside world.
#[derive(Debug)]
pub struct UdpSession {
    pub client_addr: SocketAddr,
    socket: UdpSocket,
    created: Instant,
    /// Milliseconds since `created` at the last datagram in either direction.
    last_activity_ms: AtomicU64,
}

impl UdpSession {
    fn new(client_addr: SocketAddr, socket: UdpSocket) -> Self {
        Self {
            client_addr,
            socket,
            created: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn touch(&self) {
        let now = self.created.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(now, Ordering::Relaxed);
    }

    /// Time since the last datagram in either direction.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.created.elapsed().saturating_sub(last)
    }

    /// Map `target` onto this socket's address family.
    pub fn outbound_target(&self, target: SocketAddr) -> SocketAddr {
        match (self.local_addr(), target) {
            (Ok(SocketAddr::V6(_)), SocketAddr::V4(v4)) => {
                SocketAddr::new(v4.ip().to_ipv6_mapped().into(), v4.port())
            }
            _ => target,
        }
    }
}

/// Client address -> session. Lookups and inserts for the same key never
/// race into two live sockets.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: DashMap<SocketAddr, Arc<UdpSession>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, client: &SocketAddr) -> Option<Arc<UdpSession>> {
        self.sessions.get(client).map(|entry| Arc::clone(entry.value()))
    }

    /// Return the session for `client`, creating it and its outbound socket
    /// when absent. The boolean is true when the session is new.
    pub fn get_or_create(&self, client: SocketAddr) -> io::Result<(Arc<UdpSession>, bool)> {
        match self.sessions.entry(client) {
            Entry::Occupied(entry) => Ok((Arc::clone(entry.get()), false)),
            Entry::Vacant(entry) => {
                let socket = bind_outbound()?;
                let session = Arc::new(UdpSession::new(client, socket));
                debug!(
                    "New UDP session for {} on {:?}",
                    client,
                    session.local_addr().ok()
                );
                entry.insert(Arc::clone(&session));
                Ok((session, true))
            }
        }
    }

    /// Remove the entry for `session.client_addr` only if it still refers to
    /// `session`.
    pub fn remove(&self, session: &Arc<UdpSession>) -> bool {
        self.sessions
            .remove_if(&session.client_addr, |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }
}

/// Bind an ephemeral socket without awaiting, so it can be created while the
/// table entry is locked. The IPv6 socket has `IPV6_V6ONLY` cleared so IPv4
/// targets stay reachable through mapped addresses; hosts without IPv6 get a
/// plain IPv4 socket.
fn bind_outbound() -> io::Result<UdpSocket> {
    let socket = match dual_stack_socket() {
        Ok(socket) => socket,
        Err(e) => {
            debug!("Dual-stack UDP socket unavailable ({}), using IPv4", e);
            let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
            socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())?;
            socket
        }
    };
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

fn dual_stack_socket() -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_only_v6(false)?;
    socket.bind(&SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)).into())?;
    Ok(socket)
}
