//! Destination Dial
//!
//! Connects to a requested destination within a deadline and maps OS-level
//! failures onto the reply code reported to the client.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::timed_out;
use crate::protocol::constants::*;
use crate::protocol::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialFailure {
    Refused,
    NetworkUnreachable,
    HostUnreachable,
}

/// Reply codes per failure class: `(class, socks5 rep, socks4 cd)`.
const REPLY_TABLE: [(DialFailure, u8, u8); 3] = [
    (DialFailure::Refused, REP_CONNECTION_REFUSED, REP4_REJECTED),
    (DialFailure::NetworkUnreachable, REP_NETWORK_UNREACHABLE, REP4_REJECTED),
    (DialFailure::HostUnreachable, REP_HOST_UNREACHABLE, REP4_REJECTED),
];

impl DialFailure {
    /// Anything that is neither a refusal nor a network-level failure (timeouts,
    /// resolution errors, unreachable hosts) is reported as host unreachable.
    pub fn classify(err: &io::Error) -> Self {
        if err.kind() == io::ErrorKind::ConnectionRefused {
            return DialFailure::Refused;
        }

        let msg = err.to_string().to_lowercase();
        if msg.contains("refused") {
            DialFailure::Refused
        } else if msg.contains("network is unreachable") || msg.contains("network unreachable") {
            DialFailure::NetworkUnreachable
        } else {
            DialFailure::HostUnreachable
        }
    }

    pub fn socks5_reply(self) -> u8 {
        self.codes().1
    }

    pub fn socks4_reply(self) -> u8 {
        self.codes().2
    }

    fn codes(self) -> (DialFailure, u8, u8) {
        REPLY_TABLE
            .iter()
            .copied()
            .find(|(f, _, _)| *f == self)
            .unwrap_or((self, REP_SERVER_FAILURE, REP4_REJECTED))
    }
}

/// Connect to `target`, trying each resolved address in turn. The deadline
/// covers resolution and every connect attempt together; zero disables it.
pub async fn connect_to_target(target: &Address, dial_timeout: Duration) -> io::Result<TcpStream> {
    let attempt = connect_any(target);
    if dial_timeout.is_zero() {
        return attempt.await;
    }
    match timeout(dial_timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(timed_out(&format!("dial {}", target))),
    }
}

async fn connect_any(target: &Address) -> io::Result<TcpStream> {
    let addrs: Vec<SocketAddr> = match target.socket_addr() {
        Some(addr) => vec![addr],
        None => {
            let resolved: Vec<SocketAddr> =
                lookup_host((target.host().as_str(), target.port())).await?.collect();
            debug!("Resolved {} to {} addresses", target, resolved.len());
            resolved
        }
    };

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                debug!("Connected to target {} ({})", target, addr);
                return Ok(stream);
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses resolved for {}", target),
        )
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    #[test]
    fn test_refused() {
        let err = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(DialFailure::classify(&err), DialFailure::Refused);
        assert_eq!(DialFailure::Refused.socks5_reply(), REP_CONNECTION_REFUSED);
    }

    #[test]
    fn test_network_unreachable() {
        let err = io::Error::new(io::ErrorKind::Other, "Network is unreachable (os error 101)");
        assert_eq!(DialFailure::classify(&err), DialFailure::NetworkUnreachable);
        assert_eq!(
            DialFailure::NetworkUnreachable.socks5_reply(),
            REP_NETWORK_UNREACHABLE
        );
    }

    #[test]
    fn test_default_is_host_unreachable() {
        let err = timed_out("dial");
        assert_eq!(DialFailure::classify(&err), DialFailure::HostUnreachable);
        assert_eq!(DialFailure::HostUnreachable.socks5_reply(), REP_HOST_UNREACHABLE);
        assert_eq!(DialFailure::HostUnreachable.socks4_reply(), REP4_REJECTED);
    }

    #[tokio::test]
    async fn test_connect_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = Address::from(listener.local_addr().unwrap());

        let stream = connect_to_target(&target, Duration::from_secs(3)).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), listener.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_is_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = Address::Ipv4(Ipv4Addr::LOCALHOST, port);
        let err = connect_to_target(&target, Duration::from_secs(3)).await.unwrap_err();
        assert_eq!(DialFailure::classify(&err), DialFailure::Refused);
    }
}
