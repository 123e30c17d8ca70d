//! Client Module
//!
//! Client side of both protocols, used by the tools and the integration tests.

pub mod socks4;
pub mod socks5;
pub mod udp;

pub use socks4::Socks4Client;
pub use socks5::{Network, ProxyStream, Socks5Client};
pub use udp::SocksUdpConn;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::ClientConfig;
use crate::error::{timed_out, Error};

/// Open the TCP connection to the proxy server itself.
pub(crate) async fn connect_server(config: &ClientConfig) -> Result<TcpStream, Error> {
    let connect = TcpStream::connect(config.server_addr.as_str());
    let stream = if config.tcp_timeout.is_zero() {
        connect.await?
    } else {
        timeout(config.tcp_timeout, connect)
            .await
            .map_err(|_| timed_out(&format!("connect to {}", config.server_addr)))??
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}
