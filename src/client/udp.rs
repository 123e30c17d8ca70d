//! Client UDP Relay Adapter
//!
//! Makes a SOCKS5 UDP association look like a connected datagram socket:
//! sends are wrapped in an envelope for the fixed target, receives are
//! unwrapped. The control connection is held for the adapter's lifetime since
//! the server ends the association when it closes.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::error::{timed_out, Error};
use crate::protocol::constants::MAX_SEGMENT_SIZE;
use crate::protocol::socks5::encode_udp_datagram;
use crate::protocol::{Address, UdpDatagram};

#[derive(Debug)]
pub struct SocksUdpConn {
    socket: UdpSocket,
    _control: TcpStream,
    target: Address,
    read_timeout: Duration,
}

impl SocksUdpConn {
    /// `socket` must already be connected to the relay address.
    pub fn new(
        socket: UdpSocket,
        control: TcpStream,
        target: Address,
        read_timeout: Duration,
    ) -> Self {
        Self {
            socket,
            _control: control,
            target,
            read_timeout,
        }
    }

    pub fn target(&self) -> &Address {
        &self.target
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn relay_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }

    /// Override the configured read timeout. `None` waits forever.
    pub fn set_read_timeout(&mut self, read_timeout: Option<Duration>) {
        self.read_timeout = read_timeout.unwrap_or(Duration::ZERO);
    }

    /// Send `payload` to the target. Returns the payload length.
    pub async fn send(&self, payload: &[u8]) -> io::Result<usize> {
        self.send_to(payload, &self.target).await
    }

    /// Send `payload` to an explicit destination through the same association.
    pub async fn send_to(&self, payload: &[u8], target: &Address) -> io::Result<usize> {
        let envelope = encode_udp_datagram(target, payload);
        self.socket.send(&envelope).await?;
        Ok(payload.len())
    }

    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize, Error> {
        self.recv_from(buf).await.map(|(n, _)| n)
    }

    /// Receive one datagram, returning its payload length and the address it
    /// came from.
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Address), Error> {
        let mut packet = vec![0u8; MAX_SEGMENT_SIZE];
        let n = self.read_packet(&mut packet).await?;

        let datagram = UdpDatagram::from_bytes(&packet[..n])?;
        datagram.ensure_unfragmented()?;

        if datagram.data.len() > buf.len() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "buffer too small: {} bytes for a {} byte datagram",
                    buf.len(),
                    datagram.data.len()
                ),
            )));
        }
        buf[..datagram.data.len()].copy_from_slice(&datagram.data);
        Ok((datagram.data.len(), datagram.address))
    }

    async fn read_packet(&self, packet: &mut [u8]) -> io::Result<usize> {
        if self.read_timeout.is_zero() {
            return self.socket.recv(packet).await;
        }
        match timeout(self.read_timeout, self.socket.recv(packet)).await {
            Ok(result) => result,
            Err(_) => Err(timed_out("udp read")),
        }
    }
}
