//! SOCKS5 Client

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

use super::{connect_server, SocksUdpConn};
use crate::config::ClientConfig;
use crate::error::Error;
use crate::protocol::constants::*;
use crate::protocol::{
    Address, Command, MethodSelectReply, MethodSelectRequest, Reply, Request, UserPassReply,
    UserPassRequest,
};

/// Transport requested through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Udp,
}

/// A connection established through the proxy.
#[derive(Debug)]
pub enum ProxyStream {
    Tcp(TcpStream),
    Udp(SocksUdpConn),
}

type HandshakeHook = Arc<dyn Fn(Command, &Reply) + Send + Sync>;

#[derive(Clone)]
pub struct Socks5Client {
    config: ClientConfig,
    handshake_hook: Option<HandshakeHook>,
}

impl fmt::Debug for Socks5Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socks5Client")
            .field("server_addr", &self.config.server_addr)
            .field("handshake_hook", &self.handshake_hook.is_some())
            .finish()
    }
}

impl Socks5Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            handshake_hook: None,
        }
    }

    /// Run `hook` after every successful command reply.
    pub fn with_handshake_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(Command, &Reply) + Send + Sync + 'static,
    {
        self.handshake_hook = Some(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn dial(&self, network: Network, addr: &str) -> Result<ProxyStream, Error> {
        match network {
            Network::Tcp => self.connect(addr).await.map(ProxyStream::Tcp),
            Network::Udp => self.udp_associate(addr).await.map(ProxyStream::Udp),
        }
    }

    /// CONNECT to `addr` ("host:port") through the proxy.
    pub async fn connect(&self, addr: &str) -> Result<TcpStream, Error> {
        let target = Address::parse_str(addr)?;
        let mut stream = connect_server(&self.config).await?;
        self.handshake(&mut stream).await?;
        self.request(&mut stream, Command::Connect, target).await?;
        Ok(stream)
    }

    /// UDP ASSOCIATE, returning a datagram connection whose sends go to `addr`.
    pub async fn udp_associate(&self, addr: &str) -> Result<SocksUdpConn, Error> {
        let target = Address::parse_str(addr)?;
        let mut stream = connect_server(&self.config).await?;
        self.handshake(&mut stream).await?;
        let reply = self
            .request(&mut stream, Command::UdpAssociate, Address::unspecified())
            .await?;

        let mut relay = reply.address.resolve().await?;
        if relay.ip().is_unspecified() {
            relay.set_ip(stream.peer_addr()?.ip());
        }

        let local: SocketAddr = match relay.ip() {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(relay).await?;
        debug!("UDP relay for {} at {}", target, relay);

        Ok(SocksUdpConn::new(socket, stream, target, self.config.udp_timeout))
    }

    /// Method negotiation plus username/password authentication when offered.
    pub async fn handshake<S>(&self, stream: &mut S) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut methods = vec![METHOD_NONE];
        if self.config.has_credentials() {
            methods.push(METHOD_USERPASS);
        }
        stream
            .write_all(&MethodSelectRequest::new(methods).to_bytes())
            .await?;

        let reply = MethodSelectReply::read_from(stream).await?;
        if reply.version != SOCKS5_VERSION {
            return Err(Error::Version(reply.version));
        }

        match reply.method {
            METHOD_NONE => Ok(()),
            METHOD_USERPASS if self.config.has_credentials() => self.authenticate(stream).await,
            METHOD_NO_ACCEPTABLE => Err(Error::MethodNoAcceptable),
            other => Err(Error::Method(other)),
        }
    }

    async fn authenticate<S>(&self, stream: &mut S) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = UserPassRequest::new(
            self.config.username.as_bytes(),
            self.config.password.as_bytes(),
        );
        stream.write_all(&request.to_bytes()).await?;

        let reply = UserPassReply::read_from(stream).await?;
        if reply.version != USERPASS_VERSION {
            return Err(Error::AuthVersion(reply.version));
        }
        if reply.status != USERPASS_SUCCESS {
            return Err(Error::AuthFailed);
        }
        Ok(())
    }

    /// Send a command and wait for a successful reply.
    pub async fn request<S>(
        &self,
        stream: &mut S,
        command: Command,
        address: Address,
    ) -> Result<Reply, Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream
            .write_all(&Request::new(command, address).to_bytes())
            .await?;

        let reply = Reply::read_from(stream).await?;
        if reply.version != SOCKS5_VERSION {
            return Err(Error::Version(reply.version));
        }
        if reply.reply != REP_SUCCESS {
            return Err(Error::ReplyFailure(reply.reply));
        }

        if let Some(hook) = &self.handshake_hook {
            hook(command, &reply);
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_handshake_with_credentials() {
        let config = ClientConfig::new("127.0.0.1:1080").with_credentials("u", "p");
        let client = Socks5Client::new(config);
        let mut mock = Builder::new()
            .write(&[0x05, 0x02, METHOD_NONE, METHOD_USERPASS])
            .read(&[0x05, METHOD_USERPASS])
            .write(&[0x01, 1, b'u', 1, b'p'])
            .read(&[0x01, USERPASS_SUCCESS])
            .build();
        client.handshake(&mut mock).await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_no_acceptable_method() {
        let client = Socks5Client::new(ClientConfig::new("127.0.0.1:1080"));
        let mut mock = Builder::new()
            .write(&[0x05, 0x01, METHOD_NONE])
            .read(&[0x05, METHOD_NO_ACCEPTABLE])
            .build();
        let err = client.handshake(&mut mock).await.unwrap_err();
        assert!(matches!(err, Error::MethodNoAcceptable));
    }

    #[tokio::test]
    async fn test_request_failure_reply() {
        let client = Socks5Client::new(ClientConfig::new("127.0.0.1:1080"));
        let mut mock = Builder::new()
            .write(&[0x05, CMD_CONNECT, 0x00, ATYP_DOMAIN, 1, b'h', 0, 80])
            .read(&[0x05, REP_HOST_UNREACHABLE, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
            .build();
        let err = client
            .request(&mut mock, Command::Connect, Address::Domain("h".into(), 80))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReplyFailure(REP_HOST_UNREACHABLE)));
    }

    #[tokio::test]
    async fn test_handshake_hook_sees_reply() {
        let called = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&called);
        let client = Socks5Client::new(ClientConfig::new("127.0.0.1:1080")).with_handshake_hook(
            move |command, reply| {
                assert_eq!(command, Command::Connect);
                assert_eq!(reply.address.port(), 4000);
                seen.store(true, Ordering::SeqCst);
            },
        );
        let mut mock = Builder::new()
            .write(&[0x05, CMD_CONNECT, 0x00, ATYP_IPV4, 10, 0, 0, 1, 0, 80])
            .read(&[0x05, REP_SUCCESS, 0x00, ATYP_IPV4, 10, 0, 0, 2, 0x0F, 0xA0])
            .build();
        client
            .request(&mut mock, Command::Connect, Address::Ipv4(Ipv4Addr::new(10, 0, 0, 1), 80))
            .await
            .unwrap();
        assert!(called.load(Ordering::SeqCst));
    }
}
