//! SOCKS5 Server Handshake
//!
//! Method negotiation, optional username/password authentication, then
//! CONNECT or UDP ASSOCIATE. Every rejected step writes its reply before the
//! error is returned.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use super::dispatch::ConnContext;
use super::hook::ConnectedInfo;
use crate::error::Error;
use crate::protocol::constants::*;
use crate::protocol::{
    Address, AuthMethod, Command, MethodSelectReply, MethodSelectRequest, Reply, Request,
    UserPassReply, UserPassRequest,
};
use crate::relay::{connect_to_target, pipe, DialFailure, RelaySession};

pub struct Socks5Connection<S> {
    stream: S,
    ctx: ConnContext,
}

impl<S> Socks5Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// `stream` is positioned just after the version byte.
    pub fn new(stream: S, ctx: ConnContext) -> Self {
        Self { stream, ctx }
    }

    pub async fn serve(mut self) -> Result<(), Error> {
        let method = self.negotiate_method().await?;
        if method == AuthMethod::UserPass {
            self.authenticate().await?;
        }

        let request = match Request::read_from(&mut self.stream).await {
            Ok(request) => request,
            // The peer is gone or stalled; there is nobody to answer.
            Err(e @ Error::Io(_)) => return Err(e),
            Err(e @ Error::AddrType(_)) => {
                return self.fail(REP_ADDRESS_TYPE_NOT_SUPPORTED, e).await
            }
            Err(e) => return self.fail(REP_SERVER_FAILURE, e).await,
        };

        if request.version != SOCKS5_VERSION {
            return self
                .fail(REP_SERVER_FAILURE, Error::Version(request.version))
                .await;
        }

        debug!(
            connection_id = %self.ctx.id,
            command = request.command,
            target = %request.address,
            "SOCKS5 request"
        );

        match Command::from_code(request.command) {
            Some(Command::Connect) => self.connect(request.address).await,
            Some(Command::UdpAssociate) => self.udp_associate().await,
            _ => {
                self.fail(
                    REP_COMMAND_NOT_SUPPORTED,
                    Error::CommandNotSupported(request.command),
                )
                .await
            }
        }
    }

    async fn negotiate_method(&mut self) -> Result<AuthMethod, Error> {
        let greeting =
            MethodSelectRequest::read_after_version(SOCKS5_VERSION, &mut self.stream).await?;

        let wanted = if self.ctx.config.requires_auth() {
            AuthMethod::UserPass
        } else {
            AuthMethod::NoAuth
        };

        if !greeting.methods.contains(&wanted.method_code()) {
            let reply = MethodSelectReply::new(METHOD_NO_ACCEPTABLE);
            self.stream.write_all(&reply.to_bytes()).await?;
            return Err(Error::MethodNoAcceptable);
        }

        let reply = MethodSelectReply::new(wanted.method_code());
        self.stream.write_all(&reply.to_bytes()).await?;
        Ok(wanted)
    }

    async fn authenticate(&mut self) -> Result<(), Error> {
        let request = UserPassRequest::read_from(&mut self.stream).await?;

        if request.version != USERPASS_VERSION {
            let reply = UserPassReply::new(USERPASS_FAILURE);
            if let Err(e) = self.stream.write_all(&reply.to_bytes()).await {
                debug!("Failed to send auth failure reply: {}", e);
            }
            return Err(Error::AuthVersion(request.version));
        }

        let config = &self.ctx.config;
        let accepted = request.username == config.username.as_bytes()
            && request.password == config.password.as_bytes();

        let status = if accepted {
            USERPASS_SUCCESS
        } else {
            USERPASS_FAILURE
        };
        self.stream.write_all(&UserPassReply::new(status).to_bytes()).await?;

        if !accepted {
            return Err(Error::AuthFailed);
        }
        debug!("Connection {} authenticated", self.ctx.id);
        Ok(())
    }

    async fn connect(mut self, address: Address) -> Result<(), Error> {
        let target = match connect_to_target(&address, self.ctx.config.dial_timeout).await {
            Ok(target) => target,
            Err(e) => {
                let failure = DialFailure::classify(&e);
                let code = failure.socks5_reply();
                info!("Connect to {} failed ({:?}): {}", address, failure, e);
                return self.fail(code, Error::ReplyFailure(code)).await;
            }
        };

        let bound = target.local_addr()?;
        self.ctx.hook.on_connected(&ConnectedInfo {
            connection_id: &self.ctx.id,
            client_addr: self.ctx.peer_addr,
            target: &address,
            bound_addr: bound,
        });
        self.write_reply(&Reply::success(Address::from(bound))).await?;

        info!("Relaying {} -> {}", self.ctx.peer_addr, address);
        let session = Arc::new(RelaySession::new(
            self.ctx.id.clone(),
            self.ctx.peer_addr,
            address,
        ));
        let result = pipe(self.stream, target, self.ctx.config.tcp_timeout, session.clone()).await;
        session.log_stats();
        result.map_err(Error::from)
    }

    /// Tell the client where the relay listens, then hold the control
    /// connection open until the client drops it.
    async fn udp_associate(mut self) -> Result<(), Error> {
        let advertised = self.ctx.config.udp_advertised_addr(self.ctx.local_addr);
        self.write_reply(&Reply::success(advertised.clone())).await?;
        info!("UDP association for {} via {}", self.ctx.peer_addr, advertised);

        let mut buf = [0u8; 32];
        loop {
            if self.stream.read(&mut buf).await? == 0 {
                debug!("UDP association for {} closed", self.ctx.peer_addr);
                return Ok(());
            }
        }
    }

    async fn write_reply(&mut self, reply: &Reply) -> Result<(), Error> {
        self.stream.write_all(&reply.to_bytes()).await?;
        Ok(())
    }

    /// Send a failure reply, then hand back `err` regardless of whether the
    /// reply could be written.
    async fn fail<T>(&mut self, code: u8, err: Error) -> Result<T, Error> {
        if let Err(e) = self.write_reply(&Reply::error(code)).await {
            debug!("Failed to send reply {:#04x}: {}", code, e);
        }
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnConfig;
    use crate::connection::dispatch::tests::context;
    use tokio_test::io::Builder;

    fn with_credentials() -> ConnConfig {
        ConnConfig {
            username: "user".to_string(),
            password: "pass".to_string(),
            ..ConnConfig::default()
        }
    }

    #[tokio::test]
    async fn test_credentials_required_but_not_offered() {
        let mock = Builder::new()
            .read(&[0x01, METHOD_NONE])
            .write(&[0x05, METHOD_NO_ACCEPTABLE])
            .build();
        let err = Socks5Connection::new(mock, context(with_credentials()))
            .serve()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MethodNoAcceptable));
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let mock = Builder::new()
            .read(&[0x02, METHOD_NONE, METHOD_USERPASS])
            .write(&[0x05, METHOD_USERPASS])
            .read(&[0x01, 4, b'u', b's', b'e', b'r', 4, b'P', b'A', b'S', b'S'])
            .write(&[0x01, USERPASS_FAILURE])
            .build();
        let err = Socks5Connection::new(mock, context(with_credentials()))
            .serve()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthFailed));
    }

    #[tokio::test]
    async fn test_bad_auth_version() {
        let mock = Builder::new()
            .read(&[0x01, METHOD_USERPASS])
            .write(&[0x05, METHOD_USERPASS])
            .read(&[0x05, 4, b'u', b's', b'e', b'r', 4, b'p', b'a', b's', b's'])
            .write(&[0x01, USERPASS_FAILURE])
            .build();
        let err = Socks5Connection::new(mock, context(with_credentials()))
            .serve()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthVersion(0x05)));
    }

    #[tokio::test]
    async fn test_bind_is_not_supported() {
        let mock = Builder::new()
            .read(&[0x01, METHOD_NONE])
            .write(&[0x05, METHOD_NONE])
            .read(&[0x05, CMD_BIND, 0x00, ATYP_IPV4, 127, 0, 0, 1, 0, 80])
            .write(&[0x05, REP_COMMAND_NOT_SUPPORTED, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
            .build();
        let err = Socks5Connection::new(mock, context(ConnConfig::default()))
            .serve()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandNotSupported(CMD_BIND)));
    }

    #[tokio::test]
    async fn test_unknown_address_type() {
        let mock = Builder::new()
            .read(&[0x01, METHOD_NONE])
            .write(&[0x05, METHOD_NONE])
            .read(&[0x05, CMD_CONNECT, 0x00, 0x09])
            .write(&[0x05, REP_ADDRESS_TYPE_NOT_SUPPORTED, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
            .build();
        let err = Socks5Connection::new(mock, context(ConnConfig::default()))
            .serve()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AddrType(0x09)));
    }

    #[tokio::test]
    async fn test_malformed_domain_gets_failure_reply() {
        let mock = Builder::new()
            .read(&[0x01, METHOD_NONE])
            .write(&[0x05, METHOD_NONE])
            .read(&[0x05, CMD_CONNECT, 0x00, ATYP_DOMAIN, 0x02, 0xFF, 0xFE, 0x00, 0x50])
            .write(&[0x05, REP_SERVER_FAILURE, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
            .build();
        let err = Socks5Connection::new(mock, context(ConnConfig::default()))
            .serve()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest));
    }

    #[tokio::test]
    async fn test_udp_associate_replies_with_advertised_addr() {
        let config = ConnConfig {
            udp_port: 5353,
            ..with_credentials()
        };
        let p = 5353u16.to_be_bytes();
        let mock = Builder::new()
            .read(&[0x01, METHOD_USERPASS])
            .write(&[0x05, METHOD_USERPASS])
            .read(&[0x01, 4, b'u', b's', b'e', b'r', 4, b'p', b'a', b's', b's'])
            .write(&[0x01, USERPASS_SUCCESS])
            .read(&[0x05, CMD_UDP_ASSOCIATE, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
            .write(&[0x05, REP_SUCCESS, 0x00, ATYP_IPV4, 127, 0, 0, 1, p[0], p[1]])
            .read(b"ignored")
            .build();
        Socks5Connection::new(mock, context(config))
            .serve()
            .await
            .unwrap();
    }
}
