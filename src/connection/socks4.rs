//! SOCKS4 / SOCKS4a Server Handshake
//!
//! Only CONNECT is served. Replies are the fixed 8-byte form and carry no
//! failure cause beyond granted / rejected.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use super::dispatch::ConnContext;
use super::hook::ConnectedInfo;
use crate::error::Error;
use crate::protocol::constants::*;
use crate::protocol::{Socks4Reply, Socks4Request};
use crate::relay::{connect_to_target, pipe, DialFailure, RelaySession};

pub struct Socks4Connection<S> {
    stream: S,
    ctx: ConnContext,
}

impl<S> Socks4Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// `stream` is positioned just after the version byte.
    pub fn new(stream: S, ctx: ConnContext) -> Self {
        Self { stream, ctx }
    }

    pub async fn serve(mut self) -> Result<(), Error> {
        let request =
            match Socks4Request::read_after_version(SOCKS4_VERSION, &mut self.stream).await {
                Ok(request) => request,
                Err(e @ Error::Io(_)) => return Err(e),
                Err(e) => return self.fail(REP4_REJECTED, e).await,
            };
        let address = request.address();

        if request.command != CMD_CONNECT {
            return self
                .fail(REP4_REJECTED, Error::CommandNotSupported(request.command))
                .await;
        }

        debug!(connection_id = %self.ctx.id, target = %address, "SOCKS4 request");

        let target = match connect_to_target(&address, self.ctx.config.dial_timeout).await {
            Ok(target) => target,
            Err(e) => {
                let failure = DialFailure::classify(&e);
                let code = failure.socks4_reply();
                info!("Connect to {} failed ({:?}): {}", address, failure, e);
                return self.fail(code, Error::ReplyFailure(code)).await;
            }
        };

        self.ctx.hook.on_connected(&ConnectedInfo {
            connection_id: &self.ctx.id,
            client_addr: self.ctx.peer_addr,
            target: &address,
            bound_addr: target.local_addr()?,
        });

        let reply = Socks4Reply::granted(request.port, request.ip);
        self.stream.write_all(&reply.to_bytes()).await?;

        info!("Relaying {} -> {} (socks4)", self.ctx.peer_addr, address);
        let session = Arc::new(RelaySession::new(
            self.ctx.id.clone(),
            self.ctx.peer_addr,
            address,
        ));
        let result = pipe(self.stream, target, self.ctx.config.tcp_timeout, session.clone()).await;
        session.log_stats();
        result.map_err(Error::from)
    }

    async fn fail<T>(&mut self, code: u8, err: Error) -> Result<T, Error> {
        let reply = Socks4Reply::new(code, 0, std::net::Ipv4Addr::UNSPECIFIED);
        if let Err(e) = self.stream.write_all(&reply.to_bytes()).await {
            debug!("Failed to send reply {:#04x}: {}", code, e);
        }
        Err(err)
    }
}
