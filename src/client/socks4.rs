//! SOCKS4 / SOCKS4a Client

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::connect_server;
use crate::config::ClientConfig;
use crate::error::Error;
use crate::protocol::constants::*;
use crate::protocol::{Socks4Reply, Socks4Request};

#[derive(Debug, Clone)]
pub struct Socks4Client {
    config: ClientConfig,
}

impl Socks4Client {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// CONNECT to `addr`. IPv4 literals use SOCKS4, hostnames use SOCKS4a.
    pub async fn connect(&self, addr: &str) -> Result<TcpStream, Error> {
        let request = Socks4Request::new(CMD_CONNECT, addr)?;
        let mut stream = connect_server(&self.config).await?;
        Self::request(&mut stream, &request).await?;
        Ok(stream)
    }

    pub async fn request<S>(stream: &mut S, request: &Socks4Request) -> Result<Socks4Reply, Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream.write_all(&request.to_bytes()).await?;
        let reply = Socks4Reply::read_from(stream).await?;
        if reply.code != REP4_GRANTED {
            return Err(Error::ReplyFailure(reply.code));
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_socks4a_request_and_rejection() {
        let request = Socks4Request::new(CMD_CONNECT, "example.com:80").unwrap();
        let mut expected = vec![0x04, CMD_CONNECT, 0, 80, 0, 0, 0, 1, 0];
        expected.extend_from_slice(b"example.com\0");

        let mut mock = Builder::new()
            .write(&expected)
            .read(&[0x00, REP4_REJECTED, 0, 0, 0, 0, 0, 0])
            .build();
        let err = Socks4Client::request(&mut mock, &request).await.unwrap_err();
        assert!(matches!(err, Error::ReplyFailure(REP4_REJECTED)));
    }
}
