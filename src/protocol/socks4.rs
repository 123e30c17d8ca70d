//! SOCKS4 / SOCKS4a Frames
//!
//! Request: `[ver, cmd, port(2), ip(4), userid..., 0x00, (hostname..., 0x00)?]`.
//! The hostname is present only when `ip` is the SOCKS4a sentinel `0.0.0.x`, x != 0.
//! Reply: fixed 8 bytes `[0x00, cd, port(2), ip(4)]`.

use std::net::Ipv4Addr;

use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Error;
use crate::protocol::address::Address;
use crate::protocol::constants::*;

/// Upper bound for the null-terminated user id and hostname fields.
const MAX_FIELD_LEN: usize = 1024;

/// Destination placeholder telling the server that a hostname follows.
const SOCKS4A_SENTINEL: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socks4Request {
    pub version: u8,
    pub command: u8,
    pub port: u16,
    pub ip: Ipv4Addr,
    pub user_id: Vec<u8>,
    pub hostname: Option<String>,
}

impl Socks4Request {
    /// Build a request for `host:port`. IPv4 literals use plain SOCKS4, anything
    /// else is sent as a SOCKS4a hostname.
    pub fn new(command: u8, addr: &str) -> Result<Self, Error> {
        let (ip, hostname, port) = match Address::parse_str(addr)? {
            Address::Ipv4(ip, port) => (ip, None, port),
            Address::Domain(domain, port) => (SOCKS4A_SENTINEL, Some(domain), port),
            Address::Ipv6(..) => {
                return Err(Error::invalid_address(addr, "socks4 cannot carry ipv6"))
            }
        };
        Ok(Self {
            version: SOCKS4_VERSION,
            command,
            port,
            ip,
            user_id: Vec::new(),
            hostname,
        })
    }

    /// Whether the destination ip is the "hostname follows" marker.
    pub fn is_socks4a(ip: &Ipv4Addr) -> bool {
        let o = ip.octets();
        o[0] == 0 && o[1] == 0 && o[2] == 0 && o[3] != 0
    }

    /// Read the request after the version byte has been consumed.
    pub async fn read_after_version<R>(version: u8, reader: &mut R) -> Result<Self, Error>
    where
        R: AsyncRead + Unpin,
    {
        let command = reader.read_u8().await?;
        let port = reader.read_u16().await?;
        let mut octets = [0u8; IPV4_LEN];
        reader.read_exact(&mut octets).await?;
        let ip = Ipv4Addr::from(octets);

        let user_id = read_until_null(reader).await?;

        let hostname = if Self::is_socks4a(&ip) {
            let raw = read_until_null(reader).await?;
            Some(String::from_utf8(raw).map_err(|_| Error::BadRequest)?)
        } else {
            None
        };

        Ok(Self {
            version,
            command,
            port,
            ip,
            user_id,
            hostname,
        })
    }

    pub async fn read_from<R>(reader: &mut R) -> Result<Self, Error>
    where
        R: AsyncRead + Unpin,
    {
        let version = reader.read_u8().await?;
        Self::read_after_version(version, reader).await
    }

    /// The destination, preferring the SOCKS4a hostname when present.
    pub fn address(&self) -> Address {
        match &self.hostname {
            Some(host) if !host.is_empty() => Address::Domain(host.clone(), self.port),
            _ => Address::Ipv4(self.ip, self.port),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(9 + self.user_id.len());
        buf.put_u8(self.version);
        buf.put_u8(self.command);
        buf.put_u16(self.port);
        buf.put_slice(&self.ip.octets());
        buf.put_slice(&self.user_id);
        buf.put_u8(0);
        if let Some(host) = &self.hostname {
            buf.put_slice(host.as_bytes());
            buf.put_u8(0);
        }
        buf
    }
}

async fn read_until_null<R>(reader: &mut R) -> Result<Vec<u8>, Error>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let byte = reader.read_u8().await?;
        if byte == 0 {
            return Ok(buf);
        }
        if buf.len() == MAX_FIELD_LEN {
            return Err(Error::BadRequest);
        }
        buf.push(byte);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Socks4Reply {
    pub version: u8,
    pub code: u8,
    pub port: u16,
    pub ip: Ipv4Addr,
}

impl Socks4Reply {
    pub fn new(code: u8, port: u16, ip: Ipv4Addr) -> Self {
        Self {
            version: 0,
            code,
            port,
            ip,
        }
    }

    pub fn granted(port: u16, ip: Ipv4Addr) -> Self {
        Self::new(REP4_GRANTED, port, ip)
    }

    pub fn rejected() -> Self {
        Self::new(REP4_REJECTED, 0, Ipv4Addr::UNSPECIFIED)
    }

    pub async fn read_from<R>(reader: &mut R) -> Result<Self, Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf).await?;
        Ok(Self {
            version: buf[0],
            code: buf[1],
            port: u16::from_be_bytes([buf[2], buf[3]]),
            ip: Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]),
        })
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let p = self.port.to_be_bytes();
        let o = self.ip.octets();
        [self.version, self.code, p[0], p[1], o[0], o[1], o[2], o[3]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_socks4_request() {
        let req = Socks4Request::new(CMD_CONNECT, "10.0.0.1:8080").unwrap();
        let bytes = req.to_bytes();
        assert_eq!(bytes, vec![0x04, 0x01, 0x1F, 0x90, 10, 0, 0, 1, 0]);

        let mut reader = &bytes[..];
        let parsed = Socks4Request::read_from(&mut reader).await.unwrap();
        assert_eq!(parsed, req);
        assert_eq!(parsed.address(), Address::Ipv4(Ipv4Addr::new(10, 0, 0, 1), 8080));
    }

    #[tokio::test]
    async fn test_socks4a_hostname() {
        let req = Socks4Request::new(CMD_CONNECT, "example.com:80").unwrap();
        assert_eq!(req.ip, SOCKS4A_SENTINEL);

        let bytes = req.to_bytes();
        let mut reader = &bytes[..];
        let parsed = Socks4Request::read_from(&mut reader).await.unwrap();
        assert_eq!(parsed.hostname.as_deref(), Some("example.com"));
        assert_eq!(parsed.address(), Address::Domain("example.com".to_string(), 80));
    }

    #[tokio::test]
    async fn test_socks4_user_id_is_skipped() {
        let bytes = [0x04u8, 0x01, 0x00, 0x50, 1, 2, 3, 4, b'b', b'o', b'b', 0];
        let mut reader = &bytes[..];
        let parsed = Socks4Request::read_from(&mut reader).await.unwrap();
        assert_eq!(parsed.user_id, b"bob");
        assert!(parsed.hostname.is_none());
    }

    #[tokio::test]
    async fn test_socks4_unterminated_user_id() {
        let bytes = [0x04u8, 0x01, 0x00, 0x50, 1, 2, 3, 4, b'b'];
        let mut reader = &bytes[..];
        assert!(Socks4Request::read_from(&mut reader).await.is_err());
    }

    #[test]
    fn test_socks4_rejects_ipv6() {
        assert!(Socks4Request::new(CMD_CONNECT, "[::1]:80").is_err());
    }

    #[test]
    fn test_sentinel_detection() {
        assert!(Socks4Request::is_socks4a(&Ipv4Addr::new(0, 0, 0, 1)));
        assert!(Socks4Request::is_socks4a(&Ipv4Addr::new(0, 0, 0, 255)));
        assert!(!Socks4Request::is_socks4a(&Ipv4Addr::new(0, 0, 0, 0)));
        assert!(!Socks4Request::is_socks4a(&Ipv4Addr::new(0, 0, 1, 1)));
    }

    #[tokio::test]
    async fn test_socks4_reply() {
        let reply = Socks4Reply::granted(80, Ipv4Addr::new(1, 2, 3, 4));
        let bytes = reply.to_bytes();
        assert_eq!(bytes, [0x00, 0x5A, 0x00, 0x50, 1, 2, 3, 4]);

        let mut reader = &bytes[..];
        assert_eq!(Socks4Reply::read_from(&mut reader).await.unwrap(), reply);
        assert_eq!(Socks4Reply::rejected().to_bytes()[1], REP4_REJECTED);
    }
}
