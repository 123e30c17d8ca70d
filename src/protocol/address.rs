//! SOCKS address codec
//!
//! Every SOCKS5 frame that names a host embeds the same structure:
//!
//! ```text
//! +------+----------------------+----------+
//! | ATYP |       ADDRESS        |   PORT   |
//! +------+----------------------+----------+
//! |  1   | 4 / 16 / 1+(0..=255) | 2 (BE)   |
//! +------+----------------------+----------+
//! ```

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::lookup_host;

use crate::error::Error;
use crate::protocol::constants::*;

/// A destination or bound address as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    Ipv4(Ipv4Addr, u16),
    Ipv6(Ipv6Addr, u16),
    Domain(String, u16),
}

impl Address {
    /// `0.0.0.0:0`, used for replies that carry no meaningful address.
    pub fn unspecified() -> Self {
        Address::Ipv4(Ipv4Addr::UNSPECIFIED, 0)
    }

    pub fn address_type(&self) -> u8 {
        match self {
            Address::Ipv4(..) => ATYP_IPV4,
            Address::Ipv6(..) => ATYP_IPV6,
            Address::Domain(..) => ATYP_DOMAIN,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Address::Ipv4(_, port) | Address::Ipv6(_, port) | Address::Domain(_, port) => *port,
        }
    }

    /// Host part without the port.
    pub fn host(&self) -> String {
        match self {
            Address::Ipv4(ip, _) => ip.to_string(),
            Address::Ipv6(ip, _) => ip.to_string(),
            Address::Domain(domain, _) => domain.clone(),
        }
    }

    /// The address as a socket address, when it is an IP literal.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Address::Ipv4(ip, port) => Some(SocketAddr::new(IpAddr::V4(*ip), *port)),
            Address::Ipv6(ip, port) => Some(SocketAddr::new(IpAddr::V6(*ip), *port)),
            Address::Domain(..) => None,
        }
    }

    /// Number of bytes `encode` writes.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Address::Ipv4(..) => IPV4_LEN,
            Address::Ipv6(..) => IPV6_LEN,
            Address::Domain(domain, _) => 1 + domain.len().min(MAX_DOMAIN_LEN),
        } + PORT_LEN
    }

    /// Append the wire form of this address to `dst`.
    ///
    /// Domains longer than 255 bytes cannot be constructed through the parsers;
    /// a hand-built one is truncated to its length byte, and `encoded_len`
    /// counts the truncated form.
    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(self.address_type());
        match self {
            Address::Ipv4(ip, _) => dst.put_slice(&ip.octets()),
            Address::Ipv6(ip, _) => dst.put_slice(&ip.octets()),
            Address::Domain(domain, _) => {
                let bytes = &domain.as_bytes()[..domain.len().min(MAX_DOMAIN_LEN)];
                dst.put_u8(bytes.len() as u8);
                dst.put_slice(bytes);
            }
        }
        dst.put_u16(self.port());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf
    }

    /// Read an address from a stream, tag first.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, Error>
    where
        R: AsyncRead + Unpin,
    {
        let atyp = reader.read_u8().await?;
        let address = match atyp {
            ATYP_IPV4 => {
                let mut octets = [0u8; IPV4_LEN];
                reader.read_exact(&mut octets).await?;
                let port = reader.read_u16().await?;
                Address::Ipv4(Ipv4Addr::from(octets), port)
            }
            ATYP_IPV6 => {
                let mut octets = [0u8; IPV6_LEN];
                reader.read_exact(&mut octets).await?;
                let port = reader.read_u16().await?;
                Address::Ipv6(Ipv6Addr::from(octets), port)
            }
            ATYP_DOMAIN => {
                let len = reader.read_u8().await? as usize;
                let mut domain = vec![0u8; len];
                reader.read_exact(&mut domain).await?;
                let port = reader.read_u16().await?;
                let domain = String::from_utf8(domain).map_err(|_| Error::BadRequest)?;
                Address::Domain(domain, port)
            }
            other => return Err(Error::AddrType(other)),
        };
        Ok(address)
    }

    /// Parse an address at the start of an already received buffer.
    ///
    /// Returns the address and the number of bytes it occupied.
    pub fn from_bytes(buf: &[u8]) -> Result<(Self, usize), Error> {
        let atyp = *buf.first().ok_or(Error::BadRequest)?;
        let (start, addr_len) = match atyp {
            ATYP_IPV4 => (1, IPV4_LEN),
            ATYP_IPV6 => (1, IPV6_LEN),
            ATYP_DOMAIN => (2, *buf.get(1).ok_or(Error::BadRequest)? as usize),
            other => return Err(Error::AddrType(other)),
        };

        let end = start + addr_len + PORT_LEN;
        if buf.len() < end {
            return Err(Error::BadRequest);
        }

        let raw = &buf[start..start + addr_len];
        let port = u16::from_be_bytes([buf[end - 2], buf[end - 1]]);
        let address = match atyp {
            ATYP_IPV4 => {
                let mut octets = [0u8; IPV4_LEN];
                octets.copy_from_slice(raw);
                Address::Ipv4(Ipv4Addr::from(octets), port)
            }
            ATYP_IPV6 => {
                let mut octets = [0u8; IPV6_LEN];
                octets.copy_from_slice(raw);
                Address::Ipv6(Ipv6Addr::from(octets), port)
            }
            _ => {
                let domain = std::str::from_utf8(raw).map_err(|_| Error::BadRequest)?;
                Address::Domain(domain.to_string(), port)
            }
        };
        Ok((address, end))
    }

    /// Parse a textual `host:port`. IPv6 literals must be bracketed.
    pub fn parse_str(s: &str) -> Result<Self, Error> {
        let (host, port) = split_host_port(s)?;
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::invalid_address(s, "invalid port"))?;

        match host.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) => Ok(Address::Ipv4(ip, port)),
            Ok(IpAddr::V6(ip)) => match ip.to_ipv4_mapped() {
                Some(v4) => Ok(Address::Ipv4(v4, port)),
                None => Ok(Address::Ipv6(ip, port)),
            },
            Err(_) => {
                if host.len() > MAX_DOMAIN_LEN {
                    return Err(Error::invalid_address(s, "host too long"));
                }
                Ok(Address::Domain(host.to_string(), port))
            }
        }
    }

    /// Resolve to a socket address, preferring the first DNS answer.
    pub async fn resolve(&self) -> io::Result<SocketAddr> {
        if let Some(addr) = self.socket_addr() {
            return Ok(addr);
        }
        lookup_host((self.host().as_str(), self.port()))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses resolved for {}", self),
                )
            })
    }

    /// Resolve, picking an answer whose family matches `prefer_v6` when one exists.
    pub async fn resolve_for(&self, prefer_v6: bool) -> io::Result<SocketAddr> {
        if let Some(addr) = self.socket_addr() {
            return Ok(addr);
        }
        let addrs: Vec<SocketAddr> = lookup_host((self.host().as_str(), self.port()))
            .await?
            .collect();
        addrs
            .iter()
            .find(|a| a.is_ipv6() == prefer_v6)
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses resolved for {}", self),
                )
            })
    }
}

fn split_host_port(s: &str) -> Result<(&str, &str), Error> {
    if let Some(rest) = s.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| Error::invalid_address(s, "missing ']'"))?;
        let port = after
            .strip_prefix(':')
            .ok_or_else(|| Error::invalid_address(s, "missing port"))?;
        return Ok((host, port));
    }

    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| Error::invalid_address(s, "missing port"))?;
    if host.contains(':') {
        return Err(Error::invalid_address(s, "too many colons"));
    }
    Ok((host, port))
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Address::Ipv4(*v4.ip(), v4.port()),
            SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
                Some(v4) => Address::Ipv4(v4, v6.port()),
                None => Address::Ipv6(*v6.ip(), v6.port()),
            },
        }
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse_str(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(ip, port) => write!(f, "{}:{}", ip, port),
            Address::Ipv6(ip, port) => write!(f, "[{}]:{}", ip, port),
            Address::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(addr: Address) {
        let bytes = addr.to_bytes();
        assert_eq!(bytes.len(), addr.encoded_len());
        let (parsed, used) = Address::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, addr);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn test_round_trip_each_type() {
        round_trip(Address::Ipv4(Ipv4Addr::new(10, 1, 2, 3), 8080));
        round_trip(Address::Ipv6("2001:db8::1".parse().unwrap(), 443));
        round_trip(Address::Domain("a".to_string(), 1));
        round_trip(Address::Domain("x".repeat(255), 65535));
    }

    #[tokio::test]
    async fn test_read_from_stream() {
        let addr = Address::Domain("example.com".to_string(), 80);
        let bytes = addr.to_bytes();
        let mut reader = &bytes[..];
        let parsed = Address::read_from(&mut reader).await.unwrap();
        assert_eq!(parsed, addr);
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_read_from_stream_rejects_unknown_type() {
        let bytes = [0x02u8, 1, 2, 3, 4, 0, 80];
        let mut reader = &bytes[..];
        let err = Address::read_from(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::AddrType(0x02)));
    }

    #[tokio::test]
    async fn test_read_from_stream_truncated() {
        let bytes = [ATYP_IPV4, 127, 0, 0];
        let mut reader = &bytes[..];
        let err = Address::read_from(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn test_from_bytes_bounds() {
        assert!(matches!(Address::from_bytes(&[]), Err(Error::BadRequest)));
        assert!(matches!(Address::from_bytes(&[ATYP_DOMAIN]), Err(Error::BadRequest)));
        assert!(matches!(
            Address::from_bytes(&[ATYP_DOMAIN, 5, b'a', b'b']),
            Err(Error::BadRequest)
        ));
        assert!(matches!(Address::from_bytes(&[0x07, 0, 0]), Err(Error::AddrType(0x07))));
    }

    #[test]
    fn test_from_bytes_leaves_trailing_payload() {
        let mut buf = Address::Ipv4(Ipv4Addr::LOCALHOST, 53).to_bytes();
        buf.extend_from_slice(b"payload");
        let (addr, used) = Address::from_bytes(&buf).unwrap();
        assert_eq!(addr.port(), 53);
        assert_eq!(&buf[used..], b"payload");
    }

    #[test]
    fn test_parse_str() {
        assert_eq!(
            Address::parse_str("127.0.0.1:1080").unwrap(),
            Address::Ipv4(Ipv4Addr::LOCALHOST, 1080)
        );
        assert_eq!(
            Address::parse_str("[::1]:53").unwrap(),
            Address::Ipv6(Ipv6Addr::LOCALHOST, 53)
        );
        assert_eq!(
            Address::parse_str("example.com:443").unwrap(),
            Address::Domain("example.com".to_string(), 443)
        );
        assert!(Address::parse_str("example.com").is_err());
        assert!(Address::parse_str("example.com:70000").is_err());
        assert!(Address::parse_str("::1:53").is_err());
        let long = format!("{}:80", "h".repeat(256));
        assert!(Address::parse_str(&long).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Address::Ipv4(Ipv4Addr::new(8, 8, 8, 8), 53).to_string(), "8.8.8.8:53");
        assert_eq!(Address::Ipv6(Ipv6Addr::LOCALHOST, 80).to_string(), "[::1]:80");
        assert_eq!(Address::Domain("host".into(), 22).to_string(), "host:22");
    }

    #[test]
    fn test_max_encoded_len() {
        let addr = Address::Domain("d".repeat(255), 1);
        assert_eq!(addr.encoded_len(), MAX_ADDR_LEN);
    }

    #[test]
    fn test_overlong_domain_is_truncated_consistently() {
        let addr = Address::Domain("d".repeat(300), 8080);
        let bytes = addr.to_bytes();
        assert_eq!(bytes.len(), addr.encoded_len());
        assert_eq!(bytes.len(), MAX_ADDR_LEN);
        assert_eq!(bytes[1] as usize, MAX_DOMAIN_LEN);
        assert_eq!(&bytes[bytes.len() - 2..], &8080u16.to_be_bytes());
    }
}
