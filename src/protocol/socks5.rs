//! SOCKS5 Frames (RFC 1928 / RFC 1929)
//!
//! Decoders capture version, command, method and status bytes verbatim. Callers
//! decide what is acceptable so they can reply with the precise error.

use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Error;
use crate::protocol::address::Address;
use crate::protocol::constants::*;

/// SOCKS commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Bind,
    UdpAssociate,
}

impl Command {
    pub fn code(&self) -> u8 {
        match self {
            Command::Connect => CMD_CONNECT,
            Command::Bind => CMD_BIND,
            Command::UdpAssociate => CMD_UDP_ASSOCIATE,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            CMD_CONNECT => Some(Command::Connect),
            CMD_BIND => Some(Command::Bind),
            CMD_UDP_ASSOCIATE => Some(Command::UdpAssociate),
            _ => None,
        }
    }
}

/// Authentication methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    NoAuth,
    UserPass,
    NoAcceptable,
}

impl AuthMethod {
    pub fn method_code(&self) -> u8 {
        match self {
            AuthMethod::NoAuth => METHOD_NONE,
            AuthMethod::UserPass => METHOD_USERPASS,
            AuthMethod::NoAcceptable => METHOD_NO_ACCEPTABLE,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            METHOD_NONE => Some(AuthMethod::NoAuth),
            METHOD_USERPASS => Some(AuthMethod::UserPass),
            METHOD_NO_ACCEPTABLE => Some(AuthMethod::NoAcceptable),
            _ => None,
        }
    }
}

/// Client greeting: `[ver, nmethods, methods...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSelectRequest {
    pub version: u8,
    pub methods: Vec<u8>,
}

impl MethodSelectRequest {
    pub fn new(methods: Vec<u8>) -> Self {
        Self {
            version: SOCKS5_VERSION,
            methods,
        }
    }

    pub async fn read_from<R>(reader: &mut R) -> Result<Self, Error>
    where
        R: AsyncRead + Unpin,
    {
        let version = reader.read_u8().await?;
        Self::read_after_version(version, reader).await
    }

    /// Read the rest of the greeting once the version byte has been consumed.
    pub async fn read_after_version<R>(version: u8, reader: &mut R) -> Result<Self, Error>
    where
        R: AsyncRead + Unpin,
    {
        let n_methods = reader.read_u8().await? as usize;
        let mut methods = vec![0u8; n_methods];
        reader.read_exact(&mut methods).await?;
        Ok(Self { version, methods })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.methods.len());
        buf.put_u8(self.version);
        buf.put_u8(self.methods.len() as u8);
        buf.put_slice(&self.methods);
        buf
    }
}

/// Server method choice: `[ver, method]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSelectReply {
    pub version: u8,
    pub method: u8,
}

impl MethodSelectReply {
    pub fn new(method: u8) -> Self {
        Self {
            version: SOCKS5_VERSION,
            method,
        }
    }

    pub async fn read_from<R>(reader: &mut R) -> Result<Self, Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).await?;
        Ok(Self {
            version: buf[0],
            method: buf[1],
        })
    }

    pub fn to_bytes(&self) -> [u8; 2] {
        [self.version, self.method]
    }
}

/// Username/password request: `[ver=0x01, ulen, user..., plen, pass...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPassRequest {
    pub version: u8,
    pub username: Vec<u8>,
    pub password: Vec<u8>,
}

impl UserPassRequest {
    /// Fields longer than 255 bytes cannot be expressed; callers validate lengths.
    pub fn new(username: &[u8], password: &[u8]) -> Self {
        Self {
            version: USERPASS_VERSION,
            username: username.to_vec(),
            password: password.to_vec(),
        }
    }

    pub async fn read_from<R>(reader: &mut R) -> Result<Self, Error>
    where
        R: AsyncRead + Unpin,
    {
        let version = reader.read_u8().await?;

        let ulen = reader.read_u8().await? as usize;
        let mut username = vec![0u8; ulen];
        reader.read_exact(&mut username).await?;

        let plen = reader.read_u8().await? as usize;
        let mut password = vec![0u8; plen];
        reader.read_exact(&mut password).await?;

        Ok(Self {
            version,
            username,
            password,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3 + self.username.len() + self.password.len());
        buf.put_u8(self.version);
        buf.put_u8(self.username.len() as u8);
        buf.put_slice(&self.username);
        buf.put_u8(self.password.len() as u8);
        buf.put_slice(&self.password);
        buf
    }
}

/// Username/password verdict: `[ver=0x01, status]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserPassReply {
    pub version: u8,
    pub status: u8,
}

impl UserPassReply {
    pub fn new(status: u8) -> Self {
        Self {
            version: USERPASS_VERSION,
            status,
        }
    }

    pub async fn read_from<R>(reader: &mut R) -> Result<Self, Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).await?;
        Ok(Self {
            version: buf[0],
            status: buf[1],
        })
    }

    pub fn to_bytes(&self) -> [u8; 2] {
        [self.version, self.status]
    }
}

/// Command request: `[ver, cmd, rsv, atyp, addr..., port]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub version: u8,
    pub command: u8,
    pub reserved: u8,
    pub address: Address,
}

impl Request {
    pub fn new(command: Command, address: Address) -> Self {
        Self {
            version: SOCKS5_VERSION,
            command: command.code(),
            reserved: RESERVED,
            address,
        }
    }

    pub async fn read_from<R>(reader: &mut R) -> Result<Self, Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; 3];
        reader.read_exact(&mut header).await?;
        let address = Address::read_from(reader).await?;
        Ok(Self {
            version: header[0],
            command: header[1],
            reserved: header[2],
            address,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3 + self.address.encoded_len());
        buf.put_u8(self.version);
        buf.put_u8(self.command);
        buf.put_u8(self.reserved);
        self.address.encode(&mut buf);
        buf
    }
}

/// Command reply: `[ver, rep, rsv, atyp, addr..., port]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub version: u8,
    pub reply: u8,
    pub reserved: u8,
    pub address: Address,
}

impl Reply {
    pub fn new(reply: u8, address: Address) -> Self {
        Self {
            version: SOCKS5_VERSION,
            reply,
            reserved: RESERVED,
            address,
        }
    }

    pub fn success(bound: Address) -> Self {
        Self::new(REP_SUCCESS, bound)
    }

    /// A failure reply carrying `0.0.0.0:0`.
    pub fn error(reply: u8) -> Self {
        Self::new(reply, Address::unspecified())
    }

    pub async fn read_from<R>(reader: &mut R) -> Result<Self, Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; 3];
        reader.read_exact(&mut header).await?;
        let address = Address::read_from(reader).await?;
        Ok(Self {
            version: header[0],
            reply: header[1],
            reserved: header[2],
            address,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3 + self.address.encoded_len());
        buf.put_u8(self.version);
        buf.put_u8(self.reply);
        buf.put_u8(self.reserved);
        self.address.encode(&mut buf);
        buf
    }
}

/// UDP envelope: `[rsv(2), frag, atyp, addr..., port, data...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpDatagram {
    pub reserved: [u8; 2],
    pub frag: u8,
    pub address: Address,
    pub data: Vec<u8>,
}

impl UdpDatagram {
    pub fn new(address: Address, data: Vec<u8>) -> Self {
        Self {
            reserved: [0, 0],
            frag: 0,
            address,
            data,
        }
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < 4 {
            return Err(Error::BadRequest);
        }
        let (address, used) = Address::from_bytes(&buf[3..])?;
        Ok(Self {
            reserved: [buf[0], buf[1]],
            frag: buf[2],
            address,
            data: buf[3 + used..].to_vec(),
        })
    }

    /// Reassembly is not supported; only standalone datagrams are relayed.
    pub fn ensure_unfragmented(&self) -> Result<(), Error> {
        if self.frag != 0 {
            return Err(Error::UdpFrag(self.frag));
        }
        Ok(())
    }

    pub fn encoded_len(&self) -> usize {
        3 + self.address.encoded_len() + self.data.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        encode_udp_header(&mut buf, self.frag, &self.address);
        buf.put_slice(&self.data);
        buf
    }
}

/// Write an envelope header for `address` followed by `payload` without an
/// intermediate copy of the payload into a `UdpDatagram`.
pub fn encode_udp_datagram(address: &Address, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(3 + address.encoded_len() + payload.len());
    encode_udp_header(&mut buf, 0, address);
    buf.put_slice(payload);
    buf
}

fn encode_udp_header<B: BufMut>(dst: &mut B, frag: u8, address: &Address) {
    dst.put_slice(&[0, 0]);
    dst.put_u8(frag);
    address.encode(dst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_method_select_request_wire_format() {
        let req = MethodSelectRequest::new(vec![METHOD_NONE, METHOD_USERPASS]);
        assert_eq!(req.to_bytes(), vec![0x05, 0x02, 0x00, 0x02]);

        let bytes = req.to_bytes();
        let mut reader = &bytes[..];
        assert_eq!(MethodSelectRequest::read_from(&mut reader).await.unwrap(), req);
    }

    #[tokio::test]
    async fn test_method_select_request_keeps_foreign_version() {
        let bytes = [0x04u8, 0x01, 0x00];
        let mut reader = &bytes[..];
        let req = MethodSelectRequest::read_from(&mut reader).await.unwrap();
        assert_eq!(req.version, 0x04);
        assert_eq!(req.methods, vec![0x00]);
    }

    #[tokio::test]
    async fn test_userpass_request_wire_format() {
        let req = UserPassRequest::new(b"user", b"pw");
        let bytes = req.to_bytes();
        assert_eq!(bytes, vec![0x01, 4, b'u', b's', b'e', b'r', 2, b'p', b'w']);

        let mut reader = &bytes[..];
        assert_eq!(UserPassRequest::read_from(&mut reader).await.unwrap(), req);
    }

    #[tokio::test]
    async fn test_request_wire_format() {
        let req = Request::new(
            Command::Connect,
            Address::Ipv4(Ipv4Addr::new(127, 0, 0, 1), 80),
        );
        let bytes = req.to_bytes();
        assert_eq!(bytes, vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0, 80]);

        let mut reader = &bytes[..];
        assert_eq!(Request::read_from(&mut reader).await.unwrap(), req);
    }

    #[tokio::test]
    async fn test_reply_error_carries_unspecified_address() {
        let reply = Reply::error(REP_CONNECTION_REFUSED);
        assert_eq!(
            reply.to_bytes(),
            vec![0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_udp_datagram_from_bytes() {
        let addr = Address::Domain("dns.example".to_string(), 53);
        let bytes = encode_udp_datagram(&addr, b"query");
        let datagram = UdpDatagram::from_bytes(&bytes).unwrap();
        assert_eq!(datagram.frag, 0);
        assert_eq!(datagram.address, addr);
        assert_eq!(datagram.data, b"query");
        assert_eq!(datagram.to_bytes(), bytes);
    }

    #[test]
    fn test_udp_datagram_fragment_rejected() {
        let mut bytes = encode_udp_datagram(&Address::Ipv4(Ipv4Addr::LOCALHOST, 53), b"x");
        bytes[2] = 1;
        let datagram = UdpDatagram::from_bytes(&bytes).unwrap();
        assert!(matches!(datagram.ensure_unfragmented(), Err(Error::UdpFrag(1))));
    }

    #[test]
    fn test_udp_datagram_too_short() {
        assert!(matches!(UdpDatagram::from_bytes(&[0, 0, 0]), Err(Error::BadRequest)));
        assert!(matches!(
            UdpDatagram::from_bytes(&[0, 0, 0, ATYP_IPV4, 1, 2]),
            Err(Error::BadRequest)
        ));
    }

    #[test]
    fn test_command_codes() {
        assert_eq!(Command::from_code(0x01), Some(Command::Connect));
        assert_eq!(Command::from_code(0x03), Some(Command::UdpAssociate));
        assert_eq!(Command::from_code(0x09), None);
        assert_eq!(AuthMethod::from_code(0xFF), Some(AuthMethod::NoAcceptable));
    }
}
