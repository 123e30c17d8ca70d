//! Protocol Error Types

use std::io;
use thiserror::Error;

/// Errors raised while speaking SOCKS4/SOCKS5 on a single connection or datagram.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported socks version {0:#04x}")]
    Version(u8),

    #[error("unrecognized address type {0:#04x}")]
    AddrType(u8),

    #[error("bad request")]
    BadRequest,

    #[error("fragmented udp datagrams are not supported (frag={0})")]
    UdpFrag(u8),

    #[error("invalid address {addr:?}: {reason}")]
    InvalidAddress { addr: String, reason: &'static str },

    #[error("no acceptable authentication method")]
    MethodNoAcceptable,

    #[error("unsupported username/password auth version {0:#04x}")]
    AuthVersion(u8),

    #[error("user authentication failed")]
    AuthFailed,

    #[error("unsupported authentication method {0:#04x}")]
    Method(u8),

    #[error("command {0:#04x} not supported")]
    CommandNotSupported(u8),

    #[error("reply failure: {0:#04x}")]
    ReplyFailure(u8),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Coarse classification used to decide how an error is reported and logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unsupported wire data. Fatal to the connection or datagram.
    Protocol,
    /// Credential or method negotiation failure. Fatal to the connection.
    Authentication,
    /// The destination could not be reached.
    Destination,
    /// Peer disconnects, timeouts and other transport failures.
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Version(_)
            | Error::AddrType(_)
            | Error::BadRequest
            | Error::UdpFrag(_)
            | Error::InvalidAddress { .. }
            | Error::CommandNotSupported(_) => ErrorKind::Protocol,
            Error::MethodNoAcceptable
            | Error::AuthVersion(_)
            | Error::AuthFailed
            | Error::Method(_) => ErrorKind::Authentication,
            Error::ReplyFailure(_) => ErrorKind::Destination,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// True for endings that are part of normal operation: the peer hung up or
    /// an idle deadline fired.
    pub fn is_benign(&self) -> bool {
        match self {
            Error::Io(e) => is_benign_io(e),
            _ => false,
        }
    }

    pub(crate) fn invalid_address(addr: impl Into<String>, reason: &'static str) -> Self {
        Error::InvalidAddress {
            addr: addr.into(),
            reason,
        }
    }
}

/// EOF, resets and deadline expiry all end a connection without indicating a fault.
pub fn is_benign_io(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

pub(crate) fn timed_out(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{} timed out", what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::AddrType(9).kind(), ErrorKind::Protocol);
        assert_eq!(Error::UdpFrag(1).kind(), ErrorKind::Protocol);
        assert_eq!(Error::AuthFailed.kind(), ErrorKind::Authentication);
        assert_eq!(Error::MethodNoAcceptable.kind(), ErrorKind::Authentication);
        assert_eq!(Error::ReplyFailure(5).kind(), ErrorKind::Destination);
    }

    #[test]
    fn test_benign_io() {
        let eof: Error = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert!(eof.is_benign());
        assert!(Error::Io(timed_out("read")).is_benign());
        assert!(!Error::BadRequest.is_benign());
        let other: Error = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert!(!other.is_benign());
    }
}
