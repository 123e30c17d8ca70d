//! SOCKS Protocol Implementation
//!
//! Wire codecs for SOCKS5 and SOCKS4/4a. Nothing here touches sockets beyond
//! reading from an `AsyncRead`.

pub mod address;
pub mod constants;
pub mod socks4;
pub mod socks5;

pub use address::Address;
pub use constants::*;
pub use socks4::{Socks4Reply, Socks4Request};
pub use socks5::{
    AuthMethod, Command, MethodSelectReply, MethodSelectRequest, Reply, Request, UdpDatagram,
    UserPassReply, UserPassRequest,
};
