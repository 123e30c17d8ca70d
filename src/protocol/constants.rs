//! SOCKS Protocol Constants

// Protocol versions
pub const SOCKS4_VERSION: u8 = 0x04;
pub const SOCKS5_VERSION: u8 = 0x05;

// Commands (shared by both versions)
pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

// Address Types
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

// Authentication Methods
pub const METHOD_NONE: u8 = 0x00;
pub const METHOD_USERPASS: u8 = 0x02;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

// SOCKS5 reply codes
pub const REP_SUCCESS: u8 = 0x00;
pub const REP_SERVER_FAILURE: u8 = 0x01;
pub const REP_RULE_FAILURE: u8 = 0x02;
pub const REP_NETWORK_UNREACHABLE: u8 = 0x03;
pub const REP_HOST_UNREACHABLE: u8 = 0x04;
pub const REP_CONNECTION_REFUSED: u8 = 0x05;
pub const REP_TTL_EXPIRED: u8 = 0x06;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

// SOCKS4 reply codes
pub const REP4_GRANTED: u8 = 0x5A;
pub const REP4_REJECTED: u8 = 0x5B;
pub const REP4_NO_IDENTD: u8 = 0x5C;
pub const REP4_INVALID_USER: u8 = 0x5D;

// Reserved field value
pub const RESERVED: u8 = 0x00;

// Username/Password authentication (RFC 1929)
pub const USERPASS_VERSION: u8 = 0x01;
pub const USERPASS_SUCCESS: u8 = 0x00;
pub const USERPASS_FAILURE: u8 = 0x01;

pub const IPV4_LEN: usize = 4;
pub const IPV6_LEN: usize = 16;
pub const PORT_LEN: usize = 2;
pub const MAX_DOMAIN_LEN: usize = 255;

/// Largest encoded address: tag, length, host bytes, port.
pub const MAX_ADDR_LEN: usize = 1 + 1 + MAX_DOMAIN_LEN + PORT_LEN;

/// Per-direction copy buffer for the TCP relay.
pub const SOCKET_BUF_SIZE: usize = 20480;

/// Largest UDP payload the relay will receive in one datagram.
pub const MAX_SEGMENT_SIZE: usize = 65535;
