//! Data Relay Module
//!
//! Destination dialing and the bidirectional byte relay between client and target.

pub mod dial;
pub mod pipe;
pub mod session;

pub use dial::{connect_to_target, DialFailure};
pub use pipe::pipe;
pub use session::RelaySession;
