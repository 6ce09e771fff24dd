//! Peer wire-protocol engine: handshake, framed messages, bitfields, and
//! the per-peer session state machine.
use rand::Rng;
use thiserror::Error;

pub mod bitfield;
pub mod handshake;
pub mod message;
pub mod session;

pub use bitfield::PeerBitfield;
pub use handshake::Handshake;
pub use message::{FrameParser, Message};

/// A peer address: an IPv4 dotted-quad string paired with a TCP port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    pub ip: std::net::Ipv4Addr,
    pub port: u16,
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Generates this process's local peer identity: `-PC0001-` followed by 12
/// decimal digits, 20 bytes total.
pub fn generate_peer_id() -> [u8; 20] {
    let prefix = b"-PC0001-";
    let mut id = [0u8; 20];
    id[..prefix.len()].copy_from_slice(prefix);

    let mut rng = rand::rng();
    for slot in &mut id[prefix.len()..] {
        *slot = b'0' + rng.random_range(0..10);
    }
    id
}

/// Errors raised by the peer protocol engine.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("handshake protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("peer connection stopped")]
    Stopped,
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;
