//! Per-peer connection state machine: handshake, framing, message
//! dispatch and request pacing (§4.6).
pub mod bitfield;
pub mod handshake;
pub mod message;
pub mod session;

pub use bitfield::Bitfield;
pub use handshake::Handshake;
pub use message::Message;
pub use session::{PeerSession, VerifiedPiece};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("invalid protocol identifier in handshake")]
    InvalidProtocol,

    #[error("info hash mismatch: remote is serving a different torrent")]
    InfoHashMismatch,

    #[error("frame length {0} exceeds the configured cap")]
    FrameTooLarge(u32),

    #[error("malformed message: {0}")]
    MalformedMessage(&'static str),

    #[error("connection idle for too long")]
    IdleTimeout,

    #[error("unknown message id {0}")]
    UnknownMessageId(u8),
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;
