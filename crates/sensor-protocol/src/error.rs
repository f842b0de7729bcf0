//! Protocol errors.

use thiserror::Error;

use crate::PacketKind;

/// Errors raised while framing or parsing packets.
///
/// On a command connection these are fatal to the connection, except
/// [`ProtocolError::InvalidValue`], which the daemon answers with a status.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown packet kind: {0}")]
    UnknownKind(i32),

    #[error("payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("truncated payload while reading {what}")]
    Truncated { what: &'static str },

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: i64 },

    #[error("unexpected packet: expected {expected:?}, got {got:?}")]
    UnexpectedPacket {
        expected: PacketKind,
        got: PacketKind,
    },

    #[error("event channel handshake rejected: {0}")]
    Handshake(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn truncated(what: &'static str) -> Self {
        Self::Truncated { what }
    }
}
