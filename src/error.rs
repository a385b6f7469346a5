//! Error types for Kinetica.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::protocol::MessageType;

/// Result type alias for Kinetica operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Kinetica.
#[derive(Error, Debug)]
pub enum Error {
    // Protocol errors
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // Transport errors
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("connection failed to {addr}: {reason}")]
    ConnectionFailed { addr: SocketAddr, reason: String },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection timeout")]
    ConnectionTimeout,

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of codec failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or truncated input (too short, bad magic).
    Framing,
    /// A specific field could not be read or written.
    Field,
    /// Footer mismatch; the bytes were damaged in transit.
    Integrity,
    /// The type tag is unknown or does not match the message.
    Type,
    /// The buffer is shorter than the header declares.
    InsufficientData,
}

/// Wire codec errors. Every one of them is fatal to a single packet only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("message too short: need at least {needed} bytes, got {got}")]
    MessageTooShort { needed: usize, got: usize },

    #[error("invalid magic bytes: got {}", hex::encode(.0))]
    InvalidMagicBytes([u8; 2]),

    #[error("binary decoding failed: failed to read {field}")]
    DecodingFailed { field: String },

    #[error("binary encoding failed: {field}: {reason}")]
    EncodingFailed { field: String, reason: String },

    #[error("footer validation failed: expected {}, got {}", hex::encode(.expected), hex::encode(.got))]
    InvalidFooter { expected: Vec<u8>, got: Vec<u8> },

    #[error("invalid message type: declared {declared:?}, message is {actual:?}")]
    InvalidMessageType {
        declared: MessageType,
        actual: MessageType,
    },

    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(i8),

    #[error("insufficient data to decode: need {needed} bytes, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("invalid fragment: {0}")]
    InvalidFragment(String),

    #[error("unknown transport CRC code: 0x{0:02x}")]
    UnknownTransportCrc(u8),

    #[error("relay nesting deeper than {0} levels")]
    RelayDepthExceeded(usize),
}

impl ProtocolError {
    pub(crate) fn decoding(field: impl Into<String>) -> Self {
        Self::DecodingFailed {
            field: field.into(),
        }
    }

    pub(crate) fn encoding(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EncodingFailed {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MessageTooShort { .. } | Self::InvalidMagicBytes(_) => ErrorKind::Framing,
            Self::DecodingFailed { .. }
            | Self::EncodingFailed { .. }
            | Self::PayloadTooLarge { .. }
            | Self::InvalidFragment(_)
            | Self::RelayDepthExceeded(_) => ErrorKind::Field,
            Self::InvalidFooter { .. } => ErrorKind::Integrity,
            Self::InvalidMessageType { .. }
            | Self::UnknownMessageType(_)
            | Self::UnknownTransportCrc(_) => ErrorKind::Type,
            Self::InsufficientData { .. } => ErrorKind::InsufficientData,
        }
    }
}

/// Transport layer errors.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("bind failed on {addr}: {reason}")]
    BindFailed { addr: SocketAddr, reason: String },

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("read timeout")]
    ReadTimeout,

    #[error("write timeout")]
    WriteTimeout,

    #[error("socket error: {0}")]
    SocketError(String),

    #[error("UDP error: {0}")]
    Udp(String),

    #[error("TCP error: {0}")]
    Tcp(String),
}

impl Error {
    /// Check if error is recoverable (should retry).
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::ConnectionTimeout | Error::Io(_) => true,
            Error::Transport(
                TransportError::SendFailed(_)
                | TransportError::ReceiveFailed(_)
                | TransportError::ReadTimeout
                | TransportError::WriteTimeout,
            ) => true,
            Error::Protocol(e) => e.kind() == ErrorKind::Integrity,
            _ => false,
        }
    }

    /// Check if the error only invalidates one packet and the connection can keep going.
    pub fn is_packet_error(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_) | Error::Transport(TransportError::MessageTooLarge { .. })
        )
    }

    /// Check if error indicates connection should be reset.
    pub fn should_reconnect(&self) -> bool {
        matches!(
            self,
            Error::ConnectionClosed | Error::ConnectionFailed { .. } | Error::ConnectionTimeout
        )
    }
}
