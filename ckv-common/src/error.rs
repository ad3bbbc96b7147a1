//! # Protocol Errors
//!
//! Purpose: Describe everything that can go wrong while encoding a payload or
//! turning a byte stream back into messages.
//!
//! Encoding failures surface synchronously to whoever builds a request.
//! Framing and decoding failures are fatal to the connection that produced
//! the bytes: a parser that reported one never yields another message.

use thiserror::Error;

/// Result type for codec and framing operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Codec and framing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The frame carried a code with no registered schema.
    #[error("unknown message code {0}")]
    UnknownCode(u8),

    /// The payload bytes did not decode under the schema for their code.
    #[error("malformed {name} payload: {source}")]
    Decode {
        name: &'static str,
        #[source]
        source: prost::DecodeError,
    },

    /// The payload handed to the encoder belongs to a different schema.
    #[error("payload does not match the schema for {name}")]
    PayloadMismatch { name: &'static str },

    /// The protobuf encoder rejected the payload.
    #[error("failed to encode {name} payload: {source}")]
    Encode {
        name: &'static str,
        #[source]
        source: prost::EncodeError,
    },

    /// A frame length of zero cannot even hold the code byte.
    #[error("frame length 0 is invalid")]
    EmptyFrame,

    /// The length prefix exceeds the sanity cap.
    #[error("frame length {len} exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// Bytes arrived while no request was waiting for them.
    #[error("received {len} unsolicited bytes")]
    Unsolicited { len: usize },

    /// The parser already failed; its stream is unusable.
    #[error("parser stopped after an earlier error: {0}")]
    Poisoned(Box<ProtocolError>),
}

impl ProtocolError {
    /// Returns true for errors raised while building a request.
    pub fn is_encoding(&self) -> bool {
        matches!(
            self,
            ProtocolError::PayloadMismatch { .. } | ProtocolError::Encode { .. }
        )
    }
}
