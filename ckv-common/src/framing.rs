//! # Frame Parser
//!
//! Purpose: Turn an arbitrarily fragmented byte stream into discrete decoded
//! messages.
//!
//! ## Design Principles
//! 1. **Incremental**: bytes may arrive split anywhere, including inside the
//!    five-byte header; partial frames stay buffered until complete.
//! 2. **Buffer Reuse**: the parser owns one `BytesMut` that sockets read into
//!    directly, and complete bodies are split off without copying.
//! 3. **Fail Fast**: an unknown code or malformed body poisons the parser; it
//!    never produces output again and the connection must be torn down.
//! 4. **Always Progress**: every loop step either consumes bytes or returns.

use std::sync::Arc;

use bytes::{Buf, BytesMut};

use crate::codes::MessageCode;
use crate::error::{ProtocolError, ProtocolResult};
use crate::registry::{Payload, Registry};

/// Length prefix (4 bytes) plus message code (1 byte).
pub const HEADER_LEN: usize = 5;

/// Sanity cap on the length prefix (64 MiB).
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub code: u8,
    pub payload: Payload,
}

impl Message {
    pub fn message_code(&self) -> Option<MessageCode> {
        MessageCode::from_u8(self.code)
    }

    /// True for the distinguished cluster error type.
    pub fn is_error(&self) -> bool {
        self.code == MessageCode::ErrorResp.as_u8()
    }

    /// True when the payload terminates a streaming response.
    pub fn done(&self) -> bool {
        self.payload.done()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingHeader,
    AwaitingPayload { code: u8, len: usize },
}

/// Stateful frame demultiplexer. One instance per connection.
pub struct Parser {
    registry: Arc<Registry>,
    buffer: BytesMut,
    state: State,
    failed: Option<ProtocolError>,
}

impl Parser {
    pub fn new(registry: Arc<Registry>) -> Self {
        Parser {
            registry,
            buffer: BytesMut::with_capacity(8 * 1024),
            state: State::AwaitingHeader,
            failed: None,
        }
    }

    /// Appends a chunk of received bytes.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Direct access for `read_buf`, so sockets fill the tail buffer in place.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Number of bytes held that do not yet form a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// True when no partial frame is pending.
    pub fn is_idle(&self) -> bool {
        self.state == State::AwaitingHeader && self.buffer.is_empty()
    }

    pub fn is_failed(&self) -> bool {
        self.failed.is_some()
    }

    /// Returns the next complete message, or `Ok(None)` when more bytes are
    /// needed.
    ///
    /// **Logic**:
    /// 1. Awaiting header: need 5 bytes; read the length and code, validate
    ///    the length, consume the header.
    /// 2. Awaiting payload: need `length - 1` bytes; split them off, decode
    ///    through the registry, return to awaiting header.
    pub fn next_message(&mut self) -> ProtocolResult<Option<Message>> {
        if let Some(err) = &self.failed {
            return Err(ProtocolError::Poisoned(Box::new(err.clone())));
        }

        loop {
            match self.state {
                State::AwaitingHeader => {
                    if self.buffer.len() < HEADER_LEN {
                        return Ok(None);
                    }
                    let frame_len = u32::from_be_bytes([
                        self.buffer[0],
                        self.buffer[1],
                        self.buffer[2],
                        self.buffer[3],
                    ]) as usize;
                    let code = self.buffer[4];

                    if frame_len == 0 {
                        return Err(self.fail(ProtocolError::EmptyFrame));
                    }
                    if frame_len > MAX_FRAME_LEN {
                        return Err(self.fail(ProtocolError::FrameTooLarge {
                            len: frame_len,
                            max: MAX_FRAME_LEN,
                        }));
                    }

                    self.buffer.advance(HEADER_LEN);
                    self.state = State::AwaitingPayload {
                        code,
                        len: frame_len - 1,
                    };
                }
                State::AwaitingPayload { code, len } => {
                    if self.buffer.len() < len {
                        return Ok(None);
                    }
                    let body = self.buffer.split_to(len);
                    self.state = State::AwaitingHeader;

                    return match self.registry.decode(code, &body) {
                        Ok(payload) => Ok(Some(Message { code, payload })),
                        Err(err) => Err(self.fail(err)),
                    };
                }
            }
        }
    }

    /// Returns every complete message currently buffered.
    pub fn drain(&mut self) -> ProtocolResult<Vec<Message>> {
        let mut messages = Vec::new();
        while let Some(message) = self.next_message()? {
            messages.push(message);
        }
        Ok(messages)
    }

    fn fail(&mut self, err: ProtocolError) -> ProtocolError {
        tracing::debug!(error = %err, "frame parser stopped");
        self.buffer.clear();
        self.failed = Some(err.clone());
        err
    }
}
