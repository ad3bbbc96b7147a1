//! # Codec Registry
//!
//! Purpose: Map every message code to the schema that encodes and decodes
//! its payload, and build complete wire frames for outgoing requests.
//!
//! ## Design Principles
//!
//! 1. **Explicit Construction**: `Registry::standard()` builds an immutable
//!    table once; callers share it as `Arc<Registry>` instead of consulting
//!    ambient global state.
//! 2. **Typed Payloads**: `Payload` has one variant per non-empty schema, so a
//!    mismatch between code and payload is detected before any byte is sent.
//! 3. **Opaque to the Transport**: the connection layer only asks two things
//!    of a decoded payload: is it an error, and does it carry `done = true`.
//!
//! ## Frame Example
//!
//! ```text
//! ListKeysResp { keys: ["A"] }:
//! +-------------+------+----------------+
//! | 00 00 00 04 | 0x12 | 0a 01 41       |
//! +-------------+------+----------------+
//! | length = 4  | code | payload (3B)   |
//! +-------------+------+----------------+
//! ```

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use prost::Message as _;

use crate::codes::MessageCode;
use crate::error::{ProtocolError, ProtocolResult};
use crate::framing::{HEADER_LEN, MAX_FRAME_LEN};
use crate::messages::{
    AuthReq, DelReq, ErrorResp, GetReq, GetResp, ListBucketsReq, ListBucketsResp, ListKeysReq,
    ListKeysResp, PutReq, PutResp, ServerInfoResp,
};

/// A decoded (or to-be-encoded) message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Body of every empty schema (ping, start-tls, ...).
    Empty,
    Error(ErrorResp),
    ServerInfo(ServerInfoResp),
    GetReq(GetReq),
    GetResp(GetResp),
    PutReq(PutReq),
    PutResp(PutResp),
    DelReq(DelReq),
    ListBucketsReq(ListBucketsReq),
    ListBucketsResp(ListBucketsResp),
    ListKeysReq(ListKeysReq),
    ListKeysResp(ListKeysResp),
    AuthReq(AuthReq),
}

impl Payload {
    /// Code of the schema this payload belongs to; `None` for `Empty`, which
    /// fits every empty schema.
    pub fn code(&self) -> Option<MessageCode> {
        let code = match self {
            Payload::Empty => return None,
            Payload::Error(_) => MessageCode::ErrorResp,
            Payload::ServerInfo(_) => MessageCode::GetServerInfoResp,
            Payload::GetReq(_) => MessageCode::GetReq,
            Payload::GetResp(_) => MessageCode::GetResp,
            Payload::PutReq(_) => MessageCode::PutReq,
            Payload::PutResp(_) => MessageCode::PutResp,
            Payload::DelReq(_) => MessageCode::DelReq,
            Payload::ListBucketsReq(_) => MessageCode::ListBucketsReq,
            Payload::ListBucketsResp(_) => MessageCode::ListBucketsResp,
            Payload::ListKeysReq(_) => MessageCode::ListKeysReq,
            Payload::ListKeysResp(_) => MessageCode::ListKeysResp,
            Payload::AuthReq(_) => MessageCode::AuthReq,
        };
        Some(code)
    }

    /// True when this payload terminates a streaming response.
    pub fn done(&self) -> bool {
        match self {
            Payload::ListKeysResp(resp) => resp.done.unwrap_or(false),
            Payload::ListBucketsResp(resp) => resp.done.unwrap_or(false),
            _ => false,
        }
    }

    /// The cluster-reported error carried by this payload, if any.
    pub fn as_error(&self) -> Option<&ErrorResp> {
        match self {
            Payload::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Encoded body length in bytes (excluding the frame header).
    pub fn encoded_len(&self) -> usize {
        match self {
            Payload::Empty => 0,
            Payload::Error(m) => m.encoded_len(),
            Payload::ServerInfo(m) => m.encoded_len(),
            Payload::GetReq(m) => m.encoded_len(),
            Payload::GetResp(m) => m.encoded_len(),
            Payload::PutReq(m) => m.encoded_len(),
            Payload::PutResp(m) => m.encoded_len(),
            Payload::DelReq(m) => m.encoded_len(),
            Payload::ListBucketsReq(m) => m.encoded_len(),
            Payload::ListBucketsResp(m) => m.encoded_len(),
            Payload::ListKeysReq(m) => m.encoded_len(),
            Payload::ListKeysResp(m) => m.encoded_len(),
            Payload::AuthReq(m) => m.encoded_len(),
        }
    }

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), prost::EncodeError> {
        match self {
            Payload::Empty => Ok(()),
            Payload::Error(m) => m.encode(buf),
            Payload::ServerInfo(m) => m.encode(buf),
            Payload::GetReq(m) => m.encode(buf),
            Payload::GetResp(m) => m.encode(buf),
            Payload::PutReq(m) => m.encode(buf),
            Payload::PutResp(m) => m.encode(buf),
            Payload::DelReq(m) => m.encode(buf),
            Payload::ListBucketsReq(m) => m.encode(buf),
            Payload::ListBucketsResp(m) => m.encode(buf),
            Payload::ListKeysReq(m) => m.encode(buf),
            Payload::ListKeysResp(m) => m.encode(buf),
            Payload::AuthReq(m) => m.encode(buf),
        }
    }
}

type DecodeFn = fn(&[u8]) -> Result<Payload, prost::DecodeError>;

/// Codec entry for one message code.
#[derive(Clone, Copy)]
pub struct Schema {
    code: MessageCode,
    decode: DecodeFn,
}

impl Schema {
    pub fn new(code: MessageCode, decode: DecodeFn) -> Self {
        Schema { code, decode }
    }

    /// Schema for a message with no body; any received bytes are ignored.
    pub fn empty(code: MessageCode) -> Self {
        Schema {
            code,
            decode: |_| Ok(Payload::Empty),
        }
    }

    pub fn code(&self) -> MessageCode {
        self.code
    }

    pub fn name(&self) -> &'static str {
        self.code.name()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("code", &self.code.as_u8())
            .field("name", &self.name())
            .finish()
    }
}

/// Immutable lookup from message code to schema.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    schemas: HashMap<u8, Schema>,
}

impl Registry {
    /// Registry with no schemas; add them with [`Registry::with_schema`].
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registry covering every code in [`MessageCode::ALL`].
    pub fn standard() -> Self {
        let mut registry = Registry::new();
        for code in MessageCode::ALL {
            let schema = if code.is_empty() {
                Schema::empty(code)
            } else {
                Schema::new(code, standard_decoder(code))
            };
            registry = registry.with_schema(schema);
        }
        registry
    }

    /// Adds or replaces the schema for `schema.code()`.
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schemas.insert(schema.code().as_u8(), schema);
        self
    }

    pub fn schema(&self, code: u8) -> Option<&Schema> {
        self.schemas.get(&code)
    }

    /// Reports whether `code` is registered as an empty message.
    pub fn is_empty(&self, code: u8) -> bool {
        self.schema(code).map(Schema::is_empty).unwrap_or(false)
    }

    /// Encoded body length of `payload`.
    pub fn encoding_length(&self, payload: &Payload) -> usize {
        payload.encoded_len()
    }

    /// Encodes only the message body for `code`.
    pub fn encode(&self, code: u8, payload: &Payload) -> ProtocolResult<Bytes> {
        let schema = self.checked_schema(code, payload)?;
        let mut buf = BytesMut::with_capacity(payload.encoded_len());
        payload
            .encode_body(&mut buf)
            .map_err(|source| ProtocolError::Encode {
                name: schema.name(),
                source,
            })?;
        Ok(buf.freeze())
    }

    /// Encodes a complete frame: length prefix, code byte, body.
    ///
    /// **Input**: message code and a payload of the matching schema.
    /// **Output**: wire bytes ready to be written to a socket.
    ///
    /// **Logic**:
    /// 1. Validate the payload against the schema registered for `code`.
    /// 2. Reject bodies that would exceed `MAX_FRAME_LEN`.
    /// 3. Write `len + 1` as big-endian u32, the code, then the body.
    pub fn encode_frame(&self, code: u8, payload: &Payload) -> ProtocolResult<Bytes> {
        let schema = self.checked_schema(code, payload)?;
        let body_len = payload.encoded_len();
        let frame_len = body_len + 1;
        if frame_len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge {
                len: frame_len,
                max: MAX_FRAME_LEN,
            });
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len);
        buf.put_u32(frame_len as u32);
        buf.put_u8(code);
        payload
            .encode_body(&mut buf)
            .map_err(|source| ProtocolError::Encode {
                name: schema.name(),
                source,
            })?;
        Ok(buf.freeze())
    }

    /// Decodes a message body received with `code`.
    pub fn decode(&self, code: u8, body: &[u8]) -> ProtocolResult<Payload> {
        let schema = self.schema(code).ok_or(ProtocolError::UnknownCode(code))?;
        (schema.decode)(body).map_err(|source| ProtocolError::Decode {
            name: schema.name(),
            source,
        })
    }

    fn checked_schema(&self, code: u8, payload: &Payload) -> ProtocolResult<&Schema> {
        let schema = self.schema(code).ok_or(ProtocolError::UnknownCode(code))?;
        let matches = if schema.is_empty() {
            matches!(payload, Payload::Empty)
        } else {
            payload.code() == Some(schema.code())
        };
        if !matches {
            return Err(ProtocolError::PayloadMismatch {
                name: schema.name(),
            });
        }
        Ok(schema)
    }
}

fn standard_decoder(code: MessageCode) -> DecodeFn {
    match code {
        MessageCode::ErrorResp => |b| ErrorResp::decode(b).map(Payload::Error),
        MessageCode::GetServerInfoResp => |b| ServerInfoResp::decode(b).map(Payload::ServerInfo),
        MessageCode::GetReq => |b| GetReq::decode(b).map(Payload::GetReq),
        MessageCode::GetResp => |b| GetResp::decode(b).map(Payload::GetResp),
        MessageCode::PutReq => |b| PutReq::decode(b).map(Payload::PutReq),
        MessageCode::PutResp => |b| PutResp::decode(b).map(Payload::PutResp),
        MessageCode::DelReq => |b| DelReq::decode(b).map(Payload::DelReq),
        MessageCode::ListBucketsReq => |b| ListBucketsReq::decode(b).map(Payload::ListBucketsReq),
        MessageCode::ListBucketsResp => {
            |b| ListBucketsResp::decode(b).map(Payload::ListBucketsResp)
        }
        MessageCode::ListKeysReq => |b| ListKeysReq::decode(b).map(Payload::ListKeysReq),
        MessageCode::ListKeysResp => |b| ListKeysResp::decode(b).map(Payload::ListKeysResp),
        MessageCode::AuthReq => |b| AuthReq::decode(b).map(Payload::AuthReq),
        // Empty schemas never reach here; decode them as empty anyway.
        _ => |_| Ok(Payload::Empty),
    }
}
