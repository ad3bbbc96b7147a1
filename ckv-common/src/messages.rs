//! # Payload Schemas
//!
//! Protobuf message definitions for every non-empty payload on the wire.
//!
//! Field tags follow the cluster's protocol definitions so the structs
//! interoperate with real cluster members. Fields this workspace never sets
//! are left out; prost skips unknown tags when decoding, so omitting them is
//! harmless.
//!
//! ## Notes
//! - Keys, buckets and values are raw bytes; the cluster is binary-safe.
//! - Only `ListBucketsResp` and `ListKeysResp` carry the `done` flag that
//!   terminates a streaming response.

/// Cluster-reported failure.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ErrorResp {
    #[prost(bytes = "vec", tag = "1")]
    pub errmsg: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub errcode: u32,
}

impl ErrorResp {
    pub fn new(errcode: u32, errmsg: impl Into<Vec<u8>>) -> Self {
        ErrorResp {
            errmsg: errmsg.into(),
            errcode,
        }
    }

    /// Error message as text, replacing invalid UTF-8.
    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.errmsg).into_owned()
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ServerInfoResp {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub node: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub server_version: Option<Vec<u8>>,
}

/// One sibling of a stored object.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Content {
    #[prost(bytes = "vec", tag = "1")]
    pub value: Vec<u8>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub content_type: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub charset: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub content_encoding: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub vtag: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "7")]
    pub last_mod: Option<u32>,
    #[prost(uint32, optional, tag = "8")]
    pub last_mod_usecs: Option<u32>,
    #[prost(bool, optional, tag = "11")]
    pub deleted: Option<bool>,
}

impl Content {
    /// Plain value with no metadata.
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Content {
            value: value.into(),
            ..Default::default()
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetReq {
    #[prost(bytes = "vec", tag = "1")]
    pub bucket: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub key: Vec<u8>,
    #[prost(uint32, optional, tag = "3")]
    pub r: Option<u32>,
    #[prost(uint32, optional, tag = "10")]
    pub timeout: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "13")]
    pub bucket_type: Option<Vec<u8>>,
}

impl GetReq {
    pub fn new(bucket: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        GetReq {
            bucket: bucket.into(),
            key: key.into(),
            ..Default::default()
        }
    }
}

/// An empty `content` list means the key was not found.
#[derive(Clone, PartialEq, prost::Message)]
pub struct GetResp {
    #[prost(message, repeated, tag = "1")]
    pub content: Vec<Content>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub vclock: Option<Vec<u8>>,
    #[prost(bool, optional, tag = "3")]
    pub unchanged: Option<bool>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PutReq {
    #[prost(bytes = "vec", tag = "1")]
    pub bucket: Vec<u8>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub vclock: Option<Vec<u8>>,
    #[prost(message, optional, tag = "4")]
    pub content: Option<Content>,
    #[prost(uint32, optional, tag = "5")]
    pub w: Option<u32>,
    #[prost(bool, optional, tag = "7")]
    pub return_body: Option<bool>,
    #[prost(uint32, optional, tag = "12")]
    pub timeout: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "16")]
    pub bucket_type: Option<Vec<u8>>,
}

impl PutReq {
    pub fn new(bucket: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>, content: Content) -> Self {
        PutReq {
            bucket: bucket.into(),
            key: Some(key.into()),
            content: Some(content),
            ..Default::default()
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PutResp {
    #[prost(message, repeated, tag = "1")]
    pub content: Vec<Content>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub vclock: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub key: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DelReq {
    #[prost(bytes = "vec", tag = "1")]
    pub bucket: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub key: Vec<u8>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub vclock: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "10")]
    pub timeout: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "13")]
    pub bucket_type: Option<Vec<u8>>,
}

impl DelReq {
    pub fn new(bucket: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        DelReq {
            bucket: bucket.into(),
            key: key.into(),
            ..Default::default()
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListBucketsReq {
    #[prost(uint32, optional, tag = "1")]
    pub timeout: Option<u32>,
    #[prost(bool, optional, tag = "2")]
    pub stream: Option<bool>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub bucket_type: Option<Vec<u8>>,
}

impl ListBucketsReq {
    /// Streaming listing; the non-streaming form is a single message.
    pub fn streaming() -> Self {
        ListBucketsReq {
            stream: Some(true),
            ..Default::default()
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListBucketsResp {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub buckets: Vec<Vec<u8>>,
    #[prost(bool, optional, tag = "2")]
    pub done: Option<bool>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListKeysReq {
    #[prost(bytes = "vec", tag = "1")]
    pub bucket: Vec<u8>,
    #[prost(uint32, optional, tag = "2")]
    pub timeout: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub bucket_type: Option<Vec<u8>>,
}

impl ListKeysReq {
    pub fn new(bucket: impl Into<Vec<u8>>) -> Self {
        ListKeysReq {
            bucket: bucket.into(),
            ..Default::default()
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListKeysResp {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub keys: Vec<Vec<u8>>,
    #[prost(bool, optional, tag = "2")]
    pub done: Option<bool>,
}

/// Credentials, only ever sent over the TLS session.
#[derive(Clone, PartialEq, prost::Message)]
pub struct AuthReq {
    #[prost(bytes = "vec", tag = "1")]
    pub user: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub password: Vec<u8>,
}
