//! # Client Errors
//!
//! Every failure a job, a connection or the pool can report. The type is
//! `Clone` so a single connection error can be delivered to the job in
//! flight and broadcast on the pool's error channel at the same time.

use std::io;
use std::sync::Arc;

use ckv_common::{ErrorResp, ProtocolError};
use thiserror::Error;

/// Result type for the async client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by nodes, the pool and the convenience client.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The payload did not fit the schema of its code; nothing was sent.
    #[error("failed to encode request: {0}")]
    Encode(#[source] ProtocolError),

    /// The cluster answered with an error message. The connection stays
    /// healthy.
    #[error("server error {code}: {message}")]
    Server { code: u32, message: String },

    /// Framing or decoding failure; fatal to the connection.
    #[error("protocol error: {0}")]
    Protocol(#[source] ProtocolError),

    /// Socket failure; fatal to the connection.
    #[error("io error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// TLS upgrade failed during the security handshake.
    #[error("tls error: {0}")]
    Tls(String),

    /// Connecting took longer than the configured connect timeout.
    #[error("connect timed out")]
    ConnectTimeout,

    /// No response arrived within the client's request timeout.
    #[error("request timed out")]
    RequestTimeout,

    /// The connection or pool closed before the request completed.
    #[error("connection closed")]
    ConnectionClosed,

    /// A second request was handed to a busy connection.
    #[error("node is in use")]
    NodeInUse,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Response payload type did not match the request.
    #[error("unexpected response")]
    UnexpectedResponse,
}

impl ClientError {
    /// Returns true for errors that tear down the connection they occurred on.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ClientError::Protocol(_)
                | ClientError::Io(_)
                | ClientError::Tls(_)
                | ClientError::ConnectTimeout
        )
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        ClientError::Io(Arc::new(err))
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        ClientError::Protocol(err)
    }
}

impl From<&ErrorResp> for ClientError {
    fn from(resp: &ErrorResp) -> Self {
        ClientError::Server {
            code: resp.errcode,
            message: resp.message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_wire_messages() {
        assert_eq!(ClientError::ConnectionClosed.to_string(), "connection closed");
        assert_eq!(ClientError::NodeInUse.to_string(), "node is in use");
    }

    #[test]
    fn test_server_error_from_response() {
        let err = ClientError::from(&ErrorResp::new(42, "no such bucket"));
        assert_eq!(err.to_string(), "server error 42: no such bucket");
        assert!(!err.is_connection_error());
    }

    #[test]
    fn test_io_error_is_clone() {
        let err = ClientError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        let copy = err.clone();
        assert!(copy.is_connection_error());
        assert!(copy.to_string().contains("reset"));
    }
}
