// codes.rs - message type codes for the ClusterKV wire protocol
//
// Every frame on the wire carries a one-byte message code right after the
// four-byte length prefix. The code selects the payload schema used to
// decode the remaining bytes.
//
// ============================================================================
// FRAME LAYOUT
// ============================================================================
//
//   +----------------+---------+---------------------------+
//   | length: u32 BE | code:u8 | payload: length - 1 bytes |
//   +----------------+---------+---------------------------+
//
// `length` counts the code byte plus the payload, so an empty message is the
// five bytes `[0, 0, 0, 1, code]`.
//
// ============================================================================
// REQUEST / RESPONSE PAIRING
// ============================================================================
//
// Requests use odd codes and their responses the following even code, with
// three exceptions:
//
// - ErrorResp (0) may answer any request.
// - The security handshake lives at the top of the code space
//   (AuthReq 253, AuthResp 254, StartTls 255). StartTls is both the request
//   and the acknowledgement.
// - Streaming requests (ListBuckets, ListKeys) are answered by one or more
//   responses; the last one carries `done = true`.

/// Cluster-reported failure; payload is `ErrorResp`.
pub const MSG_ERROR_RESP: u8 = 0;
/// Liveness probe (empty).
pub const MSG_PING_REQ: u8 = 1;
/// Liveness answer (empty).
pub const MSG_PING_RESP: u8 = 2;
/// Request node name and server version (empty).
pub const MSG_GET_SERVER_INFO_REQ: u8 = 7;
/// Node name and server version.
pub const MSG_GET_SERVER_INFO_RESP: u8 = 8;
/// Fetch one object.
pub const MSG_GET_REQ: u8 = 9;
/// Object siblings and vector clock.
pub const MSG_GET_RESP: u8 = 10;
/// Store one object.
pub const MSG_PUT_REQ: u8 = 11;
/// Optional stored body and generated key.
pub const MSG_PUT_RESP: u8 = 12;
/// Delete one object.
pub const MSG_DEL_REQ: u8 = 13;
/// Delete acknowledgement (empty).
pub const MSG_DEL_RESP: u8 = 14;
/// List bucket names (streaming).
pub const MSG_LIST_BUCKETS_REQ: u8 = 15;
/// A batch of bucket names.
pub const MSG_LIST_BUCKETS_RESP: u8 = 16;
/// List keys in a bucket (streaming).
pub const MSG_LIST_KEYS_REQ: u8 = 17;
/// A batch of keys.
pub const MSG_LIST_KEYS_RESP: u8 = 18;
/// Credentials, sent over the TLS session.
pub const MSG_AUTH_REQ: u8 = 253;
/// Authentication accepted (empty).
pub const MSG_AUTH_RESP: u8 = 254;
/// Ask the server to upgrade the socket to TLS (empty).
pub const MSG_START_TLS: u8 = 255;

// ============================================================================
// CODE ENUMERATION
// ============================================================================

/// All message codes understood by this workspace.
///
/// Unknown codes on the wire are a fatal framing error, so the decoder only
/// ever produces values of this enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCode {
    ErrorResp = MSG_ERROR_RESP,
    PingReq = MSG_PING_REQ,
    PingResp = MSG_PING_RESP,
    GetServerInfoReq = MSG_GET_SERVER_INFO_REQ,
    GetServerInfoResp = MSG_GET_SERVER_INFO_RESP,
    GetReq = MSG_GET_REQ,
    GetResp = MSG_GET_RESP,
    PutReq = MSG_PUT_REQ,
    PutResp = MSG_PUT_RESP,
    DelReq = MSG_DEL_REQ,
    DelResp = MSG_DEL_RESP,
    ListBucketsReq = MSG_LIST_BUCKETS_REQ,
    ListBucketsResp = MSG_LIST_BUCKETS_RESP,
    ListKeysReq = MSG_LIST_KEYS_REQ,
    ListKeysResp = MSG_LIST_KEYS_RESP,
    AuthReq = MSG_AUTH_REQ,
    AuthResp = MSG_AUTH_RESP,
    StartTls = MSG_START_TLS,
}

impl MessageCode {
    /// Every known code, in wire order.
    pub const ALL: [MessageCode; 18] = [
        Self::ErrorResp,
        Self::PingReq,
        Self::PingResp,
        Self::GetServerInfoReq,
        Self::GetServerInfoResp,
        Self::GetReq,
        Self::GetResp,
        Self::PutReq,
        Self::PutResp,
        Self::DelReq,
        Self::DelResp,
        Self::ListBucketsReq,
        Self::ListBucketsResp,
        Self::ListKeysReq,
        Self::ListKeysResp,
        Self::AuthReq,
        Self::AuthResp,
        Self::StartTls,
    ];

    /// Convert code to its wire byte
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to create a code from its wire byte
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            MSG_ERROR_RESP => Some(Self::ErrorResp),
            MSG_PING_REQ => Some(Self::PingReq),
            MSG_PING_RESP => Some(Self::PingResp),
            MSG_GET_SERVER_INFO_REQ => Some(Self::GetServerInfoReq),
            MSG_GET_SERVER_INFO_RESP => Some(Self::GetServerInfoResp),
            MSG_GET_REQ => Some(Self::GetReq),
            MSG_GET_RESP => Some(Self::GetResp),
            MSG_PUT_REQ => Some(Self::PutReq),
            MSG_PUT_RESP => Some(Self::PutResp),
            MSG_DEL_REQ => Some(Self::DelReq),
            MSG_DEL_RESP => Some(Self::DelResp),
            MSG_LIST_BUCKETS_REQ => Some(Self::ListBucketsReq),
            MSG_LIST_BUCKETS_RESP => Some(Self::ListBucketsResp),
            MSG_LIST_KEYS_REQ => Some(Self::ListKeysReq),
            MSG_LIST_KEYS_RESP => Some(Self::ListKeysResp),
            MSG_AUTH_REQ => Some(Self::AuthReq),
            MSG_AUTH_RESP => Some(Self::AuthResp),
            MSG_START_TLS => Some(Self::StartTls),
            _ => None,
        }
    }

    /// Schema name as used in the cluster's protocol definitions
    pub const fn name(self) -> &'static str {
        match self {
            Self::ErrorResp => "RpbErrorResp",
            Self::PingReq => "RpbPingReq",
            Self::PingResp => "RpbPingResp",
            Self::GetServerInfoReq => "RpbGetServerInfoReq",
            Self::GetServerInfoResp => "RpbGetServerInfoResp",
            Self::GetReq => "RpbGetReq",
            Self::GetResp => "RpbGetResp",
            Self::PutReq => "RpbPutReq",
            Self::PutResp => "RpbPutResp",
            Self::DelReq => "RpbDelReq",
            Self::DelResp => "RpbDelResp",
            Self::ListBucketsReq => "RpbListBucketsReq",
            Self::ListBucketsResp => "RpbListBucketsResp",
            Self::ListKeysReq => "RpbListKeysReq",
            Self::ListKeysResp => "RpbListKeysResp",
            Self::AuthReq => "RpbAuthReq",
            Self::AuthResp => "RpbAuthResp",
            Self::StartTls => "RpbStartTls",
        }
    }

    /// Check if the message carries no payload at all
    pub const fn is_empty(self) -> bool {
        matches!(
            self,
            Self::PingReq
                | Self::PingResp
                | Self::GetServerInfoReq
                | Self::DelResp
                | Self::AuthResp
                | Self::StartTls
        )
    }

    /// Check if the request is answered by a `done`-terminated sequence
    pub const fn is_streaming_request(self) -> bool {
        matches!(self, Self::ListBucketsReq | Self::ListKeysReq)
    }
}

impl std::fmt::Display for MessageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// TESTS
// ============================================================================
