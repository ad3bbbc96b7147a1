// ckv-common - Shared wire definitions for ClusterKV
//
// This crate defines the message codes, payload schemas, codec registry and
// frame parser used by both the client driver and the development server.

pub mod codes;
pub mod error;
pub mod framing;
pub mod messages;
pub mod registry;

// Re-export for convenience
pub use codes::*;
pub use error::*;
pub use framing::{Message, Parser, HEADER_LEN, MAX_FRAME_LEN};
pub use messages::*;
pub use registry::{Payload, Registry, Schema};
