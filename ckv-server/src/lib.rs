// ckv-server - In-memory cluster member for development and tests
//
// Speaks the same length-prefixed framing as a real cluster node and answers
// ping, server info, get, put, delete and the streaming listings from an
// in-memory store.

mod server;
mod stats;
mod store;

pub use server::{DevServer, ServerOptions, ERROR_CODE};
pub use stats::{ServerStats, StatsSnapshot};
pub use store::Store;
