//! # ClusterKV Async Client
//!
//! Purpose: Drive a clustered key-value store over its length-prefixed binary
//! protocol, multiplexing many requests over a bounded set of connections.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: a [`Pool`] owns the connections, grows on
//!    demand and evicts idle ones.
//! 2. **One Request per Socket**: a [`Node`] never pipelines; the pool queues
//!    excess work instead.
//! 3. **Exactly-Once Completion**: every [`Job`] terminates once, through its
//!    callback or its response stream.
//! 4. **Protocol Clarity**: framing and schemas live in `ckv-common`.

mod client;
mod config;
mod error;
mod job;
mod node;
mod pool;
mod tls;

pub use client::{Client, NameStream};
pub use config::{Address, ClientConfig, Credentials, PoolConfig, DEFAULT_PORT};
pub use error::{ClientError, ClientResult};
pub use job::{response_stream, Callback, Job, JobKind, ResponseStream, StreamSink};
pub use node::{Node, NodeEvent, NodeId, NodeOptions};
pub use pool::{Pool, PoolPhase};

pub use ckv_common as protocol;
