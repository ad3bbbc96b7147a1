//! # Development Server
//!
//! Accept cluster-protocol connections, parse request frames, and answer
//! them from an in-memory store. Meant for local development and tests: it
//! speaks the same framing as a real cluster member but has no replication,
//! persistence or security.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ckv_common::{
    Content, ErrorResp, GetResp, ListBucketsResp, ListKeysResp, Message, MessageCode, Parser,
    Payload, PutResp, Registry, ServerInfoResp,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::stats::{ServerStats, StatsSnapshot};
use crate::store::Store;

/// Error code used for every error response.
pub const ERROR_CODE: u32 = 1;

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Pause before answering each request.
    pub response_delay: Duration,
    /// Keys (or bucket names) per listing response message.
    pub key_chunk: usize,
    /// Reported by GetServerInfo.
    pub node_name: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            response_delay: Duration::ZERO,
            key_chunk: 10,
            node_name: "ckv@127.0.0.1".to_string(),
        }
    }
}

struct Shared {
    options: ServerOptions,
    registry: Arc<Registry>,
    store: Store,
    stats: ServerStats,
}

/// Running server; dropping it does not stop the accept loop, call
/// [`DevServer::shutdown`].
pub struct DevServer {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    kick: broadcast::Sender<()>,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl DevServer {
    /// Binds the listener and starts accepting in the background.
    pub async fn bind(addr: impl ToSocketAddrs, options: ServerOptions) -> io::Result<DevServer> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let shared = Arc::new(Shared {
            options,
            registry: Arc::new(Registry::standard()),
            store: Store::new(),
            stats: ServerStats::new(),
        });
        let (kick, _) = broadcast::channel(4);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            shared.clone(),
            kick.clone(),
            shutdown_rx,
        ));
        info!(addr = %local_addr, "dev server listening");

        Ok(DevServer {
            local_addr,
            shared,
            kick,
            shutdown,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn store(&self) -> &Store {
        &self.shared.store
    }

    /// Ends every client connection; the listener keeps accepting.
    pub fn disconnect_all(&self) {
        let _ = self.kick.send(());
    }

    /// Stops accepting and ends every client connection.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        self.disconnect_all();
        let _ = self.accept_task.await;
        info!(addr = %self.local_addr, "dev server stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    kick: broadcast::Sender<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let shared = shared.clone();
                    let kicked = kick.subscribe();
                    tokio::spawn(async move {
                        shared.stats.connection_opened();
                        debug!(peer = %peer, "client connected");
                        if let Err(err) = handle_connection(stream, &shared, kicked).await {
                            debug!(peer = %peer, error = %err, "connection ended with error");
                        }
                        shared.stats.connection_closed();
                    });
                }
                Err(err) => warn!(error = %err, "accept failed"),
            },
            _ = shutdown.changed() => break,
        }
    }
}

/// Handles a single client connection.
async fn handle_connection(
    mut stream: TcpStream,
    shared: &Shared,
    mut kicked: broadcast::Receiver<()>,
) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let mut parser = Parser::new(shared.registry.clone());

    loop {
        let bytes = tokio::select! {
            read = stream.read_buf(parser.buffer_mut()) => read?,
            _ = kicked.recv() => return Ok(()),
        };
        if bytes == 0 {
            return Ok(());
        }

        loop {
            match parser.next_message() {
                Ok(Some(message)) => {
                    shared.stats.record_request();
                    if !shared.options.response_delay.is_zero() {
                        tokio::time::sleep(shared.options.response_delay).await;
                    }
                    for frame in respond(message, shared)? {
                        stream.write_all(&frame).await?;
                    }
                    stream.flush().await?;
                }
                Ok(None) => break,
                Err(err) => {
                    shared.stats.record_error();
                    let frame = encode(shared, error_response(format!("protocol error: {}", err)))?;
                    stream.write_all(&frame).await?;
                    return Ok(());
                }
            }
        }
    }
}

/// Builds the response frames for one request.
fn respond(message: Message, shared: &Shared) -> io::Result<Vec<Bytes>> {
    let responses = dispatch(message, shared);
    let mut frames = Vec::with_capacity(responses.len());
    for response in responses {
        if response.0 == MessageCode::ErrorResp {
            shared.stats.record_error();
        }
        frames.push(encode(shared, response)?);
    }
    Ok(frames)
}

fn dispatch(message: Message, shared: &Shared) -> Vec<(MessageCode, Payload)> {
    let code = match message.message_code() {
        Some(code) => code,
        None => return vec![error_response(format!("unknown message code {}", message.code))],
    };
    let store = &shared.store;

    match (code, message.payload) {
        (MessageCode::PingReq, _) => vec![(MessageCode::PingResp, Payload::Empty)],
        (MessageCode::GetServerInfoReq, _) => {
            let info = ServerInfoResp {
                node: Some(shared.options.node_name.clone().into_bytes()),
                server_version: Some(
                    concat!("ckv-server ", env!("CARGO_PKG_VERSION"))
                        .as_bytes()
                        .to_vec(),
                ),
            };
            vec![(MessageCode::GetServerInfoResp, Payload::ServerInfo(info))]
        }
        (MessageCode::GetReq, Payload::GetReq(req)) => {
            let content = store
                .get(&req.bucket, &req.key)
                .map(|value| vec![Content::new(value)])
                .unwrap_or_default();
            let resp = GetResp {
                content,
                ..Default::default()
            };
            vec![(MessageCode::GetResp, Payload::GetResp(resp))]
        }
        (MessageCode::PutReq, Payload::PutReq(req)) => {
            let key = match req.key {
                Some(key) => key,
                None => return vec![error_response("a key is required")],
            };
            let value = req.content.map(|c| c.value).unwrap_or_default();
            let body = if req.return_body.unwrap_or(false) {
                vec![Content::new(value.clone())]
            } else {
                Vec::new()
            };
            store.put(&req.bucket, &key, value);
            let resp = PutResp {
                content: body,
                ..Default::default()
            };
            vec![(MessageCode::PutResp, Payload::PutResp(resp))]
        }
        (MessageCode::DelReq, Payload::DelReq(req)) => {
            store.delete(&req.bucket, &req.key);
            vec![(MessageCode::DelResp, Payload::Empty)]
        }
        (MessageCode::ListBucketsReq, _) => {
            let chunk = shared.options.key_chunk.max(1);
            let mut responses: Vec<_> = store
                .buckets()
                .chunks(chunk)
                .map(|names| {
                    let resp = ListBucketsResp {
                        buckets: names.to_vec(),
                        done: None,
                    };
                    (MessageCode::ListBucketsResp, Payload::ListBucketsResp(resp))
                })
                .collect();
            let done = ListBucketsResp {
                buckets: Vec::new(),
                done: Some(true),
            };
            responses.push((MessageCode::ListBucketsResp, Payload::ListBucketsResp(done)));
            responses
        }
        (MessageCode::ListKeysReq, Payload::ListKeysReq(req)) => {
            let chunk = shared.options.key_chunk.max(1);
            let mut responses: Vec<_> = store
                .keys(&req.bucket)
                .chunks(chunk)
                .map(|keys| {
                    let resp = ListKeysResp {
                        keys: keys.to_vec(),
                        done: None,
                    };
                    (MessageCode::ListKeysResp, Payload::ListKeysResp(resp))
                })
                .collect();
            let done = ListKeysResp {
                keys: Vec::new(),
                done: Some(true),
            };
            responses.push((MessageCode::ListKeysResp, Payload::ListKeysResp(done)));
            responses
        }
        (MessageCode::StartTls, _) => vec![error_response("TLS is not enabled on this server")],
        (MessageCode::AuthReq, _) => vec![error_response("security is not enabled")],
        (code, _) => vec![error_response(format!("unsupported message {}", code))],
    }
}

fn error_response(message: impl Into<Vec<u8>>) -> (MessageCode, Payload) {
    (
        MessageCode::ErrorResp,
        Payload::Error(ErrorResp::new(ERROR_CODE, message)),
    )
}

fn encode(shared: &Shared, (code, payload): (MessageCode, Payload)) -> io::Result<Bytes> {
    shared
        .registry
        .encode_frame(code.as_u8(), &payload)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}
