//! # Cluster Node Connection
//!
//! Purpose: Own one socket to one cluster member and run at most one request
//! on it at a time.
//!
//! ## Design Principles
//! 1. **Task per Connection**: a spawned task exclusively owns the socket and
//!    its [`Parser`]; the cloneable [`Node`] handle only holds shared flags and
//!    a job channel.
//! 2. **Synchronous Claim**: `try_send` marks the node in use before the task
//!    sees the job, so two callers can never both claim it.
//! 3. **Exactly-Once Signals**: every job terminates once, and the task emits
//!    one `Closed` event however the connection ends.
//! 4. **Errors Are Terminal**: a socket or framing error fails the job in
//!    flight and tears the connection down; the node is never reused.
//!
//! ## Lifecycle
//! ```text
//! Connecting --(tcp [+ tls + auth])--> Open(Free) <--> Open(InUse)
//!      |                                   |
//!      +------------- error / close -------+--> Closed
//! ```

use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ckv_common::{AuthReq, Message, MessageCode, Parser, Payload, ProtocolError, Registry};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace, warn};

use crate::config::{Address, Credentials};
use crate::error::{ClientError, ClientResult};
use crate::job::{Job, JobKind};
use crate::tls;

/// Identifier of a node within its pool.
pub type NodeId = u64;

/// Signals a node task sends to its owner.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// The connection (and handshake, if any) completed; the node is free.
    Connected { id: NodeId },
    /// A request completed and the node accepts another.
    Free { id: NodeId },
    /// Connection-level failure. Always followed by `Closed`.
    Error { id: NodeId, error: ClientError },
    /// The connection ended. Emitted exactly once per node.
    Closed { id: NodeId, had_error: bool },
}

/// Settings shared by every node of a pool.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub registry: Arc<Registry>,
    pub connect_timeout: Option<Duration>,
    pub credentials: Option<Credentials>,
}

impl NodeOptions {
    pub fn new(registry: Arc<Registry>) -> Self {
        NodeOptions {
            registry,
            connect_timeout: None,
            credentials: None,
        }
    }
}

struct NodeState {
    open: bool,
    in_use: bool,
    close_requested: bool,
    last_activity: Instant,
}

/// Handle to one connection.
#[derive(Clone)]
pub struct Node {
    id: NodeId,
    address: Address,
    state: Arc<Mutex<NodeState>>,
    jobs: mpsc::UnboundedSender<Job>,
    shutdown: Arc<Notify>,
}

impl Node {
    /// Spawns the connection task and returns its handle immediately.
    pub fn connect(
        id: NodeId,
        address: Address,
        options: NodeOptions,
        events: mpsc::UnboundedSender<NodeEvent>,
    ) -> Node {
        let state = Arc::new(Mutex::new(NodeState {
            open: false,
            in_use: false,
            close_requested: false,
            last_activity: Instant::now(),
        }));
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Notify::new());

        let task = NodeTask {
            id,
            address: address.clone(),
            options,
            state: state.clone(),
            jobs: rx,
            shutdown: shutdown.clone(),
            events,
        };
        tokio::spawn(task.run());

        Node {
            id,
            address,
            state,
            jobs: tx,
            shutdown,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn in_use(&self) -> bool {
        self.lock().in_use
    }

    /// True when the node can take a job right now.
    pub fn is_available(&self) -> bool {
        let state = self.lock();
        state.open && !state.in_use
    }

    /// Time the node last became free (or opened).
    pub fn last_activity(&self) -> Instant {
        self.lock().last_activity
    }

    /// Hands a job to the node, failing it when the node cannot take it.
    pub fn send(&self, job: Job) {
        if let Err((job, err)) = self.try_send(job) {
            job.fail(err);
        }
    }

    /// Hands a job to the node, returning it with the reason when the node is
    /// busy or not open.
    pub fn try_send(&self, job: Job) -> Result<(), (Job, ClientError)> {
        {
            let mut state = self.lock();
            if state.in_use {
                return Err((job, ClientError::NodeInUse));
            }
            if !state.open {
                return Err((job, ClientError::ConnectionClosed));
            }
            state.in_use = true;
        }

        // The task closes its receiver before it stops, so a job either lands
        // in the queue it drains or comes straight back here.
        self.jobs.send(job).map_err(|mpsc::error::SendError(job)| {
            let mut state = self.lock();
            state.in_use = false;
            state.open = false;
            (job, ClientError::ConnectionClosed)
        })
    }

    /// Starts a graceful shutdown. The `Closed` event follows once the
    /// socket is gone.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.open = false;
            state.close_requested = true;
        }
        // Stores a permit, so a close issued before the task waits is kept.
        self.shutdown.notify_one();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NodeState> {
        self.state.lock().expect("node mutex poisoned")
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("open", &state.open)
            .field("in_use", &state.in_use)
            .finish()
    }
}

// ============================================================================
// CONNECTION TASK
// ============================================================================

trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

struct Connection {
    io: Box<dyn Io>,
    parser: Parser,
}

impl Connection {
    async fn read(&mut self) -> io::Result<usize> {
        self.io.read_buf(self.parser.buffer_mut()).await
    }

    async fn write(&mut self, frame: &[u8]) -> io::Result<()> {
        self.io.write_all(frame).await?;
        self.io.flush().await
    }

    async fn shutdown(&mut self) {
        let _ = self.io.shutdown().await;
    }

    /// Writes one frame and waits for its single answer during the
    /// handshake.
    async fn exchange(&mut self, frame: &[u8], expected: MessageCode) -> ClientResult<Message> {
        self.write(frame).await?;
        loop {
            if let Some(message) = self.parser.next_message()? {
                if let Some(err) = message.payload.as_error() {
                    return Err(ClientError::from(err));
                }
                if message.code != expected.as_u8() {
                    return Err(ClientError::UnexpectedResponse);
                }
                return Ok(message);
            }
            if self.read().await? == 0 {
                return Err(ClientError::ConnectionClosed);
            }
        }
    }
}

/// Why the connection ended.
enum Exit {
    Closed,
    Eof,
    Failed(ClientError),
}

enum Served {
    Free,
    Interrupted(Exit, Job),
}

struct NodeTask {
    id: NodeId,
    address: Address,
    options: NodeOptions,
    state: Arc<Mutex<NodeState>>,
    jobs: mpsc::UnboundedReceiver<Job>,
    shutdown: Arc<Notify>,
    events: mpsc::UnboundedSender<NodeEvent>,
}

impl NodeTask {
    async fn run(mut self) {
        let established = tokio::select! {
            result = establish(&self.address, &self.options) => result.map(Some),
            _ = self.shutdown.notified() => Ok(None),
        };

        let (exit, job) = match established {
            Ok(Some(mut conn)) => {
                if self.mark_open() {
                    debug!(node = self.id, addr = %self.address, "connected");
                    self.emit(NodeEvent::Connected { id: self.id });
                    self.serve(&mut conn).await
                } else {
                    conn.shutdown().await;
                    (Exit::Closed, None)
                }
            }
            Ok(None) => (Exit::Closed, None),
            Err(err) => (Exit::Failed(err), None),
        };

        self.finish(exit, job);
    }

    /// Main loop while open: take jobs, and treat any other traffic as fatal.
    async fn serve(&mut self, conn: &mut Connection) -> (Exit, Option<Job>) {
        loop {
            let leftover = conn.parser.buffered();
            if leftover > 0 {
                return (unsolicited(leftover), None);
            }

            // Jobs are taken before socket reads, so a job handed over just as
            // the peer hangs up is answered through the normal close path.
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    conn.shutdown().await;
                    return (Exit::Closed, None);
                }
                job = self.jobs.recv() => match job {
                    Some(job) => match self.serve_job(conn, job).await {
                        Served::Free => {}
                        Served::Interrupted(exit, job) => {
                            if matches!(exit, Exit::Closed) {
                                conn.shutdown().await;
                            }
                            return (exit, Some(job));
                        }
                    },
                    None => {
                        conn.shutdown().await;
                        return (Exit::Closed, None);
                    }
                },
                read = conn.read() => match read {
                    Ok(0) => return (Exit::Eof, None),
                    Ok(len) => return (unsolicited(len), None),
                    Err(err) => return (Exit::Failed(err.into()), None),
                },
            }
        }
    }

    /// Writes the job and delivers its response(s).
    ///
    /// **Logic**:
    /// 1. Message job: the first message completes it.
    /// 2. Stream job: every message is pushed; an error message or one with
    ///    `done = true` terminates it.
    /// 3. The node is freed before the terminal signal is delivered.
    async fn serve_job(&mut self, conn: &mut Connection, mut job: Job) -> Served {
        trace!(node = self.id, code = %job.code(), "sending request");
        if let Err(err) = conn.write(job.buffer()).await {
            return Served::Interrupted(Exit::Failed(err.into()), job);
        }

        loop {
            match conn.parser.next_message() {
                Ok(Some(message)) => {
                    let terminal =
                        job.kind() == JobKind::Message || message.is_error() || message.done();
                    if terminal {
                        self.mark_free();
                        job.complete(into_result(message));
                        self.emit(NodeEvent::Free { id: self.id });
                        return Served::Free;
                    }
                    job.push(message.payload);
                    continue;
                }
                Ok(None) => {}
                Err(err) => return Served::Interrupted(Exit::Failed(err.into()), job),
            }

            tokio::select! {
                biased;
                _ = self.shutdown.notified() => return Served::Interrupted(Exit::Closed, job),
                other = self.jobs.recv() => match other {
                    Some(other) => other.fail(ClientError::NodeInUse),
                    None => return Served::Interrupted(Exit::Closed, job),
                },
                read = conn.read() => match read {
                    Ok(0) => return Served::Interrupted(Exit::Eof, job),
                    Ok(_) => {}
                    Err(err) => return Served::Interrupted(Exit::Failed(err.into()), job),
                },
            }
        }
    }

    fn finish(&mut self, exit: Exit, job: Option<Job>) {
        {
            let mut state = self.lock();
            state.open = false;
        }
        let stranded = self.close_queue();

        match exit {
            Exit::Failed(err) => {
                warn!(node = self.id, addr = %self.address, error = %err, "connection failed");
                if let Some(job) = job {
                    job.fail(err.clone());
                }
                fail_all(stranded);
                self.emit(NodeEvent::Error {
                    id: self.id,
                    error: err,
                });
                self.emit(NodeEvent::Closed {
                    id: self.id,
                    had_error: true,
                });
            }
            Exit::Closed | Exit::Eof => {
                debug!(node = self.id, addr = %self.address, "connection closed");
                if let Some(job) = job {
                    job.fail(ClientError::ConnectionClosed);
                }
                fail_all(stranded);
                self.emit(NodeEvent::Closed {
                    id: self.id,
                    had_error: false,
                });
            }
        }
    }

    /// Stops accepting jobs and returns the ones handed over but never
    /// started. Later `try_send` calls get their job back.
    fn close_queue(&mut self) -> Vec<Job> {
        self.jobs.close();
        let mut stranded = Vec::new();
        while let Ok(job) = self.jobs.try_recv() {
            stranded.push(job);
        }
        stranded
    }

    /// Opens the node unless a close arrived during the handshake.
    fn mark_open(&self) -> bool {
        let mut state = self.lock();
        if state.close_requested {
            return false;
        }
        state.open = true;
        state.last_activity = Instant::now();
        true
    }

    fn mark_free(&self) {
        let mut state = self.lock();
        state.in_use = false;
        state.last_activity = Instant::now();
    }

    fn emit(&self, event: NodeEvent) {
        // The owner may be gone already; nobody is left to notify.
        let _ = self.events.send(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NodeState> {
        self.state.lock().expect("node mutex poisoned")
    }
}

fn unsolicited(len: usize) -> Exit {
    Exit::Failed(ClientError::Protocol(ProtocolError::Unsolicited { len }))
}

fn into_result(message: Message) -> ClientResult<Payload> {
    match message.payload {
        Payload::Error(err) => Err(ClientError::from(&err)),
        payload => Ok(payload),
    }
}

fn fail_all(jobs: Vec<Job>) {
    for job in jobs {
        job.fail(ClientError::ConnectionClosed);
    }
}

async fn establish(address: &Address, options: &NodeOptions) -> ClientResult<Connection> {
    let connect = TcpStream::connect((address.host.as_str(), address.port));
    let stream = match options.connect_timeout {
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| ClientError::ConnectTimeout)??,
        None => connect.await?,
    };
    stream.set_nodelay(true)?;

    let conn = Connection {
        io: Box::new(stream),
        parser: Parser::new(options.registry.clone()),
    };

    match &options.credentials {
        Some(credentials) => handshake(conn, credentials, &address.host, &options.registry).await,
        None => Ok(conn),
    }
}

/// StartTls in plaintext, TLS upgrade of the same socket, then AuthReq.
async fn handshake(
    mut conn: Connection,
    credentials: &Credentials,
    host: &str,
    registry: &Registry,
) -> ClientResult<Connection> {
    let start_tls = registry
        .encode_frame(MessageCode::StartTls.as_u8(), &Payload::Empty)
        .map_err(ClientError::Encode)?;
    conn.exchange(&start_tls, MessageCode::StartTls).await?;
    if conn.parser.buffered() > 0 {
        return Err(ProtocolError::Unsolicited {
            len: conn.parser.buffered(),
        }
        .into());
    }

    let Connection { io, parser } = conn;
    let stream = tls::upgrade(io, host).await?;
    let mut conn = Connection {
        io: Box::new(stream),
        parser,
    };

    let auth = Payload::AuthReq(AuthReq {
        user: credentials.user.clone().into_bytes(),
        password: credentials.password.clone().into_bytes(),
    });
    let frame = registry
        .encode_frame(MessageCode::AuthReq.as_u8(), &auth)
        .map_err(ClientError::Encode)?;
    conn.exchange(&frame, MessageCode::AuthResp).await?;
    Ok(conn)
}
