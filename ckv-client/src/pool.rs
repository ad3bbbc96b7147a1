//! # Connection Pool
//!
//! Purpose: Spread requests over a bounded, self-healing set of node
//! connections.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: keep between `min_connections` and
//!    `max_connections` open nodes; grow on demand, shrink when idle.
//! 2. **Minimal Locking**: all pool state sits behind one mutex that is never
//!    held across an `.await` or while a job is being failed.
//! 3. **Serialized Events**: node signals arrive on one channel and are
//!    handled by a single event-loop task, in order.
//! 4. **Fail Fast on Close**: once closing, new and queued jobs fail with
//!    "connection closed" and no node is created.
//!
//! ## Phases
//! ```text
//! Unconnected --connect()--> Connected --close()--> Closing --(no nodes)--> Closed
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use ckv_common::Registry;
use rand::seq::SliceRandom;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};

use crate::config::PoolConfig;
use crate::error::{ClientError, ClientResult};
use crate::job::Job;
use crate::node::{Node, NodeEvent, NodeId, NodeOptions};

const ERROR_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPhase {
    /// Jobs queue; no connection is made yet.
    Unconnected,
    Connected,
    /// Waiting for the remaining nodes to close.
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, Default)]
struct Signals {
    connected: bool,
    closing: bool,
    closed: bool,
}

struct PoolState {
    phase: PoolPhase,
    nodes: HashMap<NodeId, Node>,
    queue: VecDeque<Job>,
    next_id: NodeId,
    opened: usize,
    events: Option<mpsc::UnboundedReceiver<NodeEvent>>,
}

struct PoolInner {
    config: PoolConfig,
    options: NodeOptions,
    state: Mutex<PoolState>,
    events: mpsc::UnboundedSender<NodeEvent>,
    signals: watch::Sender<Signals>,
    errors: broadcast::Sender<ClientError>,
}

/// Pool handle; clones share the same connections.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Creates an unconnected pool. Jobs sent before [`Pool::connect`] queue.
    pub fn new(config: PoolConfig, registry: Arc<Registry>) -> ClientResult<Self> {
        config.validate()?;

        let options = NodeOptions {
            registry,
            connect_timeout: config.connect_timeout,
            credentials: config.credentials.clone(),
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (signals, _) = watch::channel(Signals::default());
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);

        let state = PoolState {
            phase: PoolPhase::Unconnected,
            nodes: HashMap::with_capacity(config.max_connections),
            queue: VecDeque::new(),
            next_id: 0,
            opened: 0,
            events: Some(events_rx),
        };

        Ok(Pool {
            inner: Arc::new(PoolInner {
                config,
                options,
                state: Mutex::new(state),
                events: events_tx,
                signals,
                errors,
            }),
        })
    }

    /// Starts connecting. Must be called from within a tokio runtime.
    ///
    /// Creates `max(queued jobs, min_connections)` nodes, capped at
    /// `max_connections`. Calling it again has no effect.
    pub fn connect(&self) {
        let mut state = self.inner.lock();
        if state.phase != PoolPhase::Unconnected {
            return;
        }
        state.phase = PoolPhase::Connected;

        if let Some(events) = state.events.take() {
            tokio::spawn(event_loop(Arc::downgrade(&self.inner), events));
        }

        let config = &self.inner.config;
        let target = state
            .queue
            .len()
            .max(config.min_connections)
            .min(config.max_connections);
        info!(
            nodes = config.addresses.len(),
            connections = target,
            "connecting pool"
        );
        for _ in 0..target {
            self.inner.add_connection(&mut state);
        }

        if config.min_connections == 0 {
            self.inner.signals.send_modify(|s| s.connected = true);
        }
    }

    /// Dispatches a job to a random free node, or queues it.
    pub fn send(&self, job: Job) {
        let mut state = self.inner.lock();
        if matches!(state.phase, PoolPhase::Closing | PoolPhase::Closed) {
            drop(state);
            job.fail(ClientError::ConnectionClosed);
            return;
        }

        state.queue.push_back(job);
        self.inner.drain(&mut state);
        if !state.queue.is_empty() {
            self.inner.add_connection(&mut state);
        }
    }

    /// Fails every queued job and closes every node.
    pub fn close(&self) {
        let (queued, nodes) = {
            let mut state = self.inner.lock();
            if matches!(state.phase, PoolPhase::Closing | PoolPhase::Closed) {
                return;
            }
            info!(connections = state.nodes.len(), "closing pool");
            state.phase = PoolPhase::Closing;
            self.inner.signals.send_modify(|s| s.closing = true);

            let queued: Vec<Job> = state.queue.drain(..).collect();
            if state.nodes.is_empty() {
                self.inner.mark_closed(&mut state);
            }
            let nodes: Vec<Node> = state.nodes.values().cloned().collect();
            (queued, nodes)
        };

        for job in queued {
            job.fail(ClientError::ConnectionClosed);
        }
        for node in nodes {
            node.close();
        }
    }

    /// Resolves once `min_connections` nodes have opened. Fails if the pool
    /// starts closing first.
    pub async fn wait_connected(&self) -> ClientResult<()> {
        let mut signals = self.inner.signals.subscribe();
        let reached = signals
            .wait_for(|s| s.connected || s.closing)
            .await
            .map(|s| s.connected)
            .unwrap_or(false);
        if reached {
            Ok(())
        } else {
            Err(ClientError::ConnectionClosed)
        }
    }

    /// Resolves once the pool is closed and every node is gone.
    pub async fn wait_closed(&self) {
        let mut signals = self.inner.signals.subscribe();
        let _ = signals.wait_for(|s| s.closed).await;
    }

    /// Connection-level errors, independent of any job.
    pub fn errors(&self) -> broadcast::Receiver<ClientError> {
        self.inner.errors.subscribe()
    }

    /// Current number of nodes, connecting or open.
    pub fn connections(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Open nodes without a job in flight.
    pub fn available(&self) -> usize {
        self.inner
            .lock()
            .nodes
            .values()
            .filter(|node| node.is_available())
            .count()
    }

    pub fn phase(&self) -> PoolPhase {
        self.inner.lock().phase
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Pool")
            .field("phase", &state.phase)
            .field("connections", &state.nodes.len())
            .field("queued", &state.queue.len())
            .finish()
    }
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().expect("pool mutex poisoned")
    }

    /// Creates one node against a random address, unless closing, not yet
    /// connected, or at the cap.
    fn add_connection(&self, state: &mut PoolState) {
        if state.phase != PoolPhase::Connected {
            return;
        }
        if state.nodes.len() >= self.config.max_connections {
            return;
        }
        let address = match self.config.addresses.choose(&mut rand::thread_rng()) {
            Some(address) => address.clone(),
            None => return,
        };

        let id = state.next_id;
        state.next_id += 1;
        debug!(node = id, addr = %address, "adding connection");
        let node = Node::connect(id, address, self.options.clone(), self.events.clone());
        state.nodes.insert(id, node);
    }

    /// Moves queued jobs onto free nodes while both exist.
    fn drain(&self, state: &mut PoolState) {
        while !state.queue.is_empty() {
            let node = match select(&state.nodes) {
                Some(node) => node,
                None => break,
            };
            let job = match state.queue.pop_front() {
                Some(job) => job,
                None => break,
            };
            // The node lost the race against its own task; keep the job first
            // in line for the next candidate.
            if let Err((job, _)) = node.try_send(job) {
                state.queue.push_front(job);
            }
        }
    }

    fn needs_connection(&self, state: &PoolState) -> bool {
        state.nodes.len() < self.config.min_connections || !state.queue.is_empty()
    }

    fn mark_closed(&self, state: &mut PoolState) {
        state.phase = PoolPhase::Closed;
        self.signals.send_modify(|s| s.closed = true);
        info!("pool closed");
    }

    fn handle(self: &Arc<Self>, event: NodeEvent) {
        match event {
            NodeEvent::Connected { id } => self.on_connected(id),
            NodeEvent::Free { .. } => {
                let mut state = self.lock();
                self.drain(&mut state);
            }
            NodeEvent::Error { id, error } => {
                debug!(node = id, error = %error, "relaying connection error");
                let _ = self.errors.send(error);
            }
            NodeEvent::Closed { id, had_error } => self.on_closed(id, had_error),
        }
    }

    fn on_connected(self: &Arc<Self>, id: NodeId) {
        let mut state = self.lock();
        if !state.nodes.contains_key(&id) {
            return;
        }
        state.opened += 1;
        if state.opened >= self.config.min_connections {
            self.signals.send_if_modified(|s| !std::mem::replace(&mut s.connected, true));
        }
        self.drain(&mut state);
        drop(state);

        spawn_idle_timer(Arc::downgrade(self), id, self.config.idle_timeout);
    }

    /// Removes the node and decides whether it is replaced.
    ///
    /// **Logic**:
    /// 1. Closing: signal closed once the last node is gone.
    /// 2. Evicted (already removed): nothing to replace.
    /// 3. Error close: one replacement after `reconnect_delay`.
    /// 4. Clean close: replace now if below the minimum or jobs are waiting.
    fn on_closed(self: &Arc<Self>, id: NodeId, had_error: bool) {
        let mut state = self.lock();
        let removed = state.nodes.remove(&id).is_some();
        let phase = state.phase;

        match phase {
            PoolPhase::Closing => {
                if state.nodes.is_empty() {
                    self.mark_closed(&mut state);
                }
            }
            PoolPhase::Connected if removed => {
                if had_error {
                    drop(state);
                    self.schedule_replacement();
                } else if self.needs_connection(&state) {
                    self.add_connection(&mut state);
                }
            }
            _ => {}
        }
    }

    fn schedule_replacement(self: &Arc<Self>) {
        let pool = Arc::downgrade(self);
        let delay = self.config.reconnect_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let inner = match pool.upgrade() {
                Some(inner) => inner,
                None => return,
            };
            // Replaced even with an empty queue and no floor; `add_connection`
            // still honours the phase and the cap.
            let mut state = inner.lock();
            inner.add_connection(&mut state);
        });
    }
}

/// Picks a uniformly random open and free node.
fn select(nodes: &HashMap<NodeId, Node>) -> Option<&Node> {
    let candidates: Vec<&Node> = nodes.values().filter(|node| node.is_available()).collect();
    candidates.choose(&mut rand::thread_rng()).copied()
}

async fn event_loop(pool: Weak<PoolInner>, mut events: mpsc::UnboundedReceiver<NodeEvent>) {
    while let Some(event) = events.recv().await {
        let inner = match pool.upgrade() {
            Some(inner) => inner,
            None => break,
        };
        inner.handle(event);
    }
}

/// Evicts node `id` once it has been idle for `timeout` and the pool is above
/// its minimum.
fn spawn_idle_timer(pool: Weak<PoolInner>, id: NodeId, timeout: std::time::Duration) {
    tokio::spawn(async move {
        let mut wait = timeout;
        loop {
            tokio::time::sleep(wait).await;
            let inner = match pool.upgrade() {
                Some(inner) => inner,
                None => return,
            };

            let evicted = {
                let mut state = inner.lock();
                if state.phase != PoolPhase::Connected {
                    return;
                }
                let (in_use, last_activity) = match state.nodes.get(&id) {
                    Some(node) => (node.in_use(), node.last_activity()),
                    None => return,
                };

                if in_use || state.nodes.len() <= inner.config.min_connections {
                    wait = timeout;
                    continue;
                }
                let idle = last_activity.elapsed();
                if idle < timeout {
                    wait = timeout - idle;
                    continue;
                }
                match state.nodes.remove(&id) {
                    Some(node) => node,
                    None => return,
                }
            };

            debug!(node = id, addr = %evicted.address(), "closing idle connection");
            evicted.close();
            return;
        }
    });
}
