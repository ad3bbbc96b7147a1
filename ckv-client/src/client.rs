//! # Async Client API
//!
//! Purpose: Expose typed cluster operations on top of the connection pool.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides jobs, nodes and framing; each
//!    operation is a thin call into [`Pool::send`] with a fixed code.
//! 2. **Composition**: the client owns a `Pool` and the shared `Registry`.
//! 3. **Fail Fast**: a response of the wrong type is `UnexpectedResponse`.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use ckv_common::{
    Content, DelReq, GetReq, ListBucketsReq, ListKeysReq, MessageCode, Payload, PutReq, Registry,
    ServerInfoResp,
};
use tokio::sync::{broadcast, oneshot};
use tokio_stream::{Stream, StreamExt};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::job::{response_stream, Job, ResponseStream};
use crate::pool::Pool;

/// Pooled async client.
#[derive(Clone)]
pub struct Client {
    pool: Pool,
    registry: Arc<Registry>,
    request_timeout: Option<Duration>,
}

impl Client {
    /// Creates an unconnected client with the standard registry.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        Self::with_registry(config, Arc::new(Registry::standard()))
    }

    pub fn with_registry(config: ClientConfig, registry: Arc<Registry>) -> ClientResult<Self> {
        let pool = Pool::new(config.pool, registry.clone())?;
        Ok(Client {
            pool,
            registry,
            request_timeout: config.request_timeout,
        })
    }

    /// Starts the pool. Requests made earlier are queued until now.
    pub fn connect(&self) {
        self.pool.connect();
    }

    pub async fn wait_connected(&self) -> ClientResult<()> {
        self.pool.wait_connected().await
    }

    /// Closes every connection and waits until they are gone.
    pub async fn close(&self) {
        self.pool.close();
        self.pool.wait_closed().await;
    }

    pub fn errors(&self) -> broadcast::Receiver<ClientError> {
        self.pool.errors()
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Sends one request and waits for its single response.
    pub async fn message(&self, code: MessageCode, payload: &Payload) -> ClientResult<Payload> {
        let (tx, rx) = oneshot::channel();
        let job = Job::message(&self.registry, code, payload, move |result| {
            let _ = tx.send(result);
        })?;
        self.pool.send(job);

        let response = async { rx.await.unwrap_or(Err(ClientError::ConnectionClosed)) };
        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, response)
                .await
                .map_err(|_| ClientError::RequestTimeout)?,
            None => response.await,
        }
    }

    /// Sends a streaming request; responses arrive on the returned stream.
    pub fn stream(&self, code: MessageCode, payload: &Payload) -> ClientResult<ResponseStream> {
        let (sink, stream) = response_stream();
        let job = Job::stream(&self.registry, code, payload, sink)?;
        self.pool.send(job);
        Ok(stream)
    }

    pub async fn ping(&self) -> ClientResult<()> {
        match self.message(MessageCode::PingReq, &Payload::Empty).await? {
            Payload::Empty => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn server_info(&self) -> ClientResult<ServerInfoResp> {
        match self
            .message(MessageCode::GetServerInfoReq, &Payload::Empty)
            .await?
        {
            Payload::ServerInfo(info) => Ok(info),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Fetches a value. Returns `Ok(None)` when the key is missing.
    ///
    /// With several siblings the first one wins.
    pub async fn get(&self, bucket: &[u8], key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        let request = Payload::GetReq(GetReq::new(bucket, key));
        match self.message(MessageCode::GetReq, &request).await? {
            Payload::GetResp(resp) => Ok(resp.content.into_iter().next().map(|c| c.value)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn put(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> ClientResult<()> {
        let request = Payload::PutReq(PutReq::new(bucket, key, Content::new(value)));
        match self.message(MessageCode::PutReq, &request).await? {
            Payload::PutResp(_) => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn delete(&self, bucket: &[u8], key: &[u8]) -> ClientResult<()> {
        let request = Payload::DelReq(DelReq::new(bucket, key));
        match self.message(MessageCode::DelReq, &request).await? {
            Payload::Empty => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Streams every key of `bucket`.
    pub fn list_keys(&self, bucket: &[u8]) -> ClientResult<NameStream> {
        let request = Payload::ListKeysReq(ListKeysReq::new(bucket));
        let stream = self.stream(MessageCode::ListKeysReq, &request)?;
        Ok(NameStream::new(stream, |payload| match payload {
            Payload::ListKeysResp(resp) => Some(resp.keys),
            _ => None,
        }))
    }

    /// Streams every bucket name.
    pub fn list_buckets(&self) -> ClientResult<NameStream> {
        let request = Payload::ListBucketsReq(ListBucketsReq::streaming());
        let stream = self.stream(MessageCode::ListBucketsReq, &request)?;
        Ok(NameStream::new(stream, |payload| match payload {
            Payload::ListBucketsResp(resp) => Some(resp.buckets),
            _ => None,
        }))
    }
}

/// Flattens batched listing responses into single keys or bucket names.
pub struct NameStream {
    inner: ResponseStream,
    pending: VecDeque<Vec<u8>>,
    extract: fn(Payload) -> Option<Vec<Vec<u8>>>,
}

impl NameStream {
    fn new(inner: ResponseStream, extract: fn(Payload) -> Option<Vec<Vec<u8>>>) -> Self {
        NameStream {
            inner,
            pending: VecDeque::new(),
            extract,
        }
    }

    pub async fn next(&mut self) -> Option<ClientResult<Vec<u8>>> {
        StreamExt::next(self).await
    }

    pub async fn collect_all(mut self) -> ClientResult<Vec<Vec<u8>>> {
        let mut names = Vec::new();
        while let Some(name) = StreamExt::next(&mut self).await {
            names.push(name?);
        }
        Ok(names)
    }
}

impl Stream for NameStream {
    type Item = ClientResult<Vec<u8>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(name) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(name)));
            }
            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                None => return Poll::Ready(None),
                Some(Err(err)) => return Poll::Ready(Some(Err(err))),
                Some(Ok(payload)) => match (this.extract)(payload) {
                    Some(batch) => this.pending.extend(batch),
                    None => return Poll::Ready(Some(Err(ClientError::UnexpectedResponse))),
                },
            }
        }
    }
}
