//! # Jobs
//!
//! Purpose: Tie one encoded request to the place its outcome goes.
//!
//! A job is either a *message* job, completed by a single callback
//! invocation, or a *stream* job, completed by zero or more pushed payloads
//! followed by exactly one end-or-error. Terminal operations consume the job
//! (or its sink), so a second completion cannot be expressed.
//!
//! ## Design Principles
//! 1. **Encode Early**: the request is encoded when the job is built, so a
//!    payload that does not fit its schema never reaches a socket.
//! 2. **Single Failure Path**: nodes and the pool fail a job through
//!    [`Job::fail`] regardless of its kind.
//! 3. **No Silent Hangs**: a stream sink dropped without a terminal signal
//!    reports "connection closed".

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use ckv_common::{MessageCode, Payload, Registry};
use tokio::sync::mpsc;
use tokio_stream::Stream;

use crate::error::{ClientError, ClientResult};

/// Completion callback of a message job.
pub type Callback = Box<dyn FnOnce(ClientResult<Payload>) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Exactly one response message.
    Message,
    /// Responses until one carries `done = true`.
    Stream,
}

enum Sink {
    Callback(Callback),
    Stream(StreamSink),
}

/// One logical request: the encoded frame plus its completion sink.
pub struct Job {
    code: MessageCode,
    buffer: Bytes,
    sink: Sink,
}

impl Job {
    /// Builds a single-response job.
    pub fn message<F>(
        registry: &Registry,
        code: MessageCode,
        payload: &Payload,
        callback: F,
    ) -> ClientResult<Job>
    where
        F: FnOnce(ClientResult<Payload>) + Send + 'static,
    {
        let buffer = registry
            .encode_frame(code.as_u8(), payload)
            .map_err(ClientError::Encode)?;
        Ok(Job {
            code,
            buffer,
            sink: Sink::Callback(Box::new(callback)),
        })
    }

    /// Builds a streaming job that pushes every response into `sink`.
    pub fn stream(
        registry: &Registry,
        code: MessageCode,
        payload: &Payload,
        sink: StreamSink,
    ) -> ClientResult<Job> {
        let buffer = registry
            .encode_frame(code.as_u8(), payload)
            .map_err(ClientError::Encode)?;
        Ok(Job {
            code,
            buffer,
            sink: Sink::Stream(sink),
        })
    }

    pub fn kind(&self) -> JobKind {
        match self.sink {
            Sink::Callback(_) => JobKind::Message,
            Sink::Stream(_) => JobKind::Stream,
        }
    }

    pub fn code(&self) -> MessageCode {
        self.code
    }

    /// The complete wire frame.
    pub fn buffer(&self) -> &Bytes {
        &self.buffer
    }

    /// Delivers a failure through whichever sink the job holds.
    pub fn fail(self, err: ClientError) {
        match self.sink {
            Sink::Callback(callback) => callback(Err(err)),
            Sink::Stream(sink) => sink.fail(err),
        }
    }

    /// Delivers the final outcome. A stream job pushes a successful payload
    /// and then ends.
    pub(crate) fn complete(self, result: ClientResult<Payload>) {
        match (self.sink, result) {
            (Sink::Callback(callback), result) => callback(result),
            (Sink::Stream(mut sink), Ok(payload)) => {
                sink.push(payload);
                sink.end();
            }
            (Sink::Stream(sink), Err(err)) => sink.fail(err),
        }
    }

    /// Pushes an intermediate payload of a stream job.
    pub(crate) fn push(&mut self, payload: Payload) {
        if let Sink::Stream(sink) = &mut self.sink {
            sink.push(payload);
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("code", &self.code)
            .field("kind", &self.kind())
            .field("len", &self.buffer.len())
            .finish()
    }
}

/// Producer half of a response stream.
pub struct StreamSink {
    tx: Option<mpsc::UnboundedSender<ClientResult<Payload>>>,
}

impl StreamSink {
    pub fn push(&mut self, payload: Payload) {
        if let Some(tx) = &self.tx {
            // A dropped consumer only means nobody is listening any more.
            let _ = tx.send(Ok(payload));
        }
    }

    /// Ends the stream cleanly.
    pub fn end(mut self) {
        self.tx.take();
    }

    /// Ends the stream with an error as its final item.
    pub fn fail(mut self, err: ClientError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(err));
        }
    }
}

impl Drop for StreamSink {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(ClientError::ConnectionClosed));
        }
    }
}

/// Consumer half of a response stream.
///
/// Yields `Ok(payload)` items, then either ends (`None`) or yields one final
/// `Err`.
pub struct ResponseStream {
    rx: mpsc::UnboundedReceiver<ClientResult<Payload>>,
}

impl ResponseStream {
    pub async fn next(&mut self) -> Option<ClientResult<Payload>> {
        self.rx.recv().await
    }

    /// Collects every payload, failing on the first error.
    pub async fn collect_all(mut self) -> ClientResult<Vec<Payload>> {
        let mut payloads = Vec::new();
        while let Some(item) = self.rx.recv().await {
            payloads.push(item?);
        }
        Ok(payloads)
    }
}

impl Stream for ResponseStream {
    type Item = ClientResult<Payload>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Creates a connected sink and stream pair.
pub fn response_stream() -> (StreamSink, ResponseStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StreamSink { tx: Some(tx) }, ResponseStream { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ckv_common::{ListKeysResp, ProtocolError};
    use std::sync::{Arc, Mutex};

    fn keys(names: &[&str], done: bool) -> Payload {
        Payload::ListKeysResp(ListKeysResp {
            keys: names.iter().map(|k| k.as_bytes().to_vec()).collect(),
            done: Some(done),
        })
    }

    #[test]
    fn test_message_job_encodes_frame() {
        let registry = Registry::standard();
        let job = Job::message(&registry, MessageCode::PingReq, &Payload::Empty, |_| {}).unwrap();
        assert_eq!(job.kind(), JobKind::Message);
        assert_eq!(job.code(), MessageCode::PingReq);
        assert_eq!(&job.buffer()[..], &[0, 0, 0, 1, 1]);
    }

    #[test]
    fn test_mismatched_payload_fails_synchronously() {
        let registry = Registry::standard();
        let err = Job::message(&registry, MessageCode::GetReq, &Payload::Empty, |_| {}).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Encode(ProtocolError::PayloadMismatch { .. })
        ));
    }

    #[test]
    fn test_fail_invokes_callback_once() {
        let registry = Registry::standard();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let job = Job::message(&registry, MessageCode::PingReq, &Payload::Empty, move |result| {
            sink.lock().unwrap().push(result.map_err(|e| e.to_string()));
        })
        .unwrap();

        job.fail(ClientError::ConnectionClosed);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], Err("connection closed".to_string()));
    }

    #[tokio::test]
    async fn test_stream_job_push_then_complete() {
        let registry = Registry::standard();
        let (sink, stream) = response_stream();
        let mut job = Job::stream(
            &registry,
            MessageCode::ListKeysReq,
            &Payload::ListKeysReq(ckv_common::ListKeysReq::new("b")),
            sink,
        )
        .unwrap();
        assert_eq!(job.kind(), JobKind::Stream);

        job.push(keys(&["a"], false));
        job.complete(Ok(keys(&[], true)));

        let items = stream.collect_all().await.unwrap();
        assert_eq!(items, vec![keys(&["a"], false), keys(&[], true)]);
    }

    #[tokio::test]
    async fn test_stream_error_after_partial_results() {
        let (mut sink, mut stream) = response_stream();
        sink.push(keys(&["a"], false));
        sink.fail(ClientError::NodeInUse);

        assert!(matches!(stream.next().await, Some(Ok(_))));
        assert!(matches!(stream.next().await, Some(Err(ClientError::NodeInUse))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_sink_reports_connection_closed() {
        let (sink, stream) = response_stream();
        drop(sink);
        let err = stream.collect_all().await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_ended_stream_is_clean() {
        let (sink, mut stream) = response_stream();
        sink.end();
        assert!(stream.next().await.is_none());
    }
}
