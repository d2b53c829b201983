//! Response entities and the streaming pipeline
//!
//! A produced value becomes either a buffered body (small, transaction
//! closed before the response leaves) or a streamed one (transaction stays
//! open until the consumer drains or aborts the stream). The close guard is
//! idempotent: whichever of end-of-stream, encoder error, or body drop
//! happens first finishes the envelope, and later signals are no-ops.

use crate::codec::{CodecResult, EncodedBody};
use crate::store::StoreError;
use crate::txn::TransactionEnvelope;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

/// Chunk size used when a fully materialized body is streamed anyway
const STREAM_CHUNK: usize = 8192;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Envelope finishing failed (commit error on the buffered path)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The encoder stream failed before anything was sent
    #[error("Encoding failed: {0}")]
    Encode(String),
}

/// The response body decided by the pipeline
pub enum ResponseEntity {
    /// Fully buffered body; the transaction is already closed
    Buffered {
        /// Response content type
        content_type: String,
        /// Body bytes
        body: Bytes,
    },
    /// Streamed body; the transaction closes when the stream finishes
    Streamed {
        /// Response content type
        content_type: String,
        /// Total length when known
        length: Option<u64>,
        /// The guarded chunk stream
        body: StreamedBody,
    },
    /// 204-style empty body
    NoContent,
    /// Redirect to an alternate location
    Redirect {
        /// Redirect status code (302 or 303)
        status: u16,
        /// Target location
        location: String,
    },
}

struct FinishJob {
    envelope: TransactionEnvelope,
    success: bool,
    status: u16,
}

/// Idempotent close callback wrapping the envelope of a streamed response
pub struct CloseGuard {
    job: Mutex<Option<FinishJob>>,
}

impl CloseGuard {
    fn new(envelope: TransactionEnvelope, success: bool, status: u16) -> Arc<Self> {
        Arc::new(Self {
            job: Mutex::new(Some(FinishJob {
                envelope,
                success,
                status,
            })),
        })
    }

    fn take_job(&self) -> Option<FinishJob> {
        match self.job.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        }
    }

    /// The stream was fully consumed; finish with the recorded outcome
    fn complete(&self, reason: &str) {
        if let Some(mut job) = self.take_job() {
            debug!(reason, "closing streamed transaction");
            if let Err(e) = job.envelope.finish(job.success, job.status) {
                error!(error = %e, "finishing streamed transaction failed");
            }
        }
    }

    /// The stream was aborted; the transaction rolls back
    fn abort(&self, reason: &str) {
        if let Some(mut job) = self.take_job() {
            debug!(reason, "aborting streamed transaction");
            if let Err(e) = job.envelope.finish(false, job.status) {
                error!(error = %e, "aborting streamed transaction failed");
            }
        }
    }

    /// Whether the guard has already fired
    pub fn is_closed(&self) -> bool {
        self.job.lock().map(|g| g.is_none()).unwrap_or(true)
    }
}

/// Byte stream whose exhaustion or drop fires the close guard
pub struct StreamedBody {
    inner: ReceiverStream<Result<Bytes, io::Error>>,
    guard: Arc<CloseGuard>,
    drained: bool,
}

impl StreamedBody {
    /// The close guard, exposed so callers can observe close timing
    pub fn guard(&self) -> Arc<CloseGuard> {
        Arc::clone(&self.guard)
    }
}

impl Stream for StreamedBody {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(None) => {
                this.drained = true;
                this.guard.complete("stream drained");
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for StreamedBody {
    fn drop(&mut self) {
        if !self.drained {
            self.guard.abort("response body dropped before drain");
        }
    }
}

/// Decides buffering and owns the streamed-response machinery
pub struct StreamingPipeline {
    threshold: usize,
    capacity: usize,
}

impl StreamingPipeline {
    /// Create a pipeline with the small-object threshold and channel capacity
    pub fn new(threshold: usize, capacity: usize) -> Self {
        Self {
            threshold,
            capacity: capacity.max(1),
        }
    }

    /// Turn an encoded body into a response entity
    ///
    /// Known lengths at or below the threshold are buffered and the
    /// envelope finished immediately; everything else streams and hands the
    /// envelope to the close guard.
    pub async fn deliver(
        &self,
        content_type: String,
        encoded: EncodedBody,
        mut envelope: TransactionEnvelope,
        success: bool,
        status: u16,
    ) -> Result<ResponseEntity, PipelineError> {
        match encoded {
            EncodedBody::Full(body) if body.len() <= self.threshold => {
                envelope.finish(success, status)?;
                Ok(ResponseEntity::Buffered { content_type, body })
            }
            EncodedBody::Full(body) => {
                let length = Some(body.len() as u64);
                let stream = chunk_bytes(body);
                Ok(self.stream_entity(content_type, length, stream, envelope, success, status))
            }
            EncodedBody::Stream {
                length: Some(length),
                stream,
            } if length as usize <= self.threshold => {
                // Small and known: collect eagerly and close right away
                match collect_stream(stream).await {
                    Ok(body) => {
                        envelope.finish(success, status)?;
                        Ok(ResponseEntity::Buffered { content_type, body })
                    }
                    Err(e) => {
                        envelope.finish(false, status)?;
                        Err(PipelineError::Encode(e))
                    }
                }
            }
            EncodedBody::Stream { length, stream } => {
                Ok(self.stream_entity(content_type, length, stream, envelope, success, status))
            }
        }
    }

    fn stream_entity(
        &self,
        content_type: String,
        length: Option<u64>,
        stream: BoxStream<'static, CodecResult<Bytes>>,
        envelope: TransactionEnvelope,
        success: bool,
        status: u16,
    ) -> ResponseEntity {
        let guard = CloseGuard::new(envelope, success, status);
        let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(self.capacity);
        spawn_producer(stream, tx, Arc::clone(&guard));
        ResponseEntity::Streamed {
            content_type,
            length,
            body: StreamedBody {
                inner: ReceiverStream::new(rx),
                guard,
                drained: false,
            },
        }
    }
}

/// Feed encoder chunks into the response channel on a separate task so a
/// slow consumer never occupies a request worker
fn spawn_producer(
    mut stream: BoxStream<'static, CodecResult<Bytes>>,
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
    guard: Arc<CloseGuard>,
) {
    tokio::spawn(async move {
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    if tx.send(Ok(bytes)).await.is_err() {
                        guard.abort("consumer hung up");
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx
                        .send(Err(io::Error::new(io::ErrorKind::Other, e.to_string())))
                        .await;
                    guard.abort("encoder failed mid-stream");
                    return;
                }
            }
        }
        // Channel closes when tx drops; the consumer side fires the guard
        // once it has drained everything.
    });
}

fn chunk_bytes(body: Bytes) -> BoxStream<'static, CodecResult<Bytes>> {
    let chunks: Vec<CodecResult<Bytes>> = (0..body.len())
        .step_by(STREAM_CHUNK)
        .map(|start| {
            let end = (start + STREAM_CHUNK).min(body.len());
            Ok(body.slice(start..end))
        })
        .collect();
    futures::stream::iter(chunks).boxed()
}

async fn collect_stream(
    mut stream: BoxStream<'static, CodecResult<Bytes>>,
) -> Result<Bytes, String> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => out.extend_from_slice(&bytes),
            Err(e) => return Err(e.to_string()),
        }
    }
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store};
    use crate::txn::TransactionEnvelope;

    fn pipeline() -> StreamingPipeline {
        StreamingPipeline::new(16, 2)
    }

    fn open_envelope(store: &MemoryStore) -> TransactionEnvelope {
        TransactionEnvelope::begin(store, true).unwrap()
    }

    #[tokio::test]
    async fn test_small_body_buffers_and_closes() {
        let store = MemoryStore::new("http://localhost:8080/").unwrap();
        let envelope = open_envelope(&store);

        let entity = pipeline()
            .deliver(
                "text/plain".into(),
                EncodedBody::Full(Bytes::from("tiny")),
                envelope,
                true,
                200,
            )
            .await
            .unwrap();

        match entity {
            ResponseEntity::Buffered { body, .. } => assert_eq!(body, Bytes::from("tiny")),
            _ => panic!("expected buffered entity"),
        }
        assert_eq!(store.stats().active, 0);
    }

    #[tokio::test]
    async fn test_large_body_streams_until_drained() {
        let store = MemoryStore::new("http://localhost:8080/").unwrap();
        let envelope = open_envelope(&store);
        let payload = Bytes::from(vec![b'x'; 100]);

        let entity = pipeline()
            .deliver(
                "application/octet-stream".into(),
                EncodedBody::Full(payload.clone()),
                envelope,
                true,
                200,
            )
            .await
            .unwrap();

        let mut body = match entity {
            ResponseEntity::Streamed { body, length, .. } => {
                assert_eq!(length, Some(100));
                body
            }
            _ => panic!("expected streamed entity"),
        };

        let guard = body.guard();
        assert!(!guard.is_closed());
        assert_eq!(store.stats().active, 1);

        let mut collected = Vec::new();
        while let Some(chunk) = body.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected.len(), 100);
        assert!(guard.is_closed());
        assert_eq!(store.stats().active, 0);
    }

    #[tokio::test]
    async fn test_aborted_stream_still_closes() {
        let store = MemoryStore::new("http://localhost:8080/").unwrap();
        let envelope = open_envelope(&store);

        let entity = pipeline()
            .deliver(
                "application/octet-stream".into(),
                EncodedBody::Full(Bytes::from(vec![b'x'; 100])),
                envelope,
                true,
                200,
            )
            .await
            .unwrap();

        let guard = match entity {
            ResponseEntity::Streamed { body, .. } => {
                let guard = body.guard();
                drop(body);
                guard
            }
            _ => panic!("expected streamed entity"),
        };

        assert!(guard.is_closed());
        assert_eq!(store.stats().active, 0);
        assert_eq!(store.stats().rolled_back, 1);
    }

    #[tokio::test]
    async fn test_unbounded_writer_stream_closes_on_drain() {
        let store = MemoryStore::new("http://localhost:8080/").unwrap();
        let envelope = open_envelope(&store);

        let chunks: Vec<CodecResult<Bytes>> =
            (0..5).map(|i| Ok(Bytes::from(format!("chunk{}", i)))).collect();
        let entity = pipeline()
            .deliver(
                "text/plain".into(),
                EncodedBody::Stream {
                    length: None,
                    stream: futures::stream::iter(chunks).boxed(),
                },
                envelope,
                true,
                200,
            )
            .await
            .unwrap();

        let mut body = match entity {
            ResponseEntity::Streamed { body, length, .. } => {
                assert_eq!(length, None);
                body
            }
            _ => panic!("expected streamed entity"),
        };

        assert_eq!(store.stats().active, 1);
        let mut seen = 0;
        while let Some(chunk) = body.next().await {
            chunk.unwrap();
            seen += 1;
        }
        assert_eq!(seen, 5);
        assert_eq!(store.stats().active, 0);
    }

    #[tokio::test]
    async fn test_small_known_stream_is_buffered() {
        let store = MemoryStore::new("http://localhost:8080/").unwrap();
        let envelope = open_envelope(&store);

        let chunks: Vec<CodecResult<Bytes>> = vec![Ok(Bytes::from("ab")), Ok(Bytes::from("cd"))];
        let entity = pipeline()
            .deliver(
                "text/plain".into(),
                EncodedBody::Stream {
                    length: Some(4),
                    stream: futures::stream::iter(chunks).boxed(),
                },
                envelope,
                true,
                200,
            )
            .await
            .unwrap();

        match entity {
            ResponseEntity::Buffered { body, .. } => assert_eq!(body, Bytes::from("abcd")),
            _ => panic!("expected buffered entity"),
        }
        assert_eq!(store.stats().active, 0);
    }

    #[tokio::test]
    async fn test_double_close_is_noop() {
        let store = MemoryStore::new("http://localhost:8080/").unwrap();
        let envelope = open_envelope(&store);
        let guard = CloseGuard::new(envelope, true, 200);

        guard.complete("first");
        guard.complete("second");
        guard.abort("third");

        assert!(guard.is_closed());
        assert_eq!(store.stats().begun, 1);
        assert_eq!(store.stats().rolled_back, 1);
    }
}
