//! Background readers that keep previously written objects under read load.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytesize::ByteSize;
use futures::StreamExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, BackendError, SharedBackend};
use crate::error::Error;
use crate::queue::LocatorQueue;
use crate::retry::{RetryPolicy, retry};

/// Default chance that a reader puts a locator back after reading it.
pub const DEFAULT_REQUEUE_PROBABILITY: f64 = 0.8;

/// Parameters of a [`ReaderPool`].
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ReaderConfig {
    /// The number of concurrent readers. Zero disables the pool.
    pub workers: usize,
    /// Pause of an idle reader before it polls the queue again.
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
    /// Chance that a locator is offered back to the queue after a successful read.
    pub requeue_probability: f64,
    /// Retries of a single read. Errors after the last attempt are fatal.
    pub retry: RetryPolicy,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            backoff: Duration::from_secs(1),
            requeue_probability: DEFAULT_REQUEUE_PROBABILITY,
            retry: RetryPolicy::once(),
        }
    }
}

/// Totals of the reader pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadSummary {
    /// Completed reads.
    pub reads: u64,
    /// Bytes read and discarded.
    pub bytes: u64,
}

/// The first fatal error of any reader.
#[derive(Debug, Default)]
struct Failure {
    signal: CancellationToken,
    error: Mutex<Option<Error>>,
}

impl Failure {
    fn record(&self, error: Error) {
        self.error.lock().unwrap().get_or_insert(error);
        self.signal.cancel();
    }

    fn take(&self) -> Option<Error> {
        self.error.lock().unwrap().take()
    }
}

/// A fixed set of readers draining a shared [`LocatorQueue`].
///
/// While the pool is active, idle readers back off and poll again, and every object read is
/// offered back to the queue with [`ReaderConfig::requeue_probability`]. After
/// [`shutdown`](Self::shutdown) the readers drain what is left in the queue without
/// re-enqueueing anything, and exit once it is empty. Dropping the pool aborts all readers.
#[derive(Debug)]
pub struct ReaderPool {
    stop: CancellationToken,
    failure: Arc<Failure>,
    tasks: JoinSet<ReadSummary>,
}

impl ReaderPool {
    /// Spawns `config.workers` readers on the current runtime.
    ///
    /// Fails if `config.requeue_probability` is not a probability.
    pub fn start(
        backend: SharedBackend,
        queue: LocatorQueue,
        config: ReaderConfig,
    ) -> Result<Self, Error> {
        if !(0.0..=1.0).contains(&config.requeue_probability) {
            return Err(Error::Config(format!(
                "reader.requeue_probability must be within 0 and 1, got {}",
                config.requeue_probability
            )));
        }

        let stop = CancellationToken::new();
        let failure = Arc::new(Failure::default());

        let mut tasks = JoinSet::new();
        for id in 0..config.workers {
            let reader = Reader {
                id,
                backend: Arc::clone(&backend),
                queue: queue.clone(),
                config,
                stop: stop.clone(),
                failure: Arc::clone(&failure),
            };
            tasks.spawn(reader.run());
        }

        Ok(Self {
            stop,
            failure,
            tasks,
        })
    }

    /// Resolves with the first fatal read error.
    ///
    /// This never resolves if all reads succeed.
    pub async fn failed(&self) -> Error {
        self.failure.signal.cancelled().await;
        self.failure
            .take()
            .unwrap_or(Error::WorkerLost("reader"))
    }

    /// Stops re-enqueueing, waits for the readers to drain the queue and returns their totals.
    pub async fn shutdown(mut self) -> Result<ReadSummary, Error> {
        self.stop.cancel();

        let mut total = ReadSummary::default();
        let mut lost = false;
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok(summary) => {
                    total.reads += summary.reads;
                    total.bytes += summary.bytes;
                }
                Err(error) => {
                    tracing::error!(%error, "reader task failed");
                    lost = true;
                }
            }
        }

        if let Some(error) = self.failure.take() {
            return Err(error);
        }
        if lost {
            return Err(Error::WorkerLost("reader"));
        }

        tracing::info!(
            reads = total.reads,
            bytes = %ByteSize::b(total.bytes),
            "readers done"
        );
        Ok(total)
    }
}

struct Reader {
    id: usize,
    backend: SharedBackend,
    queue: LocatorQueue,
    config: ReaderConfig,
    stop: CancellationToken,
    failure: Arc<Failure>,
}

impl Reader {
    async fn run(self) -> ReadSummary {
        let mut summary = ReadSummary::default();

        loop {
            let Some(locator) = self.queue.poll() else {
                if self.stop.is_cancelled() {
                    tracing::debug!(reader = self.id, reads = summary.reads, "reader drained");
                    return summary;
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.config.backoff) => {}
                    _ = self.stop.cancelled() => {}
                }
                continue;
            };

            tracing::debug!(reader = self.id, %locator, "GET");
            match read_object(&*self.backend, &locator, self.config.retry).await {
                Ok(bytes) => {
                    summary.reads += 1;
                    summary.bytes += bytes;
                }
                Err(source) => {
                    tracing::error!(reader = self.id, %locator, error = %source, "read failed");
                    self.failure.record(Error::Read { locator, source });
                    return summary;
                }
            }

            let requeue = rand::rng().random_bool(self.config.requeue_probability);
            if requeue && !self.stop.is_cancelled() && !self.queue.offer(locator) {
                tracing::trace!(reader = self.id, "locator queue full, dropping");
            }
            tokio::task::yield_now().await;
        }
    }
}

/// Fetches the object at `locator` and discards its contents, returning the number of bytes.
async fn read_object(
    backend: &dyn Backend,
    locator: &str,
    policy: RetryPolicy,
) -> Result<u64, BackendError> {
    retry(policy, "read", locator, |_| async move {
        let mut stream = backend.get(locator).await?;
        let mut length = 0;
        while let Some(chunk) = stream.next().await {
            length += chunk?.len() as u64;
        }
        Ok::<_, BackendError>(length)
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::PayloadStream;
    use crate::backend::{BackendResult, InMemoryBackend, Locator, UploadBody};

    fn config(workers: usize) -> ReaderConfig {
        ReaderConfig {
            workers,
            backoff: Duration::from_millis(10),
            requeue_probability: 0.0,
            retry: RetryPolicy::once(),
        }
    }

    #[tokio::test]
    async fn drains_queue_on_shutdown() {
        let backend = InMemoryBackend::new();
        backend.replace("memory://objects/a", &b"abc"[..]);
        backend.replace("memory://objects/b", &b"defg"[..]);

        let queue = LocatorQueue::new(8);
        queue.offer("memory://objects/a".into());
        queue.offer("memory://objects/b".into());

        let pool = ReaderPool::start(Arc::new(backend), queue.clone(), config(2)).unwrap();
        let summary = pool.shutdown().await.unwrap();

        assert_eq!(summary, ReadSummary { reads: 2, bytes: 7 });
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn missing_object_is_fatal() {
        let queue = LocatorQueue::new(8);
        queue.offer("memory://objects/missing".into());

        let pool =
            ReaderPool::start(Arc::new(InMemoryBackend::new()), queue, config(1)).unwrap();
        let error = pool.failed().await;

        assert!(matches!(error, Error::Read { .. }));
    }

    #[tokio::test]
    async fn no_workers_no_reads() {
        let queue = LocatorQueue::new(8);
        queue.offer("memory://objects/a".into());

        let pool = ReaderPool::start(
            Arc::new(InMemoryBackend::new()),
            queue.clone(),
            config(0),
        )
        .unwrap();
        let summary = pool.shutdown().await.unwrap();

        assert_eq!(summary, ReadSummary::default());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn requeued_locators_are_read_again() {
        let backend = InMemoryBackend::new();
        backend.replace("memory://objects/a", &b"abc"[..]);

        let queue = LocatorQueue::new(4);
        queue.offer("memory://objects/a".into());

        let mut config = config(1);
        config.requeue_probability = 1.0;
        let pool = ReaderPool::start(Arc::new(backend), queue.clone(), config).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let summary = pool.shutdown().await.unwrap();

        assert!(summary.reads > 1, "only {} reads", summary.reads);
        assert_eq!(summary.bytes, 3 * summary.reads);
        assert!(queue.is_empty());
    }

    /// Fills the queue with another locator whenever `memory://objects/a` is read.
    #[derive(Debug)]
    struct FillOnRead {
        inner: InMemoryBackend,
        queue: LocatorQueue,
        reads_of_a: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Backend for FillOnRead {
        fn name(&self) -> &'static str {
            "fill-on-read"
        }

        async fn upload(&self, body: UploadBody) -> BackendResult<Locator> {
            self.inner.upload(body).await
        }

        async fn get(&self, locator: &str) -> BackendResult<PayloadStream> {
            if locator == "memory://objects/a" {
                self.reads_of_a.fetch_add(1, Ordering::SeqCst);
                assert!(self.queue.offer("memory://objects/b".into()));
            }
            self.inner.get(locator).await
        }
    }

    #[tokio::test]
    async fn requeue_is_dropped_when_queue_is_full() {
        let inner = InMemoryBackend::new();
        inner.replace("memory://objects/a", &b"a"[..]);
        inner.replace("memory://objects/b", &b"b"[..]);

        let queue = LocatorQueue::new(1);
        queue.offer("memory://objects/a".into());
        let backend = Arc::new(FillOnRead {
            inner,
            queue: queue.clone(),
            reads_of_a: AtomicUsize::new(0),
        });

        let mut config = config(1);
        config.requeue_probability = 1.0;
        let pool = ReaderPool::start(backend.clone(), queue.clone(), config).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        // the queue stays full with `b`, so `a` never makes it back
        assert!(!queue.offer("memory://objects/a".into()));

        let summary = tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .expect("readers blocked on a full queue")
            .unwrap();

        assert!(summary.reads >= 2);
        assert_eq!(backend.reads_of_a.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn rejects_invalid_probability() {
        for probability in [f64::NAN, -0.1, 1.5] {
            let mut config = config(1);
            config.requeue_probability = probability;

            let result = ReaderPool::start(
                Arc::new(InMemoryBackend::new()),
                LocatorQueue::new(1),
                config,
            );
            assert!(
                matches!(result, Err(Error::Config(_))),
                "accepted {probability}"
            );
        }
    }
}
