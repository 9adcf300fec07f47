use std::sync::Arc;
use std::time::Duration;

use filestore_stresstest::Error;
use filestore_stresstest::backend::InMemoryBackend;
use filestore_stresstest::queue::LocatorQueue;
use filestore_stresstest::reader::{ReaderConfig, ReaderPool};
use filestore_stresstest::retry::RetryPolicy;
use filestore_stresstest::round::{RoundConfig, run_round};
use filestore_stresstest::stresstest::{RunConfig, run};
use filestore_stresstest::upload::UploadError;

use crate::common::{CountingBackend, Fault, FaultyBackend, generator};

mod common;

fn round(parallel: usize, per_worker: usize) -> RoundConfig {
    RoundConfig {
        parallel,
        per_worker,
        ..Default::default()
    }
}

#[tokio::test]
async fn uploads_every_request() {
    filestore_test::tracing::init();
    let backend = InMemoryBackend::new();
    let queue = LocatorQueue::new(100);

    let summary = run_round(
        Arc::new(backend.clone()),
        generator(16, 256, 16),
        &round(3, 10),
        queue.clone(),
    )
    .await
    .unwrap();

    assert_eq!(summary.uploads, 30);
    assert_eq!(backend.len(), 30);
    assert_eq!(queue.len(), 30);
}

#[tokio::test]
async fn drops_locators_beyond_capacity() {
    let backend = InMemoryBackend::new();
    let queue = LocatorQueue::new(4);

    let summary = run_round(
        Arc::new(backend.clone()),
        generator(16, 64, 16),
        &round(3, 10),
        queue.clone(),
    )
    .await
    .unwrap();

    assert_eq!(summary.uploads, 30);
    assert_eq!(queue.len(), 4);
}

#[tokio::test]
async fn first_error_aborts_round() {
    let backend = Arc::new(FaultyBackend::new(Fault::Corrupt));

    let error = run_round(
        backend,
        generator(16, 64, 16),
        &round(2, 10),
        LocatorQueue::new(10),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        error,
        Error::Upload(UploadError::DigestMismatch { .. })
    ));
    assert_eq!(error.exit_code(), 9);
}

#[tokio::test]
async fn readers_stay_within_parallelism() {
    let backend = Arc::new(CountingBackend::default());
    let queue = LocatorQueue::new(50);

    let config = ReaderConfig {
        workers: 3,
        backoff: Duration::from_millis(1),
        requeue_probability: 0.5,
        retry: RetryPolicy::once(),
    };
    let readers = ReaderPool::start(backend.clone(), queue.clone(), config).unwrap();

    // uploads bypass the counter, only reads of the pool are tracked
    run_round(
        Arc::new(backend.inner.clone()),
        generator(16, 64, 16),
        &round(2, 20),
        queue.clone(),
    )
    .await
    .unwrap();

    let reads = readers.shutdown().await.unwrap();

    assert!(backend.max_active() <= 3);
    assert!(reads.reads >= 1);
    assert_eq!(reads.reads as usize, backend.reads());
    assert!(queue.is_empty());
}

#[tokio::test]
async fn run_reports_totals() {
    let backend = Arc::new(CountingBackend::default());
    let config = RunConfig {
        round: round(2, 5),
        reader: ReaderConfig {
            workers: 2,
            backoff: Duration::from_millis(1),
            requeue_probability: 0.0,
            retry: RetryPolicy::once(),
        },
        queue_capacity: 100,
    };

    let summary = run(backend.clone(), generator(16, 64, 16), &config)
        .await
        .unwrap();

    assert_eq!(summary.round.uploads, 10);
    // without re-enqueueing, every verified upload is read exactly once
    assert_eq!(summary.reads.reads, 10);
    assert_eq!(summary.reads.bytes, summary.round.bytes);
    // read-backs of the checked uploads plus one read per object in the pool
    assert_eq!(backend.reads(), 20);
}

#[tokio::test]
async fn reader_failure_is_fatal() {
    let queue = LocatorQueue::new(10);
    queue.offer("memory://objects/gone".into());

    let config = ReaderConfig {
        workers: 1,
        backoff: Duration::from_millis(1),
        requeue_probability: 1.0,
        retry: RetryPolicy::once(),
    };
    let readers = ReaderPool::start(Arc::new(InMemoryBackend::new()), queue, config).unwrap();

    let error = readers.failed().await;
    assert!(matches!(error, Error::Read { .. }));
    assert_eq!(error.exit_code(), 3);
}

#[tokio::test]
async fn shutdown_with_full_queue_is_bounded() {
    let backend = Arc::new(CountingBackend::default());
    let queue = LocatorQueue::new(100);
    for i in 0..100 {
        let locator = format!("memory://objects/{i}");
        backend.inner.replace(&locator, &b"data"[..]);
        assert!(queue.offer(locator));
    }

    let config = ReaderConfig {
        workers: 4,
        backoff: Duration::from_secs(60),
        requeue_probability: 1.0,
        retry: RetryPolicy::once(),
    };
    let readers = ReaderPool::start(backend.clone(), queue.clone(), config).unwrap();

    let reads = tokio::time::timeout(Duration::from_secs(5), readers.shutdown())
        .await
        .expect("readers did not stop in time")
        .unwrap();

    assert!(reads.reads >= 100);
    assert!(queue.is_empty());
    assert!(backend.max_active() <= 4);
}
