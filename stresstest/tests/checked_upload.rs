use std::time::Duration;

use filestore_stresstest::Payload;
use filestore_stresstest::backend::InMemoryBackend;
use filestore_stresstest::retry::RetryPolicy;
use filestore_stresstest::upload::{CheckOptions, UploadError, checked_upload};

use crate::common::{Fault, FaultyBackend, bytes_of};

mod common;

fn options() -> CheckOptions {
    CheckOptions {
        readback: RetryPolicy::new(10, Duration::from_secs(1)),
        dump: false,
    }
}

#[tokio::test]
async fn verifies_intact_upload() {
    filestore_test::tracing::init();
    let backend = InMemoryBackend::new();
    let payload = Payload::new("", bytes_of(1000));

    let locator = checked_upload(&backend, &payload, &options()).await.unwrap();

    assert_eq!(backend.get_stored(&locator).unwrap(), *payload.data());
    assert_eq!(payload.content_type(), "application/octet-stream");
}

#[tokio::test]
async fn detects_truncation() {
    for len in [1, 128, 65536] {
        let backend = FaultyBackend::new(Fault::Truncate);
        let payload = Payload::new("", bytes_of(len));

        let error = checked_upload(&backend, &payload, &options())
            .await
            .unwrap_err();

        match error {
            UploadError::LengthMismatch {
                expected, actual, ..
            } => {
                assert_eq!(expected, len as u64);
                assert_eq!(actual, len as u64 - 1);
            }
            other => panic!("unexpected error for {len} bytes: {other}"),
        }
    }
}

#[tokio::test]
async fn detects_corruption() {
    let backend = FaultyBackend::new(Fault::Corrupt);
    let payload = Payload::new("", bytes_of(4096));

    let error = checked_upload(&backend, &payload, &options())
        .await
        .unwrap_err();

    let UploadError::DigestMismatch {
        expected, actual, ..
    } = error
    else {
        panic!("unexpected error: {error}");
    };
    assert_ne!(expected, actual);
}

#[tokio::test(start_paused = true)]
async fn retries_read_back() {
    let backend = FaultyBackend::new(Fault::FailGets(9));
    let payload = Payload::new("text/plain", bytes_of(64));

    checked_upload(&backend, &payload, &options()).await.unwrap();

    assert_eq!(backend.gets(), 10);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_ten_attempts() {
    let backend = FaultyBackend::new(Fault::AlwaysFail);
    let payload = Payload::new("", bytes_of(64));

    let error = checked_upload(&backend, &payload, &options())
        .await
        .unwrap_err();

    assert!(matches!(error, UploadError::Fetch { attempts: 10, .. }));
    assert_eq!(backend.gets(), 10);
}

#[tokio::test]
async fn rejects_empty_locator() {
    let backend = FaultyBackend::new(Fault::EmptyLocator);
    let payload = Payload::new("", bytes_of(16));

    let error = checked_upload(&backend, &payload, &options())
        .await
        .unwrap_err();

    assert!(matches!(error, UploadError::EmptyLocator));
    assert_eq!(backend.gets(), 0);
}

#[tokio::test]
async fn same_payload_twice() {
    let backend = InMemoryBackend::new();
    let payload = Payload::new("", bytes_of(512));

    let first = checked_upload(&backend, &payload, &options()).await.unwrap();
    let second = checked_upload(&backend, &payload, &options()).await.unwrap();

    assert_ne!(first, second);
    assert_eq!(backend.len(), 2);
}
