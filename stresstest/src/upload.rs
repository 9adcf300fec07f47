//! Uploads that are verified by reading them back immediately.

use std::io;

use thiserror::Error;

use crate::backend::{Backend, BackendError, Locator, UploadBody};
use crate::digest::{Digest, HashingTee, digest_stream};
use crate::payload::Payload;
use crate::retry::{RetryPolicy, retry};

/// Errors of a [`checked_upload`].
#[derive(Debug, Error)]
pub enum UploadError {
    /// The backend rejected the upload. This is never retried.
    #[error("upload failed: {0}")]
    Upload(#[source] BackendError),

    /// The backend reported success but did not return a locator.
    #[error("upload returned an empty locator")]
    EmptyLocator,

    /// The object could not be fetched back within the retry budget.
    #[error("cannot fetch {locator} after {attempts} attempts: {source}")]
    Fetch {
        /// The locator returned by the upload.
        locator: Locator,
        /// Number of fetch attempts made.
        attempts: u32,
        /// The error of the last attempt.
        #[source]
        source: BackendError,
    },

    /// Reading the fetched object failed halfway.
    #[error("error reading back {locator}: {source}")]
    ReadBack {
        /// The object being read.
        locator: Locator,
        /// The error raised by the body stream.
        #[source]
        source: io::Error,
    },

    /// The stored object has a different size than the payload.
    #[error("length mismatch for {locator}: uploaded {expected} bytes, read back {actual}")]
    LengthMismatch {
        /// The object that was read back.
        locator: Locator,
        /// Number of bytes uploaded.
        expected: u64,
        /// Number of bytes read back.
        actual: u64,
    },

    /// The stored object has the right size but different contents.
    #[error("digest mismatch for {locator}: uploaded {expected}, read back {actual}")]
    DigestMismatch {
        /// The object that was read back.
        locator: Locator,
        /// Digest of the uploaded bytes.
        expected: Digest,
        /// Digest of the bytes read back.
        actual: Digest,
    },
}

/// Options of a [`checked_upload`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CheckOptions {
    /// Retries of the read-back request.
    pub readback: RetryPolicy,
    /// Log the details of this upload at `INFO` level.
    pub dump: bool,
}

/// Uploads `payload` and verifies that the backend returns exactly the same bytes.
///
/// The uploaded digest is computed over the bytes the backend actually consumed. The read-back
/// request is retried according to [`CheckOptions::readback`], while the upload itself is not.
pub async fn checked_upload(
    backend: &dyn Backend,
    payload: &Payload,
    options: &CheckOptions,
) -> Result<Locator, UploadError> {
    let tee = HashingTee::default();
    let body = UploadBody {
        content_type: payload.content_type().to_owned(),
        length: payload.len(),
        stream: tee.wrap(payload.stream()),
    };

    let locator = backend.upload(body).await.map_err(UploadError::Upload)?;
    let (sent, uploaded) = tee.finish();

    if options.dump {
        tracing::info!(
            backend = backend.name(),
            content_type = payload.content_type(),
            length = payload.len(),
            sent,
            digest = %uploaded,
            %locator,
            "uploaded payload"
        );
    }

    if locator.is_empty() {
        return Err(UploadError::EmptyLocator);
    }

    let stream = retry(options.readback, "get", &locator, |_| backend.get(&locator))
        .await
        .map_err(|source| UploadError::Fetch {
            locator: locator.clone(),
            attempts: options.readback.max_attempts.max(1),
            source,
        })?;

    let (length, digest) = match digest_stream(stream).await {
        Ok(result) => result,
        Err(source) => return Err(UploadError::ReadBack { locator, source }),
    };

    if length != payload.len() {
        return Err(UploadError::LengthMismatch {
            locator,
            expected: payload.len(),
            actual: length,
        });
    }
    if digest != uploaded {
        return Err(UploadError::DigestMismatch {
            locator,
            expected: uploaded,
            actual: digest,
        });
    }

    tracing::trace!(%locator, length, "verified upload");
    Ok(locator)
}
