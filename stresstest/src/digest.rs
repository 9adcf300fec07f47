//! Integrity checks over streamed payloads.

use std::sync::{Arc, Mutex};
use std::{fmt, io};

use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use sha2::{Digest as _, Sha256};

use crate::PayloadStream;

/// A SHA-256 digest of a payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Computes the digest of an in-memory buffer.
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

/// Consumes `stream` to the end, returning the number of bytes read and their digest.
///
/// The stream's length does not need to be known upfront. Any read error aborts the computation.
pub async fn digest_stream<S>(stream: S) -> io::Result<(u64, Digest)>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut hasher = Sha256::new();
    let mut length = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        length += chunk.len() as u64;
        hasher.update(&chunk);
    }

    Ok((length, Digest(hasher.finalize().into())))
}

#[derive(Debug, Default)]
struct TeeState {
    hasher: Sha256,
    length: u64,
}

/// Hashes the bytes of a stream as they are pulled by its consumer.
///
/// The tee only observes what the consumer actually reads. If an upload stops halfway, the
/// digest covers just the transmitted prefix.
#[derive(Clone, Debug, Default)]
pub struct HashingTee {
    state: Arc<Mutex<TeeState>>,
}

impl HashingTee {
    /// Wraps `stream` so that every chunk yielded to the consumer is fed into this tee.
    pub fn wrap(&self, stream: PayloadStream) -> PayloadStream {
        let state = Arc::clone(&self.state);
        stream
            .inspect_ok(move |chunk| {
                let mut state = state.lock().unwrap();
                state.hasher.update(chunk);
                state.length += chunk.len() as u64;
            })
            .boxed()
    }

    /// Returns the number of bytes seen so far and their digest.
    pub fn finish(&self) -> (u64, Digest) {
        let state = self.state.lock().unwrap();
        (state.length, Digest(state.hasher.clone().finalize().into()))
    }
}
