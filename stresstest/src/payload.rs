//! Synthetic [`Payload`]s cut out of a shared pool of random bytes.
//!
//! The [`PayloadGenerator`] fills its pool exactly once, on the first request, and afterwards
//! only hands out copies of windows into that pool. Windows slide forward by one byte per call
//! within a size tier. Once a window of the current size no longer fits, the cursor restarts at
//! the beginning of the pool with the next size tier. This yields a reproducible cycle of payload
//! sizes from `init_size` up to `max_size` without reading fresh entropy for every upload.

use std::io;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use bytesize::ByteSize;
use futures::StreamExt;
use rand::rngs::{OsRng, SmallRng};
use rand::{RngCore, SeedableRng, TryRngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::PayloadStream;

/// Content type used for payloads that do not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Size of the chunks that a payload is streamed in.
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Upper bound for the number of times the random prefix is repeated in compressible mode.
const MAX_TILE_MULTIPLIER: usize = 256;

/// Errors raised while producing payloads.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// The random source could not provide enough bytes to fill the pool.
    #[error("cannot read {requested} bytes of entropy: {cause}")]
    Entropy {
        /// Number of bytes the pool needed.
        requested: usize,
        /// The failure of the random source.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The size parameters cannot produce a non-empty window.
    #[error("invalid payload configuration: {0}")]
    InvalidConfig(String),
}

/// Size parameters of generated payloads.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PayloadConfig {
    /// Size of the first window, and the size the cycle wraps back to.
    pub init_size: ByteSize,
    /// Largest window size. Also the capacity of the random pool.
    ///
    /// Values below `init_size` are replaced by `2 * init_size`.
    pub max_size: ByteSize,
    /// Growth of the window whenever the cursor wraps around the pool.
    pub size_step: ByteSize,
    /// Tile a short random block across the pool so that payloads compress well.
    pub compressible: bool,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            init_size: ByteSize::b(1 << 15),
            max_size: ByteSize::b(1 << 20),
            size_step: ByteSize::b(1 << 15),
            compressible: false,
        }
    }
}

/// An immutable blob handed to a backend, along with its declared content type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload {
    content_type: String,
    data: Bytes,
}

impl Payload {
    /// Creates a payload, falling back to [`DEFAULT_CONTENT_TYPE`] for an empty `content_type`.
    pub fn new(content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let mut content_type = content_type.into();
        if content_type.is_empty() {
            content_type = DEFAULT_CONTENT_TYPE.to_owned();
        }

        Self {
            content_type,
            data: data.into(),
        }
    }

    /// The media type declared for this payload.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The raw contents.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// The length of the payload in bytes.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Streams the contents in fixed-size chunks without copying them.
    pub fn stream(&self) -> PayloadStream {
        let data = self.data.clone();
        let len = data.len();

        let chunks = (0..len).step_by(STREAM_CHUNK_SIZE).map(move |start| {
            let end = (start + STREAM_CHUNK_SIZE).min(len);
            Ok::<_, io::Error>(data.slice(start..end))
        });

        futures::stream::iter(chunks).boxed()
    }
}

/// Validated window sizes, in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Limits {
    init: usize,
    max: usize,
    step: usize,
    compressible: bool,
}

impl Limits {
    fn new(config: &PayloadConfig) -> Result<Self, GeneratorError> {
        let init = usize::try_from(config.init_size.as_u64())
            .map_err(|_| GeneratorError::InvalidConfig("init_size does not fit memory".into()))?;
        let mut max = usize::try_from(config.max_size.as_u64())
            .map_err(|_| GeneratorError::InvalidConfig("max_size does not fit memory".into()))?;
        let step = usize::try_from(config.size_step.as_u64())
            .map_err(|_| GeneratorError::InvalidConfig("size_step does not fit memory".into()))?;

        if init == 0 {
            return Err(GeneratorError::InvalidConfig("init_size must not be zero".into()));
        }
        if step == 0 {
            return Err(GeneratorError::InvalidConfig("size_step must not be zero".into()));
        }
        if max < init {
            max = init.checked_mul(2).ok_or_else(|| {
                GeneratorError::InvalidConfig("init_size is too large to double".into())
            })?;
        }

        Ok(Self {
            init,
            max,
            step,
            compressible: config.compressible,
        })
    }

    /// The size of the random pool, which always fits the largest window.
    fn capacity(&self) -> usize {
        self.max
    }
}

/// The position and length of the next window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Cursor {
    position: usize,
    size: usize,
}

impl Cursor {
    fn advance(&mut self, limits: &Limits) {
        if self.position + 1 + self.size <= limits.capacity() {
            self.position += 1;
            return;
        }

        self.position = 0;
        self.size = if self.size >= limits.max {
            limits.init
        } else {
            (self.size + limits.step).min(limits.max)
        };
    }
}

#[derive(Debug)]
enum Entropy {
    Os,
    Seeded(Box<SmallRng>),
}

impl Entropy {
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), GeneratorError> {
        let requested = buf.len();
        match self {
            Entropy::Os => OsRng
                .try_fill_bytes(buf)
                .map_err(|cause| GeneratorError::Entropy {
                    requested,
                    cause: cause.into(),
                }),
            Entropy::Seeded(rng) => {
                rng.fill_bytes(buf);
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
struct PoolState {
    entropy: Entropy,
    /// Empty until the first payload is requested.
    pool: Vec<u8>,
    cursor: Cursor,
}

/// Produces payloads of a cycling size from a lazily filled pool of random bytes.
///
/// The generator is a cheap handle. Clones share the same pool and cursor, and all calls are
/// serialized internally, so it can be handed to any number of concurrent upload workers.
#[derive(Clone, Debug)]
pub struct PayloadGenerator {
    limits: Limits,
    state: Arc<Mutex<PoolState>>,
}

impl PayloadGenerator {
    /// Creates a generator drawing its pool from the operating system's secure random source.
    pub fn new(config: &PayloadConfig) -> Result<Self, GeneratorError> {
        Self::with_entropy(config, Entropy::Os)
    }

    /// Creates a generator with a reproducible pool derived from `seed`.
    pub fn seeded(config: &PayloadConfig, seed: u64) -> Result<Self, GeneratorError> {
        let rng = SmallRng::seed_from_u64(seed);
        Self::with_entropy(config, Entropy::Seeded(Box::new(rng)))
    }

    fn with_entropy(config: &PayloadConfig, entropy: Entropy) -> Result<Self, GeneratorError> {
        let limits = Limits::new(config)?;
        let state = PoolState {
            entropy,
            pool: Vec::new(),
            cursor: Cursor {
                position: 0,
                size: limits.init,
            },
        };

        Ok(Self {
            limits,
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Returns the next window of the pool as an independently owned payload.
    ///
    /// The first call fills the pool. Failing to read entropy is not retried.
    pub fn generate(&self, content_type: &str) -> Result<Payload, GeneratorError> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        if state.pool.is_empty() {
            state.pool = fill_pool(&mut state.entropy, &self.limits)?;
            tracing::debug!(
                capacity = %ByteSize::b(state.pool.len() as u64),
                compressible = self.limits.compressible,
                "filled payload pool"
            );
        }

        let Cursor { position, size } = state.cursor;
        let data = Bytes::copy_from_slice(&state.pool[position..position + size]);
        assert!(
            !data.is_empty(),
            "generated an empty payload at position {position}"
        );
        state.cursor.advance(&self.limits);
        drop(guard);

        Ok(Payload::new(content_type, data))
    }
}

fn fill_pool(entropy: &mut Entropy, limits: &Limits) -> Result<Vec<u8>, GeneratorError> {
    let capacity = limits.capacity();
    let mut pool = vec![0; capacity];

    if !limits.compressible {
        entropy.fill(&mut pool)?;
        return Ok(pool);
    }

    let prefix = compressible_prefix(capacity, limits.init);
    entropy.fill(&mut pool[..prefix])?;
    let mut start = prefix;
    while start < capacity {
        let len = prefix.min(capacity - start);
        pool.copy_within(..len, start);
        start += len;
    }

    Ok(pool)
}

/// Length of the random block that gets repeated across the pool.
///
/// This is `capacity / multiplier` for the largest power-of-two multiplier up to
/// [`MAX_TILE_MULTIPLIER`] whose block still covers `init_size`.
fn compressible_prefix(capacity: usize, init_size: usize) -> usize {
    let mut multiplier = MAX_TILE_MULTIPLIER;
    while multiplier > 1 && capacity / multiplier < init_size {
        multiplier /= 2;
    }
    capacity / multiplier
}
