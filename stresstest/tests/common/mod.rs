#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use bytesize::ByteSize;
use filestore_stresstest::PayloadStream;
use filestore_stresstest::backend::{
    Backend, BackendError, BackendResult, InMemoryBackend, Locator, UploadBody,
};
use filestore_stresstest::payload::{PayloadConfig, PayloadGenerator};

/// A way in which [`FaultyBackend`] misbehaves.
#[derive(Clone, Copy, Debug)]
pub enum Fault {
    /// Behave correctly.
    None,
    /// Fail the first `n` reads of every object.
    FailGets(u32),
    /// Fail all reads.
    AlwaysFail,
    /// Store one byte less than uploaded.
    Truncate,
    /// Flip the first stored byte.
    Corrupt,
    /// Report success without a locator.
    EmptyLocator,
}

/// An in-memory backend with injectable faults.
#[derive(Debug)]
pub struct FaultyBackend {
    pub inner: InMemoryBackend,
    fault: Fault,
    gets: AtomicU32,
}

impl FaultyBackend {
    pub fn new(fault: Fault) -> Self {
        Self {
            inner: InMemoryBackend::new(),
            fault,
            gets: AtomicU32::new(0),
        }
    }

    /// The number of `get` calls so far.
    pub fn gets(&self) -> u32 {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Backend for FaultyBackend {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn upload(&self, body: UploadBody) -> BackendResult<Locator> {
        let locator = self.inner.upload(body).await?;
        let stored = self.inner.get_stored(&locator).unwrap_or_default();

        match self.fault {
            Fault::Truncate if !stored.is_empty() => {
                self.inner
                    .replace(&locator, stored.slice(..stored.len() - 1));
            }
            Fault::Corrupt if !stored.is_empty() => {
                let mut data = stored.to_vec();
                data[0] ^= 0xff;
                self.inner.replace(&locator, data);
            }
            Fault::EmptyLocator => return Ok(String::new()),
            _ => {}
        }

        Ok(locator)
    }

    async fn get(&self, locator: &str) -> BackendResult<PayloadStream> {
        let attempt = self.gets.fetch_add(1, Ordering::SeqCst);
        match self.fault {
            Fault::FailGets(n) if attempt < n => Err(BackendError::NotFound(locator.into())),
            Fault::AlwaysFail => Err(BackendError::NotFound(locator.into())),
            _ => self.inner.get(locator).await,
        }
    }
}

/// An in-memory backend that tracks how many reads are in flight at once.
#[derive(Debug, Default)]
pub struct CountingBackend {
    pub inner: InMemoryBackend,
    active: AtomicUsize,
    max_active: AtomicUsize,
    reads: AtomicUsize,
}

impl CountingBackend {
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Backend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn upload(&self, body: UploadBody) -> BackendResult<Locator> {
        self.inner.upload(body).await
    }

    async fn get(&self, locator: &str) -> BackendResult<PayloadStream> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.reads.fetch_add(1, Ordering::SeqCst);

        self.inner.get(locator).await
    }
}

/// A reproducible generator producing payloads between `init` and `max` bytes.
pub fn generator(init: u64, max: u64, step: u64) -> PayloadGenerator {
    let config = PayloadConfig {
        init_size: ByteSize::b(init),
        max_size: ByteSize::b(max),
        size_step: ByteSize::b(step),
        compressible: false,
    };
    PayloadGenerator::seeded(&config, 42).unwrap()
}

pub fn shared<B: Backend>(backend: B) -> Arc<B> {
    Arc::new(backend)
}

pub fn bytes_of(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| i as u8).collect::<Vec<_>>())
}
