//! In-memory backend for tests and dry runs.
//!
//! This provides a [`Backend`] backed by a `HashMap` which returns uploaded bytes verbatim. The
//! backend is [`Clone`] so tests can hold a handle for direct inspection while the workers own a
//! shared copy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt};

use super::{Backend, BackendError, BackendResult, Locator, UploadBody};
use crate::PayloadStream;

type Store = HashMap<Locator, Bytes>;

/// A [`Backend`] that keeps all objects in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    store: Arc<Mutex<Store>>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryBackend {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of the stored bytes, if present.
    pub fn get_stored(&self, locator: &str) -> Option<Bytes> {
        self.store.lock().unwrap().get(locator).cloned()
    }

    /// Overwrites the contents behind `locator`, bypassing the `Backend` trait.
    ///
    /// Useful for simulating corruption on the storage side.
    pub fn replace(&self, locator: &str, data: impl Into<Bytes>) {
        self.store
            .lock()
            .unwrap()
            .insert(locator.to_owned(), data.into());
    }

    /// Returns the number of stored objects.
    pub fn len(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    /// Returns `true` if the backend has no stored objects.
    pub fn is_empty(&self) -> bool {
        self.store.lock().unwrap().is_empty()
    }
}

#[async_trait::async_trait]
impl Backend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upload(&self, body: UploadBody) -> BackendResult<Locator> {
        let bytes: BytesMut = body.stream.try_collect().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let locator = format!("memory://objects/{id}");

        self.store
            .lock()
            .unwrap()
            .insert(locator.clone(), bytes.freeze());
        Ok(locator)
    }

    async fn get(&self, locator: &str) -> BackendResult<PayloadStream> {
        let bytes = self
            .get_stored(locator)
            .ok_or_else(|| BackendError::NotFound(locator.to_owned()))?;
        Ok(futures::stream::once(async move { Ok(bytes) }).boxed())
    }
}
