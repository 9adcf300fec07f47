//! The bounded queue of locators that feeds the reader pool.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::backend::Locator;

/// Default number of locators the queue can hold.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// A bounded multi-producer, multi-consumer queue of [`Locator`]s.
///
/// All operations are non-blocking. [`offer`](Self::offer) drops the locator when the queue is
/// full, which makes the capacity the only point of buffering between uploads and reads.
#[derive(Clone, Debug)]
pub struct LocatorQueue {
    tx: mpsc::Sender<Locator>,
    rx: Arc<Mutex<mpsc::Receiver<Locator>>>,
}

impl LocatorQueue {
    /// Creates an empty queue. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Enqueues `locator` unless the queue is full. Returns whether it was accepted.
    pub fn offer(&self, locator: Locator) -> bool {
        self.tx.try_send(locator).is_ok()
    }

    /// Dequeues the next locator, if there is one.
    pub fn poll(&self) -> Option<Locator> {
        self.rx.lock().unwrap().try_recv().ok()
    }

    /// The number of locators currently queued.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Returns `true` if no locators are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The maximum number of locators the queue holds.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

impl Default for LocatorQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
