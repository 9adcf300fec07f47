//! Run an upload round against a backend while readers keep the written objects busy.

use std::sync::Arc;

use crate::backend::SharedBackend;
use crate::error::Error;
use crate::payload::PayloadGenerator;
use crate::queue::{DEFAULT_QUEUE_CAPACITY, LocatorQueue};
use crate::reader::{ReadSummary, ReaderConfig, ReaderPool};
use crate::round::{RoundConfig, RoundSummary, run_round};

/// Parameters of a full stresstest run.
#[derive(Clone, Copy, Debug)]
pub struct RunConfig {
    /// The upload round.
    pub round: RoundConfig,
    /// The readers running alongside the round.
    pub reader: ReaderConfig,
    /// Capacity of the queue between uploads and readers.
    pub queue_capacity: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            round: RoundConfig::default(),
            reader: ReaderConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Totals of a stresstest run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Totals of the upload round.
    pub round: RoundSummary,
    /// Totals of the reader pool.
    pub reads: ReadSummary,
}

/// Runs one upload round against `backend`, with readers draining the written objects.
///
/// The readers are started before the round and shut down after it. A fatal read error aborts the
/// round right away.
pub async fn run(
    backend: SharedBackend,
    generator: PayloadGenerator,
    config: &RunConfig,
) -> Result<RunSummary, Error> {
    let queue = LocatorQueue::new(config.queue_capacity);
    let readers = if config.reader.workers > 0 {
        Some(ReaderPool::start(
            Arc::clone(&backend),
            queue.clone(),
            config.reader,
        )?)
    } else {
        None
    };

    tracing::info!(
        backend = backend.name(),
        writers = config.round.parallel,
        per_writer = config.round.per_worker,
        readers = config.reader.workers,
        "starting stresstest"
    );

    let round = run_round(Arc::clone(&backend), generator, &config.round, queue.clone());
    let round = match &readers {
        Some(readers) => tokio::select! {
            result = round => result?,
            error = readers.failed() => return Err(error),
        },
        None => round.await?,
    };

    let reads = match readers {
        Some(readers) => readers.shutdown().await?,
        None => ReadSummary::default(),
    };

    Ok(RunSummary { round, reads })
}
