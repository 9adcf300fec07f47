//! A round of parallel checked uploads.

use std::sync::Arc;

use bytesize::ByteSize;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::SharedBackend;
use crate::error::Error;
use crate::payload::PayloadGenerator;
use crate::queue::LocatorQueue;
use crate::upload::{CheckOptions, checked_upload};

/// Parameters of an upload round.
#[derive(Clone, Copy, Debug)]
pub struct RoundConfig {
    /// The number of concurrent upload workers.
    pub parallel: usize,
    /// The number of payloads every worker uploads.
    pub per_worker: usize,
    /// Upload a payload a second time with a chance of `1 / same_odds`. Zero disables this.
    pub same_odds: u32,
    /// How uploads are verified. `dump` only applies to the very first upload of the round.
    pub check: CheckOptions,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            parallel: 1,
            per_worker: 100,
            same_odds: 0,
            check: CheckOptions::default(),
        }
    }
}

/// Totals of a finished round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoundSummary {
    /// Successful checked uploads.
    pub uploads: u64,
    /// Bytes uploaded and verified.
    pub bytes: u64,
}

impl RoundSummary {
    fn merge(&mut self, other: &RoundSummary) {
        self.uploads += other.uploads;
        self.bytes += other.bytes;
    }
}

struct UploadWorker {
    id: usize,
    backend: SharedBackend,
    generator: PayloadGenerator,
    config: RoundConfig,
    sink: LocatorQueue,
    cancel: CancellationToken,
    done_tx: mpsc::Sender<RoundSummary>,
    err_tx: mpsc::Sender<Error>,
}

impl UploadWorker {
    async fn run(self) {
        let mut summary = RoundSummary::default();

        for iteration in 0..self.config.per_worker {
            if self.cancel.is_cancelled() {
                tracing::debug!(worker = self.id, iteration, "upload worker cancelled");
                return;
            }

            let payload = match self.generator.generate("") {
                Ok(payload) => payload,
                Err(error) => {
                    tracing::error!(worker = self.id, iteration, %error, "cannot generate payload");
                    self.err_tx.send(error.into()).await.ok();
                    return;
                }
            };

            let same_odds = self.config.same_odds;
            let repeat = same_odds > 0 && rand::rng().random_ratio(1, same_odds);
            let uploads = if repeat { 2 } else { 1 };

            for _ in 0..uploads {
                let mut options = self.config.check;
                options.dump &= self.id == 0 && summary.uploads == 0;

                match checked_upload(&*self.backend, &payload, &options).await {
                    Ok(locator) => {
                        summary.uploads += 1;
                        summary.bytes += payload.len();
                        if !self.sink.offer(locator) {
                            tracing::trace!(worker = self.id, "locator queue full, dropping");
                        }
                    }
                    Err(error) => {
                        tracing::error!(worker = self.id, iteration, %error, "checked upload failed");
                        self.err_tx.send(error.into()).await.ok();
                        return;
                    }
                }
            }
        }

        self.done_tx.send(summary).await.ok();
    }
}

/// Runs `config.parallel` upload workers to completion.
///
/// Every verified locator is offered to `sink`, and dropped if the sink is full. The first error
/// reported by any worker is returned right away. Other workers finish the upload they are
/// working on, but do not start another one.
pub async fn run_round(
    backend: SharedBackend,
    generator: PayloadGenerator,
    config: &RoundConfig,
    sink: LocatorQueue,
) -> Result<RoundSummary, Error> {
    let capacity = config.parallel.max(1);
    let (done_tx, mut done_rx) = mpsc::channel(capacity);
    let (err_tx, mut err_rx) = mpsc::channel(capacity);

    let cancel = CancellationToken::new();
    let _cancel_on_exit = cancel.clone().drop_guard();

    for id in 0..config.parallel {
        let worker = UploadWorker {
            id,
            backend: Arc::clone(&backend),
            generator: generator.clone(),
            config: *config,
            sink: sink.clone(),
            cancel: cancel.clone(),
            done_tx: done_tx.clone(),
            err_tx: err_tx.clone(),
        };
        tokio::spawn(worker.run());
    }
    drop(done_tx);
    drop(err_tx);

    let mut total = RoundSummary::default();
    let mut finished = 0;
    while finished < config.parallel {
        tokio::select! {
            biased;
            Some(error) = err_rx.recv() => return Err(error),
            done = done_rx.recv() => match done {
                Some(summary) => {
                    finished += 1;
                    total.merge(&summary);
                }
                None => return Err(Error::WorkerLost("upload")),
            },
        }
    }

    tracing::info!(
        backend = backend.name(),
        uploads = total.uploads,
        bytes = %ByteSize::b(total.bytes),
        "upload round done"
    );
    Ok(total)
}
