//! Top-level errors of a stresstest run and the process exit codes they map to.

use thiserror::Error;

use crate::backend::{BackendError, Locator};
use crate::payload::GeneratorError;
use crate::upload::UploadError;

/// Process exit code for configuration errors, including a missing backend selection.
pub const EXIT_CONFIG: u8 = 1;
/// Process exit code when payloads cannot be generated.
pub const EXIT_GENERATOR: u8 = 2;
/// Process exit code when the reader pool fails to read an object.
pub const EXIT_READ: u8 = 3;
/// Process exit code when the upload round fails.
pub const EXIT_ROUND: u8 = 9;

/// Errors that abort a stresstest run.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration is incomplete or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// Payloads could not be generated.
    #[error("payload error: {0}")]
    Generator(#[from] GeneratorError),

    /// A checked upload failed.
    #[error("checked upload failed: {0}")]
    Upload(#[from] UploadError),

    /// The backend could not be set up.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The reader pool failed to read an object.
    #[error("reading {locator} failed: {source}")]
    Read {
        /// The object that could not be read.
        locator: Locator,
        /// The underlying backend failure.
        #[source]
        source: BackendError,
    },

    /// A worker task ended without reporting back.
    #[error("{0} worker terminated unexpectedly")]
    WorkerLost(&'static str),
}

impl Error {
    /// The process exit code matching this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config(_) | Error::Backend(_) => EXIT_CONFIG,
            Error::Generator(GeneratorError::InvalidConfig(_)) => EXIT_CONFIG,
            Error::Generator(GeneratorError::Entropy { .. }) => EXIT_GENERATOR,
            Error::Read { .. } => EXIT_READ,
            Error::Upload(_) | Error::WorkerLost(_) => EXIT_ROUND,
        }
    }
}
