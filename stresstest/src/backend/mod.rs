//! Storage backends that the stresstest can drive.
//!
//! A [`Backend`] only needs to store a payload and hand back a [`Locator`], and to fetch the
//! bytes behind a locator again. Backends are selected once at startup via [`BackendConfig`].

use std::fmt::{self, Debug};
use std::io;
use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::PayloadStream;

mod aostor;
mod in_memory;
mod weed;

pub use aostor::AostorBackend;
pub use in_memory::InMemoryBackend;
pub use weed::WeedBackend;

/// User agent string used for outgoing requests.
pub const USER_AGENT: &str = concat!("filestore-stresstest/", env!("CARGO_PKG_VERSION"));

/// Name of the multipart form field carrying the payload.
pub const FILE_FIELD: &str = "file";

/// An opaque, backend-assigned identifier of a stored object, usually a fetchable URL.
pub type Locator = String;

/// A type-erased [`Backend`] shared between workers.
pub type SharedBackend = Arc<dyn Backend>;

/// The body of a single upload.
pub struct UploadBody {
    /// The declared media type of the payload.
    pub content_type: String,
    /// The exact number of bytes that `stream` yields.
    pub length: u64,
    /// The payload contents.
    pub stream: PayloadStream,
}

impl Debug for UploadBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadBody")
            .field("content_type", &self.content_type)
            .field("length", &self.length)
            .field("stream", &format_args!("[Stream]"))
            .finish()
    }
}

/// A storage service that objects can be written to and read back from.
#[async_trait::async_trait]
pub trait Backend: Debug + Send + Sync + 'static {
    /// The backend name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Stores the payload and returns a locator for it.
    async fn upload(&self, body: UploadBody) -> BackendResult<Locator>;

    /// Opens a stream over the contents stored at `locator`.
    ///
    /// Only successful responses yield a stream, everything else is an error.
    async fn get(&self, locator: &str) -> BackendResult<PayloadStream>;
}

/// Errors returned by a [`Backend`].
#[derive(Debug, Error)]
pub enum BackendError {
    /// Transport errors and errors building requests.
    #[error("reqwest error: {context}")]
    Reqwest {
        /// What the backend was doing when the request failed.
        context: String,
        /// The transport error.
        #[source]
        cause: reqwest::Error,
    },

    /// The service answered with a status outside the success range.
    #[error("unexpected status {status} from {url}")]
    Status {
        /// The requested URL.
        url: String,
        /// The status of the response.
        status: StatusCode,
    },

    /// The service answered successfully, but the response makes no sense.
    #[error("bad response from {url}: {reason}")]
    BadResponse {
        /// The requested URL.
        url: String,
        /// Why the response was rejected.
        reason: String,
    },

    /// Errors decoding JSON responses.
    #[error("serde error: {context}")]
    Serde {
        /// The response that was being decoded.
        context: String,
        /// The decoding error.
        #[source]
        cause: serde_json::Error,
    },

    /// The locator does not refer to a stored object.
    #[error("object not found: {0}")]
    NotFound(Locator),

    /// I/O errors while streaming payloads.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Selects and configures the backend under test.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// An aostor server, addressed as `host:port/realm`.
    Aostor {
        /// Base URL of the realm.
        url: String,
    },
    /// A weed-fs master server, addressed as `host:port`.
    Weed {
        /// Base URL of the master.
        url: String,
    },
    /// An in-process store that echoes uploads back. Useful for dry runs.
    Memory,
}

impl BackendConfig {
    /// Creates the configured backend.
    ///
    /// With `gzip` set, HTTP backends ask for compressed responses and decode them transparently.
    pub fn build(&self, gzip: bool) -> BackendResult<SharedBackend> {
        let backend: SharedBackend = match self {
            BackendConfig::Aostor { url } => {
                Arc::new(AostorBackend::new(url, reqwest_client(gzip)?))
            }
            BackendConfig::Weed { url } => Arc::new(WeedBackend::new(url, reqwest_client(gzip)?)),
            BackendConfig::Memory => Arc::new(InMemoryBackend::new()),
        };

        Ok(backend)
    }
}

/// Turns a `host:port` shorthand into a base URL.
///
/// A leading `:` means `localhost`, and a missing scheme defaults to `http://`.
pub fn normalize_base_url(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    let address = match address.strip_prefix(':') {
        Some(port) => format!("localhost:{port}"),
        None => address.to_owned(),
    };

    if address.contains("://") {
        address
    } else {
        format!("http://{address}")
    }
}

/// Creates a reqwest client with required defaults.
pub fn reqwest_client(gzip: bool) -> BackendResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .gzip(gzip)
        .build()
        .map_err(|cause| BackendError::Reqwest {
            context: "failed to build http client".into(),
            cause,
        })
}

/// Encodes an upload as a multipart form with a single [`FILE_FIELD`] part.
pub(crate) fn multipart_form(body: UploadBody) -> BackendResult<Form> {
    let part = Part::stream_with_length(reqwest::Body::wrap_stream(body.stream), body.length)
        .file_name(FILE_FIELD)
        .mime_str(&body.content_type)
        .map_err(|cause| BackendError::Reqwest {
            context: format!("invalid content type `{}`", body.content_type),
            cause,
        })?;

    Ok(Form::new().part(FILE_FIELD, part))
}

/// Issues a `GET` and returns the body stream of a successful response.
pub(crate) async fn get_stream(
    client: &reqwest::Client,
    url: &str,
) -> BackendResult<PayloadStream> {
    use futures::{StreamExt, TryStreamExt};

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|cause| BackendError::Reqwest {
            context: format!("GET {url}"),
            cause,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(BackendError::Status {
            url: url.to_owned(),
            status,
        });
    }

    Ok(response.bytes_stream().map_err(io::Error::other).boxed())
}
