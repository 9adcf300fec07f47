//! Backend for weed-fs, which assigns file ids on the master and stores on volume servers.

use serde::Deserialize;

use super::{
    Backend, BackendError, BackendResult, Locator, UploadBody, get_stream, multipart_form,
    normalize_base_url,
};
use crate::PayloadStream;

/// Response of the master's `/dir/assign` endpoint.
///
/// ```json
/// {"count":1,"fid":"3,01637037d6","url":"127.0.0.1:8080","publicUrl":"localhost:8080"}
/// ```
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Assignment {
    #[serde(default)]
    fid: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    public_url: String,
}

impl Assignment {
    fn locator(&self) -> Locator {
        let host = if self.public_url.is_empty() {
            &self.url
        } else {
            &self.public_url
        };
        format!("{}/{}", normalize_base_url(host), self.fid)
    }
}

/// A backend talking to a weed-fs cluster.
///
/// Every upload first asks the master for a file id and a volume server, and then posts the
/// payload to that volume server. The resulting URL is the locator.
#[derive(Debug)]
pub struct WeedBackend {
    master_url: String,
    client: reqwest::Client,
}

impl WeedBackend {
    /// Creates a backend for the master at `address`.
    pub fn new(address: &str, client: reqwest::Client) -> Self {
        Self {
            master_url: normalize_base_url(address),
            client,
        }
    }

    async fn assign(&self) -> BackendResult<Assignment> {
        let url = format!("{}/dir/assign", self.master_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|cause| BackendError::Reqwest {
                context: format!("GET {url}"),
                cause,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status { url, status });
        }

        let body = response
            .bytes()
            .await
            .map_err(|cause| BackendError::Reqwest {
                context: format!("reading response of GET {url}"),
                cause,
            })?;
        let assignment: Assignment =
            serde_json::from_slice(&body).map_err(|cause| BackendError::Serde {
                context: format!("decoding assignment from {url}"),
                cause,
            })?;

        if assignment.fid.is_empty() {
            return Err(BackendError::BadResponse {
                url,
                reason: "no file id assigned".into(),
            });
        }

        Ok(assignment)
    }
}

#[async_trait::async_trait]
impl Backend for WeedBackend {
    fn name(&self) -> &'static str {
        "weed"
    }

    async fn upload(&self, body: UploadBody) -> BackendResult<Locator> {
        let url = self.assign().await?.locator();
        tracing::trace!(%url, length = body.length, "POST");

        let response = self
            .client
            .post(&url)
            .multipart(multipart_form(body)?)
            .send()
            .await
            .map_err(|cause| BackendError::Reqwest {
                context: format!("POST {url}"),
                cause,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status { url, status });
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            match response.text().await {
                Ok(text) => tracing::debug!(%url, response = %text.trim(), "POST response"),
                Err(error) => tracing::debug!(%url, %error, "cannot read POST response"),
            }
        }

        Ok(url)
    }

    async fn get(&self, locator: &str) -> BackendResult<PayloadStream> {
        get_stream(&self.client, locator).await
    }
}
