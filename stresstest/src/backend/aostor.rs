//! Backend for aostor, which stores objects in realms and hands out hex keys.

use super::{
    Backend, BackendError, BackendResult, Locator, UploadBody, get_stream, multipart_form,
    normalize_base_url,
};
use crate::PayloadStream;

/// Length of an object key, a hex-encoded UUID.
const KEY_LENGTH: usize = 32;

/// A backend talking to an aostor realm.
///
/// Objects are uploaded with `POST {realm}/up`, which answers with the object key as plain text.
/// The object can then be fetched from `{realm}/{key}`.
#[derive(Debug)]
pub struct AostorBackend {
    base_url: String,
    client: reqwest::Client,
}

impl AostorBackend {
    /// Creates a backend for the realm at `address`.
    pub fn new(address: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: normalize_base_url(address),
            client,
        }
    }

    fn parse_key(&self, url: &str, body: &str) -> BackendResult<String> {
        let key = body.trim();
        let bad_response = |reason: &str| BackendError::BadResponse {
            url: url.to_owned(),
            reason: format!("{reason}: {key:?}"),
        };

        if key
            .get(..3)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("ERR"))
        {
            return Err(bad_response("server reported an error"));
        }
        if key.len() != KEY_LENGTH || !key.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(bad_response("malformed object key"));
        }

        Ok(key.to_owned())
    }
}

#[async_trait::async_trait]
impl Backend for AostorBackend {
    fn name(&self) -> &'static str {
        "aostor"
    }

    async fn upload(&self, body: UploadBody) -> BackendResult<Locator> {
        let url = format!("{}/up", self.base_url);
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

        let text = response
            .text()
            .await
            .map_err(|cause| BackendError::Reqwest {
                context: format!("reading response of POST {url}"),
                cause,
            })?;
        let key = self.parse_key(&url, &text)?;

        Ok(format!("{}/{key}", self.base_url))
    }

    async fn get(&self, locator: &str) -> BackendResult<PayloadStream> {
        get_stream(&self.client, locator).await
    }
}
