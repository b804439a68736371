use std::time::Duration;

use async_trait::async_trait;
use climan_backend::{ClimanError, ReleaseEntry, ReleaseSource};
use log::debug;

use crate::http::ensure_success;

/// Fetches the upstream `index.json` on every call; nothing is cached.
#[derive(Clone)]
pub struct HttpReleaseSource {
    client: reqwest::Client,
    index_url: String,
    timeout: Duration,
}

impl HttpReleaseSource {
    #[must_use]
    pub fn new(client: reqwest::Client, index_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            index_url: index_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReleaseSource for HttpReleaseSource {
    async fn fetch_releases(&self) -> Result<Vec<ReleaseEntry>, ClimanError> {
        debug!("Fetching release index from {}", self.index_url);
        let response = self
            .client
            .get(&self.index_url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ClimanError::network_request_from("fetch release index", e))?;
        let response = ensure_success("fetch release index", &self.index_url, response).await?;

        let body = response
            .bytes()
            .await
            .map_err(|e| ClimanError::network_parse_from("fetch release index", e))?;
        let releases = parse_release_index(&body)?;
        debug!("Release index has {} entries", releases.len());
        Ok(releases)
    }
}

/// Decode the body of the upstream release index.
///
/// # Errors
/// Returns a parse error when the body is not a JSON array of releases.
pub fn parse_release_index(body: &[u8]) -> Result<Vec<ReleaseEntry>, ClimanError> {
    serde_json::from_slice(body).map_err(|e| ClimanError::parse("release index", e))
}
