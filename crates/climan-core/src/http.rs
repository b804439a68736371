use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use climan_backend::{ClimanError, Downloader};
use log::{debug, info};
use tokio::io::AsyncWriteExt;

use crate::settings::Settings;

/// Build the HTTP client shared by every network-facing component.
///
/// # Errors
/// Returns an error when the TLS backend cannot be initialized.
pub fn build_client(settings: &Settings) -> Result<reqwest::Client, ClimanError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .user_agent(format!("climan/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ClimanError::network_request_from("build http client", e))
}

pub(crate) fn response_snippet(body: &str, max_chars: usize) -> String {
    let snippet: String = body.chars().take(max_chars).collect();
    if snippet.is_empty() {
        String::new()
    } else {
        format!(": {snippet}")
    }
}

/// Check the status of a response, turning failures into request errors that
/// carry the start of the response body.
pub(crate) async fn ensure_success(
    operation: &'static str,
    url: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ClimanError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body_snippet = response
        .text()
        .await
        .ok()
        .map(|body| response_snippet(&body, 160))
        .unwrap_or_default();
    Err(ClimanError::network_request(
        operation,
        format!("HTTP {status} for {url}{body_snippet}"),
    ))
}

#[derive(Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, ClimanError> {
        use futures_util::StreamExt;

        info!("Downloading {url}");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ClimanError::network_request_from("download archive", e))?;
        let response = ensure_success("download archive", url, response).await?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| ClimanError::io_at("failed to create download file", dest, &e))?;

        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| ClimanError::network_parse_from("download archive", e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ClimanError::io_at("failed to write download data", dest, &e))?;
            downloaded += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| ClimanError::io_at("failed to flush download file", dest, &e))?;

        debug!("Download complete: {downloaded} bytes");
        Ok(downloaded)
    }

    async fn fetch_text(&self, url: &str) -> Result<String, ClimanError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ClimanError::network_request_from("fetch text", e))?;
        let response = ensure_success("fetch text", url, response).await?;
        response
            .text()
            .await
            .map_err(|e| ClimanError::network_parse_from("fetch text", e))
    }
}
