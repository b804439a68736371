//! Package manifests: `npm view` output and the source-hosting fallback used
//! when the identifier is a repository reference instead of a registry name.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use base64::Engine as _;
use climan_backend::{ClimanError, PackageMetadata};
use log::debug;
use serde::Deserialize;

use crate::http::ensure_success;

/// Decode the stdout of `npm view <pkg> --json`.
///
/// npm prints an array when several published versions match the request;
/// the last one is the newest.
///
/// # Errors
/// Returns a parse error for empty or non-object output.
pub fn parse_npm_view(stdout: &str) -> Result<PackageMetadata, ClimanError> {
    let value: serde_json::Value =
        serde_json::from_str(stdout).map_err(|e| ClimanError::parse("npm view output", e))?;

    let manifest = match value {
        serde_json::Value::Array(mut items) => items
            .pop()
            .ok_or_else(|| ClimanError::parse("npm view output", "no matching versions"))?,
        other => other,
    };
    serde_json::from_value(manifest).map_err(|e| ClimanError::parse("npm view output", e))
}

/// `owner/repo[#branch]` and the common URL spellings of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoReference {
    pub owner: String,
    pub repo: String,
    pub branch: Option<String>,
}

impl FromStr for RepoReference {
    type Err = ClimanError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || ClimanError::parse("repository reference", input.to_string());

        let (path, branch) = match input.trim().split_once('#') {
            Some((path, branch)) if !branch.is_empty() => (path, Some(branch.to_string())),
            Some((path, _)) => (path, None),
            None => (input.trim(), None),
        };

        let path = ["git+https://github.com/", "https://github.com/", "github:"]
            .iter()
            .find_map(|prefix| path.strip_prefix(prefix))
            .unwrap_or(path);
        let path = path.trim_end_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);

        let mut segments = path.split('/');
        let (Some(owner), Some(repo), None) = (segments.next(), segments.next(), segments.next())
        else {
            return Err(invalid());
        };
        let valid_segment = |s: &str| {
            !s.is_empty()
                && s
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        if !valid_segment(owner) || !valid_segment(repo) {
            return Err(invalid());
        }

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            branch,
        })
    }
}

impl fmt::Display for RepoReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)?;
        if let Some(branch) = &self.branch {
            write!(f, "#{branch}")?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct ContentsResponse {
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

/// Decode a contents-API response wrapping a base64 `package.json`.
///
/// # Errors
/// Returns a parse error when the envelope, the encoding or the manifest is
/// malformed.
pub fn decode_contents(body: &str) -> Result<PackageMetadata, ClimanError> {
    let envelope: ContentsResponse =
        serde_json::from_str(body).map_err(|e| ClimanError::parse("repository contents", e))?;
    if let Some(encoding) = envelope.encoding.as_deref()
        && encoding != "base64"
    {
        return Err(ClimanError::parse(
            "repository contents",
            format!("unsupported encoding '{encoding}'"),
        ));
    }

    let compact: String = envelope
        .content
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let raw = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| ClimanError::parse("repository contents", e))?;
    serde_json::from_slice(&raw).map_err(|e| ClimanError::parse("package.json", e))
}

/// Reads `package.json` straight from a GitHub-compatible contents API.
#[derive(Clone)]
pub struct GithubManifestSource {
    client: reqwest::Client,
    api_base: String,
    token_env: String,
    timeout: Duration,
}

impl GithubManifestSource {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        api_base: impl Into<String>,
        token_env: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            token_env: token_env.into(),
            timeout,
        }
    }

    /// # Errors
    /// Returns a parse error when the configured API base is not a URL.
    pub fn contents_url(&self, reference: &RepoReference) -> Result<reqwest::Url, ClimanError> {
        let mut url = reqwest::Url::parse(&format!(
            "{}/repos/{}/{}/contents/package.json",
            self.api_base.trim_end_matches('/'),
            reference.owner,
            reference.repo
        ))
        .map_err(|e| ClimanError::parse("repository API URL", e))?;
        if let Some(branch) = &reference.branch {
            url.query_pairs_mut().append_pair("ref", branch);
        }
        Ok(url)
    }

    fn token(&self) -> Option<String> {
        if self.token_env.is_empty() {
            return None;
        }
        std::env::var(&self.token_env)
            .ok()
            .filter(|token| !token.trim().is_empty())
    }

    fn request(&self, url: &str, token: Option<&str>) -> reqwest::RequestBuilder {
        let request = self
            .client
            .get(url)
            .timeout(self.timeout)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        match token {
            Some(token) => request.header(reqwest::header::AUTHORIZATION, format!("token {token}")),
            None => request,
        }
    }

    /// # Errors
    /// Returns a parse error for an unrecognized reference, a network error
    /// when the API call fails, or a parse error for a malformed manifest.
    pub async fn fetch(&self, reference: &str) -> Result<PackageMetadata, ClimanError> {
        let reference: RepoReference = reference.parse()?;
        let url = self.contents_url(&reference)?;
        let token = self.token();
        debug!(
            "Fetching manifest for {reference} from {url} ({})",
            if token.is_some() { "authenticated" } else { "anonymous" }
        );

        let response = self
            .request(url.as_str(), token.as_deref())
            .send()
            .await
            .map_err(|e| ClimanError::network_request_from("fetch package manifest", e))?;
        let response = ensure_success("fetch package manifest", url.as_str(), response).await?;
        let body = response
            .text()
            .await
            .map_err(|e| ClimanError::network_parse_from("fetch package manifest", e))?;
        decode_contents(&body)
    }
}
