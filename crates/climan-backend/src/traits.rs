use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::ClimanError;
use crate::types::{PackageMetadata, ReleaseEntry};

/// Source of the upstream release index.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Fetch the full index, in upstream order.
    async fn fetch_releases(&self) -> Result<Vec<ReleaseEntry>, ClimanError>;
}

/// Transport used by the runtime store for archives and checksum lists.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Stream `url` into a new file at `dest`.
    async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, ClimanError>;

    async fn fetch_text(&self, url: &str) -> Result<String, ClimanError>;
}

/// One extracted Node.js runtime.
#[async_trait]
pub trait NodeRuntime: Send + Sync {
    fn bin_dir(&self) -> &Path;

    async fn run_node(&self, args: &[&str]) -> Result<(), ClimanError>;

    async fn run_npm(&self, args: &[&str]) -> Result<(), ClimanError>;

    async fn package_metadata(&self, package: &str) -> Result<PackageMetadata, ClimanError>;

    /// Version reported by the runtime's own interpreter.
    async fn node_version(&self) -> Result<String, ClimanError>;
}

/// Hands out runtimes by version or by a previously recorded binary directory.
#[async_trait]
pub trait RuntimeProvider: Send + Sync {
    async fn acquire(
        &self,
        version: &semver::Version,
    ) -> Result<Box<dyn NodeRuntime>, ClimanError>;

    fn runtime_at(&self, bin_dir: &Path) -> Box<dyn NodeRuntime>;

    /// Versions currently extracted, newest first.
    fn installed_versions(&self) -> Result<Vec<semver::Version>, ClimanError>;

    /// Binary directory a runtime of `version` has (or would have).
    fn bin_dir_for(&self, version: &semver::Version) -> PathBuf;

    /// Delete an extracted runtime.
    async fn remove(&self, version: &semver::Version) -> Result<(), ClimanError>;
}
