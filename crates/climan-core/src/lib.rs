//! Core of climan: install npm command-line tools into isolated Node.js
//! runtimes and route every invocation to the runtime it was installed with.
//!
//! The pieces, leaves first:
//! - Release catalog client and version resolution (`latest`, LTS, npm ranges).
//! - Runtime store: download, verification, extraction and atomic placement.
//! - Runtime handle: runs `node`/`npm` with the runtime first on the search path.
//! - Install registry: the `installed.json` command map.
//! - [`CliManager`]: the install/run/uninstall orchestration on top of them.

mod archive;
mod catalog;
mod http;
mod integrity;
mod lock;
pub mod logging;
mod manager;
mod manifest;
mod range;
mod registry;
mod resolver;
mod runtime;
mod settings;
mod store;

/// Archive format detection and extraction.
pub use archive::{ArchiveFormat, extract};
/// Upstream `index.json` client.
pub use catalog::{HttpReleaseSource, parse_release_index};
/// Shared HTTP client and streaming downloader.
pub use http::{HttpDownloader, build_client};
pub use integrity::{expected_checksum, sha256_file, verify_file};
pub use lock::FileLock;
/// Install/run/uninstall orchestration.
pub use manager::{CliManager, InstallOutcome, InstallRequest};
/// Package manifest decoding and the repository fallback.
pub use manifest::{GithubManifestSource, RepoReference, decode_contents, parse_npm_view};
pub use range::NodeRange;
pub use registry::InstallRegistry;
/// Version selection over the release catalog.
pub use resolver::{VERSION_FLOOR, VersionResolver, latest_even, latest_in_range, latest_lts};
pub use runtime::NodeRuntimeHandle;
pub use settings::Settings;
/// Per-version runtime cache.
pub use store::{Platform, RuntimeStore};
