use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use climan_backend::{ClimanError, Downloader, NodeRuntime, RuntimeProvider};
use log::{debug, info, warn};
use semver::Version;

use crate::archive::{self, ArchiveFormat};
use crate::integrity;
use crate::lock::{FileLock, blocking};
use crate::manifest::GithubManifestSource;
use crate::runtime::NodeRuntimeHandle;

const STAGING_PREFIX: &str = ".staging-";
const REMOVING_PREFIX: &str = ".removing-";
const PARTIAL_SUFFIX: &str = ".partial";

/// Platform tokens used in upstream archive names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
    pub format: ArchiveFormat,
}

impl Platform {
    /// # Errors
    /// Returns [`ClimanError::UnsupportedPlatform`] when no upstream build
    /// exists for this OS or architecture.
    pub fn current() -> Result<Self, ClimanError> {
        Self::from_target(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// # Errors
    /// See [`Platform::current`].
    pub fn from_target(os: &str, arch: &str) -> Result<Self, ClimanError> {
        let unsupported = || ClimanError::UnsupportedPlatform {
            os: format!("{os}-{arch}"),
        };
        let (os, format) = match os {
            "windows" => ("win", ArchiveFormat::Zip),
            "macos" => ("darwin", ArchiveFormat::TarGz),
            "linux" => ("linux", ArchiveFormat::TarXz),
            "aix" => ("aix", ArchiveFormat::TarGz),
            "solaris" | "illumos" => ("sunos", ArchiveFormat::TarXz),
            _ => return Err(unsupported()),
        };
        let arch = match arch {
            "x86_64" => "x64",
            "aarch64" => "arm64",
            "x86" => "x86",
            "arm" => "armv7l",
            "powerpc64" => "ppc64le",
            "s390x" => "s390x",
            _ => return Err(unsupported()),
        };
        Ok(Self { os, arch, format })
    }

    #[must_use]
    pub fn archive_name(&self, version: &Version) -> String {
        format!(
            "node-v{version}-{}-{}{}",
            self.os,
            self.arch,
            self.format.extension()
        )
    }
}

/// Cache of extracted runtimes, one directory per version.
#[derive(Clone)]
pub struct RuntimeStore {
    root: PathBuf,
    dist_root: String,
    downloader: Arc<dyn Downloader>,
    verify_checksums: bool,
    platform: Platform,
    manifests: Option<Arc<GithubManifestSource>>,
}

impl RuntimeStore {
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        dist_root: impl Into<String>,
        downloader: Arc<dyn Downloader>,
        platform: Platform,
    ) -> Self {
        Self {
            root: root.into(),
            dist_root: dist_root.into(),
            downloader,
            verify_checksums: true,
            platform,
            manifests: None,
        }
    }

    #[must_use]
    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Repository fallback handed to every runtime handle.
    #[must_use]
    pub fn with_manifests(mut self, manifests: Arc<GithubManifestSource>) -> Self {
        self.manifests = Some(manifests);
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn install_dir(&self, version: &Version) -> PathBuf {
        self.root.join(version.to_string())
    }

    #[must_use]
    pub fn archive_url(&self, version: &Version) -> String {
        format!(
            "{}/v{version}/{}",
            self.dist_root.trim_end_matches('/'),
            self.platform.archive_name(version)
        )
    }

    fn checksums_url(&self, version: &Version) -> String {
        format!(
            "{}/v{version}/SHASUMS256.txt",
            self.dist_root.trim_end_matches('/')
        )
    }

    fn lock_path(&self, version: &Version) -> PathBuf {
        self.root.join(format!(".{version}.lock"))
    }

    fn handle(&self, bin_dir: PathBuf) -> NodeRuntimeHandle {
        NodeRuntimeHandle::new(bin_dir, self.manifests.clone())
    }

    /// A runtime counts as installed only once its `node` binary is in place.
    fn is_complete(&self, version: &Version) -> bool {
        self.handle(self.bin_dir_for(version)).node_path().is_file()
    }

    /// Download, verify and place the runtime for `version` unless it is
    /// already present.
    ///
    /// # Errors
    /// Returns network, checksum, extract or IO errors. On failure the
    /// installation directory for `version` does not exist.
    pub async fn acquire_runtime(
        &self,
        version: &Version,
    ) -> Result<NodeRuntimeHandle, ClimanError> {
        let install_dir = self.install_dir(version);
        if self.is_complete(version) {
            debug!("Node {version} already present at {}", install_dir.display());
            return Ok(self.handle(self.bin_dir_for(version)));
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ClimanError::io_at("failed to create runtime directory", &self.root, &e))?;
        let _lock = FileLock::acquire_async(self.lock_path(version)).await?;

        // Another process may have finished while we waited.
        if self.is_complete(version) {
            debug!("Node {version} was installed concurrently");
            return Ok(self.handle(self.bin_dir_for(version)));
        }
        if install_dir.exists() {
            warn!(
                "Node {version} at {} is incomplete, reinstalling",
                install_dir.display()
            );
        }

        let archive = self.fetch_archive(version).await?;

        let root = self.root.clone();
        let target = install_dir.clone();
        let staged_version = version.to_string();
        let archive_path = archive.clone();
        blocking("extraction", move || {
            install_from_archive(&root, &staged_version, &archive_path, &target)
        })
        .await?;

        if let Err(e) = tokio::fs::remove_file(&archive).await {
            warn!("Could not remove {}: {e}", archive.display());
        }

        info!("Installed Node {version} into {}", install_dir.display());
        Ok(self.handle(self.bin_dir_for(version)))
    }

    /// Path of a complete archive for `version`, downloading it if needed.
    async fn fetch_archive(&self, version: &Version) -> Result<PathBuf, ClimanError> {
        let name = self.platform.archive_name(version);
        let archive = self.root.join(&name);
        if archive.is_file() {
            debug!("Reusing downloaded archive {}", archive.display());
            return Ok(archive);
        }

        let partial = self.root.join(format!("{name}{PARTIAL_SUFFIX}"));
        let url = self.archive_url(version);
        let result = self.download_verified(version, &url, &name, &partial).await;
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, &archive)
            .await
            .map_err(|e| ClimanError::io_at("failed to finalize download", &archive, &e))?;
        Ok(archive)
    }

    async fn download_verified(
        &self,
        version: &Version,
        url: &str,
        name: &str,
        partial: &Path,
    ) -> Result<(), ClimanError> {
        let bytes = self.downloader.download_to(url, partial).await?;
        debug!("Downloaded {bytes} bytes for {name}");

        if !self.verify_checksums {
            return Ok(());
        }
        let listing = self
            .downloader
            .fetch_text(&self.checksums_url(version))
            .await?;
        let partial = partial.to_path_buf();
        let name = name.to_string();
        blocking("checksum", move || integrity::verify_file(&partial, &name, &listing)).await
    }

    /// Versions with a complete installation, newest first.
    ///
    /// # Errors
    /// Returns an IO error when the runtime directory cannot be listed.
    pub fn list_versions(&self) -> Result<Vec<Version>, ClimanError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ClimanError::io_at(
                    "failed to list runtimes in",
                    &self.root,
                    &e,
                ));
            }
        };

        let mut versions: Vec<Version> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .filter(|version| self.is_complete(version))
            .collect();
        versions.sort_by(|a, b| b.cmp(a));
        Ok(versions)
    }

    /// # Errors
    /// Returns [`ClimanError::NotInstalled`] when the version is not cached.
    pub async fn remove_version(&self, version: &Version) -> Result<(), ClimanError> {
        let install_dir = self.install_dir(version);
        if !install_dir.is_dir() {
            return Err(ClimanError::not_installed(format!("Node {version}")));
        }

        let _lock = FileLock::acquire_async(self.lock_path(version)).await?;
        let root = self.root.clone();
        let name = version.to_string();
        let removed = blocking("removal", move || {
            clear_stale_work_dirs(&root, &name);
            if !install_dir.is_dir() {
                return Ok(false);
            }
            discard_dir(&root, &name, &install_dir)?;
            Ok(true)
        })
        .await?;

        if !removed {
            return Err(ClimanError::not_installed(format!("Node {version}")));
        }
        info!("Removed Node {version}");
        Ok(())
    }
}

/// Extract into a fresh staging directory next to `target`, then move the
/// archive's single top-level directory into place with one rename.
fn install_from_archive(
    root: &Path,
    version: &str,
    archive: &Path,
    target: &Path,
) -> Result<(), ClimanError> {
    clear_stale_work_dirs(root, version);

    let staging = tempfile::Builder::new()
        .prefix(&work_prefix(STAGING_PREFIX, version))
        .tempdir_in(root)
        .map_err(|e| ClimanError::io_at("failed to create staging directory in", root, &e))?;

    archive::extract(archive, staging.path())?;
    let top_level = single_child_dir(staging.path())
        .ok_or_else(|| ClimanError::extract(archive, "expected exactly one top-level directory"))?;

    if target.exists() {
        discard_dir(root, version, target)?;
    }
    std::fs::rename(&top_level, target)
        .map_err(|e| ClimanError::io_at("failed to move runtime into place at", target, &e))?;

    // Dropping `staging` removes the now-empty staging directory.
    Ok(())
}

fn single_child_dir(dir: &Path) -> Option<PathBuf> {
    let mut children = std::fs::read_dir(dir).ok()?.filter_map(Result::ok);
    let only = children.next()?;
    if children.next().is_some() || !only.file_type().ok()?.is_dir() {
        return None;
    }
    Some(only.path())
}

/// Prefix of the hidden work directories for `version`.
///
/// The trailing `.` keeps prereleases apart: `20.0.0.` never prefixes
/// `20.0.0-rc.1.`.
fn work_prefix(kind: &str, version: &str) -> String {
    format!("{kind}{version}.")
}

/// Take `dir` out of its canonical place with one rename, then delete it.
///
/// A delete that stops halfway leaves a `.removing-` directory for the next
/// sweep, never a partial runtime.
fn discard_dir(root: &Path, version: &str, dir: &Path) -> Result<(), ClimanError> {
    let trash = tempfile::Builder::new()
        .prefix(&work_prefix(REMOVING_PREFIX, version))
        .tempdir_in(root)
        .map_err(|e| ClimanError::io_at("failed to create removal directory in", root, &e))?;
    std::fs::rename(dir, trash.path().join(version))
        .map_err(|e| ClimanError::io_at("failed to move aside", dir, &e))?;

    let trash_path = trash.path().to_path_buf();
    if let Err(e) = trash.close() {
        warn!("Could not finish deleting {}: {e}", trash_path.display());
    }
    Ok(())
}

/// Delete staging and removal leftovers of `version`. Callers hold its lock.
fn clear_stale_work_dirs(root: &Path, version: &str) {
    let prefixes = [STAGING_PREFIX, REMOVING_PREFIX].map(|kind| work_prefix(kind, version));
    let Ok(entries) = std::fs::read_dir(root) else {
        return;
    };
    for entry in entries.filter_map(Result::ok) {
        let stale = entry
            .file_name()
            .to_str()
            .is_some_and(|name| {
                prefixes
                    .iter()
                    .any(|prefix| name.starts_with(prefix.as_str()))
            });
        if stale {
            debug!("Removing leftover work directory {}", entry.path().display());
            if let Err(e) = std::fs::remove_dir_all(entry.path()) {
                warn!("Could not remove {}: {e}", entry.path().display());
            }
        }
    }
}

#[async_trait]
impl RuntimeProvider for RuntimeStore {
    async fn acquire(&self, version: &Version) -> Result<Box<dyn NodeRuntime>, ClimanError> {
        let handle = self.acquire_runtime(version).await?;
        Ok(Box::new(handle))
    }

    fn runtime_at(&self, bin_dir: &Path) -> Box<dyn NodeRuntime> {
        Box::new(self.handle(bin_dir.to_path_buf()))
    }

    fn installed_versions(&self) -> Result<Vec<Version>, ClimanError> {
        self.list_versions()
    }

    fn bin_dir_for(&self, version: &Version) -> PathBuf {
        let install_dir = self.install_dir(version);
        if self.platform.os == "win" {
            install_dir
        } else {
            install_dir.join("bin")
        }
    }

    async fn remove(&self, version: &Version) -> Result<(), ClimanError> {
        self.remove_version(version).await
    }
}
