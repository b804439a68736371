use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use climan_backend::{CliApp, ClimanError, NodeRuntime, PackageMetadata, RuntimeProvider};
use climan_platform::{AppPaths, RuntimeCommandExt};
use log::{debug, error, info, warn};
use semver::Version;

use crate::catalog::HttpReleaseSource;
use crate::http::{HttpDownloader, build_client};
use crate::lock::blocking;
use crate::manifest::GithubManifestSource;
use crate::registry::InstallRegistry;
use crate::resolver::VersionResolver;
use crate::settings::Settings;
use crate::store::{Platform, RuntimeStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    /// Registry name or repository reference handed to `npm install -g`.
    pub package: String,
    /// Range that overrides the package's own engine constraint.
    pub node_version: Option<String>,
}

impl InstallRequest {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            node_version: None,
        }
    }

    #[must_use]
    pub fn with_node_version(mut self, range: impl Into<String>) -> Self {
        self.node_version = Some(range.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub package: String,
    pub node_version: Version,
    pub commands: Vec<String>,
}

/// Install, run and uninstall commands, each inside its own Node.js runtime.
#[derive(Clone)]
pub struct CliManager {
    resolver: VersionResolver,
    runtimes: Arc<dyn RuntimeProvider>,
    registry: InstallRegistry,
}

impl CliManager {
    pub fn new(
        resolver: VersionResolver,
        runtimes: Arc<dyn RuntimeProvider>,
        registry: InstallRegistry,
    ) -> Self {
        Self {
            resolver,
            runtimes,
            registry,
        }
    }

    /// Wire up the HTTP-backed components described by `settings`.
    ///
    /// # Errors
    /// Returns an error when the HTTP client cannot be built or the current
    /// platform has no upstream runtime builds.
    pub fn from_settings(settings: &Settings, paths: &AppPaths) -> Result<Self, ClimanError> {
        let client = build_client(settings)?;
        let timeout = Duration::from_secs(settings.catalog_timeout_secs);

        let source = HttpReleaseSource::new(client.clone(), settings.release_index_url(), timeout);
        let manifests = GithubManifestSource::new(
            client.clone(),
            settings.github_api_url.clone(),
            settings.github_token_env.clone(),
            timeout,
        );
        let store = RuntimeStore::new(
            settings.runtimes_dir(paths),
            settings.dist_root(),
            Arc::new(HttpDownloader::new(client)),
            Platform::current()?,
        )
        .verify_checksums(settings.verify_checksums)
        .with_manifests(Arc::new(manifests));

        Ok(Self::new(
            VersionResolver::new(Arc::new(source)),
            Arc::new(store),
            InstallRegistry::for_paths(paths),
        ))
    }

    #[must_use]
    pub fn resolver(&self) -> &VersionResolver {
        &self.resolver
    }

    #[must_use]
    pub fn registry(&self) -> &InstallRegistry {
        &self.registry
    }

    /// Inspect the package in the latest runtime, pick the runtime its engine
    /// constraint asks for, install it there and record its commands.
    ///
    /// # Errors
    /// Returns resolution, download, npm or registry errors. A registry write
    /// failure is returned after a best-effort `npm remove -g`.
    pub async fn install(&self, request: &InstallRequest) -> Result<InstallOutcome, ClimanError> {
        let latest = self.resolver.resolve_latest().await?;
        let inspector = self.runtimes.acquire(&latest).await?;
        let metadata = inspector.package_metadata(&request.package).await?;
        let package = package_name(&metadata, &request.package);

        let version = self.target_version(request, &metadata).await?;
        info!("Installing {package} with Node {version}");
        let runtime = self.runtimes.acquire(&version).await?;

        let commands = metadata.commands();
        if commands.is_empty() {
            warn!("{package} does not expose any commands");
        }

        runtime
            .run_npm(&["install", "-g", request.package.as_str()])
            .await?;

        let recorded = {
            let registry = self.registry.clone();
            let package = package.clone();
            let commands = commands.clone();
            let bin_dir = runtime.bin_dir().to_path_buf();
            let install_name = request.package.clone();
            blocking("registry", move || {
                registry.record_install(&package, &commands, &bin_dir, &install_name)
            })
            .await
        };

        if let Err(e) = recorded {
            error!("Could not record {package}: {e}; removing it again");
            if let Err(rollback) = runtime.run_npm(&["remove", "-g", package.as_str()]).await {
                warn!("Rollback of {package} failed: {rollback}");
            }
            return Err(e);
        }

        Ok(InstallOutcome {
            package,
            node_version: version,
            commands: commands.into_keys().collect(),
        })
    }

    async fn target_version(
        &self,
        request: &InstallRequest,
        metadata: &PackageMetadata,
    ) -> Result<Version, ClimanError> {
        let range = request
            .node_version
            .as_deref()
            .map(str::trim)
            .filter(|range| !range.is_empty())
            .or_else(|| metadata.node_engine());
        match range {
            Some(range) => self.resolver.resolve_range_or_lts(range).await,
            None => {
                debug!("No engine constraint, using latest LTS");
                self.resolver.resolve_lts().await
            }
        }
    }

    /// Run an installed command with its runtime first on the search path.
    ///
    /// An interrupt does not end the wait; the child decides when to exit.
    ///
    /// # Errors
    /// Returns [`ClimanError::NotInstalled`] for an unknown command and
    /// [`ClimanError::CommandFailed`] for a non-zero exit.
    pub async fn run(&self, command: &str, args: &[String]) -> Result<(), ClimanError> {
        let program = self.registry.command_path(command)?;
        let bin_dir = self.registry.command_runtime_dir(command)?;
        debug!("Running {} with {}", program.display(), bin_dir.display());

        let mut child = tokio::process::Command::new(&program)
            .args(args)
            .prefer_bin_dir(&bin_dir)
            .map_err(|e| ClimanError::io_at("failed to build search path for", &bin_dir, &e))?
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| ClimanError::io_at("failed to launch", &program, &e))?;

        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        warn!("Interrupt handling unavailable: {e}");
                        break child.wait().await;
                    }
                    debug!("Interrupt received, waiting for {command} to exit");
                }
            }
        }
        .map_err(|e| ClimanError::io_at("failed to wait for", &program, &e))?;

        if status.success() {
            Ok(())
        } else {
            Err(ClimanError::CommandFailed {
                command: command.to_string(),
                code: status.code(),
            })
        }
    }

    /// Remove the package that owns `name` from its runtime and drop all of
    /// its commands. Returns the removed command names.
    ///
    /// # Errors
    /// Returns [`ClimanError::NotInstalled`] when nothing matches `name`, or
    /// the npm or registry error.
    pub async fn uninstall(&self, name: &str) -> Result<Vec<String>, ClimanError> {
        let app = self.registry.find(name)?;
        info!("Uninstalling {} from {}", app.app, app.path.display());

        let runtime = self.runtimes.runtime_at(&app.path);
        runtime.run_npm(&["remove", "-g", app.app.as_str()]).await?;

        let registry = self.registry.clone();
        blocking("registry", move || registry.record_uninstall(&app.app)).await
    }

    #[must_use]
    pub fn list(&self) -> Vec<CliApp> {
        self.registry.entries()
    }

    /// Cached runtimes that no installed command points at.
    ///
    /// # Errors
    /// Returns an IO error when the runtime directory cannot be listed.
    pub fn unused_runtimes(&self) -> Result<Vec<Version>, ClimanError> {
        let entries = self.registry.entries();
        let versions = self.runtimes.installed_versions()?;
        Ok(versions
            .into_iter()
            .filter(|version| {
                let bin_dir = self.runtimes.bin_dir_for(version);
                !entries.iter().any(|app| app.path == bin_dir)
            })
            .collect())
    }

    /// # Errors
    /// Returns [`ClimanError::RuntimeInUse`] while a command still uses the
    /// runtime, or the error from deleting it.
    pub async fn remove_runtime(&self, version: &Version) -> Result<(), ClimanError> {
        let bin_dir = self.runtimes.bin_dir_for(version);
        let commands: Vec<String> = self
            .registry
            .entries()
            .into_iter()
            .filter(|app| app.path == bin_dir)
            .map(|app| app.bin)
            .collect();
        if !commands.is_empty() {
            return Err(ClimanError::RuntimeInUse {
                version: version.to_string(),
                commands,
            });
        }
        self.runtimes.remove(version).await
    }

    /// Version string reported by a cached runtime's own interpreter.
    ///
    /// # Errors
    /// Returns [`ClimanError::NotInstalled`] for an uncached version, or the
    /// error from running `node -v`.
    pub async fn runtime_health(&self, version: &Version) -> Result<String, ClimanError> {
        if !self.runtimes.installed_versions()?.contains(version) {
            return Err(ClimanError::not_installed(format!("Node {version}")));
        }
        let runtime = self.runtimes.runtime_at(&self.runtimes.bin_dir_for(version));
        runtime.node_version().await
    }
}

fn package_name(metadata: &PackageMetadata, requested: &str) -> String {
    if metadata.name.trim().is_empty() {
        requested.to_string()
    } else {
        metadata.name.clone()
    }
}
