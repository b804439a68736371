use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use climan_backend::{ClimanError, NodeRuntime, PackageMetadata};
use climan_platform::RuntimeCommandExt;
use log::{debug, info, warn};
use tokio::process::Command;

use crate::manifest::{GithubManifestSource, parse_npm_view};

#[cfg(windows)]
const NODE_EXE: &str = "node.exe";
#[cfg(not(windows))]
const NODE_EXE: &str = "node";

#[cfg(windows)]
const NPM_EXE: &str = "npm.cmd";
#[cfg(not(windows))]
const NPM_EXE: &str = "npm";

/// Executor bound to one extracted runtime's binary directory.
#[derive(Clone)]
pub struct NodeRuntimeHandle {
    bin_dir: PathBuf,
    manifests: Option<Arc<GithubManifestSource>>,
}

impl NodeRuntimeHandle {
    #[must_use]
    pub fn new(bin_dir: impl Into<PathBuf>, manifests: Option<Arc<GithubManifestSource>>) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            manifests,
        }
    }

    #[must_use]
    pub fn node_path(&self) -> PathBuf {
        self.bin_dir.join(NODE_EXE)
    }

    #[must_use]
    pub fn npm_path(&self) -> PathBuf {
        self.bin_dir.join(NPM_EXE)
    }

    fn command(&self, program: &Path) -> Result<Command, ClimanError> {
        let mut cmd = Command::new(program);
        cmd.prefer_bin_dir(&self.bin_dir)
            .map_err(|e| ClimanError::io_at("failed to build search path for", &self.bin_dir, &e))?;
        Ok(cmd)
    }

    /// Run with inherited stdio; a non-zero exit is a `CommandFailed`.
    async fn run_interactive(&self, program: &Path, args: &[&str]) -> Result<(), ClimanError> {
        let label = describe(program, args);
        info!("Running {label}");

        let status = self
            .command(program)?
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| ClimanError::io_at("failed to launch", program, &e))?;

        if status.success() {
            Ok(())
        } else {
            Err(ClimanError::CommandFailed {
                command: label,
                code: status.code(),
            })
        }
    }

    /// Run with captured output and no console window; returns stdout.
    async fn run_captured(&self, program: &Path, args: &[&str]) -> Result<String, ClimanError> {
        let label = describe(program, args);
        debug!("Capturing {label}");

        let output = self
            .command(program)?
            .args(args)
            .hide_window()
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ClimanError::io_at("failed to launch", program, &e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("{label} failed: {}", stderr.trim());
            Err(ClimanError::CommandFailed {
                command: label,
                code: output.status.code(),
            })
        }
    }
}

fn describe(program: &Path, args: &[&str]) -> String {
    let name = program
        .file_name()
        .map_or_else(|| program.display().to_string(), |n| n.to_string_lossy().into_owned());
    if args.is_empty() {
        name
    } else {
        format!("{name} {}", args.join(" "))
    }
}

#[async_trait]
impl NodeRuntime for NodeRuntimeHandle {
    fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    async fn run_node(&self, args: &[&str]) -> Result<(), ClimanError> {
        self.run_interactive(&self.node_path(), args).await
    }

    async fn run_npm(&self, args: &[&str]) -> Result<(), ClimanError> {
        self.run_interactive(&self.npm_path(), args).await
    }

    async fn package_metadata(&self, package: &str) -> Result<PackageMetadata, ClimanError> {
        let npm_error = match self
            .run_captured(&self.npm_path(), &["view", package, "--json"])
            .await
        {
            Ok(stdout) => match parse_npm_view(&stdout) {
                Ok(metadata) => return Ok(metadata),
                Err(e) => e,
            },
            Err(e) => e,
        };

        let Some(manifests) = &self.manifests else {
            return Err(npm_error);
        };
        warn!("npm view failed for {package} ({npm_error}), trying repository manifest");
        manifests.fetch(package).await
    }

    async fn node_version(&self) -> Result<String, ClimanError> {
        let stdout = self.run_captured(&self.node_path(), &["-v"]).await?;
        Ok(stdout.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use climan_backend::{ClimanError, NodeRuntime};

    use super::{NodeRuntimeHandle, describe};

    #[test]
    fn executables_live_in_bin_dir() {
        let handle = NodeRuntimeHandle::new("/opt/climan/node/20.11.0/bin", None);

        assert_eq!(handle.bin_dir(), Path::new("/opt/climan/node/20.11.0/bin"));
        assert!(handle.node_path().starts_with(handle.bin_dir()));
        assert!(handle.npm_path().starts_with(handle.bin_dir()));
    }

    #[test]
    fn describe_uses_file_name() {
        assert_eq!(
            describe(Path::new("/x/bin/npm"), &["install", "-g", "prettier"]),
            "npm install -g prettier"
        );
        assert_eq!(describe(Path::new("/x/bin/node"), &[]), "node");
    }

    #[tokio::test]
    async fn missing_runtime_fails_without_fallback() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let handle = NodeRuntimeHandle::new(temp.path().join("bin"), None);

        assert!(handle.node_version().await.is_err());
        assert!(matches!(
            handle.run_node(&["-e", "1"]).await,
            Err(ClimanError::IoError { .. })
        ));
        assert!(handle.package_metadata("prettier").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stub_runtime_reports_version_and_exit_codes() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir should be created");
        let bin = temp.path().join("bin");
        std::fs::create_dir_all(&bin).expect("bin dir should be created");

        let node = bin.join("node");
        std::fs::write(
            &node,
            "#!/bin/sh\nif [ \"$1\" = \"-v\" ]; then echo v20.11.0; exit 0; fi\nexit 3\n",
        )
        .expect("node stub should be written");
        std::fs::set_permissions(&node, std::fs::Permissions::from_mode(0o755))
            .expect("node stub should be executable");

        let npm = bin.join("npm");
        std::fs::write(
            &npm,
            "#!/bin/sh\necho '{\"name\":\"tool\",\"engines\":{\"node\":\">=18\"},\"bin\":\"bin/tool.js\"}'\n",
        )
        .expect("npm stub should be written");
        std::fs::set_permissions(&npm, std::fs::Permissions::from_mode(0o755))
            .expect("npm stub should be executable");

        let handle = NodeRuntimeHandle::new(&bin, None);

        assert_eq!(handle.node_version().await.unwrap(), "v20.11.0");
        assert!(matches!(
            handle.run_node(&["script.js"]).await,
            Err(ClimanError::CommandFailed { code: Some(3), .. })
        ));

        let metadata = handle.package_metadata("tool").await.unwrap();
        assert_eq!(metadata.node_engine(), Some(">=18"));
        assert!(metadata.commands().contains_key("tool.js"));
    }
}
