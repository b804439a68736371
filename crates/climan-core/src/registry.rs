use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use climan_backend::{ClimanError, CliApp};
use climan_platform::AppPaths;
use log::{debug, warn};

use crate::lock::FileLock;

type Entries = BTreeMap<String, CliApp>;

/// The `installed.json` mapping from command name to the package and runtime
/// that provide it.
///
/// Reads never fail: a missing or unreadable file is an empty registry.
/// Every mutation reloads the whole file under an exclusive lock and replaces
/// it atomically.
#[derive(Debug, Clone)]
pub struct InstallRegistry {
    path: PathBuf,
}

impl InstallRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn for_paths(paths: &AppPaths) -> Self {
        Self::new(paths.registry_file())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn read_entries(&self) -> Result<Option<Entries>, String> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.to_string()),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| e.to_string())
    }

    /// Current entries, keyed by command name.
    #[must_use]
    pub fn load(&self) -> Entries {
        match self.read_entries() {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                warn!("Ignoring unreadable registry {}: {e}", self.path.display());
                Entries::new()
            }
        }
    }

    fn save(&self, entries: &Entries) -> Result<(), ClimanError> {
        let registry_write = |details: String| ClimanError::RegistryWrite {
            path: self.path.clone(),
            details,
        };
        let data = serde_json::to_vec_pretty(entries).map_err(|e| registry_write(e.to_string()))?;
        write_atomic(&self.path, &data).map_err(|e| registry_write(e.to_string()))?;
        debug!("Saved {} registry entries", entries.len());
        Ok(())
    }

    /// Read-modify-write under the registry lock.
    fn update<T>(&self, mutate: impl FnOnce(&mut Entries) -> T) -> Result<T, ClimanError> {
        let _lock = FileLock::acquire(&self.lock_path()).map_err(|e| {
            ClimanError::RegistryWrite {
                path: self.path.clone(),
                details: e.to_string(),
            }
        })?;

        let mut entries = match self.read_entries() {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                let backup = self.path.with_extension("json.bak");
                warn!(
                    "Registry {} is unreadable ({e}); moving it to {} and starting empty",
                    self.path.display(),
                    backup.display()
                );
                std::fs::rename(&self.path, &backup).map_err(|e| ClimanError::RegistryWrite {
                    path: self.path.clone(),
                    details: format!(
                        "cannot back up unreadable registry to {}: {e}",
                        backup.display()
                    ),
                })?;
                Entries::new()
            }
        };

        let result = mutate(&mut entries);
        self.save(&entries)?;
        Ok(result)
    }

    /// Installed command names, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.load().into_keys().collect()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<CliApp> {
        self.load().into_values().collect()
    }

    /// Look up by command or package name, then by the identifier the user
    /// originally installed with.
    ///
    /// # Errors
    /// Returns [`ClimanError::NotInstalled`] when nothing matches.
    pub fn find(&self, name: &str) -> Result<CliApp, ClimanError> {
        let entries = self.load();
        if let Some(app) = entries.get(name) {
            return Ok(app.clone());
        }
        entries
            .values()
            .find(|app| app.app == name)
            .or_else(|| entries.values().find(|app| app.install_name == name))
            .cloned()
            .ok_or_else(|| ClimanError::not_installed(name))
    }

    /// Add one entry per command, all owned by `package`.
    ///
    /// # Errors
    /// Returns [`ClimanError::RegistryWrite`] when the file cannot be written.
    pub fn record_install(
        &self,
        package: &str,
        commands: &BTreeMap<String, String>,
        bin_dir: &Path,
        install_name: &str,
    ) -> Result<(), ClimanError> {
        self.update(|entries| {
            for command in commands.keys() {
                if let Some(previous) = entries.get(command)
                    && previous.app != package
                {
                    warn!(
                        "Command {command} moves from {} to {package}",
                        previous.app
                    );
                }
                entries.insert(
                    command.clone(),
                    CliApp {
                        app: package.to_string(),
                        bin: command.clone(),
                        path: bin_dir.to_path_buf(),
                        install_name: install_name.to_string(),
                    },
                );
            }
        })
    }

    /// Remove every entry owned by `package`; returns the removed command names.
    ///
    /// # Errors
    /// Returns [`ClimanError::RegistryWrite`] when the file cannot be written.
    pub fn record_uninstall(&self, package: &str) -> Result<Vec<String>, ClimanError> {
        self.update(|entries| {
            let removed: Vec<String> = entries
                .iter()
                .filter(|(_, app)| app.app == package)
                .map(|(command, _)| command.clone())
                .collect();
            for command in &removed {
                entries.remove(command);
            }
            removed
        })
    }

    /// Executable that serves `command`.
    ///
    /// # Errors
    /// Returns [`ClimanError::NotInstalled`] for an unknown command.
    pub fn command_path(&self, command: &str) -> Result<PathBuf, ClimanError> {
        let app = self.command_entry(command)?;
        Ok(command_executable(&app.path, command))
    }

    /// Binary directory of the runtime that serves `command`.
    ///
    /// # Errors
    /// Returns [`ClimanError::NotInstalled`] for an unknown command.
    pub fn command_runtime_dir(&self, command: &str) -> Result<PathBuf, ClimanError> {
        Ok(self.command_entry(command)?.path)
    }

    fn command_entry(&self, command: &str) -> Result<CliApp, ClimanError> {
        self.load()
            .remove(command)
            .ok_or_else(|| ClimanError::not_installed(command))
    }
}

#[cfg(windows)]
fn command_executable(bin_dir: &Path, command: &str) -> PathBuf {
    bin_dir.join(format!("{command}.cmd"))
}

#[cfg(not(windows))]
fn command_executable(bin_dir: &Path, command: &str) -> PathBuf {
    bin_dir.join(command)
}

/// Write through a temp file in the destination directory and rename it over
/// `path`.
fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "registry path has no parent")
    })?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".installed.")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
