use std::path::{Path, PathBuf};

use climan_platform::AppPaths;
use serde::{Deserialize, Serialize};

const DEFAULT_NODE_DIST_MIRROR: &str = "https://nodejs.org/dist";
const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
const DEFAULT_GITHUB_TOKEN_ENV: &str = "GH_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_node_dist_mirror")]
    pub node_dist_mirror: String,

    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,

    #[serde(default = "default_github_token_env")]
    pub github_token_env: String,

    #[serde(default = "default_true")]
    pub verify_checksums: bool,

    #[serde(default)]
    pub runtimes_dir: Option<PathBuf>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_catalog_timeout")]
    pub catalog_timeout_secs: u64,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,
}

fn default_node_dist_mirror() -> String {
    DEFAULT_NODE_DIST_MIRROR.to_string()
}

fn default_github_api_url() -> String {
    DEFAULT_GITHUB_API_URL.to_string()
}

fn default_github_token_env() -> String {
    DEFAULT_GITHUB_TOKEN_ENV.to_string()
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_catalog_timeout() -> u64 {
    30
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            node_dist_mirror: default_node_dist_mirror(),
            github_api_url: default_github_api_url(),
            github_token_env: default_github_token_env(),
            verify_checksums: true,
            runtimes_dir: None,
            connect_timeout_secs: default_connect_timeout(),
            catalog_timeout_secs: default_catalog_timeout(),
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
        }
    }
}

impl Settings {
    pub fn load(paths: &AppPaths) -> Self {
        Self::load_from_path(&paths.settings_file())
    }

    /// Read settings from `path`, falling back to defaults when the file is
    /// missing or malformed.
    pub fn load_from_path(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("Ignoring malformed settings at {}: {e}", path.display());
            Self::default()
        })
    }

    pub fn save(&self, paths: &AppPaths) -> Result<(), std::io::Error> {
        paths.ensure_dirs()?;
        self.save_to_path(&paths.settings_file())
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
    }

    #[must_use]
    pub fn dist_root(&self) -> &str {
        self.node_dist_mirror.trim_end_matches('/')
    }

    #[must_use]
    pub fn release_index_url(&self) -> String {
        format!("{}/index.json", self.dist_root())
    }

    #[must_use]
    pub fn runtimes_dir(&self, paths: &AppPaths) -> PathBuf {
        self.runtimes_dir
            .clone()
            .unwrap_or_else(|| paths.runtimes_dir())
    }
}
