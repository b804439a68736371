use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClimanError {
    #[error("Network error during {operation} ({stage}): {details}")]
    NetworkError {
        operation: &'static str,
        stage: NetworkStage,
        details: String,
    },

    #[error("Failed to parse {context}: {details}")]
    ParseError {
        context: &'static str,
        details: String,
    },

    #[error("Failed to extract {}: {details}", archive.display())]
    ExtractError { archive: PathBuf, details: String },

    #[error("IO error ({kind}): {message}")]
    IoError {
        kind: std::io::ErrorKind,
        message: String,
    },

    #[error("Checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("{name} is not installed")]
    NotInstalled { name: String },

    #[error("Command failed: {command} exited with {}", exit_label(*code))]
    CommandFailed { command: String, code: Option<i32> },

    #[error("Failed to write registry {}: {details}", path.display())]
    RegistryWrite { path: PathBuf, details: String },

    #[error("Node {version} is still used by: {}", commands.join(", "))]
    RuntimeInUse {
        version: String,
        commands: Vec<String>,
    },

    #[error("Unsupported platform: {os}")]
    UnsupportedPlatform { os: String },

    #[error(transparent)]
    Paths(#[from] climan_platform::AppPathsError),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStage {
    #[error("request")]
    Request,
    #[error("response parse")]
    ResponseParse,
}

fn exit_label(code: Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_string(), |code| format!("code {code}"))
}

impl ClimanError {
    pub fn network_request(operation: &'static str, details: impl Into<String>) -> Self {
        Self::NetworkError {
            operation,
            stage: NetworkStage::Request,
            details: details.into(),
        }
    }

    pub fn network_request_from<E>(operation: &'static str, error: E) -> Self
    where
        E: std::fmt::Display,
    {
        Self::network_request(operation, error.to_string())
    }

    pub fn network_parse_from<E>(operation: &'static str, error: E) -> Self
    where
        E: std::fmt::Display,
    {
        Self::NetworkError {
            operation,
            stage: NetworkStage::ResponseParse,
            details: error.to_string(),
        }
    }

    pub fn parse(context: &'static str, details: impl std::fmt::Display) -> Self {
        Self::ParseError {
            context,
            details: details.to_string(),
        }
    }

    pub fn extract(archive: &Path, details: impl std::fmt::Display) -> Self {
        Self::ExtractError {
            archive: archive.to_path_buf(),
            details: details.to_string(),
        }
    }

    /// Wrap an IO error with the operation and path it happened on.
    pub fn io_at(context: &'static str, path: &Path, source: &std::io::Error) -> Self {
        Self::IoError {
            kind: source.kind(),
            message: format!("{context} {}: {source}", path.display()),
        }
    }

    pub fn not_installed(name: impl Into<String>) -> Self {
        Self::NotInstalled { name: name.into() }
    }

    #[must_use]
    pub fn is_not_installed(&self) -> bool {
        matches!(self, Self::NotInstalled { .. })
    }

    /// Exit code a CLI should use for this error; child failures keep the
    /// child's own code.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::CommandFailed {
                code: Some(code), ..
            } if *code != 0 => *code,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for ClimanError {
    fn from(err: std::io::Error) -> Self {
        ClimanError::IoError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
