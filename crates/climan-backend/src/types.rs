use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ClimanError;

/// LTS designation of a release.
///
/// The upstream index encodes this as `false`, `true`, a codename string, or
/// leaves it out entirely; all of those collapse into this type on decode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LtsMarker {
    #[default]
    NotLts,
    Lts(Option<String>),
}

impl LtsMarker {
    #[must_use]
    pub fn is_lts(&self) -> bool {
        matches!(self, Self::Lts(_))
    }

    #[must_use]
    pub fn codename(&self) -> Option<&str> {
        match self {
            Self::Lts(codename) => codename.as_deref(),
            Self::NotLts => None,
        }
    }
}

impl<'de> Deserialize<'de> for LtsMarker {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawLts {
            Flag(bool),
            Codename(String),
            Other(serde::de::IgnoredAny),
        }

        Ok(match Option::<RawLts>::deserialize(deserializer)? {
            Some(RawLts::Flag(true)) => Self::Lts(None),
            Some(RawLts::Codename(codename)) if codename != "false" => Self::Lts(Some(codename)),
            _ => Self::NotLts,
        })
    }
}

/// One row of the upstream release index.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseEntry {
    pub version: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub npm: Option<String>,
    #[serde(default)]
    pub lts: LtsMarker,
    #[serde(default)]
    pub security: bool,
}

impl ReleaseEntry {
    /// Parse the entry's version, tolerating the upstream `v` prefix.
    ///
    /// # Errors
    /// Returns a parse error when the version is not valid semver.
    pub fn semver(&self) -> Result<semver::Version, ClimanError> {
        parse_node_version(&self.version)
    }

    #[must_use]
    pub fn is_lts(&self) -> bool {
        self.lts.is_lts()
    }
}

/// Parse a concrete Node.js version such as `v20.11.0` or `20.11.0`.
///
/// # Errors
/// Returns a parse error when the input is not a full semver version.
pub fn parse_node_version(input: &str) -> Result<semver::Version, ClimanError> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    semver::Version::parse(trimmed)
        .map_err(|e| ClimanError::parse("node version", format!("{input}: {e}")))
}

/// The `bin` field of a package manifest in any of its accepted shapes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BinField {
    Path(String),
    Map(BTreeMap<String, String>),
    Entries(BTreeMap<String, serde_json::Value>),
}

impl BinField {
    /// Normalize into a command name → relative path mapping.
    ///
    /// A bare path is exposed under its final path segment. Entries whose
    /// value is not a string are dropped.
    #[must_use]
    pub fn commands(&self) -> BTreeMap<String, String> {
        match self {
            Self::Path(path) => Path::new(path)
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| BTreeMap::from([(name.to_string(), path.clone())]))
                .unwrap_or_default(),
            Self::Map(map) => map.clone(),
            Self::Entries(entries) => entries
                .iter()
                .filter_map(|(name, value)| {
                    value.as_str().map(|path| (name.clone(), path.to_string()))
                })
                .collect(),
        }
    }
}

/// The subset of package metadata climan needs: name, engines and binaries.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PackageMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub engines: HashMap<String, String>,
    #[serde(default)]
    pub bin: Option<BinField>,
}

impl PackageMetadata {
    #[must_use]
    pub fn commands(&self) -> BTreeMap<String, String> {
        self.bin.as_ref().map(BinField::commands).unwrap_or_default()
    }

    /// Declared Node.js engine constraint, if the manifest has a non-empty one.
    #[must_use]
    pub fn node_engine(&self) -> Option<&str> {
        self.engines
            .get("node")
            .map(|range| range.trim())
            .filter(|range| !range.is_empty())
    }
}

/// Registry record for one installed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliApp {
    /// Package that owns the command.
    pub app: String,
    /// Command name, equal to the registry key.
    pub bin: String,
    /// Binary directory of the runtime the package was installed into.
    pub path: PathBuf,
    /// Identifier the user passed to install.
    #[serde(default)]
    pub install_name: String,
}
