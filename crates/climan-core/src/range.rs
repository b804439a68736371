//! npm-style version ranges on top of [`semver::VersionReq`].
//!
//! Package manifests declare engine constraints the way npm reads them:
//! space-separated comparators, `||` alternatives, hyphen ranges and `x`
//! wildcards. `VersionReq` only understands comma-separated comparators and
//! treats a bare version as a caret requirement, so each alternative is
//! rewritten into that syntax before parsing.

use std::fmt;
use std::str::FromStr;

use climan_backend::ClimanError;
use semver::{Version, VersionReq};

const OPERATORS: [&str; 8] = ["<=", ">=", "~>", "<", ">", "=", "~", "^"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRange {
    source: String,
    alternatives: Vec<VersionReq>,
}

impl NodeRange {
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }
}

impl fmt::Display for NodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for NodeRange {
    type Err = ClimanError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ClimanError::parse("version range", "empty range"));
        }

        let alternatives = trimmed
            .split("||")
            .map(|alternative| {
                let comparators = translate_alternative(alternative.trim()).map_err(|details| {
                    ClimanError::parse("version range", format!("{input}: {details}"))
                })?;
                VersionReq::parse(&comparators)
                    .map_err(|e| ClimanError::parse("version range", format!("{input}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: trimmed.to_string(),
            alternatives,
        })
    }
}

/// Rewrite one `||` alternative into `VersionReq` syntax.
fn translate_alternative(alternative: &str) -> Result<String, String> {
    let tokens = join_detached_operators(alternative.split_whitespace())?;

    let comparators: Vec<String> = match tokens.as_slice() {
        [] => Vec::new(),
        [low, dash, high] if dash == "-" => hyphen_range(low, high)?,
        _ => tokens
            .iter()
            .map(|token| translate_comparator(token))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect(),
    };

    Ok(if comparators.is_empty() {
        "*".to_string()
    } else {
        comparators.join(", ")
    })
}

/// npm accepts `>= 10`; glue a lone operator onto the version after it.
fn join_detached_operators<'a>(
    tokens: impl Iterator<Item = &'a str>,
) -> Result<Vec<String>, String> {
    let mut joined = Vec::new();
    let mut pending: Option<&str> = None;

    for token in tokens {
        if let Some(op) = pending.take() {
            joined.push(format!("{op}{token}"));
        } else if OPERATORS.contains(&token) {
            pending = Some(token);
        } else {
            joined.push(token.to_string());
        }
    }

    match pending {
        Some(op) => Err(format!("operator '{op}' without a version")),
        None => Ok(joined),
    }
}

fn hyphen_range(low: &str, high: &str) -> Result<Vec<String>, String> {
    let mut comparators = Vec::new();
    let low = concrete_parts(low)?;
    if !low.is_empty() {
        comparators.push(format!(">={low}"));
    }
    let high = concrete_parts(high)?;
    if !high.is_empty() {
        comparators.push(format!("<={high}"));
    }
    Ok(comparators)
}

/// Translate a single comparator; `None` means "matches everything".
fn translate_comparator(token: &str) -> Result<Option<String>, String> {
    let split = token
        .find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '^'))
        .ok_or_else(|| format!("operator '{token}' without a version"))?;
    let (op, version) = token.split_at(split);
    let op = match op {
        "~>" => "~",
        "" | "=" => "=",
        op if OPERATORS.contains(&op) => op,
        op => return Err(format!("unknown operator '{op}'")),
    };

    let version = concrete_parts(version)?;
    if version.is_empty() {
        return Ok(match op {
            "<" | ">" => Some("<0.0.0".to_string()),
            _ => None,
        });
    }
    Ok(Some(format!("{op}{version}")))
}

/// Strip a leading `v` and drop everything from the first wildcard segment on.
fn concrete_parts(version: &str) -> Result<String, String> {
    let version = version.trim_start_matches('=');
    let version = version.strip_prefix('v').unwrap_or(version);
    if version.is_empty() {
        return Err("missing version".to_string());
    }

    let parts: Vec<&str> = version
        .split('.')
        .take_while(|part| !matches!(*part, "x" | "X" | "*"))
        .collect();
    Ok(parts.join("."))
}
