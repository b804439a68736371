use std::sync::Arc;

use climan_backend::{ClimanError, ReleaseEntry, ReleaseSource};
use log::{debug, warn};
use semver::Version;

use crate::range::NodeRange;

/// Lowest version any resolution returns, even for an empty catalog.
pub const VERSION_FLOOR: Version = Version::new(8, 0, 0);

/// Picks a concrete Node.js version from the release catalog.
///
/// Every call re-fetches the catalog and walks it once, front to back,
/// keeping a running maximum that is only replaced by a strictly greater
/// version; the first of several equal maxima wins.
#[derive(Clone)]
pub struct VersionResolver {
    source: Arc<dyn ReleaseSource>,
}

impl VersionResolver {
    pub fn new(source: Arc<dyn ReleaseSource>) -> Self {
        Self { source }
    }

    /// Highest even-major release.
    ///
    /// # Errors
    /// Returns an error when the catalog cannot be fetched or holds an
    /// unparseable version.
    pub async fn resolve_latest(&self) -> Result<Version, ClimanError> {
        let releases = self.source.fetch_releases().await?;
        let latest = latest_even(&releases)?;
        debug!("Resolved latest even-major release: {latest}");
        Ok(latest)
    }

    /// Highest release carrying an LTS designation.
    ///
    /// # Errors
    /// Returns an error when the catalog cannot be fetched or holds an
    /// unparseable version.
    pub async fn resolve_lts(&self) -> Result<Version, ClimanError> {
        let releases = self.source.fetch_releases().await?;
        let latest = latest_lts(&releases)?;
        debug!("Resolved latest LTS release: {latest}");
        Ok(latest)
    }

    /// Highest even-major release inside `range`, or the latest LTS when the
    /// range does not parse.
    ///
    /// # Errors
    /// Returns an error when the catalog cannot be fetched or holds an
    /// unparseable version.
    pub async fn resolve_range_or_lts(&self, range: &str) -> Result<Version, ClimanError> {
        let parsed = match range.parse::<NodeRange>() {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Could not parse engine range '{range}' ({e}), using latest LTS");
                return self.resolve_lts().await;
            }
        };

        let releases = self.source.fetch_releases().await?;
        let latest = latest_in_range(&releases, &parsed)?;
        debug!("Resolved '{parsed}' to {latest}");
        Ok(latest)
    }
}

fn running_max<F>(releases: &[ReleaseEntry], mut accept: F) -> Result<Version, ClimanError>
where
    F: FnMut(&ReleaseEntry, &Version) -> bool,
{
    let mut latest = VERSION_FLOOR;
    for release in releases {
        let version = release.semver()?;
        if version > latest && accept(release, &version) {
            latest = version;
        }
    }
    Ok(latest)
}

/// # Errors
/// Returns a parse error for a malformed version in the catalog.
pub fn latest_even(releases: &[ReleaseEntry]) -> Result<Version, ClimanError> {
    running_max(releases, |_, version| version.major % 2 == 0)
}

/// # Errors
/// Returns a parse error for a malformed version in the catalog.
pub fn latest_lts(releases: &[ReleaseEntry]) -> Result<Version, ClimanError> {
    running_max(releases, |release, _| release.is_lts())
}

/// # Errors
/// Returns a parse error for a malformed version in the catalog.
pub fn latest_in_range(
    releases: &[ReleaseEntry],
    range: &NodeRange,
) -> Result<Version, ClimanError> {
    running_max(releases, |_, version| {
        version.major % 2 == 0 && range.matches(version)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use climan_backend::{ClimanError, ReleaseEntry, ReleaseSource};
    use semver::Version;

    use super::*;

    struct StaticCatalog {
        releases: Vec<ReleaseEntry>,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl ReleaseSource for StaticCatalog {
        async fn fetch_releases(&self) -> Result<Vec<ReleaseEntry>, ClimanError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.releases.clone())
        }
    }

    fn release(version: &str, lts: Option<&str>) -> ReleaseEntry {
        let lts = lts.map_or_else(|| "false".to_string(), |c| format!("\"{c}\""));
        serde_json::from_str(&format!(r#"{{"version":"{version}","lts":{lts}}}"#))
            .expect("test release should decode")
    }

    fn example_catalog() -> Vec<ReleaseEntry> {
        vec![
            release("v13.0.0", None),
            release("v12.19.0", Some("Erbium")),
            release("v10.24.0", Some("Dubnium")),
            release("v8.0.0", None),
        ]
    }

    fn resolver(releases: Vec<ReleaseEntry>) -> (VersionResolver, Arc<StaticCatalog>) {
        let catalog = Arc::new(StaticCatalog {
            releases,
            fetches: AtomicUsize::new(0),
        });
        (VersionResolver::new(catalog.clone()), catalog)
    }

    fn v(input: &str) -> Version {
        Version::parse(input).expect("test version")
    }

    #[tokio::test]
    async fn example_catalog_resolutions() {
        let (resolver, _) = resolver(example_catalog());

        assert_eq!(resolver.resolve_latest().await.unwrap(), v("12.19.0"));
        assert_eq!(resolver.resolve_lts().await.unwrap(), v("12.19.0"));
        assert_eq!(
            resolver.resolve_range_or_lts(">=10.x <12.x").await.unwrap(),
            v("10.24.0")
        );
        assert_eq!(
            resolver.resolve_range_or_lts("not-a-range").await.unwrap(),
            v("12.19.0")
        );
    }

    #[tokio::test]
    async fn every_resolution_refetches_the_catalog() {
        let (resolver, catalog) = resolver(example_catalog());

        resolver.resolve_latest().await.unwrap();
        resolver.resolve_lts().await.unwrap();
        resolver.resolve_range_or_lts("10.x").await.unwrap();

        assert_eq!(catalog.fetches.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn latest_skips_odd_majors() {
        let releases = vec![
            release("v21.5.0", None),
            release("v20.10.0", Some("Iron")),
            release("v19.9.0", None),
        ];

        assert_eq!(latest_even(&releases).unwrap(), v("20.10.0"));
    }

    #[test]
    fn empty_or_old_catalog_returns_floor() {
        assert_eq!(latest_even(&[]).unwrap(), VERSION_FLOOR);
        assert_eq!(latest_lts(&[]).unwrap(), VERSION_FLOOR);

        let old = vec![release("v6.17.1", Some("Boron")), release("v4.9.1", Some("Argon"))];
        assert_eq!(latest_even(&old).unwrap(), VERSION_FLOOR);
        assert_eq!(latest_lts(&old).unwrap(), VERSION_FLOOR);
    }

    #[test]
    fn range_without_even_match_returns_floor() {
        let range: NodeRange = "11.x".parse().unwrap();

        assert_eq!(
            latest_in_range(&example_catalog(), &range).unwrap(),
            VERSION_FLOOR
        );
    }

    #[test]
    fn range_resolution_ignores_catalog_order() {
        let releases = vec![
            release("v10.23.0", Some("Dubnium")),
            release("v14.15.0", Some("Fermium")),
            release("v12.19.0", Some("Erbium")),
            release("v10.24.0", Some("Dubnium")),
        ];

        let cases = [
            (">=10.x <14.x", "12.19.0"),
            ("10.x", "10.24.0"),
            (">=10.x", "14.15.0"),
            ("12.x", "12.19.0"),
        ];
        for (input, expected) in cases {
            let range: NodeRange = input.parse().unwrap();
            assert_eq!(
                latest_in_range(&releases, &range).unwrap(),
                v(expected),
                "{input}"
            );
        }
    }

    #[test]
    fn lts_accepts_boolean_flag() {
        let releases: Vec<ReleaseEntry> = serde_json::from_str(
            r#"[{"version":"v16.0.0","lts":false},{"version":"v14.0.0","lts":true}]"#,
        )
        .unwrap();

        assert_eq!(latest_lts(&releases).unwrap(), v("14.0.0"));
    }

    #[test]
    fn duplicate_maxima_keep_first_seen() {
        let releases = vec![
            release("v20.11.0", Some("Iron")),
            release("v20.11.0", None),
        ];

        assert_eq!(latest_even(&releases).unwrap(), v("20.11.0"));
        assert_eq!(latest_lts(&releases).unwrap(), v("20.11.0"));
    }

    #[test]
    fn malformed_catalog_version_is_parse_error() {
        let releases = vec![release("v20.x", None)];

        assert!(matches!(
            latest_even(&releases),
            Err(ClimanError::ParseError { .. })
        ));
    }

    #[tokio::test]
    async fn unparseable_range_matches_lts_for_any_catalog() {
        let catalogs = [
            example_catalog(),
            vec![],
            vec![release("v22.1.0", None), release("v20.9.0", Some("Iron"))],
        ];
        for releases in catalogs {
            let (resolver, _) = resolver(releases);
            assert_eq!(
                resolver.resolve_range_or_lts(">=>").await.unwrap(),
                resolver.resolve_lts().await.unwrap()
            );
        }
    }
}
