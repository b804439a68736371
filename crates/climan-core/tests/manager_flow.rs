use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use climan_backend::{
    ClimanError, NodeRuntime, PackageMetadata, ReleaseEntry, ReleaseSource, RuntimeProvider,
};
use climan_core::{CliManager, InstallRegistry, InstallRequest, VersionResolver};
use semver::Version;

struct StaticCatalog(Vec<ReleaseEntry>);

#[async_trait]
impl ReleaseSource for StaticCatalog {
    async fn fetch_releases(&self) -> Result<Vec<ReleaseEntry>, ClimanError> {
        Ok(self.0.clone())
    }
}

/// Records every npm invocation as "<bin dir> <args...>".
type NpmLog = Arc<Mutex<Vec<String>>>;

struct FakeRuntime {
    bin_dir: PathBuf,
    metadata: PackageMetadata,
    npm_log: NpmLog,
}

#[async_trait]
impl NodeRuntime for FakeRuntime {
    fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    async fn run_node(&self, _args: &[&str]) -> Result<(), ClimanError> {
        Ok(())
    }

    async fn run_npm(&self, args: &[&str]) -> Result<(), ClimanError> {
        self.npm_log
            .lock()
            .unwrap()
            .push(format!("{} {}", self.bin_dir.display(), args.join(" ")));
        Ok(())
    }

    async fn package_metadata(&self, _package: &str) -> Result<PackageMetadata, ClimanError> {
        Ok(self.metadata.clone())
    }

    async fn node_version(&self) -> Result<String, ClimanError> {
        let version = self
            .bin_dir
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(format!("v{version}"))
    }
}

struct FakeRuntimes {
    root: PathBuf,
    metadata: PackageMetadata,
    npm_log: NpmLog,
    installed: Mutex<BTreeSet<Version>>,
}

impl FakeRuntimes {
    fn runtime(&self, bin_dir: PathBuf) -> FakeRuntime {
        FakeRuntime {
            bin_dir,
            metadata: self.metadata.clone(),
            npm_log: self.npm_log.clone(),
        }
    }
}

#[async_trait]
impl RuntimeProvider for FakeRuntimes {
    async fn acquire(&self, version: &Version) -> Result<Box<dyn NodeRuntime>, ClimanError> {
        self.installed.lock().unwrap().insert(version.clone());
        let bin_dir = self.bin_dir_for(version);
        std::fs::create_dir_all(&bin_dir)?;
        Ok(Box::new(self.runtime(bin_dir)))
    }

    fn runtime_at(&self, bin_dir: &Path) -> Box<dyn NodeRuntime> {
        Box::new(self.runtime(bin_dir.to_path_buf()))
    }

    fn installed_versions(&self) -> Result<Vec<Version>, ClimanError> {
        Ok(self.installed.lock().unwrap().iter().rev().cloned().collect())
    }

    fn bin_dir_for(&self, version: &Version) -> PathBuf {
        self.root.join(version.to_string()).join("bin")
    }

    async fn remove(&self, version: &Version) -> Result<(), ClimanError> {
        if self.installed.lock().unwrap().remove(version) {
            Ok(())
        } else {
            Err(ClimanError::not_installed(format!("Node {version}")))
        }
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    manager: CliManager,
    runtimes: Arc<FakeRuntimes>,
    npm_log: NpmLog,
}

fn catalog() -> Vec<ReleaseEntry> {
    serde_json::from_str(
        r#"[
            {"version":"v15.0.0","lts":false},
            {"version":"v14.15.0","lts":"Fermium"},
            {"version":"v12.19.0","lts":"Erbium"},
            {"version":"v10.24.0","lts":"Dubnium"},
            {"version":"v10.23.0","lts":"Dubnium"}
        ]"#,
    )
    .expect("catalog should decode")
}

fn foo_tools(engine: Option<&str>) -> PackageMetadata {
    let mut manifest = serde_json::json!({
        "name": "foo-tools",
        "bin": {"foo": "./bin/foo.js", "bar": "./bin/bar.js"}
    });
    if let Some(engine) = engine {
        manifest["engines"] = serde_json::json!({ "node": engine });
    }
    serde_json::from_value(manifest).expect("manifest should decode")
}

fn fixture_with_registry(
    metadata: PackageMetadata,
    registry_path: impl FnOnce(&Path) -> PathBuf,
) -> Fixture {
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let npm_log = NpmLog::default();
    let runtimes = Arc::new(FakeRuntimes {
        root: temp.path().join("node"),
        metadata,
        npm_log: npm_log.clone(),
        installed: Mutex::new(BTreeSet::new()),
    });
    let registry = InstallRegistry::new(registry_path(temp.path()));
    let manager = CliManager::new(
        VersionResolver::new(Arc::new(StaticCatalog(catalog()))),
        runtimes.clone(),
        registry,
    );
    Fixture {
        _temp: temp,
        manager,
        runtimes,
        npm_log,
    }
}

fn fixture(metadata: PackageMetadata) -> Fixture {
    fixture_with_registry(metadata, |root| root.join("config").join("installed.json"))
}

fn v(input: &str) -> Version {
    Version::parse(input).expect("test version")
}

#[tokio::test]
async fn install_uses_engine_range_and_records_every_command() {
    let fx = fixture(foo_tools(Some(">=10.x <14.x")));

    let outcome = fx
        .manager
        .install(&InstallRequest::new("foo-tools"))
        .await
        .expect("install should succeed");

    assert_eq!(outcome.package, "foo-tools");
    assert_eq!(outcome.node_version, v("12.19.0"));
    assert_eq!(outcome.commands, vec!["bar", "foo"]);

    let bin_dir = fx.runtimes.bin_dir_for(&v("12.19.0"));
    let entries = fx.manager.list();
    assert_eq!(entries.len(), 2);
    for app in &entries {
        assert_eq!(app.app, "foo-tools");
        assert_eq!(app.install_name, "foo-tools");
        assert_eq!(app.path, bin_dir);
    }

    // Metadata came from the latest even-major runtime, the install went to
    // the resolved one.
    assert_eq!(
        fx.runtimes.installed_versions().unwrap(),
        vec![v("14.15.0"), v("12.19.0")]
    );
    assert_eq!(
        *fx.npm_log.lock().unwrap(),
        vec![format!("{} install -g foo-tools", bin_dir.display())]
    );
}

#[tokio::test]
async fn explicit_node_version_overrides_engine() {
    let fx = fixture(foo_tools(Some(">=14")));

    let outcome = fx
        .manager
        .install(&InstallRequest::new("foo-tools").with_node_version("10.x"))
        .await
        .expect("install should succeed");

    assert_eq!(outcome.node_version, v("10.24.0"));
}

#[tokio::test]
async fn missing_or_unparseable_engine_falls_back_to_lts() {
    for engine in [None, Some("not-a-range")] {
        let fx = fixture(foo_tools(engine));

        let outcome = fx
            .manager
            .install(&InstallRequest::new("foo-tools"))
            .await
            .expect("install should succeed");

        assert_eq!(outcome.node_version, v("14.15.0"), "{engine:?}");
    }
}

#[tokio::test]
async fn uninstall_by_install_name_removes_all_commands() {
    let fx = fixture(foo_tools(None));
    fx.manager
        .install(&InstallRequest::new("acme/foo-tools#main"))
        .await
        .expect("install should succeed");
    assert_eq!(fx.manager.registry().list(), vec!["bar", "foo"]);

    let removed = fx
        .manager
        .uninstall("acme/foo-tools#main")
        .await
        .expect("uninstall should succeed");

    assert_eq!(removed, vec!["bar", "foo"]);
    assert!(fx.manager.list().is_empty());
    let log = fx.npm_log.lock().unwrap();
    assert!(log.last().unwrap().ends_with(" remove -g foo-tools"));
}

#[tokio::test]
async fn uninstall_unknown_is_not_installed() {
    let fx = fixture(foo_tools(None));

    let err = fx.manager.uninstall("nothing").await.unwrap_err();

    assert!(err.is_not_installed());
    assert!(fx.npm_log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn registry_write_failure_rolls_back_install() {
    // A regular file where the config directory should be makes every
    // registry write fail.
    let fx = fixture_with_registry(foo_tools(None), |root| {
        let blocker = root.join("config");
        std::fs::write(&blocker, "not a directory").unwrap();
        blocker.join("installed.json")
    });

    let err = fx
        .manager
        .install(&InstallRequest::new("foo-tools"))
        .await
        .unwrap_err();

    assert!(matches!(err, ClimanError::RegistryWrite { .. }), "{err}");
    let log = fx.npm_log.lock().unwrap();
    assert_eq!(log.len(), 2);
    assert!(log[0].ends_with(" install -g foo-tools"));
    assert!(log[1].ends_with(" remove -g foo-tools"));
}

#[tokio::test]
async fn runtime_inventory_tracks_usage() {
    let fx = fixture(foo_tools(Some("12.x")));
    fx.manager
        .install(&InstallRequest::new("foo-tools"))
        .await
        .expect("install should succeed");

    assert_eq!(fx.manager.unused_runtimes().unwrap(), vec![v("14.15.0")]);

    match fx.manager.remove_runtime(&v("12.19.0")).await {
        Err(ClimanError::RuntimeInUse { version, commands }) => {
            assert_eq!(version, "12.19.0");
            assert_eq!(commands, vec!["bar", "foo"]);
        }
        other => panic!("expected RuntimeInUse, got {other:?}"),
    }

    fx.manager
        .remove_runtime(&v("14.15.0"))
        .await
        .expect("unused runtime should be removable");
    assert!(fx.manager.unused_runtimes().unwrap().is_empty());

    assert_eq!(
        fx.manager.runtime_health(&v("12.19.0")).await.unwrap(),
        "v12.19.0"
    );
    assert!(
        fx.manager
            .runtime_health(&v("14.15.0"))
            .await
            .unwrap_err()
            .is_not_installed()
    );
}

#[tokio::test]
async fn run_unknown_command_is_not_installed() {
    let fx = fixture(foo_tools(None));

    let err = fx.manager.run("foo", &[]).await.unwrap_err();

    assert!(err.is_not_installed());
}

#[cfg(unix)]
#[tokio::test]
async fn run_executes_command_inside_its_runtime() {
    use std::os::unix::fs::PermissionsExt;

    let fx = fixture(foo_tools(Some("12.x")));
    fx.manager
        .install(&InstallRequest::new("foo-tools"))
        .await
        .expect("install should succeed");

    let bin_dir = fx.runtimes.bin_dir_for(&v("12.19.0"));
    let write_script = |name: &str, body: &str| {
        let path = bin_dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    };
    write_script("foo", "#!/bin/sh\necho \"$PATH\" > \"$1\"\n");
    write_script("bar", "#!/bin/sh\nexit 7\n");

    let out = bin_dir.join("path.txt");
    fx.manager
        .run("foo", &[out.to_string_lossy().into_owned()])
        .await
        .expect("foo should succeed");
    let search_path = std::fs::read_to_string(&out).unwrap();
    assert!(search_path.starts_with(&format!("{}:", bin_dir.display())));

    let err = fx.manager.run("bar", &[]).await.unwrap_err();
    assert!(matches!(err, ClimanError::CommandFailed { code: Some(7), .. }));
    assert_eq!(err.exit_code(), 7);
}
