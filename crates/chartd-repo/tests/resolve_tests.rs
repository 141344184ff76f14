//! End-to-end chart resolution over local charts and `file://` dependencies

use chartd_repo::{ChartResolver, LockFile, RegistryClient, RepoSettings, ResolveError};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// `app` depends on a sibling `common` chart through `file://../common`
fn workspace() -> TempDir {
    let temp = TempDir::new().unwrap();
    write(
        &temp.path().join("app/Chart.yaml"),
        r#"apiVersion: v2
name: app
version: 1.0.0
dependencies:
  - name: common
    version: ">=1.0.0"
    repository: file://../common
"#,
    );
    write(
        &temp.path().join("app/templates/cm.yaml"),
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: app\n",
    );
    write(
        &temp.path().join("common/Chart.yaml"),
        "apiVersion: v2\nname: common\nversion: 1.2.0\n",
    );
    write(
        &temp.path().join("common/templates/_helpers.tpl"),
        "{% macro label() %}app{% endmacro %}\n",
    );
    temp
}

fn resolver(root: &Path) -> ChartResolver<chartd_repo::RepoFetcher> {
    ChartResolver::from_settings(
        Arc::new(RepoSettings::rooted_at(&root.join("helm"))),
        RegistryClient::anonymous(),
    )
    .unwrap()
}

#[tokio::test]
async fn unmet_dependencies_fail_without_update() {
    let temp = workspace();
    let chart = temp.path().join("app");

    let err = resolver(temp.path())
        .resolve(chart.to_str().unwrap(), false)
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::Unmet(ref names) if names == &["common".to_string()]));
    assert!(!chart.join("Chart.lock").exists());
    assert!(!chart.join("charts").exists());
}

#[tokio::test]
async fn update_materializes_and_locks_dependencies() {
    let temp = workspace();
    let chart = temp.path().join("app");
    let resolver = resolver(temp.path());

    let resolved = resolver
        .resolve(chart.to_str().unwrap(), true)
        .await
        .unwrap();

    assert!(resolved.chart.unmet_dependencies().is_empty());
    assert_eq!(resolved.chart.subchart("common").unwrap().metadata.version.to_string(), "1.2.0");

    let lock = LockFile::load(&chart.join("Chart.lock")).unwrap().unwrap();
    assert!(lock.matches(resolved.chart.dependencies()));

    // Second resolution is satisfied without an update
    let modified = fs::metadata(chart.join("Chart.lock")).unwrap().modified().unwrap();
    resolver
        .resolve(chart.to_str().unwrap(), false)
        .await
        .unwrap();
    assert_eq!(
        fs::metadata(chart.join("Chart.lock")).unwrap().modified().unwrap(),
        modified
    );
}

#[tokio::test]
async fn constraint_mismatch_is_an_update_error() {
    let temp = workspace();
    write(
        &temp.path().join("common/Chart.yaml"),
        "apiVersion: v2\nname: common\nversion: 0.9.0\n",
    );

    let err = resolver(temp.path())
        .resolve(temp.path().join("app").to_str().unwrap(), true)
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::Update(_)));
}

#[tokio::test]
async fn unknown_reference_fails_to_locate() {
    let temp = workspace();

    let err = resolver(temp.path())
        .resolve("./does/not/exist", false)
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::Locate { .. }));
}
