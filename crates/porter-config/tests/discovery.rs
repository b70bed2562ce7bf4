//! Tests for config file discovery and loading

use porter_config::{ConfigDiscovery, ConfigError, discover};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn discovers_porter_toml() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("porter.toml"),
        r#"
paths = ["app/web", "app/shared"]
entries = ["home.js"]
preload = ["preload.js"]

[output]
path = "dist"
"#,
    )
    .unwrap();

    let discovery = ConfigDiscovery::new(dir.path());
    let found = discovery.find().unwrap();
    assert_eq!(found.file_name().unwrap(), "porter.toml");

    let config = discovery.load().unwrap();
    assert_eq!(
        config.paths,
        vec![PathBuf::from("app/web"), PathBuf::from("app/shared")]
    );
    assert_eq!(config.entries, vec!["home.js".to_string()]);
    assert_eq!(config.preload, vec!["preload.js".to_string()]);
    assert_eq!(config.output.path, PathBuf::from("dist"));
    assert_eq!(config.root.as_deref(), Some(dir.path()));
}

#[test]
fn discovers_package_json_field() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("package.json"),
        r#"{
  "name": "demo-app",
  "version": "1.0.0",
  "porter": {
    "paths": "src",
    "bundle": { "exclude": ["react"] },
    "resolve": { "alias": { "@/": "lib/" } }
  }
}"#,
    )
    .unwrap();

    let config = ConfigDiscovery::new(dir.path()).load().unwrap();
    assert_eq!(config.paths, vec![PathBuf::from("src")]);
    assert_eq!(config.bundle.exclude, vec!["react".to_string()]);
    assert_eq!(config.resolve.alias["@/"], "lib/");
}

#[test]
fn toml_takes_precedence_over_package_json() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("porter.toml"), "entries = [\"toml.js\"]\n").unwrap();
    fs::write(
        dir.path().join("package.json"),
        r#"{ "name": "x", "porter": { "entries": ["pkg.js"] } }"#,
    )
    .unwrap();

    let config = ConfigDiscovery::new(dir.path()).load().unwrap();
    assert_eq!(config.entries, vec!["toml.js".to_string()]);
}

#[test]
fn package_json_without_field_is_not_config() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("package.json"), r#"{ "name": "x" }"#).unwrap();

    let discovery = ConfigDiscovery::new(dir.path());
    assert!(discovery.find().is_none());
    assert!(matches!(discovery.load(), Err(ConfigError::NotFound)));

    let config = discover(dir.path()).unwrap();
    assert_eq!(config.paths, vec![PathBuf::from("components")]);
    assert_eq!(config.root.as_deref(), Some(dir.path()));
}

#[test]
fn invalid_toml_reports_field() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("porter.toml"), "entries = [").unwrap();

    let err = ConfigDiscovery::new(dir.path()).load().unwrap_err();
    assert!(err.to_string().contains("toml"), "{err}");
}
