//! End-to-end tests of the `porter` binary.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn project() -> TempDir {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::write(
        root.join("package.json"),
        r#"{"name": "app", "version": "1.0.0", "porter": {"entries": ["home.js"]}}"#,
    )
    .unwrap();
    fs::create_dir_all(root.join("components")).unwrap();
    fs::write(
        root.join("components/home.js"),
        "var greet = require('./greet');\ngreet('world');\n",
    )
    .unwrap();
    fs::write(
        root.join("components/greet.js"),
        "module.exports = function(name) { return 'hello ' + name; };\n",
    )
    .unwrap();
    temp
}

fn porter() -> Command {
    Command::cargo_bin("porter").unwrap()
}

#[test]
fn test_help_lists_commands() {
    porter()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("serve"));
}

#[test]
fn test_build_writes_manifest() {
    let temp = project();

    porter()
        .args(["build", "--no-color", "--root"])
        .arg(temp.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("Compiled"));

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(temp.path().join("manifest.json")).unwrap())
            .unwrap();
    let output = manifest["home.js"].as_str().unwrap();
    assert!(output.starts_with("home.") && output.ends_with(".js"));
    assert!(temp.path().join("public").join(output).is_file());
    assert!(temp.path().join("public").join(format!("{output}.map")).is_file());
}

#[test]
fn test_build_output_override() {
    let temp = project();

    porter()
        .args(["build", "--quiet", "--output", "dist", "--clean", "--root"])
        .arg(temp.path())
        .assert()
        .success();

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(temp.path().join("manifest.json")).unwrap())
            .unwrap();
    let output = manifest["home.js"].as_str().unwrap();
    assert!(temp.path().join("dist").join(output).is_file());
}

#[test]
fn test_build_missing_root_fails_with_hint() {
    let temp = TempDir::new().unwrap();

    porter()
        .args(["build", "--no-color", "--root"])
        .arg(temp.path().join("nowhere"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Project root not found"))
        .stderr(predicate::str::contains("--root"));
}

#[test]
fn test_build_without_entries_fails() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("package.json"),
        r#"{"name": "app", "version": "1.0.0"}"#,
    )
    .unwrap();

    porter()
        .args(["build", "--no-color", "--root"])
        .arg(temp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no entries configured"));
}

#[test]
fn test_build_unresolved_import_reports_file() {
    let temp = project();
    fs::write(
        temp.path().join("components/home.js"),
        "require('./missing');\n",
    )
    .unwrap();

    porter()
        .args(["build", "--no-color", "--root"])
        .arg(temp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("./missing"));
}
