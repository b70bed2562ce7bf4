//! Shared fixtures for porter integration tests
//!
//! Each fixture is a throwaway project on disk: a root `package.json`, a
//! `components/` source directory and whatever packages the test installs
//! under `node_modules/`.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use porter::{Porter, PorterOptions};
use serde_json::json;
use tempfile::TempDir;

pub struct Project {
    dir: TempDir,
}

impl Project {
    /// An empty project named `app`.
    pub fn new() -> Self {
        let project = Self {
            dir: TempDir::new().unwrap(),
        };
        project.write(
            "package.json",
            &json!({ "name": "app", "version": "0.1.0" }).to_string(),
        );
        fs::create_dir_all(project.root().join("components")).unwrap();
        project
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `content` to `relative`, creating parent directories.
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    /// Write a source file under `components/`.
    pub fn component(&self, file: &str, content: &str) -> PathBuf {
        self.write(&format!("components/{file}"), content)
    }

    /// Install a package under `node_modules/` with the given files.
    pub fn package(&self, name: &str, manifest: serde_json::Value, files: &[(&str, &str)]) {
        let mut manifest = manifest;
        manifest["name"] = json!(name);
        if manifest.get("version").is_none() {
            manifest["version"] = json!("1.0.0");
        }
        self.write(
            &format!("node_modules/{name}/package.json"),
            &manifest.to_string(),
        );
        for (file, content) in files {
            self.write(&format!("node_modules/{name}/{file}"), content);
        }
    }

    pub fn options(&self, entries: &[&str]) -> PorterOptions {
        let mut options = PorterOptions::new(self.root()).unwrap();
        options.entries = entries.iter().map(|entry| entry.to_string()).collect();
        options
    }

    pub fn porter(&self, entries: &[&str]) -> Porter {
        Porter::new(self.options(entries))
    }
}

/// Development code of the root bundle `outkey`.
pub async fn dev_code(porter: &Porter, outkey: &str) -> String {
    porter.ready(false).await.unwrap();
    let bundle = porter
        .bundle(outkey)
        .unwrap_or_else(|| panic!("no bundle for {outkey}"));
    let output = porter.obtain(&bundle, false).await.unwrap();
    String::from_utf8(output.code.to_vec()).unwrap()
}

/// Number of `porter.define(...)` calls for module `id` in `code`.
pub fn defines(code: &str, id: &str) -> usize {
    code.matches(&format!("porter.define(\"{id}\"")).count()
}
