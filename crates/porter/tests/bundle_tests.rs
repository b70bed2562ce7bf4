//! Bundle assembly, code splitting and compilation to disk.

mod helpers;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use helpers::{Project, defines, dev_code};
use porter::runtime::RuntimeResult;
use porter::{
    CompileOptions, FakeEntry, FileMetadata, NativeRuntime, PacketIdx, Porter, Runtime,
    RuntimeError,
};
use serde_json::json;

#[tokio::test]
async fn test_dynamic_import_splits_child_bundle() {
    let project = Project::new();
    project.component(
        "home.js",
        "require.async('./chart', function(chart) { chart.draw(); });\n",
    );
    project.component("chart.js", "module.exports = require('./heavy');\n");
    project.component("heavy.js", "module.exports = { draw: function() {} };\n");

    let porter = project.porter(&["home.js"]);
    let code = dev_code(&porter, "home.js").await;
    assert_eq!(defines(&code, "home.js"), 1);
    assert_eq!(defines(&code, "chart.js"), 0);
    assert_eq!(defines(&code, "heavy.js"), 0);

    let home = porter.bundle("home.js").unwrap();
    let chart = porter.bundle("chart.js").expect("child bundle");
    assert!(chart.has_parent());
    assert!(!chart.loader);
    assert!(home.children().iter().any(|child| child.entry() == "chart.js"));

    let chart_code = dev_code(&porter, "chart.js").await;
    assert_eq!(defines(&chart_code, "chart.js"), 1);
    assert_eq!(defines(&chart_code, "heavy.js"), 1);
    assert!(!chart_code.contains("porter.lock"));
}

#[tokio::test]
async fn test_root_bundle_leaves_dependencies_to_their_packet() {
    let project = Project::new();
    project.component("home.js", "var lib = require('lib');\nlib();\n");
    project.package(
        "lib",
        json!({}),
        &[
            ("index.js", "module.exports = require('./util');\n"),
            ("util.js", "module.exports = function() {};\n"),
        ],
    );

    let porter = project.porter(&["home.js"]);
    let code = dev_code(&porter, "home.js").await;
    assert_eq!(defines(&code, "home.js"), 1);
    assert_eq!(defines(&code, "lib/1.0.0/index.js"), 0);
    // loader bootstrap and the lock of the entry's packets
    assert!(code.contains("porter.merge(porter.lock, {"));
    assert!(code.contains("porter[\"import\"](\"home.js\")"));

    let lib = porter
        .with_graph(|graph| {
            let lib = graph.find(PacketIdx::ROOT, "lib", None)?;
            graph.packet(lib).bundles.get("index.js").cloned()
        })
        .unwrap();
    let output = porter.obtain(&lib, false).await.unwrap();
    let lib_code = String::from_utf8(output.code.to_vec()).unwrap();
    assert_eq!(defines(&lib_code, "lib/1.0.0/index.js"), 1);
    assert_eq!(defines(&lib_code, "lib/1.0.0/util.js"), 1);
    assert!(lib.output_path().starts_with("lib/1.0.0/index."));
}

#[tokio::test]
async fn test_content_hash_is_deterministic() {
    let project = Project::new();
    project.component("home.js", "module.exports = require('./a');\n");
    project.component("a.js", "module.exports = 'a';\n");

    let first = project.porter(&["home.js"]);
    dev_code(&first, "home.js").await;
    let second = project.porter(&["home.js"]);
    dev_code(&second, "home.js").await;

    let first = first.bundle("home.js").unwrap();
    let second = second.bundle("home.js").unwrap();
    let hash = first.contenthash();
    assert_eq!(hash.len(), 8);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(hash, second.contenthash());
    assert_eq!(first.output(), format!("home.{hash}.js"));
}

#[tokio::test]
async fn test_compile_all_writes_bundles_and_manifest() {
    let project = Project::new();
    project.component("home.js", "var lib = require('lib');\nlib('home');\n");
    project.component("home.css", "body { margin: 0; }\n");
    project.write(
        "components/about.js",
        "require('./home.css');\nmodule.exports = 'about';\n",
    );
    project.package(
        "lib",
        json!({}),
        &[("index.js", "module.exports = function(name) { return name; };\n")],
    );

    let porter = project.porter(&["home.js", "about.js"]);
    let manifest = porter.compile_all(&[]).await.unwrap();

    let home = manifest.get("home.js").expect("home entry");
    assert!(home.starts_with("home.") && home.ends_with(".js"));
    let lib = manifest.get("lib/1.0.0/index.js").expect("dependency bundle");
    assert!(lib.starts_with("lib/1.0.0/index."));
    assert!(manifest.contains_key("about.css"));

    let output = project.root().join("public");
    for path in manifest.values() {
        assert!(output.join(path).is_file(), "missing {path}");
        assert!(output.join(format!("{path}.map")).is_file(), "missing map of {path}");
    }

    let code = fs::read_to_string(output.join(home)).unwrap();
    assert!(code.contains("sourceMappingURL="));

    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(project.root().join("manifest.json")).unwrap())
            .unwrap();
    assert_eq!(written["home.js"], json!(home));
}

#[tokio::test]
async fn test_compile_entry_with_fake_entry() {
    let project = Project::new();
    project.package(
        "lib",
        json!({}),
        &[("index.js", "module.exports = function() { return 1; };\n")],
    );

    let porter = project.porter(&[]);
    let fake = FakeEntry {
        entry: "fake/entry.js".to_string(),
        deps: vec!["lib".to_string()],
        code: "var lib = require('lib');\nconsole.log(lib());\n".to_string(),
    };
    let output = porter
        .compile_entry(
            fake,
            CompileOptions {
                write: false,
                ..CompileOptions::default()
            },
        )
        .await
        .unwrap();

    assert!(!output.code.is_empty());
    assert!(output.output_path.starts_with("fake/entry."));
    assert!(output.output_path.ends_with(".js"));
    assert!(!project.root().join("public").join(&output.output_path).exists());
}

#[tokio::test]
async fn test_compile_entry_single_module() {
    let project = Project::new();
    project.component("home.js", "module.exports = require('./a');\n");
    project.component("a.js", "module.exports = 'a';\n");

    let porter = project.porter(&[]);
    let output = porter
        .compile_entry(
            "home.js",
            CompileOptions {
                package: false,
                loader: Some(false),
                ..CompileOptions::default()
            },
        )
        .await
        .unwrap();

    let path = project.root().join("public").join(&output.output_path);
    assert!(path.is_file());
    assert!(project.root().join("public").join(format!("{}.map", output.output_path)).is_file());
}

#[tokio::test]
async fn test_preload_takes_shared_modules_and_leaves_isolated_packets() {
    let project = Project::new();
    project.component("preload.js", "require('./shared');\nrequire('lib');\n");
    project.component("home.js", "require('./shared');\nrequire('lib');\n");
    project.component("shared.js", "module.exports = 'shared';\n");
    project.package("lib", json!({}), &[("index.js", "module.exports = require('dep2');\n")]);
    project.package("dep2", json!({}), &[("index.js", "module.exports = 2;\n")]);

    let mut options = project.options(&["home.js", "preload.js"]);
    options.preload = vec!["preload.js".to_string()];
    options.exclude = vec!["lib".to_string()];
    let porter = Porter::new(options);

    let home = dev_code(&porter, "home.js").await;
    assert_eq!(defines(&home, "home.js"), 1);
    assert_eq!(defines(&home, "shared.js"), 0);
    assert_eq!(defines(&home, "lib/1.0.0/index.js"), 0);
    assert_eq!(defines(&home, "dep2/1.0.0/index.js"), 0);

    // the walk passes through the excluded packet to reach its dependencies
    let preload = dev_code(&porter, "preload.js").await;
    assert_eq!(defines(&preload, "preload.js"), 1);
    assert_eq!(defines(&preload, "shared.js"), 1);
    assert_eq!(defines(&preload, "dep2/1.0.0/index.js"), 1);
    assert_eq!(defines(&preload, "lib/1.0.0/index.js"), 0);

    let lib = porter
        .with_graph(|graph| {
            let lib = graph.find(PacketIdx::ROOT, "lib", None)?;
            graph.packet(lib).bundles.get("index.js").cloned()
        })
        .unwrap();
    let output = porter.obtain(&lib, false).await.unwrap();
    let lib_code = String::from_utf8(output.code.to_vec()).unwrap();
    assert_eq!(defines(&lib_code, "lib/1.0.0/index.js"), 1);
    assert_eq!(defines(&lib_code, "dep2/1.0.0/index.js"), 0);
}

#[tokio::test]
async fn test_worker_gets_its_own_bundle() {
    let project = Project::new();
    project.component("home.js", "var w = require('./w.js?worker');\nnew w();\n");
    project.component("w.js", "self.onmessage = function() {};\n");

    let porter = project.porter(&["home.js"]);
    let code = dev_code(&porter, "home.js").await;
    assert_eq!(defines(&code, "home.js"), 1);
    assert_eq!(defines(&code, "w.js"), 0);

    let home = porter.bundle("home.js").unwrap();
    let worker = porter.bundle("w.js").expect("worker bundle");
    assert!(worker.has_parent());
    assert!(home.children().iter().any(|child| Arc::ptr_eq(child, &worker)));

    let worker_code = dev_code(&porter, "w.js").await;
    assert_eq!(defines(&worker_code, "w.js"), 1);
}

#[tokio::test]
async fn test_workers_outside_the_root_packet_stay_unsplit() {
    let project = Project::new();
    project.component("home.js", "require.async('lib', function(lib) {});\n");
    project.package(
        "lib",
        json!({}),
        &[
            ("index.js", "module.exports = require('./w.js?worker');\n"),
            ("w.js", "self.onmessage = function() {};\n"),
        ],
    );

    let porter = project.porter(&["home.js"]);
    porter.ready(false).await.unwrap();

    let lib = porter
        .with_graph(|graph| {
            let lib = graph.find(PacketIdx::ROOT, "lib", None)?;
            graph.packet(lib).bundles.get("index.js").cloned()
        })
        .unwrap();
    assert!(lib.children().is_empty());
}

#[tokio::test]
async fn test_css_module_exports_class_names() {
    let project = Project::new();
    project.component(
        "home.js",
        "var styles = require('./button.module.css');\nstyles.btn;\n",
    );
    project.component("button.module.css", ".btn { color: red; }\n");

    let porter = project.porter(&["home.js"]);
    let code = dev_code(&porter, "home.js").await;
    assert!(code.contains("porter.define(\"button.module.css\", {\"btn\":"));

    let css = dev_code(&porter, "home.css").await;
    assert!(css.contains("color"));
    assert!(css.contains("btn"));
}

/// Disk runtime whose cache records cannot be written.
#[derive(Debug, Default)]
struct ReadOnlyCache {
    inner: NativeRuntime,
}

#[async_trait]
impl Runtime for ReadOnlyCache {
    async fn read_file(&self, path: &Path) -> RuntimeResult<Vec<u8>> {
        self.inner.read_file(path).await
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> RuntimeResult<()> {
        let name = path.file_name().and_then(|name| name.to_str()).unwrap_or_default();
        if name.ends_with(".cache") && name != "salt.cache" {
            return Err(RuntimeError::Io(format!("{} is read-only", path.display())));
        }
        self.inner.write_file(path, content).await
    }

    async fn metadata(&self, path: &Path) -> RuntimeResult<FileMetadata> {
        self.inner.metadata(path).await
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    async fn create_dir(&self, path: &Path, recursive: bool) -> RuntimeResult<()> {
        self.inner.create_dir(path, recursive).await
    }

    async fn remove_file(&self, path: &Path) -> RuntimeResult<()> {
        self.inner.remove_file(path).await
    }

    async fn remove_dir(&self, path: &Path) -> RuntimeResult<()> {
        self.inner.remove_dir(path).await
    }

    async fn canonicalize(&self, path: &Path) -> RuntimeResult<PathBuf> {
        self.inner.canonicalize(path).await
    }
}

fn cache_records(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut records = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            records.extend(cache_records(&path));
        } else if path.extension().is_some_and(|ext| ext == "cache")
            && path.file_name().is_some_and(|name| name != "salt.cache")
        {
            records.push(path);
        }
    }
    records
}

#[tokio::test]
async fn test_failed_cache_writes_do_not_fail_the_build() {
    let project = Project::new();
    project.component("home.js", "module.exports = require('./greeting');\n");
    project.component("greeting.js", "module.exports = 'hello';\n");

    let porter = Porter::builder(project.options(&["home.js"]))
        .runtime(Arc::new(ReadOnlyCache::default()))
        .build();
    let code = dev_code(&porter, "home.js").await;
    assert_eq!(defines(&code, "greeting.js"), 1);

    // records are persisted in the background
    tokio::time::sleep(Duration::from_millis(100)).await;
    let cache = porter.cache().path();
    assert!(cache.join("salt.cache").exists());
    assert!(cache_records(cache).is_empty());
}
