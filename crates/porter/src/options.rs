//! Engine options resolved against the project root.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use path_clean::PathClean;
use porter_config::{MinifyConfig, PorterConfig, Remap, SourceConfig};
use serde_json::Value;

use crate::error::{PorterError, Result};

/// The absolute-path form of [`PorterConfig`] consumed by the engine.
#[derive(Debug, Clone)]
pub struct PorterOptions {
    pub root: PathBuf,
    /// Source directories of the root packet, in resolution order.
    pub paths: Vec<PathBuf>,
    pub output: PathBuf,
    pub output_clean: bool,
    pub cache_path: PathBuf,
    pub cache_clean: bool,
    pub entries: Vec<String>,
    pub preload: Vec<String>,
    pub lazyload: Vec<String>,
    pub exclude: Vec<String>,
    pub transpile_include: Vec<String>,
    pub suffixes: Vec<String>,
    pub alias: BTreeMap<String, String>,
    pub fallback: BTreeMap<String, Remap>,
    pub source: SourceConfig,
    pub base_url: String,
    pub map: BTreeMap<String, String>,
    pub timeout: u64,
    pub lock: Option<Value>,
    pub package: Option<Value>,
    pub minify: MinifyConfig,
    pub node_env: String,
}

impl PorterOptions {
    /// Resolve every relative path in `config` against its root.
    ///
    /// Without an explicit root the current directory is used.
    pub fn from_config(config: PorterConfig) -> Result<Self> {
        config.validate()?;

        let root = match &config.root {
            Some(root) if root.is_absolute() => root.clean(),
            Some(root) => current_dir()?.join(root).clean(),
            None => current_dir()?,
        };
        let resolve = |path: &Path| root.join(path).clean();

        let output = resolve(&config.output.path);
        let cache_path = config
            .cache
            .path
            .as_deref()
            .map(resolve)
            .unwrap_or_else(|| output.clone());

        Ok(Self {
            paths: config.paths.iter().map(|p| resolve(p)).collect(),
            output,
            output_clean: config.output.clean,
            cache_path,
            cache_clean: config.cache.clean,
            suffixes: config.resolve.suffixes(),
            fallback: config.resolve.effective_fallback(),
            alias: config.resolve.alias,
            entries: config.entries,
            preload: config.preload,
            lazyload: config.lazyload,
            exclude: config.bundle.exclude,
            transpile_include: config.transpile.include,
            source: config.source,
            base_url: config.base_url,
            map: config.map,
            timeout: config.timeout,
            lock: config.lock,
            package: config.package,
            minify: config.minify,
            node_env: config.env.node_env,
            root,
        })
    }

    /// Defaults rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Self::from_config(PorterConfig {
            root: Some(root.into()),
            ..PorterConfig::default()
        })
    }

    /// Whether the root packet mirrors an existing deployment.
    pub fn is_fake(&self) -> bool {
        self.lock.is_some() && self.package.is_some()
    }

    /// Path of `file` relative to the project root, with `/` separators.
    pub fn relative(&self, file: &Path) -> String {
        relative_path(&self.root, file)
    }
}

fn current_dir() -> Result<PathBuf> {
    std::env::current_dir()
        .map_err(|e| PorterError::Io(format!("Failed to get current working directory: {e}")))
}

/// `to` relative to `from`, using `..` where `to` lies outside.
pub(crate) fn relative_path(from: &Path, to: &Path) -> String {
    let from: Vec<_> = from.components().collect();
    let to_parts: Vec<_> = to.components().collect();
    let common = from
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = vec!["..".to_string(); from.len() - common];
    parts.extend(
        to_parts[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_paths_against_root() {
        let config = PorterConfig::from_value(json!({
            "root": "/srv/app",
            "paths": ["components", "../shared"],
            "output": { "path": "dist" }
        }))
        .unwrap();
        let options = PorterOptions::from_config(config).unwrap();

        assert_eq!(
            options.paths,
            vec![PathBuf::from("/srv/app/components"), PathBuf::from("/srv/shared")]
        );
        assert_eq!(options.output, PathBuf::from("/srv/app/dist"));
        assert_eq!(options.cache_path, options.output);
        assert!(options.suffixes.contains(&"/index.js".to_string()));
        assert!(options.fallback["fs"].is_disabled());
    }

    #[test]
    fn relative_path_walks_up() {
        let root = Path::new("/srv/app");
        assert_eq!(relative_path(root, Path::new("/srv/app/components/a.js")), "components/a.js");
        assert_eq!(relative_path(root, Path::new("/srv/shared/b.js")), "../shared/b.js");
    }
}
