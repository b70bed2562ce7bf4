//! The serialized configuration model.
//!
//! Every field has a default so that an empty `porter.toml` (or an empty
//! `"porter": {}` object) yields a usable configuration. Keys use the same
//! camelCase spelling as `package.json`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{ConfigError, Result};

/// Extensions tried, in order, when resolving a logical file name.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "*", ".js", ".jsx", ".ts", ".tsx", ".d.ts", ".json", ".css",
];

/// Node builtins that have no meaningful browser counterpart.
pub fn default_fallback() -> BTreeMap<String, Remap> {
    BTreeMap::from([
        ("fs".to_string(), Remap::Flag(false)),
        ("stream".to_string(), Remap::path("readable-stream")),
    ])
}

/// A specifier remapping as found in `browser` fields and `resolve.fallback`.
///
/// `false` disables the specifier, a string redirects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Remap {
    Path(String),
    Flag(bool),
}

impl Remap {
    pub fn path(target: impl Into<String>) -> Self {
        Remap::Path(target.into())
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Remap::Flag(false))
    }

    pub fn as_path(&self) -> Option<&str> {
        match self {
            Remap::Path(path) => Some(path),
            Remap::Flag(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PorterConfig {
    /// Project root. Defaults to the directory the config was found in.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Source directories of the root packet, relative to the root.
    #[serde(default = "default_paths", deserialize_with = "one_or_many")]
    pub paths: Vec<PathBuf>,

    #[serde(default)]
    pub entries: Vec<String>,

    /// Entries loaded first and kept resident; their closure is not
    /// duplicated into other bundles.
    #[serde(default)]
    pub preload: Vec<String>,

    #[serde(default)]
    pub lazyload: Vec<String>,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub bundle: BundleConfig,

    #[serde(default)]
    pub transpile: TranspileConfig,

    #[serde(default)]
    pub resolve: ResolveConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Loader-side specifier map, passed through verbatim.
    #[serde(default)]
    pub map: BTreeMap<String, String>,

    /// Ignition timeout of the client loader in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// A previously generated lock. Together with `package` this turns the
    /// root packet into a fake packet that mirrors an existing deployment.
    #[serde(default)]
    pub lock: Option<Value>,

    /// Inline package metadata used instead of reading `package.json`.
    #[serde(default)]
    pub package: Option<Value>,

    #[serde(default)]
    pub minify: MinifyConfig,

    #[serde(default)]
    pub env: EnvConfig,
}

impl Default for PorterConfig {
    fn default() -> Self {
        Self {
            root: None,
            paths: default_paths(),
            entries: Vec::new(),
            preload: Vec::new(),
            lazyload: Vec::new(),
            output: OutputConfig::default(),
            cache: CacheConfig::default(),
            bundle: BundleConfig::default(),
            transpile: TranspileConfig::default(),
            resolve: ResolveConfig::default(),
            source: SourceConfig::default(),
            base_url: default_base_url(),
            map: BTreeMap::new(),
            timeout: default_timeout(),
            lock: None,
            package: None,
            minify: MinifyConfig::default(),
            env: EnvConfig::default(),
        }
    }
}

impl PorterConfig {
    /// Create from serde_json::Value (for programmatic config)
    ///
    /// ```
    /// use porter_config::PorterConfig;
    /// use serde_json::json;
    ///
    /// let config = PorterConfig::from_value(json!({
    ///     "entries": ["app.js"],
    ///     "paths": "src"
    /// }))
    /// .unwrap();
    /// assert_eq!(config.entries, vec!["app.js".to_string()]);
    /// assert_eq!(config.paths, vec![std::path::PathBuf::from("src")]);
    /// ```
    pub fn from_value(value: Value) -> Result<Self> {
        let config: PorterConfig = serde_json::from_value(value)
            .map_err(|e| ConfigError::invalid("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| ConfigError::invalid("config", e.to_string()))
    }

    /// Reject configurations the engine cannot act on.
    pub fn validate(&self) -> Result<()> {
        if self.paths.is_empty() {
            return Err(ConfigError::invalid(
                "paths",
                "at least one source directory is required",
            ));
        }
        if self.resolve.extensions.is_empty() {
            return Err(ConfigError::invalid(
                "resolve.extensions",
                "use [\"*\"] to resolve exact file names only",
            ));
        }
        if let Some(ext) = self
            .resolve
            .extensions
            .iter()
            .find(|ext| ext.as_str() != "*" && !ext.starts_with('.'))
        {
            return Err(ConfigError::invalid(
                "resolve.extensions",
                format!("'{ext}' must start with a dot"),
            ));
        }
        if self.lock.is_some() && self.package.is_none() {
            return Err(ConfigError::invalid(
                "lock",
                "a lock can only be used together with inline package metadata",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,

    /// Remove the output directory before compiling.
    #[serde(default)]
    pub clean: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            clean: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Where transpilation records live. Defaults to the output path.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Purge the cache directory on startup.
    #[serde(default)]
    pub clean: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleConfig {
    /// Packages bundled on their own instead of into dependents.
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranspileConfig {
    /// Dependencies that share the root packet's script transpiler.
    #[serde(default)]
    pub include: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Prefix aliases applied to specifiers of the root packet.
    #[serde(default)]
    pub alias: BTreeMap<String, String>,

    /// Redirects for specifiers no installed package satisfies.
    #[serde(default)]
    pub fallback: BTreeMap<String, Remap>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            alias: BTreeMap::new(),
            fallback: BTreeMap::new(),
        }
    }
}

impl ResolveConfig {
    /// User fallbacks layered over the built-in ones.
    pub fn effective_fallback(&self) -> BTreeMap<String, Remap> {
        let mut fallback = default_fallback();
        fallback.extend(self.fallback.clone());
        fallback
    }

    /// Suffixes tried after a logical name, derived from `extensions`.
    ///
    /// `*` stands for the bare name. Every other extension is tried as a
    /// file suffix first and as a directory index second.
    pub fn suffixes(&self) -> Vec<String> {
        let mut suffixes = Vec::with_capacity(self.extensions.len() * 2);
        for ext in &self.extensions {
            if ext == "*" {
                suffixes.push(String::new());
            } else {
                suffixes.push(ext.clone());
                suffixes.push(format!("/index{ext}"));
            }
        }
        suffixes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    /// Serve raw sources next to bundles (development only).
    #[serde(default)]
    pub serve: bool,

    /// Keep `sourcesContent` in emitted maps instead of pointing at `root`.
    #[serde(default)]
    pub inline: bool,

    #[serde(default = "default_source_root")]
    pub root: String,

    /// Prefix of `sourceMappingURL` comments. Defaults to a relative name.
    #[serde(default)]
    pub mapping_url: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            serve: false,
            inline: false,
            root: default_source_root(),
            mapping_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinifyConfig {
    #[serde(default = "default_true")]
    pub mangle: bool,

    #[serde(default = "default_true")]
    pub compress: bool,
}

impl Default for MinifyConfig {
    fn default() -> Self {
        Self {
            mangle: true,
            compress: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvConfig {
    /// Value inlined for `process.env.NODE_ENV`.
    #[serde(default = "default_node_env")]
    pub node_env: String,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            node_env: default_node_env(),
        }
    }
}

fn default_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("components")]
}

fn default_output_path() -> PathBuf {
    PathBuf::from("public")
}

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect()
}

fn default_base_url() -> String {
    "/".to_string()
}

fn default_timeout() -> u64 {
    30_000
}

fn default_source_root() -> String {
    "http://localhost/".to_string()
}

fn default_node_env() -> String {
    "development".to_string()
}

fn default_true() -> bool {
    true
}

/// Accept either a single path or a list of paths.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(PathBuf),
        Many(Vec<PathBuf>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(path) => vec![path],
        OneOrMany::Many(paths) => paths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn suffixes_follow_extension_order() {
        let resolve = ResolveConfig {
            extensions: vec!["*".into(), ".js".into(), ".css".into()],
            ..ResolveConfig::default()
        };
        assert_eq!(
            resolve.suffixes(),
            vec!["", ".js", "/index.js", ".css", "/index.css"]
        );
    }

    #[test]
    fn fallback_overrides_builtins() {
        let resolve = ResolveConfig {
            fallback: BTreeMap::from([("fs".to_string(), Remap::path("memfs"))]),
            ..ResolveConfig::default()
        };
        let fallback = resolve.effective_fallback();
        assert_eq!(fallback["fs"], Remap::path("memfs"));
        assert_eq!(fallback["stream"].as_path(), Some("readable-stream"));
    }

    #[test]
    fn remap_parses_strings_and_false() {
        let map: BTreeMap<String, Remap> =
            serde_json::from_value(json!({ "./fs.js": false, "./a.js": "./b.js" })).unwrap();
        assert!(map["./fs.js"].is_disabled());
        assert_eq!(map["./a.js"].as_path(), Some("./b.js"));
    }

    #[test]
    fn rejects_extension_without_dot() {
        let err = PorterConfig::from_value(json!({ "resolve": { "extensions": ["js"] } }))
            .unwrap_err();
        assert!(err.to_string().contains("resolve.extensions"));
    }

    #[test]
    fn rejects_lock_without_package() {
        let err = PorterConfig::from_value(json!({ "lock": {} })).unwrap_err();
        assert!(err.to_string().contains("lock"));
    }
}
