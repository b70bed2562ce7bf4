//! The parts of `package.json` the resolver cares about.

use std::collections::BTreeMap;
use std::path::Path;

use porter_config::Remap;
use serde_json::Value;

use crate::error::{PorterError, Result};

/// Export conditions in order of preference.
const CONDITIONS: &[&str] = &["require", "import", "default"];

#[derive(Debug, Clone, PartialEq)]
pub struct PackageMeta {
    pub name: String,
    pub version: String,
    pub main: String,
    pub browser: BTreeMap<String, Remap>,
    pub exports: Option<Value>,
}

impl PackageMeta {
    /// Extract metadata from parsed `package.json` content found in `dir`.
    ///
    /// `main` prefers a string `browser` field, then `main`, then `module`,
    /// and defaults to `index.js`.
    pub fn from_value(dir: &Path, value: &Value) -> Result<Self> {
        let invalid = |message: &str| PorterError::InvalidPackage {
            dir: dir.to_path_buf(),
            message: message.to_string(),
        };

        let name = value
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("missing \"name\""))?
            .to_string();
        let version = value
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("0.0.0")
            .to_string();

        let browser_field = value.get("browser");
        let main = browser_field
            .and_then(Value::as_str)
            .or_else(|| value.get("main").and_then(Value::as_str))
            .or_else(|| value.get("module").and_then(Value::as_str))
            .filter(|main| !main.is_empty())
            .map(|main| main.trim_start_matches("./").to_string())
            .unwrap_or_else(|| "index.js".to_string());

        let browser = match browser_field {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(key, value)| {
                    serde_json::from_value::<Remap>(value.clone())
                        .ok()
                        .map(|remap| (key.clone(), remap))
                })
                .collect(),
            _ => BTreeMap::new(),
        };

        Ok(Self {
            name,
            version,
            main,
            browser,
            exports: value.get("exports").cloned(),
        })
    }

    pub fn parse(dir: &Path, content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content).map_err(|e| PorterError::InvalidPackage {
            dir: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_value(dir, &value)
    }
}

/// Resolve `file` (relative to the package, `""` for the package itself)
/// through an `exports` field.
pub fn resolve_export(exports: &Value, file: &str) -> Option<String> {
    let subpath = match file.trim_start_matches("./") {
        "" | "." => ".".to_string(),
        file => format!("./{file}"),
    };

    match exports {
        Value::Object(map) if map.keys().any(|key| key.starts_with('.')) => {
            if let Some(target) = map.get(&subpath) {
                return resolve_target(target);
            }
            // "./lib/*": "./dist/lib/*.js"
            map.iter().find_map(|(pattern, target)| {
                let (prefix, suffix) = pattern.split_once('*')?;
                let matched = subpath.strip_prefix(prefix)?.strip_suffix(suffix)?;
                resolve_target(target).map(|target| target.replace('*', matched))
            })
        }
        _ if subpath == "." => resolve_target(exports),
        _ => None,
    }
}

fn resolve_target(target: &Value) -> Option<String> {
    match target {
        Value::String(path) => Some(path.clone()),
        Value::Array(targets) => targets.iter().find_map(resolve_target),
        Value::Object(conditions) => CONDITIONS
            .iter()
            .find_map(|condition| conditions.get(*condition).and_then(resolve_target)),
        _ => None,
    }
}
