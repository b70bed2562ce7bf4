//! File-based config discovery for CLI use
//!
//! Looks for `porter.toml` first and falls back to the `"porter"` field of
//! `package.json`. Library users can build a [`PorterConfig`] directly with
//! [`PorterConfig::from_value`].

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::PorterConfig;
use crate::error::{ConfigError, Result};

const TOML_FILE: &str = "porter.toml";
const PACKAGE_FILE: &str = "package.json";
const PACKAGE_FIELD: &str = "porter";

pub struct ConfigDiscovery {
    root: PathBuf,
}

impl ConfigDiscovery {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Find a config file in the root directory.
    pub fn find(&self) -> Option<PathBuf> {
        let toml_path = self.root.join(TOML_FILE);
        if toml_path.is_file() {
            return Some(toml_path);
        }

        let pkg_path = self.root.join(PACKAGE_FILE);
        let content = fs::read_to_string(&pkg_path).ok()?;
        let parsed: Value = serde_json::from_str(&content).ok()?;
        match parsed.get(PACKAGE_FIELD) {
            Some(field) if !field.is_null() => Some(pkg_path),
            _ => None,
        }
    }

    /// Load config from the discovered file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotFound` if neither file carries configuration.
    pub fn load(&self) -> Result<PorterConfig> {
        let path = self.find().ok_or(ConfigError::NotFound)?;
        let mut config = self.load_from(&path)?;
        if config.root.is_none() {
            config.root = Some(self.root.clone());
        }
        Ok(config)
    }

    /// Like [`load`](Self::load), but an absent config yields the defaults
    /// rooted at the discovery directory.
    pub fn load_or_default(&self) -> Result<PorterConfig> {
        match self.load() {
            Err(ConfigError::NotFound) => {
                tracing::debug!("no porter config in {}, using defaults", self.root.display());
                Ok(PorterConfig {
                    root: Some(self.root.clone()),
                    ..PorterConfig::default()
                })
            }
            other => other,
        }
    }

    fn load_from(&self, path: &Path) -> Result<PorterConfig> {
        if path.file_name() == Some(std::ffi::OsStr::new(PACKAGE_FILE)) {
            return self.load_from_package_json(path);
        }

        let content = fs::read_to_string(path)?;
        let toml_val: toml::Value = toml::from_str(&content)
            .map_err(|e| ConfigError::invalid("toml", format!("Invalid TOML syntax: {e}")))?;
        let value = serde_json::to_value(toml_val).map_err(|e| {
            ConfigError::invalid("toml", format!("TOML to JSON conversion failed: {e}"))
        })?;

        PorterConfig::from_value(value)
    }

    fn load_from_package_json(&self, path: &Path) -> Result<PorterConfig> {
        let content = fs::read_to_string(path)?;
        let mut parsed: Value = serde_json::from_str(&content)
            .map_err(|e| ConfigError::invalid("package.json", format!("Invalid JSON: {e}")))?;

        match parsed.get_mut(PACKAGE_FIELD).map(Value::take) {
            Some(value) if !value.is_null() => PorterConfig::from_value(value),
            _ => Err(ConfigError::invalid(
                PACKAGE_FIELD,
                "Add a 'porter' field to your package.json",
            )),
        }
    }
}

/// Discover and load config for a project root, falling back to defaults.
pub fn discover(root: impl AsRef<Path>) -> Result<PorterConfig> {
    ConfigDiscovery::new(root).load_or_default()
}
