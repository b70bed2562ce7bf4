//! Tests for default values.

use porter_config::{MinifyConfig, PorterConfig, Remap, SourceConfig};
use serde_json::json;
use std::path::PathBuf;

#[test]
fn porter_config_defaults() {
    let config = PorterConfig::default();
    assert_eq!(config.paths, vec![PathBuf::from("components")]);
    assert_eq!(config.output.path, PathBuf::from("public"));
    assert!(config.cache.path.is_none());
    assert_eq!(config.base_url, "/");
    assert_eq!(config.timeout, 30_000);
    assert_eq!(config.env.node_env, "development");
    assert!(config.lock.is_none());
    assert_eq!(
        config.resolve.extensions,
        vec!["*", ".js", ".jsx", ".ts", ".tsx", ".d.ts", ".json", ".css"]
    );
}

#[test]
fn empty_object_matches_defaults() {
    let config = PorterConfig::from_value(json!({})).unwrap();
    assert_eq!(config, PorterConfig::default());
}

#[test]
fn source_defaults() {
    let source = SourceConfig::default();
    assert!(!source.serve);
    assert!(!source.inline);
    assert_eq!(source.root, "http://localhost/");
    assert!(source.mapping_url.is_none());
}

#[test]
fn minify_defaults_enable_everything() {
    assert_eq!(
        MinifyConfig::default(),
        MinifyConfig {
            mangle: true,
            compress: true
        }
    );
}

#[test]
fn builtin_fallback_is_present_without_user_entries() {
    let config = PorterConfig::default();
    let fallback = config.resolve.effective_fallback();
    assert_eq!(fallback["fs"], Remap::Flag(false));
    assert_eq!(fallback["stream"], Remap::path("readable-stream"));
}

#[test]
fn camel_case_keys_are_accepted() {
    let config = PorterConfig::from_value(json!({
        "baseUrl": "/assets/",
        "source": { "mappingUrl": "https://cdn.example.com/" },
        "env": { "nodeEnv": "production" }
    }))
    .unwrap();
    assert_eq!(config.base_url, "/assets/");
    assert_eq!(
        config.source.mapping_url.as_deref(),
        Some("https://cdn.example.com/")
    );
    assert_eq!(config.env.node_env, "production");
}
