//! The client-side module loader shipped with root bundles.

use serde_json::Value;

use crate::module::envify;

const LOADER_SOURCE: &str = include_str!("../assets/loader.js");

/// Loader source with `config` inlined as `process.env.loaderConfig`.
pub fn render(config: &Value, node_env: &str) -> String {
    let config = config.to_string();
    let node_env = Value::from(node_env).to_string();
    envify(LOADER_SOURCE, |name| match name {
        "loaderConfig" => Some(config.as_str()),
        "NODE_ENV" => Some(node_env.as_str()),
        "BROWSER" => Some("true"),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inlines_configuration() {
        let code = render(&json!({ "baseUrl": "/assets/", "timeout": 3000 }), "production");
        assert!(code.contains(r#"var config = {"baseUrl":"/assets/","timeout":3000}"#));
        assert!(code.contains(r#"NODE_ENV: "production""#));
        assert!(!code.contains("process.env.loaderConfig"));
    }
}
