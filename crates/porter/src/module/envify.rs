//! Inline `process.env.*` reads as literals.
//!
//! Runs before dependency extraction so that branches guarded by constant
//! environment checks can be pruned by the import scanner.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static PROCESS_ENV: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bprocess\.env\.([A-Za-z_$][\w$]*)\b").expect("process.env pattern is valid")
});

/// Replace `process.env.NAME` with the literal from `lookup`, leaving
/// assignments and unknown names alone.
pub fn envify<'a>(code: &str, lookup: impl Fn(&str) -> Option<&'a str>) -> String {
    PROCESS_ENV
        .replace_all(code, |caps: &Captures<'_>| {
            let whole = caps.get(0).map(|m| (m.as_str(), m.end())).unwrap_or(("", 0));
            let rest = code[whole.1..].trim_start();
            let is_assignment = rest.starts_with('=') && !rest.starts_with("==");
            match lookup(&caps[1]) {
                Some(literal) if !is_assignment => literal.to_string(),
                _ => whole.0.to_string(),
            }
        })
        .into_owned()
}

/// Literals for the variables every browser build knows about.
#[derive(Debug, Clone)]
pub struct Env {
    node_env: String,
}

impl Env {
    pub fn new(node_env: &str) -> Self {
        Self {
            node_env: serde_json::Value::from(node_env).to_string(),
        }
    }

    pub fn apply(&self, code: &str) -> String {
        envify(code, |name| match name {
            "NODE_ENV" => Some(self.node_env.as_str()),
            "BROWSER" => Some("true"),
            _ => None,
        })
    }
}
