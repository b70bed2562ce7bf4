//! Stylesheet processing with lightningcss.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use lightningcss::css_modules::{self, CssModuleReference};
use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, StyleSheet};
use regex::Regex;

use super::TranspileError;

/// `@import` rules; their targets are bundled as separate members.
static AT_IMPORT_RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*@import\s+(?:url\([^)]*\)|"[^"]*"|'[^']*')[^;]*;[ \t]*\r?\n?"#)
        .expect("@import rule pattern is valid")
});

#[derive(Debug, Clone)]
pub struct StyleOutput {
    pub code: String,
    /// Original class name to scoped class names, for CSS modules.
    pub exports: Option<BTreeMap<String, String>>,
}

/// Normalize one stylesheet: drop `@import`s, scope class names when
/// `scoped`, and minify on request.
pub fn transform_style(
    code: &str,
    path: &Path,
    source_name: &str,
    scoped: bool,
    minify: bool,
) -> Result<StyleOutput, TranspileError> {
    let source = AT_IMPORT_RULE.replace_all(code, "");
    let error = |stage: &str, e: &dyn std::fmt::Debug| TranspileError::Style {
        path: path.to_path_buf(),
        message: format!("{stage}: {e:?}"),
    };

    let mut stylesheet = StyleSheet::parse(
        &source,
        ParserOptions {
            filename: source_name.to_string(),
            css_modules: scoped.then(css_modules::Config::default),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| error("parse", &e))?;

    if minify {
        stylesheet
            .minify(MinifyOptions::default())
            .map_err(|e| error("minify", &e))?;
    }

    let result = stylesheet
        .to_css(PrinterOptions {
            minify,
            ..PrinterOptions::default()
        })
        .map_err(|e| error("print", &e))?;

    let exports = result.exports.map(|exports| {
        exports
            .into_iter()
            .map(|(name, export)| {
                let mut classes = vec![export.name];
                for reference in export.composes {
                    match reference {
                        CssModuleReference::Local { name }
                        | CssModuleReference::Global { name }
                        | CssModuleReference::Dependency { name, .. } => classes.push(name),
                    }
                }
                (name, classes.join(" "))
            })
            .collect()
    });

    Ok(StyleOutput {
        code: result.code,
        exports,
    })
}
