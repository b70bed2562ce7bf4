//! Script minification with oxc.

use std::path::{Path, PathBuf};

use oxc_allocator::Allocator;
use oxc_ast::ast::Program;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_minifier::{CompressOptions, MangleOptions, Minifier, MinifierOptions};
use oxc_parser::{ParseOptions, Parser};
use oxc_span::SourceType;
use porter_config::MinifyConfig;
use serde_json::Value;

use super::TranspileError;

#[derive(Debug, Clone)]
pub struct ScriptOutput {
    pub code: String,
    pub map: Option<Value>,
}

/// Parse `code`, preferring module syntax and falling back to a sloppy
/// script. Top-level `return` is accepted in both, as CommonJS allows it.
pub(crate) fn parse_program<'a>(
    allocator: &'a Allocator,
    code: &'a str,
    path: &Path,
) -> Result<Program<'a>, String> {
    let source_type = SourceType::from_path(path).unwrap_or_default();
    let options = || ParseOptions {
        allow_return_outside_function: true,
        ..ParseOptions::default()
    };

    let ret = Parser::new(allocator, code, source_type.with_module(true))
        .with_options(options())
        .parse();
    if ret.errors.is_empty() && !ret.panicked {
        return Ok(ret.program);
    }

    let script = Parser::new(allocator, code, source_type.with_script(true))
        .with_options(options())
        .parse();
    if script.errors.is_empty() && !script.panicked {
        return Ok(script.program);
    }

    Err(parse_failure_message(&ret.errors))
}

/// First diagnostic of a failed parse, for error messages.
pub fn parse_failure_message<E: std::fmt::Display>(errors: &[E]) -> String {
    errors
        .first()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unrecoverable syntax error".to_string())
}

/// Compress and mangle one module body.
///
/// The source map (when requested) points at `source_name`, which is how the
/// bundle addresses the original file.
pub fn minify_script(
    code: &str,
    path: &Path,
    source_name: Option<&str>,
    options: &MinifyConfig,
) -> Result<ScriptOutput, TranspileError> {
    let allocator = Allocator::default();
    let mut program = parse_program(&allocator, code, path).map_err(|message| {
        TranspileError::Script {
            path: path.to_path_buf(),
            message,
        }
    })?;

    let minifier = Minifier::new(MinifierOptions {
        mangle: options.mangle.then(MangleOptions::default),
        compress: options.compress.then(CompressOptions::default),
    });
    let minified = minifier.minify(&allocator, &mut program);

    let ret = Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            source_map_path: source_name.map(PathBuf::from),
            ..CodegenOptions::default()
        })
        .with_scoping(minified.scoping)
        .build(&program);

    let map = match ret.map {
        Some(map) => Some(serde_json::from_str(&map.to_json_string()).map_err(|e| {
            TranspileError::Script {
                path: path.to_path_buf(),
                message: format!("invalid source map: {e}"),
            }
        })?),
        None => None,
    };

    Ok(ScriptOutput {
        code: ret.code,
        map,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minify(code: &str) -> ScriptOutput {
        minify_script(code, Path::new("a.js"), Some("porter:///a.js"), &MinifyConfig::default())
            .unwrap()
    }

    #[test]
    fn shrinks_commonjs_bodies() {
        let code = "var longName = require('./b');\nmodule.exports = function() {\n  return longName + 1;\n};\n";
        let out = minify(code);
        assert!(out.code.len() < code.len());
        assert!(out.code.contains("require(\"./b\")") || out.code.contains("require('./b')"));
    }

    #[test]
    fn accepts_module_syntax_and_top_level_return() {
        assert!(!minify("import a from './a';\nexport default a;\n").code.is_empty());
        assert!(!minify("if (typeof window === 'undefined') return;\nmodule.exports = 1;\n").code.is_empty());
    }

    #[test]
    fn emits_a_source_map_for_the_named_source() {
        let out = minify("module.exports = 1;\n");
        let map = out.map.unwrap();
        assert!(map["sources"][0].as_str().unwrap().ends_with("a.js"));
    }

    #[test]
    fn reports_syntax_errors() {
        let err = minify_script("var = ;", Path::new("broken.js"), None, &MinifyConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("broken.js"));
    }
}
