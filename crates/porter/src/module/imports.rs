//! Dependency extraction.
//!
//! Scripts are scanned with an oxc visitor that understands CommonJS
//! `require`, ESM import/export syntax and dynamic `import()`. Branches whose
//! condition is a compile-time constant are pruned, so code guarded by an
//! inlined `process.env.NODE_ENV` check does not drag in the dead branch's
//! dependencies.

use std::path::Path;
use std::sync::LazyLock;

use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_ast_visit::{Visit, walk};
use regex::Regex;

use crate::error::{PorterError, Result};
use crate::transpile::script::parse_program;

/// Specifiers found in one module, in source order and deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportScan {
    pub imports: Vec<String>,
    pub dynamic_imports: Vec<String>,
    /// Whether ESM import/export syntax was seen.
    pub esm: bool,
}

impl ImportScan {
    fn add_static(&mut self, specifier: &str) {
        if !self.imports.iter().any(|s| s == specifier) {
            self.imports.push(specifier.to_string());
        }
    }

    fn add_dynamic(&mut self, specifier: &str) {
        if !self.dynamic_imports.iter().any(|s| s == specifier) {
            self.dynamic_imports.push(specifier.to_string());
        }
    }
}

/// Scan a script for its dependencies.
pub fn scan_script(code: &str, path: &Path) -> Result<ImportScan> {
    let allocator = Allocator::default();
    let program = parse_program(&allocator, code, path)
        .map_err(|message| PorterError::parse_failure(path, message))?;

    let mut scanner = ImportScanner::default();
    scanner.visit_program(&program);
    Ok(scanner.scan)
}

#[derive(Default)]
struct ImportScanner {
    scan: ImportScan,
}

impl<'a> Visit<'a> for ImportScanner {
    fn visit_import_declaration(&mut self, decl: &ImportDeclaration<'a>) {
        self.scan.esm = true;
        if !decl.import_kind.is_type() {
            self.scan.add_static(decl.source.value.as_str());
        }
    }

    fn visit_export_named_declaration(&mut self, decl: &ExportNamedDeclaration<'a>) {
        self.scan.esm = true;
        if let Some(source) = &decl.source {
            if !decl.export_kind.is_type() {
                self.scan.add_static(source.value.as_str());
            }
        }
        walk::walk_export_named_declaration(self, decl);
    }

    fn visit_export_all_declaration(&mut self, decl: &ExportAllDeclaration<'a>) {
        self.scan.esm = true;
        if !decl.export_kind.is_type() {
            self.scan.add_static(decl.source.value.as_str());
        }
    }

    fn visit_export_default_declaration(&mut self, decl: &ExportDefaultDeclaration<'a>) {
        self.scan.esm = true;
        walk::walk_export_default_declaration(self, decl);
    }

    fn visit_import_expression(&mut self, expr: &ImportExpression<'a>) {
        if let Expression::StringLiteral(source) = &expr.source {
            self.scan.add_dynamic(source.value.as_str());
        }
        walk::walk_import_expression(self, expr);
    }

    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        match require_kind(&call.callee) {
            Some(RequireKind::Static) => {
                if let Some(specifier) = first_string_argument(call) {
                    self.scan.add_static(specifier);
                }
            }
            Some(RequireKind::Async) => {
                if let Some(specifier) = first_string_argument(call) {
                    self.scan.add_dynamic(specifier);
                }
            }
            None => {}
        }
        walk::walk_call_expression(self, call);
    }

    fn visit_if_statement(&mut self, stmt: &IfStatement<'a>) {
        match eval_condition(&stmt.test) {
            Some(true) => self.visit_statement(&stmt.consequent),
            Some(false) => {
                if let Some(alternate) = &stmt.alternate {
                    self.visit_statement(alternate);
                }
            }
            None => walk::walk_if_statement(self, stmt),
        }
    }

    fn visit_conditional_expression(&mut self, expr: &ConditionalExpression<'a>) {
        match eval_condition(&expr.test) {
            Some(true) => self.visit_expression(&expr.consequent),
            Some(false) => self.visit_expression(&expr.alternate),
            None => walk::walk_conditional_expression(self, expr),
        }
    }
}

enum RequireKind {
    Static,
    Async,
}

/// `require(...)` and `require.async(...)`; `foo.require(...)` is not ours.
fn require_kind(callee: &Expression<'_>) -> Option<RequireKind> {
    match callee {
        Expression::Identifier(ident) if ident.name.as_str() == "require" => Some(RequireKind::Static),
        Expression::StaticMemberExpression(member) => match &member.object {
            Expression::Identifier(ident)
                if ident.name.as_str() == "require" && member.property.name.as_str() == "async" =>
            {
                Some(RequireKind::Async)
            }
            _ => None,
        },
        _ => None,
    }
}

fn first_string_argument<'a>(call: &'a CallExpression<'_>) -> Option<&'a str> {
    match call.arguments.first()? {
        Argument::StringLiteral(literal) => Some(literal.value.as_str()),
        _ => None,
    }
}

#[derive(Debug, PartialEq)]
enum Constant<'a> {
    Bool(bool),
    Str(&'a str),
}

fn constant<'a>(expr: &'a Expression<'_>) -> Option<Constant<'a>> {
    match expr {
        Expression::BooleanLiteral(literal) => Some(Constant::Bool(literal.value)),
        Expression::StringLiteral(literal) => Some(Constant::Str(literal.value.as_str())),
        Expression::ParenthesizedExpression(paren) => constant(&paren.expression),
        _ => eval_condition(expr).map(Constant::Bool),
    }
}

/// Evaluate conditions built from boolean literals, negation, parentheses,
/// `&&`/`||` and (in)equality between literals. Anything else is unknown.
fn eval_condition(expr: &Expression<'_>) -> Option<bool> {
    match expr {
        Expression::BooleanLiteral(literal) => Some(literal.value),
        Expression::ParenthesizedExpression(paren) => eval_condition(&paren.expression),
        Expression::UnaryExpression(unary) if unary.operator == UnaryOperator::LogicalNot => {
            eval_condition(&unary.argument).map(|value| !value)
        }
        Expression::LogicalExpression(logical) => {
            let left = eval_condition(&logical.left)?;
            let right = eval_condition(&logical.right)?;
            match logical.operator {
                LogicalOperator::And => Some(left && right),
                LogicalOperator::Or => Some(left || right),
                LogicalOperator::Coalesce => None,
            }
        }
        Expression::BinaryExpression(binary) => {
            let equal = match binary.operator {
                BinaryOperator::Equality | BinaryOperator::StrictEquality => true,
                BinaryOperator::Inequality | BinaryOperator::StrictInequality => false,
                _ => return None,
            };
            let left = constant(&binary.left)?;
            let right = constant(&binary.right)?;
            Some((left == right) == equal)
        }
        _ => None,
    }
}

static AT_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*@import\s+(?:url\(\s*)?(?:"([^"]+)"|'([^']+)'|([^'"\s;)]+))"#,
    )
    .expect("@import pattern is valid")
});

/// Targets of `@import` rules, in cascade order.
pub fn scan_style(code: &str) -> ImportScan {
    let mut scan = ImportScan::default();
    for caps in AT_IMPORT.captures_iter(code) {
        if let Some(target) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) {
            scan.add_static(target.as_str());
        }
    }
    scan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(code: &str) -> ImportScan {
        scan_script(code, Path::new("index.js")).unwrap()
    }

    #[test]
    fn collects_commonjs_requires() {
        let result = scan(
            "const a = require('./a');\nconst b = require(\"b/lib/c\");\nrequire('./a');\nfoo.require('ignored');\n",
        );
        assert_eq!(result.imports, vec!["./a", "b/lib/c"]);
        assert!(result.dynamic_imports.is_empty());
        assert!(!result.esm);
    }

    #[test]
    fn collects_esm_syntax() {
        let result = scan(
            "import React from 'react';\nimport './style.css';\nexport { a } from './a';\nexport * from './b';\nconst lazy = () => import('./lazy');\n",
        );
        assert_eq!(result.imports, vec!["react", "./style.css", "./a", "./b"]);
        assert_eq!(result.dynamic_imports, vec!["./lazy"]);
        assert!(result.esm);
    }

    #[test]
    fn ignores_type_only_imports() {
        let result = scan_script(
            "import type { Props } from './types';\nimport { render } from './render';\n",
            Path::new("view.ts"),
        )
        .unwrap();
        assert_eq!(result.imports, vec!["./render"]);
    }

    #[test]
    fn async_require_is_dynamic() {
        let result = scan("require.async('./chart', function(chart) {});\n");
        assert!(result.imports.is_empty());
        assert_eq!(result.dynamic_imports, vec!["./chart"]);
    }

    #[test]
    fn prunes_constant_branches() {
        let result = scan(
            r#"
            if ("production" === 'production') {
              module.exports = require('./prod');
            } else {
              module.exports = require('./dev');
            }
            if (!true) require('./never');
            const x = "development" !== 'production' ? require('./debug') : null;
            if (typeof window !== 'undefined') require('./browser');
            "#,
        );
        assert_eq!(result.imports, vec!["./prod", "./debug", "./browser"]);
    }

    #[test]
    fn reports_syntax_errors() {
        let err = scan_script("require('./a'", Path::new("broken.js")).unwrap_err();
        assert!(matches!(err, PorterError::ParseFailure { .. }));
    }

    #[test]
    fn matches_style_imports() {
        let result = scan_style(
            "@import \"./base.css\";\n@import url(theme.css);\n  @import 'reset.css' screen;\n.a { color: red }\n",
        );
        assert_eq!(result.imports, vec!["./base.css", "theme.css", "reset.css"]);
    }
}
