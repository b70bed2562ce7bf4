//! Shared patterns and lookup tables.

use std::sync::LazyLock;

use regex::Regex;

/// `name[/version][/file]`, where name may be scoped.
pub static MODULE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((?:@[^/]+/)?[^/]+)(?:/(\d+\.\d+\.\d+[^/]*))?(?:/(.*))?$")
        .expect("module id pattern is valid")
});

/// Specifiers that point at remote or absolute URLs.
pub static URL_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:https?:)?/").expect("url pattern is valid"));

/// The `.{contenthash}` segment of a hashed output name.
pub static CONTENT_HASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.[0-9a-f]{8}(\.\w+)$").expect("hash pattern is valid"));

/// Extensions that are served as-is from the packet paths.
pub static STATIC_ASSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(?:css|gif|jpg|jpeg|js|png|svg|swf|ico)$").expect("asset pattern is valid")
});

/// Output format of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Format {
    Js,
    Css,
    Wasm,
}

impl Format {
    pub fn ext(self) -> &'static str {
        match self {
            Format::Js => ".js",
            Format::Css => ".css",
            Format::Wasm => ".wasm",
        }
    }

    /// Source extensions whose modules end up in a bundle of this format.
    pub fn members(self) -> &'static [&'static str] {
        match self {
            Format::Js => &[".js", ".jsx", ".ts", ".tsx", ".mjs", ".cjs", ".json"],
            Format::Css => &[".css", ".less", ".scss", ".sass"],
            Format::Wasm => &[".wasm"],
        }
    }

    pub fn includes(self, file: &str) -> bool {
        self.members().contains(&extname(file))
    }

    /// Infer the format from an entry file name.
    pub fn from_file(file: &str) -> Option<Format> {
        let ext = extname(file);
        [Format::Js, Format::Wasm, Format::Css]
            .into_iter()
            .find(|format| format.members().contains(&ext))
    }
}

/// Components of a module id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleIdParts<'a> {
    pub name: &'a str,
    pub version: Option<&'a str>,
    pub file: Option<&'a str>,
}

pub fn parse_module_id(id: &str) -> Option<ModuleIdParts<'_>> {
    let caps = MODULE_ID.captures(id)?;
    Some(ModuleIdParts {
        name: caps.get(1)?.as_str(),
        version: caps.get(2).map(|m| m.as_str()),
        file: caps.get(3).map(|m| m.as_str()),
    })
}

/// Extension of the last path segment including the dot, or `""`.
pub fn extname(file: &str) -> &str {
    let base = file.rsplit('/').next().unwrap_or(file);
    match base.rfind('.') {
        Some(0) | None => "",
        Some(pos) => &base[pos..],
    }
}

/// Replace the trailing `.ext` (if any) with `replacement`.
pub fn replace_ext(file: &str, replacement: &str) -> String {
    let ext = extname(file);
    let is_word = ext.len() > 1 && ext[1..].chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if is_word {
        format!("{}{replacement}", &file[..file.len() - ext.len()])
    } else {
        format!("{file}{replacement}")
    }
}
