//! Source map assembly for concatenated bundles.

use oxc_sourcemap::{ConcatSourceMapBuilder, SourceMap, SourceMapBuilder};
use porter_config::SourceConfig;
use serde_json::Value;

use crate::constants::Format;

/// Scheme under which module sources are addressed inside bundle maps.
pub const SOURCE_SCHEME: &str = "porter:///";

/// One piece of a bundle.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub code: String,
    pub map: Option<Value>,
    /// Source name for the chunk, `None` for generated glue code.
    pub source: Option<String>,
}

impl Chunk {
    pub fn glue(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            map: None,
            source: None,
        }
    }

    pub fn mapped(code: impl Into<String>, map: Option<Value>, source: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            map,
            source: Some(source.into()),
        }
    }
}

/// `porter:///{path}` with leading `../` segments dropped.
pub fn source_name(relative: &str) -> String {
    let mut path = relative;
    while let Some(rest) = path.strip_prefix("../") {
        path = rest;
    }
    format!("{SOURCE_SCHEME}{path}")
}

fn line_count(code: &str) -> u32 {
    code.bytes().filter(|b| *b == b'\n').count() as u32 + 1
}

/// Map every line of `code` onto the same line of `source`.
fn identity_map(source: &str, code: &str) -> SourceMap {
    let mut builder = SourceMapBuilder::default();
    let source_id = builder.set_source_and_content(source, code);
    for line in 0..line_count(code) {
        builder.add_token(line, 0, line, 0, Some(source_id), None);
    }
    builder.into_sourcemap()
}

/// Parse a chunk's own map, renaming its single source to `source`.
fn chunk_map(map: &Value, source: &str) -> Option<SourceMap> {
    let mut map = map.clone();
    if let Some(sources) = map.get_mut("sources").and_then(Value::as_array_mut) {
        if sources.len() == 1 {
            sources[0] = Value::from(source);
        }
    }
    SourceMap::from_json_string(&map.to_string()).ok()
}

/// Join chunks with newlines and merge their maps.
pub fn concat(chunks: &[Chunk]) -> (String, Value) {
    let mut maps = Vec::with_capacity(chunks.len());
    let mut offset = 0;

    for chunk in chunks {
        if let Some(source) = &chunk.source {
            let map = chunk
                .map
                .as_ref()
                .and_then(|map| chunk_map(map, source))
                .unwrap_or_else(|| identity_map(source, &chunk.code));
            maps.push((map, offset));
        }
        offset += line_count(&chunk.code);
    }

    let refs: Vec<(&SourceMap, u32)> = maps.iter().map(|(map, offset)| (map, *offset)).collect();
    let merged = ConcatSourceMapBuilder::from_sourcemaps(&refs).into_sourcemap();
    let map = serde_json::from_str(&merged.to_json_string()).unwrap_or(Value::Null);

    let code = chunks
        .iter()
        .map(|chunk| chunk.code.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    (code, map)
}

/// Finalize a bundle map for publishing and append the mapping comment.
pub fn set_source_map(
    code: &[u8],
    map: &Value,
    format: Format,
    output_path: &str,
    source: &SourceConfig,
) -> (Vec<u8>, Value) {
    let mut map = map.clone();
    let file = output_path.rsplit('/').next().unwrap_or(output_path);

    if let Some(object) = map.as_object_mut() {
        object.insert("file".into(), Value::from(file));
        if !source.inline {
            object.insert("sourceRoot".into(), Value::from(source.root.as_str()));
            object.remove("sourcesContent");
            if let Some(Value::Array(sources)) = object.get_mut("sources") {
                for entry in sources.iter_mut() {
                    if let Some(stripped) = entry.as_str().and_then(|s| s.strip_prefix(SOURCE_SCHEME)) {
                        *entry = Value::from(stripped);
                    }
                }
            }
        }
    }

    let url = match &source.mapping_url {
        Some(prefix) => format!("{prefix}{output_path}.map"),
        None => format!("{file}.map"),
    };
    let comment = match format {
        Format::Css => format!("\n/*# sourceMappingURL={url} */"),
        _ => format!("\n//# sourceMappingURL={url}"),
    };

    let mut code = code.to_vec();
    code.extend_from_slice(comment.as_bytes());
    (code, map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_names_drop_parent_segments() {
        assert_eq!(source_name("components/a.js"), "porter:///components/a.js");
        assert_eq!(source_name("../../shared/b.js"), "porter:///shared/b.js");
    }

    #[test]
    fn concatenates_with_line_offsets() {
        let chunks = vec![
            Chunk::glue("porter.merge(porter.lock, {})"),
            Chunk::mapped("var a = 1;\nvar b = 2;", None, source_name("a.js")),
            Chunk::mapped("var c = 3;", None, source_name("c.js")),
        ];
        let (code, map) = concat(&chunks);
        assert_eq!(code.lines().count(), 4);
        assert!(code.ends_with("var c = 3;"));

        let sources: Vec<&str> = map["sources"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(sources, vec!["porter:///a.js", "porter:///c.js"]);
    }

    #[test]
    fn publishing_strips_the_scheme() {
        let (_, map) = concat(&[Chunk::mapped("x()", None, source_name("a.js"))]);
        let source = SourceConfig {
            root: "http://cdn.test/".into(),
            ..SourceConfig::default()
        };
        let (code, map) = set_source_map(b"x()", &map, Format::Js, "a.0123abcd.js", &source);

        assert_eq!(map["sources"][0], "a.js");
        assert_eq!(map["sourceRoot"], "http://cdn.test/");
        assert!(map.get("sourcesContent").is_none());
        assert!(String::from_utf8(code).unwrap().ends_with("//# sourceMappingURL=a.0123abcd.js.map"));
    }

    #[test]
    fn css_maps_use_block_comments() {
        let source = SourceConfig {
            mapping_url: Some("https://cdn.test/".into()),
            ..SourceConfig::default()
        };
        let (code, _) = set_source_map(b".a{}", &Value::Null, Format::Css, "app.0123abcd.css", &source);
        assert!(
            String::from_utf8(code)
                .unwrap()
                .ends_with("/*# sourceMappingURL=https://cdn.test/app.0123abcd.css.map */")
        );
    }
}
