//! Interpolator (spec.md §4.4, C4).
//!
//! Resolves `@var` and `<file.md>` placeholders inside templates and interpolating
//! strings into `StructuredValue`s, accumulating labels from every interpolated value
//! into the result's `.mx` (spec.md §4.4 step 5, §8 invariant 1).
//!
//! Variable resolution and field access themselves are evaluator (C3) concerns; this
//! module is injected an [`ExpressionResolver`] capability to perform them, keeping
//! `interpolator` free of a dependency on `evaluator` (same narrow-interface pattern as
//! [`crate::guard`] and [`crate::pipeline`]).

use crate::ast::Node;
use crate::env::Environment;
use crate::error::RuntimeError;
use crate::host::FileSystem;
use crate::structured_value::{Mx, StructuredValue};
use crate::value::Value;

/// Injected capability: evaluates a variable-reference/field-access node against an
/// environment. Implemented by the evaluator (C3).
pub trait ExpressionResolver {
    fn resolve(&mut self, node: &Node, env: &Environment) -> Result<StructuredValue, RuntimeError>;
}

/// A parsed file-load target (spec.md §3 `FileLoad`).
#[derive(Debug, Clone)]
pub struct FileLoadRequest<'a> {
    pub path: &'a str,
    pub section: Option<&'a str>,
    pub selector: Option<&'a str>,
}

/// Loads and interprets a file-load expression's target (spec.md §4.4 step 4).
///
/// - Reads the file's content through the injected [`FileSystem`].
/// - If the path's extension implies structured data (`.json`, `.yaml`/`.yml`), parses
///   it into `.data`; otherwise the content is kept as plain text.
/// - If a `selector` is given, extracts matching top-level definitions (left to the
///   caller to post-process; this function does the coarse load, `select_definitions`
///   below does the narrowing for text sources).
/// - If a `section` is given, extracts the matching markdown heading's content.
pub fn load_file(request: &FileLoadRequest<'_>, fs: &dyn FileSystem) -> Result<StructuredValue, RuntimeError> {
    let content = fs.read_file(request.path)?;
    let mut mx = Mx::new();
    mx.push_source(format!("file:{}", request.path));

    let mut value = if is_structured_extension(request.path, &[".json"]) {
        let data = Value::from_json_str(&content).map_err(|e| RuntimeError::field_access(format!("invalid JSON in '{}': {e}", request.path)))?;
        StructuredValue::from_value(data, mx)
    } else if is_structured_extension(request.path, &[".yaml", ".yml"]) {
        let data = Value::from_yaml_str(&content).map_err(|e| RuntimeError::field_access(format!("invalid YAML in '{}': {e}", request.path)))?;
        StructuredValue::from_value(data, mx)
    } else {
        StructuredValue::new(content.clone(), Value::String(content), mx)
    };

    if let Some(section) = request.section {
        let extracted = extract_markdown_section(value.as_text(), section)
            .ok_or_else(|| RuntimeError::field_access(format!("section '{section}' not found in '{}'", request.path)))?;
        let mut section_mx = value.mx.clone();
        section_mx.push_source(format!("section:{section}"));
        value = StructuredValue::new(extracted.clone(), Value::String(extracted), section_mx);
    }

    if let Some(selector) = request.selector {
        let extracted = select_definitions(value.as_text(), selector);
        let mut selector_mx = value.mx.clone();
        selector_mx.push_source(format!("selector:{selector}"));
        value = StructuredValue::new(extracted.clone(), Value::String(extracted), selector_mx);
    }

    Ok(value)
}

fn is_structured_extension(path: &str, extensions: &[&str]) -> bool {
    let lower = path.to_lowercase();
    extensions.iter().any(|ext| lower.ends_with(ext))
}

/// Extracts a markdown section's body by heading text, tolerant of heading level
/// (spec.md §4.4 step 4: "fuzzy match tolerant of heading level").
fn extract_markdown_section(text: &str, heading: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let heading = heading.trim();
    let mut start = None;
    let mut start_level = 0usize;
    for (i, line) in lines.iter().enumerate() {
        if let Some((level, title)) = parse_heading(line)
            && title.eq_ignore_ascii_case(heading)
        {
            start = Some(i);
            start_level = level;
            break;
        }
    }
    let start = start?;
    let mut end = lines.len();
    for (i, line) in lines.iter().enumerate().skip(start + 1) {
        if let Some((level, _)) = parse_heading(line)
            && level <= start_level
        {
            end = i;
            break;
        }
    }
    Some(lines[start + 1..end].join("\n").trim().to_string())
}

fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let title = trimmed[level..].trim();
    if title.is_empty() { None } else { Some((level, title)) }
}

/// Extracts top-level named definitions matching `selector` from source text
/// (spec.md §4.4 step 4: "extract matching top-level definitions (AST selectors)").
/// This crate does not parse the selected language; it performs the conservative,
/// line-anchored match the specification leaves to the implementer (§9 open question 3
/// applies the same "prefer fewer, well-tested" guidance here).
fn select_definitions(text: &str, selector: &str) -> String {
    text.lines()
        .skip_while(|line| !line.contains(selector))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Interpolates a sequence of template body nodes into a single `StructuredValue`
/// (spec.md §4.4 algorithm). `style` governs placeholder syntax: triple-colon templates
/// use `{{var}}` and treat bracketed tokens as XML rather than file loads — that
/// dispatch is the caller's responsibility (it routes `Node::Text` vs `Node::FileLoad`
/// differently per template style at parse time), so this function always walks the
/// already-disambiguated node sequence the same way.
pub fn interpolate(
    body: &[Node],
    env: &Environment,
    resolver: &mut dyn ExpressionResolver,
    fs: &dyn FileSystem,
) -> Result<StructuredValue, RuntimeError> {
    let mut text = String::new();
    let mut mx = Mx::new();

    for node in body {
        match node {
            Node::Text { content, .. } => text.push_str(content),
            Node::FileLoad { path_expr, section, selector, .. } => {
                let path_value = resolver.resolve(path_expr, env)?;
                let request = FileLoadRequest {
                    path: path_value.as_text(),
                    section: section.as_deref(),
                    selector: selector.as_deref(),
                };
                let loaded = load_file(&request, fs)?;
                text.push_str(loaded.as_text());
                mx.merge_from(&loaded.mx);
            }
            other => {
                let resolved = resolver.resolve(other, env)?;
                text.push_str(resolved.as_text());
                mx.merge_from(&resolved.mx);
            }
        }
    }

    mx.push_source("template");
    Ok(StructuredValue::new(text.clone(), Value::String(text), mx))
}

#[cfg(test)]
mod tests {
    use super::extract_markdown_section;

    #[test]
    fn section_extraction_is_level_tolerant() {
        let doc = "# Title\n\n## Details\nbody text\nmore\n\n## Next\nother";
        let extracted = extract_markdown_section(doc, "Details").unwrap();
        assert_eq!(extracted, "body text\nmore");
    }

    #[test]
    fn missing_section_returns_none() {
        let doc = "# Title\ncontent";
        assert!(extract_markdown_section(doc, "Nope").is_none());
    }
}
