//! Output Materializer (spec.md §4.9, C9).
//!
//! Accumulates emitted text/variable nodes in source order and renders them to markdown
//! or `llm-xml`; routes `/output` to a file, stdout, or a `state://` side-channel event
//! collected by the host (spec.md §6).

use crate::error::RuntimeError;
use crate::host::FileSystem;
use crate::structured_value::StructuredValue;
use crate::value::Value;

/// Rendering mode for accumulated output (spec.md §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Markdown,
    LlmXml,
}

/// Destination for `/output expr to sink` (spec.md §4.9).
#[derive(Debug, Clone)]
pub enum Sink {
    Path(String),
    Stdout,
    State(String),
}

/// Parses a sink expression's text form into a [`Sink`] (spec.md §4.9:
/// "if `sink` is a relative/absolute path... if `stdout`... if `state://key`...").
#[must_use]
pub fn parse_sink(text: &str) -> Sink {
    if text == "stdout" {
        Sink::Stdout
    } else if let Some(key) = text.strip_prefix("state://") {
        Sink::State(key.to_string())
    } else {
        Sink::Path(text.to_string())
    }
}

/// A side-channel event produced by `/output expr to "state://key"`, returned to the
/// host alongside the rendered output (spec.md §4.9, §6 `stateWrites[]`).
#[derive(Debug, Clone)]
pub struct StateWrite {
    pub path: String,
    pub value: Value,
}

/// One node emitted by the evaluator in source order.
#[derive(Debug, Clone)]
struct EmittedItem {
    text: String,
    /// A semantic tag used to name the wrapping element in `llm-xml` mode (e.g. the
    /// directive kind that produced it: `"show"`, `"run"`).
    tag: Option<String>,
}

/// Collects emitted output in source order and renders it on demand.
#[derive(Debug, Default)]
pub struct Materializer {
    items: Vec<EmittedItem>,
    state_writes: Vec<StateWrite>,
}

impl Materializer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends emitted text (from `/show`, `/run` with no sink, or a bare expression
    /// statement) tagged with the directive kind that produced it.
    pub fn emit(&mut self, text: impl Into<String>, tag: impl Into<String>) {
        self.items.push(EmittedItem { text: text.into(), tag: Some(tag.into()) });
    }

    /// Renders everything emitted so far in the given format (spec.md §4.9).
    #[must_use]
    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Markdown => self.render_markdown(),
            OutputFormat::LlmXml => self.render_xml(),
        }
    }

    fn render_markdown(&self) -> String {
        let mut out = String::new();
        for item in &self.items {
            out.push_str(&item.text);
            if !item.text.ends_with('\n') {
                out.push('\n');
            }
        }
        normalize_blank_lines(&out)
    }

    fn render_xml(&self) -> String {
        let mut out = String::new();
        for item in &self.items {
            let tag = item.tag.as_deref().unwrap_or("output");
            out.push_str(&format!("<{tag}>\n{}\n</{tag}>\n", item.text.trim_end_matches('\n')));
        }
        out
    }

    /// `/output expr to sink [as format]` (spec.md §4.9).
    pub fn route_output(&mut self, sink: &Sink, value: &StructuredValue, fs: &dyn FileSystem) -> Result<(), RuntimeError> {
        match sink {
            Sink::Path(path) => fs.write_file(path, value.as_text()),
            Sink::Stdout => {
                self.emit(value.as_text(), "output");
                Ok(())
            }
            Sink::State(key) => {
                self.state_writes.push(StateWrite { path: key.clone(), value: value.as_data().clone() });
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn state_writes(&self) -> &[StateWrite] {
        &self.state_writes
    }

    #[must_use]
    pub fn into_state_writes(self) -> Vec<StateWrite> {
        self.state_writes
    }
}

/// Collapses runs of two or more blank lines to a single blank line (spec.md §4.9:
/// "normalize runs of blank lines to at most one").
fn normalize_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches('\n');
        if trimmed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
    }
    out
}
