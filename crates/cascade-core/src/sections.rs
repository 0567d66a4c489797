//! Section schemas and the markdown section parser.
//!
//! Generated documents are split into `## Heading` sections. A [`SectionSchema`]
//! names the sections an artifact carries and how each one renders: plain text
//! or a fenced code block tagged with a language. Fenced values that parse as
//! JSON are kept as structured values, everything else stays a string.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FlowError, Result};

/// Parsed section values, in document order.
pub type Sections = IndexMap<String, Value>;

/// How a section renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RenderKind {
    /// Plain markdown text under the heading.
    Text,
    /// A fenced block tagged with the given language (`python`, `mermaid`, ...).
    Fenced(String),
}

impl From<String> for RenderKind {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("text") || value.is_empty() {
            RenderKind::Text
        } else {
            RenderKind::Fenced(value)
        }
    }
}

impl From<RenderKind> for String {
    fn from(kind: RenderKind) -> Self {
        match kind {
            RenderKind::Text => "text".to_string(),
            RenderKind::Fenced(lang) => lang,
        }
    }
}

impl fmt::Display for RenderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderKind::Text => f.write_str("text"),
            RenderKind::Fenced(lang) => f.write_str(lang),
        }
    }
}

/// Ordered mapping from section name to its render kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionSchema {
    sections: IndexMap<String, RenderKind>,
}

impl SectionSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain text section.
    pub fn text(mut self, name: impl Into<String>) -> Self {
        self.sections.insert(name.into(), RenderKind::Text);
        self
    }

    /// Add a fenced section rendered with `lang`.
    pub fn fenced(mut self, name: impl Into<String>, lang: impl Into<String>) -> Self {
        self.sections.insert(name.into(), RenderKind::Fenced(lang.into()));
        self
    }

    /// Render kind of a section, if the schema declares it.
    pub fn get(&self, name: &str) -> Option<&RenderKind> {
        self.sections.get(name)
    }

    /// Iterate over sections in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &RenderKind)> {
        self.sections.iter()
    }

    /// Number of declared sections.
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// Maps raw text to named sections and back.
///
/// Implementations must be stable under re-serialization:
/// `serialize(parse(serialize(parse(x))))` equals `serialize(parse(x))`.
pub trait SectionParser: Send + Sync {
    /// Parse the sections declared in `schema` out of `text`.
    ///
    /// Sections absent from the text are absent from the result.
    fn parse(&self, text: &str, schema: &SectionSchema) -> Result<Sections>;

    /// Render `sections` as canonical text, in schema order.
    fn serialize(&self, sections: &Sections, schema: &SectionSchema) -> String;
}

/// Parser for `## Heading` documents with optional fenced bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownSections;

const FENCE: &str = "```";

impl MarkdownSections {
    /// Split a document into `(heading, body)` pairs. Headings inside fences are body text.
    fn split(text: &str) -> Vec<(String, String)> {
        let mut blocks: Vec<(String, String)> = Vec::new();
        let mut in_fence = false;

        for line in text.lines() {
            let trimmed = line.trim_start();
            if !in_fence {
                if let Some(heading) = trimmed.strip_prefix("## ") {
                    let title = heading.trim().trim_end_matches(':').trim().to_string();
                    blocks.push((title, String::new()));
                    continue;
                }
            }
            if trimmed.starts_with(FENCE) || (in_fence && trimmed.trim_end().ends_with(FENCE)) {
                in_fence = !in_fence;
            }
            if let Some((_, body)) = blocks.last_mut() {
                body.push_str(line);
                body.push('\n');
            }
        }

        blocks
    }

    fn parse_fenced(section: &str, body: &str) -> Result<Value> {
        let mut lines = body.lines().skip_while(|l| l.trim().is_empty());

        match lines.next() {
            Some(line) if line.trim_start().starts_with(FENCE) => {}
            // Lenient: an unfenced body is taken as-is.
            _ => return Ok(Self::value_from_code(body.trim())),
        }

        let mut inner: Vec<&str> = Vec::new();
        for line in lines {
            let t = line.trim_end();
            if t.trim_start() == FENCE {
                return Ok(Self::value_from_code(inner.join("\n").trim()));
            }
            if let Some(rest) = t.strip_suffix(FENCE) {
                inner.push(rest);
                return Ok(Self::value_from_code(inner.join("\n").trim()));
            }
            inner.push(line);
        }

        Err(FlowError::ParseFailed {
            section: section.to_string(),
            message: "unterminated code fence".to_string(),
        })
    }

    fn value_from_code(code: &str) -> Value {
        serde_json::from_str::<Value>(code).unwrap_or_else(|_| Value::String(code.to_string()))
    }

    fn value_to_text(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl SectionParser for MarkdownSections {
    fn parse(&self, text: &str, schema: &SectionSchema) -> Result<Sections> {
        let mut sections = Sections::new();

        for (title, body) in Self::split(text) {
            let Some(kind) = schema.get(&title) else {
                tracing::debug!("Ignoring undeclared section '{}'", title);
                continue;
            };
            let value = match kind {
                RenderKind::Text => Value::String(body.trim().to_string()),
                RenderKind::Fenced(_) => Self::parse_fenced(&title, &body)?,
            };
            sections.insert(title, value);
        }

        Ok(sections)
    }

    fn serialize(&self, sections: &Sections, schema: &SectionSchema) -> String {
        let mut out = String::new();

        for (name, kind) in schema.iter() {
            let Some(value) = sections.get(name) else {
                continue;
            };
            let body = Self::value_to_text(value);
            out.push_str("## ");
            out.push_str(name);
            out.push('\n');
            match kind {
                RenderKind::Text => {
                    out.push_str(body.trim());
                    out.push_str("\n\n");
                }
                RenderKind::Fenced(lang) => {
                    out.push_str(FENCE);
                    out.push_str(lang);
                    out.push('\n');
                    out.push_str(body.trim());
                    out.push('\n');
                    out.push_str(FENCE);
                    out.push_str("\n\n");
                }
            }
        }

        let trimmed = out.trim_end().len();
        out.truncate(trimmed);
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }
}
