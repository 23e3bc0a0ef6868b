//! Parsers for the three source grammars.
//!
//! Every parser returns a geometry-free [`Diagram`]. Style directives are
//! folded into the [`StyleSheet`](crate::types::StyleSheet) and per-entity
//! `class` references; resolution happens later, in the consumer.

pub mod dot;
pub mod mermaid;
pub mod tikz;

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ConvertError, Result, SourcePos};
use crate::types::{Diagram, FormatKind, Group};

/// A parsed diagram plus positions stated explicitly in the source, in
/// canonical pixel space. Explicit positions win over rendered geometry.
#[derive(Debug, Clone)]
pub struct ParsedSource {
    pub diagram: Diagram,
    pub explicit_positions: BTreeMap<String, [f64; 2]>,
}

impl ParsedSource {
    pub fn new(diagram: Diagram) -> Self {
        Self {
            diagram,
            explicit_positions: BTreeMap::new(),
        }
    }
}

/// Depth-first search of a group tree.
pub(crate) fn find_group_mut<'g>(groups: &'g mut [Group], id: &str) -> Option<&'g mut Group> {
    for group in groups {
        if group.id == id {
            return Some(group);
        }
        if let Some(found) = find_group_mut(&mut group.groups, id) {
            return Some(found);
        }
    }
    None
}

/// Parse `text` as `format` and return the diagram.
pub fn parse(text: &str, format: FormatKind) -> Result<Diagram> {
    parse_source(text, format).map(|parsed| parsed.diagram)
}

pub fn parse_source(text: &str, format: FormatKind) -> Result<ParsedSource> {
    match format {
        FormatKind::Mermaid => mermaid::parse(text),
        FormatKind::Tikz => tikz::parse(text),
        FormatKind::Dot => dot::parse(text),
    }
}

/// Pick a format from a file extension hint or, failing that, from the first
/// meaningful token of the text.
pub fn detect_format(text: &str, path_hint: Option<&Path>) -> Result<FormatKind> {
    if let Some(format) = path_hint
        .and_then(|p| p.extension())
        .and_then(|ext| ext.to_str())
        .and_then(FormatKind::from_extension)
    {
        return Ok(format);
    }

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with("%%")
            || trimmed.starts_with("//")
            || trimmed.starts_with('#')
        {
            continue;
        }
        if trimmed == "---" {
            return Ok(FormatKind::Mermaid);
        }
        if trimmed.starts_with('\\') {
            return Ok(FormatKind::Tikz);
        }
        if trimmed.starts_with('%') || trimmed.starts_with("/*") {
            continue;
        }

        let mut words = trimmed.split_whitespace();
        let first = words.next().unwrap_or_default().to_lowercase();
        let second = words.next().unwrap_or_default();
        match first.as_str() {
            "flowchart" => return Ok(FormatKind::Mermaid),
            "graph" if crate::types::Orientation::from_str(second).is_some() => {
                return Ok(FormatKind::Mermaid)
            }
            "graph" | "digraph" | "strict" => return Ok(FormatKind::Dot),
            _ if first.starts_with("digraph") || first.starts_with("graph{") => {
                return Ok(FormatKind::Dot)
            }
            _ => break,
        }
    }

    Err(ConvertError::syntax(SourcePos::new(1, 1), "unrecognized format"))
}
