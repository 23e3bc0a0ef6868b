//! Mermaid flowchart parser
//!
//! Line oriented: each statement is matched against the directive regexes
//! (`classDef`, `class`, `style`, `linkStyle`, `subgraph`, `end`) and falls
//! back to a node/edge chain. `subgraph`/`end` push and pop the scope stack.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

use super::{find_group_mut, ParsedSource};
use crate::builder::DiagramBuilder;
use crate::error::{ConvertError, Result, SourcePos};
use crate::types::{
    DashStyle, Edge, Group, Node, NodeShape, Orientation, StyleAttrs, StyleSheet,
};

lazy_static! {
    static ref RE_HEADER: Regex = Regex::new(r"(?i)^(graph|flowchart)(?:\s+(TD|TB|LR|BT|RL))?\s*$").unwrap();
    static ref RE_CLASSDEF: Regex = Regex::new(r"^classDef\s+(\w[\w,-]*)\s+(.+)$").unwrap();
    static ref RE_CLASS: Regex = Regex::new(r"^class\s+(\w[\w,\s-]*?)\s+([\w-]+)$").unwrap();
    static ref RE_STYLE: Regex = Regex::new(r"^style\s+(\w+(?:-\w+)*)\s+(.+)$").unwrap();
    static ref RE_CLICK: Regex = Regex::new(r#"^click\s+\w+(?:-\w+)*\s+(?:"|\w)"#).unwrap();
    static ref RE_LINKSTYLE: Regex = Regex::new(r"^linkStyle\s+(default|[\d,\s]+?)\s+(.+)$").unwrap();
    static ref RE_DIRECTION: Regex = Regex::new(r"(?i)^direction\s+(TD|TB|LR|BT|RL)$").unwrap();
    static ref RE_SUBGRAPH: Regex = Regex::new(r"^subgraph\s+(.+)$").unwrap();
    static ref RE_SUBGRAPH_BRACKET: Regex = Regex::new(r"^([\w-]+)\s*\[(.+)\]$").unwrap();
    static ref RE_FRONTMATTER_TITLE: Regex = Regex::new(r"^title:\s*(.+)$").unwrap();
    static ref RE_LINK_TEXT: Regex = Regex::new(
        r"^([<xo])?(--|-\.|==)\s+(.+?)\s*(-{2,}[>xo]?|\.+-[>xo]?|={2,}[>xo]?)"
    ).unwrap();
    static ref RE_LINK: Regex = Regex::new(r"^([<xo])?(-{2,}|-\.+-|={2,}|~{3,})([>xo])?").unwrap();
    static ref RE_PIPE_LABEL: Regex = Regex::new(r"^\|([^|]*)\|").unwrap();
    static ref RE_CLASS_SUFFIX: Regex = Regex::new(r"^:::([\w][\w-]*)").unwrap();
    static ref RE_ID: Regex = Regex::new(r"^\w+(?:-\w+)*").unwrap();
    static ref RE_BR: Regex = Regex::new(r"(?i)<br\s*/?>").unwrap();
}

/// Bracket pairs that declare a node shape, longest openers first
const SHAPE_DELIMITERS: &[(&str, &[(&str, NodeShape)])] = &[
    ("(((", &[(")))", NodeShape::DoubleCircle)]),
    ("([", &[("])", NodeShape::Stadium)]),
    ("((", &[("))", NodeShape::Circle)]),
    ("[[", &[("]]", NodeShape::Subroutine)]),
    ("[(", &[(")]", NodeShape::Cylinder)]),
    ("[/", &[("/]", NodeShape::Parallelogram), ("\\]", NodeShape::Trapezoid)]),
    ("[\\", &[("\\]", NodeShape::Parallelogram), ("/]", NodeShape::Trapezoid)]),
    ("{{", &[("}}", NodeShape::Hexagon)]),
    ("[", &[("]", NodeShape::Rect)]),
    ("(", &[(")", NodeShape::Rounded)]),
    ("{", &[("}", NodeShape::Diamond)]),
    // asymmetric flag, closest IR shape is a plain rectangle
    (">", &[("]", NodeShape::Rect)]),
];

/// One statement with its location in the source
#[derive(Debug, Clone, Copy)]
struct Statement<'a> {
    text: &'a str,
    line: usize,
    column: usize,
}

impl Statement<'_> {
    fn pos_at(&self, rest: &str) -> SourcePos {
        let offset = self.text.len() - rest.len();
        SourcePos::new(self.line, self.column + self.text[..offset].chars().count())
    }

    fn pos(&self) -> SourcePos {
        SourcePos::new(self.line, self.column)
    }
}

struct OpenSubgraph {
    group: Group,
    opened_at: SourcePos,
}

struct PendingLinkStyle {
    indices: Vec<usize>,
    attrs: StyleAttrs,
    pos: SourcePos,
}

#[derive(Default)]
struct FlowchartState {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    /// Nodes whose shape came from a bracketed declaration.
    declared: Vec<bool>,
    edges: Vec<Edge>,
    groups: Vec<Group>,
    group_ids: Vec<String>,
    styles: StyleSheet,
    link_styles: Vec<PendingLinkStyle>,
}

impl FlowchartState {
    /// Register a reference to `id`. The first bracketed declaration fixes the
    /// label and shape; later declarations with other brackets are ignored.
    fn declare(&mut self, id: &str, decl: Option<(String, NodeShape)>) -> usize {
        let idx = match self.index.get(id) {
            Some(&idx) => idx,
            None => {
                self.nodes.push(Node::new(id));
                self.declared.push(false);
                self.index.insert(id.to_string(), self.nodes.len() - 1);
                self.nodes.len() - 1
            }
        };
        if let Some((label, shape)) = decl {
            if !self.declared[idx] {
                let node = &mut self.nodes[idx];
                node.label = (label != id).then_some(label);
                node.shape = Some(shape);
                self.declared[idx] = true;
            } else if self.nodes[idx].shape != Some(shape) {
                debug!(node = id, ?shape, "node redeclared with another shape; keeping the first");
            }
        }
        idx
    }
}

/// Parse a Mermaid flowchart
pub fn parse(text: &str) -> Result<ParsedSource> {
    let (title, body, body_line) = split_frontmatter(text);
    let statements = collect_statements(body, body_line);

    let header = statements
        .first()
        .ok_or_else(|| ConvertError::syntax(SourcePos::new(1, 1), "empty mermaid diagram"))?;
    let caps = RE_HEADER.captures(header.text).ok_or_else(|| {
        ConvertError::syntax(
            header.pos(),
            format!(
                "invalid mermaid header \"{}\"; expected \"graph TD\", \"flowchart LR\", etc.",
                header.text
            ),
        )
    })?;
    let orientation = caps
        .get(2)
        .and_then(|m| Orientation::from_str(m.as_str()))
        .unwrap_or_default();

    let mut state = FlowchartState::default();
    let mut stack: Vec<OpenSubgraph> = Vec::new();

    for stmt in statements.iter().skip(1) {
        let line = stmt.text;

        if let Some(caps) = RE_CLASSDEF.captures(line) {
            let attrs = parse_css(&caps[2]);
            for name in caps[1].split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if name == "default" {
                    state.styles.defaults.node.overlay(&attrs);
                } else {
                    state
                        .styles
                        .classes
                        .entry(name.to_string())
                        .or_default()
                        .overlay(&attrs);
                }
            }
            continue;
        }

        if let Some(caps) = RE_CLASS.captures(line) {
            let class_name = caps[2].to_string();
            for id in caps[1].split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let idx = state.declare(id, None);
                state.nodes[idx].class = Some(class_name.clone());
            }
            continue;
        }

        if let Some(caps) = RE_STYLE.captures(line) {
            let attrs = parse_css(&caps[2]);
            let target = &caps[1];
            // `style` on a subgraph id colours the subgraph
            let group = find_group_mut(&mut state.groups, target).or_else(|| {
                stack.iter_mut().find_map(|open| {
                    if open.group.id == target {
                        Some(&mut open.group)
                    } else {
                        find_group_mut(&mut open.group.groups, target)
                    }
                })
            });
            if let Some(group) = group {
                if attrs.fill.is_some() {
                    group.fill = attrs.fill;
                }
                continue;
            }
            let idx = state.declare(target, None);
            state.nodes[idx].apply_style(&attrs);
            continue;
        }

        if let Some(caps) = RE_LINKSTYLE.captures(line) {
            let attrs = parse_css(&caps[2]);
            let target = caps[1].trim();
            if target == "default" {
                state.styles.defaults.edge.overlay(&attrs);
            } else {
                let mut indices = Vec::new();
                for token in target.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    let index = token.parse::<usize>().map_err(|_| {
                        ConvertError::syntax(stmt.pos(), format!("invalid linkStyle index '{}'", token))
                    })?;
                    indices.push(index);
                }
                state.link_styles.push(PendingLinkStyle {
                    indices,
                    attrs,
                    pos: stmt.pos(),
                });
            }
            continue;
        }

        if RE_DIRECTION.is_match(line) {
            if stack.is_empty() {
                debug!(statement = line, "top-level direction statement ignored");
            }
            continue;
        }

        // `subgraph --> B` is an edge from a node named subgraph
        if let Some(caps) = RE_SUBGRAPH.captures(line).filter(|c| !RE_LINK.is_match(&c[1])) {
            let group = subgraph_group(caps[1].trim());
            if state.group_ids.contains(&group.id) || stack.iter().any(|s| s.group.id == group.id) {
                return Err(ConvertError::syntax(
                    stmt.pos(),
                    format!("duplicate subgraph id '{}'", group.id),
                ));
            }
            stack.push(OpenSubgraph {
                group,
                opened_at: stmt.pos(),
            });
            continue;
        }

        if line == "end" {
            let completed = stack
                .pop()
                .ok_or_else(|| ConvertError::syntax(stmt.pos(), "unmatched 'end'"))?;
            state.group_ids.push(completed.group.id.clone());
            if completed.group.is_empty() {
                debug!(group = %completed.group.id, "dropping empty subgraph");
            } else if let Some(parent) = stack.last_mut() {
                parent.group.groups.push(completed.group);
            } else {
                state.groups.push(completed.group);
            }
            continue;
        }

        if RE_CLICK.is_match(line) || line.starts_with("accTitle") || line.starts_with("accDescr") {
            debug!(statement = line, "interaction/accessibility statement ignored");
            continue;
        }

        parse_edge_line(stmt, &mut state, &mut stack)?;
    }

    if let Some(open) = stack.last() {
        let end = statements.last().map(|s| s.pos()).unwrap_or_default();
        return Err(ConvertError::syntax(
            end,
            format!(
                "unterminated scope: subgraph '{}' opened at {} is never closed",
                open.group.id, open.opened_at
            ),
        ));
    }

    for pending in &state.link_styles {
        for &index in &pending.indices {
            let edge = state.edges.get_mut(index).ok_or_else(|| {
                ConvertError::syntax(
                    pending.pos,
                    format!("linkStyle references undefined edge {}", index),
                )
            })?;
            edge.apply_style(&pending.attrs);
        }
    }

    let diagram = DiagramBuilder::new()
        .title(title)
        .orientation(orientation)
        .styles(state.styles)
        .nodes(state.nodes)
        .edges(state.edges)
        .groups(state.groups)
        .build()?;
    Ok(ParsedSource::new(diagram))
}

/// Split YAML front matter off the text, returning its title plus the body and
/// the 1-based line the body starts on.
fn split_frontmatter(text: &str) -> (Option<String>, &str, usize) {
    let mut offset = 0;
    let mut line_no = 1;
    let mut lines = text.split_inclusive('\n');

    // Find opening ---
    let opening = loop {
        match lines.next() {
            Some(line) if line.trim().is_empty() => {
                offset += line.len();
                line_no += 1;
            }
            Some(line) if line.trim() == "---" => break Some(line),
            _ => break None,
        }
    };
    let Some(opening) = opening else {
        return (None, text, 1);
    };
    offset += opening.len();
    line_no += 1;

    let mut title = None;
    for line in lines {
        offset += line.len();
        line_no += 1;
        let trimmed = line.trim();
        if trimmed == "---" {
            return (title, &text[offset..], line_no);
        }
        if let Some(caps) = RE_FRONTMATTER_TITLE.captures(trimmed) {
            title = Some(unquote(caps[1].trim()).to_string());
        }
    }

    // No closing --- found, treat as having no front matter
    (None, text, 1)
}

/// Trimmed, comment-free statements; `;` separates statements on one line.
fn collect_statements(body: &str, first_line: usize) -> Vec<Statement<'_>> {
    let mut out = Vec::new();
    for (i, raw) in body.lines().enumerate() {
        let line_no = first_line + i;
        let indent = raw.len() - raw.trim_start().len();
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with("%%") {
            continue;
        }
        let base = raw[..indent].chars().count() + 1;
        for (offset, piece) in split_semicolons(trimmed) {
            let lead = piece.len() - piece.trim_start().len();
            let text = piece.trim();
            if text.is_empty() {
                continue;
            }
            out.push(Statement {
                text,
                line: line_no,
                column: base + trimmed[..offset + lead].chars().count(),
            });
        }
    }
    out
}

fn split_semicolons(line: &str) -> Vec<(usize, &str)> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quote = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quote = !in_quote,
            ';' if !in_quote => {
                parts.push((start, &line[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push((start, &line[start..]));
    parts
}

fn subgraph_group(rest: &str) -> Group {
    let (id, label) = if let Some(caps) = RE_SUBGRAPH_BRACKET.captures(rest) {
        (caps[1].to_string(), Some(clean_label(&caps[2])))
    } else if RE_ID.find(rest).is_some_and(|m| m.end() == rest.len()) {
        (rest.to_string(), None)
    } else {
        let label = clean_label(rest);
        let id: String = label
            .replace(' ', "_")
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        let id = if id.is_empty() { "subgraph".to_string() } else { id };
        (id, Some(label))
    };
    let mut group = Group::new(id);
    group.label = label;
    group
}

/// Parse CSS-like declarations (`fill:#f9f,stroke:#333,stroke-width:4px`).
pub(crate) fn parse_css(text: &str) -> StyleAttrs {
    let mut attrs = StyleAttrs::default();
    let mut depth = 0usize;
    let mut current = String::new();
    let mut entries = Vec::new();
    for c in text.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' | ';' if depth == 0 => entries.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    entries.push(current);

    for entry in entries {
        let Some((key, value)) = entry.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase().replace('_', "-");
        let value = value.trim().trim_end_matches("!important").trim();
        if value.is_empty() {
            continue;
        }
        match key.as_str() {
            "fill" | "background" | "background-color" => attrs.fill = Some(value.to_string()),
            "stroke" | "border-color" => attrs.stroke = Some(value.to_string()),
            "stroke-width" => match parse_length(value) {
                Some(width) => attrs.stroke_width = Some(width),
                None => debug!(value, "unparsable stroke-width"),
            },
            "stroke-dasharray" => attrs.dash = Some(parse_dasharray(value)),
            _ => debug!(key = key.as_str(), "css property not represented in the IR"),
        }
    }
    attrs
}

fn parse_length(value: &str) -> Option<f64> {
    value.trim().trim_end_matches("px").trim().parse::<f64>().ok()
}

fn parse_dasharray(value: &str) -> DashStyle {
    let first = value
        .split(|c: char| c == ',' || c.is_whitespace())
        .find(|s| !s.is_empty())
        .and_then(parse_length);
    match first {
        None => DashStyle::Solid,
        Some(v) if v <= 0.0 => DashStyle::Solid,
        Some(v) if v <= 2.0 => DashStyle::Dotted,
        Some(_) => DashStyle::Dashed,
    }
}

fn unquote(text: &str) -> &str {
    let text = text.trim();
    if text.len() >= 2
        && ((text.starts_with('"') && text.ends_with('"'))
            || (text.starts_with('\'') && text.ends_with('\'')))
    {
        &text[1..text.len() - 1]
    } else {
        text
    }
}

fn clean_label(raw: &str) -> String {
    let text = unquote(raw);
    let text = RE_BR.replace_all(text, "\n");
    text.replace("#quot;", "\"").replace("#124;", "|")
}

/// Parse a line that contains node definitions and edges
fn parse_edge_line(
    stmt: &Statement<'_>,
    state: &mut FlowchartState,
    stack: &mut [OpenSubgraph],
) -> Result<()> {
    let (first_ids, mut remaining) = consume_node_group(stmt, stmt.text, state, stack)?
        .ok_or_else(|| ConvertError::syntax(stmt.pos(), format!("unexpected statement '{}'", stmt.text)))?;
    let mut prev_ids = first_ids;

    // Parse chains of edges
    while !remaining.is_empty() {
        let link_pos = stmt.pos_at(remaining);
        let (template, rest) = consume_link(remaining).ok_or_else(|| {
            ConvertError::syntax(link_pos, format!("unexpected input '{}'", remaining))
        })?;
        remaining = rest.trim_start();

        let (target_ids, rest) = consume_node_group(stmt, remaining, state, stack)?
            .ok_or_else(|| ConvertError::syntax(stmt.pos_at(remaining), "edge has no target node"))?;
        remaining = rest;

        // Create edges for all combinations
        for source in &prev_ids {
            for target in &target_ids {
                let mut edge = template.clone();
                edge.from = state.nodes[*source].id.clone();
                edge.to = state.nodes[*target].id.clone();
                state.edges.push(edge);
            }
        }
        prev_ids = target_ids;
    }
    Ok(())
}

/// Match one link token (and an optional `|label|`), returning an edge
/// template without endpoints.
fn consume_link(input: &str) -> Option<(Edge, &str)> {
    let mut edge = Edge::new("", "");
    let rest;
    if let Some(caps) = RE_LINK_TEXT.captures(input) {
        let body = &caps[2];
        let close = &caps[4];
        edge.arrow = caps.get(1).is_some() || close.ends_with(['>', 'x', 'o']);
        apply_link_body(&mut edge, body);
        edge.label = Some(clean_label(&caps[3]));
        rest = &input[caps[0].len()..];
    } else if let Some(caps) = RE_LINK.captures(input) {
        let body = &caps[2];
        let mut matched = caps[0].len();
        let mut head = caps.get(3).map(|m| m.as_str());
        // `--o`/`--x` only count as heads when not the first letter of a node id
        if let Some(h) = head {
            if h != ">" && input[matched..].starts_with(|c: char| c.is_alphanumeric() || c == '_') {
                head = None;
                matched -= 1;
            }
        }
        edge.arrow = !body.starts_with('~') && (caps.get(1).is_some() || head.is_some());
        apply_link_body(&mut edge, body);
        let mut after = input[matched..].trim_start();
        if let Some(label) = RE_PIPE_LABEL.captures(after) {
            edge.label = Some(clean_label(&label[1]));
            after = &after[label[0].len()..];
        }
        rest = after;
    } else {
        return None;
    }
    Some((edge, rest))
}

/// `-.` reads as a dotted stroke, `==` as a thick one; other token detail is dropped.
fn apply_link_body(edge: &mut Edge, body: &str) {
    if body.contains('.') {
        edge.dash = Some(DashStyle::Dotted);
    }
    if body.starts_with('=') {
        edge.stroke_width = Some(3.0);
    }
}

/// Consume a node group (possibly with & separators)
fn consume_node_group<'a>(
    stmt: &Statement<'_>,
    input: &'a str,
    state: &mut FlowchartState,
    stack: &mut [OpenSubgraph],
) -> Result<Option<(Vec<usize>, &'a str)>> {
    let mut remaining = input.trim_start();
    let mut ids = Vec::new();

    loop {
        let Some((idx, rest)) = consume_single_node(stmt, remaining, state)? else {
            break;
        };
        ids.push(idx);
        remaining = rest.trim_start();

        // Check for class shorthand :::className
        if let Some(caps) = RE_CLASS_SUFFIX.captures(remaining) {
            state.nodes[idx].class = Some(caps[1].to_string());
            remaining = remaining[caps[0].len()..].trim_start();
        }

        // Track in subgraph
        if let Some(open) = stack.last_mut() {
            let id = &state.nodes[idx].id;
            if !open.group.nodes.contains(id) {
                open.group.nodes.push(id.clone());
            }
        }

        // Check for & separator
        if let Some(rest) = remaining.strip_prefix('&') {
            remaining = rest.trim_start();
            continue;
        }
        break;
    }

    if ids.is_empty() {
        Ok(None)
    } else {
        Ok(Some((ids, remaining)))
    }
}

/// Consume a single node reference, with an optional shape/label declaration
fn consume_single_node<'a>(
    stmt: &Statement<'_>,
    input: &'a str,
    state: &mut FlowchartState,
) -> Result<Option<(usize, &'a str)>> {
    let Some(id_match) = RE_ID.find(input) else {
        return Ok(None);
    };
    let id = id_match.as_str();
    let rest = &input[id_match.end()..];

    for (open, closers) in SHAPE_DELIMITERS {
        let Some(inner) = rest.strip_prefix(open) else {
            continue;
        };
        let (end, close, shape) = find_closer(inner, closers).ok_or_else(|| {
            ConvertError::syntax(stmt.pos_at(rest), format!("unterminated label for node '{}'", id))
        })?;
        let label = clean_label(inner[..end].trim());
        let idx = state.declare(id, Some((label, shape)));
        return Ok(Some((idx, &inner[end + close.len()..])));
    }

    Ok(Some((state.declare(id, None), rest)))
}

/// First closing delimiter outside double quotes.
fn find_closer(
    inner: &str,
    closers: &[(&'static str, NodeShape)],
) -> Option<(usize, &'static str, NodeShape)> {
    let mut in_quote = false;
    for (i, c) in inner.char_indices() {
        if c == '"' {
            in_quote = !in_quote;
            continue;
        }
        if in_quote {
            continue;
        }
        for (close, shape) in closers {
            if inner[i..].starts_with(close) {
                return Some((i, *close, *shape));
            }
        }
    }
    None
}
