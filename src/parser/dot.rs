//! Graphviz DOT parser
//!
//! A tokenizer followed by recursive descent over the DOT grammar. Subgraph
//! blocks push a scope holding the `node [..]`/`edge [..]` attributes set
//! inside them; those apply to entities created later in the same block.

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::{find_group_mut, ParsedSource};
use crate::builder::DiagramBuilder;
use crate::error::{ConvertError, Result, SourcePos};
use crate::geometry::{round2, DOT_PX_PER_PT};
use crate::types::{DashStyle, Edge, Group, Node, NodeShape, Orientation, StyleAttrs, StyleSheet};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Id { text: String, quoted: bool },
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Equals,
    Colon,
    EdgeOp(&'static str),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    offset: usize,
}

type AttrList = Vec<(String, String)>;

#[derive(Debug, Default)]
struct Scope {
    node_attrs: AttrList,
    edge_attrs: AttrList,
    group: Option<Group>,
    /// Every node mentioned in this block, nested blocks included.
    members: Vec<String>,
}

struct DotParser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    index: usize,
    directed: bool,
    scopes: Vec<Scope>,
    nodes: Vec<Node>,
    node_index: HashMap<String, usize>,
    edges: Vec<Edge>,
    groups: Vec<Group>,
    styles: StyleSheet,
    default_arrow: Option<bool>,
    title: Option<String>,
    orientation: Orientation,
    explicit_positions: BTreeMap<String, [f64; 2]>,
}

/// Parse a DOT graph
pub fn parse(text: &str) -> Result<ParsedSource> {
    let tokens = tokenize(text)?;
    let mut parser = DotParser {
        src: text,
        tokens,
        index: 0,
        directed: true,
        scopes: Vec::new(),
        nodes: Vec::new(),
        node_index: HashMap::new(),
        edges: Vec::new(),
        groups: Vec::new(),
        styles: StyleSheet::default(),
        default_arrow: None,
        title: None,
        orientation: Orientation::default(),
        explicit_positions: BTreeMap::new(),
    };
    parser.parse_graph()?;
    parser.finish()
}

fn syntax_at(src: &str, offset: usize, message: impl Into<String>) -> ConvertError {
    ConvertError::syntax(SourcePos::from_offset(src, offset), message)
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line_start = true;

    while i < src.len() {
        let c = bytes[i];
        if c == b'\n' {
            line_start = true;
            i += 1;
            continue;
        }
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        let at_line_start = std::mem::replace(&mut line_start, false);

        // Preprocessor output lines
        if c == b'#' && at_line_start {
            i = src[i..].find('\n').map_or(src.len(), |n| i + n);
            continue;
        }
        if src[i..].starts_with("//") {
            i = src[i..].find('\n').map_or(src.len(), |n| i + n);
            continue;
        }
        if src[i..].starts_with("/*") {
            let end = src[i + 2..]
                .find("*/")
                .ok_or_else(|| syntax_at(src, start, "unterminated comment"))?;
            i += 2 + end + 2;
            continue;
        }

        let simple = match c {
            b'{' => Some(Tok::LBrace),
            b'}' => Some(Tok::RBrace),
            b'[' => Some(Tok::LBracket),
            b']' => Some(Tok::RBracket),
            b';' => Some(Tok::Semi),
            b',' => Some(Tok::Comma),
            b'=' => Some(Tok::Equals),
            b':' => Some(Tok::Colon),
            _ => None,
        };
        if let Some(tok) = simple {
            tokens.push(Token { tok, offset: start });
            i += 1;
            continue;
        }

        if src[i..].starts_with("->") {
            tokens.push(Token { tok: Tok::EdgeOp("->"), offset: start });
            i += 2;
            continue;
        }
        if src[i..].starts_with("--") {
            tokens.push(Token { tok: Tok::EdgeOp("--"), offset: start });
            i += 2;
            continue;
        }

        if c == b'"' {
            let mut text = String::new();
            i = read_quoted(src, i, &mut text)?;
            // "a" + "b" concatenation
            loop {
                let rest = &src[i..];
                let trimmed = rest.trim_start();
                let Some(after_plus) = trimmed.strip_prefix('+') else {
                    break;
                };
                let after_plus_trimmed = after_plus.trim_start();
                if !after_plus_trimmed.starts_with('"') {
                    break;
                }
                let next = src.len() - after_plus_trimmed.len();
                i = read_quoted(src, next, &mut text)?;
            }
            tokens.push(Token {
                tok: Tok::Id { text, quoted: true },
                offset: start,
            });
            continue;
        }

        if c == b'<' {
            let mut depth = 0usize;
            let mut end = None;
            for (j, ch) in src[i..].char_indices() {
                match ch {
                    '<' => depth += 1,
                    '>' => {
                        depth -= 1;
                        if depth == 0 {
                            end = Some(i + j);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            let end = end.ok_or_else(|| syntax_at(src, start, "unterminated HTML string"))?;
            tokens.push(Token {
                tok: Tok::Id {
                    text: src[i + 1..end].to_string(),
                    quoted: true,
                },
                offset: start,
            });
            i = end + 1;
            continue;
        }

        let rest = &src[i..];
        let len = if c == b'-' || c == b'.' || c.is_ascii_digit() {
            numeral_len(rest)
        } else {
            rest.char_indices()
                .find(|(_, ch)| !(ch.is_alphanumeric() || *ch == '_' || !ch.is_ascii()))
                .map_or(rest.len(), |(j, _)| j)
        };
        if len == 0 {
            let ch = rest.chars().next().unwrap_or_default();
            return Err(syntax_at(src, start, format!("unexpected character '{}'", ch)));
        }
        tokens.push(Token {
            tok: Tok::Id {
                text: rest[..len].to_string(),
                quoted: false,
            },
            offset: start,
        });
        i += len;
    }
    Ok(tokens)
}

/// Read a double-quoted string starting at `start`, appending its content.
/// Only `\"` is unescaped here; other escapes are label syntax.
fn read_quoted(src: &str, start: usize, out: &mut String) -> Result<usize> {
    let mut chars = src[start + 1..].char_indices();
    while let Some((j, ch)) = chars.next() {
        match ch {
            '"' => return Ok(start + 1 + j + 1),
            '\\' => match chars.next() {
                Some((_, '"')) => out.push('"'),
                Some((_, '\n')) => {}
                Some((_, other)) => {
                    out.push('\\');
                    out.push(other);
                }
                None => break,
            },
            _ => out.push(ch),
        }
    }
    Err(syntax_at(src, start, "unterminated string"))
}

fn numeral_len(text: &str) -> usize {
    let mut len = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    for (i, ch) in text.char_indices() {
        match ch {
            '-' if i == 0 => {}
            '.' if !seen_dot => seen_dot = true,
            d if d.is_ascii_digit() => seen_digit = true,
            _ => break,
        }
        len = i + ch.len_utf8();
    }
    if seen_digit {
        len
    } else {
        0
    }
}

impl<'a> DotParser<'a> {
    fn error(&self, offset: usize, message: impl Into<String>) -> ConvertError {
        syntax_at(self.src, offset, message)
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.index).map(|t| &t.tok)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Tok> {
        self.tokens.get(self.index + ahead).map(|t| &t.tok)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.index)
            .map_or(self.src.len(), |t| t.offset)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Tok::Id { text, quoted: false }) if text.eq_ignore_ascii_case(keyword))
    }

    fn expect(&mut self, expected: Tok, what: &str) -> Result<()> {
        if self.peek() == Some(&expected) {
            self.index += 1;
            Ok(())
        } else {
            Err(self.error(self.offset(), format!("expected {}", what)))
        }
    }

    fn expect_id(&mut self, what: &str) -> Result<String> {
        match self.peek() {
            Some(Tok::Id { text, .. }) => {
                let text = text.clone();
                self.index += 1;
                Ok(text)
            }
            _ => Err(self.error(self.offset(), format!("expected {}", what))),
        }
    }

    fn at_top_level(&self) -> bool {
        self.scopes.len() <= 1
    }

    fn parse_graph(&mut self) -> Result<()> {
        if self.peek_keyword("strict") {
            self.index += 1;
        }
        if self.peek_keyword("digraph") {
            self.directed = true;
        } else if self.peek_keyword("graph") {
            self.directed = false;
        } else {
            return Err(self.error(self.offset(), "expected 'graph' or 'digraph'"));
        }
        self.index += 1;
        if matches!(self.peek(), Some(Tok::Id { .. })) {
            self.index += 1;
        }

        let open = self.offset();
        self.expect(Tok::LBrace, "'{'")?;
        self.scopes.push(Scope::default());
        self.parse_stmt_list(open)?;
        self.scopes.pop();

        if self.peek().is_some() {
            return Err(self.error(self.offset(), "unexpected content after the graph body"));
        }
        Ok(())
    }

    /// Statements up to and including the closing `}` of the block opened at `open`.
    fn parse_stmt_list(&mut self, open: usize) -> Result<()> {
        loop {
            match self.peek() {
                None => {
                    return Err(self.error(
                        self.src.len(),
                        format!(
                            "unterminated scope: '{{' at {} is never closed",
                            SourcePos::from_offset(self.src, open)
                        ),
                    ))
                }
                Some(Tok::RBrace) => {
                    self.index += 1;
                    return Ok(());
                }
                Some(Tok::Semi) => self.index += 1,
                _ => self.parse_stmt()?,
            }
        }
    }

    fn parse_stmt(&mut self) -> Result<()> {
        if self.peek_keyword("graph") && self.peek_at(1) == Some(&Tok::LBracket) {
            self.index += 1;
            let attrs = self.parse_attr_lists()?;
            self.apply_graph_attrs(&attrs);
            return Ok(());
        }
        if self.peek_keyword("node") && self.peek_at(1) == Some(&Tok::LBracket) {
            self.index += 1;
            let attrs = self.parse_attr_lists()?;
            if self.at_top_level() {
                let (style, _) = node_attrs(&attrs);
                self.styles.defaults.node.overlay(&style);
            } else if let Some(scope) = self.scopes.last_mut() {
                scope.node_attrs.extend(attrs);
            }
            return Ok(());
        }
        if self.peek_keyword("edge") && self.peek_at(1) == Some(&Tok::LBracket) {
            self.index += 1;
            let attrs = self.parse_attr_lists()?;
            if self.at_top_level() {
                let (style, arrow) = edge_attrs(&attrs);
                self.styles.defaults.edge.overlay(&style);
                if arrow.is_some() {
                    self.default_arrow = arrow;
                }
            } else if let Some(scope) = self.scopes.last_mut() {
                scope.edge_attrs.extend(attrs);
            }
            return Ok(());
        }

        // ID '=' ID
        if matches!(self.peek(), Some(Tok::Id { .. })) && self.peek_at(1) == Some(&Tok::Equals) {
            let key = self.expect_id("attribute name")?;
            self.index += 1;
            let value = self.expect_id("attribute value")?;
            self.apply_graph_attrs(&[(key, value)]);
            return Ok(());
        }

        let start = self.offset();
        let operand = if self.peek_keyword("subgraph") || self.peek() == Some(&Tok::LBrace) {
            self.parse_subgraph()?
        } else if matches!(self.peek(), Some(Tok::Id { .. })) {
            let id = self.parse_node_id()?;
            if !matches!(self.peek(), Some(Tok::EdgeOp(_))) {
                let attrs = self.parse_attr_lists()?;
                self.touch_node(&id);
                self.apply_node_attrs(&id, &attrs);
                return Ok(());
            }
            self.touch_node(&id);
            vec![id]
        } else {
            return Err(self.error(start, "unexpected token"));
        };

        if matches!(self.peek(), Some(Tok::EdgeOp(_))) {
            self.parse_edge_rhs(operand)?;
        }
        Ok(())
    }

    /// `->`/`--` chain after the first operand, then the shared attribute list.
    fn parse_edge_rhs(&mut self, first: Vec<String>) -> Result<()> {
        let mut operands = vec![first];
        while let Some(Tok::EdgeOp(op)) = self.peek() {
            let op = *op;
            let offset = self.offset();
            match (self.directed, op) {
                (true, "--") => return Err(self.error(offset, "'--' edge in a digraph; use '->'")),
                (false, "->") => return Err(self.error(offset, "'->' edge in an undirected graph; use '--'")),
                _ => {}
            }
            self.index += 1;
            let operand = if self.peek_keyword("subgraph") || self.peek() == Some(&Tok::LBrace) {
                self.parse_subgraph()?
            } else if matches!(self.peek(), Some(Tok::Id { .. })) {
                let id = self.parse_node_id()?;
                self.touch_node(&id);
                vec![id]
            } else {
                return Err(self.error(self.offset(), "edge has no target"));
            };
            operands.push(operand);
        }

        let stmt_attrs = self.parse_attr_lists()?;
        let mut attrs: AttrList = self
            .scopes
            .iter()
            .flat_map(|s| s.edge_attrs.iter().cloned())
            .collect();
        attrs.extend(stmt_attrs);
        let (style, arrow) = edge_attrs(&attrs);
        let label = attr(&attrs, "label").map(unescape_label);

        for pair in operands.windows(2) {
            for from in &pair[0] {
                for to in &pair[1] {
                    let mut edge = Edge::new(from.clone(), to.clone());
                    edge.arrow = arrow.or(self.default_arrow).unwrap_or(self.directed);
                    edge.label = label.clone();
                    edge.apply_style(&style);
                    self.edges.push(edge);
                }
            }
        }
        Ok(())
    }

    /// `subgraph ID? { ... }` or an anonymous `{ ... }`; returns the nodes it mentions.
    fn parse_subgraph(&mut self) -> Result<Vec<String>> {
        let mut name = None;
        if self.peek_keyword("subgraph") {
            self.index += 1;
            if let Some(Tok::Id { text, .. }) = self.peek() {
                name = Some(text.clone());
                self.index += 1;
            }
        }
        let open = self.offset();
        self.expect(Tok::LBrace, "'{' to open the subgraph")?;

        let group = name.map(|n| {
            let id = n.strip_prefix("cluster_").or_else(|| n.strip_prefix("cluster")).filter(|s| !s.is_empty());
            Group::new(id.unwrap_or(&n))
        });
        self.scopes.push(Scope {
            group,
            ..Default::default()
        });
        self.parse_stmt_list(open)?;
        let scope = self.scopes.pop().unwrap_or_default();

        if let Some(parent) = self.scopes.last_mut() {
            for member in &scope.members {
                if !parent.members.contains(member) {
                    parent.members.push(member.clone());
                }
            }
        }
        if let Some(group) = scope.group {
            self.finish_group(group);
        }
        Ok(scope.members)
    }

    fn finish_group(&mut self, group: Group) {
        if group.is_empty() {
            debug!(group = %group.id, "dropping empty subgraph");
            return;
        }
        // Reopened subgraphs merge into the first occurrence
        if let Some(existing) = find_group_mut(&mut self.groups, &group.id).or_else(|| {
            self.scopes
                .iter_mut()
                .filter_map(|s| s.group.as_mut())
                .find_map(|g| if g.id == group.id { Some(g) } else { find_group_mut(&mut g.groups, &group.id) })
        }) {
            for node in group.nodes {
                if !existing.nodes.contains(&node) {
                    existing.nodes.push(node);
                }
            }
            existing.groups.extend(group.groups);
            return;
        }
        match self.scopes.iter_mut().rev().find_map(|s| s.group.as_mut()) {
            Some(parent) => parent.groups.push(group),
            None => self.groups.push(group),
        }
    }

    /// `ID (':' ID (':' ID)?)?`; ports are dropped.
    fn parse_node_id(&mut self) -> Result<String> {
        let id = self.expect_id("node id")?;
        for _ in 0..2 {
            if self.peek() == Some(&Tok::Colon) {
                self.index += 1;
                self.expect_id("port name")?;
            }
        }
        Ok(id)
    }

    /// Zero or more `[a=b, c=d; e=f]` lists.
    fn parse_attr_lists(&mut self) -> Result<AttrList> {
        let mut attrs = Vec::new();
        while self.peek() == Some(&Tok::LBracket) {
            let open = self.offset();
            self.index += 1;
            loop {
                match self.peek() {
                    None => return Err(self.error(open, "unterminated attribute list")),
                    Some(Tok::RBracket) => {
                        self.index += 1;
                        break;
                    }
                    Some(Tok::Comma) | Some(Tok::Semi) => self.index += 1,
                    Some(Tok::Id { .. }) => {
                        let key = self.expect_id("attribute name")?;
                        let value = if self.peek() == Some(&Tok::Equals) {
                            self.index += 1;
                            self.expect_id("attribute value")?
                        } else {
                            "true".to_string()
                        };
                        attrs.push((key, value));
                    }
                    Some(_) => return Err(self.error(self.offset(), "malformed attribute list")),
                }
            }
        }
        Ok(attrs)
    }

    fn apply_graph_attrs(&mut self, attrs: &[(String, String)]) {
        let in_group = !self.at_top_level();
        for (key, value) in attrs {
            match (key.as_str(), in_group) {
                ("rankdir", false) => match Orientation::from_str(value) {
                    Some(o) => self.orientation = o,
                    None => debug!(rankdir = value.as_str(), "unknown rankdir"),
                },
                ("label", false) => self.title = Some(unescape_label(value)),
                ("label", true) => {
                    if let Some(group) = self.scopes.last_mut().and_then(|s| s.group.as_mut()) {
                        group.label = Some(unescape_label(value));
                    }
                }
                ("fillcolor" | "bgcolor", true) => {
                    if let Some(group) = self.scopes.last_mut().and_then(|s| s.group.as_mut()) {
                        group.fill = Some(value.clone());
                    }
                }
                _ => debug!(attribute = key.as_str(), "graph attribute ignored"),
            }
        }
    }

    /// Reference a node, creating it on first mention with the scope-local
    /// `node [..]` attributes, and record its membership.
    fn touch_node(&mut self, id: &str) {
        if !self.node_index.contains_key(id) {
            self.node_index.insert(id.to_string(), self.nodes.len());
            self.nodes.push(Node::new(id));
            let inherited: AttrList = self
                .scopes
                .iter()
                .flat_map(|s| s.node_attrs.iter().cloned())
                .collect();
            if !inherited.is_empty() {
                self.apply_node_attrs(id, &inherited);
            }
        }

        for scope in &mut self.scopes {
            if !scope.members.iter().any(|m| m == id) {
                scope.members.push(id.to_string());
            }
        }
        // anonymous blocks such as `{rank=same; ..}` belong to the enclosing cluster
        if let Some(group) = self.scopes.iter_mut().rev().find_map(|s| s.group.as_mut()) {
            if !group.nodes.iter().any(|m| m == id) {
                group.nodes.push(id.to_string());
            }
        }
    }

    fn apply_node_attrs(&mut self, id: &str, attrs: &[(String, String)]) {
        let Some(&idx) = self.node_index.get(id) else {
            return;
        };
        let (style, extras) = node_attrs(attrs);
        let node = &mut self.nodes[idx];
        node.apply_style(&style);
        if let Some(label) = extras.label {
            node.label = (label != node.id).then_some(label);
        }
        if extras.class.is_some() {
            node.class = extras.class;
        }
        if let Some(pos) = extras.pos {
            self.explicit_positions.insert(id.to_string(), pos);
        }
    }

    fn finish(mut self) -> Result<ParsedSource> {
        // Graphviz draws unshaped nodes as ellipses
        if self.styles.defaults.node.shape.is_none() {
            for node in &mut self.nodes {
                if node.shape.is_none() {
                    node.shape = Some(NodeShape::Ellipse);
                }
            }
        }
        let diagram = DiagramBuilder::new()
            .title(self.title)
            .orientation(self.orientation)
            .styles(self.styles)
            .nodes(self.nodes)
            .edges(self.edges)
            .groups(self.groups)
            .build()?;
        Ok(ParsedSource {
            diagram,
            explicit_positions: self.explicit_positions,
        })
    }
}

fn attr<'l>(attrs: &'l [(String, String)], key: &str) -> Option<&'l str> {
    attrs
        .iter()
        .rev()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

#[derive(Debug, Default)]
struct NodeExtras {
    label: Option<String>,
    class: Option<String>,
    pos: Option<[f64; 2]>,
}

fn node_attrs(attrs: &[(String, String)]) -> (StyleAttrs, NodeExtras) {
    let mut style = StyleAttrs::default();
    let mut extras = NodeExtras::default();
    let styles: Vec<String> = attr(attrs, "style")
        .map(|s| s.split(',').map(|p| p.trim().to_lowercase()).collect())
        .unwrap_or_default();

    if let Some(shape) = attr(attrs, "shape") {
        style.shape = Some(map_shape(shape));
    }
    if styles.iter().any(|s| s == "rounded") && matches!(style.shape, None | Some(NodeShape::Rect)) {
        style.shape = Some(NodeShape::Rounded);
    }
    for part in &styles {
        match part.as_str() {
            "dashed" => style.dash = Some(DashStyle::Dashed),
            "dotted" => style.dash = Some(DashStyle::Dotted),
            "solid" => style.dash = Some(DashStyle::Solid),
            _ => {}
        }
    }
    style.fill = attr(attrs, "fillcolor").map(first_color);
    style.stroke = attr(attrs, "color").map(first_color);
    style.stroke_width = attr(attrs, "penwidth").and_then(|w| w.trim().parse().ok());

    extras.label = attr(attrs, "label")
        .filter(|l| *l != "\\N")
        .map(unescape_label);
    extras.class = attr(attrs, "class").map(str::to_string);
    extras.pos = attr(attrs, "pos").and_then(parse_pos);
    (style, extras)
}

/// Style attributes of an edge plus the arrow flag, when the attributes decide it.
fn edge_attrs(attrs: &[(String, String)]) -> (StyleAttrs, Option<bool>) {
    let mut style = StyleAttrs {
        stroke: attr(attrs, "color").map(first_color),
        stroke_width: attr(attrs, "penwidth").and_then(|w| w.trim().parse().ok()),
        ..Default::default()
    };
    if let Some(value) = attr(attrs, "style") {
        for part in value.split(',').map(|p| p.trim().to_lowercase()) {
            match part.as_str() {
                "dashed" => style.dash = Some(DashStyle::Dashed),
                "dotted" => style.dash = Some(DashStyle::Dotted),
                "solid" => style.dash = Some(DashStyle::Solid),
                "bold" if style.stroke_width.is_none() => style.stroke_width = Some(2.0),
                _ => {}
            }
        }
    }

    let dir = attr(attrs, "dir").map(str::to_lowercase);
    let arrow = match dir.as_deref() {
        Some("none") => Some(false),
        Some("forward" | "back" | "both") => Some(true),
        _ if attr(attrs, "arrowhead").is_some_and(|a| a.eq_ignore_ascii_case("none")) => Some(false),
        _ => None,
    };
    (style, arrow)
}

fn map_shape(shape: &str) -> NodeShape {
    match shape.trim() {
        "box" | "rect" | "rectangle" | "square" | "record" | "Mrecord" | "Msquare" => NodeShape::Rect,
        "ellipse" | "oval" => NodeShape::Ellipse,
        "circle" | "point" => NodeShape::Circle,
        "doublecircle" => NodeShape::DoubleCircle,
        "diamond" | "Mdiamond" => NodeShape::Diamond,
        "hexagon" => NodeShape::Hexagon,
        "parallelogram" => NodeShape::Parallelogram,
        "trapezium" => NodeShape::Trapezoid,
        "cylinder" => NodeShape::Cylinder,
        "component" => NodeShape::Subroutine,
        "plaintext" | "plain" | "none" => NodeShape::Text,
        other => {
            debug!(shape = other, "graphviz shape has no IR counterpart; using rect");
            NodeShape::Rect
        }
    }
}

/// Graphviz colour lists (`red:blue`) keep their first entry.
fn first_color(value: &str) -> String {
    value.split(':').next().unwrap_or(value).trim().to_string()
}

/// `x,y` or `x,y!` in points, to canonical pixels.
fn parse_pos(value: &str) -> Option<[f64; 2]> {
    let value = value.trim().trim_end_matches('!');
    let (x, y) = value.split_once(',')?;
    let x: f64 = x.trim().parse().ok()?;
    let y: f64 = y.trim().parse().ok()?;
    Some([round2(x * DOT_PX_PER_PT), round2(y * DOT_PX_PER_PT)])
}

/// `\n`, `\l` and `\r` are line breaks; `\\` is a backslash.
fn unescape_label(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n' | 'l' | 'r') => {
                // a trailing justification escape ends the label
                if chars.peek().is_some() {
                    out.push('\n');
                }
            }
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Diagram;

    fn parse_ok(text: &str) -> Diagram {
        parse(text).unwrap().diagram
    }

    #[test]
    fn test_implicit_nodes_from_edges() {
        let d = parse_ok("digraph G { a -> b; b -> c }");
        let ids: Vec<&str> = d.nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(d.node("c").unwrap().shape, Some(NodeShape::Ellipse));
        assert!(d.edges().iter().all(|e| e.arrow));
    }

    #[test]
    fn test_undirected_graph() {
        let d = parse_ok("graph { a -- b -- c }");
        assert_eq!(d.edges().len(), 2);
        assert!(d.edges().iter().all(|e| !e.arrow));
    }

    #[test]
    fn test_edge_operator_must_match_graph_kind() {
        let err = parse("graph { a -> b }").unwrap_err();
        match err {
            ConvertError::Syntax { position, .. } => assert_eq!(position, SourcePos::new(1, 11)),
            other => panic!("unexpected error: {other}"),
        }
        assert!(parse("digraph { a -- b }").unwrap_err().is_syntax());
    }

    #[test]
    fn test_attributes_and_defaults() {
        let d = parse_ok(
            r##"digraph {
  rankdir=LR; label="Flow";
  node [shape=box, fillcolor="#eee"];
  edge [color="#333"];
  a [label="Start\nHere", shape=box, style="rounded,filled", color=red, penwidth=2];
  b [label="b"];
  a -> b [style=dashed, dir=none, label=go];
}"##,
        );
        assert_eq!(d.orientation(), Orientation::LR);
        assert_eq!(d.title(), Some("Flow"));
        assert_eq!(d.styles().defaults.node.shape, Some(NodeShape::Rect));
        assert_eq!(d.styles().defaults.node.fill.as_deref(), Some("#eee"));
        assert_eq!(d.styles().defaults.edge.stroke.as_deref(), Some("#333"));

        let a = d.node("a").unwrap();
        assert_eq!(a.label(), "Start\nHere");
        assert_eq!(a.shape, Some(NodeShape::Rounded));
        assert_eq!(a.stroke.as_deref(), Some("red"));
        assert_eq!(a.stroke_width, Some(2.0));
        assert_eq!(d.node("b").unwrap().label, None);
        assert_eq!(d.node("b").unwrap().shape, None);

        let edge = &d.edges()[0];
        assert!(!edge.arrow);
        assert_eq!(edge.dash, Some(DashStyle::Dashed));
        assert_eq!(edge.label.as_deref(), Some("go"));
    }

    #[test]
    fn test_clusters_and_scope_local_attributes() {
        let d = parse_ok(
            r#"digraph {
  subgraph cluster_api {
    label="API"; fillcolor=lightblue;
    node [shape=diamond];
    x; y;
    subgraph cluster_inner { z }
  }
  w;
  x -> w;
}"#,
        );
        let api = &d.groups()[0];
        assert_eq!(api.id, "api");
        assert_eq!(api.label.as_deref(), Some("API"));
        assert_eq!(api.fill.as_deref(), Some("lightblue"));
        assert_eq!(api.nodes, vec!["x", "y"]);
        assert_eq!(api.groups[0].id, "inner");
        assert_eq!(api.groups[0].nodes, vec!["z"]);
        assert_eq!(d.node("z").unwrap().shape, Some(NodeShape::Diamond));
        assert_eq!(d.node("w").unwrap().shape, Some(NodeShape::Ellipse));
    }

    #[test]
    fn test_rank_block_inside_cluster_keeps_members() {
        let d = parse_ok(r#"digraph { subgraph cluster_a { label="A"; {rank=same; x; y} z } }"#);
        assert_eq!(d.groups()[0].id, "a");
        assert_eq!(d.groups()[0].nodes, vec!["x", "y", "z"]);

        let d = parse_ok("digraph { subgraph cluster_a { {rank=same; x; y} } }");
        assert_eq!(d.groups().len(), 1);
        assert_eq!(d.groups()[0].nodes, vec!["x", "y"]);
    }

    #[test]
    fn test_subgraph_as_edge_operand() {
        let d = parse_ok("digraph { a -> {b c}; {d; e} -> f }");
        let pairs: Vec<(&str, &str)> = d.edges().iter().map(|e| (e.from.as_str(), e.to.as_str())).collect();
        assert_eq!(pairs, vec![("a", "b"), ("a", "c"), ("d", "f"), ("e", "f")]);
        assert!(d.groups().is_empty());
    }

    #[test]
    fn test_comments_quotes_ports_and_positions() {
        let parsed = parse(
            "# generated\n// line\ndigraph { /* block */ \"my node\":p1:n -> <b>; \"my node\" [pos=\"72,144!\"] }",
        )
        .unwrap();
        let d = &parsed.diagram;
        assert!(d.node("my node").is_some());
        assert!(d.node("b").is_some());
        assert_eq!(parsed.explicit_positions["my node"], [96.0, 192.0]);
    }

    #[test]
    fn test_unterminated_scope() {
        let err = parse("digraph { subgraph cluster_a { a -> b }").unwrap_err();
        assert!(err.to_string().contains("unterminated scope"));
        let err = parse("digraph { a [label=\"oops] }").unwrap_err();
        assert!(err.to_string().contains("unterminated string"));
    }
}
