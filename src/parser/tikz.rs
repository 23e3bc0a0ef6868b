//! TikZ parser
//!
//! Scans the LaTeX text command by command. `\begin`/`\end` maintain an
//! environment stack; drawing commands are cut at the `;` that ends them and
//! tokenized into option lists, parenthesised points, and brace groups.
//! Coordinates declared with `\coordinate` live in their own table and never
//! become nodes.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::ParsedSource;
use crate::builder::DiagramBuilder;
use crate::error::{ConvertError, Result, SourcePos};
use crate::geometry::{round2, TIKZ_PX_PER_CM, TIKZ_PX_PER_PT};
use crate::types::{DashStyle, Edge, Group, Node, NodeShape, Orientation, StyleAttrs, StyleSheet};

lazy_static! {
    static ref RE_DIMENSION: Regex = Regex::new(r"^\s*([-+]?(?:\d+\.?\d*|\.\d+))\s*(cm|mm|pt|in|bp)?\s*$").unwrap();
    static ref RE_ARROW_SPEC: Regex = Regex::new(
        r"^((?:\{[^}]*\}|\[[^\]]*\]|[^=\s{}\[\]-])*)-((?:\{[^}]*\}|\[[^\]]*\]|[^=\s{}\[\]-])*)$"
    ).unwrap();
    static ref RE_RELATIVE: Regex = Regex::new(r"^(right|left|above|below)(?:\s+of\s*=|\s*=)").unwrap();
    static ref RE_RGB255: Regex = Regex::new(
        r"^\{?\s*rgb\s*,\s*255\s*:\s*red\s*,\s*(\d+)\s*;\s*green\s*,\s*(\d+)\s*;\s*blue\s*,\s*(\d+)\s*\}?$"
    ).unwrap();
    static ref RE_HEX_NAME: Regex = Regex::new(r"^hex([0-9A-Fa-f]{3}|[0-9A-Fa-f]{6})$").unwrap();
}

const DRAW_COMMANDS: &[&str] = &["draw", "path", "filldraw", "fill", "shade", "shadedraw"];

const COLOR_NAMES: &[&str] = &[
    "red", "green", "blue", "cyan", "magenta", "yellow", "black", "gray", "white", "darkgray",
    "lightgray", "brown", "lime", "olive", "orange", "pink", "purple", "teal", "violet",
];

/// Path operations whose parenthesised argument is a size or a literal point.
const PATH_SHAPE_OPERATIONS: &[&str] = &[
    "rectangle", "circle", "ellipse", "arc", "grid", "parabola", "sin", "cos", "++", "+",
];

/// Lexical pieces of one drawing statement
#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Options(&'a str),
    Point(&'a str),
    Text(&'a str),
    Word(&'a str),
}

#[derive(Debug)]
struct Spanned<'a> {
    token: Token<'a>,
    offset: usize,
}

/// What a point in a path refers to
#[derive(Debug, Clone, PartialEq)]
enum PointRef {
    Node(String),
    Place(Option<[f64; 2]>),
}

#[derive(Debug)]
struct Environment {
    name: String,
    opened_at: usize,
    group: Option<Group>,
    arrow: Option<bool>,
}

/// Which entity an option list is applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionTarget {
    Node,
    Edge,
    Style,
}

/// Combined effect of one option list
#[derive(Debug, Default)]
struct OptionEffects {
    attrs: StyleAttrs,
    class: Option<String>,
    arrow: Option<bool>,
    relative: Option<Orientation>,
    bounding_box: Option<String>,
    shape: ShapeFlags,
}

#[derive(Debug, Default)]
struct ShapeFlags {
    base: Option<String>,
    rounded: bool,
    double: bool,
    sides: Option<u32>,
    slanted: bool,
    undrawn: bool,
}

impl ShapeFlags {
    fn resolve(&self) -> Option<NodeShape> {
        match self.base.as_deref() {
            Some("rectangle") if self.double => Some(NodeShape::Subroutine),
            Some("rectangle") if self.rounded => Some(NodeShape::Rounded),
            Some("rectangle") => Some(NodeShape::Rect),
            Some("rounded rectangle") => Some(NodeShape::Stadium),
            Some("circle") if self.double => Some(NodeShape::DoubleCircle),
            Some("circle") => Some(NodeShape::Circle),
            Some("double circle") => Some(NodeShape::DoubleCircle),
            Some("ellipse") => Some(NodeShape::Ellipse),
            Some("diamond") => Some(NodeShape::Diamond),
            Some("cylinder") => Some(NodeShape::Cylinder),
            Some("trapezium") if self.slanted => Some(NodeShape::Parallelogram),
            Some("trapezium") => Some(NodeShape::Trapezoid),
            Some("regular polygon") if self.sides == Some(6) => Some(NodeShape::Hexagon),
            Some(other) => {
                debug!(shape = other, "tikz shape has no IR counterpart");
                None
            }
            None if self.rounded => Some(NodeShape::Rounded),
            None if self.undrawn => Some(NodeShape::Text),
            None => None,
        }
    }
}

struct TikzParser<'a> {
    src: &'a str,
    pos: usize,
    has_picture: bool,
    in_picture: bool,
    picture_done: bool,
    envs: Vec<Environment>,
    nodes: Vec<Node>,
    node_index: HashMap<String, usize>,
    edges: Vec<Edge>,
    groups: Vec<Group>,
    group_ids: Vec<String>,
    coordinates: HashMap<String, Option<[f64; 2]>>,
    explicit_positions: BTreeMap<String, [f64; 2]>,
    colors: HashMap<String, String>,
    style_bodies: HashMap<String, Vec<String>>,
    styles: StyleSheet,
    orientation: Option<Orientation>,
}

/// Parse a TikZ picture (optionally wrapped in a LaTeX document)
pub fn parse(text: &str) -> Result<ParsedSource> {
    let clean = strip_comments(text);
    let mut parser = TikzParser::new(&clean);
    parser.run()?;
    parser.finish()
}

/// Blank out `%` comments, keeping byte offsets intact.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let mut escaped = false;
        let mut cut = None;
        for (i, c) in line.char_indices() {
            match c {
                '\\' => escaped = !escaped,
                '%' if !escaped => {
                    cut = Some(i);
                    break;
                }
                _ => escaped = false,
            }
        }
        match cut {
            Some(i) => {
                out.push_str(&line[..i]);
                for c in line[i..].chars() {
                    if c == '\n' {
                        out.push('\n');
                    } else {
                        out.extend(std::iter::repeat(' ').take(c.len_utf8()));
                    }
                }
            }
            None => out.push_str(line),
        }
    }
    out
}

impl<'a> TikzParser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            has_picture: src.contains("\\begin{tikzpicture}"),
            in_picture: false,
            picture_done: false,
            envs: Vec::new(),
            nodes: Vec::new(),
            node_index: HashMap::new(),
            edges: Vec::new(),
            groups: Vec::new(),
            group_ids: Vec::new(),
            coordinates: HashMap::new(),
            explicit_positions: BTreeMap::new(),
            colors: HashMap::new(),
            style_bodies: HashMap::new(),
            styles: StyleSheet::default(),
            orientation: None,
        }
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> ConvertError {
        ConvertError::syntax(SourcePos::from_offset(self.src, offset), message)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn drawing_enabled(&self) -> bool {
        if self.has_picture {
            self.in_picture && !self.picture_done
        } else {
            true
        }
    }

    fn run(&mut self) -> Result<()> {
        loop {
            self.skip_ws();
            let Some(c) = self.peek() else {
                break;
            };
            if c != '\\' {
                self.pos += c.len_utf8();
                continue;
            }

            let start = self.pos;
            self.pos += 1;
            let name = self.read_command_name();
            match name {
                "begin" => self.begin_environment(start)?,
                "end" => self.end_environment(start)?,
                "tikzset" => {
                    self.skip_ws();
                    let body = self.read_balanced('{', '}')?;
                    let options = split_options(body);
                    self.apply_definitions(&options);
                }
                "tikzstyle" => self.tikzstyle(start)?,
                "definecolor" => self.definecolor()?,
                "foreach" => self.skip_foreach(start)?,
                "node" | "coordinate" if !self.drawing_enabled() => {
                    self.read_statement(start)?;
                }
                "node" => {
                    let body = self.read_statement(start)?;
                    self.node_statement(body)?;
                }
                "coordinate" => {
                    let body = self.read_statement(start)?;
                    self.coordinate_statement(body)?;
                }
                cmd if DRAW_COMMANDS.contains(&cmd) => {
                    let body = self.read_statement(start)?;
                    if self.drawing_enabled() {
                        self.path_statement(body)?;
                    }
                }
                "matrix" | "pic" => {
                    debug!(command = name, "tikz construct not represented in the IR");
                    self.read_statement(start)?;
                }
                _ => self.skip_arguments()?,
            }
        }

        if let Some(env) = self.envs.last() {
            return Err(self.error(
                self.src.len(),
                format!(
                    "unterminated scope: \\begin{{{}}} at {} is never closed",
                    env.name,
                    SourcePos::from_offset(self.src, env.opened_at)
                ),
            ));
        }
        Ok(())
    }

    fn finish(self) -> Result<ParsedSource> {
        let diagram = DiagramBuilder::new()
            .orientation(self.orientation.unwrap_or_default())
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

    fn read_command_name(&mut self) -> &'a str {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !c.is_ascii_alphabetic() && *c != '@')
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        // `\\`, `\{` and friends are single-character commands
        let len = if len == 0 { rest.chars().next().map_or(0, char::len_utf8) } else { len };
        self.pos += len;
        &rest[..len]
    }

    /// Read a balanced group starting at the cursor, returning its inner text.
    fn read_balanced(&mut self, open: char, close: char) -> Result<&'a str> {
        let start = self.pos;
        if self.peek() != Some(open) {
            return Err(self.error(start, format!("expected '{}'", open)));
        }
        match find_balanced(self.src, start, open, close) {
            Some(end) => {
                self.pos = end + close.len_utf8();
                Ok(&self.src[start + open.len_utf8()..end])
            }
            None => Err(self.error(start, format!("unterminated '{}'", open))),
        }
    }

    fn read_optional(&mut self, open: char, close: char) -> Result<Option<&'a str>> {
        self.skip_ws();
        if self.peek() == Some(open) {
            self.read_balanced(open, close).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Skip the `[..]`/`{..}` arguments of a command we don't interpret.
    fn skip_arguments(&mut self) -> Result<()> {
        loop {
            let save = self.pos;
            self.skip_ws();
            match self.peek() {
                Some('[') => {
                    self.read_balanced('[', ']')?;
                }
                Some('{') => {
                    self.read_balanced('{', '}')?;
                }
                _ => {
                    self.pos = save;
                    return Ok(());
                }
            }
        }
    }

    /// Text up to the `;` ending a drawing command, outside braces and brackets.
    /// Brackets inside a brace group are label text.
    fn read_statement(&mut self, start: usize) -> Result<&'a str> {
        let body_start = self.pos;
        let mut braces = 0usize;
        let mut brackets = 0usize;
        let mut escaped = false;
        for (i, c) in self.rest().char_indices() {
            if std::mem::take(&mut escaped) {
                continue;
            }
            match c {
                '\\' => escaped = true,
                '{' => braces += 1,
                '}' => braces = braces.saturating_sub(1),
                '[' if braces == 0 => brackets += 1,
                ']' if braces == 0 => brackets = brackets.saturating_sub(1),
                ';' if braces == 0 && brackets == 0 => {
                    self.pos = body_start + i + 1;
                    return Ok(&self.src[body_start..body_start + i]);
                }
                _ => {}
            }
        }
        Err(self.error(start, "unterminated statement: missing ';'"))
    }

    fn begin_environment(&mut self, start: usize) -> Result<()> {
        self.skip_ws();
        let name = self.read_balanced('{', '}')?.trim().to_string();
        let mut env = Environment {
            name: name.clone(),
            opened_at: start,
            group: None,
            arrow: None,
        };

        if name == "tikzpicture" || name == "scope" {
            let options = self.read_optional('[', ']')?.map(split_options).unwrap_or_default();
            self.apply_definitions(&options);
            let effects = self.option_effects(&options, OptionTarget::Edge);
            env.arrow = effects.arrow;
            if name == "tikzpicture" {
                if self.picture_done {
                    debug!("only the first tikzpicture is converted");
                } else {
                    self.in_picture = true;
                }
            } else if let Some(id) = effects.bounding_box {
                if self.group_ids.contains(&id) || self.envs.iter().any(|e| e.group.as_ref().is_some_and(|g| g.id == id)) {
                    return Err(self.error(start, format!("duplicate scope bounding box '{}'", id)));
                }
                env.group = Some(Group::new(id));
            }
        }

        self.envs.push(env);
        Ok(())
    }

    fn end_environment(&mut self, start: usize) -> Result<()> {
        self.skip_ws();
        let name = self.read_balanced('{', '}')?.trim().to_string();
        let env = match self.envs.pop() {
            Some(env) if env.name == name => env,
            Some(env) => {
                return Err(self.error(
                    start,
                    format!("\\end{{{}}} does not match \\begin{{{}}}", name, env.name),
                ))
            }
            None => return Err(self.error(start, format!("unmatched \\end{{{}}}", name))),
        };

        if name == "tikzpicture" && self.in_picture {
            self.in_picture = false;
            self.picture_done = true;
        }

        if let Some(group) = env.group {
            self.group_ids.push(group.id.clone());
            if group.is_empty() {
                debug!(group = %group.id, "dropping empty scope group");
            } else if let Some(parent) = self.envs.iter_mut().rev().find_map(|e| e.group.as_mut()) {
                parent.groups.push(group);
            } else {
                self.groups.push(group);
            }
        }
        Ok(())
    }

    /// `\tikzstyle{name}=[options]`
    fn tikzstyle(&mut self, start: usize) -> Result<()> {
        self.skip_ws();
        let name = self.read_balanced('{', '}')?.trim().to_string();
        self.skip_ws();
        if self.peek() == Some('=') {
            self.pos += 1;
        }
        let body = match self.read_optional('[', ']')? {
            Some(body) => body,
            None => self
                .read_optional('{', '}')?
                .ok_or_else(|| self.error(start, format!("\\tikzstyle{{{}}} has no body", name)))?,
        };
        self.define_style(&name, split_options(body));
        Ok(())
    }

    /// `\definecolor{name}{model}{value}`
    fn definecolor(&mut self) -> Result<()> {
        self.skip_ws();
        let name = self.read_balanced('{', '}')?.trim().to_string();
        self.skip_ws();
        let model = self.read_balanced('{', '}')?.trim().to_string();
        self.skip_ws();
        let value = self.read_balanced('{', '}')?.trim().to_string();
        match color_from_model(&model, &value) {
            Some(hex) => {
                self.colors.insert(name, hex);
            }
            None => debug!(color = name.as_str(), model = model.as_str(), "unsupported color model"),
        }
        Ok(())
    }

    /// `\foreach \x in {..} {..}` bodies are not expanded.
    fn skip_foreach(&mut self, start: usize) -> Result<()> {
        debug!("foreach loops are not expanded");
        let rest = self.rest();
        let Some(list) = rest.find('{') else {
            return Err(self.error(start, "malformed \\foreach"));
        };
        self.pos += list;
        self.read_balanced('{', '}')?;
        self.skip_ws();
        if self.peek() == Some('{') {
            self.read_balanced('{', '}')?;
        } else {
            self.read_statement(start)?;
        }
        Ok(())
    }

    /// Entries of an option list that define styles (`name/.style={..}`).
    fn apply_definitions(&mut self, options: &[String]) {
        for option in options {
            let Some((key, value)) = option.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let (name, append) = if let Some(name) = key.strip_suffix("/.style") {
                (name.trim(), false)
            } else if let Some(name) = key.strip_suffix("/.append style") {
                (name.trim(), true)
            } else {
                continue;
            };
            let value = value.trim();
            let body = value
                .strip_prefix('{')
                .and_then(|v| v.strip_suffix('}'))
                .unwrap_or(value);
            let mut entries = split_options(body);
            if append {
                if let Some(existing) = self.style_bodies.get(name) {
                    let mut merged = existing.clone();
                    merged.append(&mut entries);
                    entries = merged;
                }
            }
            self.define_style(name, entries);
        }
    }

    fn define_style(&mut self, name: &str, entries: Vec<String>) {
        let attrs = self.option_effects(&entries, OptionTarget::Style).attrs;
        match name {
            "every node" => self.styles.defaults.node = attrs,
            "every edge" => self.styles.defaults.edge = attrs,
            _ => {
                self.styles.classes.insert(name.to_string(), attrs);
            }
        }
        self.style_bodies.insert(name.to_string(), entries);
    }

    fn option_effects(&self, options: &[String], target: OptionTarget) -> OptionEffects {
        let mut effects = OptionEffects::default();
        self.collect_effects(options, target, &mut effects, 0);
        if target != OptionTarget::Edge {
            if let Some(shape) = effects.shape.resolve() {
                effects.attrs.shape = Some(shape);
            }
        }
        effects
    }

    fn collect_effects(
        &self,
        options: &[String],
        target: OptionTarget,
        effects: &mut OptionEffects,
        depth: usize,
    ) {
        for option in options {
            let option = option.trim();
            if option.contains("/.style") || option.contains("/.append style") {
                continue;
            }

            if let Some(body) = self.style_bodies.get(option) {
                if target == OptionTarget::Node && effects.class.is_none() {
                    effects.class = Some(option.to_string());
                } else if depth < 8 {
                    self.collect_effects(body, target, effects, depth + 1);
                }
                continue;
            }

            if let Some(caps) = RE_ARROW_SPEC.captures(option) {
                effects.arrow = Some(!caps[1].is_empty() || !caps[2].is_empty());
                continue;
            }

            if let Some(caps) = RE_RELATIVE.captures(option) {
                if effects.relative.is_none() {
                    effects.relative = Some(match &caps[1] {
                        "right" => Orientation::LR,
                        "left" => Orientation::RL,
                        "above" => Orientation::BT,
                        _ => Orientation::TB,
                    });
                }
                continue;
            }

            let (key, value) = match option.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (option, None),
            };
            let flags = &mut effects.shape;
            match (key, value) {
                ("fill", Some(v)) => effects.attrs.fill = Some(self.resolve_color(v)),
                ("draw", Some("none")) => flags.undrawn = true,
                ("draw" | "color", Some(v)) => effects.attrs.stroke = Some(self.resolve_color(v)),
                ("line width", Some(v)) => match parse_length_pt(v) {
                    Some(width) => effects.attrs.stroke_width = Some(width),
                    None => debug!(value = v, "unparsable line width"),
                },
                ("shape", Some(v)) => flags.base = Some(v.to_string()),
                ("local bounding box", Some(v)) => effects.bounding_box = Some(v.to_string()),
                ("rounded corners", _) => flags.rounded = true,
                ("regular polygon sides", Some(v)) => flags.sides = v.parse().ok(),
                ("trapezium right angle", Some(_)) => flags.slanted = true,
                ("double", _) => flags.double = true,
                (
                    "rectangle" | "rounded rectangle" | "circle" | "double circle" | "ellipse" | "diamond"
                    | "cylinder" | "trapezium" | "regular polygon" | "star" | "cloud",
                    None,
                ) => flags.base = Some(key.to_string()),
                ("dashed" | "densely dashed" | "loosely dashed", None) => effects.attrs.dash = Some(DashStyle::Dashed),
                ("dotted" | "densely dotted" | "loosely dotted", None) => effects.attrs.dash = Some(DashStyle::Dotted),
                ("solid", None) => effects.attrs.dash = Some(DashStyle::Solid),
                (width, None) if named_line_width(width).is_some() => {
                    effects.attrs.stroke_width = named_line_width(width);
                }
                (color, None) if is_color_expression(color) => {
                    effects.attrs.stroke = Some(self.resolve_color(color));
                }
                _ => {}
            }
        }
    }

    fn resolve_color(&self, raw: &str) -> String {
        let raw = raw.trim();
        if let Some(caps) = RE_HEX_NAME.captures(raw) {
            return format!("#{}", &caps[1]);
        }
        if let Some(hex) = self.colors.get(raw) {
            return hex.clone();
        }
        if let Some(caps) = RE_RGB255.captures(raw) {
            let channel = |i: usize| caps[i].parse::<u32>().unwrap_or(0).min(255);
            return format!("#{:02x}{:02x}{:02x}", channel(1), channel(2), channel(3));
        }
        raw.to_string()
    }

    fn note_relative(&mut self, relative: Option<Orientation>) {
        if self.orientation.is_none() {
            self.orientation = relative;
        }
    }

    /// Declare a node; a repeated ID keeps its first declaration.
    fn declare_node(&mut self, node: Node) {
        if self.node_index.contains_key(&node.id) {
            debug!(node = %node.id, "node declared twice; keeping the first declaration");
            return;
        }
        if let Some(group) = self.envs.iter_mut().rev().find_map(|e| e.group.as_mut()) {
            group.nodes.push(node.id.clone());
        }
        self.node_index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
    }

    /// `\node[opts] (id) at (x,y) {label};`
    fn node_statement(&mut self, body: &'a str) -> Result<()> {
        let base = self.offset_of(body);
        let tokens = tokenize(self.src, body, base)?;
        let mut options = Vec::new();
        let mut id = None;
        let mut at = None;
        let mut label = None;
        let mut expect_at = false;

        for spanned in &tokens {
            match &spanned.token {
                Token::Options(text) => options.extend(split_options(text)),
                Token::Word("at") => expect_at = true,
                Token::Point(text) if expect_at => {
                    at = Some((*text, spanned.offset));
                    expect_at = false;
                }
                Token::Point(text) if id.is_none() && label.is_none() => id = Some(text.trim()),
                Token::Text(text) if label.is_none() => label = Some(*text),
                _ => {}
            }
        }

        let Some(id) = id.filter(|id| !id.is_empty()) else {
            debug!(statement = body.trim(), "anonymous node skipped");
            return Ok(());
        };
        let effects = self.option_effects(&options, OptionTarget::Node);
        self.note_relative(effects.relative);

        let mut node = Node::new(id);
        node.label = label.map(unescape_label).filter(|l| !l.is_empty() && l != id);
        node.shape = effects.attrs.shape;
        node.fill = effects.attrs.fill;
        node.stroke = effects.attrs.stroke;
        node.stroke_width = effects.attrs.stroke_width;
        node.class = effects.class;

        if let Some((point, offset)) = at {
            if let Some(position) = self.resolve_place(point, offset)? {
                self.explicit_positions.entry(id.to_string()).or_insert(position);
            }
        }
        self.declare_node(node);
        Ok(())
    }

    /// `\coordinate (name) at (x,y);`
    fn coordinate_statement(&mut self, body: &'a str) -> Result<()> {
        let base = self.offset_of(body);
        let tokens = tokenize(self.src, body, base)?;
        let mut name = None;
        let mut at = None;
        let mut expect_at = false;
        for spanned in &tokens {
            match &spanned.token {
                Token::Word("at") => expect_at = true,
                Token::Point(text) if expect_at => {
                    at = Some((*text, spanned.offset));
                    expect_at = false;
                }
                Token::Point(text) if name.is_none() => name = Some(text.trim().to_string()),
                _ => {}
            }
        }
        let Some(name) = name else {
            return Err(self.error(base, "\\coordinate without a name"));
        };
        let position = match at {
            Some((point, offset)) => self.resolve_place(point, offset)?,
            None => None,
        };
        self.coordinates.insert(name, position);
        Ok(())
    }

    /// Resolve the target of `at (..)` to a canonical position, if it has one.
    fn resolve_place(&self, text: &str, offset: usize) -> Result<Option<[f64; 2]>> {
        match self.resolve_point(text, offset)? {
            PointRef::Place(position) => Ok(position),
            PointRef::Node(id) => Ok(self.explicit_positions.get(&id).copied()),
        }
    }

    fn resolve_point(&self, text: &str, offset: usize) -> Result<PointRef> {
        let text = text.trim();
        if text.starts_with('$') {
            return Ok(PointRef::Place(None));
        }
        if let Some((x, y)) = split_pair(text, ',') {
            return Ok(PointRef::Place(cartesian(x, y)));
        }
        if let Some((angle, radius)) = split_pair(text, ':') {
            return Ok(PointRef::Place(polar(angle, radius)));
        }

        let mut candidates = vec![text];
        if let Some((name, _anchor)) = text.rsplit_once('.') {
            candidates.push(name.trim());
        }
        for name in candidates {
            if self.node_index.contains_key(name) {
                return Ok(PointRef::Node(name.to_string()));
            }
            if let Some(position) = self.coordinates.get(name) {
                return Ok(PointRef::Place(*position));
            }
        }
        Err(self.error(offset, format!("reference to undeclared node '{}'", text)))
    }

    /// `\draw`/`\path` statements: connectors, `edge` operations and inline labels.
    fn path_statement(&mut self, body: &'a str) -> Result<()> {
        let base = self.offset_of(body);
        let tokens = tokenize(self.src, body, base)?;
        let env_arrow = self.envs.iter().rev().find_map(|e| e.arrow);

        let mut path_options: Vec<String> = Vec::new();
        let mut current: Option<PointRef> = None;
        let mut pending: Option<Vec<String>> = None;
        let mut pending_is_edge_op = false;
        let mut pending_label: Option<String> = None;
        let mut last_edge: Option<usize> = None;
        let mut literal_next = false;

        let mut i = 0;
        while i < tokens.len() {
            let spanned = &tokens[i];
            i += 1;
            match &spanned.token {
                Token::Options(text) => match pending.as_mut() {
                    Some(segment) => segment.extend(split_options(text)),
                    None => path_options.extend(split_options(text)),
                },
                Token::Word(word @ ("--" | "to" | "|-" | "-|" | "edge")) => {
                    pending = Some(Vec::new());
                    pending_is_edge_op = *word == "edge";
                    literal_next = false;
                }
                Token::Word("node") => {
                    // node[opts] (name)? {label}
                    let mut label = None;
                    while i < tokens.len() {
                        match &tokens[i].token {
                            Token::Options(_) => i += 1,
                            Token::Point(_) if label.is_none() => i += 1,
                            Token::Text(text) => {
                                label = Some(unescape_label(text));
                                i += 1;
                                break;
                            }
                            _ => break,
                        }
                    }
                    let Some(label) = label.filter(|l| !l.is_empty()) else {
                        continue;
                    };
                    if pending.is_some() {
                        pending_label = Some(label);
                    } else if let Some(edge) = last_edge.and_then(|idx| self.edges.get_mut(idx)) {
                        if edge.label.is_none() {
                            edge.label = Some(label);
                        }
                    }
                }
                Token::Word("coordinate") => {
                    if let Some(Spanned { token: Token::Point(name), .. }) = tokens.get(i) {
                        self.coordinates.insert(name.trim().to_string(), None);
                        i += 1;
                    }
                }
                Token::Word(word) if PATH_SHAPE_OPERATIONS.contains(word) => {
                    pending = None;
                    literal_next = true;
                }
                Token::Word("cycle") => {
                    pending = None;
                    current = Some(PointRef::Place(None));
                }
                Token::Word(other) => {
                    debug!(operation = *other, "path operation ignored");
                }
                Token::Point(text) => {
                    if std::mem::take(&mut literal_next) {
                        current = Some(PointRef::Place(None));
                        continue;
                    }
                    let point = self.resolve_point(text, spanned.offset)?;
                    let Some(segment) = pending.take() else {
                        current = Some(point);
                        continue;
                    };
                    let label = pending_label.take();
                    if let (Some(PointRef::Node(from)), PointRef::Node(to)) = (&current, &point) {
                        let mut options = path_options.clone();
                        options.extend(segment);
                        let effects = self.option_effects(&options, OptionTarget::Edge);
                        let mut edge = Edge::new(from.clone(), to.clone());
                        edge.label = label;
                        edge.arrow = effects.arrow.or(env_arrow).unwrap_or(false);
                        edge.apply_style(&effects.attrs);
                        self.edges.push(edge);
                        last_edge = Some(self.edges.len() - 1);
                    }
                    if !pending_is_edge_op {
                        current = Some(point);
                    }
                }
                Token::Text(_) => {}
            }
        }
        Ok(())
    }

    fn offset_of(&self, body: &str) -> usize {
        body.as_ptr() as usize - self.src.as_ptr() as usize
    }
}

/// Index of the `close` matching the `open` at `start`.
fn find_balanced(src: &str, start: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut escaped = false;
    for (i, c) in src[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(start + i);
            }
        }
    }
    None
}

fn tokenize<'s>(src: &str, body: &'s str, base: usize) -> Result<Vec<Spanned<'s>>> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < body.len() {
        let rest = &body[i..];
        let Some(c) = rest.chars().next() else {
            break;
        };
        if c.is_whitespace() {
            i += c.len_utf8();
            continue;
        }
        let (open, close) = match c {
            '[' => ('[', ']'),
            '(' => ('(', ')'),
            '{' => ('{', '}'),
            _ => {
                let len = rest
                    .char_indices()
                    .find(|(_, ch)| ch.is_whitespace() || matches!(ch, '[' | '(' | '{'))
                    .map(|(idx, _)| idx)
                    .unwrap_or(rest.len());
                tokens.push(Spanned {
                    token: Token::Word(&rest[..len]),
                    offset: base + i,
                });
                i += len;
                continue;
            }
        };
        let end = find_balanced(body, i, open, close).ok_or_else(|| {
            ConvertError::syntax(
                SourcePos::from_offset(src, base + i),
                format!("unterminated '{}'", open),
            )
        })?;
        let inner = &body[i + 1..end];
        let token = match open {
            '[' => Token::Options(inner),
            '(' => Token::Point(inner),
            _ => Token::Text(inner),
        };
        tokens.push(Spanned {
            token,
            offset: base + i,
        });
        i = end + close.len_utf8();
    }
    Ok(tokens)
}

/// Split an option list on top-level commas.
fn split_options(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '{' | '[' | '(' => {
                depth += 1;
                current.push(c);
            }
            '}' | ']' | ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                let entry = current.trim();
                if !entry.is_empty() {
                    out.push(entry.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let entry = current.trim();
    if !entry.is_empty() {
        out.push(entry.to_string());
    }
    out
}

fn split_pair(text: &str, separator: char) -> Option<(&str, &str)> {
    let (a, b) = text.split_once(separator)?;
    (!b.contains(separator)).then_some((a, b))
}

/// Length in canonical pixels; bare numbers are centimetres.
fn parse_length_px(text: &str) -> Option<f64> {
    let caps = RE_DIMENSION.captures(text)?;
    let value: f64 = caps[1].parse().ok()?;
    let scale = match caps.get(2).map(|m| m.as_str()) {
        None | Some("cm") => TIKZ_PX_PER_CM,
        Some("mm") => TIKZ_PX_PER_CM / 10.0,
        Some("pt") => TIKZ_PX_PER_PT,
        Some("bp") => 96.0 / 72.0,
        Some("in") => 96.0,
        Some(_) => return None,
    };
    Some(value * scale)
}

/// Line widths are kept in points.
fn parse_length_pt(text: &str) -> Option<f64> {
    let caps = RE_DIMENSION.captures(text)?;
    let value: f64 = caps[1].parse().ok()?;
    let value = match caps.get(2).map(|m| m.as_str()) {
        None | Some("pt") | Some("bp") => value,
        Some("mm") => value * 72.27 / 25.4,
        Some("cm") => value * 72.27 / 2.54,
        Some("in") => value * 72.27,
        Some(_) => return None,
    };
    Some(round2(value))
}

fn named_line_width(name: &str) -> Option<f64> {
    match name {
        "ultra thin" => Some(0.1),
        "very thin" => Some(0.2),
        "thin" => Some(0.4),
        "semithick" => Some(0.6),
        "thick" => Some(0.8),
        "very thick" => Some(1.2),
        "ultra thick" => Some(1.6),
        _ => None,
    }
}

fn is_color_expression(text: &str) -> bool {
    let base = text.split('!').next().unwrap_or_default();
    COLOR_NAMES.contains(&base) || RE_HEX_NAME.is_match(base)
}

/// Source coordinates are y-up; canonical space is y-down.
fn cartesian(x: &str, y: &str) -> Option<[f64; 2]> {
    Some([round2(parse_length_px(x)?), round2(-parse_length_px(y)?)])
}

fn polar(angle: &str, radius: &str) -> Option<[f64; 2]> {
    let angle: f64 = angle.trim().parse().ok()?;
    let radius = parse_length_px(radius)?;
    let (sin, cos) = angle.to_radians().sin_cos();
    Some([round2(radius * cos), round2(-radius * sin)])
}

fn color_from_model(model: &str, value: &str) -> Option<String> {
    match model {
        "HTML" => {
            let hex = value.trim_start_matches('#');
            (hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()))
                .then(|| format!("#{}", hex.to_lowercase()))
        }
        "RGB" | "rgb" => {
            let parts: Vec<f64> = value
                .split(',')
                .map(|p| p.trim().parse::<f64>())
                .collect::<std::result::Result<_, _>>()
                .ok()?;
            let [r, g, b] = parts.as_slice() else {
                return None;
            };
            let scale = if model == "rgb" { 255.0 } else { 1.0 };
            let channel = |v: f64| (v * scale).round().clamp(0.0, 255.0) as u8;
            Some(format!("#{:02x}{:02x}{:02x}", channel(*r), channel(*g), channel(*b)))
        }
        _ => None,
    }
}

/// Undo the escapes the TikZ generator writes: `\\` is a line break,
/// `\_` and friends are literal characters.
fn unescape_label(raw: &str) -> String {
    let text = raw.trim();
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find('\\') {
        out.push_str(&rest[..idx]);
        let after = &rest[idx + 1..];
        if let Some(next) = after.strip_prefix('\\') {
            out.push('\n');
            rest = next.trim_start();
        } else if let Some(next) = after.strip_prefix("textbackslash") {
            out.push('\\');
            rest = next.strip_prefix("{}").unwrap_or(next);
        } else if let Some(c) = after.chars().next().filter(|c| "_&%#${}".contains(*c)) {
            out.push(c);
            rest = &after[c.len_utf8()..];
        } else {
            out.push('\\');
            rest = after;
        }
    }
    out.push_str(rest);
    out
}
