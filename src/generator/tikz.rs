//! TikZ picture generator
//!
//! Colours are declared as `hexRRGGBB` names, classes become `/.style` keys
//! in a `\tikzset`, and groups become scopes with a `local bounding box`.
//! Scopes must enclose their nodes, so a group tree is written where its
//! first node would have appeared. Without layout, nodes are chained with
//! `below of=`-style placement that follows the orientation.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{decimal, group_owners, NodeNames};
use crate::geometry::TIKZ_PX_PER_CM;
use crate::style::{self, format_number, StyleTarget};
use crate::types::{DashStyle, Diagram, Edge, Group, Node, NodeShape, Orientation, StyleAttrs};

lazy_static! {
    static ref RE_NODE_NAME: Regex = Regex::new(r"^[A-Za-z0-9_-]+(?: [A-Za-z0-9_-]+)*$").unwrap();
    static ref RE_HEX_COLOR: Regex = Regex::new(r"^#([0-9A-Fa-f]{3}|[0-9A-Fa-f]{6})$").unwrap();
}

pub fn generate(diagram: &Diagram) -> String {
    let mut picture = Picture::new(diagram);
    let sheet = diagram.styles();

    let mut styles = Vec::new();
    let mut every_node = vec!["draw".to_string()];
    every_node.extend(picture.palette.options(&sheet.defaults.node));
    styles.push(format!("every node/.style={{{}}}", every_node.join(", ")));
    if !sheet.defaults.edge.is_empty() {
        let mut every_edge = vec!["draw".to_string()];
        every_edge.extend(picture.palette.options(&without_shape(&sheet.defaults.edge)));
        styles.push(format!("every edge/.style={{{}}}", every_edge.join(", ")));
    }
    for (name, attrs) in &sheet.classes {
        styles.push(format!("{}/.style={{{}}}", name, picture.palette.options(attrs).join(", ")));
    }

    let roots = root_groups(diagram.groups());
    let mut written: HashSet<&str> = HashSet::new();
    for node in diagram.nodes() {
        let root = picture
            .owners
            .get(node.id.as_str())
            .and_then(|owner| roots.get(owner))
            .copied();
        match root {
            Some(root) => {
                if written.insert(root.id.as_str()) {
                    picture.scope(root, 1);
                }
            }
            None => picture.node(node, 1),
        }
    }
    for edge in diagram.edges() {
        picture.edge(edge);
    }

    let mut lines: Vec<String> = picture
        .palette
        .colors
        .iter()
        .map(|(name, html)| format!("\\definecolor{{{}}}{{HTML}}{{{}}}", name, html))
        .collect();
    lines.push(format!("\\tikzset{{{}}}", styles.join(", ")));
    lines.push("\\begin{tikzpicture}[node distance=2cm]".to_string());
    lines.extend(picture.lines);
    lines.push("\\end{tikzpicture}".to_string());

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Picture body under construction
struct Picture<'d> {
    diagram: &'d Diagram,
    names: NodeNames<'d>,
    owners: HashMap<&'d str, &'d str>,
    palette: Palette,
    lines: Vec<String>,
    previous: Option<String>,
    laid_out: bool,
}

impl<'d> Picture<'d> {
    fn new(diagram: &'d Diagram) -> Self {
        Self {
            diagram,
            names: NodeNames::new(diagram, |id| RE_NODE_NAME.is_match(id)),
            owners: group_owners(diagram.groups()),
            palette: Palette::default(),
            lines: Vec::new(),
            previous: None,
            laid_out: diagram.is_laid_out(),
        }
    }

    fn node(&mut self, node: &Node, depth: usize) {
        let form = style::minimal_form(
            StyleTarget::Node,
            &node.explicit_style(),
            node.class.as_deref(),
            self.diagram.styles(),
        );
        let mut options = Vec::new();
        if let Some(class) = form.class {
            options.push(class.to_string());
        }
        options.extend(self.palette.options(&form.inline));
        let label = node.label();
        if label.contains('\n') {
            options.push("align=center".to_string());
        }

        let name = self.names.get(&node.id).to_string();
        let mut placement = String::new();
        match (self.laid_out, node.position, node.size) {
            (true, Some([x, y]), Some([w, h])) => {
                options.push(format!("minimum width={}cm", decimal(w / TIKZ_PX_PER_CM, 4)));
                options.push(format!("minimum height={}cm", decimal(h / TIKZ_PX_PER_CM, 4)));
                placement = format!(
                    " at ({},{})",
                    decimal(x / TIKZ_PX_PER_CM, 4),
                    decimal(-y / TIKZ_PX_PER_CM, 4)
                );
            }
            _ => {
                if let Some(previous) = &self.previous {
                    options.push(format!("{} of={}", relation(self.diagram.orientation()), previous));
                }
            }
        }

        self.lines.push(format!(
            "{}\\node{} ({}){} {{{}}};",
            "  ".repeat(depth),
            option_list(&options),
            name,
            placement,
            escape_label(label)
        ));
        self.previous = Some(name);
    }

    fn scope(&mut self, group: &'d Group, depth: usize) {
        let indent = "  ".repeat(depth);
        self.lines
            .push(format!("{}\\begin{{scope}}[local bounding box={}]", indent, group.id));
        for id in &group.nodes {
            if self.owners.get(id.as_str()) != Some(&group.id.as_str()) {
                continue;
            }
            if let Some(node) = self.diagram.node(id) {
                self.node(node, depth + 1);
            }
        }
        for child in &group.groups {
            self.scope(child, depth + 1);
        }
        self.lines.push(format!("{}\\end{{scope}}", indent));
    }

    fn edge(&mut self, edge: &Edge) {
        let inline = style::flattened_form(
            StyleTarget::Edge,
            &edge.explicit_style(),
            None,
            self.diagram.styles(),
        );
        let mut options = Vec::new();
        if edge.arrow {
            options.push("->".to_string());
        }
        if edge.from == edge.to {
            options.push("loop above".to_string());
        }
        options.extend(self.palette.options(&without_shape(&inline)));

        let label = match edge.label.as_deref() {
            Some(label) => {
                let mut label_options = vec!["above", "draw=none", "fill=none"];
                if label.contains('\n') {
                    label_options.push("align=center");
                }
                format!(" node[{}] {{{}}}", label_options.join(", "), escape_label(label))
            }
            None => String::new(),
        };
        self.lines.push(format!(
            "  \\path ({}) edge{}{} ({});",
            self.names.get(&edge.from),
            option_list(&options),
            label,
            self.names.get(&edge.to)
        ));
    }
}

/// Colours referenced so far, by TikZ name
#[derive(Default)]
struct Palette {
    colors: BTreeMap<String, String>,
}

impl Palette {
    /// TikZ name for a colour. Hex colours get a `\definecolor` entry; any
    /// other value is assumed to be a colour TikZ knows.
    fn color(&mut self, value: &str) -> String {
        let Some(caps) = RE_HEX_COLOR.captures(value) else {
            return value.to_string();
        };
        let digits = &caps[1];
        let html: String = if digits.len() == 3 {
            digits.chars().flat_map(|c| [c, c]).collect()
        } else {
            digits.to_string()
        };
        let name = format!("hex{}", digits);
        self.colors.insert(name.clone(), html.to_uppercase());
        name
    }

    fn options(&mut self, attrs: &StyleAttrs) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        if let Some(shape) = attrs.shape {
            out.extend(shape_options(shape).iter().map(|s| s.to_string()));
        }
        if let Some(fill) = &attrs.fill {
            out.push(format!("fill={}", self.color(fill)));
        }
        if let Some(stroke) = &attrs.stroke {
            out.push(format!("draw={}", self.color(stroke)));
        }
        if let Some(width) = attrs.stroke_width {
            out.push(format!("line width={}pt", format_number(width)));
        }
        if let Some(dash) = attrs.dash {
            out.push(
                match dash {
                    DashStyle::Solid => "solid",
                    DashStyle::Dashed => "dashed",
                    DashStyle::Dotted => "dotted",
                }
                .to_string(),
            );
        }
        out
    }
}

fn shape_options(shape: NodeShape) -> &'static [&'static str] {
    match shape {
        NodeShape::Rect => &["rectangle"],
        NodeShape::Rounded => &["rectangle", "rounded corners"],
        NodeShape::Stadium => &["rounded rectangle"],
        NodeShape::Subroutine => &["rectangle", "double"],
        NodeShape::Cylinder => &["cylinder"],
        NodeShape::Circle => &["circle"],
        NodeShape::DoubleCircle => &["circle", "double"],
        NodeShape::Ellipse => &["ellipse"],
        NodeShape::Diamond => &["diamond"],
        NodeShape::Hexagon => &["regular polygon", "regular polygon sides=6"],
        NodeShape::Parallelogram => &[
            "trapezium",
            "trapezium left angle=120",
            "trapezium right angle=60",
        ],
        NodeShape::Trapezoid => &["trapezium"],
        NodeShape::Text => &["draw=none"],
    }
}

fn without_shape(attrs: &StyleAttrs) -> StyleAttrs {
    StyleAttrs {
        shape: None,
        ..attrs.clone()
    }
}

fn relation(orientation: Orientation) -> &'static str {
    match orientation {
        Orientation::TB => "below",
        Orientation::BT => "above",
        Orientation::LR => "right",
        Orientation::RL => "left",
    }
}

/// Every group id mapped to the top-level group containing it.
fn root_groups(groups: &[Group]) -> HashMap<&str, &Group> {
    fn visit<'g>(root: &'g Group, group: &'g Group, out: &mut HashMap<&'g str, &'g Group>) {
        out.insert(group.id.as_str(), root);
        for child in &group.groups {
            visit(root, child, out);
        }
    }
    let mut out = HashMap::new();
    for group in groups {
        visit(group, group, &mut out);
    }
    out
}

fn option_list(options: &[String]) -> String {
    if options.is_empty() {
        String::new()
    } else {
        format!("[{}]", options.join(", "))
    }
}

fn escape_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        match c {
            '\\' => out.push_str("\\textbackslash{}"),
            '\n' => out.push_str("\\\\"),
            '_' | '&' | '%' | '#' | '$' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}
