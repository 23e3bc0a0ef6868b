//! The canonical diagram IR shared by every parser and generator.
//!
//! A [`Diagram`] is assembled once through [`DiagramBuilder`](crate::builder::DiagramBuilder)
//! and never mutated afterwards; its fields are only reachable through accessors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::builder::{DiagramBuilder, DiagramDocument};
use crate::error::Result;

/// Which of the three source grammars a text belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    Mermaid,
    Tikz,
    Dot,
}

impl FormatKind {
    pub const ALL: [FormatKind; 3] = [FormatKind::Mermaid, FormatKind::Tikz, FormatKind::Dot];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "mermaid" | "mmd" => Some(FormatKind::Mermaid),
            "tikz" | "tex" | "latex" => Some(FormatKind::Tikz),
            "dot" | "graphviz" | "gv" => Some(FormatKind::Dot),
            _ => None,
        }
    }

    /// Format implied by a file extension (without the leading dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mmd" | "mermaid" => Some(FormatKind::Mermaid),
            "tex" | "tikz" => Some(FormatKind::Tikz),
            "dot" | "gv" => Some(FormatKind::Dot),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatKind::Mermaid => "mermaid",
            FormatKind::Tikz => "tikz",
            FormatKind::Dot => "dot",
        }
    }
}

impl std::fmt::Display for FormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layout direction of the whole diagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    TB,
    LR,
    RL,
    BT,
}

impl Orientation {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "TB" | "TD" => Some(Orientation::TB),
            "LR" => Some(Orientation::LR),
            "RL" => Some(Orientation::RL),
            "BT" => Some(Orientation::BT),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::TB => "TB",
            Orientation::LR => "LR",
            Orientation::RL => "RL",
            Orientation::BT => "BT",
        }
    }

    pub fn is_default(&self) -> bool {
        *self == Orientation::TB
    }
}

/// Shape of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeShape {
    #[default]
    Rect,
    Rounded,
    Stadium,
    Subroutine,
    Cylinder,
    Circle,
    DoubleCircle,
    Ellipse,
    Diamond,
    Hexagon,
    Parallelogram,
    Trapezoid,
    Text,
}

impl NodeShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeShape::Rect => "rect",
            NodeShape::Rounded => "rounded",
            NodeShape::Stadium => "stadium",
            NodeShape::Subroutine => "subroutine",
            NodeShape::Cylinder => "cylinder",
            NodeShape::Circle => "circle",
            NodeShape::DoubleCircle => "double-circle",
            NodeShape::Ellipse => "ellipse",
            NodeShape::Diamond => "diamond",
            NodeShape::Hexagon => "hexagon",
            NodeShape::Parallelogram => "parallelogram",
            NodeShape::Trapezoid => "trapezoid",
            NodeShape::Text => "text",
        }
    }
}

/// Line pattern of a stroke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DashStyle {
    #[default]
    Solid,
    Dashed,
    Dotted,
}

/// A partial set of visual properties. Every field is optional; unset fields
/// fall through to the next lower style layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StyleAttrs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dash: Option<DashStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<NodeShape>,
}

impl StyleAttrs {
    pub fn is_empty(&self) -> bool {
        self.fill.is_none()
            && self.stroke.is_none()
            && self.stroke_width.is_none()
            && self.dash.is_none()
            && self.shape.is_none()
    }

    /// Copy every field `other` sets on top of `self`.
    pub fn overlay(&mut self, other: &StyleAttrs) {
        if other.fill.is_some() {
            self.fill = other.fill.clone();
        }
        if other.stroke.is_some() {
            self.stroke = other.stroke.clone();
        }
        if other.stroke_width.is_some() {
            self.stroke_width = other.stroke_width;
        }
        if other.dash.is_some() {
            self.dash = other.dash;
        }
        if other.shape.is_some() {
            self.shape = other.shape;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StyleDefaults {
    #[serde(default, skip_serializing_if = "StyleAttrs::is_empty")]
    pub node: StyleAttrs,
    #[serde(default, skip_serializing_if = "StyleAttrs::is_empty")]
    pub edge: StyleAttrs,
}

impl StyleDefaults {
    pub fn is_empty(&self) -> bool {
        self.node.is_empty() && self.edge.is_empty()
    }
}

/// Graph-wide style layers: per-kind defaults plus named classes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StyleSheet {
    #[serde(default, skip_serializing_if = "StyleDefaults::is_empty")]
    pub defaults: StyleDefaults,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub classes: BTreeMap<String, StyleAttrs>,
}

impl StyleSheet {
    pub fn is_empty(&self) -> bool {
        self.defaults.is_empty() && self.classes.is_empty()
    }

    pub fn class(&self, name: &str) -> Option<&StyleAttrs> {
        self.classes.get(name)
    }
}

/// A node in the diagram
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Node {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<NodeShape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    #[serde(default, rename = "class", skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

impl Node {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_shape(mut self, shape: NodeShape) -> Self {
        self.shape = Some(shape);
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn with_geometry(mut self, position: [f64; 2], size: [f64; 2]) -> Self {
        self.position = Some(position);
        self.size = Some(size);
        self
    }

    /// Displayed label; falls back to the ID.
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    pub fn is_laid_out(&self) -> bool {
        self.position.is_some() && self.size.is_some()
    }

    /// The node's own style layer.
    pub fn explicit_style(&self) -> StyleAttrs {
        StyleAttrs {
            fill: self.fill.clone(),
            stroke: self.stroke.clone(),
            stroke_width: self.stroke_width,
            dash: None,
            shape: self.shape,
        }
    }

    pub(crate) fn apply_style(&mut self, attrs: &StyleAttrs) {
        if attrs.fill.is_some() {
            self.fill = attrs.fill.clone();
        }
        if attrs.stroke.is_some() {
            self.stroke = attrs.stroke.clone();
        }
        if attrs.stroke_width.is_some() {
            self.stroke_width = attrs.stroke_width;
        }
        if attrs.shape.is_some() {
            self.shape = attrs.shape;
        }
    }
}

fn default_arrow() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

/// An edge between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default = "default_arrow", skip_serializing_if = "is_true")]
    pub arrow: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dash: Option<DashStyle>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            label: None,
            arrow: true,
            stroke: None,
            stroke_width: None,
            dash: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn undirected(mut self) -> Self {
        self.arrow = false;
        self
    }

    pub fn explicit_style(&self) -> StyleAttrs {
        StyleAttrs {
            fill: None,
            stroke: self.stroke.clone(),
            stroke_width: self.stroke_width,
            dash: self.dash,
            shape: None,
        }
    }

    pub(crate) fn apply_style(&mut self, attrs: &StyleAttrs) {
        if attrs.stroke.is_some() {
            self.stroke = attrs.stroke.clone();
        }
        if attrs.stroke_width.is_some() {
            self.stroke_width = attrs.stroke_width;
        }
        if attrs.dash.is_some() {
            self.dash = attrs.dash;
        }
    }
}

/// A named cluster of nodes, possibly containing nested groups
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Group {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Group>,
}

impl Group {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    /// True when neither this group nor any nested group holds a node.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.groups.iter().all(Group::is_empty)
    }

    /// Node IDs held directly or by nested groups, in depth-first order.
    pub fn all_nodes(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.nodes.iter().map(String::as_str).collect();
        for child in &self.groups {
            out.extend(child.all_nodes());
        }
        out
    }
}

/// Provenance of a converted diagram (informational only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub format: FormatKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceInfo>,
}

/// The complete, validated diagram
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagram {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) title: Option<String>,
    #[serde(skip_serializing_if = "Orientation::is_default")]
    pub(crate) orientation: Orientation,
    #[serde(skip_serializing_if = "StyleSheet::is_empty")]
    pub(crate) styles: StyleSheet,
    pub(crate) nodes: Vec<Node>,
    pub(crate) edges: Vec<Edge>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) groups: Vec<Group>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) meta: Option<Meta>,
}

impl Diagram {
    pub fn builder() -> DiagramBuilder {
        DiagramBuilder::new()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn styles(&self) -> &StyleSheet {
        &self.styles
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn meta(&self) -> Option<&Meta> {
        self.meta.as_ref()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// True when the diagram has nodes and every one of them carries geometry.
    pub fn is_laid_out(&self) -> bool {
        !self.nodes.is_empty() && self.nodes.iter().all(Node::is_laid_out)
    }

    /// True when at least one edge draws an arrowhead.
    pub fn is_directed(&self) -> bool {
        self.edges.is_empty() || self.edges.iter().any(|e| e.arrow)
    }

    /// A builder seeded with a copy of this diagram, for deriving a new one.
    pub fn to_builder(&self) -> DiagramBuilder {
        DiagramBuilder::from_diagram(self)
    }

    /// Decode a persisted IR document and validate it.
    pub fn from_json(text: &str) -> Result<Diagram> {
        let document: DiagramDocument = serde_json::from_str(text)?;
        document.into_builder().build()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_label_defaults_to_id() {
        let node = Node::new("A");
        assert_eq!(node.label(), "A");
        assert_eq!(node.clone().with_label("Alpha").label(), "Alpha");
    }

    #[test]
    fn overlay_only_replaces_set_fields() {
        let mut base = StyleAttrs {
            fill: Some("#fff".into()),
            stroke: Some("#000".into()),
            ..Default::default()
        };
        base.overlay(&StyleAttrs {
            fill: Some("#ff0".into()),
            ..Default::default()
        });
        assert_eq!(base.fill.as_deref(), Some("#ff0"));
        assert_eq!(base.stroke.as_deref(), Some("#000"));
    }

    #[test]
    fn serialization_omits_inferable_fields() {
        let diagram = Diagram::builder()
            .node(Node::new("A"))
            .node(Node::new("B"))
            .edge(Edge::new("A", "B"))
            .build()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&diagram.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "nodes": [{"id": "A"}, {"id": "B"}],
                "edges": [{"from": "A", "to": "B"}]
            })
        );
    }

    #[test]
    fn empty_node_and_edge_lists_are_still_written() {
        let diagram = Diagram::builder().build().unwrap();
        let value: serde_json::Value = serde_json::from_str(&diagram.to_json().unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({"nodes": [], "edges": []}));
    }

    #[test]
    fn undirected_edge_serializes_arrow_false() {
        let edge = Edge::new("A", "B").undirected();
        let value = serde_json::to_value(&edge).unwrap();
        assert_eq!(value, serde_json::json!({"from": "A", "to": "B", "arrow": false}));
    }

    #[test]
    fn orientation_accepts_td_alias() {
        assert_eq!(Orientation::from_str("td"), Some(Orientation::TB));
        assert_eq!(Orientation::from_str("XY"), None);
    }
}
