//! Single-pass diagram assembly with a final validation step.
//!
//! Parsers, the geometry merge and IR decoding all go through
//! [`DiagramBuilder::build`], so no consumer ever observes a [`Diagram`] that
//! breaks an invariant: unique IDs, resolvable references, acyclic non-empty
//! groups, and per-diagram all-or-nothing geometry.

use serde::Deserialize;
use std::collections::HashSet;

use crate::error::{ConvertError, Result};
use crate::types::{Diagram, Edge, Group, Meta, Node, Orientation, StyleSheet};

#[derive(Debug, Clone, Default)]
pub struct DiagramBuilder {
    title: Option<String>,
    orientation: Orientation,
    styles: StyleSheet,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    groups: Vec<Group>,
    meta: Option<Meta>,
}

impl DiagramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_diagram(diagram: &Diagram) -> Self {
        Self {
            title: diagram.title.clone(),
            orientation: diagram.orientation,
            styles: diagram.styles.clone(),
            nodes: diagram.nodes.clone(),
            edges: diagram.edges.clone(),
            groups: diagram.groups.clone(),
            meta: diagram.meta.clone(),
        }
    }

    pub fn title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn styles(mut self, styles: StyleSheet) -> Self {
        self.styles = styles;
        self
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn nodes(mut self, nodes: impl IntoIterator<Item = Node>) -> Self {
        self.nodes.extend(nodes);
        self
    }

    pub fn edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn edges(mut self, edges: impl IntoIterator<Item = Edge>) -> Self {
        self.edges.extend(edges);
        self
    }

    pub fn group(mut self, group: Group) -> Self {
        self.groups.push(group);
        self
    }

    pub fn groups(mut self, groups: impl IntoIterator<Item = Group>) -> Self {
        self.groups.extend(groups);
        self
    }

    pub fn meta(mut self, meta: Option<Meta>) -> Self {
        self.meta = meta;
        self
    }

    /// Replace the geometry of every node. `lookup` returns `None` for nodes
    /// that should be left without layout.
    pub fn map_geometry<F>(mut self, mut lookup: F) -> Self
    where
        F: FnMut(&Node) -> Option<([f64; 2], [f64; 2])>,
    {
        for node in &mut self.nodes {
            match lookup(node) {
                Some((position, size)) => {
                    node.position = Some(position);
                    node.size = Some(size);
                }
                None => {
                    node.position = None;
                    node.size = None;
                }
            }
        }
        self
    }

    pub fn clear_geometry(self) -> Self {
        self.map_geometry(|_| None)
    }

    pub fn build(self) -> Result<Diagram> {
        validate_nodes(&self.nodes)?;
        let known: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        validate_edges(&self.edges, &known)?;
        validate_groups(&self.groups, &known)?;

        Ok(Diagram {
            title: self.title,
            orientation: self.orientation,
            styles: self.styles,
            nodes: self.nodes,
            edges: self.edges,
            groups: self.groups,
            meta: self.meta,
        })
    }
}

fn validate_nodes(nodes: &[Node]) -> Result<()> {
    let mut seen = HashSet::new();
    for node in nodes {
        if node.id.is_empty() {
            return Err(ConvertError::schema("", "node with empty id"));
        }
        if !seen.insert(node.id.as_str()) {
            return Err(ConvertError::schema(&node.id, "duplicate node id"));
        }
        match (node.position, node.size) {
            (Some(_), None) => {
                return Err(ConvertError::schema(&node.id, "partial geometry: position without size"))
            }
            (None, Some(_)) => {
                return Err(ConvertError::schema(&node.id, "partial geometry: size without position"))
            }
            (Some(position), Some(size)) => {
                if position.iter().chain(size.iter()).any(|v| !v.is_finite()) {
                    return Err(ConvertError::schema(&node.id, "non-finite geometry"));
                }
            }
            (None, None) => {}
        }
    }

    // All-or-nothing per diagram
    if let Some(first) = nodes.iter().find(|n| n.is_laid_out()) {
        if let Some(missing) = nodes.iter().find(|n| !n.is_laid_out()) {
            return Err(ConvertError::schema(
                &missing.id,
                format!(
                    "node has no geometry while '{}' is laid out; geometry must cover all nodes or none",
                    first.id
                ),
            ));
        }
    }
    Ok(())
}

fn validate_edges(edges: &[Edge], known: &HashSet<&str>) -> Result<()> {
    for edge in edges {
        for endpoint in [&edge.from, &edge.to] {
            if !known.contains(endpoint.as_str()) {
                return Err(ConvertError::schema(
                    endpoint,
                    format!("edge {} -> {} references an unknown node", edge.from, edge.to),
                ));
            }
        }
    }
    Ok(())
}

fn validate_groups(groups: &[Group], known: &HashSet<&str>) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut path: Vec<&str> = Vec::new();
    for group in groups {
        visit_group(group, known, &mut seen, &mut path)?;
    }
    Ok(())
}

/// Depth-first walk keeping the ancestor path; an ID repeated on its own path
/// means the group contains itself.
fn visit_group<'a>(
    group: &'a Group,
    known: &HashSet<&str>,
    seen: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Result<()> {
    let id = group.id.as_str();
    if id.is_empty() {
        return Err(ConvertError::schema("", "group with empty id"));
    }
    if path.contains(&id) {
        return Err(ConvertError::schema(id, "group contains itself"));
    }
    if !seen.insert(id) {
        return Err(ConvertError::schema(id, "duplicate group id"));
    }
    if group.is_empty() {
        return Err(ConvertError::schema(id, "group holds no nodes"));
    }
    let mut members = HashSet::new();
    for node_id in &group.nodes {
        if !known.contains(node_id.as_str()) {
            return Err(ConvertError::schema(
                node_id,
                format!("group '{}' references an unknown node", id),
            ));
        }
        if !members.insert(node_id.as_str()) {
            return Err(ConvertError::schema(
                node_id,
                format!("node listed twice in group '{}'", id),
            ));
        }
    }

    path.push(id);
    for child in &group.groups {
        visit_group(child, known, seen, path)?;
    }
    path.pop();
    Ok(())
}

/// Wire shape of a persisted IR document, validated into a [`Diagram`].
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct DiagramDocument {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    orientation: Orientation,
    #[serde(default)]
    styles: StyleSheet,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    #[serde(default)]
    groups: Vec<Group>,
    #[serde(default)]
    meta: Option<Meta>,
}

impl DiagramDocument {
    pub(crate) fn into_builder(self) -> DiagramBuilder {
        DiagramBuilder {
            title: self.title,
            orientation: self.orientation,
            styles: self.styles,
            nodes: self.nodes,
            edges: self.edges,
            groups: self.groups,
            meta: self.meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_nodes() -> DiagramBuilder {
        DiagramBuilder::new().node(Node::new("A")).node(Node::new("B"))
    }

    #[test]
    fn rejects_partial_geometry_across_nodes() {
        let err = DiagramBuilder::new()
            .node(Node::new("A").with_geometry([0.0, 0.0], [10.0, 10.0]))
            .node(Node::new("B"))
            .build()
            .unwrap_err();
        match err {
            ConvertError::SchemaViolation { id, .. } => assert_eq!(id, "B"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_position_without_size() {
        let mut node = Node::new("A");
        node.position = Some([1.0, 2.0]);
        let err = DiagramBuilder::new().node(node).build().unwrap_err();
        assert!(err.is_schema_violation());
    }

    #[test]
    fn accepts_fully_laid_out_diagram() {
        let diagram = DiagramBuilder::new()
            .node(Node::new("A").with_geometry([0.0, 0.0], [10.0, 10.0]))
            .node(Node::new("B").with_geometry([20.0, 0.0], [10.0, 10.0]))
            .build()
            .unwrap();
        assert!(diagram.is_laid_out());
    }

    #[test]
    fn rejects_dangling_edge() {
        let err = two_nodes().edge(Edge::new("A", "C")).build().unwrap_err();
        match err {
            ConvertError::SchemaViolation { id, .. } => assert_eq!(id, "C"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn self_loops_and_multi_edges_are_kept() {
        let diagram = two_nodes()
            .edge(Edge::new("A", "A"))
            .edge(Edge::new("A", "B"))
            .edge(Edge::new("A", "B"))
            .build()
            .unwrap();
        assert_eq!(diagram.edges().len(), 3);
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let err = DiagramBuilder::new()
            .node(Node::new("A"))
            .node(Node::new("A"))
            .build()
            .unwrap_err();
        assert!(err.is_schema_violation());
    }

    #[test]
    fn rejects_group_that_contains_itself() {
        let mut inner = Group::new("outer");
        inner.nodes.push("B".into());
        let mut middle = Group::new("middle");
        middle.groups.push(inner);
        let mut outer = Group::new("outer");
        outer.nodes.push("A".into());
        outer.groups.push(middle);

        let err = two_nodes().group(outer).build().unwrap_err();
        match err {
            ConvertError::SchemaViolation { id, message } => {
                assert_eq!(id, "outer");
                assert!(message.contains("contains itself"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_empty_group() {
        let err = two_nodes().group(Group::new("g")).build().unwrap_err();
        assert!(err.is_schema_violation());
    }

    #[test]
    fn group_with_only_nested_nodes_is_valid() {
        let mut inner = Group::new("inner");
        inner.nodes.push("A".into());
        let mut outer = Group::new("outer");
        outer.groups.push(inner);
        assert!(two_nodes().group(outer).build().is_ok());
    }

    #[test]
    fn rejects_group_with_unknown_member() {
        let mut group = Group::new("g");
        group.nodes.push("Z".into());
        let err = two_nodes().group(group).build().unwrap_err();
        match err {
            ConvertError::SchemaViolation { id, .. } => assert_eq!(id, "Z"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decodes_and_validates_json() {
        let err = Diagram::from_json(r#"{"nodes":[{"id":"A"}],"edges":[{"from":"A","to":"B"}]}"#)
            .unwrap_err();
        assert!(err.is_schema_violation());

        let err = Diagram::from_json(r#"{"edges":[]}"#).unwrap_err();
        assert!(matches!(err, ConvertError::InvalidDocument(_)));
    }
}
