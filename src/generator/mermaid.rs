//! Mermaid flowchart generator

use lazy_static::lazy_static;
use regex::Regex;

use super::{NodeNames, SafeNames};
use crate::style::{self, format_number, StyleTarget};
use crate::types::{DashStyle, Diagram, Edge, Group, NodeShape, StyleAttrs};

lazy_static! {
    static ref RE_PLAIN_ID: Regex = Regex::new(r"^\w+(?:-\w+)*$").unwrap();
}

/// Width the `==>` token stands for.
const THICK_WIDTH: f64 = 3.0;

/// Words that open a statement when they start a line.
const KEYWORDS: &[&str] = &[
    "end", "subgraph", "click", "style", "class", "classDef", "linkStyle", "direction",
];

fn is_node_name(id: &str) -> bool {
    RE_PLAIN_ID.is_match(id)
        && !KEYWORDS.contains(&id)
        && !id.starts_with("accTitle")
        && !id.starts_with("accDescr")
}

fn is_class_name(name: &str) -> bool {
    RE_PLAIN_ID.is_match(name) && name != "default"
}

fn group_ids(groups: &[Group]) -> Vec<&str> {
    let mut ids = Vec::new();
    for group in groups {
        ids.push(group.id.as_str());
        ids.extend(group_ids(&group.groups));
    }
    ids
}

pub fn generate(diagram: &Diagram) -> String {
    let names = NodeNames::new(diagram, is_node_name);
    let sheet = diagram.styles();
    let classes = SafeNames::new(
        sheet
            .classes
            .keys()
            .map(String::as_str)
            .chain(diagram.nodes().iter().filter_map(|n| n.class.as_deref())),
        is_class_name,
    );
    let groups = SafeNames::new(group_ids(diagram.groups()), |id| RE_PLAIN_ID.is_match(id));
    let mut lines: Vec<String> = Vec::new();

    if let Some(title) = diagram.title() {
        lines.push("---".to_string());
        lines.push(format!("title: {}", title.replace('\n', " ")));
        lines.push("---".to_string());
    }
    lines.push(format!("flowchart {}", diagram.orientation().as_str()));

    // Class definitions
    if let Some(css) = css(&sheet.defaults.node) {
        lines.push(format!("    classDef default {}", css));
    }
    for (name, attrs) in &sheet.classes {
        if let Some(css) = css(attrs) {
            lines.push(format!("    classDef {} {}", classes.get(name), css));
        }
    }

    // Nodes, in declaration order
    let mut node_styles = Vec::new();
    for node in diagram.nodes() {
        let name = names.get(&node.id);
        let resolved = style::resolve_node(node, sheet);
        let mut decl = name.to_string();
        if node.shape.is_some()
            || node.label.is_some()
            || names.is_renamed(&node.id)
            || resolved.shape != NodeShape::Rect
        {
            let (open, close) = delimiters(resolved.shape);
            decl.push_str(&format!("{}\"{}\"{}", open, escape_label(node.label()), close));
        }
        let form = style::minimal_form(
            StyleTarget::Node,
            &node.explicit_style(),
            node.class.as_deref(),
            sheet,
        );
        if let Some(class) = node.class.as_deref() {
            // kept even when undeclared so the reference survives
            decl.push_str(":::");
            decl.push_str(classes.get(class));
        }
        lines.push(format!("    {}", decl));
        if let Some(css) = css(&form.inline) {
            node_styles.push(format!("    style {} {}", name, css));
        }
    }

    // Subgraphs reference nodes declared above
    for group in diagram.groups() {
        push_group(&mut lines, group, &names, &groups, 1);
    }

    // Edges
    let mut link_styles = Vec::new();
    for (index, edge) in diagram.edges().iter().enumerate() {
        let mut inline = style::flattened_form(StyleTarget::Edge, &edge.explicit_style(), None, sheet);
        let token = link_token(edge, &mut inline);
        let label = edge
            .label
            .as_deref()
            .map(|l| format!("|{}|", escape_label(l)))
            .unwrap_or_default();
        lines.push(format!(
            "    {} {}{} {}",
            names.get(&edge.from),
            token,
            label,
            names.get(&edge.to)
        ));
        if let Some(css) = css(&inline) {
            link_styles.push(format!("    linkStyle {} {}", index, css));
        }
    }

    if let Some(css) = css(&sheet.defaults.edge) {
        lines.push(format!("    linkStyle default {}", css));
    }
    lines.extend(link_styles);
    lines.extend(node_styles);
    push_group_styles(&mut lines, diagram.groups(), &groups);

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn push_group(
    lines: &mut Vec<String>,
    group: &Group,
    names: &NodeNames<'_>,
    groups: &SafeNames<'_>,
    depth: usize,
) {
    let indent = "    ".repeat(depth);
    let id = groups.get(&group.id);
    // a renamed group keeps its original id as the visible label
    let label = group
        .label
        .as_deref()
        .or_else(|| groups.is_renamed(&group.id).then_some(group.id.as_str()));
    match label {
        Some(label) => lines.push(format!("{}subgraph {}[\"{}\"]", indent, id, escape_label(label))),
        None => lines.push(format!("{}subgraph {}", indent, id)),
    }
    for node in &group.nodes {
        lines.push(format!("{}    {}", indent, names.get(node)));
    }
    for child in &group.groups {
        push_group(lines, child, names, groups, depth + 1);
    }
    lines.push(format!("{}end", indent));
}

fn push_group_styles(lines: &mut Vec<String>, groups: &[Group], names: &SafeNames<'_>) {
    for group in groups {
        if let Some(fill) = &group.fill {
            lines.push(format!("    style {} fill:{}", names.get(&group.id), fill));
        }
        push_group_styles(lines, &group.groups, names);
    }
}

/// Pick the link token for an edge. Fields the token already implies are
/// taken out of `inline`; what remains goes to `linkStyle`.
fn link_token(edge: &Edge, inline: &mut StyleAttrs) -> &'static str {
    if inline.dash == Some(DashStyle::Dotted) {
        inline.dash = None;
        return if edge.arrow { "-.->" } else { "-.-" };
    }
    if inline.stroke_width == Some(THICK_WIDTH) {
        inline.stroke_width = None;
        return if edge.arrow { "==>" } else { "===" };
    }
    if edge.arrow {
        "-->"
    } else {
        "---"
    }
}

fn delimiters(shape: NodeShape) -> (&'static str, &'static str) {
    match shape {
        NodeShape::Rect => ("[", "]"),
        NodeShape::Rounded => ("(", ")"),
        NodeShape::Stadium => ("([", "])"),
        NodeShape::Subroutine => ("[[", "]]"),
        NodeShape::Cylinder => ("[(", ")]"),
        NodeShape::Circle => ("((", "))"),
        NodeShape::DoubleCircle => ("(((", ")))"),
        NodeShape::Ellipse => ("([", "])"),
        NodeShape::Diamond => ("{", "}"),
        NodeShape::Hexagon => ("{{", "}}"),
        NodeShape::Parallelogram => ("[/", "/]"),
        NodeShape::Trapezoid => ("[/", "\\]"),
        NodeShape::Text => ("[", "]"),
    }
}

/// CSS for the fields Mermaid can style; `None` when nothing is set.
fn css(attrs: &StyleAttrs) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(fill) = &attrs.fill {
        parts.push(format!("fill:{}", fill));
    }
    if let Some(stroke) = &attrs.stroke {
        parts.push(format!("stroke:{}", stroke));
    }
    if let Some(width) = attrs.stroke_width {
        parts.push(format!("stroke-width:{}px", format_number(width)));
    }
    if let Some(dash) = attrs.dash {
        let pattern = match dash {
            DashStyle::Solid => "0",
            DashStyle::Dashed => "5 5",
            DashStyle::Dotted => "2 2",
        };
        parts.push(format!("stroke-dasharray:{}", pattern));
    }
    (!parts.is_empty()).then(|| parts.join(","))
}

fn escape_label(label: &str) -> String {
    label
        .replace('"', "#quot;")
        .replace('|', "#124;")
        .replace('\n', "<br>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::mermaid::parse;
    use crate::types::Node;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_minimal_output() {
        let diagram = Diagram::builder()
            .node(Node::new("A").with_label("Alpha").with_shape(NodeShape::Rect))
            .node(Node::new("B"))
            .edge(Edge::new("A", "B"))
            .build()
            .unwrap();
        assert_eq!(
            generate(&diagram),
            "flowchart TB\n    A[\"Alpha\"]\n    B\n    A --> B\n"
        );
    }

    #[test]
    fn test_link_tokens_and_link_styles() {
        let mut dotted = Edge::new("A", "B");
        dotted.dash = Some(DashStyle::Dotted);
        let mut thick = Edge::new("A", "B").undirected();
        thick.stroke_width = Some(3.0);
        let mut red = Edge::new("B", "A").with_label("a|b");
        red.stroke = Some("#f00".into());
        let diagram = Diagram::builder()
            .node(Node::new("A"))
            .node(Node::new("B"))
            .edges([dotted, thick, red])
            .build()
            .unwrap();
        let text = generate(&diagram);
        assert!(text.contains("    A -.-> B\n"));
        assert!(text.contains("    A === B\n"));
        assert!(text.contains("    B -->|a#124;b| A\n"));
        assert!(text.contains("    linkStyle 2 stroke:#f00\n"));
    }

    #[test]
    fn test_class_reference_and_inline_override() {
        let mut sheet = crate::types::StyleSheet::default();
        sheet.classes.insert(
            "hot".into(),
            StyleAttrs {
                fill: Some("#f00".into()),
                ..Default::default()
            },
        );
        let mut node = Node::new("A").with_class("hot");
        node.fill = Some("#f00".into());
        node.stroke = Some("#000".into());
        node.stroke_width = Some(2.0);
        let diagram = Diagram::builder().styles(sheet).node(node).build().unwrap();
        let text = generate(&diagram);
        assert!(text.contains("    classDef hot fill:#f00\n"));
        assert!(text.contains("    A:::hot\n"));
        // fill comes from the class, stroke equals the base
        assert!(text.contains("    style A stroke-width:2px\n"));
    }

    #[test]
    fn test_unspellable_ids_are_renamed_with_label() {
        let diagram = Diagram::builder()
            .node(Node::new("my node"))
            .node(Node::new("end"))
            .edge(Edge::new("my node", "end"))
            .build()
            .unwrap();
        let text = generate(&diagram);
        assert!(text.contains("    n0[\"my node\"]\n"));
        assert!(text.contains("    n1[\"end\"]\n"));
        assert!(text.contains("    n0 --> n1\n"));
        let back = parse(&text).unwrap().diagram;
        assert_eq!(back.nodes()[0].label(), "my node");
    }

    #[test]
    fn test_keyword_ids_are_renamed() {
        let ids = ["subgraph", "click", "style", "class", "classDef", "linkStyle", "direction", "b"];
        let diagram = Diagram::builder()
            .nodes(ids.iter().map(|id| Node::new(*id)))
            .edges(ids.windows(2).map(|pair| Edge::new(pair[0], pair[1])))
            .build()
            .unwrap();
        let text = generate(&diagram);
        assert!(text.contains("    n0[\"subgraph\"]\n"));
        assert!(text.contains("    n1 --> n2\n"));
        let back = parse(&text).unwrap().diagram;
        let labels: Vec<&str> = back.nodes().iter().map(Node::label).collect();
        assert_eq!(labels, ids);
        assert_eq!(back.edges().len(), ids.len() - 1);
    }

    #[test]
    fn test_spaced_class_names_are_sanitised() {
        let mut sheet = crate::types::StyleSheet::default();
        let red = StyleAttrs {
            fill: Some("red".into()),
            ..Default::default()
        };
        sheet.classes.insert("main node".into(), red.clone());
        sheet.classes.insert("default".into(), red);
        let diagram = Diagram::builder()
            .styles(sheet)
            .node(Node::new("a").with_class("main node"))
            .node(Node::new("b").with_class("default"))
            .edge(Edge::new("a", "b"))
            .build()
            .unwrap();
        let text = generate(&diagram);
        assert!(text.contains("    classDef main_node fill:red\n"));
        assert!(text.contains("    a:::main_node\n"));
        assert!(text.contains("    classDef default_ fill:red\n"));
        let back = parse(&text).unwrap().diagram;
        assert_eq!(back.node("a").unwrap().class.as_deref(), Some("main_node"));
        assert_eq!(back.styles().classes["main_node"].fill.as_deref(), Some("red"));
        assert!(back.styles().defaults.node.is_empty());
    }

    #[test]
    fn test_spaced_group_id_keeps_label() {
        let mut group = Group::new("my group");
        group.nodes = vec!["a".into()];
        group.fill = Some("#eee".into());
        let diagram = Diagram::builder()
            .node(Node::new("a"))
            .group(group)
            .build()
            .unwrap();
        let text = generate(&diagram);
        assert!(text.contains("    subgraph my_group[\"my group\"]\n"));
        assert!(text.contains("    style my_group fill:#eee\n"));
        let back = parse(&text).unwrap().diagram;
        assert_eq!(back.groups()[0].id, "my_group");
        assert_eq!(back.groups()[0].label.as_deref(), Some("my group"));
        assert_eq!(back.groups()[0].fill.as_deref(), Some("#eee"));
    }

    #[test]
    fn test_groups_and_title_round_trip() {
        let mut inner = Group::new("inner");
        inner.nodes = vec!["B".into()];
        let mut outer = Group::new("outer");
        outer.label = Some("Outer \"box\"".into());
        outer.nodes = vec!["A".into()];
        outer.fill = Some("#eee".into());
        outer.groups = vec![inner];
        let diagram = Diagram::builder()
            .title(Some("Flow".into()))
            .node(Node::new("A").with_shape(NodeShape::Diamond))
            .node(Node::new("B").with_label("two\nlines"))
            .edge(Edge::new("A", "B"))
            .group(outer)
            .build()
            .unwrap();
        let back = parse(&generate(&diagram)).unwrap().diagram;
        assert_eq!(back.title(), Some("Flow"));
        assert_eq!(back.groups(), diagram.groups());
        assert_eq!(back.node("A").unwrap().shape, Some(NodeShape::Diamond));
        assert_eq!(back.node("B").unwrap().label(), "two\nlines");
    }
}
