//! Graphviz DOT generator
//!
//! DOT has no class construct, so classes are folded into each node's
//! attributes. The `class` attribute is still written to keep the reference.

use lazy_static::lazy_static;
use regex::Regex;

use super::{decimal, NodeNames};
use crate::geometry::{DOT_PX_PER_INCH, DOT_PX_PER_PT};
use crate::style::{self, format_number, ResolvedStyle, StyleTarget};
use crate::types::{DashStyle, Diagram, Group, NodeShape, StyleAttrs};

lazy_static! {
    static ref RE_DOT_ID: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    static ref RE_NUMERAL: Regex = Regex::new(r"^-?(?:\.[0-9]+|[0-9]+(?:\.[0-9]*)?)$").unwrap();
}

const KEYWORDS: &[&str] = &["node", "edge", "graph", "digraph", "subgraph", "strict"];

pub fn generate(diagram: &Diagram) -> String {
    let names = NodeNames::new(diagram, |id| !id.contains(['\\', '\n']));
    let sheet = diagram.styles();
    let directed = diagram.is_directed();
    let op = if directed { "->" } else { "--" };
    let mut lines: Vec<String> = Vec::new();

    lines.push(format!("{} G {{", if directed { "digraph" } else { "graph" }));
    if let Some(title) = diagram.title() {
        lines.push(format!("    label={};", quoted(title)));
    }
    if !diagram.orientation().is_default() {
        lines.push(format!("    rankdir={};", diagram.orientation().as_str()));
    }

    // Defaults; the shape is always pinned so Graphviz's ellipse never leaks in
    let default_node = style::resolve(StyleTarget::Node, &StyleAttrs::default(), None, sheet);
    let base_node = ResolvedStyle::base(StyleTarget::Node);
    let mut defaults = shape_attrs(default_node.shape);
    defaults.extend(style_entry(&default_node, &base_node, &sheet.defaults.node));
    defaults.extend(paint_attrs(&sheet.defaults.node));
    lines.push(format!("    node {};", attr_list(&defaults)));
    if !sheet.defaults.edge.is_empty() {
        lines.push(format!("    edge {};", attr_list(&edge_attrs(&sheet.defaults.edge))));
    }

    let laid_out = diagram.is_laid_out();
    for node in diagram.nodes() {
        let inline = style::flattened_form(
            StyleTarget::Node,
            &node.explicit_style(),
            node.class.as_deref(),
            sheet,
        );
        let resolved = style::resolve_node(node, sheet);
        let mut attrs = Vec::new();
        if node.label.is_some() || names.is_renamed(&node.id) {
            attrs.push(("label", quoted(node.label())));
        }
        if inline.shape.is_some() {
            attrs.extend(shape_attrs(resolved.shape));
        }
        attrs.extend(style_entry(&resolved, &base_node, &inline));
        attrs.extend(paint_attrs(&inline));
        if let Some(class) = &node.class {
            attrs.push(("class", quote_id(class)));
        }
        if laid_out {
            if let (Some([x, y]), Some([w, h])) = (node.position, node.size) {
                let pos = format!(
                    "{},{}!",
                    decimal(x / DOT_PX_PER_PT, 4),
                    decimal(y / DOT_PX_PER_PT, 4)
                );
                attrs.push(("pos", quoted(&pos)));
                attrs.push(("width", decimal(w / DOT_PX_PER_INCH, 4)));
                attrs.push(("height", decimal(h / DOT_PX_PER_INCH, 4)));
            }
        }
        let name = quote_id(names.get(&node.id));
        if attrs.is_empty() {
            lines.push(format!("    {};", name));
        } else {
            lines.push(format!("    {} {};", name, attr_list(&attrs)));
        }
    }

    for group in diagram.groups() {
        push_cluster(&mut lines, group, &names, 1);
    }

    for edge in diagram.edges() {
        let inline = style::flattened_form(StyleTarget::Edge, &edge.explicit_style(), None, sheet);
        let mut attrs = Vec::new();
        if let Some(label) = &edge.label {
            attrs.push(("label", quoted(label)));
        }
        attrs.extend(edge_attrs(&inline));
        if directed && !edge.arrow {
            attrs.push(("dir", "none".to_string()));
        }
        let head = format!(
            "    {} {} {}",
            quote_id(names.get(&edge.from)),
            op,
            quote_id(names.get(&edge.to))
        );
        if attrs.is_empty() {
            lines.push(format!("{};", head));
        } else {
            lines.push(format!("{} {};", head, attr_list(&attrs)));
        }
    }

    lines.push("}".to_string());
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn push_cluster(lines: &mut Vec<String>, group: &Group, names: &NodeNames<'_>, depth: usize) {
    let indent = "    ".repeat(depth);
    lines.push(format!(
        "{}subgraph {} {{",
        indent,
        quote_id(&format!("cluster_{}", group.id))
    ));
    if let Some(label) = &group.label {
        lines.push(format!("{}    label={};", indent, quoted(label)));
    }
    if let Some(fill) = &group.fill {
        lines.push(format!("{}    style=filled;", indent));
        lines.push(format!("{}    fillcolor={};", indent, quote_id(fill)));
    }
    for node in &group.nodes {
        lines.push(format!("{}    {};", indent, quote_id(names.get(node))));
    }
    for child in &group.groups {
        push_cluster(lines, child, names, depth + 1);
    }
    lines.push(format!("{}}}", indent));
}

fn shape_attrs(shape: NodeShape) -> Vec<(&'static str, String)> {
    let name = match shape {
        NodeShape::Rect | NodeShape::Rounded | NodeShape::Stadium => "box",
        NodeShape::Subroutine => "component",
        NodeShape::Cylinder => "cylinder",
        NodeShape::Circle => "circle",
        NodeShape::DoubleCircle => "doublecircle",
        NodeShape::Ellipse => "ellipse",
        NodeShape::Diamond => "diamond",
        NodeShape::Hexagon => "hexagon",
        NodeShape::Parallelogram => "parallelogram",
        NodeShape::Trapezoid => "trapezium",
        NodeShape::Text => "plaintext",
    };
    vec![("shape", name.to_string())]
}

/// The `style` list. It is written when `inline` changes any flag and then
/// carries every flag of the resolved style, since DOT replaces the list whole.
fn style_entry(
    resolved: &ResolvedStyle,
    base: &ResolvedStyle,
    inline: &StyleAttrs,
) -> Option<(&'static str, String)> {
    if inline.fill.is_none() && inline.dash.is_none() && inline.shape.is_none() {
        return None;
    }
    let mut flags = Vec::new();
    if matches!(resolved.shape, NodeShape::Rounded | NodeShape::Stadium) {
        flags.push("rounded");
    }
    if resolved.fill != base.fill {
        flags.push("filled");
    }
    match resolved.dash {
        DashStyle::Dashed => flags.push("dashed"),
        DashStyle::Dotted => flags.push("dotted"),
        DashStyle::Solid if inline.dash.is_some() => flags.push("solid"),
        DashStyle::Solid => {}
    }
    (!flags.is_empty()).then(|| ("style", quote_id(&flags.join(","))))
}

fn paint_attrs(attrs: &StyleAttrs) -> Vec<(&'static str, String)> {
    let mut out = Vec::new();
    if let Some(fill) = &attrs.fill {
        out.push(("fillcolor", quote_id(fill)));
    }
    if let Some(stroke) = &attrs.stroke {
        out.push(("color", quote_id(stroke)));
    }
    if let Some(width) = attrs.stroke_width {
        out.push(("penwidth", format_number(width)));
    }
    out
}

fn edge_attrs(attrs: &StyleAttrs) -> Vec<(&'static str, String)> {
    let mut out = Vec::new();
    if let Some(stroke) = &attrs.stroke {
        out.push(("color", quote_id(stroke)));
    }
    if let Some(width) = attrs.stroke_width {
        out.push(("penwidth", format_number(width)));
    }
    if let Some(dash) = attrs.dash {
        let style = match dash {
            DashStyle::Solid => "solid",
            DashStyle::Dashed => "dashed",
            DashStyle::Dotted => "dotted",
        };
        out.push(("style", style.to_string()));
    }
    out
}

fn attr_list(attrs: &[(&str, String)]) -> String {
    let parts: Vec<String> = attrs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("[{}]", parts.join(", "))
}

/// An ID as written: bare when the grammar allows it, quoted otherwise.
fn quote_id(text: &str) -> String {
    let keyword = KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(text));
    if !keyword && (RE_DOT_ID.is_match(text) || RE_NUMERAL.is_match(text)) {
        text.to_string()
    } else {
        quoted(text)
    }
}

fn quoted(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("\"{}\"", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::dot::parse;
    use crate::types::{Edge, Node, Orientation};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_minimal_output() {
        let diagram = Diagram::builder()
            .node(Node::new("A").with_label("Start"))
            .node(Node::new("B"))
            .edge(Edge::new("A", "B"))
            .build()
            .unwrap();
        assert_eq!(
            generate(&diagram),
            "digraph G {\n    node [shape=box];\n    A [label=\"Start\"];\n    B;\n    A -> B;\n}\n"
        );
    }

    #[test]
    fn test_undirected_edges_make_a_graph() {
        let diagram = Diagram::builder()
            .node(Node::new("a"))
            .node(Node::new("b"))
            .edge(Edge::new("a", "b").undirected())
            .build()
            .unwrap();
        let text = generate(&diagram);
        assert!(text.starts_with("graph G {\n"));
        assert!(text.contains("    a -- b;\n"));
        assert!(!parse(&text).unwrap().diagram.edges()[0].arrow);
    }

    #[test]
    fn test_mixed_direction_uses_dir_none() {
        let diagram = Diagram::builder()
            .node(Node::new("a"))
            .node(Node::new("b"))
            .edges([Edge::new("a", "b"), Edge::new("b", "a").undirected()])
            .build()
            .unwrap();
        let text = generate(&diagram);
        assert!(text.starts_with("digraph G {\n"));
        assert!(text.contains("    b -> a [dir=none];\n"));
        let back = parse(&text).unwrap().diagram;
        assert!(back.edges()[0].arrow);
        assert!(!back.edges()[1].arrow);
    }

    #[test]
    fn test_ids_are_quoted_when_needed() {
        assert_eq!(quote_id("plain_id"), "plain_id");
        assert_eq!(quote_id("-1.5"), "-1.5");
        assert_eq!(quote_id("two words"), "\"two words\"");
        assert_eq!(quote_id("Node"), "\"Node\"");
        assert_eq!(quote_id("#f00"), "\"#f00\"");
        assert_eq!(quoted("say \"hi\"\nnow"), "\"say \\\"hi\\\"\\nnow\"");
    }

    #[test]
    fn test_classes_fold_into_attributes() {
        let mut sheet = crate::types::StyleSheet::default();
        sheet.classes.insert(
            "hot".into(),
            StyleAttrs {
                fill: Some("#f00".into()),
                shape: Some(NodeShape::Rounded),
                ..Default::default()
            },
        );
        let diagram = Diagram::builder()
            .styles(sheet)
            .node(Node::new("A").with_class("hot"))
            .build()
            .unwrap();
        let text = generate(&diagram);
        assert!(text.contains(
            "    A [shape=box, style=\"rounded,filled\", fillcolor=\"#f00\", class=hot];\n"
        ));
        let back = parse(&text).unwrap().diagram;
        let original = style::resolve_node(&diagram.nodes()[0], diagram.styles());
        assert_eq!(style::resolve_node(&back.nodes()[0], back.styles()), original);
    }

    #[test]
    fn test_clusters_title_and_orientation_round_trip() {
        let mut inner = Group::new("inner");
        inner.nodes = vec!["b".into()];
        let mut outer = Group::new("outer");
        outer.label = Some("Outer".into());
        outer.fill = Some("lightblue".into());
        outer.nodes = vec!["a".into()];
        outer.groups = vec![inner];
        let diagram = Diagram::builder()
            .title(Some("Flow \"1\"".into()))
            .orientation(Orientation::LR)
            .node(Node::new("a"))
            .node(Node::new("b"))
            .edge(Edge::new("a", "b").with_label("go"))
            .group(outer)
            .build()
            .unwrap();
        let back = parse(&generate(&diagram)).unwrap().diagram;
        assert_eq!(back.title(), Some("Flow \"1\""));
        assert_eq!(back.orientation(), Orientation::LR);
        assert_eq!(back.groups(), diagram.groups());
        assert_eq!(back.edges()[0].label.as_deref(), Some("go"));
    }

    #[test]
    fn test_geometry_written_only_when_laid_out() {
        let partial = Diagram::builder()
            .node(Node::new("a"))
            .build()
            .unwrap();
        assert!(!generate(&partial).contains("pos="));

        let laid_out = Diagram::builder()
            .node(Node::new("a").with_geometry([100.0, 50.0], [96.0, 48.0]))
            .build()
            .unwrap();
        let text = generate(&laid_out);
        assert!(text.contains("    a [pos=\"75,37.5!\", width=1, height=0.5];\n"));
        let parsed = parse(&text).unwrap();
        assert_eq!(parsed.explicit_positions["a"], [100.0, 50.0]);
    }
}
