//! Integration tests using test data fixtures
//!
//! Each file in testdata/ir/ holds diagram source, a `---` separator line and
//! the IR document the source must parse to. Every fixture gets its own test
//! function. Run all tests with: cargo test

use diagir::style::{resolve_edge, resolve_node, ResolvedStyle};
use diagir::{
    convert, generate, ConvertOptions, Diagram, Edge, FormatKind, GeometryStatus, Group, Node,
    NodeShape, Orientation, Pipeline, RenderFailure, RenderInvoker, RenderRequest, StyleAttrs,
    StyleSheet,
};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Get the path to the IR fixture directory
fn get_ir_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata/ir")
}

/// Parse a test file into (input, expected_document)
///
/// Splits on the last separator so Mermaid front matter can use `---` too.
fn parse_test_file(content: &str) -> Option<(String, String)> {
    let (input, expected) = content.rsplit_once("\n---\n")?;
    Some((input.to_string(), expected.trim_end().to_string()))
}

/// Run the fixture `testdata/ir/<test_name>.txt`
fn run_ir_test(test_name: &str) {
    let test_file = get_ir_dir().join(format!("{}.txt", test_name));
    let content = fs::read_to_string(&test_file)
        .unwrap_or_else(|e| panic!("Failed to read {:?}: {}", test_file, e));

    let (input, expected) = parse_test_file(&content)
        .unwrap_or_else(|| panic!("Failed to parse test file: {:?}", test_file));

    let actual = convert(&input, None)
        .unwrap_or_else(|e| panic!("Failed to convert {}: {}", test_name, e));
    let expected = Diagram::from_json(&expected)
        .unwrap_or_else(|e| panic!("Invalid expected document in {}: {}", test_name, e));

    assert_eq!(actual, expected, "IR mismatch for test: {}", test_name);

    // The persisted form reads back to the same diagram
    let json = actual.to_json().unwrap();
    assert_eq!(Diagram::from_json(&json).unwrap(), actual);
}

/// Macro to generate IR fixture test functions
macro_rules! ir_test {
    ($name:ident) => {
        paste::paste! {
            #[test]
            fn [<ir_ $name>]() {
                run_ir_test(stringify!($name));
            }
        }
    };
}

// =============================================================================
// IR fixtures (6 files)
// =============================================================================

ir_test!(dot_clusters);
ir_test!(dot_undirected);
ir_test!(mermaid_basic);
ir_test!(mermaid_styles);
ir_test!(mermaid_subgraphs);
ir_test!(tikz_scopes);

// =============================================================================
// Round trips through each generator
// =============================================================================

/// A diagram using only features every format carries.
fn sample_diagram() -> Diagram {
    let mut sheet = StyleSheet::default();
    sheet.defaults.node.fill = Some("#f8f8f8".to_string());
    sheet.defaults.edge.stroke = Some("#555555".to_string());
    sheet.classes.insert(
        "warn".to_string(),
        StyleAttrs {
            fill: Some("#ffcc00".to_string()),
            stroke: Some("#aa8800".to_string()),
            ..Default::default()
        },
    );

    let mut store = Node::new("store")
        .with_label("Data store")
        .with_shape(NodeShape::Cylinder);
    store.stroke_width = Some(2.0);
    let mut done = Node::new("done").with_shape(NodeShape::Circle);
    done.fill = Some("#ccffcc".to_string());

    let mut dotted = Edge::new("check", "done").with_label("no");
    dotted.dash = Some(diagir::DashStyle::Dotted);
    let mut heavy = Edge::new("store", "done").undirected();
    heavy.stroke = Some("#0000ff".to_string());
    heavy.stroke_width = Some(3.0);

    let mut inner = Group::new("inner");
    inner.nodes = vec!["store".to_string()];
    let mut main = Group::new("main");
    main.label = Some("Main flow".to_string());
    main.fill = Some("#eeeeff".to_string());
    main.nodes = vec!["start".to_string(), "check".to_string()];
    main.groups = vec![inner];

    Diagram::builder()
        .title(Some("Round trip".to_string()))
        .orientation(Orientation::LR)
        .styles(sheet)
        .node(Node::new("start").with_label("Start here").with_shape(NodeShape::Rounded))
        .node(
            Node::new("check")
                .with_label("Valid?")
                .with_shape(NodeShape::Diamond)
                .with_class("warn"),
        )
        .node(store)
        .node(done)
        .node(Node::new("hex").with_label("Six sides").with_shape(NodeShape::Hexagon))
        .edge(Edge::new("start", "check"))
        .edge(Edge::new("check", "store").with_label("yes"))
        .edge(dotted)
        .edge(heavy)
        .edge(Edge::new("hex", "hex"))
        .group(main)
        .build()
        .unwrap()
}

#[derive(Debug, PartialEq)]
struct NodeView {
    id: String,
    label: String,
    style: ResolvedStyle,
}

#[derive(Debug, PartialEq)]
struct EdgeView {
    from: String,
    to: String,
    label: Option<String>,
    arrow: bool,
    style: ResolvedStyle,
}

#[derive(Debug, PartialEq)]
struct GroupView {
    id: String,
    label: Option<String>,
    fill: Option<String>,
    nodes: Vec<String>,
    groups: Vec<GroupView>,
}

/// What survives a trip through a generator and back: resolved appearance
/// rather than the layering that produced it.
#[derive(Debug, PartialEq)]
struct StructuralView {
    title: Option<String>,
    orientation: Orientation,
    nodes: Vec<NodeView>,
    edges: Vec<EdgeView>,
    groups: Vec<GroupView>,
}

fn group_view(group: &Group, decorated: bool) -> GroupView {
    GroupView {
        id: group.id.clone(),
        label: group.label.clone().filter(|_| decorated),
        fill: group.fill.clone().filter(|_| decorated),
        nodes: group.nodes.clone(),
        groups: group.groups.iter().map(|g| group_view(g, decorated)).collect(),
    }
}

fn structural_view(diagram: &Diagram, format: FormatKind) -> StructuralView {
    // TikZ has no place for a title or group decoration
    let decorated = format != FormatKind::Tikz;
    let mut nodes: Vec<NodeView> = diagram
        .nodes()
        .iter()
        .map(|n| NodeView {
            id: n.id.clone(),
            label: n.label().to_string(),
            style: resolve_node(n, diagram.styles()),
        })
        .collect();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));

    StructuralView {
        title: diagram.title().map(str::to_string).filter(|_| decorated),
        orientation: diagram.orientation(),
        nodes,
        edges: diagram
            .edges()
            .iter()
            .map(|e| EdgeView {
                from: e.from.clone(),
                to: e.to.clone(),
                label: e.label.clone(),
                arrow: e.arrow,
                style: resolve_edge(e, diagram.styles()),
            })
            .collect(),
        groups: diagram
            .groups()
            .iter()
            .map(|g| group_view(g, decorated))
            .collect(),
    }
}

fn run_round_trip(format: FormatKind) {
    let original = sample_diagram();
    let source = generate(&original, format);
    let reparsed = convert(&source, Some(format))
        .unwrap_or_else(|e| panic!("Generated {} does not parse: {}\n{}", format.as_str(), e, source));

    assert_eq!(
        structural_view(&reparsed, format),
        structural_view(&original, format),
        "round trip through {} changed the diagram:\n{}",
        format.as_str(),
        source
    );
    // Generated text is detected as the format it was written in
    assert_eq!(diagir::detect_format(&source, None).unwrap(), format);
}

/// Macro to generate round-trip test functions
macro_rules! round_trip_test {
    ($name:ident, $format:expr) => {
        paste::paste! {
            #[test]
            fn [<round_trip_ $name>]() {
                run_round_trip($format);
            }
        }
    };
}

round_trip_test!(mermaid, FormatKind::Mermaid);
round_trip_test!(dot, FormatKind::Dot);
round_trip_test!(tikz, FormatKind::Tikz);

/// Ids and names some grammars cannot spell as written.
fn awkward_names_diagram() -> Diagram {
    let mut sheet = StyleSheet::default();
    sheet.classes.insert(
        "main node".to_string(),
        StyleAttrs {
            fill: Some("#ff0000".to_string()),
            ..Default::default()
        },
    );
    let mut group = Group::new("my group");
    group.nodes = vec!["click".to_string(), "end".to_string()];

    Diagram::builder()
        .styles(sheet)
        .node(Node::new("subgraph").with_shape(NodeShape::Rounded))
        .node(Node::new("click"))
        .node(Node::new("end"))
        .node(Node::new("my node").with_class("main node"))
        .node(Node::new("b"))
        .edge(Edge::new("subgraph", "click"))
        .edge(Edge::new("click", "end"))
        .edge(Edge::new("end", "my node"))
        .edge(Edge::new("my node", "b"))
        .group(group)
        .build()
        .unwrap()
}

fn rekey_group(group: &mut GroupView, label_of: &HashMap<String, String>) {
    if let Some(label) = group.label.take() {
        group.id = label;
    }
    for node in &mut group.nodes {
        *node = label_of[node.as_str()].clone();
    }
    for child in &mut group.groups {
        rekey_group(child, label_of);
    }
}

/// The structural view with every node and group known by its visible
/// label, for formats that have to rename what they cannot spell.
fn label_keyed_view(diagram: &Diagram, format: FormatKind) -> StructuralView {
    let label_of: HashMap<String, String> = diagram
        .nodes()
        .iter()
        .map(|n| (n.id.clone(), n.label().to_string()))
        .collect();
    let mut view = structural_view(diagram, format);
    for node in &mut view.nodes {
        node.id = node.label.clone();
    }
    view.nodes.sort_by(|a, b| a.id.cmp(&b.id));
    for edge in &mut view.edges {
        edge.from = label_of[edge.from.as_str()].clone();
        edge.to = label_of[edge.to.as_str()].clone();
    }
    for group in &mut view.groups {
        rekey_group(group, &label_of);
    }
    view
}

fn run_awkward_round_trip(format: FormatKind) {
    let original = awkward_names_diagram();
    let source = generate(&original, format);
    let reparsed = convert(&source, Some(format))
        .unwrap_or_else(|e| panic!("Generated {} does not parse: {}\n{}", format.as_str(), e, source));

    assert_eq!(
        label_keyed_view(&reparsed, format),
        label_keyed_view(&original, format),
        "names did not survive {}:\n{}",
        format.as_str(),
        source
    );
    // Mermaid renames; the other grammars quote or accept the names as they are
    if format != FormatKind::Mermaid {
        assert_eq!(
            structural_view(&reparsed, format),
            structural_view(&original, format),
            "{}",
            source
        );
    }
}

macro_rules! awkward_names_test {
    ($name:ident, $format:expr) => {
        paste::paste! {
            #[test]
            fn [<awkward_names_ $name>]() {
                run_awkward_round_trip($format);
            }
        }
    };
}

awkward_names_test!(mermaid, FormatKind::Mermaid);
awkward_names_test!(dot, FormatKind::Dot);
awkward_names_test!(tikz, FormatKind::Tikz);

#[test]
fn tikz_spaced_style_converts_to_mermaid() {
    let tikz = "\\tikzset{main node/.style={fill=red}}\n\\begin{tikzpicture}\n\\node[main node] (a) {A};\n\\node[main node] (b) {B};\n\\draw[->] (a) -- (b);\n\\end{tikzpicture}\n";
    let diagram = convert(tikz, None).unwrap();
    assert_eq!(diagram.node("a").unwrap().class.as_deref(), Some("main node"));

    let mermaid = generate(&diagram, FormatKind::Mermaid);
    let back = convert(&mermaid, None).unwrap_or_else(|e| panic!("{}\n{}", e, mermaid));
    assert_eq!(back.node("a").unwrap().class.as_deref(), Some("main_node"));
    assert_eq!(resolve_node(back.node("b").unwrap(), back.styles()).fill, "red");
    assert_eq!(back.edges().len(), 1);
}

#[test]
fn cross_format_conversion_keeps_structure() {
    let mermaid = "flowchart LR\n    A[\"Alpha\"] --> B(Beta)\n    B -.-> C{Gamma}\n";
    let diagram = convert(mermaid, None).unwrap();

    let dot = generate(&diagram, FormatKind::Dot);
    let from_dot = convert(&dot, None).unwrap();
    let tikz = generate(&from_dot, FormatKind::Tikz);
    let from_tikz = convert(&tikz, None).unwrap();

    let ids: Vec<&str> = from_tikz.nodes().iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B", "C"]);
    let labels: Vec<&str> = from_tikz.nodes().iter().map(Node::label).collect();
    assert_eq!(labels, vec!["Alpha", "Beta", "Gamma"]);
    assert_eq!(
        resolve_node(&from_tikz.nodes()[2], from_tikz.styles()).shape,
        NodeShape::Diamond
    );
    assert_eq!(from_tikz.edges()[1].dash, Some(diagir::DashStyle::Dotted));
    assert_eq!(from_tikz.orientation(), Orientation::LR);
}

// =============================================================================
// Invalid documents and sources
// =============================================================================

#[test]
fn rejects_ir_with_dangling_edge() {
    let json = r#"{"nodes": [{"id": "a"}], "edges": [{"from": "a", "to": "ghost"}]}"#;
    let err = Diagram::from_json(json).unwrap_err();
    assert!(err.is_schema_violation(), "{}", err);
}

#[test]
fn rejects_ir_with_partial_geometry() {
    let json = r#"{
        "nodes": [
            {"id": "a", "position": [10, 10], "size": [20, 20]},
            {"id": "b"}
        ],
        "edges": []
    }"#;
    let err = Diagram::from_json(json).unwrap_err();
    assert!(err.is_schema_violation(), "{}", err);
}

#[test]
fn rejects_ir_with_group_containing_itself() {
    let json = r#"{
        "nodes": [{"id": "a"}],
        "edges": [],
        "groups": [{"id": "g", "nodes": ["a"], "groups": [{"id": "g", "nodes": ["a"]}]}]
    }"#;
    let err = Diagram::from_json(json).unwrap_err();
    assert!(err.is_schema_violation(), "{}", err);
}

#[test]
fn rejects_unknown_style_field() {
    let json = r#"{"nodes": [], "edges": [], "styles": {"defaults": {"node": {"glow": "red"}}}}"#;
    assert!(Diagram::from_json(json).is_err());
}

#[test]
fn reports_syntax_error_position() {
    let err = convert("digraph {\n  a -> ;\n}", Some(FormatKind::Dot)).unwrap_err();
    assert!(err.is_syntax(), "{}", err);
    assert!(err.to_string().contains("2:"), "{}", err);
}

// =============================================================================
// Pipeline with an external renderer
// =============================================================================

/// Reports every node of `graph LR; a --> b` through a DOT JSON document.
struct FixedDotLayout;

impl RenderInvoker for FixedDotLayout {
    fn render(&self, request: &RenderRequest<'_>) -> Result<String, RenderFailure> {
        assert_eq!(request.format, FormatKind::Dot);
        Ok(r#"{"objects": [
            {"name": "a", "pos": "27,18", "width": "0.75", "height": "0.5"},
            {"name": "b", "pos": "117,18", "width": "0.75", "height": "0.5"}
        ]}"#
        .to_string())
    }
}

#[test]
fn pipeline_merges_rendered_geometry() {
    let renderer = FixedDotLayout;
    let pipeline = Pipeline::new(ConvertOptions {
        record_provenance: false,
        ..Default::default()
    })
    .with_renderer(&renderer);

    let conversion = pipeline
        .convert("digraph { rankdir=LR; a -> b; }", None, None)
        .unwrap();
    assert_eq!(conversion.geometry, GeometryStatus::Complete);

    let a = conversion.diagram.node("a").unwrap();
    assert_eq!(a.position, Some([36.0, 24.0]));
    assert_eq!(a.size, Some([72.0, 48.0]));

    // Laid out diagrams pin positions when written back out
    let dot = pipeline.generate(&conversion.diagram, FormatKind::Dot);
    assert!(dot.contains("pos=\"27,18!\""), "{}", dot);
}
