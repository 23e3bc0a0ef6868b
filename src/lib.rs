//! diagir - Convert Mermaid, TikZ and Graphviz DOT diagrams to one
//! intermediate representation (IR) and back
//!
//! Parsing produces a geometry-free [`Diagram`]. With a [`RenderInvoker`]
//! attached, the [`Pipeline`] also merges node placement reported by the
//! external renderer into canonical y-down pixel space.
//!
//! # Example
//!
//! ```rust
//! use diagir::{convert, generate, FormatKind};
//!
//! let diagram = convert("graph LR\n  A[\"Alpha\"] --> B", None).unwrap();
//! assert_eq!(diagram.nodes().len(), 2);
//!
//! let dot = generate(&diagram, FormatKind::Dot);
//! assert!(dot.starts_with("digraph"));
//! ```
//!
//! # Supported Formats
//!
//! - Mermaid flowcharts (`graph TD` / `flowchart LR`)
//! - TikZ pictures (`\begin{tikzpicture}`), optionally inside a LaTeX document
//! - Graphviz DOT (`graph` / `digraph`)

pub mod builder;
pub mod error;
pub mod generator;
pub mod geometry;
pub mod parser;
pub mod pipeline;
pub mod style;
pub mod types;

pub use builder::DiagramBuilder;
pub use error::{ConvertError, Result, SourcePos};
pub use parser::{detect_format, parse, ParsedSource};
pub use pipeline::{
    Conversion, ConvertOptions, GeometryStatus, Pipeline, RenderFailure, RenderInvoker,
    RenderRequest, SourceInput,
};
pub use types::*;

/// Parse diagram source into the IR, without geometry.
///
/// # Arguments
/// * `input` - Mermaid, TikZ or DOT text
/// * `format` - Source format; detected from the text when `None`
///
/// # Example
/// ```rust
/// let diagram = diagir::convert("digraph { a -> b }", None).unwrap();
/// assert!(diagram.edges()[0].arrow);
/// ```
pub fn convert(input: &str, format: Option<FormatKind>) -> Result<Diagram> {
    let format = match format {
        Some(format) => format,
        None => detect_format(input, None)?,
    };
    parse(input, format)
}

/// Emit `diagram` as source text in `format`.
pub fn generate(diagram: &Diagram, format: FormatKind) -> String {
    generator::generate(diagram, format)
}

/// Source text to the persisted IR document.
///
/// # Example
/// ```rust
/// let json = diagir::to_ir_json("graph TD\n  A --> B", None).unwrap();
/// assert!(json.contains("\"from\": \"A\""));
/// ```
pub fn to_ir_json(input: &str, format: Option<FormatKind>) -> Result<String> {
    convert(input, format)?.to_json()
}

/// Persisted IR document to source text.
pub fn from_ir_json(json: &str, format: FormatKind) -> Result<String> {
    let diagram = Diagram::from_json(json)?;
    Ok(generate(&diagram, format))
}
