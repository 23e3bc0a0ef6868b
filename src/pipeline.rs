//! Conversion coordinator
//!
//! Sequences one conversion: detect, parse, render through the external
//! collaborator, normalise, merge. Every value it touches lives only for the
//! duration of that conversion, so a batch runs its inputs on scoped threads
//! without any locking.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::generator;
use crate::geometry::{self, GeometryMap};
use crate::parser::{self, ParsedSource};
use crate::types::{Diagram, FormatKind, Meta, SourceInfo};

/// Options for [`Pipeline`]
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// How many times the render call is tried before geometry is given up. Default: 2
    pub render_attempts: u32,
    /// Time budget handed to the renderer for each attempt. Default: 30s
    pub render_timeout: Duration,
    /// Name recorded as `meta.source.name`; the input path's file name when unset.
    pub source_name: Option<String>,
    /// Write `meta.source` into converted diagrams. Default: true
    pub record_provenance: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            render_attempts: 2,
            render_timeout: Duration::from_secs(30),
            source_name: None,
            record_provenance: true,
        }
    }
}

/// What the renderer is asked to draw
#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    pub format: FormatKind,
    /// For Mermaid and DOT the source itself; for TikZ the instrumented
    /// document that dumps node anchors.
    pub source: &'a str,
    pub timeout: Duration,
}

/// Why the external renderer produced nothing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderFailure {
    #[error("renderer is not available")]
    Unavailable,
    #[error("renderer timed out")]
    TimedOut,
    #[error("renderer exited with status {0}")]
    ExitStatus(i32),
    #[error("{0}")]
    Other(String),
}

/// The external rendering process, as seen from the core. Implementations
/// must honour `request.timeout` and never block past it.
pub trait RenderInvoker: Send + Sync {
    fn render(&self, request: &RenderRequest<'_>) -> std::result::Result<String, RenderFailure>;
}

/// Outcome of the geometry stage
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryStatus {
    /// Every node carries a position and a size.
    Complete,
    /// No renderer was configured.
    Skipped,
    /// The renderer failed or its output could not be read.
    Unavailable(String),
    /// Only some nodes could be placed; all geometry was dropped.
    Discarded { positioned: usize, total: usize },
}

/// A converted diagram plus how its geometry came about
#[derive(Debug, Clone)]
pub struct Conversion {
    pub diagram: Diagram,
    pub geometry: GeometryStatus,
}

/// One input of [`Pipeline::convert_batch`]
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub text: String,
    pub format: Option<FormatKind>,
    pub path: Option<PathBuf>,
}

impl SourceInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: None,
            path: None,
        }
    }

    pub fn with_format(mut self, format: FormatKind) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

pub struct Pipeline<'r> {
    options: ConvertOptions,
    renderer: Option<&'r dyn RenderInvoker>,
}

impl Default for Pipeline<'_> {
    fn default() -> Self {
        Self::new(ConvertOptions::default())
    }
}

impl<'r> Pipeline<'r> {
    pub fn new(options: ConvertOptions) -> Self {
        Self {
            options,
            renderer: None,
        }
    }

    pub fn with_renderer(mut self, renderer: &'r dyn RenderInvoker) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Source text to IR. Only syntax and schema errors fail the call;
    /// geometry problems are reported through [`Conversion::geometry`].
    pub fn convert(
        &self,
        text: &str,
        declared: Option<FormatKind>,
        path_hint: Option<&Path>,
    ) -> Result<Conversion> {
        let format = match declared {
            Some(format) => format,
            None => parser::detect_format(text, path_hint)?,
        };
        let parsed = parser::parse_source(text, format)?;
        debug!(
            %format,
            nodes = parsed.diagram.nodes().len(),
            edges = parsed.diagram.edges().len(),
            "parsed source"
        );

        let (placements, status) = match self.renderer {
            None => (None, GeometryStatus::Skipped),
            Some(renderer) => match self.render(renderer, format, text, &parsed) {
                Ok(raw) => match geometry::normalize(format, &raw) {
                    Ok(map) => merge(&parsed, &map),
                    Err(err) => (None, GeometryStatus::Unavailable(err.to_string())),
                },
                Err(failure) => (None, GeometryStatus::Unavailable(failure.to_string())),
            },
        };
        match &status {
            GeometryStatus::Unavailable(reason) => {
                warn!(%format, reason = reason.as_str(), "continuing without geometry")
            }
            GeometryStatus::Discarded { positioned, total } => {
                warn!(%format, positioned, total, "partial geometry discarded")
            }
            GeometryStatus::Complete | GeometryStatus::Skipped => {}
        }

        let mut builder = parsed.diagram.to_builder();
        if let Some(placements) = placements {
            builder = builder.map_geometry(|node| placements.get(&node.id).copied());
        }
        if self.options.record_provenance {
            let name = self.options.source_name.clone().or_else(|| {
                path_hint
                    .and_then(Path::file_name)
                    .map(|n| n.to_string_lossy().into_owned())
            });
            builder = builder.meta(Some(Meta {
                source: Some(SourceInfo { name, format }),
            }));
        }

        Ok(Conversion {
            diagram: builder.build()?,
            geometry: status,
        })
    }

    /// IR to source text.
    pub fn generate(&self, diagram: &Diagram, format: FormatKind) -> String {
        generator::generate(diagram, format)
    }

    /// Convert every input concurrently. Results come back in input order and
    /// a failing input never affects the others.
    pub fn convert_batch(&self, inputs: &[SourceInput]) -> Vec<Result<Conversion>> {
        let results: Vec<Result<Conversion>> = thread::scope(|scope| {
            let handles: Vec<_> = inputs
                .iter()
                .map(|input| {
                    scope.spawn(move || {
                        self.convert(&input.text, input.format, input.path.as_deref())
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(total = results.len(), failed, "batch finished");
        results
    }

    /// Call the renderer, retrying up to `render_attempts` times.
    fn render(
        &self,
        renderer: &dyn RenderInvoker,
        format: FormatKind,
        text: &str,
        parsed: &ParsedSource,
    ) -> std::result::Result<String, RenderFailure> {
        let instrumented;
        let source = match format {
            FormatKind::Tikz => {
                let ids: Vec<&str> = parsed.diagram.nodes().iter().map(|n| n.id.as_str()).collect();
                instrumented = geometry::tikz::instrument(text, &ids);
                instrumented.as_str()
            }
            FormatKind::Mermaid | FormatKind::Dot => text,
        };
        let request = RenderRequest {
            format,
            source,
            timeout: self.options.render_timeout,
        };

        let attempts = self.options.render_attempts.max(1);
        let mut last = RenderFailure::Unavailable;
        for attempt in 1..=attempts {
            match renderer.render(&request) {
                Ok(raw) => return Ok(raw),
                // retrying cannot make a missing renderer appear
                Err(RenderFailure::Unavailable) => return Err(RenderFailure::Unavailable),
                Err(failure) => {
                    warn!(%format, attempt, attempts, error = %failure, "render attempt failed");
                    last = failure;
                }
            }
        }
        Err(last)
    }
}

type Placement = ([f64; 2], [f64; 2]);

/// Match normalised geometry to nodes: by ID first, then by visible label.
/// Positions stated in the source replace rendered ones; sizes always come
/// from the renderer. Returns placements only when every node has one.
fn merge(
    parsed: &ParsedSource,
    map: &GeometryMap,
) -> (Option<HashMap<String, Placement>>, GeometryStatus) {
    let by_label: HashMap<String, &geometry::NodeGeometry> = map
        .iter()
        .map(|(key, geometry)| (collapse_whitespace(key), geometry))
        .collect();

    let nodes = parsed.diagram.nodes();
    let mut placements = HashMap::new();
    for node in nodes {
        let found = map
            .get(&node.id)
            .or_else(|| by_label.get(&collapse_whitespace(node.label())).copied());
        let Some(found) = found else {
            debug!(node = %node.id, "renderer did not place node");
            continue;
        };
        let position = parsed
            .explicit_positions
            .get(&node.id)
            .copied()
            .unwrap_or(found.position);
        placements.insert(node.id.clone(), (position, found.size));
    }

    let total = nodes.len();
    let positioned = placements.len();
    if positioned == total {
        (Some(placements), GeometryStatus::Complete)
    } else if positioned == 0 {
        (
            None,
            GeometryStatus::Unavailable("rendered output places no known node".to_string()),
        )
    } else {
        (None, GeometryStatus::Discarded { positioned, total })
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Renderer double that replays canned responses
    struct Scripted {
        responses: Mutex<Vec<std::result::Result<String, RenderFailure>>>,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(responses: Vec<std::result::Result<String, RenderFailure>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl RenderInvoker for Scripted {
        fn render(&self, request: &RenderRequest<'_>) -> std::result::Result<String, RenderFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.source.to_string());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Err(RenderFailure::Other("no more responses".into()))
            } else {
                responses.remove(0)
            }
        }
    }

    const DOT_SOURCE: &str = "digraph { a -> b }";

    fn dot_layout(names: &[&str]) -> String {
        let objects: Vec<String> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                format!(
                    r#"{{"name": "{}", "pos": "{},{}", "width": "1", "height": "0.5"}}"#,
                    name,
                    27 + i * 72,
                    18
                )
            })
            .collect();
        format!(r#"{{"name": "G", "objects": [{}]}}"#, objects.join(","))
    }

    #[test]
    fn test_convert_without_renderer_skips_geometry() {
        let conversion = Pipeline::default().convert("graph LR\n A --> B", None, None).unwrap();
        assert_eq!(conversion.geometry, GeometryStatus::Skipped);
        assert!(!conversion.diagram.is_laid_out());
        let source = conversion.diagram.meta().and_then(|m| m.source.as_ref()).unwrap();
        assert_eq!(source.format, FormatKind::Mermaid);
        assert_eq!(source.name, None);
    }

    #[test]
    fn test_complete_geometry_is_merged() {
        let renderer = Scripted::new(vec![Ok(dot_layout(&["a", "b"]))]);
        let pipeline = Pipeline::default().with_renderer(&renderer);
        let conversion = pipeline
            .convert(DOT_SOURCE, None, Some(Path::new("flows/x.dot")))
            .unwrap();
        assert_eq!(conversion.geometry, GeometryStatus::Complete);
        let a = conversion.diagram.node("a").unwrap();
        assert_eq!(a.position, Some([36.0, 24.0]));
        assert_eq!(a.size, Some([96.0, 48.0]));
        let source = conversion.diagram.meta().and_then(|m| m.source.as_ref()).unwrap();
        assert_eq!(source.name.as_deref(), Some("x.dot"));
    }

    #[test]
    fn test_partial_geometry_is_discarded() {
        let renderer = Scripted::new(vec![Ok(dot_layout(&["a"]))]);
        let pipeline = Pipeline::default().with_renderer(&renderer);
        let conversion = pipeline.convert(DOT_SOURCE, Some(FormatKind::Dot), None).unwrap();
        assert_eq!(
            conversion.geometry,
            GeometryStatus::Discarded {
                positioned: 1,
                total: 2
            }
        );
        assert!(conversion.diagram.nodes().iter().all(|n| n.position.is_none()));
    }

    #[test]
    fn test_render_is_retried_then_downgraded() {
        let renderer = Scripted::new(vec![
            Err(RenderFailure::TimedOut),
            Err(RenderFailure::ExitStatus(1)),
        ]);
        let pipeline = Pipeline::default().with_renderer(&renderer);
        let conversion = pipeline.convert(DOT_SOURCE, None, None).unwrap();
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            conversion.geometry,
            GeometryStatus::Unavailable("renderer exited with status 1".into())
        );
        assert!(!conversion.diagram.is_laid_out());
    }

    #[test]
    fn test_retry_recovers_and_missing_renderer_is_not_retried() {
        let flaky = Scripted::new(vec![Err(RenderFailure::TimedOut), Ok(dot_layout(&["a", "b"]))]);
        let conversion = Pipeline::default()
            .with_renderer(&flaky)
            .convert(DOT_SOURCE, None, None)
            .unwrap();
        assert_eq!(conversion.geometry, GeometryStatus::Complete);

        let missing = Scripted::new(vec![Err(RenderFailure::Unavailable)]);
        let options = ConvertOptions {
            render_attempts: 5,
            ..Default::default()
        };
        let conversion = Pipeline::new(options)
            .with_renderer(&missing)
            .convert(DOT_SOURCE, None, None)
            .unwrap();
        assert_eq!(missing.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(conversion.geometry, GeometryStatus::Unavailable(_)));
    }

    #[test]
    fn test_unreadable_artifact_downgrades() {
        let renderer = Scripted::new(vec![Ok("not json".into())]);
        let conversion = Pipeline::default()
            .with_renderer(&renderer)
            .convert(DOT_SOURCE, None, None)
            .unwrap();
        assert!(matches!(conversion.geometry, GeometryStatus::Unavailable(_)));
    }

    #[test]
    fn test_explicit_positions_win_over_rendered() {
        let source = "digraph { a [pos=\"0,0!\"]; b; a -> b }";
        let renderer = Scripted::new(vec![Ok(dot_layout(&["a", "b"]))]);
        let conversion = Pipeline::default()
            .with_renderer(&renderer)
            .convert(source, None, None)
            .unwrap();
        let a = conversion.diagram.node("a").unwrap();
        assert_eq!(a.position, Some([0.0, 0.0]));
        assert_eq!(a.size, Some([96.0, 48.0]));
    }

    #[test]
    fn test_tikz_renderer_receives_instrumented_document() {
        let source = "\\begin{tikzpicture}\n\\node (a) {A};\n\\end{tikzpicture}";
        let renderer = Scripted::new(vec![Err(RenderFailure::Unavailable)]);
        Pipeline::default()
            .with_renderer(&renderer)
            .convert(source, None, None)
            .unwrap();
        let seen = renderer.seen.lock().unwrap();
        assert!(seen[0].starts_with("\\documentclass"));
        assert!(seen[0].contains("(a)"));
    }

    #[test]
    fn test_mermaid_geometry_matched_by_label() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg">
            <g class="node default" transform="translate(50, 20)"><rect x="-30" y="-10" width="60" height="20"/><text>Hello  World</text></g>
        </svg>"#;
        let renderer = Scripted::new(vec![Ok(svg.into())]);
        let conversion = Pipeline::default()
            .with_renderer(&renderer)
            .convert("graph TD\n x[\"Hello World\"]", None, None)
            .unwrap();
        assert_eq!(conversion.geometry, GeometryStatus::Complete);
        assert_eq!(conversion.diagram.node("x").unwrap().position, Some([50.0, 20.0]));
    }

    #[test]
    fn test_batch_isolates_failures() {
        let inputs = vec![
            SourceInput::new("graph TD\n A --> B"),
            SourceInput::new("graph TD\n subgraph s\n A"),
            SourceInput::new("digraph { x -> y }").with_path("y.dot"),
            SourceInput::new("hello").with_format(FormatKind::Dot),
        ];
        let results = Pipeline::default().convert_batch(&inputs);
        assert_eq!(results.len(), 4);
        assert!(results[0].is_ok());
        assert!(results[1].as_ref().unwrap_err().is_syntax());
        let third = results[2].as_ref().unwrap();
        assert_eq!(third.diagram.nodes().len(), 2);
        assert!(results[3].is_err());
    }

    #[test]
    fn test_provenance_can_be_disabled() {
        let options = ConvertOptions {
            record_provenance: false,
            ..Default::default()
        };
        let conversion = Pipeline::new(options).convert("digraph { a }", None, None).unwrap();
        assert_eq!(conversion.diagram.meta(), None);
    }
}
