//! Graphviz `-Tjson` geometry.
//!
//! Nodes are the entries of `objects` without a `nodes` array (those are
//! subgraphs). `pos` is `"x,y"` in points, `width`/`height` are inches.

use serde::Deserialize;
use tracing::debug;

use super::{GeometryMap, NodeGeometry, DOT_PX_PER_INCH, DOT_PX_PER_PT};
use crate::error::{ConvertError, Result};

#[derive(Debug, Deserialize)]
struct Layout {
    #[serde(default)]
    objects: Vec<LayoutObject>,
}

#[derive(Debug, Deserialize)]
struct LayoutObject {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    pos: Option<String>,
    #[serde(default)]
    width: Option<Measure>,
    #[serde(default)]
    height: Option<Measure>,
    #[serde(default)]
    nodes: Option<Vec<serde_json::Value>>,
}

/// Graphviz writes numbers as strings; accept both.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Measure {
    Number(f64),
    Text(String),
}

impl Measure {
    fn value(&self) -> Option<f64> {
        match self {
            Measure::Number(v) => Some(*v),
            Measure::Text(s) => s.trim().parse().ok(),
        }
    }
}

pub fn extract(raw: &str) -> Result<GeometryMap> {
    let layout: Layout = serde_json::from_str(raw)
        .map_err(|e| ConvertError::GeometryUnavailable(format!("unreadable Graphviz JSON: {}", e)))?;

    let mut map = GeometryMap::new();
    for object in layout.objects.iter().filter(|o| o.nodes.is_none()) {
        let Some(name) = object.name.as_deref() else {
            continue;
        };
        let Some([x, y]) = object.pos.as_deref().and_then(parse_point) else {
            debug!(node = name, "layout object without a position; skipping");
            continue;
        };
        let (Some(w), Some(h)) = (
            object.width.as_ref().and_then(Measure::value),
            object.height.as_ref().and_then(Measure::value),
        ) else {
            debug!(node = name, "layout object without a size; skipping");
            continue;
        };
        map.insert(
            name.to_string(),
            NodeGeometry::new(
                [x * DOT_PX_PER_PT, y * DOT_PX_PER_PT],
                [w * DOT_PX_PER_INCH, h * DOT_PX_PER_INCH],
            ),
        );
    }
    Ok(map)
}

fn parse_point(pos: &str) -> Option<[f64; 2]> {
    let mut parts = pos.trim().trim_end_matches('!').split(',');
    let x = parts.next()?.trim().parse().ok()?;
    let y = parts.next()?.trim().parse().ok()?;
    Some([x, y])
}
