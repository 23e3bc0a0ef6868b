//! Mermaid SVG geometry.
//!
//! Every flowchart node is a `<g class="node ...">` positioned through a
//! chain of `translate()` transforms, with its outline as the first
//! `rect`/`circle`/`ellipse`/`polygon` inside it.

use lazy_static::lazy_static;
use regex::Regex;
use roxmltree::{Document, Node as XmlNode};
use tracing::debug;

use super::{GeometryMap, NodeGeometry, MERMAID_PX_PER_UNIT};
use crate::error::{ConvertError, Result};

lazy_static! {
    static ref RE_TRANSLATE: Regex =
        Regex::new(r"translate\(\s*([-+0-9.eE]+)(?:[\s,]+([-+0-9.eE]+))?\s*\)").unwrap();
    static ref RE_NODE_ID: Regex = Regex::new(r"(?:^|-)flowchart-(.+)-\d+$").unwrap();
    static ref RE_NUMBER: Regex = Regex::new(r"[-+]?[0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?").unwrap();
}

const OUTLINE_TAGS: [&str; 4] = ["rect", "circle", "ellipse", "polygon"];

/// Outline box in the coordinate system of its own element.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Outline {
    center: [f64; 2],
    size: [f64; 2],
}

pub fn extract(raw: &str) -> Result<GeometryMap> {
    let doc = Document::parse(raw)
        .map_err(|e| ConvertError::GeometryUnavailable(format!("unreadable SVG: {}", e)))?;
    if !doc.root_element().has_tag_name("svg") {
        return Err(ConvertError::GeometryUnavailable(
            "artifact is not an SVG document".to_string(),
        ));
    }

    let mut map = GeometryMap::new();
    for group in doc
        .descendants()
        .filter(|n| n.has_tag_name("g") && has_class(*n, "node"))
    {
        let Some(key) = node_key(group) else {
            debug!("SVG node group without id or label; skipping");
            continue;
        };
        let Some((shape, outline)) = find_outline(group) else {
            debug!(node = %key, "SVG node group without an outline shape; skipping");
            continue;
        };
        let [tx, ty] = cumulative_translate(shape);
        let position = [
            (tx + outline.center[0]) * MERMAID_PX_PER_UNIT,
            (ty + outline.center[1]) * MERMAID_PX_PER_UNIT,
        ];
        let size = [
            outline.size[0] * MERMAID_PX_PER_UNIT,
            outline.size[1] * MERMAID_PX_PER_UNIT,
        ];
        map.entry(key).or_insert_with(|| NodeGeometry::new(position, size));
    }
    Ok(map)
}

fn has_class(node: XmlNode<'_, '_>, token: &str) -> bool {
    node.attribute("class")
        .is_some_and(|c| c.split_whitespace().any(|t| t == token))
}

/// Node ID from `id="flowchart-<ID>-<n>"`, else the visible label text.
fn node_key(group: XmlNode<'_, '_>) -> Option<String> {
    if let Some(caps) = group.attribute("id").and_then(|id| RE_NODE_ID.captures(id)) {
        return Some(caps[1].to_string());
    }
    let text = label_text(group);
    (!text.is_empty()).then_some(text)
}

/// Text fragments below `group`, whitespace-collapsed and joined by spaces.
fn label_text(group: XmlNode<'_, '_>) -> String {
    group
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Direct children are preferred; newer Mermaid output nests the outline one
/// level deeper.
fn find_outline<'a, 'input>(
    group: XmlNode<'a, 'input>,
) -> Option<(XmlNode<'a, 'input>, Outline)> {
    let is_outline = |n: &XmlNode<'_, '_>| {
        n.is_element() && OUTLINE_TAGS.iter().any(|tag| n.has_tag_name(*tag))
    };
    group
        .children()
        .filter(is_outline)
        .chain(group.descendants().skip(1).filter(is_outline))
        .find_map(|shape| outline_of(shape).map(|outline| (shape, outline)))
}

fn outline_of(shape: XmlNode<'_, '_>) -> Option<Outline> {
    let num = |name: &str| shape.attribute(name).and_then(parse_number);
    match shape.tag_name().name() {
        "rect" => {
            let width = num("width")?;
            let height = num("height")?;
            let x = num("x").unwrap_or(0.0);
            let y = num("y").unwrap_or(0.0);
            Some(Outline {
                center: [x + width / 2.0, y + height / 2.0],
                size: [width, height],
            })
        }
        "circle" => {
            let r = num("r")?;
            Some(Outline {
                center: [num("cx").unwrap_or(0.0), num("cy").unwrap_or(0.0)],
                size: [2.0 * r, 2.0 * r],
            })
        }
        "ellipse" => {
            let rx = num("rx")?;
            let ry = num("ry")?;
            Some(Outline {
                center: [num("cx").unwrap_or(0.0), num("cy").unwrap_or(0.0)],
                size: [2.0 * rx, 2.0 * ry],
            })
        }
        "polygon" => polygon_outline(shape.attribute("points")?),
        _ => None,
    }
}

fn polygon_outline(points: &str) -> Option<Outline> {
    let values: Vec<f64> = RE_NUMBER
        .find_iter(points)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    if values.len() < 4 {
        return None;
    }
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for pair in values.chunks_exact(2) {
        min_x = min_x.min(pair[0]);
        max_x = max_x.max(pair[0]);
        min_y = min_y.min(pair[1]);
        max_y = max_y.max(pair[1]);
    }
    Some(Outline {
        center: [(min_x + max_x) / 2.0, (min_y + max_y) / 2.0],
        size: [max_x - min_x, max_y - min_y],
    })
}

/// Sum of `translate()` offsets of `node` and all its ancestors.
fn cumulative_translate(node: XmlNode<'_, '_>) -> [f64; 2] {
    node.ancestors()
        .filter_map(|n| n.attribute("transform"))
        .map(parse_translate)
        .fold([0.0, 0.0], |acc, t| [acc[0] + t[0], acc[1] + t[1]])
}

fn parse_translate(transform: &str) -> [f64; 2] {
    RE_TRANSLATE
        .captures_iter(transform)
        .map(|caps| {
            let x: f64 = caps[1].parse().unwrap_or(0.0);
            let y: f64 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0.0);
            [x, y]
        })
        .fold([0.0, 0.0], |acc, t| [acc[0] + t[0], acc[1] + t[1]])
}

fn parse_number(value: &str) -> Option<f64> {
    value
        .trim()
        .parse()
        .ok()
        .or_else(|| RE_NUMBER.find(value).and_then(|m| m.as_str().parse().ok()))
}
