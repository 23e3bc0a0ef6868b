//! TikZ geometry through anchor instrumentation.
//!
//! TikZ has no machine-readable layout output, so the picture is recompiled
//! with a trailer that writes five anchors per node to a side file:
//!
//! ```text
//! A|center|28.45274|-14.22636
//! A|east|45.52438|-14.22636
//! ```
//!
//! Coordinates are TeX points with y pointing up.

use std::collections::BTreeMap;

use tracing::debug;

use super::{GeometryMap, NodeGeometry, TIKZ_PX_PER_PT};
use crate::error::{ConvertError, Result};

const ANCHORS: [&str; 5] = ["center", "east", "west", "north", "south"];

const BEGIN_PICTURE: &str = "\\begin{tikzpicture}";
const END_PICTURE: &str = "\\end{tikzpicture}";

/// Preamble commands carried over into the instrumented document.
const PREAMBLE_COMMANDS: [&str; 5] = [
    "\\usetikzlibrary",
    "\\usepackage",
    "\\tikzset",
    "\\tikzstyle",
    "\\definecolor",
];

/// Build a standalone document that draws the first picture of `source` and
/// dumps the anchors of `node_ids` to `\jobname.pos`.
pub fn instrument(source: &str, node_ids: &[&str]) -> String {
    let (preamble, options, body) = split_picture(source);

    let mut doc = String::new();
    doc.push_str("\\documentclass[tikz,border=2pt]{standalone}\n");
    doc.push_str("\\usepackage{tikz}\n");
    for line in preamble {
        doc.push_str(line);
        doc.push('\n');
    }
    doc.push_str("\\begin{document}\n");
    doc.push_str(BEGIN_PICTURE);
    if let Some(options) = options {
        doc.push('[');
        doc.push_str(options);
        doc.push(']');
    }
    doc.push('\n');
    doc.push_str(body.trim_matches('\n'));
    doc.push('\n');
    doc.push_str(&anchor_trailer(node_ids));
    doc.push_str(END_PICTURE);
    doc.push_str("\n\\end{document}\n");
    doc
}

fn anchor_trailer(node_ids: &[&str]) -> String {
    let mut out = String::new();
    out.push_str("\\makeatletter\n");
    out.push_str("\\newwrite\\positionfile\n");
    out.push_str("\\immediate\\openout\\positionfile=\\jobname.pos\n");
    out.push_str("\\def\\WriteAnchor#1#2{%\n");
    out.push_str("  \\expandafter\\ifx\\csname pgf@sh@ns@#1\\endcsname\\relax\n");
    out.push_str("  \\else\n");
    out.push_str("    \\pgfpointanchor{#1}{#2}%\n");
    out.push_str("    \\begingroup\n");
    out.push_str("      \\edef\\x{\\strip@pt\\pgf@x}%\n");
    out.push_str("      \\edef\\y{\\strip@pt\\pgf@y}%\n");
    out.push_str("      \\immediate\\write\\positionfile{#1|#2|\\x|\\y}%\n");
    out.push_str("    \\endgroup\n");
    out.push_str("  \\fi\n");
    out.push_str("}\n");
    out.push_str(&format!("\\foreach \\nodeName in {{{}}}{{%\n", node_ids.join(",")));
    for anchor in ANCHORS {
        out.push_str(&format!("  \\WriteAnchor{{\\nodeName}}{{{}}}%\n", anchor));
    }
    out.push_str("}\n");
    out.push_str("\\immediate\\closeout\\positionfile\n");
    out.push_str("\\makeatother\n");
    out
}

/// Preamble lines worth keeping, the picture options and the picture body.
/// Without a `tikzpicture` the whole text (minus a document wrapper) is the body.
fn split_picture(source: &str) -> (Vec<&str>, Option<&str>, &str) {
    let Some(begin) = source.find(BEGIN_PICTURE) else {
        let body = source
            .find("\\begin{document}")
            .map(|i| &source[i + "\\begin{document}".len()..])
            .unwrap_or(source);
        let body = body.find("\\end{document}").map_or(body, |i| &body[..i]);
        return (Vec::new(), None, body);
    };

    let preamble = source[..begin]
        .lines()
        .map(str::trim)
        .filter(|line| PREAMBLE_COMMANDS.iter().any(|cmd| line.starts_with(cmd)))
        .collect();

    let mut rest = &source[begin + BEGIN_PICTURE.len()..];
    let mut options = None;
    if rest.trim_start().starts_with('[') {
        let open = rest.len() - rest.trim_start().len();
        if let Some(close) = matching_bracket(rest, open) {
            options = Some(&rest[open + 1..close]);
            rest = &rest[close + 1..];
        }
    }
    let body = rest.find(END_PICTURE).map_or(rest, |i| &rest[..i]);
    (preamble, options, body)
}

fn matching_bracket(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        match c {
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return (c == ']').then_some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Read the anchor dump produced by [`instrument`].
pub fn extract(raw: &str) -> Result<GeometryMap> {
    let mut anchors: BTreeMap<&str, BTreeMap<&str, [f64; 2]>> = BTreeMap::new();
    for line in raw.lines() {
        let parts: Vec<&str> = line.trim().split('|').collect();
        let [id, anchor, x, y] = parts[..] else {
            continue;
        };
        let (Some(x), Some(y)) = (parse_pt(x), parse_pt(y)) else {
            continue;
        };
        anchors.entry(id).or_default().insert(anchor, [x, y]);
    }
    if anchors.is_empty() {
        return Err(ConvertError::GeometryUnavailable(
            "no anchor records in TikZ output".to_string(),
        ));
    }

    let mut map = GeometryMap::new();
    for (id, points) in anchors {
        let (Some(center), Some(east), Some(west), Some(north), Some(south)) = (
            points.get("center"),
            points.get("east"),
            points.get("west"),
            points.get("north"),
            points.get("south"),
        ) else {
            debug!(node = id, "incomplete anchor set; skipping");
            continue;
        };
        let position = [center[0] * TIKZ_PX_PER_PT, -center[1] * TIKZ_PX_PER_PT];
        let size = [
            (east[0] - west[0]).abs() * TIKZ_PX_PER_PT,
            (north[1] - south[1]).abs() * TIKZ_PX_PER_PT,
        ];
        map.insert(id.to_string(), NodeGeometry::new(position, size));
    }
    Ok(map)
}

fn parse_pt(value: &str) -> Option<f64> {
    let value = value.trim();
    value.strip_suffix("pt").unwrap_or(value).trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_keeps_options_and_preamble() {
        let source = "\\documentclass{article}\n\\usepackage{tikz}\n\\usetikzlibrary{shapes}\n\
                      \\begin{document}\n\\begin{tikzpicture}[->, node distance=2cm]\n\
                      \\node (A) {A};\n\\end{tikzpicture}\n\\end{document}\n";
        let doc = instrument(source, &["A", "B"]);
        assert!(doc.starts_with("\\documentclass[tikz,border=2pt]{standalone}\n"));
        assert!(doc.contains("\\usetikzlibrary{shapes}\n"));
        assert!(!doc.contains("\\documentclass{article}"));
        assert!(doc.contains("\\begin{tikzpicture}[->, node distance=2cm]\n\\node (A) {A};\n"));
        assert!(doc.contains("\\foreach \\nodeName in {A,B}{%"));
        assert!(doc.contains("\\WriteAnchor{\\nodeName}{south}%"));
        assert_eq!(doc.matches("\\begin{tikzpicture}").count(), 1);
        assert!(doc.trim_end().ends_with("\\end{tikzpicture}\n\\end{document}"));
    }

    #[test]
    fn test_instrument_bare_commands() {
        let doc = instrument("\\node (X) {x};", &["X"]);
        assert!(doc.contains("\\begin{tikzpicture}\n\\node (X) {x};\n"));
    }

    #[test]
    fn test_extract_flips_and_scales() {
        let raw = "A|center|72.27|-72.27\n\
                   A|east|90.3375|-72.27\n\
                   A|west|54.2025|-72.27\n\
                   A|north|72.27|-63.235\n\
                   A|south|72.27|-81.305\n\
                   garbage line\n";
        let map = extract(raw).unwrap();
        let a = map["A"];
        assert_eq!(a.position, [96.0, 96.0]);
        assert_eq!(a.size, [48.0, 24.0]);
    }

    #[test]
    fn test_incomplete_nodes_are_left_out() {
        let raw = "A|center|0|0\nA|east|1|0\nB|center|0pt|0pt\n\
                   B|east|10pt|0pt\nB|west|-10pt|0pt\nB|north|0pt|5pt\nB|south|0pt|-5pt\n";
        let map = extract(raw).unwrap();
        assert!(!map.contains_key("A"));
        assert_eq!(map["B"].size, [26.57, 13.28]);
    }

    #[test]
    fn test_empty_dump_is_unavailable() {
        assert!(matches!(extract(""), Err(ConvertError::GeometryUnavailable(_))));
    }
}
