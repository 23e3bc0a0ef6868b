//! Geometry normalizer.
//!
//! Each external renderer reports node placement in its own coordinate
//! convention. Everything here converts into one canonical space: y-down
//! pixels, node centre as `position`, bounding box as `size`, values rounded
//! to two decimals.
//!
//! | Source                | Native unit         | Scale          | Axis   |
//! |-----------------------|---------------------|----------------|--------|
//! | Mermaid SVG           | px                  | 1              | y-down |
//! | TikZ anchor dump      | TeX pt              | 96 / 72.27     | y-up   |
//! | Graphviz `-Tjson`     | pt (size in inches) | 96 / 72, 96    | y-down |

pub mod dot;
pub mod svg;
pub mod tikz;

use std::collections::BTreeMap;

use crate::error::Result;
use crate::types::FormatKind;

/// Mermaid SVG is already in CSS pixels.
pub const MERMAID_PX_PER_UNIT: f64 = 1.0;
/// TeX points (72.27 per inch) to pixels.
pub const TIKZ_PX_PER_PT: f64 = 96.0 / 72.27;
/// Centimetres, the TikZ default length unit, to pixels.
pub const TIKZ_PX_PER_CM: f64 = 96.0 / 2.54;
/// PostScript points (72 per inch) to pixels.
pub const DOT_PX_PER_PT: f64 = 96.0 / 72.0;
pub const DOT_PX_PER_INCH: f64 = 96.0;

/// Canonical placement of one node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeGeometry {
    /// Centre, y-down pixels.
    pub position: [f64; 2],
    /// Width and height in pixels.
    pub size: [f64; 2],
}

impl NodeGeometry {
    pub fn new(position: [f64; 2], size: [f64; 2]) -> Self {
        Self {
            position: [round2(position[0]), round2(position[1])],
            size: [round2(size[0]), round2(size[1])],
        }
    }
}

/// Geometry keyed by node ID, or by visible label when the renderer does not
/// expose IDs. Nodes the renderer could not place are simply absent.
pub type GeometryMap = BTreeMap<String, NodeGeometry>;

/// Convert the renderer's raw artifact for `format` into canonical geometry.
///
/// Fails with [`ConvertError::GeometryUnavailable`](crate::error::ConvertError::GeometryUnavailable)
/// when the artifact cannot be read at all. A readable artifact that places
/// only some nodes yields a partial map; the caller decides what to keep.
pub fn normalize(format: FormatKind, raw: &str) -> Result<GeometryMap> {
    match format {
        FormatKind::Mermaid => svg::extract(raw),
        FormatKind::Tikz => tikz::extract(raw),
        FormatKind::Dot => dot::extract(raw),
    }
}

pub fn round2(value: f64) -> f64 {
    let rounded = (value * 100.0).round() / 100.0;
    // avoid "-0"
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(1.005_1), 1.01);
        assert_eq!(round2(-0.001), 0.0);
        assert!(round2(-0.001).is_sign_positive());
        assert_eq!(round2(37.795_275), 37.8);
    }

    #[test]
    fn test_dispatch_by_format() {
        let err = normalize(FormatKind::Dot, "not json").unwrap_err();
        assert!(matches!(err, crate::error::ConvertError::GeometryUnavailable(_)));
        let err = normalize(FormatKind::Mermaid, "<svg").unwrap_err();
        assert!(matches!(err, crate::error::ConvertError::GeometryUnavailable(_)));
    }
}
