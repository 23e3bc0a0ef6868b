//! Cascading style resolution.
//!
//! Layers, lowest to highest precedence: built-in base, `defaults[kind]`,
//! the named class, the entity's own explicit fields. Each layer only
//! overrides the fields it sets. Unknown class names resolve as if no class
//! was given.

use tracing::debug;

use crate::types::{DashStyle, Edge, Node, NodeShape, StyleAttrs, StyleSheet};

/// Which defaults layer applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleTarget {
    Node,
    Edge,
}

/// Fully populated style, the result of [`resolve`]
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStyle {
    pub fill: String,
    pub stroke: String,
    pub stroke_width: f64,
    pub dash: DashStyle,
    pub shape: NodeShape,
}

impl ResolvedStyle {
    /// Hard-coded base values used when no layer sets a field.
    pub fn base(target: StyleTarget) -> Self {
        match target {
            StyleTarget::Node => Self {
                fill: "#fff".to_string(),
                stroke: "#000".to_string(),
                stroke_width: 1.0,
                dash: DashStyle::Solid,
                shape: NodeShape::Rect,
            },
            StyleTarget::Edge => Self {
                fill: "none".to_string(),
                stroke: "#333".to_string(),
                stroke_width: 2.0,
                dash: DashStyle::Solid,
                shape: NodeShape::Rect,
            },
        }
    }

    fn apply(&mut self, layer: &StyleAttrs) {
        if let Some(fill) = &layer.fill {
            self.fill = fill.clone();
        }
        if let Some(stroke) = &layer.stroke {
            self.stroke = stroke.clone();
        }
        if let Some(width) = layer.stroke_width {
            self.stroke_width = width;
        }
        if let Some(dash) = layer.dash {
            self.dash = dash;
        }
        if let Some(shape) = layer.shape {
            self.shape = shape;
        }
    }

    /// Fields of `self` that differ from `baseline`, as a partial layer.
    pub fn diff(&self, baseline: &ResolvedStyle) -> StyleAttrs {
        StyleAttrs {
            fill: (self.fill != baseline.fill).then(|| self.fill.clone()),
            stroke: (self.stroke != baseline.stroke).then(|| self.stroke.clone()),
            stroke_width: (self.stroke_width != baseline.stroke_width).then_some(self.stroke_width),
            dash: (self.dash != baseline.dash).then_some(self.dash),
            shape: (self.shape != baseline.shape).then_some(self.shape),
        }
    }
}

pub fn resolve(
    target: StyleTarget,
    explicit: &StyleAttrs,
    class: Option<&str>,
    sheet: &StyleSheet,
) -> ResolvedStyle {
    let mut resolved = ResolvedStyle::base(target);
    resolved.apply(match target {
        StyleTarget::Node => &sheet.defaults.node,
        StyleTarget::Edge => &sheet.defaults.edge,
    });
    if let Some(name) = class {
        match sheet.class(name) {
            Some(attrs) => resolved.apply(attrs),
            None => debug!(class = name, "unknown style class; resolving without it"),
        }
    }
    resolved.apply(explicit);
    resolved
}

pub fn resolve_node(node: &Node, sheet: &StyleSheet) -> ResolvedStyle {
    resolve(
        StyleTarget::Node,
        &node.explicit_style(),
        node.class.as_deref(),
        sheet,
    )
}

pub fn resolve_edge(edge: &Edge, sheet: &StyleSheet) -> ResolvedStyle {
    resolve(StyleTarget::Edge, &edge.explicit_style(), None, sheet)
}

/// The smallest style construct that reproduces an entity's resolved attributes
#[derive(Debug, Clone, PartialEq)]
pub struct StyleForm<'a> {
    /// Declared class to reference, if any.
    pub class: Option<&'a str>,
    /// Fields to emit inline on top of the class and defaults.
    pub inline: StyleAttrs,
}

/// Split an entity's style into a class reference plus the inline fields that
/// still change the outcome. Explicit fields already implied by the class or
/// the defaults are dropped.
pub fn minimal_form<'a>(
    target: StyleTarget,
    explicit: &StyleAttrs,
    class: Option<&'a str>,
    sheet: &StyleSheet,
) -> StyleForm<'a> {
    let class = class.filter(|name| sheet.class(name).is_some());
    let resolved = resolve(target, explicit, class, sheet);
    let baseline = resolve(target, &StyleAttrs::default(), class, sheet);
    StyleForm {
        class,
        inline: resolved.diff(&baseline),
    }
}

/// Inline fields needed when the target format has no class construct: the
/// class layer is folded into the entity.
pub fn flattened_form(
    target: StyleTarget,
    explicit: &StyleAttrs,
    class: Option<&str>,
    sheet: &StyleSheet,
) -> StyleAttrs {
    let resolved = resolve(target, explicit, class, sheet);
    let baseline = resolve(target, &StyleAttrs::default(), None, sheet);
    resolved.diff(&baseline)
}

/// Number formatting shared by the generators: integers without a fraction,
/// everything else with at most two decimals.
pub(crate) fn format_number(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        let text = format!("{:.2}", rounded);
        text.trim_end_matches('0').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet() -> StyleSheet {
        let mut sheet = StyleSheet::default();
        sheet.defaults.node.fill = Some("#fff".into());
        sheet.classes.insert(
            "highlight".into(),
            StyleAttrs {
                fill: Some("#ff0".into()),
                ..Default::default()
            },
        );
        sheet
    }

    #[test]
    fn class_overrides_defaults() {
        let node = Node::new("A").with_class("highlight");
        assert_eq!(resolve_node(&node, &sheet()).fill, "#ff0");
    }

    #[test]
    fn explicit_overrides_class() {
        let mut node = Node::new("A").with_class("highlight");
        node.fill = Some("#abc".into());
        assert_eq!(resolve_node(&node, &sheet()).fill, "#abc");
    }

    #[test]
    fn unknown_class_is_ignored() {
        let node = Node::new("A").with_class("highlihgt");
        let resolved = resolve_node(&node, &sheet());
        assert_eq!(resolved.fill, "#fff");
        assert_eq!(resolved, resolve_node(&Node::new("A"), &sheet()));
    }

    #[test]
    fn base_values_fill_unset_fields() {
        let empty = StyleSheet::default();
        let node = resolve(StyleTarget::Node, &StyleAttrs::default(), None, &empty);
        assert_eq!(node.fill, "#fff");
        assert_eq!(node.stroke, "#000");
        assert_eq!(node.stroke_width, 1.0);
        assert_eq!(node.shape, NodeShape::Rect);

        let edge = resolve(StyleTarget::Edge, &StyleAttrs::default(), None, &empty);
        assert_eq!(edge.stroke, "#333");
        assert_eq!(edge.stroke_width, 2.0);
    }

    #[test]
    fn minimal_form_prefers_class_reference() {
        let sheet = sheet();
        let node = Node::new("A").with_class("highlight");
        let form = minimal_form(StyleTarget::Node, &node.explicit_style(), Some("highlight"), &sheet);
        assert_eq!(form.class, Some("highlight"));
        assert!(form.inline.is_empty());
    }

    #[test]
    fn minimal_form_drops_redundant_explicit_fields() {
        let sheet = sheet();
        let mut node = Node::new("A").with_class("highlight");
        node.fill = Some("#ff0".into());
        node.stroke = Some("#f00".into());
        let form = minimal_form(StyleTarget::Node, &node.explicit_style(), node.class.as_deref(), &sheet);
        assert_eq!(form.inline.fill, None);
        assert_eq!(form.inline.stroke.as_deref(), Some("#f00"));
    }

    #[test]
    fn flattened_form_folds_class_in() {
        let sheet = sheet();
        let node = Node::new("A").with_class("highlight");
        let inline = flattened_form(StyleTarget::Node, &node.explicit_style(), Some("highlight"), &sheet);
        assert_eq!(inline.fill.as_deref(), Some("#ff0"));
    }

    #[test]
    fn numbers_format_compactly() {
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(0.333333), "0.33");
        assert_eq!(format_number(-3.0), "-3");
    }
}
