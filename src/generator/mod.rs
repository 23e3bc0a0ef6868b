//! IR to source text.
//!
//! Generators are total: every valid [`Diagram`] produces text the matching
//! parser accepts. Styles are resolved per entity and re-expressed with the
//! smallest construct the target format offers. Geometry is written only when
//! the whole diagram is laid out.

pub mod dot;
pub mod mermaid;
pub mod tikz;

use std::collections::{HashMap, HashSet};

use crate::types::{Diagram, FormatKind, Group};

pub fn generate(diagram: &Diagram, format: FormatKind) -> String {
    match format {
        FormatKind::Mermaid => mermaid::generate(diagram),
        FormatKind::Tikz => tikz::generate(diagram),
        FormatKind::Dot => dot::generate(diagram),
    }
}

/// Names used for nodes in the generated text. IDs the target grammar cannot
/// spell are replaced by `n<index>`; callers then write the label explicitly.
pub(crate) struct NodeNames<'d> {
    names: HashMap<&'d str, String>,
}

impl<'d> NodeNames<'d> {
    pub(crate) fn new(diagram: &'d Diagram, is_valid: impl Fn(&str) -> bool) -> Self {
        let taken: HashSet<&str> = diagram.nodes().iter().map(|n| n.id.as_str()).collect();
        let mut names = HashMap::new();
        let mut next = 0usize;
        for node in diagram.nodes() {
            let name = if is_valid(&node.id) {
                node.id.clone()
            } else {
                loop {
                    let candidate = format!("n{}", next);
                    next += 1;
                    if !taken.contains(candidate.as_str()) {
                        break candidate;
                    }
                }
            };
            names.insert(node.id.as_str(), name);
        }
        Self { names }
    }

    pub(crate) fn get<'a>(&'a self, id: &'a str) -> &'a str {
        self.names.get(id).map_or(id, String::as_str)
    }

    pub(crate) fn is_renamed(&self, id: &str) -> bool {
        self.get(id) != id
    }
}

/// Spellings for class and group names. A name the target grammar rejects
/// has every character other than a letter, digit or `_` replaced by `_`;
/// collisions get a numeric suffix.
pub(crate) struct SafeNames<'d> {
    names: HashMap<&'d str, String>,
}

impl<'d> SafeNames<'d> {
    pub(crate) fn new<I>(all: I, is_valid: impl Fn(&str) -> bool) -> Self
    where
        I: IntoIterator<Item = &'d str>,
    {
        let all: Vec<&str> = all.into_iter().collect();
        let mut taken: HashSet<String> = all
            .iter()
            .filter(|name| is_valid(name))
            .map(|name| name.to_string())
            .collect();
        let mut names = HashMap::new();
        for name in all {
            if names.contains_key(name) {
                continue;
            }
            let spelled = if is_valid(name) {
                name.to_string()
            } else {
                let mut base: String = name
                    .chars()
                    .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
                    .collect();
                if !is_valid(&base) {
                    base.push('_');
                }
                let mut candidate = base.clone();
                let mut suffix = 2;
                while !taken.insert(candidate.clone()) {
                    candidate = format!("{}_{}", base, suffix);
                    suffix += 1;
                }
                candidate
            };
            names.insert(name, spelled);
        }
        Self { names }
    }

    pub(crate) fn get<'a>(&'a self, name: &'a str) -> &'a str {
        self.names.get(name).map_or(name, String::as_str)
    }

    pub(crate) fn is_renamed(&self, name: &str) -> bool {
        self.get(name) != name
    }
}

/// Fixed-point text with at most `places` decimals and no trailing zeros.
pub(crate) fn decimal(value: f64, places: usize) -> String {
    let scale = 10f64.powi(places as i32);
    let rounded = (value * scale).round() / scale;
    let text = format!("{:.*}", places, rounded);
    let text = if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text.as_str()
    };
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

/// The group that owns each node: the first group, depth-first, that lists
/// it directly. Formats without overlapping groups place a node only there.
pub(crate) fn group_owners(groups: &[Group]) -> HashMap<&str, &str> {
    fn visit<'g>(group: &'g Group, owners: &mut HashMap<&'g str, &'g str>) {
        for node in &group.nodes {
            owners.entry(node.as_str()).or_insert(group.id.as_str());
        }
        for child in &group.groups {
            visit(child, owners);
        }
    }
    let mut owners = HashMap::new();
    for group in groups {
        visit(group, &mut owners);
    }
    owners
}
