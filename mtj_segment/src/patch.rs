//! Applying a reassembly patch plan without mutating the tree in place.
//!
//! A plan is computed against the *original* (pre-mutation) tree's
//! [`NodePath`]s: insert these nodes before this path, delete that path.
//! Rebuilding bottom-up in one pass means none of the recorded paths ever
//! go stale, even when a single batch's captured nodes span several
//! different parents or several siblings under the same parent.

use crate::dom::{NodeData, NodePath};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct PatchPlan {
    /// Nodes to splice in immediately before the node at this path.
    pub insertions: HashMap<NodePath, Vec<NodeData>>,
    /// Paths of nodes to delete entirely.
    pub removals: HashSet<NodePath>,
}

impl PatchPlan {
    pub fn new() -> Self {
        PatchPlan::default()
    }

    pub fn insert_before(&mut self, path: NodePath, nodes: Vec<NodeData>) {
        self.insertions.entry(path).or_default().extend(nodes);
    }

    pub fn remove(&mut self, path: NodePath) {
        self.removals.insert(path);
    }

    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.removals.is_empty()
    }
}

/// Rebuild `nodes` (the children at `prefix` in the original tree) applying
/// `plan`, recursing into surviving elements' children with their own
/// extended prefix.
pub fn rebuild_children(nodes: &[NodeData], prefix: &[usize], plan: &PatchPlan) -> Vec<NodeData> {
    let mut out = Vec::with_capacity(nodes.len());
    for (idx, node) in nodes.iter().enumerate() {
        let mut path = prefix.to_vec();
        path.push(idx);

        if let Some(inserted) = plan.insertions.get(&path) {
            out.extend(inserted.iter().cloned());
        }

        if plan.removals.contains(&path) {
            continue;
        }

        match node {
            NodeData::Element(el) => {
                let mut rebuilt = el.clone();
                rebuilt.children = rebuild_children(&el.children, &path, plan);
                out.push(NodeData::Element(rebuilt));
            }
            other => out.push(other.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{parse_nodes, serialize, Element};

    #[test]
    fn replaces_a_single_paragraph() {
        let nodes = parse_nodes("<body><p>one</p><p>two</p></body>").unwrap();
        let NodeData::Element(body) = &nodes[0] else { panic!() };

        let mut plan = PatchPlan::new();
        let mut replacement = Element::new("p");
        replacement.children.push(NodeData::Text("ONE".into()));
        plan.insert_before(vec![0], vec![NodeData::Element(replacement)]);
        plan.remove(vec![0]);

        let rebuilt = rebuild_children(&body.children, &[], &plan);
        assert_eq!(serialize(&rebuilt), "<p>ONE</p><p>two</p>");
    }

    #[test]
    fn insertion_and_removal_in_different_parents() {
        let nodes =
            parse_nodes("<body><div><p>a</p></div><div><p>b</p></div></body>").unwrap();
        let NodeData::Element(body) = &nodes[0] else { panic!() };

        let mut plan = PatchPlan::new();
        let mut repl_a = Element::new("p");
        repl_a.children.push(NodeData::Text("A".into()));
        let mut repl_b = Element::new("p");
        repl_b.children.push(NodeData::Text("B".into()));
        plan.insert_before(vec![0, 0], vec![NodeData::Element(repl_a)]);
        plan.remove(vec![0, 0]);
        plan.insert_before(vec![1, 0], vec![NodeData::Element(repl_b)]);
        plan.remove(vec![1, 0]);

        let rebuilt = rebuild_children(&body.children, &[], &plan);
        assert_eq!(serialize(&rebuilt), "<div><p>A</p></div><div><p>B</p></div>");
    }
}
