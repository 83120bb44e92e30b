use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::ids::{NodeId, TreeId};
use crate::node::TreeNode;

/// Verify the nested-set encoding of a complete set of rows:
///
/// - each tree has exactly one root, at level 0 with `left = 1`;
/// - the left/right values of a tree are exactly `1..=2n`;
/// - extents nest, and the innermost enclosing extent is the parent's;
/// - levels follow the nesting depth.
pub fn check_invariants(nodes: &[TreeNode]) -> Result<()> {
    let fail = |msg: String| Err(Error::InconsistentState(msg));
    let by_id: HashMap<NodeId, &TreeNode> = nodes.iter().map(|n| (n.id, n)).collect();
    let mut trees: BTreeMap<TreeId, Vec<&TreeNode>> = BTreeMap::new();
    for node in nodes {
        trees.entry(node.tree_id).or_default().push(node);
    }

    for (tree_id, mut rows) in trees {
        rows.sort_by_key(|n| n.left);
        let roots: Vec<NodeId> = rows.iter().filter(|n| n.is_root()).map(|n| n.id).collect();
        if roots.len() != 1 {
            return fail(format!("tree {tree_id} has {} roots: {roots:?}", roots.len()));
        }

        let mut edges: Vec<i64> = rows.iter().flat_map(|n| [n.left, n.right]).collect();
        edges.sort_unstable();
        if edges.iter().zip(1..).any(|(&edge, expected)| edge != expected) {
            return fail(format!("tree {tree_id} does not number its edges 1..={}", edges.len()));
        }

        let mut open: Vec<&TreeNode> = Vec::new();
        for node in rows {
            if node.left >= node.right || (node.right - node.left) % 2 == 0 {
                return fail(format!("node {} has extent ({}, {})", node.id, node.left, node.right));
            }
            while open.last().is_some_and(|top| top.right < node.left) {
                open.pop();
            }
            match (open.last(), node.parent) {
                (None, None) => {
                    if node.level != 0 || node.left != 1 {
                        return fail(format!("root {} at level {} left {}", node.id, node.level, node.left));
                    }
                }
                (Some(enclosing), Some(parent)) => {
                    if node.right > enclosing.right {
                        return fail(format!("node {} overlaps node {}", node.id, enclosing.id));
                    }
                    if enclosing.id != parent {
                        let stored = by_id.get(&parent).map(|p| p.tree_id);
                        return fail(format!(
                            "node {} lies directly inside node {} but its parent is {parent} (tree {stored:?})",
                            node.id, enclosing.id
                        ));
                    }
                    if node.level != enclosing.level + 1 {
                        return fail(format!(
                            "node {} has level {} under node {} at level {}",
                            node.id, node.level, enclosing.id, enclosing.level
                        ));
                    }
                }
                (Some(enclosing), None) => {
                    return fail(format!("root {} lies inside node {}", node.id, enclosing.id));
                }
                (None, Some(parent)) => {
                    return fail(format!("node {} lies outside its parent {parent}", node.id));
                }
            }
            open.push(node);
        }
    }
    Ok(())
}

/// One line per node, `id,level,parent,tree_id,left,right`, after a header.
pub fn debug_dump(nodes: &[TreeNode]) -> String {
    let mut out = String::from("id,level,parent,tree_id,left,right\n");
    for n in nodes {
        let parent = n.parent.map(|p| p.to_string()).unwrap_or_default();
        let _ = writeln!(out, "{},{},{},{},{},{}", n.id, n.level, parent, n.tree_id, n.left, n.right);
    }
    out
}
