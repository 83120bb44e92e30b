//! Recompute tree fields from parent links.
//!
//! The planner is pure: it takes rows whose `parent` links are trusted and
//! returns the rows whose `tree_id`/`left`/`right`/`level` (or parent, for
//! re-rooted nodes) must change. The manager loads the rows and writes the plan.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use crate::ids::{NodeId, TreeId};
use crate::interval::TreeUpdate;
use crate::node::{cmp_order, TreeNode};
use crate::options::TreeOptions;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RebuildPlan {
    /// Every input row with its recomputed fields, in `(tree_id, left)` order.
    pub nodes: Vec<TreeNode>,
    /// Rows that differ from the input.
    pub changed: Vec<TreeNode>,
    /// Rows that became roots because their parent was missing or in a cycle.
    pub rerooted: Vec<NodeId>,
    pub trees: usize,
}

impl RebuildPlan {
    pub fn updates(&self) -> impl Iterator<Item = TreeUpdate> + '_ {
        self.changed.iter().map(|n| TreeUpdate::SetTreeFields {
            node: n.id,
            parent: n.parent,
            tree_id: n.tree_id,
            left: n.left,
            right: n.right,
            level: n.level,
        })
    }
}

/// Sibling order used by rebuilds: configured order keys, then the existing
/// left value, then the primary key.
pub fn cmp_siblings(a: &TreeNode, b: &TreeNode, options: &TreeOptions) -> Ordering {
    cmp_order(&a.order, &b.order, &options.order_insertion_by)
        .then(a.left.cmp(&b.left))
        .then(a.id.cmp(&b.id))
}

/// Plan a rebuild of every tree in `nodes`.
///
/// Roots keep their tree id when it is positive and not claimed by an earlier
/// root; other roots, orphans (parent not in `nodes`) and cycle members are
/// given fresh ids starting at `first_free_tree_id`.
pub fn rebuild_forest(
    nodes: &[TreeNode],
    options: &TreeOptions,
    first_free_tree_id: TreeId,
) -> RebuildPlan {
    let index: HashMap<NodeId, usize> = nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut roots = Vec::new();
    let mut orphans = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        match node.parent {
            None => roots.push(i),
            Some(p) => match index.get(&p) {
                Some(&pi) if pi != i => children[pi].push(i),
                Some(_) => orphans.push(i),
                None => orphans.push(i),
            },
        }
    }
    for list in children.iter_mut() {
        list.sort_by(|&a, &b| cmp_siblings(&nodes[a], &nodes[b], options));
    }
    roots.sort_by_key(|&i| (nodes[i].tree_id, nodes[i].left, nodes[i].id));
    orphans.sort_by_key(|&i| nodes[i].id);

    let mut claimed = BTreeSet::new();
    let mut kept = vec![None; nodes.len()];
    for &r in &roots {
        let tree_id = nodes[r].tree_id;
        if tree_id > 0 && claimed.insert(tree_id) {
            kept[r] = Some(tree_id);
        }
    }
    let mut fresh = claimed
        .iter()
        .next_back()
        .map_or(first_free_tree_id, |max| first_free_tree_id.max(max + 1));
    let mut next_tree_id = move || {
        let id = fresh;
        fresh += 1;
        id
    };

    let mut out: Vec<Option<TreeNode>> = vec![None; nodes.len()];
    let mut rerooted = Vec::new();
    let mut trees = 0;
    for &r in &roots {
        let tree_id = kept[r].unwrap_or_else(&mut next_tree_id);
        number_tree(r, tree_id, nodes, &children, &mut out);
        trees += 1;
    }
    for &o in &orphans {
        if out[o].is_none() {
            number_tree(o, next_tree_id(), nodes, &children, &mut out);
            rerooted.push(nodes[o].id);
            trees += 1;
        }
    }
    // Whatever is left hangs off a cycle; cut it at its lowest key.
    let mut leftover: Vec<usize> = (0..nodes.len()).filter(|&i| out[i].is_none()).collect();
    leftover.sort_by_key(|&i| nodes[i].id);
    for i in leftover {
        if out[i].is_none() {
            number_tree(i, next_tree_id(), nodes, &children, &mut out);
            rerooted.push(nodes[i].id);
            trees += 1;
        }
    }

    let mut rebuilt: Vec<TreeNode> = out.into_iter().flatten().collect();
    let changed = rebuilt
        .iter()
        .filter(|n| {
            let old = &nodes[index[&n.id]];
            (old.parent, old.tree_id, old.left, old.right, old.level)
                != (n.parent, n.tree_id, n.left, n.right, n.level)
        })
        .cloned()
        .collect();
    rebuilt.sort_by_key(|n| (n.tree_id, n.left));
    RebuildPlan {
        nodes: rebuilt,
        changed,
        rerooted,
        trees,
    }
}

/// Depth-first numbering of the subtree at `root`; `root` becomes a tree root.
fn number_tree(
    root: usize,
    tree_id: TreeId,
    nodes: &[TreeNode],
    children: &[Vec<usize>],
    out: &mut [Option<TreeNode>],
) {
    let mut counter = 1;
    // (node, level, next child position)
    let mut stack = vec![(root, 0_i64, 0_usize)];
    let mut placed = nodes[root].clone();
    placed.parent = None;
    placed.tree_id = tree_id;
    placed.level = 0;
    placed.left = counter;
    out[root] = Some(placed);
    counter += 1;

    while let Some((current, level, next)) = stack.pop() {
        match children[current][next..].iter().position(|&c| out[c].is_none()) {
            Some(offset) => {
                let child = children[current][next + offset];
                stack.push((current, level, next + offset + 1));
                let mut placed = nodes[child].clone();
                placed.tree_id = tree_id;
                placed.level = level + 1;
                placed.left = counter;
                counter += 1;
                out[child] = Some(placed);
                stack.push((child, level + 1, 0));
            }
            None => {
                if let Some(done) = out[current].as_mut() {
                    done.right = counter;
                }
                counter += 1;
            }
        }
    }
}
