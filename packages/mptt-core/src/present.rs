//! Helpers for rendering depth-first node sequences without extra queries.

use std::iter::Peekable;

use crate::error::{Error, Result};
use crate::ids::NodeId;
use crate::node::TreeNode;

/// Yields `(previous, current, next)` for every item.
pub struct PreviousCurrentNext<I: Iterator> {
    iter: Peekable<I>,
    previous: Option<I::Item>,
}

impl<I> Iterator for PreviousCurrentNext<I>
where
    I: Iterator,
    I::Item: Clone,
{
    type Item = (Option<I::Item>, I::Item, Option<I::Item>);

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.iter.next()?;
        let next = self.iter.peek().cloned();
        let previous = self.previous.replace(current.clone());
        Some((previous, current, next))
    }
}

pub fn previous_current_next<I>(items: I) -> PreviousCurrentNext<I::IntoIter>
where
    I: IntoIterator,
    I::Item: Clone,
{
    PreviousCurrentNext {
        iter: items.into_iter().peekable(),
        previous: None,
    }
}

/// Structure around one item of a depth-first sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeItemInfo {
    /// The item opens a level deeper than the one before it.
    pub new_level: bool,
    /// Levels that end after this item, deepest first.
    pub closed_levels: Vec<i64>,
    /// Ancestors within the sequence, root first. Only tracked on request.
    pub ancestors: Option<Vec<NodeId>>,
}

pub struct TreeItems<'a> {
    inner: PreviousCurrentNext<std::slice::Iter<'a, TreeNode>>,
    first_level: i64,
    ancestors: Option<Vec<NodeId>>,
    last_closed: usize,
}

impl<'a> Iterator for TreeItems<'a> {
    type Item = (&'a TreeNode, TreeItemInfo);

    fn next(&mut self) -> Option<Self::Item> {
        let (previous, current, next) = self.inner.next()?;
        let new_level = match previous {
            None => {
                self.first_level = current.level;
                true
            }
            Some(previous) => {
                let new_level = previous.level < current.level;
                if let Some(ancestors) = self.ancestors.as_mut() {
                    let keep = ancestors.len().saturating_sub(self.last_closed);
                    ancestors.truncate(keep);
                    if new_level {
                        ancestors.push(previous.id);
                    }
                }
                new_level
            }
        };
        let closed_to = next.map_or(self.first_level - 1, |n| n.level);
        let closed_levels: Vec<i64> = ((closed_to + 1)..=current.level).rev().collect();
        self.last_closed = closed_levels.len();
        Some((
            current,
            TreeItemInfo {
                new_level,
                closed_levels,
                ancestors: self.ancestors.clone(),
            },
        ))
    }
}

/// Annotate a depth-first sequence (e.g. [`TreeManager::all_nodes`](crate::TreeManager::all_nodes))
/// for nested-list rendering in a single pass.
pub fn tree_item_iterator(items: &[TreeNode], with_ancestors: bool) -> TreeItems<'_> {
    TreeItems {
        inner: previous_current_next(items.iter()),
        first_level: 0,
        ancestors: with_ancestors.then(Vec::new),
        last_closed: 0,
    }
}

/// In-memory forest built from a depth-first sequence; nodes are addressed by
/// their position in that sequence.
#[derive(Clone, Debug, Default)]
pub struct CachedForest {
    nodes: Vec<TreeNode>,
    parents: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    roots: Vec<usize>,
}

impl CachedForest {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &TreeNode {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn children(&self, index: usize) -> &[usize] {
        &self.children[index]
    }

    pub fn parent(&self, index: usize) -> Option<usize> {
        self.parents[index]
    }

    /// `(index, depth below its top-level node)` in depth-first order.
    pub fn walk(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, usize)> = self.roots.iter().rev().map(|&r| (r, 0)).collect();
        while let Some((index, depth)) = stack.pop() {
            out.push((index, depth));
            stack.extend(self.children[index].iter().rev().map(|&c| (c, depth + 1)));
        }
        out
    }
}

/// Link a depth-first sequence into a forest without touching storage.
///
/// Items shallower than the first one mean the sequence is not depth-first.
/// Items deeper than their predecessor hang off the nearest shallower item.
pub fn cache_tree(nodes: Vec<TreeNode>) -> Result<CachedForest> {
    let Some(root_level) = nodes.first().map(|n| n.level) else {
        return Ok(CachedForest::default());
    };
    let mut forest = CachedForest {
        parents: vec![None; nodes.len()],
        children: vec![Vec::new(); nodes.len()],
        roots: Vec::new(),
        nodes: Vec::new(),
    };
    let mut path: Vec<usize> = Vec::new();
    for (index, node) in nodes.iter().enumerate() {
        if node.level < root_level {
            return Err(Error::NotDepthFirst(node.id));
        }
        let depth = (node.level - root_level) as usize;
        path.truncate(depth);
        match path.last() {
            Some(&parent) if depth > 0 => {
                forest.parents[index] = Some(parent);
                forest.children[parent].push(index);
            }
            _ => forest.roots.push(index),
        }
        path.push(index);
    }
    forest.nodes = nodes;
    Ok(forest)
}
