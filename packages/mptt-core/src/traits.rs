use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::ids::{NodeId, TreeId};
use crate::interval::TreeUpdate;
use crate::node::{OrderValue, TreeNode};

/// Relational storage for one tree class.
///
/// A store is bound to a single schema mapping when it is constructed. Every
/// method is a single statement (or a single read); [`TreeStore::atomic`]
/// groups several into one all-or-nothing unit.
pub trait TreeStore {
    /// Run one bulk conditional update. Returns the number of rows touched.
    fn execute(&mut self, update: &TreeUpdate) -> Result<u64>;

    fn max_tree_id(&mut self) -> Result<Option<TreeId>>;

    /// Filtered read ordered by `(tree_id, left)` (reversed when `descending`).
    fn select(&mut self, query: &NodeQuery) -> Result<Vec<TreeNode>>;

    /// Insert one row, returning its primary key.
    fn insert(&mut self, row: &NewRow) -> Result<NodeId>;

    /// Delete every row of `tree_id` whose left lies in `[left, right]`.
    fn delete_range(&mut self, tree_id: TreeId, left: i64, right: i64) -> Result<u64>;

    fn delete_nodes(&mut self, ids: &[NodeId]) -> Result<u64>;

    /// Run `f` as one unit; on error nothing it wrote remains. Nested calls
    /// join the enclosing unit and roll back only their own part.
    fn atomic<T, F>(&mut self, f: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<T>;

    /// Serialize structural writers of one tree until the enclosing unit ends.
    fn lock_tree(&mut self, _tree_id: TreeId) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ParentFilter {
    #[default]
    Any,
    Root,
    Of(NodeId),
    In(Vec<NodeId>),
}

/// Row filter. Bounds are inclusive; unset fields do not filter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeQuery {
    pub ids: Option<Vec<NodeId>>,
    pub tree_id: Option<TreeId>,
    pub parent: ParentFilter,
    pub left_min: Option<i64>,
    pub left_max: Option<i64>,
    pub right_min: Option<i64>,
    pub right_max: Option<i64>,
    pub exclude: Option<NodeId>,
    pub leaves_only: bool,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl NodeQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: NodeId) -> Self {
        Self {
            ids: Some(vec![id]),
            ..Self::default()
        }
    }

    pub fn by_ids(ids: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            ids: Some(ids.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn in_tree(tree_id: TreeId) -> Self {
        Self {
            tree_id: Some(tree_id),
            ..Self::default()
        }
    }

    pub fn parent(mut self, parent: ParentFilter) -> Self {
        self.parent = parent;
        self
    }

    pub fn left_between(mut self, min: i64, max: i64) -> Self {
        self.left_min = Some(min);
        self.left_max = Some(max);
        self
    }

    pub fn left_below(mut self, bound: i64) -> Self {
        self.left_max = Some(bound - 1);
        self
    }

    pub fn left_above(mut self, bound: i64) -> Self {
        self.left_min = Some(bound + 1);
        self
    }

    pub fn right_below(mut self, bound: i64) -> Self {
        self.right_max = Some(bound - 1);
        self
    }

    pub fn right_above(mut self, bound: i64) -> Self {
        self.right_min = Some(bound + 1);
        self
    }

    pub fn excluding(mut self, id: NodeId) -> Self {
        self.exclude = Some(id);
        self
    }

    pub fn leaves(mut self) -> Self {
        self.leaves_only = true;
        self
    }

    pub fn reversed(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, row: &TreeNode) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&row.id) {
                return false;
            }
        }
        if self.tree_id.is_some_and(|t| row.tree_id != t) {
            return false;
        }
        let parent_ok = match &self.parent {
            ParentFilter::Any => true,
            ParentFilter::Root => row.parent.is_none(),
            ParentFilter::Of(p) => row.parent == Some(*p),
            ParentFilter::In(ps) => row.parent.is_some_and(|p| ps.contains(&p)),
        };
        if !parent_ok {
            return false;
        }
        let within = |value: i64, min: Option<i64>, max: Option<i64>| {
            min.map_or(true, |m| value >= m) && max.map_or(true, |m| value <= m)
        };
        within(row.left, self.left_min, self.left_max)
            && within(row.right, self.right_min, self.right_max)
            && self.exclude != Some(row.id)
            && (!self.leaves_only || row.right == row.left + 1)
    }
}

/// A row ready for insertion with its tree fields already computed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewRow {
    pub id: Option<NodeId>,
    pub parent: Option<NodeId>,
    pub tree_id: TreeId,
    pub left: i64,
    pub right: i64,
    pub level: i64,
    pub order: Vec<OrderValue>,
}

impl NewRow {
    pub fn into_node(self, id: NodeId) -> TreeNode {
        TreeNode {
            id,
            parent: self.parent,
            tree_id: self.tree_id,
            left: self.left,
            right: self.right,
            level: self.level,
            order: self.order,
        }
    }
}

impl From<&TreeNode> for NewRow {
    fn from(node: &TreeNode) -> Self {
        Self {
            id: Some(node.id),
            parent: node.parent,
            tree_id: node.tree_id,
            left: node.left,
            right: node.right,
            level: node.level,
            order: node.order.clone(),
        }
    }
}

/// Map-backed store used by tests, benchmarks and embedders without a database.
///
/// Bulk updates are evaluated row by row against each row's old values, which
/// matches how a single SQL `UPDATE ... CASE` statement behaves.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    rows: BTreeMap<NodeId, TreeNode>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = TreeNode>) -> Self {
        Self {
            rows: rows.into_iter().map(|r| (r.id, r)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        self.rows.get(&id)
    }

    /// Rows in primary-key order.
    pub fn rows(&self) -> impl Iterator<Item = &TreeNode> {
        self.rows.values()
    }
}

impl TreeStore for MemoryStore {
    fn execute(&mut self, update: &TreeUpdate) -> Result<u64> {
        let mut touched = 0;
        for row in self.rows.values_mut() {
            if update.apply_to(row) {
                touched += 1;
            }
        }
        Ok(touched)
    }

    fn max_tree_id(&mut self) -> Result<Option<TreeId>> {
        Ok(self.rows.values().map(|r| r.tree_id).max())
    }

    fn select(&mut self, query: &NodeQuery) -> Result<Vec<TreeNode>> {
        let mut found: Vec<TreeNode> =
            self.rows.values().filter(|r| query.matches(r)).cloned().collect();
        found.sort_by_key(|r| (r.tree_id, r.left, r.id));
        if query.descending {
            found.reverse();
        }
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    fn insert(&mut self, row: &NewRow) -> Result<NodeId> {
        let id = match row.id {
            Some(id) => id,
            None => NodeId(self.rows.keys().next_back().map_or(1, |k| k.0 + 1)),
        };
        if self.rows.contains_key(&id) {
            return Err(Error::Storage(format!("duplicate primary key {id}")));
        }
        self.rows.insert(id, row.clone().into_node(id));
        Ok(id)
    }

    fn delete_range(&mut self, tree_id: TreeId, left: i64, right: i64) -> Result<u64> {
        let before = self.rows.len();
        self.rows
            .retain(|_, r| !(r.tree_id == tree_id && (left..=right).contains(&r.left)));
        Ok((before - self.rows.len()) as u64)
    }

    fn delete_nodes(&mut self, ids: &[NodeId]) -> Result<u64> {
        let before = self.rows.len();
        self.rows.retain(|id, _| !ids.contains(id));
        Ok((before - self.rows.len()) as u64)
    }

    fn atomic<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let snapshot = self.rows.clone();
        let result = f(self);
        if result.is_err() {
            self.rows = snapshot;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, parent: Option<i64>, tree_id: TreeId, left: i64, right: i64) -> NewRow {
        NewRow {
            id: Some(NodeId(id)),
            parent: parent.map(NodeId),
            tree_id,
            left,
            right,
            level: i64::from(parent.is_some()),
            order: Vec::new(),
        }
    }

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        for r in [
            row(1, None, 1, 1, 6),
            row(2, Some(1), 1, 2, 3),
            row(3, Some(1), 1, 4, 5),
            row(4, None, 2, 1, 2),
        ] {
            store.insert(&r).unwrap();
        }
        store
    }

    #[test]
    fn select_filters_and_orders() {
        let mut store = store();
        let ids = |rows: Vec<TreeNode>| rows.into_iter().map(|r| r.id.0).collect::<Vec<_>>();

        assert_eq!(ids(store.select(&NodeQuery::all()).unwrap()), vec![1, 2, 3, 4]);
        assert_eq!(
            ids(store.select(&NodeQuery::all().parent(ParentFilter::Root).reversed()).unwrap()),
            vec![4, 1]
        );
        assert_eq!(
            ids(store.select(&NodeQuery::in_tree(1).leaves().excluding(NodeId(2))).unwrap()),
            vec![3]
        );
        assert_eq!(
            ids(store.select(&NodeQuery::in_tree(1).left_above(1).limit(1)).unwrap()),
            vec![2]
        );
        assert_eq!(store.max_tree_id().unwrap(), Some(2));
    }

    #[test]
    fn insert_assigns_ids_and_rejects_duplicates() {
        let mut store = store();
        let mut fresh = row(0, None, 3, 1, 2);
        fresh.id = None;
        assert_eq!(store.insert(&fresh).unwrap(), NodeId(5));
        assert!(matches!(store.insert(&row(1, None, 9, 1, 2)), Err(Error::Storage(_))));
    }

    #[test]
    fn atomic_rolls_back_on_error() {
        let mut store = store();
        let result: Result<()> = store.atomic(|s| {
            s.delete_range(1, 1, 6)?;
            s.atomic(|inner| {
                inner.delete_nodes(&[NodeId(4)])?;
                Ok(())
            })?;
            Err(Error::Storage("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.len(), 4);

        store
            .atomic(|s| s.delete_range(1, 2, 5).map(|_| ()))
            .unwrap();
        assert_eq!(store.len(), 2);
    }
}
