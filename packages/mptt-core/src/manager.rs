//! Query layer and mutation engine for one tree class.
//!
//! Every structural mutation runs inside [`TreeStore::atomic`]: the rows it
//! depends on are locked and re-read, the geometry is computed, and the change
//! is applied as one bulk conditional update (plus one space-opening update when
//! a subtree lands in another tree). While updates are disabled or delayed for
//! the class, mutations only write parent links and ordering hints instead.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use crate::deferred::{self, DelayedUpdates, UpdatesDisabled, PENDING_BASE};
use crate::error::{Error, Result};
use crate::ids::{NodeId, TreeId};
use crate::interval::{inter_tree_geometry, within_tree_geometry, TreeUpdate};
use crate::node::{cmp_order, NewNode, OrderValue, Position, TreeNode};
use crate::options::{TreeClass, TreeOptions};
use crate::rebuild::rebuild_forest;
use crate::traits::{NewRow, NodeQuery, ParentFilter, TreeStore};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub trees: usize,
    pub nodes: usize,
    pub updated: usize,
}

/// Entry point for every tree operation of one class over one store.
pub struct TreeManager<S> {
    class: Arc<TreeClass>,
    store: S,
}

impl<S: TreeStore> TreeManager<S> {
    /// `store` must be bound to the same schema mapping as `class`.
    pub fn new(class: Arc<TreeClass>, store: S) -> Self {
        Self { class, store }
    }

    pub fn class(&self) -> &TreeClass {
        &self.class
    }

    pub fn options(&self) -> &TreeOptions {
        self.class.options()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn table(&self) -> &str {
        &self.class.options().table
    }

    fn deferred(&self) -> bool {
        !deferred::updates_enabled(self.table())
    }

    fn run<T>(&mut self, f: impl FnOnce(&mut Ops<'_, S>) -> Result<T>) -> Result<T> {
        let class = self.class.clone();
        let deferred = self.deferred();
        self.store.atomic(|store| {
            let mut ops = Ops {
                class: &class,
                store,
                deferred,
            };
            f(&mut ops)
        })
    }

    // ----- queries -------------------------------------------------------

    pub fn get(&mut self, id: NodeId) -> Result<TreeNode> {
        fetch(&mut self.store, id)
    }

    /// Re-read `node` from storage, discarding any local changes.
    pub fn refresh(&mut self, node: &mut TreeNode) -> Result<()> {
        *node = self.get(node.id)?;
        Ok(())
    }

    /// Every node, ordered by `(tree_id, left)`.
    pub fn all_nodes(&mut self) -> Result<Vec<TreeNode>> {
        self.store.select(&NodeQuery::all())
    }

    pub fn tree_nodes(&mut self, tree_id: TreeId) -> Result<Vec<TreeNode>> {
        self.store.select(&NodeQuery::in_tree(tree_id))
    }

    /// Roots ordered by their order keys when ordered insertion is configured,
    /// by tree id otherwise.
    pub fn root_nodes(&mut self) -> Result<Vec<TreeNode>> {
        let mut roots = self.store.select(&NodeQuery::all().parent(ParentFilter::Root))?;
        let options = self.class.options();
        if options.is_ordered() {
            let fields = &options.order_insertion_by;
            roots.sort_by(|a, b| cmp_order(&a.order, &b.order, fields).then(a.tree_id.cmp(&b.tree_id)));
        }
        Ok(roots)
    }

    pub fn root_node(&mut self, tree_id: TreeId) -> Result<Option<TreeNode>> {
        let roots = self
            .store
            .select(&NodeQuery::in_tree(tree_id).parent(ParentFilter::Root).limit(1))?;
        Ok(roots.into_iter().next())
    }

    pub fn get_root(&mut self, node: &TreeNode) -> Result<TreeNode> {
        if node.is_root() {
            return Ok(node.clone());
        }
        self.root_node(node.tree_id)?.ok_or_else(|| {
            Error::InconsistentState(format!("tree {} of node {} has no root", node.tree_id, node.id))
        })
    }

    /// Ancestors root first, or immediate parent first when `ascending`.
    pub fn ancestors(&mut self, node: &TreeNode, ascending: bool, include_self: bool) -> Result<Vec<TreeNode>> {
        if node.is_root() {
            return Ok(if include_self { vec![node.clone()] } else { Vec::new() });
        }
        let mut query = NodeQuery::in_tree(node.tree_id);
        if include_self {
            query.left_max = Some(node.left);
            query.right_min = Some(node.right);
        } else {
            query = query.left_below(node.left).right_above(node.right);
        }
        if ascending {
            query = query.reversed();
        }
        self.store.select(&query)
    }

    pub fn children(&mut self, node: &TreeNode) -> Result<Vec<TreeNode>> {
        if node.is_leaf() {
            return Ok(Vec::new());
        }
        self.store
            .select(&NodeQuery::in_tree(node.tree_id).parent(ParentFilter::Of(node.id)))
    }

    pub fn descendants(&mut self, node: &TreeNode, include_self: bool) -> Result<Vec<TreeNode>> {
        if node.is_leaf() {
            return Ok(if include_self { vec![node.clone()] } else { Vec::new() });
        }
        let first = if include_self { node.left } else { node.left + 1 };
        self.store
            .select(&NodeQuery::in_tree(node.tree_id).left_between(first, node.right - 1))
    }

    /// Leaves inside `node`'s extent (`node` itself when it is a leaf).
    pub fn leaf_nodes(&mut self, node: &TreeNode) -> Result<Vec<TreeNode>> {
        if node.is_leaf() {
            return Ok(vec![node.clone()]);
        }
        self.store.select(
            &NodeQuery::in_tree(node.tree_id)
                .left_between(node.left + 1, node.right - 1)
                .leaves(),
        )
    }

    /// Union of the ancestors of every node in `nodes`, in tree order.
    pub fn ancestors_of_all(&mut self, nodes: &[TreeNode], include_self: bool) -> Result<Vec<TreeNode>> {
        let mut found = BTreeMap::new();
        for node in nodes {
            for ancestor in self.ancestors(node, false, include_self)? {
                found.insert(ancestor.id, ancestor);
            }
        }
        Ok(in_tree_order(found))
    }

    /// Union of the descendants of every node in `nodes`, in tree order.
    pub fn descendants_of_all(&mut self, nodes: &[TreeNode], include_self: bool) -> Result<Vec<TreeNode>> {
        let mut found = BTreeMap::new();
        for node in nodes {
            for descendant in self.descendants(node, include_self)? {
                found.insert(descendant.id, descendant);
            }
        }
        Ok(in_tree_order(found))
    }

    /// Ancestors, the node and its descendants in depth-first order.
    pub fn family(&mut self, node: &TreeNode) -> Result<Vec<TreeNode>> {
        let mut family = self.ancestors(node, false, false)?;
        family.extend(self.descendants(node, true)?);
        Ok(family)
    }

    pub fn siblings(&mut self, node: &TreeNode, include_self: bool) -> Result<Vec<TreeNode>> {
        let mut siblings = match node.parent {
            None => self.root_nodes()?,
            Some(parent) => self
                .store
                .select(&NodeQuery::in_tree(node.tree_id).parent(ParentFilter::Of(parent)))?,
        };
        if !include_self {
            siblings.retain(|s| s.id != node.id);
        }
        Ok(siblings)
    }

    pub fn next_sibling(&mut self, node: &TreeNode) -> Result<Option<TreeNode>> {
        match node.parent {
            None => {
                let roots = self.root_nodes()?;
                let at = roots.iter().position(|r| r.id == node.id);
                Ok(at.and_then(|i| roots.get(i + 1).cloned()))
            }
            Some(parent) => Ok(self
                .store
                .select(
                    &NodeQuery::in_tree(node.tree_id)
                        .parent(ParentFilter::Of(parent))
                        .left_above(node.right - 1)
                        .limit(1),
                )?
                .into_iter()
                .next()),
        }
    }

    pub fn previous_sibling(&mut self, node: &TreeNode) -> Result<Option<TreeNode>> {
        match node.parent {
            None => {
                let roots = self.root_nodes()?;
                let at = roots.iter().position(|r| r.id == node.id);
                Ok(at.and_then(|i| i.checked_sub(1)).and_then(|i| roots.get(i).cloned()))
            }
            Some(parent) => Ok(self
                .store
                .select(
                    &NodeQuery::in_tree(node.tree_id)
                        .parent(ParentFilter::Of(parent))
                        .right_below(node.left + 1)
                        .reversed()
                        .limit(1),
                )?
                .into_iter()
                .next()),
        }
    }

    /// Ancestors (root first), the node, then its direct children.
    pub fn drilldown(&mut self, node: &TreeNode) -> Result<Vec<TreeNode>> {
        let mut nodes = self.ancestors(node, false, true)?;
        nodes.extend(self.children(node)?);
        Ok(nodes)
    }

    /// `max(tree_id) + 1`, or 1 for an empty table.
    ///
    /// Read-then-use: concurrent root creation must be serialized by the caller.
    pub fn get_next_tree_id(&mut self) -> Result<TreeId> {
        next_tree_id(&mut self.store)
    }

    // ----- mutations -----------------------------------------------------

    /// Insert `new` under `new.parent` (as a new root when `None`), honouring
    /// `order_insertion_by` among siblings.
    pub fn insert(&mut self, new: NewNode) -> Result<TreeNode> {
        self.run(|ops| ops.insert(new))
    }

    /// Insert `new` at `position` relative to `target`; `None` makes it the root
    /// of a new tree. Ignores `new.parent` and `order_insertion_by`.
    pub fn insert_node(&mut self, new: NewNode, target: Option<NodeId>, position: Position) -> Result<TreeNode> {
        self.run(|ops| ops.insert_node(new, target, position))
    }

    /// Reparent `node`, honouring `order_insertion_by` among its new siblings.
    ///
    /// `node.parent` is set to `new_parent` before anything is checked and is
    /// left that way if the move is rejected; call [`TreeManager::refresh`] to
    /// recover the stored state. On success `node` holds its new tree fields.
    pub fn move_node(&mut self, node: &mut TreeNode, new_parent: Option<NodeId>) -> Result<()> {
        node.parent = new_parent;
        let id = node.id;
        *node = self.run(|ops| ops.move_node(id, new_parent))?;
        Ok(())
    }

    /// Move `node` to `position` relative to `target`; `None` makes it a root.
    /// Ignores `order_insertion_by`.
    pub fn move_to(&mut self, node: &mut TreeNode, target: Option<NodeId>, position: Position) -> Result<()> {
        let id = node.id;
        *node = self.run(|ops| ops.move_to(id, target, position))?;
        Ok(())
    }

    /// Turn a child node into the root of a brand-new tree.
    pub fn make_root_node(&mut self, node: &mut TreeNode) -> Result<()> {
        self.move_to(node, None, Position::LastChild)
    }

    /// Attach the root `node` (and its whole tree) as last child of `new_parent`,
    /// which must live in another tree.
    pub fn make_child_node(&mut self, node: &mut TreeNode, new_parent: NodeId) -> Result<()> {
        let id = node.id;
        *node = self.run(|ops| {
            let (n, parent) = ops.fetch_pair_locked(id, new_parent)?;
            if n.is_child() {
                return Err(Error::InvalidTarget(format!("node {id} is not a root node")));
            }
            if n.tree_id == parent.tree_id {
                return Err(Error::InvalidTarget(format!(
                    "node {id} can't be made a child of node {new_parent} in its own tree"
                )));
            }
            ops.move_to(id, Some(new_parent), Position::LastChild)
        })?;
        Ok(())
    }

    /// Move the child `node` and its subtree under `new_parent` in another tree.
    pub fn move_to_new_tree(&mut self, node: &mut TreeNode, new_parent: NodeId) -> Result<()> {
        let id = node.id;
        *node = self.run(|ops| {
            let (n, parent) = ops.fetch_pair_locked(id, new_parent)?;
            if n.is_root() || n.tree_id == parent.tree_id {
                return Err(Error::InvalidTarget(format!(
                    "node {id} is not a child node outside the tree of node {new_parent}"
                )));
            }
            ops.move_to(id, Some(new_parent), Position::LastChild)
        })?;
        Ok(())
    }

    /// Move `node` relative to `target` within their shared tree.
    pub fn move_within_tree(&mut self, node: &mut TreeNode, target: NodeId, position: Position) -> Result<()> {
        let id = node.id;
        *node = self.run(|ops| {
            let (n, t) = ops.fetch_pair_locked(id, target)?;
            if n.tree_id != t.tree_id {
                return Err(Error::InvalidTarget(format!(
                    "node {id} and node {target} are in different trees"
                )));
            }
            ops.move_to(id, Some(target), position)
        })?;
        Ok(())
    }

    /// Delete `node` and its descendants, closing the gap they leave. Returns
    /// the number of rows removed.
    pub fn delete(&mut self, node: &TreeNode) -> Result<u64> {
        let id = node.id;
        self.run(|ops| ops.delete(id))
    }

    /// Store new order-key values for `node` and move it to its ordered
    /// position among its siblings.
    pub fn update_order(&mut self, node: &mut TreeNode, values: Vec<OrderValue>) -> Result<()> {
        let fields = self.class.options().order_insertion_by.len();
        if fields == 0 || values.len() != fields {
            return Err(Error::InvalidConfig(format!(
                "class {} takes {fields} order values, got {}",
                self.class.name(),
                values.len()
            )));
        }
        let id = node.id;
        *node = self.run(|ops| ops.update_order(id, values))?;
        Ok(())
    }

    /// Recompute tree fields of every node from parent links.
    pub fn rebuild(&mut self) -> Result<RebuildReport> {
        self.run(|ops| ops.rebuild())
    }

    /// Recompute tree fields of the tree rooted at the root of `tree_id`,
    /// following parent links. A missing root is a no-op.
    pub fn partial_rebuild(&mut self, tree_id: TreeId) -> Result<RebuildReport> {
        self.run(|ops| ops.partial_rebuild(tree_id))
    }

    // ----- deferred updates ---------------------------------------------

    fn check_owner(&self) -> Result<()> {
        match self.class.proxy_of() {
            None => Ok(()),
            Some(owner) => Err(Error::CantDisableUpdates(format!(
                "{} is a proxy of {owner}; use the owning class",
                self.class.name()
            ))),
        }
    }

    pub fn updates_enabled(&self) -> bool {
        deferred::updates_enabled(self.table())
    }

    pub fn is_tracking(&self) -> bool {
        deferred::is_tracking(self.table())
    }

    /// Stop maintaining tree fields on this thread until the guard drops.
    /// The caller is expected to [`rebuild`](Self::rebuild) afterwards.
    pub fn disable_updates(&self) -> Result<UpdatesDisabled> {
        self.check_owner()?;
        Ok(UpdatesDisabled::enter(self.table()))
    }

    /// Defer renumbering on this thread, recording the trees touched.
    pub fn delay_updates(&self) -> Result<DelayedUpdates> {
        self.check_owner()?;
        Ok(DelayedUpdates::enter(self.table()))
    }

    /// Close a delayed scope; the outermost one rebuilds each tracked tree once.
    pub fn finish_delayed_updates(&mut self, guard: DelayedUpdates) -> Result<Vec<TreeId>> {
        let trees = guard.into_dirty();
        for &tree_id in &trees {
            self.partial_rebuild(tree_id)?;
        }
        if !trees.is_empty() {
            tracing::info!(table = %self.table(), trees = trees.len(), "applied delayed tree updates");
        }
        Ok(trees)
    }

    pub fn with_updates_disabled<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let _guard = self.disable_updates()?;
        f(self)
    }

    /// Run `f` with delayed updates. If `f` fails the tracked trees are discarded.
    pub fn with_delayed_updates<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let guard = self.delay_updates()?;
        let out = f(self)?;
        self.finish_delayed_updates(guard)?;
        Ok(out)
    }
}

fn fetch<S: TreeStore>(store: &mut S, id: NodeId) -> Result<TreeNode> {
    store
        .select(&NodeQuery::by_id(id))?
        .into_iter()
        .next()
        .ok_or(Error::NodeNotFound(id))
}

fn in_tree_order(found: BTreeMap<NodeId, TreeNode>) -> Vec<TreeNode> {
    let mut nodes: Vec<TreeNode> = found.into_values().collect();
    nodes.sort_by_key(|n| (n.tree_id, n.left));
    nodes
}

fn next_tree_id<S: TreeStore>(store: &mut S) -> Result<TreeId> {
    Ok(store.max_tree_id()?.map_or(1, |max| max + 1))
}

/// One mutation in flight: runs inside the store's atomic unit.
struct Ops<'a, S> {
    class: &'a TreeClass,
    store: &'a mut S,
    deferred: bool,
}

impl<S: TreeStore> Ops<'_, S> {
    fn options(&self) -> &TreeOptions {
        self.class.options()
    }

    fn table(&self) -> &str {
        &self.class.options().table
    }

    fn fetch(&mut self, id: NodeId) -> Result<TreeNode> {
        fetch(&mut *self.store, id)
    }

    fn lock(&mut self, trees: impl IntoIterator<Item = TreeId>) -> Result<()> {
        for tree_id in trees.into_iter().collect::<BTreeSet<_>>() {
            self.store.lock_tree(tree_id)?;
        }
        Ok(())
    }

    /// Fetch `id` with its tree locked, re-reading after the lock is taken.
    fn fetch_locked(&mut self, id: NodeId) -> Result<TreeNode> {
        let mut node = self.fetch(id)?;
        loop {
            self.lock([node.tree_id])?;
            let again = self.fetch(id)?;
            if again.tree_id == node.tree_id {
                return Ok(again);
            }
            node = again;
        }
    }

    fn fetch_pair_locked(&mut self, a: NodeId, b: NodeId) -> Result<(TreeNode, TreeNode)> {
        let (mut first, mut second) = (self.fetch(a)?, self.fetch(b)?);
        loop {
            self.lock([first.tree_id, second.tree_id])?;
            let (again_first, again_second) = (self.fetch(a)?, self.fetch(b)?);
            if again_first.tree_id == first.tree_id && again_second.tree_id == second.tree_id {
                return Ok((again_first, again_second));
            }
            (first, second) = (again_first, again_second);
        }
    }

    fn execute(&mut self, update: &TreeUpdate) -> Result<u64> {
        self.store.execute(update)
    }

    fn track(&self, tree_id: TreeId) {
        deferred::track(self.table(), tree_id);
    }

    fn check_order_arity(&self, values: &[OrderValue]) -> Result<()> {
        let fields = self.options().order_insertion_by.len();
        if values.len() > fields {
            return Err(Error::InvalidConfig(format!(
                "class {} takes {fields} order values, got {}",
                self.class.name(),
                values.len()
            )));
        }
        Ok(())
    }

    /// The first existing child of `parent` that sorts after `order`.
    fn ordered_insertion_target(
        &mut self,
        order: &[OrderValue],
        exclude: Option<NodeId>,
        parent: Option<NodeId>,
    ) -> Result<Option<TreeNode>> {
        let Some(parent) = parent else {
            return Ok(None);
        };
        let class = self.class;
        let options = class.options();
        if !options.is_ordered() {
            return Ok(None);
        }
        let fields = &options.order_insertion_by;
        let parent = self.fetch(parent)?;
        let mut query = NodeQuery::in_tree(parent.tree_id).parent(ParentFilter::Of(parent.id));
        if let Some(id) = exclude {
            query = query.excluding(id);
        }
        let siblings = self.store.select(&query)?;
        Ok(siblings
            .into_iter()
            .filter(|s| cmp_order(&s.order, order, fields).is_gt())
            .min_by(|a, b| cmp_order(&a.order, &b.order, fields).then(a.left.cmp(&b.left))))
    }

    fn insert(&mut self, new: NewNode) -> Result<TreeNode> {
        let parent = new.parent;
        if let Some(parent) = parent {
            let parent_node = self.fetch_locked(parent)?;
            if !self.deferred {
                if let Some(sibling) = self.ordered_insertion_target(&new.order, None, Some(parent_node.id))? {
                    return self.insert_node(new, Some(sibling.id), Position::Left);
                }
            }
        }
        self.insert_node(new, parent, Position::LastChild)
    }

    fn insert_node(&mut self, new: NewNode, target: Option<NodeId>, position: Position) -> Result<TreeNode> {
        self.check_order_arity(&new.order)?;
        let Some(target) = target else {
            let tree_id = next_tree_id(&mut *self.store)?;
            let row = NewRow {
                id: new.id,
                parent: None,
                tree_id,
                left: 1,
                right: 2,
                level: 0,
                order: new.order,
            };
            let id = self.store.insert(&row)?;
            self.track(tree_id);
            tracing::debug!(node = %id, tree_id, "inserted root node");
            return Ok(row.into_node(id));
        };

        let target = self.fetch_locked(target)?;
        let row = if self.deferred {
            let parent = self.deferred_parent(&target, position)?;
            let left = self.pending_left(&target, position);
            NewRow {
                id: new.id,
                parent: Some(parent.id),
                tree_id: parent.tree_id,
                left,
                right: left + 1,
                level: parent.level + 1,
                order: new.order,
            }
        } else {
            let probe = TreeNode {
                id: new.id.unwrap_or(NodeId(0)),
                parent: None,
                tree_id: target.tree_id,
                left: 0,
                right: 1,
                level: 0,
                order: Vec::new(),
            };
            let geometry = inter_tree_geometry(&probe, &target, position)?;
            self.execute(&TreeUpdate::create_space(2, geometry.space_target, target.tree_id))?;
            let left = -geometry.left_right_change;
            NewRow {
                id: new.id,
                parent: Some(geometry.parent),
                tree_id: target.tree_id,
                left,
                right: left + 1,
                level: -geometry.level_change,
                order: new.order,
            }
        };
        let id = self.store.insert(&row)?;
        self.track(row.tree_id);
        tracing::debug!(
            node = %id,
            target = %target.id,
            %position,
            tree_id = row.tree_id,
            left = row.left,
            deferred = self.deferred,
            "inserted node"
        );
        Ok(row.into_node(id))
    }

    fn move_node(&mut self, id: NodeId, new_parent: Option<NodeId>) -> Result<TreeNode> {
        let node = self.fetch_locked(id)?;
        if node.parent == new_parent {
            return Ok(node);
        }
        if !self.deferred {
            if let Some(sibling) = self.ordered_insertion_target(&node.order, Some(id), new_parent)? {
                return self.move_to(id, Some(sibling.id), Position::Left);
            }
        }
        self.move_to(id, new_parent, Position::LastChild)
    }

    fn move_to(&mut self, id: NodeId, target: Option<NodeId>, position: Position) -> Result<TreeNode> {
        if self.deferred {
            return self.deferred_move(id, target, position);
        }
        match target {
            None => {
                let node = self.fetch_locked(id)?;
                if node.is_child() {
                    self.make_root(&node)?;
                }
            }
            Some(target) => {
                let (node, target) = self.fetch_pair_locked(id, target)?;
                if target.is_root() && !position.is_child() {
                    return Err(Error::InvalidTarget(format!(
                        "node {} can't be made a sibling of root node {}",
                        node.id, target.id
                    )));
                }
                if node.is_root() {
                    if node.tree_id == target.tree_id {
                        return Err(Error::InvalidTarget(format!(
                            "root node {} can't be moved into its own tree (target {})",
                            node.id, target.id
                        )));
                    }
                    self.move_tree(&node, &target, position)?;
                } else if node.tree_id == target.tree_id {
                    self.move_subtree(&node, &target, position)?;
                } else {
                    self.move_between_trees(&node, &target, position)?;
                }
            }
        }
        self.fetch(id)
    }

    fn make_root(&mut self, node: &TreeNode) -> Result<()> {
        let new_tree_id = next_tree_id(&mut *self.store)?;
        tracing::debug!(node = %node.id, from = node.tree_id, to = new_tree_id, "making root node");
        self.execute(&TreeUpdate::InterTreeMove {
            tree_id: node.tree_id,
            left: node.left,
            right: node.right,
            level_change: node.level,
            left_right_change: node.left - 1,
            new_tree_id,
            gap_target_left: node.left - 1,
            gap_size: node.width(),
            node: node.id,
            new_parent: None,
        })?;
        Ok(())
    }

    fn move_tree(&mut self, node: &TreeNode, target: &TreeNode, position: Position) -> Result<()> {
        let geometry = inter_tree_geometry(node, target, position)?;
        tracing::debug!(node = %node.id, target = %target.id, %position, ?geometry, "moving tree");
        self.execute(&TreeUpdate::create_space(node.width(), geometry.space_target, target.tree_id))?;
        self.execute(&TreeUpdate::MoveTree {
            tree_id: node.tree_id,
            left: node.left,
            right: node.right,
            level_change: geometry.level_change,
            left_right_change: geometry.left_right_change,
            new_tree_id: target.tree_id,
            node: node.id,
            new_parent: geometry.parent,
        })?;
        Ok(())
    }

    fn move_between_trees(&mut self, node: &TreeNode, target: &TreeNode, position: Position) -> Result<()> {
        let geometry = inter_tree_geometry(node, target, position)?;
        tracing::debug!(node = %node.id, target = %target.id, %position, ?geometry, "moving subtree to another tree");
        self.execute(&TreeUpdate::create_space(node.width(), geometry.space_target, target.tree_id))?;
        self.execute(&TreeUpdate::InterTreeMove {
            tree_id: node.tree_id,
            left: node.left,
            right: node.right,
            level_change: geometry.level_change,
            left_right_change: geometry.left_right_change,
            new_tree_id: target.tree_id,
            gap_target_left: node.left - 1,
            gap_size: node.width(),
            node: node.id,
            new_parent: Some(geometry.parent),
        })?;
        Ok(())
    }

    fn move_subtree(&mut self, node: &TreeNode, target: &TreeNode, position: Position) -> Result<()> {
        let geometry = within_tree_geometry(node, target, position)?;
        tracing::debug!(node = %node.id, target = %target.id, %position, ?geometry, "moving subtree within tree");
        self.execute(&geometry.update(node))?;
        Ok(())
    }

    fn delete(&mut self, id: NodeId) -> Result<u64> {
        let node = self.fetch_locked(id)?;
        let removed = if self.deferred {
            let ids = self.collect_subtree(&node)?.into_iter().map(|n| n.id).collect::<Vec<_>>();
            let removed = self.store.delete_nodes(&ids)?;
            self.track(node.tree_id);
            removed
        } else {
            let removed = self.store.delete_range(node.tree_id, node.left, node.right)?;
            self.execute(&TreeUpdate::close_gap(node.width(), node.right, node.tree_id))?;
            removed
        };
        tracing::debug!(node = %id, tree_id = node.tree_id, removed, deferred = self.deferred, "deleted subtree");
        Ok(removed)
    }

    fn update_order(&mut self, id: NodeId, values: Vec<OrderValue>) -> Result<TreeNode> {
        let node = self.fetch_locked(id)?;
        self.execute(&TreeUpdate::SetOrder {
            node: id,
            values: values.clone(),
        })?;
        if self.deferred {
            self.track(node.tree_id);
        } else if let Some(parent) = node.parent {
            match self.ordered_insertion_target(&values, Some(id), Some(parent))? {
                Some(sibling) => self.move_subtree(&node, &sibling, Position::Left)?,
                None => {
                    let parent = self.fetch(parent)?;
                    self.move_subtree(&node, &parent, Position::LastChild)?;
                }
            }
        }
        self.fetch(id)
    }

    // ----- deferred mode --------------------------------------------------

    /// The parent a node placed at `position` relative to `target` would get.
    fn deferred_parent(&mut self, target: &TreeNode, position: Position) -> Result<TreeNode> {
        if position.is_child() {
            return Ok(target.clone());
        }
        match target.parent {
            Some(parent) => self.fetch(parent),
            None => Err(Error::InvalidTarget(format!(
                "can't place a node as sibling of root node {}",
                target.id
            ))),
        }
    }

    /// A left value that sorts the node into place at the next rebuild.
    fn pending_left(&self, target: &TreeNode, position: Position) -> i64 {
        match position {
            Position::LastChild => PENDING_BASE + 4 * deferred::next_hint(self.table()),
            Position::FirstChild => -(PENDING_BASE + 4 * deferred::next_hint(self.table())),
            Position::Left => target.left - 1,
            Position::Right => target.right,
        }
    }

    fn deferred_move(&mut self, id: NodeId, target: Option<NodeId>, position: Position) -> Result<TreeNode> {
        let node = self.fetch_locked(id)?;
        let update = match target {
            None => {
                if node.is_root() {
                    return Ok(node);
                }
                TreeUpdate::SetTreeFields {
                    node: id,
                    parent: None,
                    tree_id: next_tree_id(&mut *self.store)?,
                    left: 1,
                    right: node.width(),
                    level: 0,
                }
            }
            Some(target) => {
                let target = self.fetch_locked(target)?;
                if target.id == node.id {
                    return Err(Error::InvalidTarget(format!(
                        "node {id} can't be placed relative to itself"
                    )));
                }
                let parent = self.deferred_parent(&target, position)?;
                self.check_not_descendant(&node, &parent, position)?;
                let left = self.pending_left(&target, position);
                TreeUpdate::SetTreeFields {
                    node: id,
                    parent: Some(parent.id),
                    tree_id: parent.tree_id,
                    left,
                    right: left + node.width() - 1,
                    level: parent.level + 1,
                }
            }
        };
        self.execute(&update)?;
        let moved = self.fetch(id)?;
        self.track(node.tree_id);
        self.track(moved.tree_id);
        tracing::debug!(node = %id, from = node.tree_id, to = moved.tree_id, "deferred move");
        Ok(moved)
    }

    /// Walk parent links from `parent` up; meeting `node` would create a cycle.
    fn check_not_descendant(&mut self, node: &TreeNode, parent: &TreeNode, position: Position) -> Result<()> {
        let relation = if position.is_child() { "child" } else { "sibling" };
        let mut seen = HashSet::new();
        let mut current = Some(parent.clone());
        while let Some(ancestor) = current {
            if ancestor.id == node.id {
                return Err(Error::InvalidTarget(format!(
                    "node {} can't be made a {relation} of itself or its descendant",
                    node.id
                )));
            }
            if !seen.insert(ancestor.id) {
                break;
            }
            current = match ancestor.parent {
                Some(p) => Some(self.fetch(p)?),
                None => None,
            };
        }
        Ok(())
    }

    /// `node` and everything reachable from it through parent links.
    fn collect_subtree(&mut self, node: &TreeNode) -> Result<Vec<TreeNode>> {
        let mut seen: HashSet<NodeId> = HashSet::from([node.id]);
        let mut nodes = vec![node.clone()];
        let mut frontier = vec![node.id];
        while !frontier.is_empty() {
            let children = self
                .store
                .select(&NodeQuery::all().parent(ParentFilter::In(std::mem::take(&mut frontier))))?;
            for child in children {
                if seen.insert(child.id) {
                    frontier.push(child.id);
                    nodes.push(child);
                }
            }
        }
        Ok(nodes)
    }

    // ----- rebuilds ---------------------------------------------------------

    fn write_plan(&mut self, nodes: &[TreeNode], first_free: TreeId) -> Result<RebuildReport> {
        let plan = rebuild_forest(nodes, self.class.options(), first_free);
        for update in plan.updates() {
            self.execute(&update)?;
        }
        if !plan.rerooted.is_empty() {
            tracing::info!(table = %self.table(), nodes = ?plan.rerooted, "re-rooted orphaned nodes");
        }
        Ok(RebuildReport {
            trees: plan.trees,
            nodes: plan.nodes.len(),
            updated: plan.changed.len(),
        })
    }

    fn rebuild(&mut self) -> Result<RebuildReport> {
        let nodes = self.store.select(&NodeQuery::all())?;
        self.lock(nodes.iter().map(|n| n.tree_id))?;
        let nodes = self.store.select(&NodeQuery::all())?;
        let first_free = next_tree_id(&mut *self.store)?;
        let report = self.write_plan(&nodes, first_free)?;
        tracing::info!(table = %self.table(), trees = report.trees, nodes = report.nodes, updated = report.updated, "rebuilt all trees");
        Ok(report)
    }

    fn partial_rebuild(&mut self, tree_id: TreeId) -> Result<RebuildReport> {
        self.lock([tree_id])?;
        let roots = self
            .store
            .select(&NodeQuery::in_tree(tree_id).parent(ParentFilter::Root))?;
        let root = match roots.as_slice() {
            [] => return Ok(RebuildReport::default()),
            [root] => root.clone(),
            _ => {
                return Err(Error::InconsistentState(format!(
                    "more than one root node with tree_id {tree_id}; do a full rebuild"
                )))
            }
        };
        let nodes = self.collect_subtree(&root)?;
        let first_free = next_tree_id(&mut *self.store)?;
        let report = self.write_plan(&nodes, first_free)?;
        tracing::info!(table = %self.table(), tree_id, nodes = report.nodes, updated = report.updated, "rebuilt tree");
        Ok(report)
    }
}
