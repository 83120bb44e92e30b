//! Interval arithmetic for the nested-set encoding.
//!
//! Every structural change is expressed as one [`TreeUpdate`]: a bulk
//! conditional update over the rows of a single tree, evaluated against the
//! pre-update values of each row. Stores either render it to one SQL statement
//! (see [`crate::sql`]) or evaluate [`TreeUpdate::apply_to`] row by row.
//!
//! The geometry helpers compute the parameters of those updates from a node and
//! its target. They validate the move and never touch storage.

use crate::error::{Error, Result};
use crate::ids::{NodeId, TreeId};
use crate::node::{OrderValue, Position, TreeNode};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeUpdate {
    /// Shift `left`/`right` values greater than `target` by `size` within one tree.
    ManageSpace {
        tree_id: TreeId,
        target: i64,
        size: i64,
    },
    /// Carry the extent `[left, right]` of `tree_id` into `new_tree_id`, closing
    /// the gap it leaves behind. Only `node` is reparented.
    InterTreeMove {
        tree_id: TreeId,
        left: i64,
        right: i64,
        level_change: i64,
        left_right_change: i64,
        new_tree_id: TreeId,
        gap_target_left: i64,
        gap_size: i64,
        node: NodeId,
        new_parent: Option<NodeId>,
    },
    /// Move the extent `[left, right]` within its tree. Rows between the old and
    /// new position (`[left_boundary, right_boundary]`) shift by `gap_size`.
    MoveSubtree {
        tree_id: TreeId,
        left: i64,
        right: i64,
        level_change: i64,
        left_right_change: i64,
        left_boundary: i64,
        right_boundary: i64,
        gap_size: i64,
        node: NodeId,
        new_parent: NodeId,
    },
    /// Relabel a whole tree (rooted at `node`) as a subtree of `new_parent`.
    MoveTree {
        tree_id: TreeId,
        left: i64,
        right: i64,
        level_change: i64,
        left_right_change: i64,
        new_tree_id: TreeId,
        node: NodeId,
        new_parent: NodeId,
    },
    /// Overwrite the structural fields of one row.
    SetTreeFields {
        node: NodeId,
        parent: Option<NodeId>,
        tree_id: TreeId,
        left: i64,
        right: i64,
        level: i64,
    },
    /// Overwrite the order-key columns of one row.
    SetOrder {
        node: NodeId,
        values: Vec<OrderValue>,
    },
}

impl TreeUpdate {
    pub fn create_space(size: i64, target: i64, tree_id: TreeId) -> Self {
        TreeUpdate::ManageSpace {
            tree_id,
            target,
            size,
        }
    }

    pub fn close_gap(size: i64, target: i64, tree_id: TreeId) -> Self {
        TreeUpdate::ManageSpace {
            tree_id,
            target,
            size: -size,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TreeUpdate::ManageSpace { .. } => "manage_space",
            TreeUpdate::InterTreeMove { .. } => "inter_tree_move",
            TreeUpdate::MoveSubtree { .. } => "move_subtree",
            TreeUpdate::MoveTree { .. } => "move_tree",
            TreeUpdate::SetTreeFields { .. } => "set_tree_fields",
            TreeUpdate::SetOrder { .. } => "set_order",
        }
    }

    /// Evaluate the update against one row. Returns whether the row matched.
    pub fn apply_to(&self, row: &mut TreeNode) -> bool {
        match *self {
            TreeUpdate::ManageSpace {
                tree_id,
                target,
                size,
            } => {
                if row.tree_id != tree_id || !(row.left > target || row.right > target) {
                    return false;
                }
                if row.left > target {
                    row.left += size;
                }
                if row.right > target {
                    row.right += size;
                }
                true
            }
            TreeUpdate::InterTreeMove {
                tree_id,
                left,
                right,
                level_change,
                left_right_change,
                new_tree_id,
                gap_target_left,
                gap_size,
                node,
                new_parent,
            } => {
                if row.tree_id != tree_id {
                    return false;
                }
                let moved = (left..=right).contains(&row.left);
                let old = row.clone();
                if moved {
                    row.level -= level_change;
                    row.tree_id = new_tree_id;
                    row.left -= left_right_change;
                } else if old.left > gap_target_left {
                    row.left -= gap_size;
                }
                if (left..=right).contains(&old.right) {
                    row.right -= left_right_change;
                } else if old.right > gap_target_left {
                    row.right -= gap_size;
                }
                if row.id == node {
                    row.parent = new_parent;
                }
                true
            }
            TreeUpdate::MoveSubtree {
                tree_id,
                left,
                right,
                level_change,
                left_right_change,
                left_boundary,
                right_boundary,
                gap_size,
                node,
                new_parent,
            } => {
                if row.tree_id != tree_id {
                    return false;
                }
                let old = row.clone();
                if (left..=right).contains(&old.left) {
                    row.level -= level_change;
                    row.left += left_right_change;
                } else if (left_boundary..=right_boundary).contains(&old.left) {
                    row.left += gap_size;
                }
                if (left..=right).contains(&old.right) {
                    row.right += left_right_change;
                } else if (left_boundary..=right_boundary).contains(&old.right) {
                    row.right += gap_size;
                }
                if row.id == node {
                    row.parent = Some(new_parent);
                }
                true
            }
            TreeUpdate::MoveTree {
                tree_id,
                left,
                right,
                level_change,
                left_right_change,
                new_tree_id,
                node,
                new_parent,
            } => {
                if row.tree_id != tree_id || !(left..=right).contains(&row.left) {
                    return false;
                }
                row.level -= level_change;
                row.left -= left_right_change;
                row.right -= left_right_change;
                row.tree_id = new_tree_id;
                if row.id == node {
                    row.parent = Some(new_parent);
                }
                true
            }
            TreeUpdate::SetTreeFields {
                node,
                parent,
                tree_id,
                left,
                right,
                level,
            } => {
                if row.id != node {
                    return false;
                }
                row.parent = parent;
                row.tree_id = tree_id;
                row.left = left;
                row.right = right;
                row.level = level;
                true
            }
            TreeUpdate::SetOrder { node, ref values } => {
                if row.id != node {
                    return false;
                }
                row.order = values.clone();
                true
            }
        }
    }
}

/// Geometry for placing a subtree relative to a target in another tree (or for
/// placing a brand-new node anywhere).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterTreeGeometry {
    /// Boundary after which space must be opened in the target tree.
    pub space_target: i64,
    /// Subtracted from every moved row's level.
    pub level_change: i64,
    /// Subtracted from every moved row's left/right.
    pub left_right_change: i64,
    /// New parent of the moved node.
    pub parent: NodeId,
}

pub fn inter_tree_geometry(
    node: &TreeNode,
    target: &TreeNode,
    position: Position,
) -> Result<InterTreeGeometry> {
    let (space_target, level_change, parent) = match position {
        Position::LastChild | Position::FirstChild => {
            let space_target = if position == Position::LastChild {
                target.right - 1
            } else {
                target.left
            };
            (space_target, node.level - target.level - 1, target.id)
        }
        Position::Left | Position::Right => {
            let parent = target.parent.ok_or_else(|| {
                Error::InvalidTarget(format!(
                    "node {} can't be made a sibling of root node {}",
                    node.id, target.id
                ))
            })?;
            let space_target = if position == Position::Left {
                target.left - 1
            } else {
                target.right
            };
            (space_target, node.level - target.level, parent)
        }
    };
    Ok(InterTreeGeometry {
        space_target,
        level_change,
        left_right_change: node.left - space_target - 1,
        parent,
    })
}

/// Parameters of a [`TreeUpdate::MoveSubtree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WithinTreeGeometry {
    pub new_left: i64,
    pub new_right: i64,
    pub level_change: i64,
    pub left_right_change: i64,
    pub left_boundary: i64,
    pub right_boundary: i64,
    pub gap_size: i64,
    pub parent: NodeId,
}

impl WithinTreeGeometry {
    pub fn update(&self, node: &TreeNode) -> TreeUpdate {
        TreeUpdate::MoveSubtree {
            tree_id: node.tree_id,
            left: node.left,
            right: node.right,
            level_change: self.level_change,
            left_right_change: self.left_right_change,
            left_boundary: self.left_boundary,
            right_boundary: self.right_boundary,
            gap_size: self.gap_size,
            node: node.id,
            new_parent: self.parent,
        }
    }
}

/// Compute where `node` lands when moved relative to `target` in the same tree.
///
/// The new left edge depends on whether the target lies before or after the
/// node in traversal order; everything between the two positions slides over
/// by the node's width in the opposite direction.
pub fn within_tree_geometry(
    node: &TreeNode,
    target: &TreeNode,
    position: Position,
) -> Result<WithinTreeGeometry> {
    let (left, right) = (node.left, node.right);
    let width = node.width();
    let relation = if position.is_child() { "child" } else { "sibling" };
    if node.id == target.id {
        return Err(Error::InvalidTarget(format!(
            "node {} can't be made a {relation} of itself",
            node.id
        )));
    }
    if left < target.left && target.left < right {
        return Err(Error::InvalidTarget(format!(
            "node {} can't be made a {relation} of its descendant {}",
            node.id, target.id
        )));
    }

    let (new_left, new_right, level_change, parent) = match position {
        Position::LastChild => {
            let (l, r) = if target.right > right {
                (target.right - width, target.right - 1)
            } else {
                (target.right, target.right + width - 1)
            };
            (l, r, node.level - target.level - 1, target.id)
        }
        Position::FirstChild => {
            let (l, r) = if target.left > left {
                (target.left - width + 1, target.left)
            } else {
                (target.left + 1, target.left + width)
            };
            (l, r, node.level - target.level - 1, target.id)
        }
        Position::Left | Position::Right => {
            let parent = target.parent.ok_or_else(|| {
                Error::InvalidTarget(format!(
                    "node {} can't be made a sibling of root node {}",
                    node.id, target.id
                ))
            })?;
            let (l, r) = if position == Position::Left {
                if target.left > left {
                    (target.left - width, target.left - 1)
                } else {
                    (target.left, target.left + width - 1)
                }
            } else if target.right > right {
                (target.right - width + 1, target.right)
            } else {
                (target.right + 1, target.right + width)
            };
            (l, r, node.level - target.level, parent)
        }
    };

    let left_right_change = new_left - left;
    let gap_size = if left_right_change > 0 { -width } else { width };
    Ok(WithinTreeGeometry {
        new_left,
        new_right,
        level_change,
        left_right_change,
        left_boundary: left.min(new_left),
        right_boundary: right.max(new_right),
        gap_size,
        parent,
    })
}
