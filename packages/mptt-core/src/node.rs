use std::cmp::Ordering;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ids::{NodeId, TreeId};
use crate::options::OrderField;

/// A value of one `order_insertion_by` column.
///
/// Cross-type ordering follows SQLite: NULL sorts before numbers, numbers before
/// text, text before blobs.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum OrderValue {
    Null,
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<i64> for OrderValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for OrderValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for OrderValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<OrderValue>> From<Option<T>> for OrderValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(OrderValue::Null)
    }
}

impl fmt::Display for OrderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderValue::Null => f.write_str("NULL"),
            OrderValue::Int(v) => write!(f, "{v}"),
            OrderValue::Text(v) => f.write_str(v),
            OrderValue::Bytes(v) => {
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Where a node goes relative to a target node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Position {
    FirstChild,
    LastChild,
    Left,
    Right,
}

impl Position {
    pub fn is_child(self) -> bool {
        matches!(self, Position::FirstChild | Position::LastChild)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Position::FirstChild => "first-child",
            Position::LastChild => "last-child",
            Position::Left => "left",
            Position::Right => "right",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node row as stored: identity, parent link, nested-set fields and order keys.
///
/// `order` is aligned with the class's `order_insertion_by` fields.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TreeNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub tree_id: TreeId,
    pub left: i64,
    pub right: i64,
    pub level: i64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub order: Vec<OrderValue>,
}

impl TreeNode {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    pub fn is_leaf(&self) -> bool {
        self.descendant_count() == 0
    }

    /// Number of nodes strictly inside this node's extent.
    pub fn descendant_count(&self) -> i64 {
        ((self.right - self.left - 1) / 2).max(0)
    }

    /// Width of the extent, i.e. the gap this subtree occupies.
    pub fn width(&self) -> i64 {
        self.right - self.left + 1
    }

    /// Whether `self` lies inside `other`'s extent.
    pub fn is_descendant_of(&self, other: &TreeNode, include_self: bool) -> bool {
        if include_self && self.id == other.id {
            return true;
        }
        self.tree_id == other.tree_id && self.left > other.left && self.right < other.right
    }

    pub fn is_ancestor_of(&self, other: &TreeNode, include_self: bool) -> bool {
        if include_self && self.id == other.id {
            return true;
        }
        other.is_descendant_of(self, false)
    }
}

/// A node that has not been stored yet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NewNode {
    /// Caller-assigned key; `None` lets the store assign one.
    #[cfg_attr(feature = "serde", serde(default))]
    pub id: Option<NodeId>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub parent: Option<NodeId>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub order: Vec<OrderValue>,
}

impl NewNode {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child_of(parent: NodeId) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_order<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<OrderValue>,
    {
        self.order = values.into_iter().map(Into::into).collect();
        self
    }
}

/// Compare two order-key tuples field by field; the first non-equal key decides.
///
/// Missing values compare as NULL.
pub fn cmp_order(a: &[OrderValue], b: &[OrderValue], fields: &[OrderField]) -> Ordering {
    const NULL: OrderValue = OrderValue::Null;
    for (i, field) in fields.iter().enumerate() {
        let left = a.get(i).unwrap_or(&NULL);
        let right = b.get(i).unwrap_or(&NULL);
        let ord = if field.descending {
            right.cmp(left)
        } else {
            left.cmp(right)
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
