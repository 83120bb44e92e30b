#![forbid(unsafe_code)]
//! Nested-set (MPTT) tree maintenance over relational storage.
//!
//! Each node row carries `(tree_id, left, right, level, parent)`; ancestry is
//! interval containment. [`TreeManager`] computes new interval values for
//! inserts, moves and deletes and applies each change as one bulk conditional
//! update through a [`TreeStore`]. The crate stays independent of concrete
//! databases: [`MemoryStore`] lives here, SQL backends render statements with
//! [`sql::SqlRenderer`].

pub mod deferred;
pub mod error;
pub mod ids;
pub mod interval;
pub mod invariants;
pub mod manager;
pub mod node;
pub mod options;
pub mod present;
pub mod rebuild;
pub mod sql;
pub mod traits;

pub use deferred::{DelayedUpdates, UpdatesDisabled};
pub use error::{Error, Result};
pub use ids::{NodeId, TreeId};
pub use interval::{
    inter_tree_geometry, within_tree_geometry, InterTreeGeometry, TreeUpdate, WithinTreeGeometry,
};
pub use invariants::{check_invariants, debug_dump};
pub use manager::{RebuildReport, TreeManager};
pub use node::{cmp_order, NewNode, OrderValue, Position, TreeNode};
#[cfg(feature = "serde")]
pub use options::{ClassConfig, RegistryConfig};
pub use options::{OrderField, TreeClass, TreeOptions, TreeRegistry};
pub use present::{
    cache_tree, previous_current_next, tree_item_iterator, CachedForest, TreeItemInfo,
};
pub use rebuild::{rebuild_forest, RebuildPlan};
pub use traits::{MemoryStore, NewRow, NodeQuery, ParentFilter, TreeStore};
