#![forbid(unsafe_code)]
//! PostgreSQL storage for `mptt-core`.
//!
//! Structural writers of one tree are serialized with transaction-scoped
//! advisory locks keyed by `(table, tree_id)`, so several processes can
//! maintain the same table without corrupting the numbering.

mod params;
mod store;

pub use store::PgStore;
