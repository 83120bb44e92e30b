//! Fixtures and a conformance suite shared by the `mptt-core` store backends.
//!
//! Trees are written as one row per line, `id parent tree_id level left right`
//! with `-` for a missing parent, which keeps expected states readable in tests.

pub mod conformance;
mod fixtures;

pub use conformance::Suite;
pub use fixtures::{
    assert_invariants, assert_tree, load, normalize, parse_rows, render, GENRES,
};
