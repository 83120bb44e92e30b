#![forbid(unsafe_code)]
//! SQLite storage for `mptt-core`.
//!
//! Statements come from [`mptt_core::sql::SqlRenderer`]; this crate only binds
//! parameters, decodes rows and maps units of work onto transactions and
//! savepoints of a [`rusqlite::Connection`].

mod store;

pub use store::SqliteStore;
