use std::sync::Arc;

use mptt_core::{MemoryStore, TreeOptions};
use mptt_test_support::Suite;

#[test]
fn memory_store_conformance() {
    Suite::new("mem_", |_options: Arc<TreeOptions>| MemoryStore::new()).run_all();
}
