use std::sync::Arc;

use mptt_core::{
    Error, NewNode, NodeId, OrderField, OrderValue, TreeManager, TreeOptions, TreeRegistry,
};
use mptt_sqlite::SqliteStore;
use mptt_test_support::{assert_invariants, assert_tree, load, parse_rows, Suite, GENRES};

fn registry() -> TreeRegistry {
    let mut registry = TreeRegistry::new();
    registry.register("genre", TreeOptions::new("genre")).unwrap();
    registry
        .register(
            "ranked",
            TreeOptions::new("ranked").order_insertion_by([OrderField::asc("rank")]),
        )
        .unwrap();
    registry
}

fn genres() -> TreeManager<SqliteStore> {
    let class = registry().class("genre").unwrap();
    let mut store = SqliteStore::new_in_memory(Arc::clone(class.options())).unwrap();
    load(&mut store, &parse_rows(GENRES)).unwrap();
    TreeManager::new(class, store)
}

#[test]
fn sqlite_store_conformance() {
    Suite::new("", |options: Arc<TreeOptions>| {
        SqliteStore::new_in_memory(options).expect("in-memory sqlite")
    })
    .run_all();
}

#[test]
fn trees_persist_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trees.sqlite");
    let registry = registry();
    let class = registry.class("genre").unwrap();

    {
        let store = SqliteStore::open(&path, Arc::clone(class.options())).unwrap();
        let mut m = TreeManager::new(Arc::clone(&class), store);
        let root = m.insert(NewNode::root()).unwrap();
        let child = m.insert(NewNode::child_of(root.id)).unwrap();
        m.insert(NewNode::child_of(child.id)).unwrap();
    }

    let store = SqliteStore::open(&path, Arc::clone(class.options())).unwrap();
    let mut m = TreeManager::new(class, store);
    assert_tree(&mut m, "
        1 - 1 0 1 6
        2 1 1 1 2 5
        3 2 1 2 3 4
    ");
}

#[test]
fn failed_mutations_roll_back_their_space_changes() {
    let mut m = genres();
    // The gap is opened before the insert hits the duplicate key.
    let err = m.insert(NewNode::child_of(NodeId(2)).with_id(3)).unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
    assert_tree(&mut m, GENRES);
    assert!(m.store().connection().is_autocommit());
}

#[test]
fn units_join_a_caller_transaction() {
    let mut m = genres();
    m.store().connection().execute_batch("BEGIN").unwrap();
    let mut shmup = m.get(NodeId(6)).unwrap();
    m.move_node(&mut shmup, Some(NodeId(9))).unwrap();
    assert_invariants(&mut m);

    let conn = m.into_store().into_connection();
    assert!(!conn.is_autocommit());
    conn.execute_batch("ROLLBACK").unwrap();
    let tree_of_six: i64 = conn
        .query_row("SELECT \"tree_id\" FROM \"genre\" WHERE \"id\" = 6", [], |row| row.get(0))
        .unwrap();
    assert_eq!(tree_of_six, 1);
}

#[test]
fn order_values_keep_their_storage_class() {
    let class = registry().class("ranked").unwrap();
    let store = SqliteStore::new_in_memory(Arc::clone(class.options())).unwrap();
    let mut m = TreeManager::new(class, store);
    let root = m.insert(NewNode::root().with_order([OrderValue::Null])).unwrap();
    for rank in [
        OrderValue::from("b"),
        OrderValue::Int(10),
        OrderValue::Bytes(vec![0xff]),
        OrderValue::Int(2),
        OrderValue::Null,
    ] {
        m.insert(NewNode::child_of(root.id).with_order([rank])).unwrap();
    }

    let root = m.get(root.id).unwrap();
    let ranks: Vec<OrderValue> = m
        .children(&root)
        .unwrap()
        .into_iter()
        .map(|n| n.order[0].clone())
        .collect();
    assert_eq!(
        ranks,
        vec![
            OrderValue::Null,
            OrderValue::Int(2),
            OrderValue::Int(10),
            OrderValue::from("b"),
            OrderValue::Bytes(vec![0xff]),
        ]
    );
    assert_invariants(&mut m);
}
