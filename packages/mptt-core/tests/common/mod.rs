#![allow(dead_code)]

use std::sync::Arc;

use mptt_core::{
    check_invariants, MemoryStore, NodeId, OrderField, TreeManager, TreeNode, TreeOptions,
    TreeRegistry, TreeStore,
};

/// Rows given as `id parent tree_id level left right`, `-` for no parent.
pub fn parse_rows(table: &str) -> Vec<TreeNode> {
    table
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            let f: Vec<&str> = line.split_whitespace().collect();
            let int = |i: usize| f[i].parse::<i64>().unwrap();
            TreeNode {
                id: NodeId(int(0)),
                parent: (f[1] != "-").then(|| NodeId(int(1))),
                tree_id: int(2),
                level: int(3),
                left: int(4),
                right: int(5),
                order: Vec::new(),
            }
        })
        .collect()
}

/// Render rows in the same `id parent tree_id level left right` layout,
/// ordered by `(tree_id, left)`.
pub fn render(nodes: &[TreeNode]) -> String {
    let mut nodes = nodes.to_vec();
    nodes.sort_by_key(|n| (n.tree_id, n.left));
    nodes
        .iter()
        .map(|n| {
            let parent = n.parent.map_or("-".to_string(), |p| p.to_string());
            format!("{} {} {} {} {} {}", n.id, parent, n.tree_id, n.level, n.left, n.right)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn normalize(table: &str) -> String {
    render(&parse_rows(table))
}

pub const GENRES: &str = "
    1 - 1 0 1 16
    2 1 1 1 2 9
    3 2 1 2 3 4
    4 2 1 2 5 6
    5 2 1 2 7 8
    6 1 1 1 10 15
    7 6 1 2 11 12
    8 6 1 2 13 14
    9 - 2 0 1 6
    10 9 2 1 2 3
    11 9 2 1 4 5
";

pub fn registry() -> TreeRegistry {
    let mut registry = TreeRegistry::new();
    registry.register("genre", TreeOptions::new("genre")).unwrap();
    registry.register_proxy("genre_proxy", "genre").unwrap();
    registry
        .register(
            "ordered",
            TreeOptions::new("ordered").order_insertion_by([OrderField::asc("name")]),
        )
        .unwrap();
    registry
}

pub fn manager_with(class: &str, rows: &str) -> TreeManager<MemoryStore> {
    let registry = registry();
    TreeManager::new(registry.class(class).unwrap(), MemoryStore::from_rows(parse_rows(rows)))
}

pub fn genres() -> TreeManager<MemoryStore> {
    manager_with("genre", GENRES)
}

pub fn empty(class: &str) -> TreeManager<MemoryStore> {
    manager_with(class, "")
}

pub fn proxy_of(manager: &TreeManager<MemoryStore>) -> TreeManager<MemoryStore> {
    let class = registry().class("genre_proxy").unwrap();
    TreeManager::new(Arc::clone(&class), manager.store().clone())
}

pub fn assert_tree<S: TreeStore>(manager: &mut TreeManager<S>, expected: &str) {
    let nodes = manager.all_nodes().unwrap();
    assert_eq!(render(&nodes), normalize(expected));
}

pub fn assert_valid<S: TreeStore>(manager: &mut TreeManager<S>) {
    let nodes = manager.all_nodes().unwrap();
    if let Err(err) = check_invariants(&nodes) {
        panic!("{err}\n{}", mptt_core::debug_dump(&nodes));
    }
}
