use mptt_core::{check_invariants, debug_dump, NewRow, NodeId, TreeManager, TreeNode, TreeStore};

/// The genres forest: two trees, eleven nodes.
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

pub fn parse_rows(table: &str) -> Vec<TreeNode> {
    table
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            let f: Vec<&str> = line.split_whitespace().collect();
            assert_eq!(f.len(), 6, "malformed row {line:?}");
            let int = |i: usize| -> i64 {
                f[i].parse()
                    .unwrap_or_else(|_| panic!("bad number {:?} in {line:?}", f[i]))
            };
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

pub fn render(nodes: &[TreeNode]) -> String {
    let mut nodes = nodes.to_vec();
    nodes.sort_by_key(|n| (n.tree_id, n.left, n.id));
    nodes
        .iter()
        .map(|n| {
            let parent = n.parent.map_or_else(|| "-".to_string(), |p| p.to_string());
            format!("{} {} {} {} {} {}", n.id, parent, n.tree_id, n.level, n.left, n.right)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn normalize(table: &str) -> String {
    render(&parse_rows(table))
}

/// Insert `nodes` verbatim, keys included.
pub fn load<S: TreeStore>(store: &mut S, nodes: &[TreeNode]) -> mptt_core::Result<()> {
    store.atomic(|store| {
        for node in nodes {
            store.insert(&NewRow::from(node))?;
        }
        Ok(())
    })
}

pub fn assert_tree<S: TreeStore>(manager: &mut TreeManager<S>, expected: &str) {
    let nodes = manager.all_nodes().expect("read all nodes");
    assert_eq!(render(&nodes), normalize(expected));
}

pub fn assert_invariants<S: TreeStore>(manager: &mut TreeManager<S>) {
    let nodes = manager.all_nodes().expect("read all nodes");
    if let Err(err) = check_invariants(&nodes) {
        panic!("{err}\n{}", debug_dump(&nodes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_render_back_in_tree_order() {
        let rows = parse_rows("9 - 2 0 1 2\n1 - 1 0 1 4\n2 1 1 1 2 3");
        assert_eq!(rows[0].parent, None);
        assert_eq!(rows[2].parent, Some(NodeId(1)));
        assert_eq!(render(&rows), "1 - 1 0 1 4\n2 1 1 1 2 3\n9 - 2 0 1 2");
        assert_eq!(normalize(GENRES).lines().count(), 11);
    }
}
