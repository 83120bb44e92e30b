//! Behaviour every [`TreeStore`] must share with [`mptt_core::MemoryStore`].
//!
//! Backends hand a factory to [`Suite`]; each case asks it for a fresh store
//! bound to a table of its own, so one database can host the whole run.

use std::sync::Arc;

use mptt_core::{
    Error, NewNode, NewRow, NodeId, NodeQuery, OrderField, OrderValue, ParentFilter, Position,
    Result, TreeManager, TreeNode, TreeOptions, TreeRegistry, TreeStore, TreeUpdate,
};

use crate::fixtures::{assert_invariants, assert_tree, load, parse_rows, GENRES};

pub struct Suite<F> {
    prefix: String,
    factory: F,
}

fn ids(nodes: Vec<TreeNode>) -> Vec<i64> {
    nodes.into_iter().map(|n| n.id.0).collect()
}

fn right_of<S: TreeStore>(store: &mut S, id: i64) -> i64 {
    store.select(&NodeQuery::by_id(NodeId(id))).expect("select")[0].right
}

fn names(nodes: Vec<TreeNode>) -> Vec<String> {
    nodes.into_iter().map(|n| n.order[0].to_string()).collect()
}

impl<S, F> Suite<F>
where
    S: TreeStore,
    F: FnMut(Arc<TreeOptions>) -> S,
{
    /// `prefix` is prepended to every table name the suite creates.
    pub fn new(prefix: impl Into<String>, factory: F) -> Self {
        Self {
            prefix: prefix.into(),
            factory,
        }
    }

    fn manager(&mut self, options: TreeOptions, rows: &str) -> TreeManager<S> {
        let options = TreeOptions {
            table: format!("{}{}", self.prefix, options.table),
            ..options
        };
        let mut registry = TreeRegistry::new();
        let class = registry
            .register("conformance", options)
            .expect("register conformance class");
        let mut store = (self.factory)(Arc::clone(class.options()));
        load(&mut store, &parse_rows(rows)).expect("load fixture rows");
        TreeManager::new(class, store)
    }

    pub fn run_all(&mut self) {
        self.store_primitives();
        self.store_writes();
        self.atomic_units();
        self.insert_move_delete();
        self.deletes();
        self.reparenting();
        self.ordered_insertion();
        self.delayed_updates();
        self.rebuild();
        self.custom_columns();
    }

    pub fn store_primitives(&mut self) {
        let mut m = self.manager(TreeOptions::new("primitives"), GENRES);
        let store = m.store_mut();
        let mut select = |query: NodeQuery| ids(store.select(&query).expect("select"));

        assert_eq!(select(NodeQuery::all()), (1..=11).collect::<Vec<i64>>());
        assert_eq!(select(NodeQuery::all().parent(ParentFilter::Root)), [1, 9]);
        assert_eq!(select(NodeQuery::in_tree(1).parent(ParentFilter::Of(NodeId(2)))), [3, 4, 5]);
        assert_eq!(
            select(NodeQuery::all().parent(ParentFilter::In(vec![NodeId(2), NodeId(6)]))),
            [3, 4, 5, 7, 8]
        );
        assert!(select(NodeQuery::all().parent(ParentFilter::In(Vec::new()))).is_empty());
        assert_eq!(select(NodeQuery::in_tree(1).left_between(3, 8)), [3, 4, 5]);
        assert_eq!(select(NodeQuery::in_tree(1).left_below(3).right_above(4)), [1, 2]);
        assert_eq!(select(NodeQuery::in_tree(1).leaves()), [3, 4, 5, 7, 8]);
        assert_eq!(select(NodeQuery::in_tree(1).reversed().limit(2)), [8, 7]);
        assert_eq!(select(NodeQuery::by_ids([NodeId(11), NodeId(3)])), [3, 11]);
        assert_eq!(select(NodeQuery::in_tree(2).excluding(NodeId(10))), [9, 11]);

        let ten = store.select(&NodeQuery::by_id(NodeId(10))).expect("select 10");
        assert_eq!(
            ten,
            vec![TreeNode {
                id: NodeId(10),
                parent: Some(NodeId(9)),
                tree_id: 2,
                left: 2,
                right: 3,
                level: 1,
                order: Vec::new(),
            }]
        );
        assert_eq!(store.max_tree_id().expect("max tree id"), Some(2));
    }

    pub fn store_writes(&mut self) {
        let mut m = self.manager(TreeOptions::new("writes"), GENRES);
        let store = m.store_mut();
        store.execute(&TreeUpdate::create_space(2, 5, 2)).expect("create space");
        assert_eq!(right_of(store, 9), 8);
        assert_eq!(right_of(store, 11), 5);
        assert_eq!(right_of(store, 1), 16);
        store.execute(&TreeUpdate::close_gap(2, 5, 2)).expect("close gap");
        assert_eq!(right_of(store, 9), 6);

        let row = NewRow {
            id: None,
            parent: None,
            tree_id: 3,
            left: 1,
            right: 2,
            level: 0,
            order: Vec::new(),
        };
        let id = store.insert(&row).expect("insert with generated key");
        assert!(id.0 > 11, "generated key {id} collides with fixture keys");
        assert_eq!(store.max_tree_id().expect("max tree id"), Some(3));
        assert!(matches!(
            store.insert(&NewRow { id: Some(NodeId(3)), ..row }),
            Err(Error::Storage(_))
        ));

        assert_eq!(store.delete_nodes(&[id]).expect("delete by key"), 1);
        assert_eq!(store.delete_nodes(&[]).expect("delete nothing"), 0);
        assert_eq!(store.delete_range(1, 10, 15).expect("delete range"), 3);
        assert_eq!(store.select(&NodeQuery::all()).expect("select").len(), 8);
    }

    pub fn atomic_units(&mut self) {
        let mut m = self.manager(TreeOptions::new("atomic"), GENRES);
        let store = m.store_mut();

        let failed: Result<()> = store.atomic(|s| {
            s.delete_nodes(&[NodeId(3)])?;
            Err(Error::Storage("abort".into()))
        });
        assert!(failed.is_err());
        assert_eq!(store.select(&NodeQuery::all()).expect("select").len(), 11);

        let remaining = store
            .atomic(|s| {
                s.delete_nodes(&[NodeId(3)])?;
                let inner: Result<u64> = s.atomic(|s| {
                    s.delete_nodes(&[NodeId(4)])?;
                    Err(Error::InvalidTarget("abort inner".into()))
                });
                assert!(inner.is_err());
                s.select(&NodeQuery::all()).map(|rows| rows.len())
            })
            .expect("outer unit commits");
        assert_eq!(remaining, 10);
        assert_eq!(
            ids(store.select(&NodeQuery::by_ids([NodeId(3), NodeId(4)])).expect("select")),
            [4]
        );
    }

    pub fn insert_move_delete(&mut self) {
        let mut m = self.manager(TreeOptions::new("scenario"), "");
        let a = m.insert(NewNode::root().with_id(1)).expect("insert a");
        assert_eq!((a.tree_id, a.left, a.right, a.level), (1, 1, 2, 0));
        let b = m.insert(NewNode::child_of(a.id).with_id(2)).expect("insert b");
        let mut c = m
            .insert_node(NewNode::root().with_id(3), Some(a.id), Position::FirstChild)
            .expect("insert c");
        assert_tree(&mut m, "
            1 - 1 0 1 6
            3 1 1 1 2 3
            2 1 1 1 4 5
        ");

        m.move_to(&mut c, Some(b.id), Position::LastChild).expect("move c");
        assert_eq!((c.left, c.right, c.level), (3, 4, 2));
        let b = m.get(b.id).expect("get b");
        assert_eq!(m.delete(&b).expect("delete b"), 2);
        assert_tree(&mut m, "1 - 1 0 1 2");

        let root = m.insert(NewNode::root().with_id(10)).expect("insert root");
        assert_eq!(root.tree_id, 2);
        let err = m.insert_node(NewNode::root(), Some(root.id), Position::Left).unwrap_err();
        assert!(matches!(err, Error::InvalidTarget(_)));
        assert_invariants(&mut m);
    }

    pub fn deletes(&mut self) {
        let mut m = self.manager(TreeOptions::new("deletes"), GENRES);
        let four = m.get(NodeId(4)).expect("get 4");
        assert_eq!(m.delete(&four).expect("delete 4"), 1);
        let five = m.get(NodeId(5)).expect("5 survives its left sibling");
        assert_eq!((five.left, five.right), (5, 6));
        assert_eq!(right_of(m.store_mut(), 2), 7);
        assert_invariants(&mut m);

        let platformer = m.get(NodeId(2)).expect("get 2");
        assert_eq!(m.delete(&platformer).expect("delete 2"), 3);
        assert_tree(&mut m, "
            1 - 1 0 1 8
            6 1 1 1 2 7
            7 6 1 2 3 4
            8 6 1 2 5 6
            9 - 2 0 1 6
            10 9 2 1 2 3
            11 9 2 1 4 5
        ");
    }

    pub fn reparenting(&mut self) {
        let mut m = self.manager(TreeOptions::new("reparent"), GENRES);
        let mut shmup = m.get(NodeId(6)).expect("get 6");
        m.move_node(&mut shmup, Some(NodeId(9))).expect("move 6 under 9");
        assert_eq!((shmup.tree_id, shmup.left, shmup.right), (2, 6, 11));
        assert_invariants(&mut m);
        m.move_node(&mut shmup, Some(NodeId(1))).expect("move 6 back");
        assert_tree(&mut m, GENRES);

        let mut action = m.get(NodeId(1)).expect("get 1");
        m.move_node(&mut action, Some(NodeId(9))).expect("move tree 1 under 9");
        assert_tree(&mut m, "
            9 - 2 0 1 22
            10 9 2 1 2 3
            11 9 2 1 4 5
            1 9 2 1 6 21
            2 1 2 2 7 14
            3 2 2 3 8 9
            4 2 2 3 10 11
            5 2 2 3 12 13
            6 1 2 2 15 20
            7 6 2 3 16 17
            8 6 2 3 18 19
        ");

        m.make_root_node(&mut action).expect("make 1 a root again");
        assert_eq!((action.tree_id, action.left, action.right), (3, 1, 16));
        let mut seven = m.get(NodeId(7)).expect("get 7");
        m.move_to(&mut seven, Some(NodeId(3)), Position::Left).expect("move 7 left of 3");
        assert_eq!(seven.parent, Some(NodeId(2)));
        assert_invariants(&mut m);
    }

    pub fn ordered_insertion(&mut self) {
        let options = TreeOptions::new("ordered").order_insertion_by([OrderField::asc("name")]);
        let mut m = self.manager(options, "");
        let root = m.insert(NewNode::root().with_order(["root"])).expect("insert root");
        let mut inserted = Vec::new();
        for name in ["m", "c", "x", "a"] {
            inserted.push(
                m.insert(NewNode::child_of(root.id).with_order([name]))
                    .expect("insert child"),
            );
        }
        let root = m.get(root.id).expect("get root");
        assert_eq!(names(m.children(&root).expect("children")), ["a", "c", "m", "x"]);

        let mut x = inserted[2].clone();
        m.update_order(&mut x, vec![OrderValue::from("b")]).expect("update order");
        assert_eq!(x.order, vec![OrderValue::from("b")]);
        assert_eq!(names(m.children(&root).expect("children")), ["a", "b", "c", "m"]);
        assert_invariants(&mut m);
    }

    pub fn delayed_updates(&mut self) {
        let mut m = self.manager(TreeOptions::new("delayed"), GENRES);
        let right_inside = m
            .with_delayed_updates(|m| {
                let mut eight = m.get(NodeId(8))?;
                m.move_node(&mut eight, Some(NodeId(9)))?;
                m.insert(NewNode::child_of(NodeId(2)).with_id(12))?;
                let four = m.get(NodeId(4))?;
                m.delete(&four)?;
                Ok(m.get(NodeId(1))?.right)
            })
            .expect("delayed scope");
        // Numbering is only repaired when the scope closes.
        assert_eq!(right_inside, 16);
        assert_tree(&mut m, "
            1 - 1 0 1 14
            2 1 1 1 2 9
            3 2 1 2 3 4
            5 2 1 2 5 6
            12 2 1 2 7 8
            6 1 1 1 10 13
            7 6 1 2 11 12
            9 - 2 0 1 8
            10 9 2 1 2 3
            11 9 2 1 4 5
            8 9 2 1 6 7
        ");
    }

    pub fn rebuild(&mut self) {
        let mut m = self.manager(TreeOptions::new("rebuild"), GENRES);
        for node in parse_rows(GENRES) {
            m.store_mut()
                .execute(&TreeUpdate::SetTreeFields {
                    node: node.id,
                    parent: node.parent,
                    tree_id: node.tree_id,
                    left: 0,
                    right: 0,
                    level: 9,
                })
                .expect("scramble");
        }
        let report = m.partial_rebuild(2).expect("partial rebuild");
        assert_eq!(report.nodes, 3);
        assert_eq!(m.get(NodeId(9)).expect("get 9").right, 6);

        let report = m.rebuild().expect("rebuild");
        assert_eq!((report.trees, report.nodes, report.updated), (2, 11, 8));
        assert_tree(&mut m, GENRES);
        assert_eq!(m.rebuild().expect("second rebuild").updated, 0);
    }

    pub fn custom_columns(&mut self) {
        let options = TreeOptions::new("category")
            .pk_column("category_id")
            .parent_column("parent")
            .tree_id_column("tree")
            .left_column("l")
            .right_column("r")
            .level_column("depth");
        let mut m = self.manager(options, "");
        let root = m.insert(NewNode::root()).expect("insert root");
        let child = m.insert(NewNode::child_of(root.id)).expect("insert child");
        let mut grandchild = m.insert(NewNode::child_of(child.id)).expect("insert grandchild");
        m.move_node(&mut grandchild, Some(root.id)).expect("move grandchild up");
        assert_eq!((grandchild.level, grandchild.left, grandchild.right), (1, 4, 5));

        let root = m.get(root.id).expect("get root");
        assert_eq!(m.descendants(&root, false).expect("descendants").len(), 2);
        assert_invariants(&mut m);
    }
}
