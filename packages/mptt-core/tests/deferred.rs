mod common;

use common::{assert_tree, assert_valid, empty, genres, proxy_of, render};
use mptt_core::{Error, MemoryStore, NewNode, NodeId, Position, TreeManager};

type Manager = TreeManager<MemoryStore>;

/// Run `ops` once with immediate updates and once inside a delayed scope; the
/// stored trees must come out identical.
fn assert_same_as_immediate(ops: impl Fn(&mut Manager) -> mptt_core::Result<()>) {
    let mut immediate = genres();
    ops(&mut immediate).unwrap();
    assert_valid(&mut immediate);

    let mut delayed = genres();
    delayed.with_delayed_updates(|m| ops(m)).unwrap();
    assert!(delayed.updates_enabled());
    assert!(!delayed.is_tracking());
    assert_valid(&mut delayed);

    assert_eq!(
        render(&delayed.all_nodes().unwrap()),
        render(&immediate.all_nodes().unwrap())
    );
}

#[test]
fn delayed_inserts_match_immediate_inserts() {
    assert_same_as_immediate(|m| {
        m.insert(NewNode::child_of(NodeId(2)))?;
        m.insert_node(NewNode::root(), Some(NodeId(6)), Position::FirstChild)?;
        m.insert_node(NewNode::root(), Some(NodeId(4)), Position::Left)?;
        m.insert_node(NewNode::root(), Some(NodeId(10)), Position::Right)?;
        m.insert(NewNode::root())?;
        m.insert(NewNode::child_of(NodeId(2)))?;
        Ok(())
    });
}

#[test]
fn delayed_moves_match_immediate_moves() {
    // Leaf to another tree.
    assert_same_as_immediate(|m| {
        let mut eight = m.get(NodeId(8))?;
        m.move_node(&mut eight, Some(NodeId(9)))
    });
    // Subtree to another tree.
    assert_same_as_immediate(|m| {
        let mut shmup = m.get(NodeId(6))?;
        m.move_node(&mut shmup, Some(NodeId(11)))
    });
    // Subtree to a new root.
    assert_same_as_immediate(|m| {
        let mut shmup = m.get(NodeId(6))?;
        m.move_node(&mut shmup, None)
    });
    // Whole tree under a child of another tree.
    assert_same_as_immediate(|m| {
        let mut action = m.get(NodeId(1))?;
        m.move_node(&mut action, Some(NodeId(9)))
    });
    // Within a tree, by sibling position.
    assert_same_as_immediate(|m| {
        let mut seven = m.get(NodeId(7))?;
        m.move_to(&mut seven, Some(NodeId(3)), Position::Left)?;
        let mut three = m.get(NodeId(3))?;
        m.move_to(&mut three, Some(NodeId(5)), Position::Right)
    });
}

#[test]
fn delayed_deletes_match_immediate_deletes() {
    assert_same_as_immediate(|m| {
        let shmup = m.get(NodeId(6))?;
        m.delete(&shmup)?;
        let four = m.get(NodeId(4))?;
        m.delete(&four)?;
        Ok(())
    });
}

#[test]
fn writes_inside_a_delayed_scope_leave_numbering_pending() {
    let mut m = genres();
    let guard = m.delay_updates().unwrap();
    assert!(guard.is_outermost());
    assert!(!m.updates_enabled());
    assert!(m.is_tracking());

    let mut eight = m.get(NodeId(8)).unwrap();
    m.move_node(&mut eight, Some(NodeId(9))).unwrap();
    assert_eq!(eight.parent, Some(NodeId(9)));
    assert_eq!(eight.tree_id, 2);
    // Tree 1 still carries the hole left by the moved leaf.
    assert_eq!(m.get(NodeId(1)).unwrap().right, 16);

    let trees = m.finish_delayed_updates(guard).unwrap();
    assert_eq!(trees, vec![1, 2]);
    assert!(m.updates_enabled());
    assert_eq!(m.get(NodeId(1)).unwrap().right, 14);
    assert_eq!(m.get(NodeId(8)).unwrap().left, 6);
    assert_valid(&mut m);
}

#[test]
fn nested_delayed_scopes_rebuild_once_at_the_outermost() {
    let mut m = genres();
    let outer = m.delay_updates().unwrap();
    let inner = m.delay_updates().unwrap();
    assert!(!inner.is_outermost());
    m.insert(NewNode::child_of(NodeId(10))).unwrap();
    assert!(m.finish_delayed_updates(inner).unwrap().is_empty());
    assert!(!m.updates_enabled());
    assert_eq!(m.get(NodeId(9)).unwrap().right, 6);

    assert_eq!(m.finish_delayed_updates(outer).unwrap(), vec![2]);
    assert_eq!(m.get(NodeId(9)).unwrap().right, 8);
    assert_valid(&mut m);
}

#[test]
fn failed_delayed_scope_discards_tracked_trees() {
    let mut m = genres();
    let err = m
        .with_delayed_updates(|m| {
            m.insert(NewNode::child_of(NodeId(3)))?;
            m.insert(NewNode::child_of(NodeId(99)))
        })
        .unwrap_err();
    assert!(matches!(err, Error::NodeNotFound(NodeId(99))));
    assert!(m.updates_enabled());
    assert!(!m.is_tracking());

    // The first insert was committed but never renumbered.
    let twelve = m.get(NodeId(12)).unwrap();
    assert_eq!(twelve.parent, Some(NodeId(3)));
    m.partial_rebuild(1).unwrap();
    assert_valid(&mut m);
}

#[test]
fn disabled_updates_need_an_explicit_rebuild() {
    let mut m = genres();
    m.with_updates_disabled(|m| {
        assert!(!m.updates_enabled());
        assert!(!m.is_tracking());
        m.insert(NewNode::child_of(NodeId(5)))?;
        let mut rpg = m.get(NodeId(9))?;
        m.move_node(&mut rpg, Some(NodeId(7)))?;
        Ok(())
    })
    .unwrap();
    assert!(m.updates_enabled());
    assert!(mptt_core::check_invariants(&m.all_nodes().unwrap()).is_err());

    let report = m.rebuild().unwrap();
    assert_eq!(report.trees, 1);
    assert_eq!(report.nodes, 12);
    assert_tree(&mut m, "
        1 - 1 0 1 24
        2 1 1 1 2 11
        3 2 1 2 3 4
        4 2 1 2 5 6
        5 2 1 2 7 10
        12 5 1 3 8 9
        6 1 1 1 12 23
        7 6 1 2 13 20
        9 7 1 3 14 19
        10 9 1 4 15 16
        11 9 1 4 17 18
        8 6 1 2 21 22
    ");
}

#[test]
fn deferred_moves_still_reject_cycles() {
    let mut m = genres();
    let _guard = m.disable_updates().unwrap();
    let mut platformer = m.get(NodeId(2)).unwrap();
    let err = m.move_node(&mut platformer, Some(NodeId(4))).unwrap_err();
    assert!(matches!(err, Error::InvalidTarget(_)));
    let err = m
        .move_to(&mut platformer, Some(NodeId(2)), Position::FirstChild)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTarget(_)));
    let err = m
        .move_to(&mut platformer, Some(NodeId(1)), Position::Right)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTarget(_)));
}

#[test]
fn proxies_share_scopes_but_cannot_open_them() {
    let mut owner = genres();
    let proxy = proxy_of(&owner);
    assert!(matches!(proxy.disable_updates(), Err(Error::CantDisableUpdates(_))));
    assert!(matches!(proxy.delay_updates(), Err(Error::CantDisableUpdates(_))));

    let guard = owner.delay_updates().unwrap();
    assert!(!proxy.updates_enabled());
    assert!(proxy.is_tracking());
    owner.finish_delayed_updates(guard).unwrap();
    assert!(proxy.updates_enabled());
}

#[test]
fn scopes_are_per_thread() {
    let m = genres();
    let _guard = m.disable_updates().unwrap();
    assert!(!m.updates_enabled());
    let other_thread = std::thread::spawn(|| empty("genre").updates_enabled())
        .join()
        .unwrap();
    assert!(other_thread);
}

#[test]
fn ordered_inserts_are_sorted_by_the_delayed_rebuild() {
    let mut m = empty("ordered");
    let root = m.insert(NewNode::root().with_order(["root"])).unwrap();
    m.with_delayed_updates(|m| {
        for name in ["m", "c", "x", "a"] {
            m.insert(NewNode::child_of(root.id).with_order([name]))?;
        }
        Ok(())
    })
    .unwrap();
    let root = m.get(root.id).unwrap();
    let names: Vec<String> = m
        .children(&root)
        .unwrap()
        .iter()
        .map(|n| n.order[0].to_string())
        .collect();
    assert_eq!(names, ["a", "c", "m", "x"]);
    assert_valid(&mut m);
}
