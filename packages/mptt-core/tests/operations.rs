mod common;

use common::{assert_tree, assert_valid, empty, genres};
use mptt_core::{Error, NewNode, NodeId, Position, TreeNode};

fn ids(nodes: &[TreeNode]) -> Vec<i64> {
    nodes.iter().map(|n| n.id.0).collect()
}

#[test]
fn insert_move_delete_scenario() {
    let mut m = empty("genre");
    let a = m.insert(NewNode::root()).unwrap();
    assert_eq!((a.tree_id, a.left, a.right, a.level), (1, 1, 2, 0));

    let b = m.insert(NewNode::child_of(a.id)).unwrap();
    assert_tree(&mut m, "
        1 - 1 0 1 4
        2 1 1 1 2 3
    ");

    let mut c = m.insert_node(NewNode::root(), Some(a.id), Position::FirstChild).unwrap();
    assert_tree(&mut m, "
        1 - 1 0 1 6
        3 1 1 1 2 3
        2 1 1 1 4 5
    ");

    m.move_to(&mut c, Some(b.id), Position::LastChild).unwrap();
    assert_eq!((c.left, c.right, c.level, c.parent), (3, 4, 2, Some(b.id)));
    assert_tree(&mut m, "
        1 - 1 0 1 6
        2 1 1 1 2 5
        3 2 1 2 3 4
    ");

    let b = m.get(b.id).unwrap();
    assert_eq!(m.delete(&b).unwrap(), 2);
    assert_tree(&mut m, "1 - 1 0 1 2");
    assert!(matches!(m.get(c.id), Err(Error::NodeNotFound(NodeId(3)))));
}

#[test]
fn new_roots_take_the_next_tree_id() {
    let mut m = genres();
    assert_eq!(m.get_next_tree_id().unwrap(), 3);
    let root = m.insert(NewNode::root().with_id(20)).unwrap();
    assert_eq!((root.id, root.tree_id, root.left, root.right), (NodeId(20), 3, 1, 2));

    // Deleting a tree leaves a gap in tree ids; the next root does not reuse it.
    let rpg = m.get(NodeId(9)).unwrap();
    m.delete(&rpg).unwrap();
    let root = m.insert(NewNode::root()).unwrap();
    assert_eq!(root.tree_id, 4);
    assert_eq!(m.get_next_tree_id().unwrap(), 5);
    assert_valid(&mut m);

    assert_eq!(empty("genre").get_next_tree_id().unwrap(), 1);
}

#[test]
fn positioned_insertion_relative_to_a_child() {
    let mut m = genres();
    m.insert_node(NewNode::root().with_id(12), Some(NodeId(4)), Position::Left).unwrap();
    m.insert_node(NewNode::root().with_id(13), Some(NodeId(4)), Position::Right).unwrap();
    m.insert_node(NewNode::root().with_id(14), Some(NodeId(10)), Position::FirstChild).unwrap();
    assert_tree(&mut m, "
        1 - 1 0 1 20
        2 1 1 1 2 13
        3 2 1 2 3 4
        12 2 1 2 5 6
        4 2 1 2 7 8
        13 2 1 2 9 10
        5 2 1 2 11 12
        6 1 1 1 14 19
        7 6 1 2 15 16
        8 6 1 2 17 18
        9 - 2 0 1 8
        10 9 2 1 2 5
        14 10 2 2 3 4
        11 9 2 1 6 7
    ");
    assert_valid(&mut m);
}

#[test]
fn insertion_next_to_a_root_is_rejected_before_writing() {
    let mut m = genres();
    for position in [Position::Left, Position::Right] {
        let err = m.insert_node(NewNode::root(), Some(NodeId(9)), position).unwrap_err();
        assert!(matches!(err, Error::InvalidTarget(_)));
    }
    assert_tree(&mut m, common::GENRES);

    let err = m.insert(NewNode::child_of(NodeId(99))).unwrap_err();
    assert!(matches!(err, Error::NodeNotFound(NodeId(99))));
}

#[test]
fn duplicate_keys_leave_the_tree_untouched() {
    let mut m = genres();
    let err = m.insert(NewNode::child_of(NodeId(2)).with_id(3)).unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
    assert_tree(&mut m, common::GENRES);
}

#[test]
fn query_layer_reads_the_interval_encoding() {
    let mut m = genres();
    let action = m.get(NodeId(1)).unwrap();
    let platformer = m.get(NodeId(2)).unwrap();
    let three = m.get(NodeId(3)).unwrap();
    let four = m.get(NodeId(4)).unwrap();
    let five = m.get(NodeId(5)).unwrap();
    let shmup = m.get(NodeId(6)).unwrap();
    let seven = m.get(NodeId(7)).unwrap();

    assert_eq!(ids(&m.ancestors(&three, false, false).unwrap()), vec![1, 2]);
    assert_eq!(ids(&m.ancestors(&three, true, false).unwrap()), vec![2, 1]);
    assert_eq!(ids(&m.ancestors(&three, false, true).unwrap()), vec![1, 2, 3]);
    assert!(m.ancestors(&action, false, false).unwrap().is_empty());

    assert_eq!(ids(&m.children(&action).unwrap()), vec![2, 6]);
    assert!(m.children(&three).unwrap().is_empty());
    assert_eq!(ids(&m.descendants(&platformer, false).unwrap()), vec![3, 4, 5]);
    assert_eq!(ids(&m.descendants(&platformer, true).unwrap()), vec![2, 3, 4, 5]);
    assert_eq!(ids(&m.leaf_nodes(&action).unwrap()), vec![3, 4, 5, 7, 8]);
    assert_eq!(ids(&m.family(&platformer).unwrap()), vec![1, 2, 3, 4, 5]);
    assert_eq!(action.descendant_count(), 7);

    assert_eq!(ids(&m.siblings(&four, false).unwrap()), vec![3, 5]);
    assert_eq!(ids(&m.siblings(&action, false).unwrap()), vec![9]);
    assert_eq!(ids(&m.siblings(&action, true).unwrap()), vec![1, 9]);

    assert_eq!(m.next_sibling(&four).unwrap().map(|n| n.id), Some(NodeId(5)));
    assert_eq!(m.next_sibling(&five).unwrap(), None);
    assert_eq!(m.previous_sibling(&four).unwrap().map(|n| n.id), Some(NodeId(3)));
    assert_eq!(m.previous_sibling(&three).unwrap(), None);
    assert_eq!(m.next_sibling(&action).unwrap().map(|n| n.id), Some(NodeId(9)));
    assert_eq!(m.previous_sibling(&action).unwrap(), None);

    assert_eq!(m.get_root(&seven).unwrap().id, NodeId(1));
    assert_eq!(ids(&m.drilldown(&shmup).unwrap()), vec![1, 6, 7, 8]);
    assert_eq!(ids(&m.root_nodes().unwrap()), vec![1, 9]);
    assert_eq!(m.root_node(2).unwrap().map(|n| n.id), Some(NodeId(9)));
    assert_eq!(ids(&m.tree_nodes(2).unwrap()), vec![9, 10, 11]);

    assert!(three.is_descendant_of(&action, false));
    assert!(action.is_ancestor_of(&seven, false));
    assert!(!shmup.is_ancestor_of(&three, true));
}

#[test]
fn deleting_a_subtree_closes_its_gap() {
    let mut m = genres();
    let shmup = m.get(NodeId(6)).unwrap();
    assert_eq!(m.delete(&shmup).unwrap(), 3);
    assert_tree(&mut m, "
        1 - 1 0 1 10
        2 1 1 1 2 9
        3 2 1 2 3 4
        4 2 1 2 5 6
        5 2 1 2 7 8
        9 - 2 0 1 6
        10 9 2 1 2 3
        11 9 2 1 4 5
    ");
}

#[test]
fn deleting_a_leaf_with_siblings() {
    let mut m = genres();
    let four = m.get(NodeId(4)).unwrap();
    assert_eq!(m.delete(&four).unwrap(), 1);
    assert_tree(&mut m, "
        1 - 1 0 1 14
        2 1 1 1 2 7
        3 2 1 2 3 4
        5 2 1 2 5 6
        6 1 1 1 8 13
        7 6 1 2 9 10
        8 6 1 2 11 12
        9 - 2 0 1 6
        10 9 2 1 2 3
        11 9 2 1 4 5
    ");
}

#[test]
fn deleting_a_root_removes_its_tree() {
    let mut m = genres();
    let action = m.get(NodeId(1)).unwrap();
    assert_eq!(m.delete(&action).unwrap(), 8);
    assert_tree(&mut m, "
        9 - 2 0 1 6
        10 9 2 1 2 3
        11 9 2 1 4 5
    ");
}

#[test]
fn refresh_rereads_stored_fields() {
    let mut m = genres();
    let mut stale = m.get(NodeId(4)).unwrap();
    let three = m.get(NodeId(3)).unwrap();
    m.delete(&three).unwrap();
    m.refresh(&mut stale).unwrap();
    assert_eq!((stale.left, stale.right), (3, 4));
}

#[test]
fn deleting_a_subtree_keeps_the_subtree_to_its_right() {
    let mut m = genres();
    let platformer = m.get(NodeId(2)).unwrap();
    assert_eq!(m.delete(&platformer).unwrap(), 4);
    assert_tree(&mut m, "
        1 - 1 0 1 8
        6 1 1 1 2 7
        7 6 1 2 3 4
        8 6 1 2 5 6
        9 - 2 0 1 6
        10 9 2 1 2 3
        11 9 2 1 4 5
    ");
    assert_valid(&mut m);
}

#[test]
fn relatives_of_several_nodes_are_merged_in_tree_order() {
    let mut m = genres();
    let three = m.get(NodeId(3)).unwrap();
    let seven = m.get(NodeId(7)).unwrap();
    let four = m.get(NodeId(4)).unwrap();
    let eleven = m.get(NodeId(11)).unwrap();
    assert_eq!(ids(&m.ancestors_of_all(&[seven.clone(), three.clone(), four], false).unwrap()), vec![1, 2, 6]);
    assert_eq!(
        ids(&m.ancestors_of_all(&[eleven, three], true).unwrap()),
        vec![1, 2, 3, 9, 11]
    );

    let platformer = m.get(NodeId(2)).unwrap();
    let action = m.get(NodeId(1)).unwrap();
    let strategy = m.get(NodeId(9)).unwrap();
    assert_eq!(
        ids(&m.descendants_of_all(&[strategy, platformer.clone()], false).unwrap()),
        vec![3, 4, 5, 10, 11]
    );
    assert_eq!(
        ids(&m.descendants_of_all(&[platformer, action, seven], true).unwrap()),
        vec![1, 2, 3, 4, 5, 6, 7, 8]
    );
    assert!(m.descendants_of_all(&[], true).unwrap().is_empty());
}
