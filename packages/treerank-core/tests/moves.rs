use std::thread;

use rand::rngs::StdRng;
use rand::SeedableRng;
use treerank_core::{
    check_workspace, move_item, recompute_path, Error, InsertRequest, ItemType, JitteredKeys,
    KeyGenerator, MemoryTreeStore, MoveRequest, Node, NodeId, RankKey, RankedTree, Result,
    RetryPolicy, TreeStore, WorkspaceId,
};

const WS: WorkspaceId = WorkspaceId(7);

type Tree = RankedTree<MemoryTreeStore>;

fn tree_with_seed(seed: u64) -> Tree {
    RankedTree::with_keys(
        MemoryTreeStore::new(),
        JitteredKeys::with_rng(StdRng::seed_from_u64(seed), 4),
        RetryPolicy::default(),
    )
}

fn append(tree: &mut Tree, parent: Option<NodeId>) -> NodeId {
    tree.insert_item_at_position(&InsertRequest {
        workspace_id: WS,
        parent_id: parent,
        name: "node".into(),
        item_type: ItemType::new("folder"),
        prev_sibling_id: None,
        next_sibling_id: None,
    })
    .unwrap()
    .id
}

fn snapshot(tree: &Tree) -> Vec<Node> {
    let mut nodes = tree.store().snapshot().unwrap();
    nodes.sort_by_key(|n| n.id);
    nodes
}

fn node(tree: &mut Tree, id: NodeId) -> Node {
    tree.node(id).unwrap().unwrap()
}

fn move_request(item: NodeId, parent: Option<NodeId>) -> MoveRequest {
    MoveRequest {
        item_id: item,
        new_parent_id: parent,
        prev_sibling_id: None,
        next_sibling_id: None,
    }
}

/// Always proposes the same key.
struct FixedKey {
    key: RankKey,
    calls: usize,
}

impl KeyGenerator for FixedKey {
    fn generate(&mut self, _prev: Option<&RankKey>, _next: Option<&RankKey>) -> Result<RankKey> {
        self.calls += 1;
        Ok(self.key.clone())
    }
}

/// Proposes a taken key once, then behaves normally.
struct CollideOnce {
    taken: Option<RankKey>,
    inner: JitteredKeys,
}

impl KeyGenerator for CollideOnce {
    fn generate(&mut self, prev: Option<&RankKey>, next: Option<&RankKey>) -> Result<RankKey> {
        match self.taken.take() {
            Some(key) => Ok(key),
            None => self.inner.generate(prev, next),
        }
    }
}

#[test]
fn moving_a_subtree_rewrites_every_descendant_path() {
    let mut tree = tree_with_seed(1);
    let source = append(&mut tree, None);
    let target = append(&mut tree, None);
    let mut subtree = Vec::new();
    for _ in 0..10 {
        let child = append(&mut tree, Some(source));
        subtree.push(child);
        for _ in 0..4 {
            subtree.push(append(&mut tree, Some(child)));
        }
    }
    assert_eq!(subtree.len(), 50);

    let outcome = tree.move_item(&move_request(source, Some(target))).unwrap();
    assert_eq!(outcome.descendants_updated, 50);
    assert_eq!(outcome.new_parent_id, Some(target));
    assert_eq!(outcome.new_path.ancestors(), &[target]);

    let mut rewritten = 0;
    for id in std::iter::once(source).chain(subtree.iter().copied()) {
        let n = node(&mut tree, id);
        let parent = n.parent_id.map(|p| node(&mut tree, p));
        assert_eq!(n.path, recompute_path(parent.as_ref()));
        assert_eq!(n.path.ancestors()[0], target);
        rewritten += 1;
    }
    assert_eq!(rewritten, 51);
    check_workspace(&snapshot(&tree)).unwrap();
}

#[test]
fn moving_under_own_descendant_is_rejected_without_side_effects() {
    let mut tree = tree_with_seed(2);
    let a = append(&mut tree, None);
    let b = append(&mut tree, Some(a));
    let d = append(&mut tree, Some(b));
    let before = snapshot(&tree);

    let err = tree.move_item(&move_request(a, Some(d))).unwrap_err();
    assert!(matches!(err, Error::CycleRejected { node, parent } if node == a && parent == d));
    let err = tree.move_item(&move_request(a, Some(a))).unwrap_err();
    assert!(matches!(err, Error::CycleRejected { .. }));
    assert_eq!(snapshot(&tree), before);
}

#[test]
fn collision_aborts_the_unit_and_keeps_placement() {
    let mut store = MemoryTreeStore::new();
    let mut tree = RankedTree::with_keys(store.clone(), JitteredKeys::from_entropy(), RetryPolicy::default());
    let first = append(&mut tree, None);
    let second = append(&mut tree, None);
    let folder = append(&mut tree, None);
    let child = append(&mut tree, Some(folder));
    append(&mut tree, Some(child));
    let before = snapshot(&tree);

    let mut keys = FixedKey {
        key: node(&mut tree, first).rank_key,
        calls: 0,
    };
    let err = move_item(
        &mut store,
        &mut keys,
        &MoveRequest {
            item_id: folder,
            new_parent_id: None,
            prev_sibling_id: Some(first),
            next_sibling_id: Some(second),
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::KeyCollision { holder, .. } if holder == first));
    assert!(err.is_retryable());
    assert_eq!(snapshot(&tree), before);
}

#[test]
fn persistent_collisions_exhaust_the_retry_budget() {
    let store = MemoryTreeStore::new();
    let mut seed_tree = RankedTree::with_keys(store.clone(), JitteredKeys::from_entropy(), RetryPolicy::default());
    let first = append(&mut seed_tree, None);
    let second = append(&mut seed_tree, None);
    let taken = node(&mut seed_tree, first).rank_key;

    let mut tree = RankedTree::with_keys(
        store.clone(),
        FixedKey { key: taken, calls: 0 },
        RetryPolicy::default(),
    );
    let err = tree.reorder_item(second, None, Some(first)).unwrap_err();
    match err {
        Error::RetriesExhausted { op, attempts, last } => {
            assert_eq!(op, "reorder_item");
            assert_eq!(attempts, 3);
            assert!(matches!(*last, Error::KeyCollision { .. }));
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    let (_, keys) = tree.into_parts();
    assert_eq!(keys.calls, 3);
}

#[test]
fn a_transient_collision_is_retried_with_fresh_reads() {
    let store = MemoryTreeStore::new();
    let mut seed_tree = RankedTree::with_keys(store.clone(), JitteredKeys::from_entropy(), RetryPolicy::default());
    let first = append(&mut seed_tree, None);
    let second = append(&mut seed_tree, None);
    let third = append(&mut seed_tree, None);

    let mut tree = RankedTree::with_keys(
        store,
        CollideOnce {
            taken: Some(node(&mut seed_tree, first).rank_key),
            inner: JitteredKeys::with_rng(StdRng::seed_from_u64(3), 4),
        },
        RetryPolicy::default(),
    );
    let outcome = tree.reorder_item(third, Some(first), Some(second)).unwrap();
    let order: Vec<NodeId> = tree
        .children(WS, None)
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(order, vec![first, third, second]);
    assert_eq!(node(&mut seed_tree, third).rank_key, outcome.new_rank_key);
}

#[test]
fn neighbours_must_belong_to_the_target_group() {
    let mut tree = tree_with_seed(4);
    let folder = append(&mut tree, None);
    let outsider = append(&mut tree, None);
    let inside = append(&mut tree, Some(folder));
    let mover = append(&mut tree, None);

    let err = tree
        .move_item(&MoveRequest {
            item_id: mover,
            new_parent_id: Some(folder),
            prev_sibling_id: Some(outsider),
            next_sibling_id: None,
        })
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let err = tree
        .move_item(&MoveRequest {
            item_id: mover,
            new_parent_id: Some(folder),
            prev_sibling_id: Some(inside),
            next_sibling_id: Some(mover),
        })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));

    let err = tree.move_item(&move_request(NodeId(404), None)).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    let err = tree.move_item(&move_request(mover, Some(NodeId(404)))).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn reversed_neighbours_are_a_caller_error() {
    let mut tree = tree_with_seed(5);
    let a = append(&mut tree, None);
    let b = append(&mut tree, None);
    let c = append(&mut tree, None);
    let err = tree.reorder_item(c, Some(b), Some(a)).unwrap_err();
    assert!(matches!(err, Error::InvalidBounds { .. }));
}

#[test]
fn parents_cannot_cross_workspaces() {
    let mut tree = tree_with_seed(6);
    let foreign = tree
        .insert_item_at_position(&InsertRequest {
            workspace_id: WorkspaceId(99),
            parent_id: None,
            name: "elsewhere".into(),
            item_type: ItemType::new("folder"),
            prev_sibling_id: None,
            next_sibling_id: None,
        })
        .unwrap()
        .id;
    let local = append(&mut tree, None);
    let err = tree.move_item(&move_request(local, Some(foreign))).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
}

#[test]
fn moving_out_to_root_level_clears_the_path() {
    let mut tree = tree_with_seed(7);
    let a = append(&mut tree, None);
    let b = append(&mut tree, Some(a));
    let c = append(&mut tree, Some(b));

    let outcome = tree.move_item(&move_request(b, None)).unwrap();
    assert!(outcome.new_path.is_root());
    assert_eq!(outcome.descendants_updated, 1);
    assert_eq!(node(&mut tree, c).path.ancestors(), &[b]);
    check_workspace(&snapshot(&tree)).unwrap();
}

#[test]
fn concurrent_writers_keep_the_tree_consistent() {
    let store = MemoryTreeStore::new();
    let mut setup = RankedTree::new(store.clone());
    let left = append(&mut setup, None);
    let right = append(&mut setup, None);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || {
                let mut tree = RankedTree::new(store);
                for _ in 0..25 {
                    tree.insert_item_at_position(&InsertRequest {
                        workspace_id: WS,
                        parent_id: None,
                        name: "racer".into(),
                        item_type: ItemType::new("block"),
                        prev_sibling_id: Some(left),
                        next_sibling_id: Some(right),
                    })
                    .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let children = setup.children(WS, None).unwrap();
    assert_eq!(children.len(), 202);
    assert_eq!(children.first().map(|n| n.id), Some(left));
    assert_eq!(children.last().map(|n| n.id), Some(right));
    let mut store = store;
    let nodes = store.atomic(|tx| tx.workspace_nodes(WS)).unwrap();
    check_workspace(&nodes).unwrap();
}
