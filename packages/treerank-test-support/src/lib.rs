//! Backend conformance suite. Every `TreeStore` implementation runs the same scenarios
//! through [`run_conformance`]; each scenario works in its own random workspace so suites
//! can share one database.

use rand::rngs::StdRng;
use rand::SeedableRng;
use treerank_core::{
    move_item, recompute_path, Error, InsertRequest, ItemType, JitteredKeys,
    KeyGenerator, MoveRequest, Node, NodeId, RankKey, RankedTree, Result, RetryPolicy, TreeStore,
    WorkspaceId,
};

/// Runs every scenario, each against a store produced by `make`.
pub fn run_conformance<S, F>(mut make: F)
where
    S: TreeStore,
    F: FnMut() -> S,
{
    inserts_follow_requested_order(make());
    subtree_move_rewrites_every_path(make());
    cycle_is_rejected_without_writes(make());
    collision_rolls_back_the_unit(make());
    delete_removes_whole_subtree(make());
    respace_preserves_order(make());
    workspaces_do_not_share_sibling_groups(make());
    deep_chain_moves_in_one_unit(make());
}

/// Tree over `store` with a seeded generator and the default retry policy.
pub fn seeded_tree<S: TreeStore>(store: S, seed: u64) -> RankedTree<S> {
    RankedTree::with_keys(
        store,
        JitteredKeys::with_rng(StdRng::seed_from_u64(seed), 4),
        RetryPolicy::default(),
    )
}

/// Inserts an item at the given position and returns its id.
pub fn insert<S: TreeStore, G: KeyGenerator>(
    tree: &mut RankedTree<S, G>,
    workspace: WorkspaceId,
    parent: Option<NodeId>,
    prev: Option<NodeId>,
    next: Option<NodeId>,
) -> NodeId {
    tree.insert_item_at_position(&InsertRequest {
        workspace_id: workspace,
        parent_id: parent,
        name: "conformance".into(),
        item_type: ItemType::new("document"),
        prev_sibling_id: prev,
        next_sibling_id: next,
    })
    .expect("insert")
    .id
}

pub fn child_ids<S: TreeStore, G: KeyGenerator>(
    tree: &mut RankedTree<S, G>,
    workspace: WorkspaceId,
    parent: Option<NodeId>,
) -> Vec<NodeId> {
    tree.children(workspace, parent)
        .expect("children")
        .into_iter()
        .map(|n| n.id)
        .collect()
}

/// Every node of `workspace`, sorted by id.
pub fn workspace_snapshot<S: TreeStore>(store: &mut S, workspace: WorkspaceId) -> Vec<Node> {
    let mut nodes = store
        .atomic(|tx| tx.workspace_nodes(workspace))
        .expect("workspace nodes");
    nodes.sort_by_key(|n| n.id);
    nodes
}

fn to_root(item: NodeId) -> MoveRequest {
    MoveRequest {
        item_id: item,
        new_parent_id: None,
        prev_sibling_id: None,
        next_sibling_id: None,
    }
}

fn under(item: NodeId, parent: NodeId) -> MoveRequest {
    MoveRequest {
        new_parent_id: Some(parent),
        ..to_root(item)
    }
}

struct FixedKey(RankKey);

impl KeyGenerator for FixedKey {
    fn generate(&mut self, _prev: Option<&RankKey>, _next: Option<&RankKey>) -> Result<RankKey> {
        Ok(self.0.clone())
    }
}

pub fn inserts_follow_requested_order<S: TreeStore>(store: S) {
    let ws = WorkspaceId::random();
    let mut tree = seeded_tree(store, 1);
    let a = insert(&mut tree, ws, None, None, None);
    let c = insert(&mut tree, ws, None, Some(a), None);
    let b = insert(&mut tree, ws, None, Some(a), Some(c));
    let head = insert(&mut tree, ws, None, None, Some(a));
    assert_eq!(child_ids(&mut tree, ws, None), vec![head, a, b, c]);
    assert_eq!(
        tree.node(a).expect("node").expect("present").rank_key,
        RankKey::default_key()
    );
    tree.validate(ws).expect("valid");
}

pub fn subtree_move_rewrites_every_path<S: TreeStore>(store: S) {
    let ws = WorkspaceId::random();
    let mut tree = seeded_tree(store, 2);
    let source = insert(&mut tree, ws, None, None, None);
    let target = insert(&mut tree, ws, None, None, None);
    let mut below = Vec::new();
    for _ in 0..10 {
        let child = insert(&mut tree, ws, Some(source), None, None);
        below.push(child);
        for _ in 0..4 {
            below.push(insert(&mut tree, ws, Some(child), None, None));
        }
    }

    let outcome = tree.move_item(&under(source, target)).expect("move");
    assert_eq!(outcome.descendants_updated, below.len());
    for id in std::iter::once(source).chain(below) {
        let node = tree.node(id).expect("node").expect("present");
        let parent = node
            .parent_id
            .map(|p| tree.node(p).expect("parent").expect("present"));
        assert_eq!(node.path, recompute_path(parent.as_ref()));
        assert_eq!(node.path.ancestors().first(), Some(&target));
    }
    tree.validate(ws).expect("valid");
}

pub fn cycle_is_rejected_without_writes<S: TreeStore>(store: S) {
    let ws = WorkspaceId::random();
    let mut tree = seeded_tree(store, 3);
    let a = insert(&mut tree, ws, None, None, None);
    let b = insert(&mut tree, ws, Some(a), None, None);
    let d = insert(&mut tree, ws, Some(b), None, None);
    let before = workspace_snapshot(tree.store_mut(), ws);

    let err = tree.move_item(&under(a, d)).expect_err("cycle");
    assert!(matches!(err, Error::CycleRejected { .. }), "{err:?}");
    assert_eq!(workspace_snapshot(tree.store_mut(), ws), before);
}

pub fn collision_rolls_back_the_unit<S: TreeStore>(store: S) {
    let ws = WorkspaceId::random();
    let mut tree = seeded_tree(store, 4);
    let first = insert(&mut tree, ws, None, None, None);
    let second = insert(&mut tree, ws, None, None, None);
    let folder = insert(&mut tree, ws, None, None, None);
    insert(&mut tree, ws, Some(folder), None, None);
    let taken = tree.node(first).expect("node").expect("present").rank_key;
    let before = workspace_snapshot(tree.store_mut(), ws);

    let err = move_item(
        tree.store_mut(),
        &mut FixedKey(taken),
        &MoveRequest {
            item_id: folder,
            new_parent_id: None,
            prev_sibling_id: Some(first),
            next_sibling_id: Some(second),
        },
    )
    .expect_err("collision");
    assert!(matches!(err, Error::KeyCollision { holder, .. } if holder == first), "{err:?}");
    assert_eq!(workspace_snapshot(tree.store_mut(), ws), before);
}

pub fn delete_removes_whole_subtree<S: TreeStore>(store: S) {
    let ws = WorkspaceId::random();
    let mut tree = seeded_tree(store, 5);
    let keep = insert(&mut tree, ws, None, None, None);
    let doomed = insert(&mut tree, ws, None, None, None);
    let child = insert(&mut tree, ws, Some(doomed), None, None);
    insert(&mut tree, ws, Some(child), None, None);

    assert_eq!(tree.delete_item(doomed).expect("delete"), 3);
    assert_eq!(workspace_snapshot(tree.store_mut(), ws).len(), 1);
    assert_eq!(child_ids(&mut tree, ws, None), vec![keep]);
}

pub fn respace_preserves_order<S: TreeStore>(store: S) {
    let ws = WorkspaceId::random();
    let mut tree = seeded_tree(store, 6);
    let first = insert(&mut tree, ws, None, None, None);
    let last = insert(&mut tree, ws, None, None, None);
    let mut prev = first;
    for _ in 0..20 {
        prev = insert(&mut tree, ws, None, Some(prev), Some(last));
    }
    let before = child_ids(&mut tree, ws, None);

    assert_eq!(tree.respace_children(ws, None).expect("respace"), before.len());
    assert_eq!(child_ids(&mut tree, ws, None), before);
    tree.validate(ws).expect("valid");
}

pub fn workspaces_do_not_share_sibling_groups<S: TreeStore>(store: S) {
    let (left, right) = (WorkspaceId::random(), WorkspaceId::random());
    let mut tree = seeded_tree(store, 7);
    let a = insert(&mut tree, left, None, None, None);
    let b = insert(&mut tree, right, None, None, None);
    let key = |tree: &mut RankedTree<S>, id| tree.node(id).expect("node").expect("present").rank_key;
    assert_eq!(key(&mut tree, a), key(&mut tree, b));

    let err = tree.move_item(&under(a, b)).expect_err("cross workspace");
    assert!(matches!(err, Error::InvalidOperation(_)), "{err:?}");
}

pub fn deep_chain_moves_in_one_unit<S: TreeStore>(store: S) {
    let ws = WorkspaceId::random();
    let mut tree = seeded_tree(store, 8);
    let anchor = insert(&mut tree, ws, None, None, None);
    let top = insert(&mut tree, ws, None, None, None);
    let mut tip = top;
    for _ in 0..30 {
        tip = insert(&mut tree, ws, Some(tip), None, None);
    }

    let outcome = tree.move_item(&under(top, anchor)).expect("move");
    assert_eq!(outcome.descendants_updated, 30);
    let tip_node = tree.node(tip).expect("node").expect("present");
    assert_eq!(tip_node.path.depth(), 31);
    assert_eq!(tip_node.path.ancestors()[..2], [anchor, top]);

    tree.move_item(&to_root(top)).expect("move back");
    let tip_node = tree.node(tip).expect("node").expect("present");
    assert_eq!(tip_node.path.depth(), 30);
    tree.validate(ws).expect("valid");
}
