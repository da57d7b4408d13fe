//! Atomic placement changes.
//!
//! Each operation runs as a single `TreeStore::atomic` unit: boundaries are resolved, a key is
//! generated and checked against the target sibling group, then the node and (on re-parent)
//! every descendant path are written. Any error rolls the unit back. None of these functions
//! retry; see [`crate::retry`] and [`crate::tree::RankedTree`].

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids::{ItemType, NodeId, WorkspaceId};
use crate::key_gen::KeyGenerator;
use crate::node::Node;
use crate::path::{recompute_path, MaterializedPath, PathRewrite};
use crate::rank_key::RankKey;
use crate::store::{TreeStore, TreeTx};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MoveRequest {
    pub item_id: NodeId,
    pub new_parent_id: Option<NodeId>,
    pub prev_sibling_id: Option<NodeId>,
    pub next_sibling_id: Option<NodeId>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MoveOutcome {
    pub item_id: NodeId,
    pub new_parent_id: Option<NodeId>,
    pub new_rank_key: RankKey,
    pub new_path: MaterializedPath,
    /// Descendants whose path was rewritten (the moved node itself excluded).
    pub descendants_updated: usize,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InsertRequest {
    pub workspace_id: WorkspaceId,
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub item_type: ItemType,
    pub prev_sibling_id: Option<NodeId>,
    pub next_sibling_id: Option<NodeId>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InsertOutcome {
    pub id: NodeId,
    pub path: MaterializedPath,
    pub rank_key: RankKey,
}

/// Re-parents and/or re-positions `item_id` between the given siblings of `new_parent_id`.
pub fn move_item<S, G>(store: &mut S, keys: &mut G, request: &MoveRequest) -> Result<MoveOutcome>
where
    S: TreeStore,
    G: KeyGenerator + ?Sized,
{
    store.atomic(|tx| {
        let node = load(tx, request.item_id)?;
        place(
            tx,
            keys,
            node,
            request.new_parent_id,
            request.prev_sibling_id,
            request.next_sibling_id,
        )
    })
}

/// Moves `item_id` within its current sibling group.
pub fn reorder_item<S, G>(
    store: &mut S,
    keys: &mut G,
    item_id: NodeId,
    prev_sibling_id: Option<NodeId>,
    next_sibling_id: Option<NodeId>,
) -> Result<MoveOutcome>
where
    S: TreeStore,
    G: KeyGenerator + ?Sized,
{
    store.atomic(|tx| {
        let node = load(tx, item_id)?;
        let parent = node.parent_id;
        place(tx, keys, node, parent, prev_sibling_id, next_sibling_id)
    })
}

/// Creates a node with a fresh id at the requested position.
pub fn insert_item_at_position<S, G>(
    store: &mut S,
    keys: &mut G,
    request: &InsertRequest,
) -> Result<InsertOutcome>
where
    S: TreeStore,
    G: KeyGenerator + ?Sized,
{
    store.atomic(|tx| {
        let workspace = request.workspace_id;
        let parent = resolve_parent(tx, workspace, request.parent_id)?;
        let (prev, next) = resolve_bounds(
            tx,
            workspace,
            request.parent_id,
            request.prev_sibling_id,
            request.next_sibling_id,
            None,
        )?;
        let rank_key = keys.generate(prev.as_ref(), next.as_ref())?;
        if let Some(holder) = tx.key_holder(workspace, request.parent_id, &rank_key)? {
            return Err(Error::KeyCollision {
                key: rank_key.into_string(),
                holder,
            });
        }

        let node = Node {
            id: NodeId::random(),
            workspace_id: workspace,
            parent_id: request.parent_id,
            rank_key,
            path: recompute_path(parent.as_ref()),
            name: request.name.clone(),
            item_type: request.item_type.clone(),
        };
        tx.insert_node(&node)?;
        tracing::debug!(id = %node.id, key = %node.rank_key, "inserted item");
        Ok(InsertOutcome {
            id: node.id,
            path: node.path,
            rank_key: node.rank_key,
        })
    })
}

/// Removes `item_id` and its whole subtree. Returns the number of removed nodes.
pub fn delete_item<S: TreeStore>(store: &mut S, item_id: NodeId) -> Result<usize> {
    store.atomic(|tx| {
        let node = load(tx, item_id)?;
        let descendants = tx.descendants(&node)?;
        for d in &descendants {
            tx.remove_node(d.id)?;
        }
        tx.remove_node(node.id)?;
        tracing::debug!(id = %item_id, removed = descendants.len() + 1, "deleted subtree");
        Ok(descendants.len() + 1)
    })
}

/// Gives every child of `parent_id` a fresh, short key while keeping their order.
/// Returns the number of re-keyed children.
pub fn respace_children<S, G>(
    store: &mut S,
    keys: &mut G,
    workspace_id: WorkspaceId,
    parent_id: Option<NodeId>,
) -> Result<usize>
where
    S: TreeStore,
    G: KeyGenerator + ?Sized,
{
    store.atomic(|tx| {
        if let Some(parent) = parent_id {
            resolve_parent(tx, workspace_id, Some(parent))?;
        }
        let children = tx.children(workspace_id, parent_id)?;
        // Start above the default key so every fresh key carries jitter.
        let fresh = keys.generate_n(Some(&RankKey::default_key()), None, children.len())?;
        for (child, key) in children.iter().zip(&fresh) {
            tx.set_rank_key(child.id, key)?;
        }
        tracing::debug!(workspace = %workspace_id, parent = ?parent_id, count = children.len(), "respaced children");
        Ok(children.len())
    })
}

fn load(tx: &mut dyn TreeTx, id: NodeId) -> Result<Node> {
    tx.node(id)?.ok_or_else(|| Error::not_found("item", id))
}

fn resolve_parent(
    tx: &mut dyn TreeTx,
    workspace: WorkspaceId,
    parent_id: Option<NodeId>,
) -> Result<Option<Node>> {
    let Some(id) = parent_id else {
        return Ok(None);
    };
    let parent = tx.node(id)?.ok_or_else(|| Error::not_found("parent", id))?;
    if parent.workspace_id != workspace {
        return Err(Error::InvalidOperation(format!(
            "parent {id} belongs to workspace {}, not {workspace}",
            parent.workspace_id
        )));
    }
    Ok(Some(parent))
}

/// Resolves neighbour ids to their current keys inside the target group.
///
/// A missing side is completed from the group itself: only `prev` means "right after prev",
/// only `next` means "right before next", neither means "append at the end". `moving` is
/// ignored when scanning the group so a node never bounds itself.
fn resolve_bounds(
    tx: &mut dyn TreeTx,
    workspace: WorkspaceId,
    parent_id: Option<NodeId>,
    prev_id: Option<NodeId>,
    next_id: Option<NodeId>,
    moving: Option<NodeId>,
) -> Result<(Option<RankKey>, Option<RankKey>)> {
    if moving.is_some() && (prev_id == moving || next_id == moving) {
        return Err(Error::InvalidOperation(
            "an item cannot be its own neighbour".into(),
        ));
    }

    let mut sibling_key = |id: NodeId| -> Result<RankKey> {
        match tx.node(id)? {
            Some(s) if s.workspace_id == workspace && s.parent_id == parent_id => Ok(s.rank_key),
            _ => Err(Error::NotFound(format!(
                "sibling {id} under the target parent"
            ))),
        }
    };
    let prev = prev_id.map(&mut sibling_key).transpose()?;
    let next = next_id.map(&mut sibling_key).transpose()?;
    if prev.is_some() && next.is_some() {
        return Ok((prev, next));
    }

    let group: Vec<RankKey> = tx
        .children(workspace, parent_id)?
        .into_iter()
        .filter(|n| Some(n.id) != moving)
        .map(|n| n.rank_key)
        .collect();
    Ok(match (prev, next) {
        (Some(p), None) => {
            let after = group.iter().find(|k| **k > p).cloned();
            (Some(p), after)
        }
        (None, Some(n)) => {
            let before = group.iter().rev().find(|k| **k < n).cloned();
            (before, Some(n))
        }
        (None, None) => (group.last().cloned(), None),
        (Some(p), Some(n)) => (Some(p), Some(n)),
    })
}

/// Shared body of move and reorder.
fn place<G: KeyGenerator + ?Sized>(
    tx: &mut dyn TreeTx,
    keys: &mut G,
    node: Node,
    new_parent_id: Option<NodeId>,
    prev_id: Option<NodeId>,
    next_id: Option<NodeId>,
) -> Result<MoveOutcome> {
    let workspace = node.workspace_id;
    if new_parent_id == Some(node.id) {
        return Err(Error::CycleRejected {
            node: node.id,
            parent: node.id,
        });
    }
    let parent = resolve_parent(tx, workspace, new_parent_id)?;
    if let Some(p) = &parent {
        if p.path.contains(node.id) {
            return Err(Error::CycleRejected {
                node: node.id,
                parent: p.id,
            });
        }
    }

    let (prev, next) = resolve_bounds(tx, workspace, new_parent_id, prev_id, next_id, Some(node.id))?;
    let rank_key = keys.generate(prev.as_ref(), next.as_ref())?;
    match tx.key_holder(workspace, new_parent_id, &rank_key)? {
        Some(holder) if holder != node.id => {
            return Err(Error::KeyCollision {
                key: rank_key.into_string(),
                holder,
            })
        }
        _ => {}
    }

    let new_path = recompute_path(parent.as_ref());
    let rewrite = PathRewrite::for_move(node.id, &node.path, &new_path);
    let descendants = if rewrite.is_noop() {
        Vec::new()
    } else {
        tx.descendants(&node)?
    };

    tx.set_placement(node.id, new_parent_id, &rank_key, &new_path)?;
    for d in &descendants {
        tx.set_path(d.id, &rewrite.apply(&d.path)?)?;
    }

    tracing::debug!(
        id = %node.id,
        parent = ?new_parent_id,
        key = %rank_key,
        descendants = descendants.len(),
        "moved item"
    );
    Ok(MoveOutcome {
        item_id: node.id,
        new_parent_id,
        new_rank_key: rank_key,
        new_path,
        descendants_updated: descendants.len(),
    })
}
