//! Procedure-style entry points. Each call runs the operation through the tree's retry policy
//! and flattens the result into a response record; failures never escape as `Err`.

use treerank_core::{
    InsertRequest, InsertResponse, ItemType, KeyGenerator, MoveRequest, MoveResponse, NodeId,
    RankedTree, WorkspaceId,
};

use crate::store::PgTreeStore;

pub fn move_item<G: KeyGenerator>(
    tree: &mut RankedTree<PgTreeStore, G>,
    item_id: NodeId,
    new_parent_id: Option<NodeId>,
    prev_sibling_id: Option<NodeId>,
    next_sibling_id: Option<NodeId>,
) -> MoveResponse {
    let response = MoveResponse::from(tree.move_item(&MoveRequest {
        item_id,
        new_parent_id,
        prev_sibling_id,
        next_sibling_id,
    }));
    log_failure("move_item", response.code.as_deref());
    response
}

pub fn insert_item_at_position<G: KeyGenerator>(
    tree: &mut RankedTree<PgTreeStore, G>,
    workspace_id: WorkspaceId,
    parent_id: Option<NodeId>,
    name: &str,
    item_type: &str,
    prev_sibling_id: Option<NodeId>,
    next_sibling_id: Option<NodeId>,
) -> InsertResponse {
    let response = InsertResponse::from(tree.insert_item_at_position(&InsertRequest {
        workspace_id,
        parent_id,
        name: name.to_string(),
        item_type: ItemType::new(item_type),
        prev_sibling_id,
        next_sibling_id,
    }));
    log_failure("insert_item_at_position", response.code.as_deref());
    response
}

pub fn reorder_item<G: KeyGenerator>(
    tree: &mut RankedTree<PgTreeStore, G>,
    item_id: NodeId,
    prev_sibling_id: Option<NodeId>,
    next_sibling_id: Option<NodeId>,
) -> MoveResponse {
    let response = MoveResponse::from(tree.reorder_item(item_id, prev_sibling_id, next_sibling_id));
    log_failure("reorder_item", response.code.as_deref());
    response
}

/// Same as [`move_item`], rendered as JSON for callers speaking the wire format.
pub fn move_item_json<G: KeyGenerator>(
    tree: &mut RankedTree<PgTreeStore, G>,
    request: &MoveRequest,
) -> serde_json::Result<String> {
    let response = move_item(
        tree,
        request.item_id,
        request.new_parent_id,
        request.prev_sibling_id,
        request.next_sibling_id,
    );
    serde_json::to_string(&response)
}

fn log_failure(op: &'static str, code: Option<&str>) {
    if let Some(code) = code {
        tracing::debug!(op, code, "procedure failed");
    }
}
