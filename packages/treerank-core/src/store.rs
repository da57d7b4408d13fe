use crate::error::Result;
use crate::ids::{NodeId, WorkspaceId};
use crate::node::Node;
use crate::path::MaterializedPath;
use crate::rank_key::RankKey;

/// Reads and writes available inside one atomic unit.
///
/// Implementations must reject a write that would give two siblings of the same
/// `(workspace_id, parent_id)` group the same rank key with `Error::KeyCollision`.
pub trait TreeTx {
    fn node(&mut self, id: NodeId) -> Result<Option<Node>>;

    /// Children of `parent` (root level for `None`) ordered by rank key.
    fn children(&mut self, workspace: WorkspaceId, parent: Option<NodeId>) -> Result<Vec<Node>>;

    /// Sibling currently holding `key` in the group, if any.
    fn key_holder(
        &mut self,
        workspace: WorkspaceId,
        parent: Option<NodeId>,
        key: &RankKey,
    ) -> Result<Option<NodeId>>;

    /// Every node whose path starts with `node.subtree_prefix()`.
    fn descendants(&mut self, node: &Node) -> Result<Vec<Node>>;

    fn insert_node(&mut self, node: &Node) -> Result<()>;

    /// Rewrite the placement triple of an existing node.
    fn set_placement(
        &mut self,
        id: NodeId,
        parent: Option<NodeId>,
        key: &RankKey,
        path: &MaterializedPath,
    ) -> Result<()>;

    fn set_path(&mut self, id: NodeId, path: &MaterializedPath) -> Result<()>;

    fn set_rank_key(&mut self, id: NodeId, key: &RankKey) -> Result<()>;

    fn remove_node(&mut self, id: NodeId) -> Result<()>;

    fn workspace_nodes(&mut self, workspace: WorkspaceId) -> Result<Vec<Node>>;
}

/// Storage handle able to run an all-or-nothing unit of work.
pub trait TreeStore {
    /// Runs `f` in a fresh atomic unit. Commits when `f` returns `Ok`, rolls back everything
    /// `f` wrote otherwise.
    fn atomic<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn TreeTx) -> Result<T>;
}

impl<S: TreeStore> TreeStore for &mut S {
    fn atomic<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn TreeTx) -> Result<T>,
    {
        (**self).atomic(f)
    }
}
