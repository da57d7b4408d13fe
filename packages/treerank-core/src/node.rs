#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ids::{ItemType, NodeId, WorkspaceId};
use crate::path::MaterializedPath;
use crate::rank_key::RankKey;

/// One item of a workspace tree as the engine sees it.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Node {
    pub id: NodeId,
    pub workspace_id: WorkspaceId,
    /// `None` for root-level items.
    pub parent_id: Option<NodeId>,
    pub rank_key: RankKey,
    pub path: MaterializedPath,
    pub name: String,
    pub item_type: ItemType,
}

impl Node {
    /// Prefix shared by the paths of every descendant of this node.
    pub fn subtree_prefix(&self) -> MaterializedPath {
        self.path.child(self.id)
    }
}
