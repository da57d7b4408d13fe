use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::ids::{NodeId, WorkspaceId};
use crate::node::Node;
use crate::path::MaterializedPath;
use crate::rank_key::RankKey;
use crate::store::{TreeStore, TreeTx};

/// In-memory store for tests and embedding.
///
/// Clones share the same tree. The mutex serialises atomic units; each unit works on a staged
/// copy that only replaces the shared state once the unit succeeds.
#[derive(Clone, Debug, Default)]
pub struct MemoryTreeStore {
    nodes: Arc<Mutex<BTreeMap<NodeId, Node>>>,
}

impl MemoryTreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current committed copy of every node.
    pub fn snapshot(&self) -> Result<Vec<Node>> {
        let nodes = self.nodes.lock().map_err(poisoned)?;
        Ok(nodes.values().cloned().collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.nodes.lock().map_err(poisoned)?.len())
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> Error {
    Error::Storage(format!("memory store lock poisoned: {e}"))
}

impl TreeStore for MemoryTreeStore {
    fn atomic<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn TreeTx) -> Result<T>,
    {
        let mut shared = self.nodes.lock().map_err(poisoned)?;
        let mut tx = MemoryTx {
            nodes: shared.clone(),
        };
        let out = f(&mut tx)?;
        *shared = tx.nodes;
        Ok(out)
    }
}

struct MemoryTx {
    nodes: BTreeMap<NodeId, Node>,
}

impl MemoryTx {
    fn existing(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("node", id))
    }

    fn ensure_free(
        &self,
        id: NodeId,
        workspace: WorkspaceId,
        parent: Option<NodeId>,
        key: &RankKey,
    ) -> Result<()> {
        let taken = self.nodes.values().find(|n| {
            n.id != id && n.workspace_id == workspace && n.parent_id == parent && &n.rank_key == key
        });
        match taken {
            Some(holder) => Err(Error::KeyCollision {
                key: key.to_string(),
                holder: holder.id,
            }),
            None => Ok(()),
        }
    }
}

impl TreeTx for MemoryTx {
    fn node(&mut self, id: NodeId) -> Result<Option<Node>> {
        Ok(self.nodes.get(&id).cloned())
    }

    fn children(&mut self, workspace: WorkspaceId, parent: Option<NodeId>) -> Result<Vec<Node>> {
        let mut out: Vec<Node> = self
            .nodes
            .values()
            .filter(|n| n.workspace_id == workspace && n.parent_id == parent)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.rank_key.cmp(&b.rank_key));
        Ok(out)
    }

    fn key_holder(
        &mut self,
        workspace: WorkspaceId,
        parent: Option<NodeId>,
        key: &RankKey,
    ) -> Result<Option<NodeId>> {
        Ok(self
            .nodes
            .values()
            .find(|n| n.workspace_id == workspace && n.parent_id == parent && &n.rank_key == key)
            .map(|n| n.id))
    }

    fn descendants(&mut self, node: &Node) -> Result<Vec<Node>> {
        let prefix = node.subtree_prefix();
        Ok(self
            .nodes
            .values()
            .filter(|n| n.workspace_id == node.workspace_id && n.path.starts_with(&prefix))
            .cloned()
            .collect())
    }

    fn insert_node(&mut self, node: &Node) -> Result<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(Error::InvalidOperation(format!("node {} already exists", node.id)));
        }
        self.ensure_free(node.id, node.workspace_id, node.parent_id, &node.rank_key)?;
        self.nodes.insert(node.id, node.clone());
        Ok(())
    }

    fn set_placement(
        &mut self,
        id: NodeId,
        parent: Option<NodeId>,
        key: &RankKey,
        path: &MaterializedPath,
    ) -> Result<()> {
        let workspace = self.existing(id)?.workspace_id;
        self.ensure_free(id, workspace, parent, key)?;
        let node = self.existing(id)?;
        node.parent_id = parent;
        node.rank_key = key.clone();
        node.path = path.clone();
        Ok(())
    }

    fn set_path(&mut self, id: NodeId, path: &MaterializedPath) -> Result<()> {
        self.existing(id)?.path = path.clone();
        Ok(())
    }

    fn set_rank_key(&mut self, id: NodeId, key: &RankKey) -> Result<()> {
        let node = self.existing(id)?;
        let (workspace, parent) = (node.workspace_id, node.parent_id);
        self.ensure_free(id, workspace, parent, key)?;
        self.existing(id)?.rank_key = key.clone();
        Ok(())
    }

    fn remove_node(&mut self, id: NodeId) -> Result<()> {
        self.nodes
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("node", id))
    }

    fn workspace_nodes(&mut self, workspace: WorkspaceId) -> Result<Vec<Node>> {
        Ok(self
            .nodes
            .values()
            .filter(|n| n.workspace_id == workspace)
            .cloned()
            .collect())
    }
}
