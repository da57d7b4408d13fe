use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::ids::{NodeId, WorkspaceId};
use crate::key_gen::{JitteredKeys, KeyGenerator};
use crate::node::Node;
use crate::retry::RetryPolicy;
use crate::store::TreeStore;
use crate::transaction::{self, InsertOutcome, InsertRequest, MoveOutcome, MoveRequest};
use crate::validate;

/// Facade that wires a store, a key generator and a retry policy together.
///
/// Every mutating call runs through the retry policy, so a transient key collision or
/// isolation abort is re-attempted with fresh reads before it reaches the caller.
pub struct RankedTree<S, G = JitteredKeys> {
    store: S,
    keys: G,
    retry: RetryPolicy,
}

impl<S: TreeStore> RankedTree<S, JitteredKeys> {
    /// Default configuration and an entropy-seeded generator.
    pub fn new(store: S) -> Self {
        Self::with_keys(store, JitteredKeys::from_entropy(), RetryPolicy::default())
    }

    pub fn with_config(store: S, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let keys = JitteredKeys::with_rng(StdRng::from_entropy(), config.jitter_digits);
        Ok(Self::with_keys(store, keys, RetryPolicy::new(config.max_attempts)))
    }
}

impl<S, G> RankedTree<S, G>
where
    S: TreeStore,
    G: KeyGenerator,
{
    pub fn with_keys(store: S, keys: G, retry: RetryPolicy) -> Self {
        Self { store, keys, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn into_parts(self) -> (S, G) {
        (self.store, self.keys)
    }

    pub fn move_item(&mut self, request: &MoveRequest) -> Result<MoveOutcome> {
        let Self { store, keys, retry } = self;
        retry.run("move_item", |_| transaction::move_item(store, keys, request))
    }

    pub fn reorder_item(
        &mut self,
        item_id: NodeId,
        prev_sibling_id: Option<NodeId>,
        next_sibling_id: Option<NodeId>,
    ) -> Result<MoveOutcome> {
        let Self { store, keys, retry } = self;
        retry.run("reorder_item", |_| {
            transaction::reorder_item(store, keys, item_id, prev_sibling_id, next_sibling_id)
        })
    }

    pub fn insert_item_at_position(&mut self, request: &InsertRequest) -> Result<InsertOutcome> {
        let Self { store, keys, retry } = self;
        retry.run("insert_item_at_position", |_| {
            transaction::insert_item_at_position(store, keys, request)
        })
    }

    /// Removes the node and its subtree; returns how many nodes were removed.
    pub fn delete_item(&mut self, item_id: NodeId) -> Result<usize> {
        let Self { store, retry, .. } = self;
        retry.run("delete_item", |_| transaction::delete_item(store, item_id))
    }

    pub fn respace_children(
        &mut self,
        workspace_id: WorkspaceId,
        parent_id: Option<NodeId>,
    ) -> Result<usize> {
        let Self { store, keys, retry } = self;
        retry.run("respace_children", |_| {
            transaction::respace_children(store, keys, workspace_id, parent_id)
        })
    }

    pub fn node(&mut self, id: NodeId) -> Result<Option<Node>> {
        self.store.atomic(|tx| tx.node(id))
    }

    /// Children of `parent_id` in rank order.
    pub fn children(
        &mut self,
        workspace_id: WorkspaceId,
        parent_id: Option<NodeId>,
    ) -> Result<Vec<Node>> {
        self.store.atomic(|tx| tx.children(workspace_id, parent_id))
    }

    /// Runs the invariant checker over a consistent snapshot of the workspace.
    pub fn validate(&mut self, workspace_id: WorkspaceId) -> Result<()> {
        let nodes = self.store.atomic(|tx| tx.workspace_nodes(workspace_id))?;
        validate::check_workspace(&nodes)
    }
}
