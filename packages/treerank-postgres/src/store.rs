use postgres::error::SqlState;
use postgres::types::ToSql;
use postgres::{Client, IsolationLevel, NoTls, Row, Transaction};
use treerank_core::{
    Error, ItemType, MaterializedPath, Node, NodeId, RankKey, Result, TreeStore, TreeTx,
    WorkspaceId,
};

use crate::schema::{ensure_schema, SIBLING_KEY_INDEX};

const NODE_COLUMNS: &str = "id, workspace_id, parent_id, rank_key, path, name, item_type";

/// Savepoint wrapped around writes that can hit the sibling-key index, so the collision
/// holder can still be read after the violation.
const KEY_SAVEPOINT: &str = "treerank_sibling_key";

/// PostgreSQL-backed `TreeStore`. Every atomic unit is a `SERIALIZABLE` transaction;
/// serialization failures surface as `Error::SerializationConflict`.
pub struct PgTreeStore {
    client: Client,
}

impl PgTreeStore {
    /// Connects without TLS and bootstraps the schema.
    pub fn connect(url: &str) -> Result<Self> {
        let client = Client::connect(url, NoTls).map_err(pg_err)?;
        Self::from_client(client)
    }

    pub fn from_client(mut client: Client) -> Result<Self> {
        ensure_schema(&mut client)?;
        Ok(Self { client })
    }

    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }
}

impl TreeStore for PgTreeStore {
    fn atomic<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn TreeTx) -> Result<T>,
    {
        let mut tx = self
            .client
            .build_transaction()
            .isolation_level(IsolationLevel::Serializable)
            .start()
            .map_err(pg_err)?;
        let out = f(&mut PgTx { tx: &mut tx });
        match out {
            Ok(value) => {
                tx.commit().map_err(pg_err)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::warn!(error = %rollback, "postgres rollback failed");
                }
                Err(err)
            }
        }
    }
}

struct PgTx<'a, 'c> {
    tx: &'a mut Transaction<'c>,
}

pub(crate) fn pg_err(e: postgres::Error) -> Error {
    match e.code() {
        Some(code)
            if *code == SqlState::T_R_SERIALIZATION_FAILURE
                || *code == SqlState::T_R_DEADLOCK_DETECTED =>
        {
            Error::SerializationConflict(e.to_string())
        }
        _ => Error::Storage(format!("{e:?}")),
    }
}

fn is_sibling_key_violation(e: &postgres::Error) -> bool {
    e.as_db_error().is_some_and(|db| {
        *db.code() == SqlState::UNIQUE_VIOLATION && db.constraint() == Some(SIBLING_KEY_INDEX)
    })
}

fn bytes(id: NodeId) -> Vec<u8> {
    id.to_bytes().to_vec()
}

fn workspace_bytes(workspace: WorkspaceId) -> Vec<u8> {
    workspace.to_bytes().to_vec()
}

fn decode(row: &Row) -> Result<Node> {
    let id: Vec<u8> = row.try_get(0).map_err(pg_err)?;
    let workspace: Vec<u8> = row.try_get(1).map_err(pg_err)?;
    let parent: Option<Vec<u8>> = row.try_get(2).map_err(pg_err)?;
    let rank_key: String = row.try_get(3).map_err(pg_err)?;
    let path: String = row.try_get(4).map_err(pg_err)?;
    Ok(Node {
        id: NodeId::from_bytes(&id)?,
        workspace_id: WorkspaceId::from_bytes(&workspace)?,
        parent_id: parent.as_deref().map(NodeId::from_bytes).transpose()?,
        rank_key: RankKey::parse(rank_key)
            .map_err(|e| Error::Storage(format!("stored rank key: {e}")))?,
        path: MaterializedPath::decode(&path)?,
        name: row.try_get(5).map_err(pg_err)?,
        item_type: ItemType::new(row.try_get::<_, String>(6).map_err(pg_err)?),
    })
}

impl PgTx<'_, '_> {
    fn query_nodes(&mut self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Node>> {
        self.tx
            .query(sql, params)
            .map_err(pg_err)?
            .iter()
            .map(decode)
            .collect()
    }

    /// Runs a write that may violate the sibling-key index inside a savepoint. A violation
    /// is rolled back to the savepoint and reported as a `KeyCollision` naming the holder.
    fn keyed_write(
        &mut self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        workspace: WorkspaceId,
        parent: Option<NodeId>,
        key: &RankKey,
    ) -> Result<u64> {
        let mut savepoint = self.tx.savepoint(KEY_SAVEPOINT).map_err(pg_err)?;
        let e = match savepoint.execute(sql, params) {
            Ok(changed) => {
                savepoint.commit().map_err(pg_err)?;
                return Ok(changed);
            }
            Err(e) => e,
        };
        savepoint.rollback().map_err(pg_err)?;
        if !is_sibling_key_violation(&e) {
            return Err(pg_err(e));
        }
        match self.key_holder(workspace, parent, key)? {
            Some(holder) => Err(Error::KeyCollision {
                key: key.to_string(),
                holder,
            }),
            None => Err(pg_err(e)),
        }
    }

    fn expect_changed(changed: u64, id: NodeId) -> Result<()> {
        if changed == 0 {
            return Err(Error::NotFound(format!("item {id}")));
        }
        Ok(())
    }

    fn existing(&mut self, id: NodeId) -> Result<Node> {
        self.node(id)?
            .ok_or_else(|| Error::NotFound(format!("item {id}")))
    }
}

impl TreeTx for PgTx<'_, '_> {
    fn node(&mut self, id: NodeId) -> Result<Option<Node>> {
        let row = self
            .tx
            .query_opt(
                &format!("SELECT {NODE_COLUMNS} FROM treerank_items WHERE id = $1"),
                &[&bytes(id)],
            )
            .map_err(pg_err)?;
        row.as_ref().map(decode).transpose()
    }

    fn children(&mut self, workspace: WorkspaceId, parent: Option<NodeId>) -> Result<Vec<Node>> {
        self.query_nodes(
            &format!(
                "SELECT {NODE_COLUMNS} FROM treerank_items
                 WHERE workspace_id = $1 AND COALESCE(parent_id, ''::bytea) = COALESCE($2, ''::bytea)
                 ORDER BY rank_key"
            ),
            &[&workspace_bytes(workspace), &parent.map(bytes)],
        )
    }

    fn key_holder(
        &mut self,
        workspace: WorkspaceId,
        parent: Option<NodeId>,
        key: &RankKey,
    ) -> Result<Option<NodeId>> {
        let row = self
            .tx
            .query_opt(
                "SELECT id FROM treerank_items
                 WHERE workspace_id = $1
                   AND COALESCE(parent_id, ''::bytea) = COALESCE($2, ''::bytea)
                   AND rank_key = $3",
                &[&workspace_bytes(workspace), &parent.map(bytes), &key.as_str()],
            )
            .map_err(pg_err)?;
        match row {
            Some(row) => {
                let id: Vec<u8> = row.try_get(0).map_err(pg_err)?;
                NodeId::from_bytes(&id).map(Some)
            }
            None => Ok(None),
        }
    }

    fn descendants(&mut self, node: &Node) -> Result<Vec<Node>> {
        let (lo, hi) = node.subtree_prefix().encoded_range();
        self.query_nodes(
            &format!(
                "SELECT {NODE_COLUMNS} FROM treerank_items
                 WHERE workspace_id = $1 AND path >= $2 AND path < $3"
            ),
            &[&workspace_bytes(node.workspace_id), &lo, &hi],
        )
    }

    fn insert_node(&mut self, node: &Node) -> Result<()> {
        self.keyed_write(
            &format!(
                "INSERT INTO treerank_items ({NODE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
            ),
            &[
                &bytes(node.id),
                &workspace_bytes(node.workspace_id),
                &node.parent_id.map(bytes),
                &node.rank_key.as_str(),
                &node.path.encode(),
                &node.name,
                &node.item_type.as_str(),
            ],
            node.workspace_id,
            node.parent_id,
            &node.rank_key,
        )
        .map(drop)
    }

    fn set_placement(
        &mut self,
        id: NodeId,
        parent: Option<NodeId>,
        key: &RankKey,
        path: &MaterializedPath,
    ) -> Result<()> {
        let workspace = self.existing(id)?.workspace_id;
        let changed = self.keyed_write(
            "UPDATE treerank_items SET parent_id = $2, rank_key = $3, path = $4 WHERE id = $1",
            &[&bytes(id), &parent.map(bytes), &key.as_str(), &path.encode()],
            workspace,
            parent,
            key,
        )?;
        Self::expect_changed(changed, id)
    }

    fn set_path(&mut self, id: NodeId, path: &MaterializedPath) -> Result<()> {
        let changed = self
            .tx
            .execute(
                "UPDATE treerank_items SET path = $2 WHERE id = $1",
                &[&bytes(id), &path.encode()],
            )
            .map_err(pg_err)?;
        Self::expect_changed(changed, id)
    }

    fn set_rank_key(&mut self, id: NodeId, key: &RankKey) -> Result<()> {
        let node = self.existing(id)?;
        let changed = self.keyed_write(
            "UPDATE treerank_items SET rank_key = $2 WHERE id = $1",
            &[&bytes(id), &key.as_str()],
            node.workspace_id,
            node.parent_id,
            key,
        )?;
        Self::expect_changed(changed, id)
    }

    fn remove_node(&mut self, id: NodeId) -> Result<()> {
        let changed = self
            .tx
            .execute("DELETE FROM treerank_items WHERE id = $1", &[&bytes(id)])
            .map_err(pg_err)?;
        Self::expect_changed(changed, id)
    }

    fn workspace_nodes(&mut self, workspace: WorkspaceId) -> Result<Vec<Node>> {
        self.query_nodes(
            &format!("SELECT {NODE_COLUMNS} FROM treerank_items WHERE workspace_id = $1"),
            &[&workspace_bytes(workspace)],
        )
    }
}
