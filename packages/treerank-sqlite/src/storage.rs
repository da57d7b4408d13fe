use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use treerank_core::{
    Error, ItemType, MaterializedPath, Node, NodeId, RankKey, Result, TreeStore, TreeTx,
    WorkspaceId,
};

pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS tree_items (
    id BLOB PRIMARY KEY,
    workspace_id BLOB NOT NULL,
    parent_id BLOB,
    rank_key TEXT NOT NULL,
    path TEXT NOT NULL,
    name TEXT NOT NULL,
    item_type TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS tree_items_sibling_key
    ON tree_items(workspace_id, ifnull(parent_id, x''), rank_key);
CREATE INDEX IF NOT EXISTS tree_items_path ON tree_items(workspace_id, path);
";

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const NODE_COLUMNS: &str = "id, workspace_id, parent_id, rank_key, path, name, item_type";

/// SQLite-backed `TreeStore`. Every atomic unit is a `BEGIN IMMEDIATE` transaction, so writers
/// are serialised by the database lock and the sibling index rejects duplicate keys.
pub struct SqliteTreeStore {
    conn: Connection,
}

impl SqliteTreeStore {
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::from_connection(conn)
    }

    /// Opens (or creates) a database file in WAL mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage_err)?;
        let _mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(storage_err)?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT).map_err(storage_err)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.conn.busy_timeout(timeout).map_err(storage_err)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(SCHEMA_SQL).map_err(storage_err)
    }
}

impl TreeStore for SqliteTreeStore {
    fn atomic<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn TreeTx) -> Result<T>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_err)?;
        let out = f(&mut SqliteTx { conn: &tx });
        match out {
            Ok(value) => {
                tx.commit().map_err(storage_err)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::warn!(error = %rollback, "sqlite rollback failed");
                }
                Err(err)
            }
        }
    }
}

struct SqliteTx<'a> {
    conn: &'a Connection,
}

fn storage_err(e: rusqlite::Error) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            Error::SerializationConflict(e.to_string())
        }
        _ => Error::Storage(e.to_string()),
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn parent_blob(parent: Option<NodeId>) -> Option<[u8; 16]> {
    parent.map(NodeId::to_bytes)
}

type RawRow = (Vec<u8>, Vec<u8>, Option<Vec<u8>>, String, String, String, String);

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn decode(raw: RawRow) -> Result<Node> {
    let (id, workspace, parent, rank_key, path, name, item_type) = raw;
    Ok(Node {
        id: NodeId::from_bytes(&id)?,
        workspace_id: WorkspaceId::from_bytes(&workspace)?,
        parent_id: parent.as_deref().map(NodeId::from_bytes).transpose()?,
        rank_key: RankKey::parse(rank_key)
            .map_err(|e| Error::Storage(format!("stored rank key: {e}")))?,
        path: MaterializedPath::decode(&path)?,
        name,
        item_type: ItemType::new(item_type),
    })
}

impl SqliteTx<'_> {
    fn query_nodes(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Node>> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(storage_err)?;
        let rows = stmt.query_map(params, read_raw).map_err(storage_err)?;
        let mut nodes = Vec::new();
        for raw in rows {
            nodes.push(decode(raw.map_err(storage_err)?)?);
        }
        Ok(nodes)
    }

    /// Turns a sibling-index violation into a `KeyCollision` naming the current holder.
    fn collision_or(
        &mut self,
        e: rusqlite::Error,
        workspace: WorkspaceId,
        parent: Option<NodeId>,
        key: &RankKey,
    ) -> Error {
        if !is_unique_violation(&e) {
            return storage_err(e);
        }
        match self.key_holder(workspace, parent, key) {
            Ok(Some(holder)) => Error::KeyCollision {
                key: key.to_string(),
                holder,
            },
            Ok(None) => storage_err(e),
            Err(lookup) => lookup,
        }
    }

    fn expect_changed(changed: usize, id: NodeId) -> Result<()> {
        if changed == 0 {
            return Err(Error::NotFound(format!("item {id}")));
        }
        Ok(())
    }
}

impl TreeTx for SqliteTx<'_> {
    fn node(&mut self, id: NodeId) -> Result<Option<Node>> {
        let raw = self
            .conn
            .prepare_cached(&format!("SELECT {NODE_COLUMNS} FROM tree_items WHERE id = ?1"))
            .map_err(storage_err)?
            .query_row([id.to_bytes()], read_raw)
            .optional()
            .map_err(storage_err)?;
        raw.map(decode).transpose()
    }

    fn children(&mut self, workspace: WorkspaceId, parent: Option<NodeId>) -> Result<Vec<Node>> {
        self.query_nodes(
            &format!(
                "SELECT {NODE_COLUMNS} FROM tree_items
                 WHERE workspace_id = ?1 AND parent_id IS ?2
                 ORDER BY rank_key"
            ),
            params![workspace.to_bytes(), parent_blob(parent)],
        )
    }

    fn key_holder(
        &mut self,
        workspace: WorkspaceId,
        parent: Option<NodeId>,
        key: &RankKey,
    ) -> Result<Option<NodeId>> {
        let holder: Option<Vec<u8>> = self
            .conn
            .prepare_cached(
                "SELECT id FROM tree_items
                 WHERE workspace_id = ?1 AND parent_id IS ?2 AND rank_key = ?3",
            )
            .map_err(storage_err)?
            .query_row(
                params![workspace.to_bytes(), parent_blob(parent), key.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        holder.as_deref().map(NodeId::from_bytes).transpose()
    }

    fn descendants(&mut self, node: &Node) -> Result<Vec<Node>> {
        let (lo, hi) = node.subtree_prefix().encoded_range();
        self.query_nodes(
            &format!(
                "SELECT {NODE_COLUMNS} FROM tree_items
                 WHERE workspace_id = ?1 AND path >= ?2 AND path < ?3"
            ),
            params![node.workspace_id.to_bytes(), lo, hi],
        )
    }

    fn insert_node(&mut self, node: &Node) -> Result<()> {
        let result = self
            .conn
            .prepare_cached(&format!(
                "INSERT INTO tree_items ({NODE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ))
            .and_then(|mut stmt| {
                stmt.execute(params![
                    node.id.to_bytes(),
                    node.workspace_id.to_bytes(),
                    parent_blob(node.parent_id),
                    node.rank_key.as_str(),
                    node.path.encode(),
                    node.name,
                    node.item_type.as_str(),
                ])
            });
        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(self.collision_or(e, node.workspace_id, node.parent_id, &node.rank_key)),
        }
    }

    fn set_placement(
        &mut self,
        id: NodeId,
        parent: Option<NodeId>,
        key: &RankKey,
        path: &MaterializedPath,
    ) -> Result<()> {
        let result = self
            .conn
            .prepare_cached(
                "UPDATE tree_items SET parent_id = ?2, rank_key = ?3, path = ?4 WHERE id = ?1",
            )
            .and_then(|mut stmt| {
                stmt.execute(params![
                    id.to_bytes(),
                    parent_blob(parent),
                    key.as_str(),
                    path.encode()
                ])
            });
        match result {
            Ok(changed) => Self::expect_changed(changed, id),
            Err(e) => {
                let workspace = self
                    .node(id)?
                    .map(|n| n.workspace_id)
                    .ok_or_else(|| Error::NotFound(format!("item {id}")))?;
                Err(self.collision_or(e, workspace, parent, key))
            }
        }
    }

    fn set_path(&mut self, id: NodeId, path: &MaterializedPath) -> Result<()> {
        let changed = self
            .conn
            .prepare_cached("UPDATE tree_items SET path = ?2 WHERE id = ?1")
            .and_then(|mut stmt| stmt.execute(params![id.to_bytes(), path.encode()]))
            .map_err(storage_err)?;
        Self::expect_changed(changed, id)
    }

    fn set_rank_key(&mut self, id: NodeId, key: &RankKey) -> Result<()> {
        let result = self
            .conn
            .prepare_cached("UPDATE tree_items SET rank_key = ?2 WHERE id = ?1")
            .and_then(|mut stmt| stmt.execute(params![id.to_bytes(), key.as_str()]));
        match result {
            Ok(changed) => Self::expect_changed(changed, id),
            Err(e) => {
                let node = self
                    .node(id)?
                    .ok_or_else(|| Error::NotFound(format!("item {id}")))?;
                Err(self.collision_or(e, node.workspace_id, node.parent_id, key))
            }
        }
    }

    fn remove_node(&mut self, id: NodeId) -> Result<()> {
        let changed = self
            .conn
            .prepare_cached("DELETE FROM tree_items WHERE id = ?1")
            .and_then(|mut stmt| stmt.execute([id.to_bytes()]))
            .map_err(storage_err)?;
        Self::expect_changed(changed, id)
    }

    fn workspace_nodes(&mut self, workspace: WorkspaceId) -> Result<Vec<Node>> {
        self.query_nodes(
            &format!("SELECT {NODE_COLUMNS} FROM tree_items WHERE workspace_id = ?1"),
            [workspace.to_bytes()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u128, parent: Option<&Node>, key: &str) -> Node {
        Node {
            id: NodeId(id),
            workspace_id: WorkspaceId(1),
            parent_id: parent.map(|p| p.id),
            rank_key: RankKey::parse(key).unwrap(),
            path: treerank_core::recompute_path(parent),
            name: format!("item {id}"),
            item_type: ItemType::new("document"),
        }
    }

    #[test]
    fn rows_round_trip_through_the_table() {
        let mut store = SqliteTreeStore::new_in_memory().unwrap();
        let root = node(1, None, "a0");
        let child = node(2, Some(&root), "a0V");
        store
            .atomic(|tx| {
                tx.insert_node(&root)?;
                tx.insert_node(&child)
            })
            .unwrap();

        let loaded = store.atomic(|tx| tx.node(child.id)).unwrap();
        assert_eq!(loaded, Some(child.clone()));
        let kids = store.atomic(|tx| tx.children(root.workspace_id, Some(root.id))).unwrap();
        assert_eq!(kids, vec![child.clone()]);
        let below = store.atomic(|tx| tx.descendants(&root)).unwrap();
        assert_eq!(below, vec![child]);
    }

    #[test]
    fn sibling_index_reports_the_holder_and_rolls_back() {
        let mut store = SqliteTreeStore::new_in_memory().unwrap();
        let a = node(1, None, "a0");
        store.atomic(|tx| tx.insert_node(&a)).unwrap();

        let err = store
            .atomic(|tx| {
                tx.insert_node(&node(2, None, "a1"))?;
                tx.insert_node(&node(3, None, "a0"))
            })
            .unwrap_err();
        assert!(matches!(err, Error::KeyCollision { holder, .. } if holder == a.id));
        let all = store.atomic(|tx| tx.workspace_nodes(WorkspaceId(1))).unwrap();
        assert_eq!(all, vec![a]);
    }

    #[test]
    fn root_level_keys_are_unique_despite_null_parents() {
        let mut store = SqliteTreeStore::new_in_memory().unwrap();
        store.atomic(|tx| tx.insert_node(&node(1, None, "a0"))).unwrap();
        let a0 = RankKey::parse("a0").unwrap();
        store
            .atomic(|tx| tx.set_placement(NodeId(1), None, &a0, &MaterializedPath::root()))
            .unwrap();

        store.atomic(|tx| tx.insert_node(&node(2, None, "a1"))).unwrap();
        let err = store
            .atomic(|tx| tx.set_rank_key(NodeId(2), &a0))
            .unwrap_err();
        assert!(matches!(err, Error::KeyCollision { .. }));
    }

    #[test]
    fn missing_rows_are_not_found() {
        let mut store = SqliteTreeStore::new_in_memory().unwrap();
        let err = store
            .atomic(|tx| tx.set_path(NodeId(9), &MaterializedPath::root()))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(store.atomic(|tx| tx.node(NodeId(9))).unwrap().is_none());
    }
}
