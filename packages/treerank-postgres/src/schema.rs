use postgres::Client;
use treerank_core::{Error, Result, WorkspaceId};

const SCHEMA_LOCK_KEY: i64 = 0x7472_6565_7261_6e6b; // "treerank"

/// Name of the sibling-key index; violations of it are reported as key collisions.
pub(crate) const SIBLING_KEY_INDEX: &str = "treerank_items_sibling_key";

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS treerank_items (
  id BYTEA PRIMARY KEY,
  workspace_id BYTEA NOT NULL,
  parent_id BYTEA,
  rank_key TEXT COLLATE "C" NOT NULL,
  path TEXT COLLATE "C" NOT NULL,
  name TEXT NOT NULL,
  item_type TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS treerank_items_sibling_key
  ON treerank_items (workspace_id, COALESCE(parent_id, ''::bytea), rank_key);

CREATE INDEX IF NOT EXISTS treerank_items_path
  ON treerank_items (workspace_id, path);
"#;

pub fn ensure_schema(client: &mut Client) -> Result<()> {
    // Concurrent `CREATE ... IF NOT EXISTS` can still race on the catalog.
    client
        .query_one("SELECT pg_advisory_lock($1)", &[&SCHEMA_LOCK_KEY])
        .map_err(|e| Error::Storage(format!("{e:?}")))?;

    let res = client
        .batch_execute(SCHEMA_SQL)
        .map_err(|e| Error::Storage(format!("{e:?}")));

    // Best-effort unlock. Locks are also released when the connection is dropped.
    if let Err(e) = client.query_one("SELECT pg_advisory_unlock($1)", &[&SCHEMA_LOCK_KEY]) {
        tracing::warn!(error = %e, "schema advisory unlock failed");
    }

    res
}

/// Removes every item of `workspace`. Returns the number of deleted rows.
pub fn reset_workspace_for_tests(client: &mut Client, workspace: WorkspaceId) -> Result<u64> {
    client
        .execute(
            "DELETE FROM treerank_items WHERE workspace_id = $1",
            &[&workspace.to_bytes().to_vec()],
        )
        .map_err(|e| Error::Storage(format!("{e:?}")))
}
