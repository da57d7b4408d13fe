//! SQLite backend for the TreeRank ordering engine.
//! Nodes live in a single `tree_items` table; a unique expression index over
//! `(workspace_id, ifnull(parent_id, x''), rank_key)` backs the sibling-key invariant and
//! encoded materialized paths make descendant lookup an index range scan.

mod storage;

pub use storage::{SqliteTreeStore, SCHEMA_SQL};
