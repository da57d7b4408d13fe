#![forbid(unsafe_code)]
//! PostgreSQL backend for `treerank-core`.
//!
//! Ordering and path semantics stay in the core crate; this crate stores nodes in a single
//! table guarded by a unique sibling-key index and exposes procedure-style entry points that
//! answer with flat response records.

mod procedures;
mod schema;
mod store;

pub use procedures::{insert_item_at_position, move_item, move_item_json, reorder_item};
pub use schema::{ensure_schema, reset_workspace_for_tests, SCHEMA_SQL};
pub use store::PgTreeStore;
