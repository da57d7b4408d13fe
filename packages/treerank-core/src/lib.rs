#![forbid(unsafe_code)]
//! Ordering engine for mutable trees: fractional rank keys between siblings, materialized
//! ancestry paths, and atomic move/insert/reorder transactions with bounded retry.
//! This crate stays independent of concrete storage engines; backends implement
//! [`TreeStore`] and [`TreeTx`].

pub mod config;
pub mod error;
pub mod ids;
pub mod key_gen;
pub mod memory;
pub mod node;
pub mod path;
pub mod rank_key;
#[cfg(feature = "serde")]
pub mod response;
pub mod retry;
pub mod store;
pub mod transaction;
pub mod tree;
pub mod validate;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use ids::{ItemType, NodeId, WorkspaceId};
pub use key_gen::{generate, key_between, JitteredKeys, KeyGenerator, DEFAULT_JITTER_DIGITS};
pub use memory::MemoryTreeStore;
pub use node::Node;
pub use path::{recompute_path, MaterializedPath, PathRewrite};
pub use rank_key::{RankKey, DEFAULT_KEY};
#[cfg(feature = "serde")]
pub use response::{InsertResponse, MoveResponse};
pub use retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
pub use store::{TreeStore, TreeTx};
pub use transaction::{
    delete_item, insert_item_at_position, move_item, reorder_item, respace_children,
    InsertOutcome, InsertRequest, MoveOutcome, MoveRequest,
};
pub use tree::RankedTree;
pub use validate::check_workspace;
