//! Flat, serialisable results for procedure-style callers.
//!
//! Failures never escape as errors here: they become `success: false` with a message, a
//! stable `code` and a `retry` hint the caller can act on.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::ids::NodeId;
use crate::path::MaterializedPath;
use crate::rank_key::RankKey;
use crate::transaction::{InsertOutcome, MoveOutcome};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<NodeId>,
    /// `Some(None)` for a move to the root level; absent when the move failed.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub new_parent_id: Option<Option<NodeId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_rank_key: Option<RankKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_path: Option<MaterializedPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descendants_updated: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<MaterializedPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_key: Option<RankKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<bool>,
}

/// Maps an explicit `null` to `Some(None)`; a missing field stays `None` through `default`.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Whether the caller may resubmit the same request.
fn should_retry(err: &Error) -> bool {
    match err {
        Error::RetriesExhausted { last, .. } => last.is_retryable(),
        other => other.is_retryable(),
    }
}

impl From<Result<MoveOutcome>> for MoveResponse {
    fn from(result: Result<MoveOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                success: true,
                item_id: Some(outcome.item_id),
                new_parent_id: Some(outcome.new_parent_id),
                new_rank_key: Some(outcome.new_rank_key),
                new_path: Some(outcome.new_path),
                descendants_updated: Some(outcome.descendants_updated),
                ..Self::default()
            },
            Err(err) => Self {
                success: false,
                error: Some(err.to_string()),
                code: Some(err.code().to_string()),
                retry: Some(should_retry(&err)),
                ..Self::default()
            },
        }
    }
}

impl From<Result<InsertOutcome>> for InsertResponse {
    fn from(result: Result<InsertOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                success: true,
                id: Some(outcome.id),
                path: Some(outcome.path),
                rank_key: Some(outcome.rank_key),
                ..Self::default()
            },
            Err(err) => Self {
                success: false,
                error: Some(err.to_string()),
                code: Some(err.code().to_string()),
                retry: Some(should_retry(&err)),
                ..Self::default()
            },
        }
    }
}
