//! Materialized ancestry paths.
//!
//! A node's path lists its ancestors from the workspace root down to its parent. The storage
//! encoding (`/<hex>/<hex>/`) makes "all descendants of N" a plain prefix match on the encoded
//! subtree prefix of N, so moving a subtree is a flat loop over rows rather than a recursive walk.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids::NodeId;
use crate::node::Node;

const SEPARATOR: char = '/';

#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct MaterializedPath(Vec<NodeId>);

impl MaterializedPath {
    /// Path of a root-level node.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(ancestors: Vec<NodeId>) -> Self {
        Self(ancestors)
    }

    pub fn ancestors(&self) -> &[NodeId] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.0.contains(&id)
    }

    /// Path of the children of `node`, when `self` is the path of `node`.
    pub fn child(&self, node: NodeId) -> Self {
        let mut ancestors = Vec::with_capacity(self.0.len() + 1);
        ancestors.extend_from_slice(&self.0);
        ancestors.push(node);
        Self(ancestors)
    }

    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(1 + self.0.len() * 33);
        out.push(SEPARATOR);
        for id in &self.0 {
            out.push_str(&id.to_hex());
            out.push(SEPARATOR);
        }
        out
    }

    /// Half-open range `[lo, hi)` holding exactly the encodings that extend this one.
    ///
    /// The encoding always ends in `/`, and `0` is the byte right after it, so backends can
    /// run the descendant scan as an index range instead of a pattern match.
    pub fn encoded_range(&self) -> (String, String) {
        let lo = self.encode();
        let mut hi = lo.clone();
        hi.pop();
        hi.push('0');
        (lo, hi)
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let malformed = || Error::Storage(format!("malformed path {encoded:?}"));
        let rest = encoded.strip_prefix(SEPARATOR).ok_or_else(malformed)?;
        if rest.is_empty() {
            return Ok(Self::root());
        }
        let inner = rest.strip_suffix(SEPARATOR).ok_or_else(malformed)?;
        if inner.is_empty() {
            return Err(malformed());
        }
        inner
            .split(SEPARATOR)
            .map(|part| {
                part.parse::<NodeId>()
                    .map_err(|_| Error::Storage(format!("malformed path segment {part:?}")))
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }
}

/// Path a node gets when placed under `new_parent` (root level for `None`).
pub fn recompute_path(new_parent: Option<&Node>) -> MaterializedPath {
    match new_parent {
        Some(parent) => parent.path.child(parent.id),
        None => MaterializedPath::root(),
    }
}

/// Prefix substitution applied to every descendant of a moved node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PathRewrite {
    old_prefix: MaterializedPath,
    new_prefix: MaterializedPath,
}

impl PathRewrite {
    /// Rewrite for the descendants of `node` when its own path changes from `old_path` to
    /// `new_path`.
    pub fn for_move(node: NodeId, old_path: &MaterializedPath, new_path: &MaterializedPath) -> Self {
        Self {
            old_prefix: old_path.child(node),
            new_prefix: new_path.child(node),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.old_prefix == self.new_prefix
    }

    pub fn apply(&self, path: &MaterializedPath) -> Result<MaterializedPath> {
        let suffix = path.0.strip_prefix(self.old_prefix.0.as_slice()).ok_or_else(|| {
            Error::InconsistentState(format!(
                "descendant path {} is outside subtree {}",
                path.encode(),
                self.old_prefix.encode()
            ))
        })?;
        let mut ancestors = Vec::with_capacity(self.new_prefix.0.len() + suffix.len());
        ancestors.extend_from_slice(&self.new_prefix.0);
        ancestors.extend_from_slice(suffix);
        Ok(MaterializedPath(ancestors))
    }
}
