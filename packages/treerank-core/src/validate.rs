use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::ids::NodeId;
use crate::node::Node;
use crate::path::recompute_path;

/// Checks a snapshot of one workspace: distinct sibling keys, existing parents in the same
/// workspace, no cycles, and every path equal to its recomputed value.
pub fn check_workspace(nodes: &[Node]) -> Result<()> {
    let by_id: HashMap<NodeId, &Node> = nodes.iter().map(|n| (n.id, n)).collect();
    if by_id.len() != nodes.len() {
        return Err(Error::InconsistentState("duplicate node id".into()));
    }

    let mut keys = HashSet::new();
    for node in nodes {
        if !keys.insert((node.workspace_id, node.parent_id, &node.rank_key)) {
            return Err(Error::InconsistentState(format!(
                "rank key {} used twice under {:?}",
                node.rank_key, node.parent_id
            )));
        }
    }

    for node in nodes {
        let parent = match node.parent_id {
            Some(pid) => {
                let parent = by_id.get(&pid).copied().ok_or_else(|| {
                    Error::InconsistentState(format!("parent {pid} of {} is missing", node.id))
                })?;
                if parent.workspace_id != node.workspace_id {
                    return Err(Error::InconsistentState(format!(
                        "{} and its parent {pid} live in different workspaces",
                        node.id
                    )));
                }
                Some(parent)
            }
            None => None,
        };
        if has_cycle_from(&by_id, node.id) {
            return Err(Error::InconsistentState(format!("cycle through {}", node.id)));
        }
        if node.path != recompute_path(parent) {
            return Err(Error::InconsistentState(format!(
                "path of {} is {}, expected {}",
                node.id,
                node.path.encode(),
                recompute_path(parent).encode()
            )));
        }
    }
    Ok(())
}

fn has_cycle_from(by_id: &HashMap<NodeId, &Node>, start: NodeId) -> bool {
    let mut visited = HashSet::new();
    let mut current = Some(start);
    while let Some(n) = current {
        if !visited.insert(n) {
            return true;
        }
        current = by_id.get(&n).and_then(|s| s.parent_id);
    }
    false
}
