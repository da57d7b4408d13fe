use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use tracing_subscriber::EnvFilter;
use treerank_core::{
    EngineConfig, InsertRequest, ItemType, MemoryTreeStore, MoveRequest, NodeId, RankedTree,
    WorkspaceId,
};

const CI_COUNTS: &[u64] = &[100, 1_000];
const LOCAL_COUNTS: &[u64] = &[10, 100, 1_000, 10_000];

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Output {
    implementation: &'static str,
    storage: &'static str,
    workload: String,
    timestamp: String,
    total_ops: u64,
    duration_ms: f64,
    ops_per_sec: f64,
    extra: Extra,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Extra {
    count: u64,
    max_key_len: usize,
    jitter_digits: usize,
}

fn is_ci() -> bool {
    env::var("CI").map(|v| v == "true").unwrap_or(false)
}

/// Inserts `count` items into one gap, then moves each under the first one.
fn run(config: EngineConfig, count: u64) -> treerank_core::Result<(f64, usize)> {
    let ws = WorkspaceId::random();
    let mut tree = RankedTree::with_config(MemoryTreeStore::new(), config)?;
    let insert = |tree: &mut RankedTree<MemoryTreeStore>, prev: Option<NodeId>, next| {
        tree.insert_item_at_position(&InsertRequest {
            workspace_id: ws,
            parent_id: None,
            name: "bench".into(),
            item_type: ItemType::new("block"),
            prev_sibling_id: prev,
            next_sibling_id: next,
        })
        .map(|o| o.id)
    };

    let start = Instant::now();
    let head = insert(&mut tree, None, None)?;
    let tail = insert(&mut tree, Some(head), None)?;
    let mut items = Vec::with_capacity(count as usize);
    let mut prev = head;
    for _ in 0..count {
        prev = insert(&mut tree, Some(prev), Some(tail))?;
        items.push(prev);
    }
    let max_key_len = tree
        .children(ws, None)?
        .iter()
        .map(|n| n.rank_key.len())
        .max()
        .unwrap_or(0);
    for item in items {
        tree.move_item(&MoveRequest {
            item_id: item,
            new_parent_id: Some(head),
            prev_sibling_id: None,
            next_sibling_id: None,
        })?;
    }
    Ok((start.elapsed().as_secs_f64() * 1000.0, max_key_len))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut counts: Vec<u64> = (if is_ci() { CI_COUNTS } else { LOCAL_COUNTS }).to_vec();
    let mut out_dir: Option<PathBuf> = None;
    for arg in env::args().skip(1) {
        if let Some(val) = arg.strip_prefix("--counts=") {
            let parsed: Vec<u64> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if !parsed.is_empty() {
                counts = parsed;
            }
        } else if let Some(val) = arg.strip_prefix("--out-dir=") {
            out_dir = Some(PathBuf::from(val));
        }
    }
    let config = EngineConfig::from_env()?;

    for count in counts {
        let (duration_ms, max_key_len) = run(config, count)?;
        let total_ops = count * 2 + 2;
        let workload = format!("insert-move-{count}");
        let output = Output {
            implementation: "treerank-core",
            storage: "memory",
            workload: workload.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            total_ops,
            duration_ms,
            ops_per_sec: if duration_ms > 0.0 {
                total_ops as f64 / duration_ms * 1000.0
            } else {
                f64::INFINITY
            },
            extra: Extra {
                count,
                max_key_len,
                jitter_digits: config.jitter_digits,
            },
        };

        let json = serde_json::to_string_pretty(&output)?;
        if let Some(dir) = &out_dir {
            fs::create_dir_all(dir)?;
            fs::write(dir.join(format!("memory-{workload}.json")), &json)?;
        }
        println!("{json}");
    }
    Ok(())
}
