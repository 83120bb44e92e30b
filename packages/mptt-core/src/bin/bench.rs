use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use mptt_core::{MemoryStore, NewNode, Position, TreeManager, TreeOptions, TreeRegistry};
use tracing_subscriber::EnvFilter;

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Output {
    implementation: &'static str,
    storage: &'static str,
    workload: String,
    timestamp: String,
    name: String,
    total_ops: u64,
    duration_ms: f64,
    ops_per_sec: f64,
    extra: Extra,
    source_file: Option<String>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Extra {
    count: u64,
    mode: &'static str,
}

type Manager = TreeManager<MemoryStore>;

/// Insert `count` children under one root, then move each to the front.
fn insert_move(m: &mut Manager, count: u64) -> mptt_core::Result<()> {
    let root = m.insert(NewNode::root())?;
    let mut children = Vec::with_capacity(count as usize);
    for _ in 0..count {
        children.push(m.insert(NewNode::child_of(root.id))?);
    }
    for child in &mut children {
        m.move_to(child, Some(root.id), Position::FirstChild)?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let mut count: u64 = 200;
    let mut delayed = false;
    let mut out_file: Option<PathBuf> = None;
    for arg in env::args().skip(1) {
        if let Some(val) = arg.strip_prefix("--count=") {
            count = val.parse().unwrap_or(count);
        } else if let Some(val) = arg.strip_prefix("--out=") {
            out_file = Some(PathBuf::from(val));
        } else if arg == "--delayed" {
            delayed = true;
        }
    }

    let mut registry = TreeRegistry::new();
    registry.register("bench", TreeOptions::new("bench"))?;
    let mut m = registry.manager("bench", MemoryStore::new())?;

    let start = Instant::now();
    if delayed {
        m.with_delayed_updates(|m| insert_move(m, count))?;
    } else {
        insert_move(&mut m, count)?;
    }
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    mptt_core::check_invariants(&m.all_nodes()?)?;

    let mode = if delayed { "delayed" } else { "immediate" };
    let output = Output {
        implementation: "mptt-core",
        storage: "memory",
        workload: format!("insert-move-{}", count),
        timestamp: chrono::Utc::now().to_rfc3339(),
        name: format!("insert-move-{}-{}", mode, count),
        total_ops: count * 2 + 1,
        duration_ms,
        ops_per_sec: if duration_ms > 0.0 {
            (count as f64 * 2.0) / duration_ms * 1000.0
        } else {
            f64::INFINITY
        },
        extra: Extra { count, mode },
        source_file: out_file.as_ref().map(|p| p.display().to_string()),
    };

    let json = serde_json::to_string_pretty(&output)?;
    if let Some(path) = out_file {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &json)?;
    }
    println!("{}", json);
    Ok(())
}
