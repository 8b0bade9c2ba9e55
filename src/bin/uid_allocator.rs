//! UID allocation simulator
//!
//! Runs the controller against in-memory backends seeded from a JSON file of
//! namespaces, then checks that repair reproduces the resulting bitmap.

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uid_allocation_controller::{
    AllocationEngine, Bitmap, ControllerConfig, ControllerLoop, InMemoryNamespaceClient,
    InMemoryRangeAllocationStore, LogRecorder, Namespace, NamespaceClient, RepairEngine,
    WorkQueue, UID_RANGE_ALLOCATION,
};

#[derive(Parser, Debug)]
#[command(name = "uid-allocator")]
#[command(about = "Allocate UID blocks to namespaces against in-memory backends")]
struct Args {
    /// Path to the controller TOML config
    #[arg(short = 'c', long)]
    config: PathBuf,

    /// JSON array of namespaces: [{"name": "...", "annotations": {...}}]
    #[arg(short = 'n', long)]
    namespaces: PathBuf,

    /// Write the annotated namespaces here as JSON
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NamespaceEntry {
    name: String,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

impl From<&Namespace> for NamespaceEntry {
    fn from(ns: &Namespace) -> Self {
        NamespaceEntry {
            name: ns.name().to_string(),
            annotations: ns.metadata.annotations.clone(),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = ControllerConfig::from_file(&args.config)
        .with_context(|| format!("loading config {:?}", args.config))?;
    let range = config.uid_range()?;
    info!(range = %range, blocks = range.size(), "Loaded configuration");

    let raw = std::fs::read_to_string(&args.namespaces)
        .with_context(|| format!("reading namespaces {:?}", args.namespaces))?;
    let entries: Vec<NamespaceEntry> =
        serde_json::from_str(&raw).context("parsing namespaces JSON")?;

    let store = Arc::new(InMemoryRangeAllocationStore::new());
    let namespaces = Arc::new(InMemoryNamespaceClient::new());
    let recorder = Arc::new(LogRecorder);

    for entry in entries {
        let mut ns = Namespace::new(entry.name);
        ns.metadata.annotations = entry.annotations;
        namespaces.create(ns);
    }

    let engine = AllocationEngine::new(
        range,
        config.label_allocation()?,
        store.clone(),
        namespaces.clone(),
        recorder.clone(),
    );
    let repair = RepairEngine::new(range, store.clone(), namespaces.clone(), recorder.clone());
    let controller = ControllerLoop::new(
        engine,
        repair,
        namespaces.clone(),
        Arc::new(WorkQueue::new(config.backoff())),
        config.controller_options(),
    );

    let (_stop, stop_rx) = crossbeam::channel::bounded::<()>(1);
    if !controller.wait_for_repair(&stop_rx)? {
        bail!("stopped before the initial repair completed");
    }

    controller.resync()?;
    while !controller.queue().is_empty() {
        controller.process_next();
    }

    // Anything still waiting failed and would be retried forever
    let all = namespaces.list()?;
    for ns in &all {
        match ns.uid_range() {
            Some(block) => println!("{}\t{}", ns.name(), block),
            None => warn!(namespace = %ns.name(), "Namespace left without a UID block"),
        }
    }

    let before = store
        .snapshot(UID_RANGE_ALLOCATION)
        .context("allocation record missing after repair")?;
    let bitmap = Bitmap::from_bytes(&before.data, range.size() as usize);
    println!("bitmap\t{}", bitmap);

    let verify = RepairEngine::new(range, store.clone(), namespaces.clone(), recorder);
    let report = verify.repair()?;
    let after = store
        .snapshot(UID_RANGE_ALLOCATION)
        .context("allocation record missing after verification")?;

    if after.data == before.data {
        println!("repair\tfixed point ({} blocks)", report.allocated);
    } else {
        println!(
            "repair\tchanged bitmap to {}",
            Bitmap::from_bytes(&after.data, range.size() as usize)
        );
    }

    if let Some(path) = &args.output {
        let out: Vec<NamespaceEntry> = all.iter().map(NamespaceEntry::from).collect();
        std::fs::write(path, serde_json::to_string_pretty(&out)?)
            .with_context(|| format!("writing {:?}", path))?;
        info!(path = ?path, count = out.len(), "Wrote namespaces");
    }

    Ok(())
}
