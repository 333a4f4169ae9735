//! kiln-discover: infer a field configuration for one collection
//!
//! Usage:
//!   # Discover `listings` from ./data/listings.jsonl into ./config
//!   kiln-discover listings --data-dir ./data
//!
//!   # Smaller sample, shallower expansion
//!   kiln-discover listings --data-dir ./data --sample-size 2000 --expansion-depth 2
//!
//! Writes `<collection>_fields.json` and `<collection>_audit.txt` into the
//! config directory. Parameters of an existing `<collection>_fields.json`
//! (relationship hints, business ids) are reused as the starting point.

use anyhow::{Context, Result};
use clap::Parser;
use kiln::config::{fields_file, DiscoveryConfig, DiscoveryParameters, RunParameters};
use kiln::{CachePolicy, DiscoveryEngine, JsonlStore};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kiln-discover")]
#[command(about = "Discover the export schema of a document collection", long_about = None)]
struct Args {
    /// Primary collection name
    #[arg(value_name = "COLLECTION")]
    collection: String,

    /// Directory holding one `<collection>.jsonl` file per collection
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Directory for configuration files
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// Documents sampled when the collection is too large to scan fully
    #[arg(long)]
    sample_size: Option<usize>,

    /// Maximum nesting and reference expansion depth
    #[arg(long)]
    expansion_depth: Option<usize>,

    /// Collections at or below this size are read in full
    #[arg(long)]
    cache_threshold: Option<u64>,

    /// Worker threads (default: available cores)
    #[arg(long)]
    workers: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let run = RunParameters {
        sample_size: args.sample_size,
        expansion_depth: args.expansion_depth,
        ..RunParameters::new(&args.collection)
    };

    let existing = fields_file(&args.config_dir, &run.collection);
    let base = if existing.exists() {
        info!("Reusing discovery parameters from {}", existing.display());
        DiscoveryConfig::load(&existing)
            .with_context(|| format!("Failed to load {}", existing.display()))?
            .discovery_parameters
    } else {
        DiscoveryParameters::default()
    };

    let store = JsonlStore::open(&args.data_dir)
        .with_context(|| format!("Failed to open data directory {}", args.data_dir.display()))?;

    let mut engine = DiscoveryEngine::new(&store, run.discovery_parameters(base));
    if let Some(threshold) = args.cache_threshold {
        engine = engine.with_cache_policy(CachePolicy::new(threshold));
    }
    if let Some(workers) = args.workers {
        engine = engine.with_workers(workers);
    }

    let outcome = engine
        .discover(&run.collection)
        .with_context(|| format!("Discovery of {} failed", run.collection))?;

    let fields_path = fields_file(&args.config_dir, &run.collection);
    outcome
        .config
        .save(&fields_path)
        .with_context(|| format!("Failed to write {}", fields_path.display()))?;

    let audit_path = args.config_dir.join(format!("{}_audit.txt", run.collection));
    std::fs::write(&audit_path, outcome.audit_tree())
        .with_context(|| format!("Failed to write {}", audit_path.display()))?;

    let (total, included) = outcome.config.field_counts();
    eprintln!("✓ Discovered {} fields ({} included)", total, included);
    eprintln!("  Configuration: {}", fields_path.display());
    eprintln!("  Audit: {}", audit_path.display());
    Ok(())
}
