//! kiln-export: flatten a collection into CSV using its field configuration
//!
//! Usage:
//!   # Export `listings` using ./config/listings_fields.json (+ supplemental)
//!   kiln-export listings --data-dir ./data
//!
//!   # Test run on the first 100 documents
//!   kiln-export listings --data-dir ./data --row-limit 100 --output sample.csv

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use kiln::config::{DiscoveryConfig, RunParameters};
use kiln::{CachePolicy, ExportEngine, JsonlStore};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kiln-export")]
#[command(about = "Export a document collection as flattened CSV", long_about = None)]
struct Args {
    /// Primary collection name
    #[arg(value_name = "COLLECTION")]
    collection: String,

    /// Directory holding one `<collection>.jsonl` file per collection
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Directory holding `<collection>_fields.json` and the optional
    /// `<collection>_supplemental.json`
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// Output file (default: `<collection>_export.csv`)
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Rows per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Stop after this many documents
    #[arg(long)]
    row_limit: Option<u64>,

    /// Collections at or below this size are cached in full
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
        batch_size: args.batch_size,
        row_limit: args.row_limit,
        output_path: args.output.clone(),
        ..RunParameters::new(&args.collection)
    };

    let mut config = DiscoveryConfig::load_with_overlay(&args.config_dir, &run.collection)
        .with_context(|| format!("Failed to load configuration for {}", run.collection))?;
    run.apply_export_settings(&mut config.export_settings);

    let store = JsonlStore::open(&args.data_dir)
        .with_context(|| format!("Failed to open data directory {}", args.data_dir.display()))?;

    let mut engine = ExportEngine::new(&store, config).with_row_limit(run.row_limit);
    if let Some(threshold) = args.cache_threshold {
        engine = engine.with_cache_policy(CachePolicy::new(threshold));
    }
    if let Some(workers) = args.workers {
        engine = engine.with_workers(workers);
    }

    let output = run.output_path();
    let summary = engine
        .export_to_path(&output)
        .with_context(|| format!("Export of {} failed", run.collection))?;

    eprintln!(
        "✓ Wrote {} rows x {} columns to {}",
        summary.rows_written,
        summary.columns,
        output.display()
    );
    if !summary.cached_collections.is_empty() {
        eprintln!("  Cached: {}", summary.cached_collections.join(", "));
    }
    if !summary.lookup_collections.is_empty() {
        eprintln!("  Point lookups: {}", summary.lookup_collections.join(", "));
    }
    eprintln!(
        "  {} cells empty due to unresolved references",
        summary.unresolved_references
    );
    let report = &summary.report;
    eprintln!(
        "  Columns: {} meaningful, {} sparse, {} single-value, {} always empty (report: {})",
        report.meaningful,
        report.sparse,
        report.single_value,
        report.always_empty,
        kiln::export::report_path(&output).display()
    );
    Ok(())
}
