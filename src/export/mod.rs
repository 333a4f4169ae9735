//! Flattened, relationship-expanding export
//!
//! An export compiles the configuration into an [`ExportPlan`], materializes
//! every cache the plan depends on, and then streams the primary collection
//! in batches of `batchSize`. Rows of a batch are evaluated in parallel and
//! written in scan order, so the output is byte-identical for the same data
//! regardless of worker count.
//!
//! Written rows also feed a per-column fill report; [`ExportEngine::export_to_path`]
//! saves it as `<output stem>_summary.json` next to the CSV.
//!
//! ```rust
//! use kiln::config::{DataType, DiscoveryConfig, DiscoveryParameters, FieldDescriptor};
//! use kiln::export::ExportEngine;
//! use kiln::store::MemoryStore;
//! use serde_json::json;
//!
//! # fn main() -> kiln::Result<()> {
//! let store = MemoryStore::new().with_collection("people", vec![
//!     json!({"name": "Ada", "age": 36}),
//! ]);
//! let mut config = DiscoveryConfig::new("people", DiscoveryParameters::default());
//! config.fields.push(FieldDescriptor::new("name", DataType::String, "people"));
//!
//! let mut out = Vec::new();
//! let summary = ExportEngine::new(&store, config).export(&mut out)?;
//! assert_eq!(summary.rows_written, 1);
//! assert_eq!(String::from_utf8(out).unwrap(), "Name\nAda\n");
//! # Ok(())
//! # }
//! ```

mod evaluate;
mod plan;
mod render;
mod report;
mod statistics;
mod writer;

pub use evaluate::RowEvaluator;
pub use plan::{Column, ColumnRule, ExportPlan, PathStep};
pub use render::{render_elements, render_value, sort_elements};
pub use report::{report_path, ColumnCategory, ColumnStatsCollector, ColumnSummary, ExportReport};
pub use statistics::{named_window, DateWindow, GROUP_SEPARATOR};
pub use writer::CsvRowWriter;

use crate::cache::{CachePolicy, CollectionCacheManager};
use crate::config::DiscoveryConfig;
use crate::error::{Error, Result};
use crate::store::DocumentStore;
use crate::value::Document;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// End-of-run counters
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub rows_written: u64,
    /// Cells left empty because a reference did not resolve
    pub unresolved_references: u64,
    /// Stopped early on request; output is complete up to the last batch
    pub cancelled: bool,
    pub columns: usize,
    pub cached_collections: Vec<String>,
    pub lookup_collections: Vec<String>,
    pub report: ExportReport,
}

/// Streams one primary collection into delimited text
pub struct ExportEngine<'s> {
    store: &'s dyn DocumentStore,
    config: DiscoveryConfig,
    policy: CachePolicy,
    workers: usize,
    row_limit: Option<u64>,
    run_time: DateTime<Utc>,
    cancel: Arc<AtomicBool>,
}

impl<'s> ExportEngine<'s> {
    pub fn new(store: &'s dyn DocumentStore, config: DiscoveryConfig) -> Self {
        ExportEngine {
            store,
            config,
            policy: CachePolicy::default(),
            workers: crate::default_workers(),
            row_limit: None,
            run_time: Utc::now(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Stop after `limit` primary documents
    pub fn with_row_limit(mut self, limit: Option<u64>) -> Self {
        self.row_limit = limit;
        self
    }

    /// Reference time for relative date windows
    pub fn with_run_time(mut self, run_time: DateTime<Utc>) -> Self {
        self.run_time = run_time;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag that stops the export after the in-flight batch
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Export to `path` and save the column report next to it; a fatal
    /// error removes the partial file
    pub fn export_to_path(&self, path: &Path) -> Result<ExportSummary> {
        let file = File::create(path)?;
        match self.export(BufWriter::new(file)) {
            Ok(summary) => {
                let report = report_path(path);
                match summary.report.save(&report) {
                    Ok(()) => info!("Column report saved to {}", report.display()),
                    Err(err) => warn!("Could not save column report {}: {}", report.display(), err),
                }
                Ok(summary)
            }
            Err(err) => {
                if let Err(remove_err) = std::fs::remove_file(path) {
                    warn!("Could not remove partial output {}: {}", path.display(), remove_err);
                }
                Err(err)
            }
        }
    }

    /// Export into `writer`
    ///
    /// Everything that can fail before the first row (configuration, cache
    /// builds, opening the primary scan) is done before the header is
    /// written.
    pub fn export<W: Write>(&self, writer: W) -> Result<ExportSummary> {
        let collection = self.config.collection.as_str();
        self.config.validate()?;
        let plan = ExportPlan::compile(&self.config)?;
        debug!("Export plan for {}: {} columns", collection, plan.columns.len());

        let mut cache = CollectionCacheManager::new(self.store, self.policy);
        cache.prepare(&self.config)?;

        let total = self.store.estimated_count(collection)?;
        let cursor = self.store.scan(collection, 0, self.row_limit)?;
        let pool = crate::worker_pool(self.workers)?;
        info!(
            "Exporting {} ({} documents{}) with {} columns",
            collection,
            total,
            self.row_limit.map(|limit| format!(", limit {}", limit)).unwrap_or_default(),
            plan.columns.len()
        );

        let unresolved = AtomicU64::new(0);
        let evaluator = RowEvaluator::new(&plan, &cache, self.run_time, &unresolved)?;
        let mut out = CsvRowWriter::new(writer, &self.config.export_settings)?;
        out.write_header(&plan.headers())?;
        out.flush()?;
        let mut collector = ColumnStatsCollector::new(&plan);

        let batch_size = self.config.export_settings.batch_size.max(1);
        let mut batch: Vec<Document> = Vec::with_capacity(batch_size);
        let mut documents_read = 0u64;
        let mut cancelled = false;

        for doc in cursor {
            let doc = doc.map_err(|err| Error::PrimaryScan {
                collection: collection.to_string(),
                documents: documents_read,
                message: err.to_string(),
            })?;
            documents_read += 1;
            batch.push(doc);

            if batch.len() == batch_size {
                write_batch(&pool, &evaluator, &mut batch, &mut collector, &mut out)?;
                debug!("Wrote {} rows", out.rows_written());
                if self.cancel.load(Ordering::SeqCst) {
                    info!("Export cancelled after {} rows", out.rows_written());
                    cancelled = true;
                    break;
                }
            }
        }
        if !cancelled && !batch.is_empty() {
            write_batch(&pool, &evaluator, &mut batch, &mut collector, &mut out)?;
        }

        let rows_written = out.rows_written();
        out.into_inner()?.flush()?;

        let unresolved_references = unresolved.load(Ordering::Relaxed);
        let (cached, lookup) = cache.summary();
        let summary = ExportSummary {
            rows_written,
            unresolved_references,
            cancelled,
            columns: plan.columns.len(),
            cached_collections: cached.into_iter().map(str::to_string).collect(),
            lookup_collections: lookup.into_iter().map(str::to_string).collect(),
            report: collector.finish(collection),
        };

        info!("Exported {} rows from {}", rows_written, collection);
        info!(
            "Columns: {} meaningful, {} sparse, {} single-value, {} always empty",
            summary.report.meaningful, summary.report.sparse, summary.report.single_value, summary.report.always_empty
        );
        if unresolved_references > 0 {
            warn!("{} cells empty due to unresolved references", unresolved_references);
        } else {
            info!("0 cells empty due to unresolved references");
        }
        Ok(summary)
    }
}

/// Evaluate a batch in parallel, then record and write it in scan order
fn write_batch<W: Write>(
    pool: &rayon::ThreadPool,
    evaluator: &RowEvaluator<'_>,
    batch: &mut Vec<Document>,
    collector: &mut ColumnStatsCollector,
    out: &mut CsvRowWriter<W>,
) -> Result<()> {
    let rows: Vec<Vec<String>> = pool.install(|| batch.par_iter().map(|doc| evaluator.evaluate(doc)).collect());
    batch.clear();
    collector.record_rows(&rows);
    out.write_rows(&rows)?;
    out.flush()
}
