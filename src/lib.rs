//! # Kiln - Schema Discovery and Flattened Export
//!
//! A library for discovering a usable export schema from a nested document
//! collection and exporting it as flat, relationship-expanded CSV.
//!
//! ## Modules
//!
//! - **discovery**: Sample a collection, infer types and sparsity, detect references
//! - **config**: Field configuration model, overlay merge and validation
//! - **cache**: Forward and reverse indexes over referenced collections
//! - **export**: Compile a configuration into columns and stream rows
//! - **store**: The document store boundary and bundled stores
//!
//! ## Quick Start
//!
//! ```rust
//! use kiln::config::DiscoveryParameters;
//! use kiln::discovery::DiscoveryEngine;
//! use kiln::export::ExportEngine;
//! use kiln::store::MemoryStore;
//! use serde_json::json;
//!
//! # fn main() -> kiln::Result<()> {
//! let store = MemoryStore::new()
//!     .with_collection("listings", vec![
//!         json!({"_id": "l1", "price": 100, "agentId": "5f1d7c2e9b1e8a3d4c5b6a79"}),
//!         json!({"_id": "l2", "price": 250, "agentId": "5f1d7c2e9b1e8a3d4c5b6a7a"}),
//!     ])
//!     .with_collection("agents", vec![
//!         json!({"_id": "5f1d7c2e9b1e8a3d4c5b6a79", "fullName": "Ada"}),
//!         json!({"_id": "5f1d7c2e9b1e8a3d4c5b6a7a", "fullName": "Grace"}),
//!     ]);
//!
//! let outcome = DiscoveryEngine::new(&store, DiscoveryParameters::default()).discover("listings")?;
//!
//! let mut csv = Vec::new();
//! let summary = ExportEngine::new(&store, outcome.config).export(&mut csv)?;
//! assert_eq!(summary.rows_written, 2);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod export;
pub mod formats;
pub mod naming;
pub mod store;
pub mod value;

// Re-export commonly used types for convenience
pub use cache::{CachePolicy, CollectionCacheManager};
pub use config::{DiscoveryConfig, DiscoveryParameters, FieldDescriptor, RunParameters};
pub use discovery::{DiscoveryEngine, DiscoveryOutcome};
pub use error::{Error, Result};
pub use export::{ExportEngine, ExportSummary};
pub use store::{DocumentStore, JsonlStore, MemoryStore};

/// Worker count used when none is configured
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Bounded pool for per-document work
pub(crate) fn worker_pool(workers: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|index| format!("kiln-worker-{}", index))
        .build()
        .map_err(|err| Error::WorkerPool(err.to_string()))
}
