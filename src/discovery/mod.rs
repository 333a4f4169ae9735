//! Schema discovery
//!
//! Samples a primary collection, accumulates per-path statistics, detects
//! relationships, and produces a [`DiscoveryConfig`].
//!
//! Collections small enough to cache are read exhaustively so that sparsity
//! matches what the export will see; larger ones are sampled. Discovery runs
//! in passes: each pass walks the whole sample with the relationships known
//! so far, and new relationships trigger another pass that expands them
//! under `<path>_expanded`. Passes stop when nothing new is found.
//!
//! Arrays referencing a transaction-like collection also get disabled
//! `[stats]` aggregations over the documents pointing back at each row.
//!
//! ```rust
//! use kiln::discovery::DiscoveryEngine;
//! use kiln::config::DiscoveryParameters;
//! use kiln::store::MemoryStore;
//! use serde_json::json;
//!
//! # fn main() -> kiln::Result<()> {
//! let store = MemoryStore::new().with_collection("people", vec![
//!     json!({"name": "Ada", "age": 36}),
//!     json!({"name": "Grace", "age": 45}),
//! ]);
//!
//! let outcome = DiscoveryEngine::new(&store, DiscoveryParameters::default()).discover("people")?;
//! assert_eq!(outcome.config.fields.len(), 2);
//! # Ok(())
//! # }
//! ```

mod aggregates;
mod audit;
mod relationships;
mod rules;
mod sampler;
mod stats;

pub use aggregates::{statistics_fields, TargetProfile};
pub use audit::render_audit;
pub use relationships::{is_candidate, is_infrastructure, naming_convention, RelationshipDetector};
pub use rules::{is_technical_id, pick_display_field, FieldBuilder};
pub use sampler::{classify, has_reference_suffix, PathSampler, EXPANDED_SUFFIX};
pub use stats::{ArrayShape, DiscoveryRun, Observation, PathStats};

use crate::cache::{CachePolicy, CollectionCacheManager};
use crate::config::{visit_fields, DataType, DiscoveryConfig, DiscoveryParameters};
use crate::error::{Error, Result};
use crate::store::DocumentStore;
use crate::value::Document;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Documents per parallel work unit
const CHUNK_SIZE: usize = 256;

/// Result of one discovery run
#[derive(Debug, Clone)]
pub struct DiscoveryOutcome {
    pub config: DiscoveryConfig,
    pub documents_scanned: u64,
    /// Whether every document of the collection was read
    pub exhaustive: bool,
}

impl DiscoveryOutcome {
    /// Indented text report of every discovered path
    pub fn audit_tree(&self) -> String {
        render_audit(&self.config, self.documents_scanned, self.exhaustive)
    }
}

/// Drives sampling and inference for one primary collection
pub struct DiscoveryEngine<'s> {
    store: &'s dyn DocumentStore,
    parameters: DiscoveryParameters,
    policy: CachePolicy,
    workers: usize,
}

impl<'s> DiscoveryEngine<'s> {
    pub fn new(store: &'s dyn DocumentStore, parameters: DiscoveryParameters) -> Self {
        DiscoveryEngine {
            store,
            parameters,
            policy: CachePolicy::default(),
            workers: crate::default_workers(),
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

    /// Discover `collection`, stamping the current time
    pub fn discover(&self, collection: &str) -> Result<DiscoveryOutcome> {
        self.discover_at(collection, Utc::now())
    }

    /// Discover `collection` with a fixed timestamp
    ///
    /// Output depends only on the documents read and `discovered_at`.
    pub fn discover_at(&self, collection: &str, discovered_at: DateTime<Utc>) -> Result<DiscoveryOutcome> {
        let count = self.store.estimated_count(collection)?;
        let exhaustive = self.policy.should_cache(count);
        let limit = if exhaustive {
            None
        } else {
            Some(self.parameters.sample_size as u64)
        };
        info!(
            "Discovering {} ({} documents, {})",
            collection,
            count,
            if exhaustive { "exhaustive scan" } else { "sampled" }
        );

        let sample = self.read_sample(collection, limit)?;
        let collections = self.store.list_collections()?;
        let pool = crate::worker_pool(self.workers)?;

        let mut cache = CollectionCacheManager::new(self.store, self.policy);
        let detector = RelationshipDetector::new(
            self.store,
            &collections,
            collection,
            &self.parameters.relationship_hints,
        );
        let infrastructure = &self.parameters.infrastructure_segments;

        let mut relationships: BTreeMap<String, String> = BTreeMap::new();
        let mut rejected: BTreeSet<String> = BTreeSet::new();
        let max_passes = self.parameters.expansion_depth + 1;
        let mut pass = 0;

        let run = loop {
            pass += 1;
            let run = {
                let sampler = PathSampler::new(collection, self.parameters.expansion_depth, &relationships, &cache);
                pool.install(|| walk_sample(&sampler, &sample))
            };
            debug!("Pass {}: {} paths", pass, run.paths.len());

            let mut found = Vec::new();
            for (path, stats) in &run.paths {
                if relationships.contains_key(path) || rejected.contains(path) {
                    continue;
                }
                if !is_candidate(path, stats, infrastructure) {
                    continue;
                }
                match detector.detect(path, stats) {
                    Some(target) => found.push((path.clone(), target)),
                    None => {
                        rejected.insert(path.clone());
                    }
                }
            }

            if found.is_empty() {
                break run;
            }
            for (path, target) in found {
                cache.ensure_collection(&target)?;
                info!("Relationship {} -> {}", path, target);
                relationships.insert(path, target);
            }
            if pass >= max_passes {
                break run;
            }
        };

        let profiles = self.profile_targets(collection, &run, &relationships);
        let fields = FieldBuilder::new(&run, &self.parameters, &relationships, &cache)
            .with_target_profiles(&profiles)
            .build();

        let mut required_collections = BTreeSet::new();
        visit_fields(&fields, &mut |field| {
            required_collections.extend(field.referenced_collections().into_iter().map(str::to_string));
        });

        let mut config = DiscoveryConfig::new(collection, self.parameters.clone());
        config.discovered_at = Some(discovered_at);
        config.fields = fields;
        config.required_collections = required_collections;

        let (total, included) = config.field_counts();
        info!(
            "Discovered {} paths in {} ({} included, {} relationships) over {} documents",
            total,
            collection,
            included,
            relationships.len(),
            run.documents
        );

        Ok(DiscoveryOutcome {
            config,
            documents_scanned: run.documents,
            exhaustive,
        })
    }

    /// Transaction-like collections referenced by top-level arrays
    fn profile_targets(
        &self,
        primary: &str,
        run: &DiscoveryRun,
        relationships: &BTreeMap<String, String>,
    ) -> BTreeMap<String, TargetProfile> {
        let targets: BTreeSet<&str> = relationships
            .iter()
            .filter(|(path, target)| target.as_str() != primary && !path.contains(EXPANDED_SUFFIX))
            .filter(|(path, _)| {
                run.paths
                    .get(path.as_str())
                    .map_or(false, |stats| stats.dominant_kind() == Some(DataType::Array))
            })
            .map(|(_, target)| target.as_str())
            .collect();

        let mut profiles = BTreeMap::new();
        for target in targets {
            match TargetProfile::sample(self.store, target) {
                Ok(Some(profile)) if profile.is_transaction_like() => {
                    info!("Offering statistics over {}", target);
                    profiles.insert(target.to_string(), profile);
                }
                Ok(_) => debug!("{} is not transaction-like", target),
                Err(err) => warn!("Skipping statistics over {}: {}", target, err),
            }
        }
        profiles
    }

    fn read_sample(&self, collection: &str, limit: Option<u64>) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        for doc in self.store.scan(collection, 0, limit)? {
            let doc = doc.map_err(|err| Error::PrimaryScan {
                collection: collection.to_string(),
                documents: documents.len() as u64,
                message: err.to_string(),
            })?;
            documents.push(doc);
        }
        Ok(documents)
    }
}

/// Walk every sampled document, merging per-chunk runs
fn walk_sample(sampler: &PathSampler<'_, '_>, sample: &[Document]) -> DiscoveryRun {
    sample
        .par_chunks(CHUNK_SIZE)
        .map(|chunk| {
            let mut run = DiscoveryRun::new();
            for doc in chunk {
                sampler.walk_document(doc, &mut run);
            }
            run
        })
        .reduce(DiscoveryRun::new, DiscoveryRun::merge)
}
