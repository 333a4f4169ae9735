//! Collection cache manager
//!
//! Referenced collections at or below the size threshold are read once into
//! a forward index (id to document); larger ones are served by point lookups.
//! Reverse indexes (foreign key value to referencing documents) are built
//! with one full scan for every `(collection, field)` pair that needs one.
//! Caches are built up front with `&mut self` and are read-only afterwards,
//! so workers share them through `&self` without locking.

use crate::config::{visit_fields, DiscoveryConfig};
use crate::error::{Error, Result};
use crate::store::DocumentStore;
use crate::value::{document_id, Document, FieldValue};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Collections with at most this many documents are cached in full
pub const DEFAULT_MAX_CACHED_DOCUMENTS: u64 = 100_000;

/// Size threshold deciding between full caching and point lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub max_cached_documents: u64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy {
            max_cached_documents: DEFAULT_MAX_CACHED_DOCUMENTS,
        }
    }
}

impl CachePolicy {
    pub fn new(max_cached_documents: u64) -> Self {
        CachePolicy { max_cached_documents }
    }

    /// Full caching when the count is at or below the threshold
    pub fn should_cache(&self, document_count: u64) -> bool {
        document_count <= self.max_cached_documents
    }
}

/// How references into a collection are served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Cached,
    PointLookup,
}

#[derive(Debug)]
struct CachedCollection {
    mode: CacheMode,
    /// Documents in scan order (empty in point-lookup mode)
    documents: Vec<Arc<Document>>,
    by_id: HashMap<String, usize>,
}

type Buckets = HashMap<String, Vec<Arc<Document>>>;

/// Forward and reverse indexes over referenced collections
pub struct CollectionCacheManager<'s> {
    store: &'s dyn DocumentStore,
    policy: CachePolicy,
    collections: BTreeMap<String, CachedCollection>,
    reverse: BTreeMap<String, BTreeMap<String, Buckets>>,
}

impl<'s> CollectionCacheManager<'s> {
    pub fn new(store: &'s dyn DocumentStore, policy: CachePolicy) -> Self {
        CollectionCacheManager {
            store,
            policy,
            collections: BTreeMap::new(),
            reverse: BTreeMap::new(),
        }
    }

    pub fn store(&self) -> &'s dyn DocumentStore {
        self.store
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Decide the mode for `collection` and load it when it qualifies
    ///
    /// An unreadable collection is fatal; there is no silent fallback to
    /// point lookups.
    pub fn ensure_collection(&mut self, collection: &str) -> Result<CacheMode> {
        if let Some(existing) = self.collections.get(collection) {
            return Ok(existing.mode);
        }

        let count = self
            .store
            .estimated_count(collection)
            .map_err(|err| cache_error(collection, err))?;

        let entry = if self.policy.should_cache(count) {
            let documents = self.read_all(collection)?;
            let mut by_id = HashMap::with_capacity(documents.len());
            for (index, doc) in documents.iter().enumerate() {
                if let Some(id) = document_id(doc) {
                    by_id.entry(id).or_insert(index);
                }
            }
            info!("Cached {} documents from {}", documents.len(), collection);
            CachedCollection {
                mode: CacheMode::Cached,
                documents,
                by_id,
            }
        } else {
            info!(
                "{} has {} documents (threshold {}); using point lookups",
                collection, count, self.policy.max_cached_documents
            );
            CachedCollection {
                mode: CacheMode::PointLookup,
                documents: Vec::new(),
                by_id: HashMap::new(),
            }
        };

        let mode = entry.mode;
        self.collections.insert(collection.to_string(), entry);
        Ok(mode)
    }

    /// Build the reverse index of `collection` keyed by `foreign_field`
    ///
    /// Array-valued foreign keys add the document to every element's bucket.
    pub fn ensure_reverse_index(&mut self, collection: &str, foreign_field: &str) -> Result<()> {
        if self
            .reverse
            .get(collection)
            .map_or(false, |fields| fields.contains_key(foreign_field))
        {
            return Ok(());
        }

        let documents = match self.collections.get(collection) {
            Some(cached) if cached.mode == CacheMode::Cached => cached.documents.clone(),
            _ => self.read_all(collection)?,
        };

        let mut buckets: Buckets = HashMap::new();
        for doc in &documents {
            for key in foreign_keys(doc, foreign_field) {
                buckets.entry(key).or_default().push(Arc::clone(doc));
            }
        }
        info!(
            "Built reverse index {}.{} ({} keys over {} documents)",
            collection,
            foreign_field,
            buckets.len(),
            documents.len()
        );

        self.reverse
            .entry(collection.to_string())
            .or_default()
            .insert(foreign_field.to_string(), buckets);
        Ok(())
    }

    /// Materialize everything an export of `config` depends on
    pub fn prepare(&mut self, config: &DiscoveryConfig) -> Result<()> {
        for collection in config.export_collections() {
            self.ensure_collection(&collection)?;
        }

        let mut reverse_pairs = Vec::new();
        visit_fields(&config.fields, &mut |field| {
            if !field.include {
                return;
            }
            if let Some(link) = &field.reverse_relationship {
                reverse_pairs.push((link.collection.clone(), link.foreign_field.clone()));
            }
            if let Some(spec) = &field.statistics_spec {
                reverse_pairs.push((spec.target_collection.clone(), spec.match_field.clone()));
            }
        });
        for (collection, field) in reverse_pairs {
            self.ensure_reverse_index(&collection, &field)?;
        }
        Ok(())
    }

    pub fn mode(&self, collection: &str) -> Option<CacheMode> {
        self.collections.get(collection).map(|cached| cached.mode)
    }

    /// Look up a referenced document
    ///
    /// Cached collections answer from memory; others go to the store. Store
    /// errors on a single lookup are logged and treated as a miss.
    pub fn resolve(&self, collection: &str, id: &str) -> Option<Arc<Document>> {
        if let Some(cached) = self.collections.get(collection) {
            if cached.mode == CacheMode::Cached {
                return cached
                    .by_id
                    .get(id)
                    .map(|index| Arc::clone(&cached.documents[*index]));
            }
        }

        match self.store.find_by_id(collection, id) {
            Ok(found) => found.map(Arc::new),
            Err(err) => {
                warn!("Lookup of {} in {} failed: {}", id, collection, err);
                None
            }
        }
    }

    /// Documents of `collection` whose `foreign_field` holds `key`
    pub fn reverse_bucket(&self, collection: &str, foreign_field: &str, key: &str) -> Option<&[Arc<Document>]> {
        self.reverse
            .get(collection)?
            .get(foreign_field)?
            .get(key)
            .map(Vec::as_slice)
    }

    /// Whether a reverse index exists for the pair
    pub fn has_reverse_index(&self, collection: &str, foreign_field: &str) -> bool {
        self.reverse
            .get(collection)
            .map_or(false, |fields| fields.contains_key(foreign_field))
    }

    /// Names of collections per mode, for the end-of-run summary
    pub fn summary(&self) -> (Vec<&str>, Vec<&str>) {
        let mut cached = Vec::new();
        let mut lookup = Vec::new();
        for (name, entry) in &self.collections {
            match entry.mode {
                CacheMode::Cached => cached.push(name.as_str()),
                CacheMode::PointLookup => lookup.push(name.as_str()),
            }
        }
        (cached, lookup)
    }

    fn read_all(&self, collection: &str) -> Result<Vec<Arc<Document>>> {
        let mut documents = Vec::new();
        let cursor = self
            .store
            .scan(collection, 0, None)
            .map_err(|err| cache_error(collection, err))?;
        for doc in cursor {
            documents.push(Arc::new(doc.map_err(|err| cache_error(collection, err))?));
        }
        debug!("Read {} documents from {}", documents.len(), collection);
        Ok(documents)
    }
}

fn cache_error(collection: &str, err: Error) -> Error {
    Error::CacheBuild {
        collection: collection.to_string(),
        source: Box::new(err),
    }
}

/// Key strings found at a dotted path, fanning out over arrays
pub(crate) fn foreign_keys(doc: &Document, path: &str) -> Vec<String> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut keys = Vec::new();
    if let Some((first, rest)) = segments.split_first() {
        if let Some(value) = doc.get(*first) {
            collect_keys(value, rest, &mut keys);
        }
    }
    keys
}

fn collect_keys(value: &FieldValue, rest: &[&str], keys: &mut Vec<String>) {
    match value {
        FieldValue::Array(items) => {
            for item in items {
                collect_keys(item, rest, keys);
            }
        }
        FieldValue::Object(inner) => {
            if let Some((next, tail)) = rest.split_first() {
                if let Some(child) = inner.get(*next) {
                    collect_keys(child, tail, keys);
                }
            }
        }
        other if rest.is_empty() => {
            if let Some(key) = other.key_string() {
                keys.push(key);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn agents(count: usize) -> Vec<serde_json::Value> {
        (0..count)
            .map(|i| json!({"_id": format!("a{}", i), "name": format!("Agent {}", i)}))
            .collect()
    }

    #[test]
    fn test_threshold_boundary() {
        let store = MemoryStore::new()
            .with_collection("at_threshold", agents(3))
            .with_collection("over_threshold", agents(4));
        let mut cache = CollectionCacheManager::new(&store, CachePolicy::new(3));

        assert_eq!(cache.ensure_collection("at_threshold").unwrap(), CacheMode::Cached);
        assert_eq!(cache.ensure_collection("over_threshold").unwrap(), CacheMode::PointLookup);

        assert!(cache.resolve("at_threshold", "a2").is_some());
        assert_eq!(store.lookups(), 0);

        assert!(cache.resolve("over_threshold", "a3").is_some());
        assert_eq!(store.lookups(), 1);
    }

    #[test]
    fn test_missing_collection_is_fatal() {
        let store = MemoryStore::new();
        let mut cache = CollectionCacheManager::new(&store, CachePolicy::default());
        let err = cache.ensure_collection("agents").unwrap_err();
        assert!(matches!(err, Error::CacheBuild { ref collection, .. } if collection == "agents"));
    }

    #[test]
    fn test_unreadable_collection_is_fatal() {
        let mut store = MemoryStore::new().with_collection("agents", agents(5));
        store.fail_scan_after("agents", 2);
        let mut cache = CollectionCacheManager::new(&store, CachePolicy::default());
        assert!(matches!(
            cache.ensure_collection("agents"),
            Err(Error::CacheBuild { .. })
        ));
    }

    #[test]
    fn test_reverse_index_buckets() {
        let store = MemoryStore::new().with_collection(
            "showings",
            vec![
                json!({"_id": "s1", "listingId": "l1"}),
                json!({"_id": "s2", "listingId": "l1"}),
                json!({"_id": "s3", "listingId": "l2"}),
                json!({"_id": "s4", "listingIds": ["l1", "l2"]}),
            ],
        );
        let mut cache = CollectionCacheManager::new(&store, CachePolicy::default());
        cache.ensure_reverse_index("showings", "listingId").unwrap();
        cache.ensure_reverse_index("showings", "listingIds").unwrap();

        assert_eq!(cache.reverse_bucket("showings", "listingId", "l1").unwrap().len(), 2);
        assert!(cache.reverse_bucket("showings", "listingId", "l9").is_none());
        assert_eq!(cache.reverse_bucket("showings", "listingIds", "l2").unwrap().len(), 1);
    }

    #[test]
    fn test_foreign_keys_fan_out() {
        let doc = crate::value::document_from_json(&json!({
            "parties": [{"agent": "a1"}, {"agent": "a2"}, {"other": 1}]
        }))
        .unwrap();
        assert_eq!(foreign_keys(&doc, "parties.agent"), vec!["a1", "a2"]);
    }
}
