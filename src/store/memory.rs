//! In-memory store with fault injection

use super::{DocumentIter, DocumentStore};
use crate::error::{Error, Result};
use crate::value::{document_from_json, document_id, Document};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// Ordered in-memory collections
///
/// Used for tests and for embedding callers that already hold documents.
/// Collections can be marked unavailable, or made to fail part-way through a
/// scan, to exercise the fatal error paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: BTreeMap<String, Vec<Document>>,
    unavailable: BTreeSet<String>,
    fail_after: BTreeMap<String, u64>,
    lookups: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a collection of JSON documents; non-object values are skipped
    pub fn with_collection(mut self, collection: &str, documents: Vec<Value>) -> Self {
        self.insert_json(collection, documents);
        self
    }

    pub fn insert_json(&mut self, collection: &str, documents: impl IntoIterator<Item = Value>) {
        let entry = self.collections.entry(collection.to_string()).or_default();
        entry.extend(
            documents
                .into_iter()
                .filter_map(|value| document_from_json(&value)),
        );
    }

    pub fn insert(&mut self, collection: &str, document: Document) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(document);
    }

    /// Every request against `collection` fails with a connectivity error
    pub fn mark_unavailable(&mut self, collection: &str) {
        self.unavailable.insert(collection.to_string());
    }

    /// Scans of `collection` fail after yielding `documents` documents
    pub fn fail_scan_after(&mut self, collection: &str, documents: u64) {
        self.fail_after.insert(collection.to_string(), documents);
    }

    /// Number of point lookups served so far
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    fn documents(&self, collection: &str) -> Result<&[Document]> {
        if self.unavailable.contains(collection) {
            return Err(Error::connectivity(collection, "connection refused"));
        }
        self.collections
            .get(collection)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))
    }
}

impl DocumentStore for MemoryStore {
    fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self
            .collections
            .keys()
            .filter(|name| !self.unavailable.contains(*name))
            .cloned()
            .collect())
    }

    fn estimated_count(&self, collection: &str) -> Result<u64> {
        Ok(self.documents(collection)?.len() as u64)
    }

    fn scan(&self, collection: &str, skip: u64, limit: Option<u64>) -> Result<DocumentIter<'_>> {
        let documents = self.documents(collection)?;
        let fail_after = self.fail_after.get(collection).copied();
        let name = collection.to_string();

        let mut yielded = 0u64;
        let mut failed = false;
        let iter = documents
            .iter()
            .skip(skip as usize)
            .take(limit.map_or(usize::MAX, |limit| limit as usize))
            .map_while(move |doc| {
                if failed {
                    return None;
                }
                if fail_after.map_or(false, |n| yielded >= n) {
                    failed = true;
                    return Some(Err(Error::connectivity(&name, "connection reset during scan")));
                }
                yielded += 1;
                Some(Ok(doc.clone()))
            });
        Ok(Box::new(iter))
    }

    fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .documents(collection)?
            .iter()
            .find(|doc| document_id(doc).as_deref() == Some(id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::new().with_collection(
            "agents",
            vec![
                json!({"_id": "a1", "name": "Ada"}),
                json!({"_id": "a2", "name": "Grace"}),
                json!({"_id": "a3", "name": "Linus"}),
            ],
        )
    }

    #[test]
    fn test_scan_skip_and_limit() {
        let store = store();
        let names: Vec<String> = store
            .scan("agents", 1, Some(1))
            .unwrap()
            .map(|doc| doc.unwrap()["name"].render())
            .collect();
        assert_eq!(names, vec!["Grace"]);
    }

    #[test]
    fn test_find_by_id_counts_lookups() {
        let store = store();
        assert!(store.find_by_id("agents", "a3").unwrap().is_some());
        assert!(store.find_by_id("agents", "zz").unwrap().is_none());
        assert_eq!(store.lookups(), 2);
    }

    #[test]
    fn test_fault_injection() {
        let mut store = store();
        store.fail_scan_after("agents", 2);
        let results: Vec<_> = store.scan("agents", 0, None).unwrap().collect();
        assert_eq!(results.len(), 3);
        assert!(results[1].is_ok());
        assert!(matches!(results[2], Err(Error::Connectivity { .. })));

        store.mark_unavailable("agents");
        assert!(store.estimated_count("agents").is_err());
        assert!(matches!(
            store.estimated_count("missing"),
            Err(Error::CollectionNotFound(_))
        ));
    }
}
