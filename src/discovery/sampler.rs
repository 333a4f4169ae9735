//! Path sampler
//!
//! Walks one document at a time and emits an [`Observation`] for every path
//! it touches. Nested objects recurse up to the expansion depth; arrays are
//! recorded once at their own path, with object elements walked under that
//! same path. References with a known target collection are resolved through
//! the cache manager and walked under `<path>_expanded`, never re-entering a
//! collection already on the current expansion chain.

use super::stats::{ArrayShape, DiscoveryRun, Observation};
use crate::cache::CollectionCacheManager;
use crate::config::{DataType, ElementKind};
use crate::formats::{detect_format, StringFormat};
use crate::value::{Document, FieldValue};
use std::collections::BTreeMap;

/// Suffix appended to a reference path for its resolved document
pub const EXPANDED_SUFFIX: &str = "_expanded";

const REFERENCE_SUFFIXES: [&str; 8] = ["Id", "Ids", "_id", "_ids", "Ref", "Refs", "_ref", "_refs"];

/// Key names that conventionally hold references
pub fn has_reference_suffix(key: &str) -> bool {
    key != "_id" && REFERENCE_SUFFIXES.iter().any(|suffix| key.len() > suffix.len() && key.ends_with(suffix))
}

/// Classify a value observed under `key`; `None` when the value is empty
pub fn classify(key: &str, value: &FieldValue) -> Option<DataType> {
    if value.is_empty() {
        return None;
    }
    let kind = match value {
        FieldValue::String(s) => match detect_format(s) {
            Some(StringFormat::Identifier) if has_reference_suffix(key) => DataType::Reference,
            Some(StringFormat::Date) | Some(StringFormat::DateTime) => DataType::Date,
            _ => DataType::String,
        },
        other => other.data_type()?,
    };
    Some(kind)
}

fn element_kind(key: &str, element: &FieldValue) -> ElementKind {
    match classify(key, element) {
        Some(DataType::Object) => ElementKind::Object,
        Some(DataType::Reference) => ElementKind::Reference,
        _ => ElementKind::Scalar,
    }
}

/// Per-pass walker; shared read-only across workers
pub struct PathSampler<'a, 's> {
    primary: &'a str,
    expansion_depth: usize,
    /// Relationship targets known so far, by path
    relationships: &'a BTreeMap<String, String>,
    cache: &'a CollectionCacheManager<'s>,
}

impl<'a, 's> PathSampler<'a, 's> {
    pub fn new(
        primary: &'a str,
        expansion_depth: usize,
        relationships: &'a BTreeMap<String, String>,
        cache: &'a CollectionCacheManager<'s>,
    ) -> Self {
        PathSampler {
            primary,
            expansion_depth,
            relationships,
            cache,
        }
    }

    /// Walk one primary document and close it in `run`
    pub fn walk_document(&self, doc: &Document, run: &mut DiscoveryRun) {
        let mut chain = vec![self.primary.to_string()];
        self.walk_object(doc, None, 0, self.primary, &mut chain, run);
        run.finish_document();
    }

    fn walk_object(
        &self,
        doc: &Document,
        prefix: Option<&str>,
        depth: usize,
        source: &str,
        chain: &mut Vec<String>,
        run: &mut DiscoveryRun,
    ) {
        for (key, value) in doc {
            let path = match prefix {
                Some(prefix) => format!("{}.{}", prefix, key),
                None => key.clone(),
            };
            self.walk_value(key, &path, value, depth, source, chain, run);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_value(
        &self,
        key: &str,
        path: &str,
        value: &FieldValue,
        depth: usize,
        source: &str,
        chain: &mut Vec<String>,
        run: &mut DiscoveryRun,
    ) {
        let kind = classify(key, value);
        let mut texts = Vec::new();
        let mut array = None;

        match value {
            FieldValue::Array(items) => {
                let element_kinds: Vec<ElementKind> = items.iter().map(|item| element_kind(key, item)).collect();
                for (item, kind) in items.iter().zip(&element_kinds) {
                    if *kind != ElementKind::Object && !item.is_empty() {
                        if let Some(text) = item.key_string() {
                            texts.push(text);
                        }
                    }
                }
                array = Some(ArrayShape {
                    len: items.len(),
                    element_kinds,
                });
            }
            FieldValue::Object(_) => {}
            other if kind.is_some() => {
                if let Some(text) = other.key_string() {
                    texts.push(text);
                }
            }
            _ => {}
        }

        run.observe(Observation {
            path,
            source_collection: source,
            kind,
            texts,
            array,
        });

        if depth >= self.expansion_depth {
            return;
        }

        match value {
            FieldValue::Object(inner) => {
                self.walk_object(inner, Some(path), depth + 1, source, chain, run);
            }
            FieldValue::Array(items) => {
                for item in items {
                    if let FieldValue::Object(inner) = item {
                        self.walk_object(inner, Some(path), depth + 1, source, chain, run);
                    }
                }
            }
            _ if kind == Some(DataType::Reference) => {
                self.expand_reference(path, value, depth, chain, run);
            }
            _ => {}
        }
    }

    /// Walk the referenced document under `<path>_expanded`
    fn expand_reference(
        &self,
        path: &str,
        value: &FieldValue,
        depth: usize,
        chain: &mut Vec<String>,
        run: &mut DiscoveryRun,
    ) {
        let Some(target) = self.relationships.get(path) else {
            return;
        };
        if chain.iter().any(|visited| visited == target) {
            return;
        }
        let Some(id) = value.key_string() else {
            return;
        };
        let Some(resolved) = self.cache.resolve(target, &id) else {
            return;
        };

        let expanded = format!("{}{}", path, EXPANDED_SUFFIX);
        run.observe(Observation {
            path: &expanded,
            source_collection: target,
            kind: Some(DataType::Object),
            texts: Vec::new(),
            array: None,
        });

        chain.push(target.clone());
        self.walk_object(&resolved, Some(&expanded), depth + 1, target, chain, run);
        chain.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePolicy;
    use crate::store::MemoryStore;
    use crate::value::document_from_json;
    use serde_json::json;

    #[test]
    fn test_classification() {
        let hex = FieldValue::String("5f1d7c2e9b1e8a3d4c5b6a79".to_string());
        assert_eq!(classify("agentId", &hex), Some(DataType::Reference));
        assert_eq!(classify("color", &hex), Some(DataType::String));
        assert_eq!(
            classify("listedAt", &FieldValue::String("2024-01-15".to_string())),
            Some(DataType::Date)
        );
        assert_eq!(classify("anything", &FieldValue::Null), None);
        assert!(!has_reference_suffix("_id"));
        assert!(!has_reference_suffix("Id"));
        assert!(has_reference_suffix("agentIds"));
    }

    #[test]
    fn test_walk_paths_and_depth() {
        let store = MemoryStore::new();
        let cache = CollectionCacheManager::new(&store, CachePolicy::default());
        let relationships = BTreeMap::new();
        let sampler = PathSampler::new("listings", 1, &relationships, &cache);

        let doc = document_from_json(&json!({
            "address": {"city": "Oslo", "geo": {"lat": 1.0}},
            "rooms": [{"name": "kitchen"}, {"name": "hall"}],
            "tags": ["b", "a"]
        }))
        .unwrap();

        let mut run = DiscoveryRun::new();
        sampler.walk_document(&doc, &mut run);

        let paths: Vec<&str> = run.paths.keys().map(String::as_str).collect();
        assert_eq!(
            paths,
            vec!["address", "address.city", "address.geo", "rooms", "rooms.name", "tags"]
        );
        assert_eq!(run.paths["rooms.name"].occurrences, 1);
        assert_eq!(run.paths["rooms.name"].distinct.len(), 2);
        assert_eq!(run.paths["tags"].distinct.len(), 2);
        assert_eq!(run.paths["rooms"].dominant_element_kind(), Some(ElementKind::Object));
    }

    #[test]
    fn test_reference_expansion_with_cycle_guard() {
        let store = MemoryStore::new()
            .with_collection(
                "agents",
                vec![json!({"_id": "a1", "name": "Ada", "listingRef": {"$oid": "l1"}})],
            );
        let mut cache = CollectionCacheManager::new(&store, CachePolicy::default());
        cache.ensure_collection("agents").unwrap();

        let mut relationships = BTreeMap::new();
        relationships.insert("agentId".to_string(), "agents".to_string());
        relationships.insert("agentId_expanded.listingRef".to_string(), "listings".to_string());
        let sampler = PathSampler::new("listings", 3, &relationships, &cache);

        let doc = document_from_json(&json!({"_id": "l1", "agentId": "5f1d7c2e9b1e8a3d4c5b6a79"})).unwrap();
        let mut run = DiscoveryRun::new();
        sampler.walk_document(&doc, &mut run);
        assert!(!run.paths.contains_key("agentId_expanded"), "unknown id is not expanded");

        let doc = document_from_json(&json!({"_id": "l1", "agentId": {"$oid": "a1"}})).unwrap();
        let mut run = DiscoveryRun::new();
        sampler.walk_document(&doc, &mut run);
        assert_eq!(run.paths["agentId_expanded.name"].source_collection, "agents");
        assert!(run.paths.contains_key("agentId_expanded.listingRef"));
        assert!(
            !run.paths.contains_key("agentId_expanded.listingRef_expanded"),
            "primary collection is never re-entered"
        );
    }
}
