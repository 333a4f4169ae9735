//! Relationship detection
//!
//! A reference-valued path gets its target from, in order: an explicit hint
//! in the discovery parameters, probing a few sampled ids against every other
//! collection, or the naming convention (`ownerAgentId` -> `agents`).

use super::stats::PathStats;
use crate::config::{DataType, ElementKind};
use crate::store::DocumentStore;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Sampled ids probed per candidate path
pub const PROBE_SAMPLE_SIZE: usize = 3;

const KEY_SUFFIXES: [&str; 8] = ["_ids", "ids", "_id", "id", "_refs", "refs", "_ref", "ref"];

/// Whether a path's statistics make it a relationship candidate
pub fn is_candidate(path: &str, stats: &PathStats, infrastructure: &[String]) -> bool {
    let leaf = path.rsplit('.').next().unwrap_or(path);
    if leaf == "_id" || is_infrastructure(path, infrastructure) {
        return false;
    }
    match stats.dominant_kind() {
        Some(DataType::Reference) => true,
        Some(DataType::Array) => stats.dominant_element_kind() == Some(ElementKind::Reference),
        _ => false,
    }
}

/// True when any path segment is a reserved bookkeeping segment
pub fn is_infrastructure(path: &str, infrastructure: &[String]) -> bool {
    path.split('.').any(|segment| {
        let segment = segment.split('[').next().unwrap_or(segment);
        infrastructure.iter().any(|reserved| reserved == segment)
    })
}

/// Finds the target collection of reference paths
pub struct RelationshipDetector<'a> {
    store: &'a dyn DocumentStore,
    collections: &'a [String],
    primary: &'a str,
    hints: &'a BTreeMap<String, String>,
}

impl<'a> RelationshipDetector<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        collections: &'a [String],
        primary: &'a str,
        hints: &'a BTreeMap<String, String>,
    ) -> Self {
        RelationshipDetector {
            store,
            collections,
            primary,
            hints,
        }
    }

    /// Target collection for `path`, if one can be determined
    ///
    /// Self-references (to the primary collection or to the collection the
    /// path was read from) are not relationships.
    pub fn detect(&self, path: &str, stats: &PathStats) -> Option<String> {
        if let Some(target) = self.hints.get(path) {
            debug!("{} -> {} (hint)", path, target);
            return Some(target.clone());
        }

        let excluded = |name: &str| name == self.primary || name == stats.source_collection;

        if let Some(target) = self.probe(path, stats, &excluded) {
            debug!("{} -> {} (probe)", path, target);
            return Some(target);
        }

        let leaf = path.rsplit('.').next().unwrap_or(path);
        let target = naming_convention(leaf, self.collections, &excluded)?;
        debug!("{} -> {} (naming convention)", path, target);
        Some(target)
    }

    fn probe(&self, path: &str, stats: &PathStats, excluded: &dyn Fn(&str) -> bool) -> Option<String> {
        let samples: Vec<&String> = stats.distinct.iter().take(PROBE_SAMPLE_SIZE).collect();
        if samples.is_empty() {
            return None;
        }

        let mut best: Option<(&String, usize)> = None;
        for collection in self.collections {
            if excluded(collection) {
                continue;
            }
            let matches = samples
                .iter()
                .filter(|id| matches!(self.store.find_by_id(collection, id), Ok(Some(_))))
                .count();
            trace!("{}: {}/{} sample ids found in {}", path, matches, samples.len(), collection);
            if matches > 0 && best.map_or(true, |(_, top)| matches > top) {
                best = Some((collection, matches));
            }
        }
        best.map(|(collection, _)| collection.clone())
    }
}

/// Match a key like `ownerAgentId` to a collection like `agents`
///
/// Compares the key without its reference suffix against each collection
/// name and its singular forms; the longest match wins, then name order.
pub fn naming_convention(key: &str, collections: &[String], excluded: &dyn Fn(&str) -> bool) -> Option<String> {
    let base = normalize_key(key);
    if base.is_empty() {
        return None;
    }

    let mut best: Option<(&String, usize)> = None;
    for collection in collections {
        if excluded(collection) {
            continue;
        }
        let name = normalize(collection);
        let forms = [
            Some(name.as_str()),
            name.strip_suffix("es"),
            name.strip_suffix('s'),
        ];
        let matched = forms
            .iter()
            .flatten()
            .filter(|form| form.len() >= 3 && (base == **form || base.ends_with(**form)))
            .map(|form| form.len())
            .max();
        if let Some(len) = matched {
            if best.map_or(true, |(_, top)| len > top) {
                best = Some((collection, len));
            }
        }
    }
    best.map(|(collection, _)| collection.clone())
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

fn normalize_key(key: &str) -> String {
    let lower = key.to_lowercase();
    let stripped = KEY_SUFFIXES
        .iter()
        .find_map(|suffix| lower.strip_suffix(suffix))
        .unwrap_or(&lower);
    normalize(stripped)
}
