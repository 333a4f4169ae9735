//! Per-path statistics accumulated over the sample
//!
//! A [`DiscoveryRun`] is owned by one worker and folded over a slice of
//! documents; runs from different workers are combined with
//! [`DiscoveryRun::merge`], which is associative and commutative so the
//! result never depends on how documents were split between workers.

use crate::config::{DataType, ElementKind};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Distinct values kept per path; the smallest values win once over the cap
pub const DISTINCT_VALUE_CAP: usize = 1_000;

/// Longest value text kept for distinct tracking and samples
pub const MAX_VALUE_TEXT: usize = 200;

/// Shape of an observed array
#[derive(Debug, Clone, Default)]
pub struct ArrayShape {
    pub len: usize,
    pub element_kinds: Vec<ElementKind>,
}

/// One `(path, value)` event emitted by the sampler
#[derive(Debug, Clone)]
pub struct Observation<'a> {
    pub path: &'a str,
    pub source_collection: &'a str,
    /// Classified kind; `None` for null, blank or empty values
    pub kind: Option<DataType>,
    /// Texts counted as distinct values (array elements count individually)
    pub texts: Vec<String>,
    pub array: Option<ArrayShape>,
}

/// Running state for one path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathStats {
    pub source_collection: String,
    /// Documents where the path carried at least one non-empty value
    pub occurrences: u64,
    /// Documents where the path appeared with only empty values
    pub null_count: u64,
    /// Non-empty observations per classified kind
    pub kind_counts: BTreeMap<DataType, u64>,
    pub distinct: BTreeSet<String>,
    pub distinct_capped: bool,
    pub array_count: u64,
    pub array_length_sum: u64,
    pub min_array_length: Option<u64>,
    pub max_array_length: u64,
    pub element_kinds: BTreeMap<ElementKind, u64>,
}

impl PathStats {
    fn add(&mut self, observation: &Observation<'_>) {
        if self.source_collection.is_empty() {
            self.source_collection = observation.source_collection.to_string();
        }
        if let Some(kind) = observation.kind {
            *self.kind_counts.entry(kind).or_insert(0) += 1;
        }
        for text in &observation.texts {
            self.insert_distinct(text);
        }
        if let Some(shape) = &observation.array {
            let len = shape.len as u64;
            self.array_count += 1;
            self.array_length_sum += len;
            self.max_array_length = self.max_array_length.max(len);
            self.min_array_length = Some(self.min_array_length.map_or(len, |min| min.min(len)));
            for kind in &shape.element_kinds {
                *self.element_kinds.entry(*kind).or_insert(0) += 1;
            }
        }
    }

    fn insert_distinct(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let text = truncate(text);
        if self.distinct.len() >= DISTINCT_VALUE_CAP {
            match self.distinct.last() {
                Some(largest) if text.as_str() >= largest.as_str() => {
                    if !self.distinct.contains(&text) {
                        self.distinct_capped = true;
                    }
                    return;
                }
                _ => {}
            }
        }
        self.distinct.insert(text);
        self.trim_distinct();
    }

    fn trim_distinct(&mut self) {
        while self.distinct.len() > DISTINCT_VALUE_CAP {
            self.distinct.pop_last();
            self.distinct_capped = true;
        }
    }

    fn merge(&mut self, other: PathStats) {
        if self.source_collection.is_empty() {
            self.source_collection = other.source_collection;
        }
        self.occurrences += other.occurrences;
        self.null_count += other.null_count;
        for (kind, count) in other.kind_counts {
            *self.kind_counts.entry(kind).or_insert(0) += count;
        }
        self.distinct.extend(other.distinct);
        self.distinct_capped |= other.distinct_capped;
        self.trim_distinct();
        self.array_count += other.array_count;
        self.array_length_sum += other.array_length_sum;
        self.max_array_length = self.max_array_length.max(other.max_array_length);
        self.min_array_length = match (self.min_array_length, other.min_array_length) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        for (kind, count) in other.element_kinds {
            *self.element_kinds.entry(kind).or_insert(0) += count;
        }
    }

    /// Most frequent kind, ties going to the more specific kind
    pub fn dominant_kind(&self) -> Option<DataType> {
        self.kind_counts
            .iter()
            .max_by(|(a, a_count), (b, b_count)| {
                a_count
                    .cmp(b_count)
                    .then_with(|| a.specificity().cmp(&b.specificity()))
            })
            .map(|(kind, _)| *kind)
    }

    /// Most frequent element kind; references beat objects beat scalars on ties
    pub fn dominant_element_kind(&self) -> Option<ElementKind> {
        self.element_kinds
            .iter()
            .max_by(|(a, a_count), (b, b_count)| a_count.cmp(b_count).then_with(|| a.cmp(b)))
            .map(|(kind, _)| *kind)
    }

    /// Every non-empty observation was identifier-shaped
    pub fn all_identifiers(&self) -> bool {
        let total: u64 = self.kind_counts.values().sum();
        total > 0 && self.kind_counts.get(&DataType::Reference) == Some(&total)
    }

    pub fn avg_array_length(&self) -> Option<f64> {
        (self.array_count > 0).then(|| self.array_length_sum as f64 / self.array_count as f64)
    }

    /// Non-empty occurrences relative to `documents` scanned
    pub fn coverage(&self, documents: u64) -> f64 {
        if documents == 0 {
            0.0
        } else {
            self.occurrences as f64 / documents as f64
        }
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_VALUE_TEXT {
        return text.to_string();
    }
    let mut end = MAX_VALUE_TEXT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Statistics for every path seen in one discovery pass
#[derive(Debug, Clone, Default)]
pub struct DiscoveryRun {
    pub documents: u64,
    pub paths: BTreeMap<String, PathStats>,
    /// Paths seen in the document being walked, and whether any value was non-empty
    current: HashMap<String, bool>,
}

impl DiscoveryRun {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation for the current document
    pub fn observe(&mut self, observation: Observation<'_>) {
        let non_empty = observation.kind.is_some();
        let seen = self.current.entry(observation.path.to_string()).or_insert(false);
        *seen |= non_empty;

        self.paths
            .entry(observation.path.to_string())
            .or_default()
            .add(&observation);
    }

    /// Close the current document; each path counts at most once per document
    pub fn finish_document(&mut self) {
        self.documents += 1;
        for (path, non_empty) in self.current.drain() {
            let stats = self.paths.entry(path).or_default();
            if non_empty {
                stats.occurrences += 1;
            } else {
                stats.null_count += 1;
            }
        }
    }

    /// Combine two finished runs
    pub fn merge(mut self, other: DiscoveryRun) -> DiscoveryRun {
        self.documents += other.documents;
        for (path, stats) in other.paths {
            match self.paths.get_mut(&path) {
                Some(existing) => existing.merge(stats),
                None => {
                    self.paths.insert(path, stats);
                }
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar<'a>(path: &'a str, kind: Option<DataType>, text: &str) -> Observation<'a> {
        Observation {
            path,
            source_collection: "listings",
            kind,
            texts: if text.is_empty() { vec![] } else { vec![text.to_string()] },
            array: None,
        }
    }

    #[test]
    fn test_occurrences_counted_once_per_document() {
        let mut run = DiscoveryRun::new();
        run.observe(scalar("items.name", Some(DataType::String), "a"));
        run.observe(scalar("items.name", Some(DataType::String), "b"));
        run.finish_document();
        run.observe(scalar("items.name", None, ""));
        run.finish_document();

        let stats = &run.paths["items.name"];
        assert_eq!(run.documents, 2);
        assert_eq!(stats.occurrences, 1);
        assert_eq!(stats.null_count, 1);
        assert_eq!(stats.distinct.len(), 2);
        assert_eq!(stats.coverage(run.documents), 0.5);
    }

    #[test]
    fn test_dominant_kind_tie_prefers_specific() {
        let mut stats = PathStats::default();
        stats.kind_counts.insert(DataType::String, 2);
        stats.kind_counts.insert(DataType::Reference, 2);
        assert_eq!(stats.dominant_kind(), Some(DataType::Reference));

        stats.kind_counts.insert(DataType::String, 3);
        assert_eq!(stats.dominant_kind(), Some(DataType::String));

        let mut numbers = PathStats::default();
        numbers.kind_counts.insert(DataType::String, 1);
        numbers.kind_counts.insert(DataType::Number, 1);
        assert_eq!(numbers.dominant_kind(), Some(DataType::Number));
    }

    #[test]
    fn test_merge_is_order_independent() {
        let mut left = DiscoveryRun::new();
        left.observe(scalar("price", Some(DataType::Number), "10"));
        left.finish_document();
        let mut right = DiscoveryRun::new();
        right.observe(scalar("price", Some(DataType::Number), "20"));
        right.observe(scalar("status", None, ""));
        right.finish_document();

        let a = left.clone().merge(right.clone());
        let b = right.merge(left);
        assert_eq!(a.documents, b.documents);
        assert_eq!(a.paths, b.paths);
    }

    #[test]
    fn test_distinct_cap_keeps_smallest() {
        let mut stats = PathStats::default();
        for i in 0..(DISTINCT_VALUE_CAP + 10) {
            stats.insert_distinct(&format!("{:05}", i));
        }
        assert_eq!(stats.distinct.len(), DISTINCT_VALUE_CAP);
        assert!(stats.distinct_capped);
        assert_eq!(stats.distinct.first().map(String::as_str), Some("00000"));
        assert!(!stats.distinct.contains(&format!("{:05}", DISTINCT_VALUE_CAP)));
    }

    #[test]
    fn test_array_shape_stats() {
        let mut run = DiscoveryRun::new();
        for len in [1usize, 3] {
            run.observe(Observation {
                path: "tags",
                source_collection: "listings",
                kind: Some(DataType::Array),
                texts: vec![],
                array: Some(ArrayShape {
                    len,
                    element_kinds: vec![ElementKind::Scalar; len],
                }),
            });
            run.finish_document();
        }
        let stats = &run.paths["tags"];
        assert_eq!(stats.avg_array_length(), Some(2.0));
        assert_eq!(stats.min_array_length, Some(1));
        assert_eq!(stats.max_array_length, 3);
        assert_eq!(stats.dominant_element_kind(), Some(ElementKind::Scalar));
    }
}
