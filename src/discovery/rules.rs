//! Descriptor construction and inclusion rules
//!
//! Turns the finished [`DiscoveryRun`] into a descriptor tree. Leaves are
//! judged individually; a container is included iff one of its children is.
//! Derived `[count]`, `[primary]` and `[stats]` descriptors are generated next
//! to their arrays and start disabled.

use super::aggregates::{statistics_fields, TargetProfile};
use super::relationships::{is_infrastructure, PROBE_SAMPLE_SIZE};
use super::sampler::{has_reference_suffix, EXPANDED_SUFFIX};
use super::stats::{DiscoveryRun, PathStats};
use crate::cache::CollectionCacheManager;
use crate::config::{
    ArrayConfig, DataType, DiscoveryParameters, ElementKind, ExtractionMode, FieldDescriptor,
    FieldStatistics,
};
use crate::value::FieldValue;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Sample values kept on each descriptor
pub const SAMPLE_VALUES: usize = 5;

/// Derived primary-element fields generated per array
pub const MAX_PRIMARY_FIELDS: usize = 4;

const DISPLAY_FIELDS: [&str; 9] = [
    "name",
    "fullName",
    "displayName",
    "title",
    "label",
    "description",
    "value",
    "text",
    "date",
];

const USEFUL_KEYWORDS: [&str; 13] = [
    "name", "title", "type", "status", "email", "phone", "date", "amount", "price", "role", "code",
    "number", "description",
];

/// `_id` and other reference-named keys
pub fn is_technical_id(leaf: &str) -> bool {
    leaf == "_id" || has_reference_suffix(leaf)
}

/// Builds the descriptor tree for one primary collection
pub struct FieldBuilder<'a, 's> {
    run: &'a DiscoveryRun,
    params: &'a DiscoveryParameters,
    relationships: &'a BTreeMap<String, String>,
    cache: &'a CollectionCacheManager<'s>,
    profiles: Option<&'a BTreeMap<String, TargetProfile>>,
    children: BTreeMap<&'a str, Vec<&'a str>>,
}

impl<'a, 's> FieldBuilder<'a, 's> {
    pub fn new(
        run: &'a DiscoveryRun,
        params: &'a DiscoveryParameters,
        relationships: &'a BTreeMap<String, String>,
        cache: &'a CollectionCacheManager<'s>,
    ) -> Self {
        let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for path in run.paths.keys() {
            let parent = path.rsplit_once('.').map_or("", |(parent, _)| parent);
            children.entry(parent).or_default().push(path.as_str());
        }
        FieldBuilder {
            run,
            params,
            relationships,
            cache,
            profiles: None,
            children,
        }
    }

    /// Offer `[stats]` aggregations on arrays referencing these collections
    pub fn with_target_profiles(mut self, profiles: &'a BTreeMap<String, TargetProfile>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    /// Top-level descriptors, each level in path order
    pub fn build(&self) -> Vec<FieldDescriptor> {
        self.build_level("")
    }

    fn build_level(&self, parent: &str) -> Vec<FieldDescriptor> {
        let mut fields = Vec::new();
        for path in self.children.get(parent).into_iter().flatten() {
            let Some(stats) = self.run.paths.get(*path) else {
                continue;
            };
            let field = self.build_descriptor(path, stats);
            let derived = self.derived_fields(&field, stats);
            fields.push(field);
            fields.extend(derived);
        }
        fields
    }

    fn build_descriptor(&self, path: &str, stats: &PathStats) -> FieldDescriptor {
        let children = self.build_level(path);

        let mut data_type = stats.dominant_kind().unwrap_or(DataType::String);
        if !children.is_empty() && data_type != DataType::Array {
            data_type = DataType::Object;
        }

        let mut field = FieldDescriptor::new(path, data_type, stats.source_collection.as_str());
        field.statistics = field_statistics(stats);
        field.relationship_target = self.relationships.get(path).cloned();
        if data_type == DataType::Array {
            field.array_config = Some(self.array_config(stats, &children, field.relationship_target.as_deref()));
        }
        field.object_fields = children;

        field.include = if field.object_fields.is_empty() {
            let (include, reason) = self.leaf_decision(path, stats, field.relationship_target.is_some());
            if !include {
                debug!("Excluding {}: {}", path, reason);
            }
            include
        } else {
            !is_infrastructure(path, &self.params.infrastructure_segments)
                && field.object_fields.iter().any(|child| child.include)
        };
        field
    }

    /// Inclusion of a leaf, with the rule that decided it
    fn leaf_decision(&self, path: &str, stats: &PathStats, relationship: bool) -> (bool, &'static str) {
        let leaf = path.rsplit('.').next().unwrap_or(path);
        if is_infrastructure(path, &self.params.infrastructure_segments) {
            return (false, "infrastructure path");
        }
        if relationship {
            return (true, "relationship");
        }
        if self.params.include_business_ids && stats.occurrences > 0 && self.is_business_id(leaf) {
            return (true, "business identifier");
        }
        if is_technical_id(leaf) {
            return (false, "technical identifier");
        }
        if (stats.distinct.len() as u64) < self.params.min_distinct_non_null_values {
            return (false, "too few distinct values");
        }
        if stats.coverage(self.run.documents) < self.params.sparse_field_threshold {
            return (false, "sparse");
        }
        (true, "meets thresholds")
    }

    fn is_business_id(&self, leaf: &str) -> bool {
        self.params
            .business_ids
            .iter()
            .any(|id| id.eq_ignore_ascii_case(leaf))
    }

    fn array_config(&self, stats: &PathStats, children: &[FieldDescriptor], target: Option<&str>) -> ArrayConfig {
        let element_kind = if children.is_empty() {
            stats.dominant_element_kind().unwrap_or_default()
        } else {
            ElementKind::Object
        };

        let mut config = ArrayConfig {
            element_kind,
            ..ArrayConfig::default()
        };
        match element_kind {
            ElementKind::Reference => {
                if let Some(target) = target {
                    config.reference_collection = Some(target.to_string());
                    config.available_fields = self.target_fields(target, stats);
                    config.extract_field = pick_display_field(&config.available_fields);
                }
            }
            ElementKind::Object => {
                let names: Vec<String> = children
                    .iter()
                    .filter(|child| child.extraction_mode.is_none())
                    .map(|child| child.leaf_name().to_string())
                    .filter(|leaf| !leaf.starts_with('_') && !is_technical_id(leaf))
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                config.extract_field = pick_display_field(&names);
                config.available_fields = names;
            }
            ElementKind::Scalar => {}
        }
        config
    }

    /// Scalar fields of sampled documents in the target collection
    fn target_fields(&self, target: &str, stats: &PathStats) -> Vec<String> {
        let mut fields = BTreeSet::new();
        for id in stats.distinct.iter().take(PROBE_SAMPLE_SIZE) {
            let Some(doc) = self.cache.resolve(target, id) else {
                continue;
            };
            for (key, value) in doc.iter() {
                let scalar = matches!(
                    value,
                    FieldValue::String(_) | FieldValue::Number(_) | FieldValue::Boolean(_) | FieldValue::Date(_)
                );
                if scalar && !key.starts_with('_') && !is_technical_id(key) {
                    fields.insert(key.clone());
                }
            }
        }
        fields.into_iter().collect()
    }

    /// Disabled `[count]`, `[primary]` and `[stats]` siblings for an array
    fn derived_fields(&self, field: &FieldDescriptor, stats: &PathStats) -> Vec<FieldDescriptor> {
        let Some(config) = &field.array_config else {
            return Vec::new();
        };
        if stats.max_array_length == 0 {
            return Vec::new();
        }

        let mut derived = Vec::new();
        let mut count = FieldDescriptor::new(
            format!("{}[count]", field.path),
            DataType::Number,
            field.source_collection.as_str(),
        );
        count.include = false;
        count.extraction_mode = ExtractionMode::Count;
        count.source_field = Some(field.path.clone());
        derived.push(count);

        let primary_fields: Vec<(String, DataType)> = match config.element_kind {
            ElementKind::Object => useful_children(&field.object_fields),
            ElementKind::Reference => config
                .extract_field
                .iter()
                .map(|name| (name.clone(), DataType::String))
                .collect(),
            ElementKind::Scalar => Vec::new(),
        };
        for (leaf, data_type) in primary_fields {
            let mut primary = FieldDescriptor::new(
                format!("{}[primary].{}", field.path, leaf),
                data_type,
                field.source_collection.as_str(),
            );
            primary.include = false;
            primary.extraction_mode = ExtractionMode::Primary;
            primary.source_field = Some(field.path.clone());
            primary.extraction_index = Some(0);
            derived.push(primary);
        }

        if config.element_kind == ElementKind::Reference && !field.path.contains(EXPANDED_SUFFIX) {
            let profile = config
                .reference_collection
                .as_deref()
                .and_then(|target| self.profiles?.get(target));
            if let Some(profile) = profile {
                derived.extend(statistics_fields(field, &field.source_collection, profile));
            }
        }
        derived
    }
}

fn field_statistics(stats: &PathStats) -> FieldStatistics {
    FieldStatistics {
        distinct_non_null_values: stats.distinct.len() as u64,
        null_count: stats.null_count,
        total_occurrences: stats.occurrences + stats.null_count,
        sample_values: stats.distinct.iter().take(SAMPLE_VALUES).cloned().collect(),
        avg_array_length: stats.avg_array_length(),
        min_array_length: stats.min_array_length,
        max_array_length: (stats.array_count > 0).then_some(stats.max_array_length),
    }
}

/// Preferred display name among `names`, else the first one
pub fn pick_display_field(names: &[String]) -> Option<String> {
    DISPLAY_FIELDS
        .iter()
        .find_map(|preferred| names.iter().find(|name| name.as_str() == *preferred))
        .or_else(|| names.first())
        .cloned()
}

/// Up to four scalar children worth a primary-element column
fn useful_children(children: &[FieldDescriptor]) -> Vec<(String, DataType)> {
    let mut ranked: Vec<(usize, &FieldDescriptor)> = children
        .iter()
        .filter(|child| child.extraction_mode.is_none() && child.object_fields.is_empty())
        .filter(|child| !matches!(child.data_type, DataType::Array | DataType::Object))
        .filter(|child| child.statistics.total_occurrences > child.statistics.null_count)
        .filter(|child| {
            let leaf = child.leaf_name();
            !leaf.starts_with('_') && !is_technical_id(leaf)
        })
        .map(|child| {
            let leaf = child.leaf_name().to_lowercase();
            let rank = USEFUL_KEYWORDS
                .iter()
                .position(|keyword| leaf.contains(keyword))
                .unwrap_or(USEFUL_KEYWORDS.len());
            (rank, child)
        })
        .collect();
    ranked.sort_by(|(a_rank, a), (b_rank, b)| a_rank.cmp(b_rank).then_with(|| a.path.cmp(&b.path)));
    ranked
        .into_iter()
        .take(MAX_PRIMARY_FIELDS)
        .map(|(_, child)| (child.leaf_name().to_string(), child.data_type))
        .collect()
}
