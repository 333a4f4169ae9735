//! Field descriptors: one entry per discovered dotted path
//!
//! Descriptors form a tree through `objectFields`. Every enum that the
//! persisted JSON carries as a string is a closed Rust enum here, with serde
//! aliases for the older spellings still found in hand-written files.

use crate::naming;
use serde::{Deserialize, Serialize};

/// Kind of value stored at a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    String,
    #[serde(alias = "integer", alias = "int", alias = "long", alias = "double", alias = "decimal")]
    Number,
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "datetime", alias = "date-time")]
    Date,
    #[serde(alias = "objectId", alias = "objectid", alias = "ref")]
    Reference,
    Object,
    Array,
}

impl DataType {
    /// Tie-break rank when two kinds are observed equally often
    pub fn specificity(self) -> u8 {
        match self {
            DataType::Reference => 6,
            DataType::Date => 5,
            DataType::Number => 4,
            DataType::Boolean => 3,
            DataType::Array => 2,
            DataType::Object => 1,
            DataType::String => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Number => "number",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Reference => "reference",
            DataType::Object => "object",
            DataType::Array => "array",
        }
    }
}

/// How a descriptor's row value is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    #[default]
    None,
    Primary,
    Count,
    Statistics,
}

impl ExtractionMode {
    pub fn is_none(&self) -> bool {
        matches!(self, ExtractionMode::None)
    }
}

/// Array cell rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// First element only, source order
    First,
    /// All elements joined with the delimiter after sorting
    #[default]
    #[serde(alias = "comma_separated", alias = "joined")]
    Delimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    #[serde(alias = "lexical", alias = "alphabetical")]
    Alphanumeric,
    None,
    Numeric,
}

/// Kind of the elements held by an array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    #[default]
    #[serde(alias = "primitive", alias = "string", alias = "strings")]
    Scalar,
    #[serde(alias = "objects")]
    Object,
    #[serde(alias = "objectId", alias = "objectIds", alias = "references")]
    Reference,
}

fn default_delimiter() -> String {
    ", ".to_string()
}

/// Rendering rules for array-typed descriptors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayConfig {
    /// Field read from each element (objects, or resolved references)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_field: Option<String>,
    #[serde(default)]
    pub display_mode: DisplayMode,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default, alias = "objectType")]
    pub element_kind: ElementKind,
    /// Field inside object elements holding a reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_collection: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_fields: Vec<String>,
}

impl Default for ArrayConfig {
    fn default() -> Self {
        ArrayConfig {
            extract_field: None,
            display_mode: DisplayMode::default(),
            sort_order: SortOrder::default(),
            delimiter: default_delimiter(),
            element_kind: ElementKind::default(),
            reference_field: None,
            reference_collection: None,
            available_fields: Vec::new(),
        }
    }
}

/// Sample statistics recorded at discovery time
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldStatistics {
    pub distinct_non_null_values: u64,
    pub null_count: u64,
    pub total_occurrences: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sample_values: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_array_length: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_array_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_array_length: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Count,
    Sum,
    #[serde(alias = "average")]
    Avg,
    Min,
    Max,
    Median,
}

/// Relative date windows, evaluated against the export run time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamedRange {
    #[serde(rename = "last_7_days")]
    Last7Days,
    #[serde(rename = "last_30_days")]
    Last30Days,
    #[serde(rename = "last_90_days")]
    Last90Days,
    #[serde(rename = "last_month")]
    LastMonth,
    #[serde(rename = "last_year")]
    LastYear,
    #[serde(rename = "year_to_date")]
    YearToDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateFilter {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<NamedRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

fn default_local_field() -> String {
    "_id".to_string()
}

/// Aggregation over documents of another collection that point back at the
/// current document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSpec {
    pub target_collection: String,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_field: Option<String>,
    /// Field in the target collection holding the current document's key
    pub match_field: String,
    /// Field of the current document used as the key
    #[serde(default = "default_local_field")]
    pub local_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_filter: Option<DateFilter>,
    /// `year`, `month`, or a field path in the target documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
}

/// Relationship visible only from the referencing side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseLink {
    pub collection: String,
    pub foreign_field: String,
    #[serde(default = "default_local_field")]
    pub local_field: String,
}

fn default_true() -> bool {
    true
}

/// One discovered (or hand-added) path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    #[serde(alias = "fieldPath")]
    pub path: String,
    #[serde(default)]
    pub business_name: String,
    #[serde(default)]
    pub source_collection: String,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default = "default_true")]
    pub include: bool,
    #[serde(default)]
    pub statistics: FieldStatistics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_config: Option<ArrayConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub object_fields: Vec<FieldDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_target: Option<String>,
    #[serde(default, skip_serializing_if = "ExtractionMode::is_none")]
    pub extraction_mode: ExtractionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_index: Option<usize>,
    #[serde(default, alias = "statisticsConfig", skip_serializing_if = "Option::is_none")]
    pub statistics_spec: Option<StatisticsSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_relationship: Option<ReverseLink>,
}

impl FieldDescriptor {
    /// New included descriptor with a derived business name
    pub fn new(path: impl Into<String>, data_type: DataType, source_collection: impl Into<String>) -> Self {
        let path = path.into();
        FieldDescriptor {
            business_name: naming::business_name(&path),
            path,
            source_collection: source_collection.into(),
            data_type,
            include: true,
            statistics: FieldStatistics::default(),
            array_config: None,
            object_fields: Vec::new(),
            relationship_target: None,
            extraction_mode: ExtractionMode::None,
            source_field: None,
            extraction_index: None,
            statistics_spec: None,
            reverse_relationship: None,
        }
    }

    /// Last path segment
    pub fn leaf_name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    /// Object, or array whose elements are objects
    pub fn is_container(&self) -> bool {
        match self.data_type {
            DataType::Object => true,
            DataType::Array => self
                .array_config
                .as_ref()
                .map_or(false, |config| config.element_kind == ElementKind::Object),
            _ => false,
        }
    }

    /// Collections this descriptor needs at export time
    pub fn referenced_collections(&self) -> Vec<&str> {
        let mut names = Vec::new();
        if let Some(target) = &self.relationship_target {
            names.push(target.as_str());
        }
        if let Some(collection) = self
            .array_config
            .as_ref()
            .and_then(|config| config.reference_collection.as_deref())
        {
            names.push(collection);
        }
        if let Some(link) = &self.reverse_relationship {
            names.push(link.collection.as_str());
        }
        if let Some(spec) = &self.statistics_spec {
            names.push(spec.target_collection.as_str());
        }
        names
    }

    /// Fill in business names and source collections left blank in a file
    pub(crate) fn normalize(&mut self, collection: &str) {
        if self.business_name.trim().is_empty() {
            self.business_name = naming::business_name(&self.path);
        }
        if self.source_collection.is_empty() {
            self.source_collection = collection.to_string();
        }
        for child in &mut self.object_fields {
            child.normalize(collection);
        }
    }
}

/// Visit every descriptor depth-first, parents before children
pub fn visit_fields<'a>(fields: &'a [FieldDescriptor], visit: &mut impl FnMut(&'a FieldDescriptor)) {
    for field in fields {
        visit(field);
        visit_fields(&field.object_fields, visit);
    }
}

/// Find a descriptor anywhere in the tree by path
pub fn find_field_mut<'a>(fields: &'a mut [FieldDescriptor], path: &str) -> Option<&'a mut FieldDescriptor> {
    for field in fields.iter_mut() {
        if field.path == path {
            return Some(field);
        }
        if let Some(found) = find_field_mut(&mut field.object_fields, path) {
            return Some(found);
        }
    }
    None
}
