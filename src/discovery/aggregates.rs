//! Statistics descriptors for arrays referencing transaction-like collections
//!
//! The referenced collection is profiled from a small sample. Numeric and
//! date fields filled often enough become aggregation candidates, and the
//! generated `<array>[stats].*` descriptors aggregate over the target
//! documents pointing back at the exported document. They start disabled.

use super::relationships::naming_convention;
use crate::config::{Aggregation, DataType, ExtractionMode, FieldDescriptor, StatisticsSpec};
use crate::error::Result;
use crate::naming;
use crate::store::DocumentStore;
use crate::value::{format_number, Document, FieldValue};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Documents read when profiling a target collection
pub const PROFILE_SAMPLE_SIZE: u64 = 100;

/// Smaller collections are not worth aggregating over
pub const MIN_PROFILE_DOCUMENTS: u64 = 100;

/// Generated statistics descriptors per array
pub const MAX_STATISTICS_FIELDS: usize = 10;

const MIN_FILL_RATIO: f64 = 0.1;
const MIN_DISTINCT_NUMBERS: usize = 10;
const MAX_PROFILE_DEPTH: usize = 3;

const TRANSACTION_KEYWORDS: [&str; 8] = [
    "transaction", "order", "sale", "purchase", "payment", "invoice", "deal", "contract",
];

const MONEY_KEYWORDS: [&str; 14] = [
    "price", "amount", "cost", "value", "total", "sum", "fee", "rate", "commission", "volume",
    "revenue", "profit", "margin", "discount",
];

const QUANTITY_KEYWORDS: [&str; 4] = ["quantity", "count", "number", "qty"];

const DURATION_KEYWORDS: [&str; 7] = ["days", "hours", "minutes", "duration", "period", "time_on", "elapsed"];

const MAIN_DATE_KEYWORDS: [&str; 4] = ["closing", "completed", "transaction", "created"];

fn mentions(path: &str, keywords: &[&str]) -> bool {
    let lower = path.to_lowercase();
    keywords.iter().any(|keyword| lower.contains(keyword))
}

/// Numeric field of a profiled collection
#[derive(Debug, Clone, PartialEq)]
pub struct NumericField {
    pub path: String,
    pub distinct: usize,
    pub min: f64,
    pub max: f64,
}

impl NumericField {
    fn is_money(&self) -> bool {
        mentions(&self.path, &MONEY_KEYWORDS)
    }

    fn is_quantity(&self) -> bool {
        mentions(&self.path, &QUANTITY_KEYWORDS)
    }

    fn summable(&self) -> bool {
        self.is_money() || self.is_quantity()
    }

    fn averageable(&self) -> bool {
        self.summable() || mentions(&self.path, &DURATION_KEYWORDS)
    }

    fn has_range(&self) -> bool {
        self.max > self.min && self.distinct > MIN_DISTINCT_NUMBERS
    }
}

#[derive(Debug, Default)]
struct Tally {
    nulls: u64,
    numbers: Vec<f64>,
    distinct: BTreeSet<String>,
    dates: u64,
}

impl Tally {
    fn fill_ratio(&self) -> f64 {
        let filled = self.numbers.len() as u64 + self.dates;
        let seen = filled + self.nulls;
        if seen == 0 {
            0.0
        } else {
            filled as f64 / seen as f64
        }
    }
}

/// Aggregation candidates found in a sample of one collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetProfile {
    pub collection: String,
    pub numeric: Vec<NumericField>,
    pub dates: Vec<String>,
    /// Top-level keys seen in the sample
    pub keys: BTreeSet<String>,
}

impl TargetProfile {
    /// Profile `collection`, or `None` when it is too small to aggregate over
    pub fn sample(store: &dyn DocumentStore, collection: &str) -> Result<Option<Self>> {
        let count = store.estimated_count(collection)?;
        if count < MIN_PROFILE_DOCUMENTS {
            debug!("Not profiling {}: {} documents", collection, count);
            return Ok(None);
        }
        let mut documents = Vec::new();
        for doc in store.scan(collection, 0, Some(PROFILE_SAMPLE_SIZE))? {
            documents.push(doc?);
        }
        Ok(Some(Self::from_documents(collection, &documents)))
    }

    pub fn from_documents(collection: &str, documents: &[Document]) -> Self {
        let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();
        let mut keys = BTreeSet::new();
        for doc in documents {
            keys.extend(doc.keys().filter(|key| !key.starts_with('_')).cloned());
            tally_document(doc, "", 1, &mut tallies);
        }

        let mut profile = TargetProfile {
            collection: collection.to_string(),
            keys,
            ..Default::default()
        };
        for (path, tally) in tallies {
            if tally.fill_ratio() < MIN_FILL_RATIO {
                continue;
            }
            if !tally.numbers.is_empty() && tally.distinct.len() >= MIN_DISTINCT_NUMBERS {
                let min = tally.numbers.iter().copied().fold(f64::INFINITY, f64::min);
                let max = tally.numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                profile.numeric.push(NumericField {
                    path: path.clone(),
                    distinct: tally.distinct.len(),
                    min,
                    max,
                });
            }
            if tally.dates > 0 {
                profile.dates.push(path);
            }
        }
        profile
    }

    /// At least one numeric and one date field, plus money or quantity
    /// fields or a transaction-like collection name
    pub fn is_transaction_like(&self) -> bool {
        if self.numeric.is_empty() || self.dates.is_empty() {
            return false;
        }
        mentions(&self.collection, &TRANSACTION_KEYWORDS)
            || self.numeric.iter().any(|field| field.is_money() || field.is_quantity())
    }

    /// Key of the profiled documents pointing back at `primary`
    ///
    /// Falls back to the singular collection name when no sampled key
    /// names it.
    pub fn back_reference(&self, primary: &str) -> String {
        let primary_names = [primary.to_string()];
        self.keys
            .iter()
            .find(|key| naming_convention(key, &primary_names, &|_| false).is_some())
            .cloned()
            .unwrap_or_else(|| primary.strip_suffix('s').unwrap_or(primary).to_string())
    }
}

fn tally_document(doc: &Document, prefix: &str, depth: usize, tallies: &mut BTreeMap<String, Tally>) {
    for (key, value) in doc {
        if key.starts_with('_') {
            continue;
        }
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            FieldValue::Null => {
                tallies.entry(path).or_default().nulls += 1;
            }
            FieldValue::Number(n) => {
                let tally = tallies.entry(path).or_default();
                tally.numbers.push(*n);
                tally.distinct.insert(format_number(*n));
            }
            FieldValue::Date(_) => {
                tallies.entry(path).or_default().dates += 1;
            }
            FieldValue::Object(inner) if depth < MAX_PROFILE_DEPTH => {
                tally_document(inner, &path, depth + 1, tallies);
            }
            _ => {}
        }
    }
}

/// Column-safe name of a target field: `terms.price` becomes `terms_price`
fn sanitize(path: &str) -> String {
    path.replace('.', "_").to_lowercase()
}

struct StatisticsTemplate<'a> {
    array: &'a FieldDescriptor,
    target: &'a str,
    match_field: String,
}

impl StatisticsTemplate<'_> {
    fn field(
        &self,
        name: &str,
        business_name: String,
        data_type: DataType,
        aggregation: Aggregation,
        target_field: Option<&str>,
    ) -> FieldDescriptor {
        let mut field = FieldDescriptor::new(
            format!("{}[stats].{}", self.array.path, name),
            data_type,
            self.array.source_collection.as_str(),
        );
        field.business_name = business_name;
        field.include = false;
        field.extraction_mode = ExtractionMode::Statistics;
        field.source_field = Some(self.array.path.clone());
        field.statistics_spec = Some(StatisticsSpec {
            target_collection: self.target.to_string(),
            aggregation,
            target_field: target_field.map(str::to_string),
            match_field: self.match_field.clone(),
            local_field: "_id".to_string(),
            date_filter: None,
            group_by: None,
        });
        field
    }
}

/// Disabled `[stats]` descriptors for `array`, which references the profiled
/// collection from documents of `primary`
pub fn statistics_fields(array: &FieldDescriptor, primary: &str, profile: &TargetProfile) -> Vec<FieldDescriptor> {
    let template = StatisticsTemplate {
        array,
        target: &profile.collection,
        match_field: profile.back_reference(primary),
    };
    let array_name = naming::business_name(&array.path);

    let mut fields = vec![template.field(
        "count",
        format!("{} Count", array_name),
        DataType::Number,
        Aggregation::Count,
        None,
    )];

    for numeric in &profile.numeric {
        let label = naming::business_name(&numeric.path);
        let column = sanitize(&numeric.path);
        let path = Some(numeric.path.as_str());
        if numeric.summable() {
            fields.push(template.field(
                &format!("sum_{}", column),
                format!("Total {}", label),
                DataType::Number,
                Aggregation::Sum,
                path,
            ));
        }
        if numeric.averageable() {
            fields.push(template.field(
                &format!("avg_{}", column),
                format!("Average {}", label),
                DataType::Number,
                Aggregation::Avg,
                path,
            ));
        }
        if numeric.has_range() {
            fields.push(template.field(
                &format!("min_{}", column),
                format!("Minimum {}", label),
                DataType::Number,
                Aggregation::Min,
                path,
            ));
            fields.push(template.field(
                &format!("max_{}", column),
                format!("Maximum {}", label),
                DataType::Number,
                Aggregation::Max,
                path,
            ));
        }
    }

    for date in profile.dates.iter().filter(|date| mentions(date, &MAIN_DATE_KEYWORDS)) {
        let label = naming::business_name(date);
        let column = sanitize(date);
        fields.push(template.field(
            &format!("most_recent_{}", column),
            format!("Most Recent {}", label),
            DataType::Date,
            Aggregation::Max,
            Some(date),
        ));
        fields.push(template.field(
            &format!("oldest_{}", column),
            format!("Oldest {}", label),
            DataType::Date,
            Aggregation::Min,
            Some(date),
        ));
    }

    fields.truncate(MAX_STATISTICS_FIELDS);
    fields
}
