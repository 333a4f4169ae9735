//! Aggregations over referencing documents
//!
//! Matching documents come from the reverse index on
//! `(targetCollection, matchField)`, keyed by the current document's
//! `localField`. They are then narrowed by the date window, optionally
//! grouped, and reduced.

use crate::cache::CollectionCacheManager;
use crate::config::{Aggregation, DateFilter, NamedRange, StatisticsSpec};
use crate::error::{Error, Result};
use crate::formats::{self, StringFormat};
use crate::value::{format_number, lookup, Document, FieldValue, DATE_FORMAT};
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Separator between `key: value` pairs of a grouped result
pub const GROUP_SEPARATOR: &str = "; ";

/// Inclusive time range; an absent bound is open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateWindow {
    /// Window for a filter; named ranges are evaluated against `run_time`
    pub fn from_filter(filter: &DateFilter, run_time: DateTime<Utc>) -> Result<Self> {
        if let Some(range) = filter.range {
            return Ok(named_window(range, run_time));
        }

        let start = filter
            .start_date
            .as_deref()
            .map(|text| parse_bound(text, &filter.field, false))
            .transpose()?;
        let end = filter
            .end_date
            .as_deref()
            .map(|text| parse_bound(text, &filter.field, true))
            .transpose()?;
        Ok(DateWindow { start, end })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at <= end)
    }
}

/// Date-only end bounds cover the whole day
fn parse_bound(text: &str, field: &str, is_end: bool) -> Result<DateTime<Utc>> {
    let parsed = formats::parse_datetime(text)
        .ok_or_else(|| Error::config(field.to_string(), format!("unparseable date `{}`", text)))?;
    if is_end && formats::detect_format(text.trim()) == Some(StringFormat::Date) {
        return Ok(end_of_day(parsed));
    }
    Ok(parsed)
}

fn end_of_day(day_start: DateTime<Utc>) -> DateTime<Utc> {
    day_start + Duration::days(1) - Duration::nanoseconds(1)
}

fn month_start(year: i32, month: u32) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}

/// Relative window ending at (or just before) `run_time`
pub fn named_window(range: NamedRange, run_time: DateTime<Utc>) -> DateWindow {
    let (year, month) = (run_time.year(), run_time.month());
    match range {
        NamedRange::Last7Days => trailing(run_time, 7),
        NamedRange::Last30Days => trailing(run_time, 30),
        NamedRange::Last90Days => trailing(run_time, 90),
        NamedRange::LastMonth => {
            let (prev_year, prev_month) = if month == 1 { (year - 1, 12) } else { (year, month - 1) };
            let start = month_start(prev_year, prev_month);
            let end = month_start(year, month).map(|current| current - Duration::nanoseconds(1));
            DateWindow { start, end }
        }
        NamedRange::LastYear => {
            let start = month_start(year - 1, 1);
            let end = month_start(year, 1).map(|current| current - Duration::nanoseconds(1));
            DateWindow { start, end }
        }
        NamedRange::YearToDate => DateWindow {
            start: month_start(year, 1),
            end: Some(run_time),
        },
    }
}

fn trailing(run_time: DateTime<Utc>, days: i64) -> DateWindow {
    DateWindow {
        start: Some(run_time - Duration::days(days)),
        end: Some(run_time),
    }
}

/// Evaluate one statistics cell for `doc`
pub fn evaluate(
    spec: &StatisticsSpec,
    window: Option<&DateWindow>,
    doc: &Document,
    cache: &CollectionCacheManager<'_>,
) -> String {
    let bucket: &[Arc<Document>] = lookup(doc, &spec.local_field)
        .and_then(FieldValue::key_string)
        .and_then(|key| cache.reverse_bucket(&spec.target_collection, &spec.match_field, &key))
        .unwrap_or(&[]);

    let date_field = spec.date_filter.as_ref().map(|filter| filter.field.as_str());
    let matched: Vec<&Document> = bucket
        .iter()
        .map(Arc::as_ref)
        .filter(|target| match (window, date_field) {
            (Some(window), Some(field)) => date_at(target, field).map_or(false, |at| window.contains(at)),
            _ => true,
        })
        .collect();

    match spec.group_by.as_deref() {
        None => aggregate(spec, &matched),
        Some(group_by) => {
            let mut groups: BTreeMap<String, Vec<&Document>> = BTreeMap::new();
            for target in matched {
                if let Some(key) = group_key(spec, group_by, target) {
                    groups.entry(key).or_default().push(target);
                }
            }
            groups
                .iter()
                .map(|(key, members)| format!("{}: {}", key, aggregate(spec, members)))
                .collect::<Vec<_>>()
                .join(GROUP_SEPARATOR)
        }
    }
}

fn date_at(doc: &Document, field: &str) -> Option<DateTime<Utc>> {
    lookup(doc, field).and_then(FieldValue::as_datetime)
}

/// `year` and `month` bucket on the date filter field (or the target field
/// when there is no filter); anything else is a field path
fn group_key(spec: &StatisticsSpec, group_by: &str, doc: &Document) -> Option<String> {
    let date_field = spec
        .date_filter
        .as_ref()
        .map(|filter| filter.field.as_str())
        .or(spec.target_field.as_deref());
    match group_by {
        "year" => date_at(doc, date_field?).map(|at| at.format("%Y").to_string()),
        "month" => date_at(doc, date_field?).map(|at| at.format("%Y-%m").to_string()),
        path => lookup(doc, path).and_then(FieldValue::key_string),
    }
}

/// Reduce matched documents with the configured aggregation
///
/// Count is the number of matched documents holding the target field (all
/// matched documents when there is none) and never renders empty. The other
/// aggregations render empty when there is nothing to reduce.
pub fn aggregate(spec: &StatisticsSpec, matched: &[&Document]) -> String {
    let field = match (&spec.aggregation, &spec.target_field) {
        (Aggregation::Count, None) => return matched.len().to_string(),
        (Aggregation::Count, Some(field)) => {
            let holding = matched
                .iter()
                .filter(|doc| lookup(doc, field).map_or(false, |value| !value.is_empty()))
                .count();
            return holding.to_string();
        }
        (_, Some(field)) => field,
        (_, None) => return String::new(),
    };

    let values: Vec<&FieldValue> = matched
        .iter()
        .filter_map(|doc| lookup(doc, field))
        .flat_map(|value| match value {
            FieldValue::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![other],
        })
        .filter(|value| !value.is_empty())
        .collect();
    let numbers: Vec<f64> = values.iter().filter_map(|value| value.as_f64()).collect();

    match spec.aggregation {
        Aggregation::Min | Aggregation::Max => extreme(spec.aggregation, &numbers, &values),
        _ if numbers.is_empty() => String::new(),
        Aggregation::Sum => format_number(numbers.iter().sum()),
        Aggregation::Avg => format_number(round2(numbers.iter().sum::<f64>() / numbers.len() as f64)),
        Aggregation::Median => format_number(round2(median(numbers))),
        Aggregation::Count => String::new(),
    }
}

fn round2(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}

fn median(mut numbers: Vec<f64>) -> f64 {
    numbers.sort_by(f64::total_cmp);
    let mid = numbers.len() / 2;
    if numbers.len() % 2 == 0 {
        (numbers[mid - 1] + numbers[mid]) / 2.0
    } else {
        numbers[mid]
    }
}

/// Min/max over numbers, falling back to dates when there are none
fn extreme(aggregation: Aggregation, numbers: &[f64], values: &[&FieldValue]) -> String {
    let want_max = aggregation == Aggregation::Max;
    if !numbers.is_empty() {
        let picked = numbers.iter().copied().reduce(|a, b| {
            if want_max {
                a.max(b)
            } else {
                a.min(b)
            }
        });
        return picked.map(format_number).unwrap_or_default();
    }

    let dates = values.iter().filter_map(|value| value.as_datetime());
    let picked = if want_max { dates.max() } else { dates.min() };
    picked.map(|at| at.format(DATE_FORMAT).to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePolicy;
    use crate::store::MemoryStore;
    use crate::value::document_from_json;
    use serde_json::json;

    fn run_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    fn spec(aggregation: Aggregation, target_field: Option<&str>) -> StatisticsSpec {
        StatisticsSpec {
            target_collection: "sales".to_string(),
            aggregation,
            target_field: target_field.map(str::to_string),
            match_field: "listingId".to_string(),
            local_field: "_id".to_string(),
            date_filter: None,
            group_by: None,
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::new().with_collection(
            "sales",
            vec![
                json!({"_id": "s1", "listingId": "l1", "amount": 100, "closedAt": {"$date": "2024-03-10T00:00:00Z"}}),
                json!({"_id": "s2", "listingId": "l1", "amount": 250, "closedAt": {"$date": "2024-02-20T00:00:00Z"}}),
                json!({"_id": "s3", "listingId": "l1", "amount": 75, "closedAt": {"$date": "2023-11-02T00:00:00Z"}}),
                json!({"_id": "s4", "listingId": "l2", "closedAt": {"$date": "2024-01-05T00:00:00Z"}}),
            ],
        )
    }

    fn listing(id: &str) -> Document {
        document_from_json(&json!({"_id": id})).unwrap()
    }

    #[test]
    fn test_aggregations() {
        let store = store();
        let mut cache = CollectionCacheManager::new(&store, CachePolicy::default());
        cache.ensure_reverse_index("sales", "listingId").unwrap();
        let l1 = listing("l1");

        assert_eq!(evaluate(&spec(Aggregation::Count, None), None, &l1, &cache), "3");
        assert_eq!(evaluate(&spec(Aggregation::Sum, Some("amount")), None, &l1, &cache), "425");
        assert_eq!(evaluate(&spec(Aggregation::Avg, Some("amount")), None, &l1, &cache), "141.67");
        assert_eq!(evaluate(&spec(Aggregation::Median, Some("amount")), None, &l1, &cache), "100");
        assert_eq!(evaluate(&spec(Aggregation::Max, Some("amount")), None, &l1, &cache), "250");
        assert_eq!(
            evaluate(&spec(Aggregation::Min, Some("closedAt")), None, &l1, &cache),
            "2023-11-02 00:00:00"
        );

        let l2 = listing("l2");
        assert_eq!(evaluate(&spec(Aggregation::Count, Some("amount")), None, &l2, &cache), "0");
        assert_eq!(evaluate(&spec(Aggregation::Sum, Some("amount")), None, &l2, &cache), "");
        assert_eq!(evaluate(&spec(Aggregation::Count, None), None, &listing("l9"), &cache), "0");
    }

    #[test]
    fn test_date_window_and_grouping() {
        let store = store();
        let mut cache = CollectionCacheManager::new(&store, CachePolicy::default());
        cache.ensure_reverse_index("sales", "listingId").unwrap();
        let l1 = listing("l1");

        let mut ytd = spec(Aggregation::Sum, Some("amount"));
        let filter = DateFilter {
            field: "closedAt".to_string(),
            range: Some(NamedRange::YearToDate),
            start_date: None,
            end_date: None,
        };
        ytd.date_filter = Some(filter.clone());
        let window = DateWindow::from_filter(&filter, run_time()).unwrap();
        assert_eq!(evaluate(&ytd, Some(&window), &l1, &cache), "350");

        let mut by_month = spec(Aggregation::Count, None);
        by_month.date_filter = Some(DateFilter {
            range: None,
            ..filter
        });
        by_month.group_by = Some("month".to_string());
        assert_eq!(
            evaluate(&by_month, None, &l1, &cache),
            "2023-11: 1; 2024-02: 1; 2024-03: 1"
        );
    }

    #[test]
    fn test_named_windows() {
        let last_month = named_window(NamedRange::LastMonth, run_time());
        assert!(last_month.contains(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()));
        assert!(last_month.contains(Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap()));
        assert!(!last_month.contains(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));

        let jan = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let december = named_window(NamedRange::LastMonth, jan);
        assert_eq!(december.start, Some(Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap()));

        let week = named_window(NamedRange::Last7Days, run_time());
        assert!(week.contains(Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap()));
        assert!(!week.contains(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_explicit_end_date_covers_whole_day() {
        let filter = DateFilter {
            field: "closedAt".to_string(),
            range: None,
            start_date: Some("2024-02-01".to_string()),
            end_date: Some("2024-02-20".to_string()),
        };
        let window = DateWindow::from_filter(&filter, run_time()).unwrap();
        assert!(window.contains(Utc.with_ymd_and_hms(2024, 2, 20, 18, 0, 0).unwrap()));
        assert!(!window.contains(Utc.with_ymd_and_hms(2024, 2, 21, 0, 0, 0).unwrap()));

        let bad = DateFilter {
            start_date: Some("someday".to_string()),
            ..filter
        };
        assert!(matches!(DateWindow::from_filter(&bad, run_time()), Err(Error::Config { .. })));
    }
}
