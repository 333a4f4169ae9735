//! Per-column fill report for a finished export
//!
//! Every written row is recorded in output order. At the end each column is
//! classified so that always-empty, constant, and sparse columns can be
//! dropped from the configuration before the next run.

use super::plan::ExportPlan;
use crate::error::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Columns at least this empty are sparse
pub const SPARSE_EMPTY_PERCENT: f64 = 95.0;

/// Distinct values tracked per column
pub const MAX_DISTINCT_VALUES: usize = 1000;

/// Example values kept per column
pub const MAX_SAMPLE_VALUES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnCategory {
    AlwaysEmpty,
    SingleValue,
    Sparse,
    Meaningful,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSummary {
    pub index: usize,
    pub header: String,
    pub path: String,
    pub empty_count: u64,
    pub non_empty_count: u64,
    pub distinct_values: usize,
    /// More distinct values were seen than were tracked
    pub distinct_capped: bool,
    pub empty_percentage: f64,
    pub sample_values: Vec<String>,
    pub category: ColumnCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReport {
    pub collection: String,
    pub rows: u64,
    pub always_empty: usize,
    pub single_value: usize,
    pub sparse: usize,
    pub meaningful: usize,
    pub columns: Vec<ColumnSummary>,
}

impl ExportReport {
    /// Write as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// `listings_export.csv` reports to `listings_export_summary.json`
pub fn report_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!("{}_summary.json", stem))
}

#[derive(Debug)]
struct ColumnTally {
    header: String,
    path: String,
    empty: u64,
    non_empty: u64,
    distinct: HashSet<String>,
    capped: bool,
    samples: Vec<String>,
}

impl ColumnTally {
    fn record(&mut self, cell: &str) {
        if cell.is_empty() {
            self.empty += 1;
            return;
        }
        self.non_empty += 1;
        if self.distinct.contains(cell) {
            return;
        }
        if self.distinct.len() >= MAX_DISTINCT_VALUES {
            self.capped = true;
            return;
        }
        self.distinct.insert(cell.to_string());
        if self.samples.len() < MAX_SAMPLE_VALUES {
            self.samples.push(cell.to_string());
        }
    }

    fn summarize(self, index: usize, rows: u64) -> ColumnSummary {
        let empty_percentage = if rows == 0 {
            0.0
        } else {
            (self.empty as f64 * 10000.0 / rows as f64).round() / 100.0
        };
        let category = if self.non_empty == 0 {
            ColumnCategory::AlwaysEmpty
        } else if self.distinct.len() == 1 {
            ColumnCategory::SingleValue
        } else if empty_percentage >= SPARSE_EMPTY_PERCENT {
            ColumnCategory::Sparse
        } else {
            ColumnCategory::Meaningful
        };
        ColumnSummary {
            index,
            header: self.header,
            path: self.path,
            empty_count: self.empty,
            non_empty_count: self.non_empty,
            distinct_values: self.distinct.len(),
            distinct_capped: self.capped,
            empty_percentage,
            sample_values: self.samples,
            category,
        }
    }
}

/// Accumulates fill statistics for every column of a plan
#[derive(Debug)]
pub struct ColumnStatsCollector {
    rows: u64,
    columns: Vec<ColumnTally>,
}

impl ColumnStatsCollector {
    pub fn new(plan: &ExportPlan) -> Self {
        let columns = plan
            .columns
            .iter()
            .map(|column| ColumnTally {
                header: column.header.clone(),
                path: column.path.clone(),
                empty: 0,
                non_empty: 0,
                distinct: HashSet::new(),
                capped: false,
                samples: Vec::new(),
            })
            .collect();
        ColumnStatsCollector { rows: 0, columns }
    }

    pub fn record_rows(&mut self, rows: &[Vec<String>]) {
        for row in rows {
            self.rows += 1;
            for (tally, cell) in self.columns.iter_mut().zip(row) {
                tally.record(cell);
            }
        }
    }

    pub fn finish(self, collection: &str) -> ExportReport {
        let rows = self.rows;
        let columns: Vec<ColumnSummary> = self
            .columns
            .into_iter()
            .enumerate()
            .map(|(index, tally)| tally.summarize(index, rows))
            .collect();
        let count = |category: ColumnCategory| columns.iter().filter(|column| column.category == category).count();
        ExportReport {
            collection: collection.to_string(),
            rows,
            always_empty: count(ColumnCategory::AlwaysEmpty),
            single_value: count(ColumnCategory::SingleValue),
            sparse: count(ColumnCategory::Sparse),
            meaningful: count(ColumnCategory::Meaningful),
            columns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataType, DiscoveryConfig, DiscoveryParameters, FieldDescriptor};

    fn plan(paths: &[&str]) -> ExportPlan {
        let mut config = DiscoveryConfig::new("items", DiscoveryParameters::default());
        config.fields = paths
            .iter()
            .map(|path| FieldDescriptor::new(*path, DataType::String, "items"))
            .collect();
        ExportPlan::compile(&config).unwrap()
    }

    #[test]
    fn test_column_categories() {
        let mut collector = ColumnStatsCollector::new(&plan(&["blank", "kind", "note", "serial"]));
        let rows: Vec<Vec<String>> = (0..40)
            .map(|i| {
                let note = if i < 2 { format!("n{}", i) } else { String::new() };
                vec![String::new(), "same".to_string(), note, i.to_string()]
            })
            .collect();
        collector.record_rows(&rows[..15]);
        collector.record_rows(&rows[15..]);
        let report = collector.finish("items");

        assert_eq!(report.rows, 40);
        let categories: Vec<ColumnCategory> = report.columns.iter().map(|column| column.category).collect();
        assert_eq!(
            categories,
            vec![
                ColumnCategory::AlwaysEmpty,
                ColumnCategory::SingleValue,
                ColumnCategory::Sparse,
                ColumnCategory::Meaningful,
            ]
        );
        assert_eq!((report.always_empty, report.single_value, report.sparse, report.meaningful), (1, 1, 1, 1));

        let note = &report.columns[2];
        assert_eq!(note.header, "Note");
        assert_eq!(note.path, "note");
        assert_eq!((note.empty_count, note.non_empty_count), (38, 2));
        assert_eq!(note.empty_percentage, 95.0);

        let serial = &report.columns[3];
        assert_eq!(serial.distinct_values, 40);
        assert_eq!(serial.sample_values, vec!["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"]);
    }

    #[test]
    fn test_distinct_values_are_capped() {
        let mut collector = ColumnStatsCollector::new(&plan(&["serial"]));
        let rows: Vec<Vec<String>> = (0..1005).map(|i| vec![i.to_string()]).collect();
        collector.record_rows(&rows);
        let column = &collector.finish("items").columns[0];
        assert_eq!(column.distinct_values, MAX_DISTINCT_VALUES);
        assert!(column.distinct_capped);
        assert_eq!(column.non_empty_count, 1005);
    }

    #[test]
    fn test_report_path() {
        assert_eq!(
            report_path(Path::new("out/listings_export.csv")),
            PathBuf::from("out/listings_export_summary.json")
        );
    }
}
