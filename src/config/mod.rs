//! Field configuration model
//!
//! A [`DiscoveryConfig`] is produced once per collection by discovery,
//! persisted as `<collection>_fields.json`, and afterwards only overlaid by a
//! hand-authored `<collection>_supplemental.json`.

mod field;
mod merge;
mod run;
mod validate;

pub use field::{
    find_field_mut, visit_fields, Aggregation, ArrayConfig, DataType, DateFilter, DisplayMode,
    ElementKind, ExtractionMode, FieldDescriptor, FieldStatistics, NamedRange, ReverseLink,
    SortOrder, StatisticsSpec,
};
pub use run::RunParameters;

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Documents scanned when a collection is too large to read exhaustively
pub const DEFAULT_SAMPLE_SIZE: usize = 10_000;
pub const DEFAULT_EXPANSION_DEPTH: usize = 3;
pub const DEFAULT_BATCH_SIZE: usize = 5_000;

/// Knobs that shaped a discovery run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiscoveryParameters {
    pub sample_size: usize,
    pub expansion_depth: usize,
    pub min_distinct_non_null_values: u64,
    /// Keep protected business identifiers regardless of statistics
    pub include_business_ids: bool,
    /// Minimum fraction of scanned documents with a non-empty value
    pub sparse_field_threshold: f64,
    /// Leaf names treated as business identifiers
    pub business_ids: Vec<String>,
    /// Path segments marking internal bookkeeping fields
    pub infrastructure_segments: Vec<String>,
    /// Explicit path to collection annotations
    pub relationship_hints: BTreeMap<String, String>,
}

impl Default for DiscoveryParameters {
    fn default() -> Self {
        DiscoveryParameters {
            sample_size: DEFAULT_SAMPLE_SIZE,
            expansion_depth: DEFAULT_EXPANSION_DEPTH,
            min_distinct_non_null_values: 2,
            include_business_ids: true,
            sparse_field_threshold: 0.05,
            business_ids: Vec::new(),
            infrastructure_segments: ["__v", "_etl", "_sync", "_class"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            relationship_hints: BTreeMap::new(),
        }
    }
}

/// Output settings consumed by the export engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportSettings {
    pub batch_size: usize,
    pub use_business_names: bool,
    pub output_format: String,
    pub csv_delimiter: String,
    pub csv_quote_char: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        ExportSettings {
            batch_size: DEFAULT_BATCH_SIZE,
            use_business_names: true,
            output_format: "csv".to_string(),
            csv_delimiter: ",".to_string(),
            csv_quote_char: "\"".to_string(),
        }
    }
}

impl ExportSettings {
    /// Delimiter as a single byte; validated on load
    pub fn delimiter_byte(&self) -> Result<u8> {
        single_byte(&self.csv_delimiter, "exportSettings.csvDelimiter")
    }

    pub fn quote_byte(&self) -> Result<u8> {
        single_byte(&self.csv_quote_char, "exportSettings.csvQuoteChar")
    }
}

fn single_byte(value: &str, location: &str) -> Result<u8> {
    match value.as_bytes() {
        [byte] => Ok(*byte),
        _ => Err(Error::config(
            location,
            format!("expected a single-byte character, found {:?}", value),
        )),
    }
}

/// Root of a collection's field configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub discovery_parameters: DiscoveryParameters,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    #[serde(default)]
    pub required_collections: BTreeSet<String>,
    #[serde(default)]
    pub export_settings: ExportSettings,
}

/// `<dir>/<collection>_fields.json`
pub fn fields_file(dir: &Path, collection: &str) -> PathBuf {
    dir.join(format!("{}_fields.json", collection))
}

/// `<dir>/<collection>_supplemental.json`
pub fn supplemental_file(dir: &Path, collection: &str) -> PathBuf {
    dir.join(format!("{}_supplemental.json", collection))
}

impl DiscoveryConfig {
    pub fn new(collection: impl Into<String>, parameters: DiscoveryParameters) -> Self {
        DiscoveryConfig {
            collection: collection.into(),
            discovered_at: None,
            discovery_parameters: parameters,
            fields: Vec::new(),
            required_collections: BTreeSet::new(),
            export_settings: ExportSettings::default(),
        }
    }

    /// Parse a configuration document without validating it
    ///
    /// `origin` names the source in error messages.
    pub fn from_json_str(text: &str, origin: &str) -> Result<Self> {
        let mut config: DiscoveryConfig = serde_json::from_str(text).map_err(|err| {
            Error::config(
                format!("{} (line {}, column {})", origin, err.line(), err.column()),
                err.to_string(),
            )
        })?;
        config.normalize();
        Ok(config)
    }

    /// Pretty-printed JSON; byte-identical for identical configurations
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            Error::config(path.display().to_string(), format!("cannot read file: {}", err))
        })?;
        Self::from_json_str(&text, &path.display().to_string())
    }

    /// Load `<collection>_fields.json`, overlay the supplemental file when
    /// present, and validate the result
    pub fn load_with_overlay(dir: &Path, collection: &str) -> Result<Self> {
        let base_path = fields_file(dir, collection);
        let mut config = Self::read(&base_path)?;
        if config.collection.is_empty() {
            config.collection = collection.to_string();
            config.normalize();
        }

        let overlay_path = supplemental_file(dir, collection);
        if overlay_path.exists() {
            let mut overlay = Self::read(&overlay_path)?;
            if overlay.collection.is_empty() {
                overlay.collection = config.collection.clone();
                overlay.normalize();
            }
            info!(
                "Merging supplemental configuration {} ({} top-level fields)",
                overlay_path.display(),
                overlay.fields.len()
            );
            config.merge(&overlay);
        } else {
            debug!("No supplemental configuration at {}", overlay_path.display());
        }

        config.validate()?;
        Ok(config)
    }

    /// Write as pretty JSON, creating the parent directory
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut text = self.to_json_string()?;
        text.push('\n');
        std::fs::write(path, text)?;
        Ok(())
    }

    fn normalize(&mut self) {
        let collection = self.collection.clone();
        for field in &mut self.fields {
            field.normalize(&collection);
        }
    }

    /// Collections the export must materialize before the primary scan
    pub fn export_collections(&self) -> BTreeSet<String> {
        let mut collections = self.required_collections.clone();
        visit_fields(&self.fields, &mut |field| {
            if field.include {
                collections.extend(field.referenced_collections().into_iter().map(str::to_string));
            }
        });
        collections.remove(&self.collection);
        collections
    }

    /// Count of descriptors in the tree, and how many are included
    pub fn field_counts(&self) -> (usize, usize) {
        let mut total = 0;
        let mut included = 0;
        visit_fields(&self.fields, &mut |field| {
            total += 1;
            if field.include {
                included += 1;
            }
        });
        (total, included)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_keys_take_defaults() {
        let config = DiscoveryConfig::from_json_str(
            &json!({"collection": "listings", "fields": [{"path": "status"}]}).to_string(),
            "inline",
        )
        .unwrap();

        assert_eq!(config.discovery_parameters.sample_size, 10_000);
        assert_eq!(config.discovery_parameters.expansion_depth, 3);
        assert_eq!(config.export_settings.batch_size, 5_000);
        assert_eq!(config.export_settings.csv_delimiter, ",");
        assert_eq!(config.fields[0].business_name, "Status");
        assert_eq!(config.fields[0].source_collection, "listings");
        assert!(config.fields[0].include);
    }

    #[test]
    fn test_malformed_file_reports_position() {
        let err = DiscoveryConfig::from_json_str("{\n  \"fields\": [ {\"dataType\": \"string\"} ]\n}", "listings_fields.json")
            .unwrap_err();
        match err {
            Error::Config { location, message } => {
                assert!(location.starts_with("listings_fields.json (line 2"));
                assert!(message.contains("path"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DiscoveryConfig::new("listings", DiscoveryParameters::default());
        config.fields.push(FieldDescriptor::new("price", DataType::Number, "listings"));

        let path = fields_file(dir.path(), "listings");
        config.save(&path).unwrap();
        let loaded = DiscoveryConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_with_overlay_adds_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = DiscoveryConfig::new("listings", DiscoveryParameters::default());
        base.fields.push(FieldDescriptor::new("price", DataType::Number, "listings"));
        base.save(&fields_file(dir.path(), "listings")).unwrap();

        std::fs::write(
            supplemental_file(dir.path(), "listings"),
            json!({
                "fields": [{
                    "path": "showingCount",
                    "dataType": "number",
                    "extractionMode": "count",
                    "reverseRelationship": {"collection": "showings", "foreignField": "listingId"}
                }]
            })
            .to_string(),
        )
        .unwrap();

        let config = DiscoveryConfig::load_with_overlay(dir.path(), "listings").unwrap();
        assert_eq!(config.fields.len(), 2);
        assert_eq!(config.fields[1].source_collection, "listings");
        assert!(config.required_collections.contains("showings"));
        assert_eq!(
            config.export_collections().into_iter().collect::<Vec<_>>(),
            vec!["showings".to_string()]
        );
    }

    #[test]
    fn test_base_without_collection_takes_file_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            fields_file(dir.path(), "listings"),
            json!({"fields": [{"path": "price", "dataType": "number"}]}).to_string(),
        )
        .unwrap();

        let config = DiscoveryConfig::load_with_overlay(dir.path(), "listings").unwrap();
        assert_eq!(config.collection, "listings");
        assert_eq!(config.fields[0].source_collection, "listings");
        assert_eq!(config.fields[0].business_name, "Price");
    }

    #[test]
    fn test_missing_base_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DiscoveryConfig::load_with_overlay(dir.path(), "nothing").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
