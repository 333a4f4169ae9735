//! Load-time validation
//!
//! Runs before any document is read so a broken configuration never
//! produces a partial export. Locations look like
//! `fields[2].objectFields[0] (owner.name)`.

use super::field::{DataType, ElementKind, ExtractionMode, FieldDescriptor};
use super::DiscoveryConfig;
use crate::error::{Error, Result};
use crate::formats;
use std::collections::HashSet;

impl DiscoveryConfig {
    /// Check structural invariants of the whole tree
    pub fn validate(&self) -> Result<()> {
        if self.collection.trim().is_empty() {
            return Err(Error::config("collection", "collection name is required"));
        }

        let settings = &self.export_settings;
        if settings.batch_size == 0 {
            return Err(Error::config("exportSettings.batchSize", "must be greater than zero"));
        }
        if !settings.output_format.eq_ignore_ascii_case("csv") {
            return Err(Error::config(
                "exportSettings.outputFormat",
                format!("unsupported output format `{}`", settings.output_format),
            ));
        }
        settings.delimiter_byte()?;
        settings.quote_byte()?;

        let mut seen = HashSet::new();
        for (index, field) in self.fields.iter().enumerate() {
            self.validate_field(field, &format!("fields[{}]", index), &mut seen)?;
        }
        Ok(())
    }

    fn validate_field<'a>(
        &self,
        field: &'a FieldDescriptor,
        location: &str,
        seen: &mut HashSet<&'a str>,
    ) -> Result<()> {
        let here = format!("{} ({})", location, field.path);
        let fail = |message: String| Err(Error::config(here.clone(), message));

        if field.path.trim().is_empty() {
            return Err(Error::config(location, "path is empty"));
        }
        if !seen.insert(field.path.as_str()) {
            return fail(format!("duplicate path `{}`", field.path));
        }

        if field.array_config.is_some() && field.data_type != DataType::Array {
            return fail(format!(
                "arrayConfig is only allowed on arrays, found {}",
                field.data_type.as_str()
            ));
        }
        if !field.object_fields.is_empty() {
            let container = match field.data_type {
                DataType::Object => true,
                DataType::Array => field
                    .array_config
                    .as_ref()
                    .map_or(true, |config| config.element_kind == ElementKind::Object),
                _ => false,
            };
            if !container {
                return fail("objectFields require an object or array-of-object".to_string());
            }
        }

        if let Some(target) = &field.relationship_target {
            if !self.required_collections.contains(target) {
                return fail(format!(
                    "relationshipTarget `{}` is missing from requiredCollections",
                    target
                ));
            }
        }

        match field.extraction_mode {
            ExtractionMode::None => {}
            ExtractionMode::Primary => {
                if field.source_field.is_none() {
                    return fail("primary extraction requires sourceField".to_string());
                }
            }
            ExtractionMode::Count => {
                if field.source_field.is_none() && field.reverse_relationship.is_none() {
                    return fail(
                        "count extraction requires sourceField or reverseRelationship".to_string(),
                    );
                }
            }
            ExtractionMode::Statistics => {
                let Some(spec) = &field.statistics_spec else {
                    return fail("statistics extraction requires statisticsSpec".to_string());
                };
                if spec.target_collection.trim().is_empty() || spec.match_field.trim().is_empty() {
                    return fail("statisticsSpec needs targetCollection and matchField".to_string());
                }
                if let Some(filter) = &spec.date_filter {
                    for bound in [&filter.start_date, &filter.end_date].into_iter().flatten() {
                        if formats::parse_datetime(bound).is_none() {
                            return fail(format!("unparseable date `{}` in dateFilter", bound));
                        }
                    }
                }
            }
        }

        for (index, child) in field.object_fields.iter().enumerate() {
            self.validate_field(child, &format!("{}.objectFields[{}]", location, index), seen)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArrayConfig, DiscoveryParameters};

    fn config_with(fields: Vec<FieldDescriptor>) -> DiscoveryConfig {
        let mut config = DiscoveryConfig::new("listings", DiscoveryParameters::default());
        config.fields = fields;
        config
    }

    fn location_of(err: Error) -> String {
        match err {
            Error::Config { location, .. } => location,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_nested_path() {
        let mut owner = FieldDescriptor::new("owner", DataType::Object, "listings");
        owner
            .object_fields
            .push(FieldDescriptor::new("owner.name", DataType::String, "listings"));
        owner
            .object_fields
            .push(FieldDescriptor::new("owner.name", DataType::String, "listings"));

        let err = config_with(vec![owner]).validate().unwrap_err();
        assert_eq!(location_of(err), "fields[0].objectFields[1] (owner.name)");
    }

    #[test]
    fn test_array_config_on_scalar() {
        let mut status = FieldDescriptor::new("status", DataType::String, "listings");
        status.array_config = Some(ArrayConfig::default());
        assert!(config_with(vec![status]).validate().is_err());
    }

    #[test]
    fn test_relationship_target_must_be_required() {
        let mut agent = FieldDescriptor::new("agentId", DataType::Reference, "listings");
        agent.relationship_target = Some("agents".to_string());
        let mut config = config_with(vec![agent]);
        assert!(config.validate().is_err());

        config.required_collections.insert("agents".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_primary_needs_source_field() {
        let mut primary = FieldDescriptor::new("contacts[primary].email", DataType::String, "listings");
        primary.extraction_mode = ExtractionMode::Primary;
        assert!(config_with(vec![primary.clone()]).validate().is_err());

        primary.source_field = Some("contacts".to_string());
        assert!(config_with(vec![primary]).validate().is_ok());
    }

    #[test]
    fn test_multibyte_delimiter_rejected() {
        let mut config = config_with(vec![]);
        config.export_settings.csv_delimiter = "||".to_string();
        let err = config.validate().unwrap_err();
        assert_eq!(location_of(err), "exportSettings.csvDelimiter");
    }
}
