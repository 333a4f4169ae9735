//! Export plans compiled from a field configuration
//!
//! The plan fixes the column list and one [`ColumnRule`] per column before
//! the first document is read, so row evaluation is a straight match over
//! precomputed rules with no path parsing or configuration lookups.

use crate::config::{
    ArrayConfig, DataType, DiscoveryConfig, ElementKind, ExtractionMode, FieldDescriptor,
    ReverseLink, StatisticsSpec,
};
use crate::discovery::EXPANDED_SUFFIX;
use crate::error::{Error, Result};
use std::collections::HashMap;

/// One hop along a column path
#[derive(Debug, Clone, PartialEq)]
pub enum PathStep {
    /// Read a key of the current object
    Key(String),
    /// Read a reference under `key` and continue inside the resolved document
    Expand { key: String, target: String },
}

/// How a column's cell is computed
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnRule {
    /// Value at a path; multi-valued results render with `array`
    Value {
        steps: Vec<PathStep>,
        array: Option<ArrayConfig>,
    },
    /// One element of a sibling array
    Primary {
        source: Vec<PathStep>,
        index: usize,
        sub_path: Option<String>,
        reference: Option<String>,
    },
    /// Length of an array
    ArrayCount { source: Vec<PathStep> },
    /// Size of the reverse-index bucket keyed by this document
    ReverseCount { link: ReverseLink },
    /// Aggregation over referencing documents
    Statistics { spec: StatisticsSpec },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub header: String,
    pub path: String,
    pub rule: ColumnRule,
}

/// Ordered output columns for one configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ExportPlan {
    pub columns: Vec<Column>,
}

impl ExportPlan {
    /// Compile the included leaves of `config`, depth-first
    pub fn compile(config: &DiscoveryConfig) -> Result<Self> {
        let mut index = HashMap::new();
        crate::config::visit_fields(&config.fields, &mut |field| {
            index.insert(field.path.as_str(), field);
        });

        let compiler = PlanCompiler {
            index,
            use_business_names: config.export_settings.use_business_names,
        };
        let mut columns = Vec::new();
        compiler.compile_level(&config.fields, None, &mut columns)?;
        Ok(ExportPlan { columns })
    }

    pub fn headers(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.header.clone()).collect()
    }
}

struct PlanCompiler<'a> {
    index: HashMap<&'a str, &'a FieldDescriptor>,
    use_business_names: bool,
}

impl<'a> PlanCompiler<'a> {
    fn compile_level(
        &self,
        fields: &'a [FieldDescriptor],
        inherited: Option<&ArrayConfig>,
        columns: &mut Vec<Column>,
    ) -> Result<()> {
        for field in fields.iter().filter(|field| field.include) {
            if !field.object_fields.is_empty() {
                // Containers contribute their leaves; array-of-object
                // children render with the array's settings
                let nested = match (&field.data_type, &field.array_config) {
                    (DataType::Array, Some(config)) => Some(config),
                    _ => inherited,
                };
                self.compile_level(&field.object_fields, nested, columns)?;
                continue;
            }

            let rule = self.rule_for(field, inherited)?;
            columns.push(Column {
                header: if self.use_business_names {
                    field.business_name.clone()
                } else {
                    field.path.clone()
                },
                path: field.path.clone(),
                rule,
            });
        }
        Ok(())
    }

    fn rule_for(&self, field: &FieldDescriptor, inherited: Option<&ArrayConfig>) -> Result<ColumnRule> {
        let rule = match field.extraction_mode {
            ExtractionMode::None => ColumnRule::Value {
                steps: self.steps(&field.path)?,
                array: field
                    .array_config
                    .clone()
                    .map(|mut config| {
                        if config.element_kind == ElementKind::Reference && config.reference_collection.is_none() {
                            config.reference_collection = field.relationship_target.clone();
                        }
                        config
                    })
                    .or_else(|| inherited.cloned()),
            },
            ExtractionMode::Primary => {
                let source = self.source_field(field)?;
                let reference = self.index.get(source).and_then(|array| {
                    let config = array.array_config.as_ref()?;
                    match config.element_kind {
                        ElementKind::Reference => config
                            .reference_collection
                            .clone()
                            .or_else(|| array.relationship_target.clone()),
                        _ => None,
                    }
                });
                ColumnRule::Primary {
                    source: self.steps(source)?,
                    index: field.extraction_index.unwrap_or(0),
                    sub_path: primary_sub_path(&field.path, source),
                    reference,
                }
            }
            ExtractionMode::Count => match &field.reverse_relationship {
                Some(link) => ColumnRule::ReverseCount { link: link.clone() },
                None => ColumnRule::ArrayCount {
                    source: self.steps(self.source_field(field)?)?,
                },
            },
            ExtractionMode::Statistics => match &field.statistics_spec {
                Some(spec) => ColumnRule::Statistics { spec: spec.clone() },
                None => {
                    return Err(Error::config(
                        field.path.clone(),
                        "statistics extraction requires statisticsSpec",
                    ))
                }
            },
        };
        Ok(rule)
    }

    fn source_field<'f>(&self, field: &'f FieldDescriptor) -> Result<&'f str> {
        field
            .source_field
            .as_deref()
            .ok_or_else(|| Error::config(field.path.clone(), "extraction mode requires sourceField"))
    }

    /// Split a dotted path into steps, resolving `_expanded` segments to
    /// the relationship of their reference path
    fn steps(&self, path: &str) -> Result<Vec<PathStep>> {
        let mut steps = Vec::new();
        let mut prefix = String::new();
        for segment in path.split('.') {
            let step = match segment.strip_suffix(EXPANDED_SUFFIX) {
                Some(key) if !key.is_empty() => {
                    let reference_path = join(&prefix, key);
                    let target = self
                        .index
                        .get(reference_path.as_str())
                        .and_then(|reference| reference.relationship_target.clone())
                        .ok_or_else(|| {
                            Error::config(
                                path.to_string(),
                                format!("`{}` has no relationshipTarget to expand", reference_path),
                            )
                        })?;
                    PathStep::Expand {
                        key: key.to_string(),
                        target,
                    }
                }
                _ => PathStep::Key(segment.to_string()),
            };
            steps.push(step);
            prefix = join(&prefix, segment);
        }
        Ok(steps)
    }
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", prefix, segment)
    }
}

/// Field read inside the selected element: `items[primary].name` -> `name`
fn primary_sub_path(path: &str, source: &str) -> Option<String> {
    if let Some((_, rest)) = path.split_once("].") {
        return Some(rest.to_string());
    }
    path.strip_prefix(source)
        .and_then(|rest| rest.strip_prefix('.'))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiscoveryParameters, DisplayMode};

    fn config() -> DiscoveryConfig {
        let mut config = DiscoveryConfig::new("listings", DiscoveryParameters::default());
        config.required_collections.insert("agents".to_string());

        let mut agent = FieldDescriptor::new("agentId", DataType::Reference, "listings");
        agent.relationship_target = Some("agents".to_string());
        let mut expanded = FieldDescriptor::new("agentId_expanded", DataType::Object, "agents");
        expanded
            .object_fields
            .push(FieldDescriptor::new("agentId_expanded.fullName", DataType::String, "agents"));
        let mut hidden = FieldDescriptor::new("agentId_expanded._id", DataType::Reference, "agents");
        hidden.include = false;
        expanded.object_fields.push(hidden);

        let mut rooms = FieldDescriptor::new("rooms", DataType::Array, "listings");
        rooms.array_config = Some(ArrayConfig {
            element_kind: ElementKind::Object,
            display_mode: DisplayMode::First,
            ..ArrayConfig::default()
        });
        rooms
            .object_fields
            .push(FieldDescriptor::new("rooms.name", DataType::String, "listings"));

        let mut primary = FieldDescriptor::new("rooms[primary].name", DataType::String, "listings");
        primary.extraction_mode = ExtractionMode::Primary;
        primary.source_field = Some("rooms".to_string());

        config.fields = vec![agent, expanded, rooms, primary];
        config
    }

    #[test]
    fn test_columns_are_depth_first_included_leaves() {
        let plan = ExportPlan::compile(&config()).unwrap();
        let paths: Vec<&str> = plan.columns.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["agentId", "agentId_expanded.fullName", "rooms.name", "rooms[primary].name"]
        );
        assert_eq!(plan.headers()[1], "Agent ID Full Name");
    }

    #[test]
    fn test_expanded_steps_and_inherited_array_config() {
        let plan = ExportPlan::compile(&config()).unwrap();
        assert_eq!(
            plan.columns[1].rule,
            ColumnRule::Value {
                steps: vec![
                    PathStep::Expand {
                        key: "agentId".to_string(),
                        target: "agents".to_string()
                    },
                    PathStep::Key("fullName".to_string()),
                ],
                array: None,
            }
        );
        match &plan.columns[2].rule {
            ColumnRule::Value { array: Some(config), .. } => assert_eq!(config.display_mode, DisplayMode::First),
            other => panic!("unexpected rule {other:?}"),
        }
        match &plan.columns[3].rule {
            ColumnRule::Primary { index, sub_path, reference, .. } => {
                assert_eq!(*index, 0);
                assert_eq!(sub_path.as_deref(), Some("name"));
                assert!(reference.is_none());
            }
            other => panic!("unexpected rule {other:?}"),
        }
    }

    #[test]
    fn test_expansion_without_relationship_is_config_error() {
        let mut config = config();
        config.fields[0].relationship_target = None;
        assert!(matches!(ExportPlan::compile(&config), Err(Error::Config { .. })));
    }

    #[test]
    fn test_raw_path_headers() {
        let mut config = config();
        config.export_settings.use_business_names = false;
        let plan = ExportPlan::compile(&config).unwrap();
        assert_eq!(plan.headers()[0], "agentId");
    }
}
