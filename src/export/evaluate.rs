//! Row evaluation
//!
//! Turns one primary document into one row of cell texts by running each
//! column rule of the plan. Evaluation only reads the prepared caches, so a
//! single evaluator is shared by every worker.

use super::plan::{ColumnRule, ExportPlan, PathStep};
use super::render::{render_elements, render_value};
use super::statistics::{self, DateWindow};
use crate::cache::CollectionCacheManager;
use crate::config::{ArrayConfig, ElementKind};
use crate::error::Result;
use crate::value::{lookup, Document, FieldValue};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// References looked up while evaluating one row, misses included
type Resolved = HashMap<(String, String), Option<Arc<Document>>>;

/// Values found along a column path
#[derive(Debug, Default)]
struct Gathered {
    values: Vec<FieldValue>,
    /// An array was crossed, so the cell renders as a list
    multi: bool,
    /// First reference that failed to resolve
    missed: Option<String>,
    /// Keep every element of the final array, empty ones included
    raw: bool,
}

impl Gathered {
    fn raw() -> Self {
        Gathered {
            raw: true,
            ..Gathered::default()
        }
    }
}

pub struct RowEvaluator<'a> {
    plan: &'a ExportPlan,
    cache: &'a CollectionCacheManager<'a>,
    /// Date window per column, for statistics columns with a filter
    windows: Vec<Option<DateWindow>>,
    unresolved: &'a AtomicU64,
}

impl<'a> RowEvaluator<'a> {
    /// Date windows are fixed here against `run_time` so every row of a run
    /// sees the same range
    pub fn new(
        plan: &'a ExportPlan,
        cache: &'a CollectionCacheManager<'a>,
        run_time: DateTime<Utc>,
        unresolved: &'a AtomicU64,
    ) -> Result<Self> {
        let windows = plan
            .columns
            .iter()
            .map(|column| match &column.rule {
                ColumnRule::Statistics { spec } => spec
                    .date_filter
                    .as_ref()
                    .map(|filter| DateWindow::from_filter(filter, run_time))
                    .transpose(),
                _ => Ok(None),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RowEvaluator {
            plan,
            cache,
            windows,
            unresolved,
        })
    }

    /// Cell texts for `doc`, in plan order
    ///
    /// Each distinct reference is looked up once per row, however many
    /// columns read through it.
    pub fn evaluate(&self, doc: &Document) -> Vec<String> {
        let mut resolved = Resolved::new();
        self.plan
            .columns
            .iter()
            .enumerate()
            .map(|(index, column)| {
                let (cell, missed) = self.cell(index, &column.rule, doc, &mut resolved);
                if let Some(id) = missed {
                    self.unresolved.fetch_add(1, Ordering::Relaxed);
                    warn!("Unresolved reference {} for column {}", id, column.path);
                }
                cell
            })
            .collect()
    }

    fn cell(
        &self,
        index: usize,
        rule: &ColumnRule,
        doc: &Document,
        resolved: &mut Resolved,
    ) -> (String, Option<String>) {
        match rule {
            ColumnRule::Value { steps, array } => {
                let mut gathered = Gathered::default();
                self.walk_document(doc, steps, resolved, &mut gathered);
                let Gathered {
                    values,
                    multi,
                    mut missed,
                    ..
                } = gathered;
                let cell = if multi {
                    let default_config;
                    let config = match array {
                        Some(config) => config,
                        None => {
                            default_config = ArrayConfig::default();
                            &default_config
                        }
                    };
                    let elements = values
                        .iter()
                        .map(|value| self.element_text(value, config, resolved, &mut missed))
                        .collect();
                    render_elements(elements, config)
                } else {
                    render_value(values.first())
                };
                (cell, missed)
            }
            ColumnRule::Primary {
                source,
                index: element,
                sub_path,
                reference,
            } => {
                // Positions count every element, so a null before the
                // primary one does not shift it
                let mut gathered = Gathered::raw();
                self.walk_document(doc, source, resolved, &mut gathered);
                let Gathered { values, mut missed, .. } = gathered;
                let cell = match values.get(*element) {
                    None => String::new(),
                    Some(value) => match reference {
                        Some(collection) => {
                            self.resolved_text(value, collection, sub_path.as_deref(), resolved, &mut missed)
                        }
                        None => match (value, sub_path) {
                            (FieldValue::Object(inner), Some(sub_path)) => render_value(lookup(inner, sub_path)),
                            (other, _) => render_value(Some(other)),
                        },
                    },
                };
                (cell, missed)
            }
            ColumnRule::ArrayCount { source } => {
                let mut gathered = Gathered::raw();
                self.walk_document(doc, source, resolved, &mut gathered);
                let count = if gathered.multi {
                    gathered.values.len()
                } else {
                    gathered.values.iter().filter(|value| !value.is_empty()).count()
                };
                (count.to_string(), gathered.missed)
            }
            ColumnRule::ReverseCount { link } => {
                let count = lookup(doc, &link.local_field)
                    .and_then(FieldValue::key_string)
                    .and_then(|key| self.cache.reverse_bucket(&link.collection, &link.foreign_field, &key))
                    .map_or(0, <[_]>::len);
                (count.to_string(), None)
            }
            ColumnRule::Statistics { spec } => {
                let window = self.windows.get(index).and_then(Option::as_ref);
                (statistics::evaluate(spec, window, doc, self.cache), None)
            }
        }
    }

    fn walk_document(&self, doc: &Document, steps: &[PathStep], resolved: &mut Resolved, out: &mut Gathered) {
        let Some((step, rest)) = steps.split_first() else {
            return;
        };
        match step {
            PathStep::Key(key) => {
                if let Some(value) = doc.get(key) {
                    self.walk_value(value, rest, resolved, out);
                }
            }
            PathStep::Expand { key, target } => {
                if let Some(value) = doc.get(key) {
                    self.expand(value, target, rest, resolved, out);
                }
            }
        }
    }

    fn walk_value(&self, value: &FieldValue, rest: &[PathStep], resolved: &mut Resolved, out: &mut Gathered) {
        match value {
            FieldValue::Array(items) if out.raw && rest.is_empty() => {
                out.multi = true;
                out.values.extend(items.iter().cloned());
            }
            FieldValue::Array(items) => {
                out.multi = true;
                for item in items {
                    self.walk_value(item, rest, resolved, out);
                }
            }
            _ if rest.is_empty() => {
                if out.raw || !value.is_empty() {
                    out.values.push(value.clone());
                }
            }
            FieldValue::Object(inner) => self.walk_document(inner, rest, resolved, out),
            _ => {}
        }
    }

    /// Resolve a reference (or each reference of an array) and continue
    /// inside the target document
    fn expand(&self, value: &FieldValue, target: &str, rest: &[PathStep], resolved: &mut Resolved, out: &mut Gathered) {
        if let FieldValue::Array(items) = value {
            out.multi = true;
            for item in items {
                self.expand(item, target, rest, resolved, out);
            }
            return;
        }

        let Some(id) = value.key_string() else {
            return;
        };
        match self.resolve(target, &id, resolved) {
            Some(found) => self.walk_document(&found, rest, resolved, out),
            None => {
                out.missed.get_or_insert(id);
            }
        }
    }

    /// Row-scoped lookup in front of the cache manager
    fn resolve(&self, collection: &str, id: &str, resolved: &mut Resolved) -> Option<Arc<Document>> {
        resolved
            .entry((collection.to_string(), id.to_string()))
            .or_insert_with(|| self.cache.resolve(collection, id))
            .clone()
    }

    /// Text of one array element
    ///
    /// Reference elements resolve to `extractField`; object elements read
    /// `referenceField` (resolved when a collection is known) or
    /// `extractField`.
    fn element_text(
        &self,
        value: &FieldValue,
        config: &ArrayConfig,
        resolved: &mut Resolved,
        missed: &mut Option<String>,
    ) -> String {
        match (value, config.element_kind) {
            (FieldValue::Object(inner), _) => {
                if let (Some(field), Some(collection)) = (&config.reference_field, &config.reference_collection) {
                    return match lookup(inner, field) {
                        Some(reference) => self.resolved_text(
                            reference,
                            collection,
                            config.extract_field.as_deref(),
                            resolved,
                            missed,
                        ),
                        None => String::new(),
                    };
                }
                match config.extract_field.as_deref().or(config.reference_field.as_deref()) {
                    Some(field) => render_value(lookup(inner, field)),
                    None => value.render(),
                }
            }
            (_, ElementKind::Reference) => match (&config.reference_collection, &config.extract_field) {
                (Some(collection), Some(field)) => {
                    self.resolved_text(value, collection, Some(field), resolved, missed)
                }
                _ => render_value(Some(value)),
            },
            _ => render_value(Some(value)),
        }
    }

    /// Resolve `reference` in `collection` and read `field` inside it; the
    /// raw id renders when no field is named
    fn resolved_text(
        &self,
        reference: &FieldValue,
        collection: &str,
        field: Option<&str>,
        resolved: &mut Resolved,
        missed: &mut Option<String>,
    ) -> String {
        let Some(id) = reference.key_string() else {
            return String::new();
        };
        let Some(field) = field else {
            return id;
        };
        match self.resolve(collection, &id, resolved) {
            Some(found) => render_value(lookup(&found, field)),
            None => {
                missed.get_or_insert(id);
                String::new()
            }
        }
    }
}
