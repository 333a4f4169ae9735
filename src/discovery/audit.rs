//! Human-readable discovery report
//!
//! One line per descriptor, indented by tree depth, so an operator can see
//! at a glance what was kept, what was dropped, and where references point.

use crate::config::{DiscoveryConfig, FieldDescriptor};
use std::fmt::Write;

/// Render the audit tree for a discovered configuration
pub fn render_audit(config: &DiscoveryConfig, documents_scanned: u64, exhaustive: bool) -> String {
    let mut out = String::new();
    let (total, included) = config.field_counts();

    let _ = writeln!(out, "Discovery audit: {}", config.collection);
    if let Some(at) = config.discovered_at {
        let _ = writeln!(out, "Discovered at: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    let _ = writeln!(
        out,
        "Documents scanned: {} ({})",
        documents_scanned,
        if exhaustive { "exhaustive" } else { "sampled" }
    );
    let _ = writeln!(out, "Fields: {} discovered, {} included", total, included);
    if !config.required_collections.is_empty() {
        let names: Vec<&str> = config.required_collections.iter().map(String::as_str).collect();
        let _ = writeln!(out, "Required collections: {}", names.join(", "));
    }
    out.push('\n');

    for field in &config.fields {
        render_field(&mut out, field, 0);
    }
    out
}

fn render_field(out: &mut String, field: &FieldDescriptor, depth: usize) {
    let marker = if field.include { '+' } else { '-' };
    let stats = &field.statistics;
    let _ = write!(
        out,
        "{}[{}] {} ({}) distinct={} occurrences={} nulls={}",
        "  ".repeat(depth),
        marker,
        field.path,
        field.data_type.as_str(),
        stats.distinct_non_null_values,
        stats.total_occurrences,
        stats.null_count
    );
    if let Some(target) = &field.relationship_target {
        let _ = write!(out, " -> {}", target);
    }
    if let Some(extract) = field.array_config.as_ref().and_then(|c| c.extract_field.as_ref()) {
        let _ = write!(out, " [{}]", extract);
    }
    if !field.extraction_mode.is_none() {
        let _ = write!(out, " mode={:?}", field.extraction_mode);
    }
    out.push('\n');

    for child in &field.object_fields {
        render_field(out, child, depth + 1);
    }
}
