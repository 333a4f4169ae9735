//! Supplemental overlay merge
//!
//! The overlay can add descriptors and re-enable excluded ones; it never
//! disables anything. Merging the same overlay twice is a no-op the second
//! time.

use super::field::{find_field_mut, visit_fields, FieldDescriptor};
use super::DiscoveryConfig;
use tracing::debug;

impl DiscoveryConfig {
    /// Overlay `overlay` onto this configuration
    pub fn merge(&mut self, overlay: &DiscoveryConfig) {
        for field in &overlay.fields {
            merge_field(&mut self.fields, field);
        }

        self.required_collections
            .extend(overlay.required_collections.iter().cloned());
        let mut referenced = Vec::new();
        visit_fields(&overlay.fields, &mut |field| {
            referenced.extend(field.referenced_collections().into_iter().map(str::to_string));
        });
        self.required_collections.extend(referenced);

        // Re-enabled leaves pull their containers back in
        include_ancestors(&mut self.fields);
    }
}

fn merge_field(base: &mut Vec<FieldDescriptor>, overlay: &FieldDescriptor) {
    if let Some(existing) = find_field_mut(base, &overlay.path) {
        if overlay.include && !existing.include {
            debug!("Supplemental re-enables {}", existing.path);
            existing.include = true;
        }
    } else {
        let mut added = overlay.clone();
        added.object_fields.clear();
        debug!("Supplemental adds {}", added.path);
        match parent_path(&overlay.path).and_then(|parent| find_field_mut(base, parent)) {
            Some(parent) => parent.object_fields.push(added),
            None => base.push(added),
        }
    }

    for child in &overlay.object_fields {
        merge_field(base, child);
    }
}

fn parent_path(path: &str) -> Option<&str> {
    path.rsplit_once('.').map(|(parent, _)| parent)
}

/// Include every container that has an included descendant; returns whether
/// anything below `fields` is included
fn include_ancestors(fields: &mut [FieldDescriptor]) -> bool {
    let mut any = false;
    for field in fields.iter_mut() {
        let child_included = include_ancestors(&mut field.object_fields);
        if child_included && !field.include {
            field.include = true;
        }
        any |= field.include;
    }
    any
}
