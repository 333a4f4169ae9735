//! Cell rendering for multi-valued paths

use crate::config::{ArrayConfig, DisplayMode, SortOrder};
use crate::value::FieldValue;
use std::cmp::Ordering;

/// Text of a single value; empty values render as an empty cell
pub fn render_value(value: Option<&FieldValue>) -> String {
    match value {
        Some(value) if !value.is_empty() => value.render(),
        _ => String::new(),
    }
}

/// Join element texts per `displayMode`, `sortOrder` and `delimiter`
///
/// `first` keeps source order and takes the first element; `delimited` sorts
/// and joins everything.
pub fn render_elements(mut elements: Vec<String>, config: &ArrayConfig) -> String {
    elements.retain(|element| !element.is_empty());
    match config.display_mode {
        DisplayMode::First => elements.into_iter().next().unwrap_or_default(),
        DisplayMode::Delimited => {
            sort_elements(&mut elements, config.sort_order);
            elements.join(&config.delimiter)
        }
    }
}

/// Sort element texts in place
///
/// Numeric order puts unparseable elements after the numbers, in text order.
pub fn sort_elements(elements: &mut [String], order: SortOrder) {
    match order {
        SortOrder::None => {}
        SortOrder::Alphanumeric => elements.sort(),
        SortOrder::Numeric => elements.sort_by(|a, b| compare_numeric(a, b)),
    }
}

fn compare_numeric(a: &str, b: &str) -> Ordering {
    let parse = |s: &str| s.trim().parse::<f64>().ok().filter(|n| n.is_finite());
    match (parse(a), parse(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}
