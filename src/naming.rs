//! Business names for field paths
//!
//! `realmData.ownerAgent_expanded.fullName` becomes
//! `Realm Data Owner Agent Full Name`.

/// Derive a human-readable column label from a dotted path
pub fn business_name(path: &str) -> String {
    let segments: Vec<&str> = path.split('.').collect();
    let single = segments.len() == 1;

    let mut words: Vec<String> = Vec::new();
    for segment in segments {
        let (base, marker) = split_marker(segment);
        let base = base.strip_suffix("_expanded").unwrap_or(base);

        // `_id` only names the record itself when it stands alone
        if base == "_id" {
            if single {
                words.push("Record".to_string());
                words.push("ID".to_string());
            }
            continue;
        }
        if base == "__v" {
            words.push("Version".to_string());
            continue;
        }

        match marker {
            Some("count") => {
                words.extend(segment_words(base));
                words.push("Count".to_string());
            }
            Some("primary") => {
                words.push("Primary".to_string());
                words.extend(segment_words(base));
            }
            Some(index) => {
                words.extend(segment_words(base));
                words.push(index.to_string());
            }
            None => words.extend(segment_words(base)),
        }
    }

    if words.is_empty() {
        return path.to_string();
    }
    words.join(" ")
}

/// Split `items[count]` into (`items`, `count`)
fn split_marker(segment: &str) -> (&str, Option<&str>) {
    match segment.find('[') {
        Some(open) if segment.ends_with(']') => {
            (&segment[..open], Some(&segment[open + 1..segment.len() - 1]))
        }
        _ => (segment, None),
    }
}

/// Split one path segment on underscores, dashes and camelCase boundaries
fn segment_words(segment: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev: Option<char> = None;

    for ch in segment.chars() {
        if ch == '_' || ch == '-' || ch == ' ' {
            push_word(&mut words, &mut current);
            prev = None;
            continue;
        }
        if let Some(p) = prev {
            let camel_break = p.is_lowercase() && ch.is_uppercase();
            let digit_break = p.is_alphabetic() != ch.is_alphabetic() && (p.is_ascii_digit() || ch.is_ascii_digit());
            if camel_break || digit_break {
                push_word(&mut words, &mut current);
            }
        }
        current.push(ch);
        prev = Some(ch);
    }
    push_word(&mut words, &mut current);
    words
}

fn push_word(words: &mut Vec<String>, current: &mut String) {
    if current.is_empty() {
        return;
    }
    let word = std::mem::take(current);
    if word.eq_ignore_ascii_case("id") {
        words.push("ID".to_string());
        return;
    }
    let mut chars = word.chars();
    if let Some(first) = chars.next() {
        let mut capitalized: String = first.to_uppercase().collect();
        capitalized.push_str(chars.as_str());
        words.push(capitalized);
    }
}
