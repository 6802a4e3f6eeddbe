//! Fuzzy matching of extracted values against OCR lines.

use serde_json::Value;

use crate::lines::EnrichedLine;

/// Decides whether an OCR line's text supports a candidate value.
pub trait TextMatcher {
    fn is_match(&self, line_text: &str, value: &str) -> bool;
}

/// Case-insensitive, whitespace-collapsed containment in either direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainmentMatcher;

impl TextMatcher for ContainmentMatcher {
    fn is_match(&self, line_text: &str, value: &str) -> bool {
        let line = normalize_text(line_text);
        let value = normalize_text(value);
        if line.is_empty() || value.is_empty() {
            return false;
        }
        line == value || line.contains(&value) || value.contains(&line)
    }
}

/// Lowercase and collapse runs of whitespace.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Lowercase and strip leading/trailing non-alphanumerics (`"Total:"` -> `"total"`).
pub fn normalize_word(text: &str) -> String {
    text.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

/// Render a scalar the way it would be read off a page. `None` for null,
/// empty strings and containers.
pub fn value_as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Find the lines supporting `value`.
///
/// First the whole value is matched; if nothing matches and the value has
/// several words, each word is matched on its own and the results are
/// unioned (lines deduplicated, document order kept).
pub fn find_matching_lines<'a>(
    value: &Value,
    lines: &'a [EnrichedLine],
    matcher: &dyn TextMatcher,
) -> Vec<&'a EnrichedLine> {
    let Some(text) = value_as_text(value) else {
        return Vec::new();
    };

    let direct: Vec<&EnrichedLine> = lines
        .iter()
        .filter(|line| matcher.is_match(&line.content, &text))
        .collect();
    if !direct.is_empty() || !text.contains(' ') {
        return direct;
    }

    let words: Vec<&str> = text.split(' ').filter(|w| !w.is_empty()).collect();
    lines
        .iter()
        .filter(|line| words.iter().any(|w| matcher.is_match(&line.content, w)))
        .collect()
}
