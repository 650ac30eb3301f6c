//! Fuzzy JSON extraction for oracle replies
//!
//! Decision prompts ask the model for strict JSON, but completions still
//! arrive wrapped in markdown fences or surrounded by prose. This module
//! recovers the JSON payload before typed deserialization; anything it
//! cannot recover surfaces as a parse failure for the engine's conservative
//! defaults.

use regex::Regex;
use std::sync::LazyLock;

/// Extract a JSON value from a raw completion.
///
/// Tries, in order: a direct parse, code-fence stripping, balanced
/// object/array extraction from surrounding text, and trailing-comma repair.
pub fn extract_json(raw: &str) -> Option<serde_json::Value> {
    let input = raw.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str(input) {
        return Some(value);
    }

    let unfenced = strip_code_fences(input);
    if let Ok(value) = serde_json::from_str(&unfenced) {
        return Some(value);
    }

    if let Some(extracted) = extract_balanced(&unfenced) {
        if let Ok(value) = serde_json::from_str(&extracted) {
            return Some(value);
        }
        let repaired = strip_trailing_commas(&extracted);
        if let Ok(value) = serde_json::from_str(&repaired) {
            return Some(value);
        }
    }

    None
}

/// Extract and deserialize a typed structure from a raw completion.
pub fn extract_typed<T: serde::de::DeserializeOwned>(raw: &str) -> Option<T> {
    extract_json(raw).and_then(|value| serde_json::from_value(value).ok())
}

fn strip_code_fences(input: &str) -> String {
    static CODE_FENCE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"```(?:json|JSON)?\s*\n?([\s\S]*?)\n?```").unwrap());

    if let Some(caps) = CODE_FENCE_RE.captures(input) {
        if let Some(content) = caps.get(1) {
            return content.as_str().to_string();
        }
    }

    input.to_string()
}

/// Find the first balanced JSON object or array in the input
fn extract_balanced(input: &str) -> Option<String> {
    let start_obj = input.find('{');
    let start_arr = input.find('[');

    let (start, end_char) = match (start_obj, start_arr) {
        (Some(o), Some(a)) if o < a => (o, '}'),
        (Some(_), Some(a)) => (a, ']'),
        (Some(o), None) => (o, '}'),
        (None, Some(a)) => (a, ']'),
        (None, None) => return None,
    };

    let substring = &input[start..];
    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in substring.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth -= 1;
                if depth == 0 && c == end_char {
                    return Some(substring[..=i].to_string());
                }
            }
            _ => {}
        }
    }

    None
}

fn strip_trailing_commas(input: &str) -> String {
    static TRAILING_COMMA_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r",(\s*[}\]])").unwrap());
    TRAILING_COMMA_RE.replace_all(input, "$1").to_string()
}
