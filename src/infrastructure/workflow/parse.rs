//! Lenient parsing of model replies

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap());

static YES_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\byes\b").unwrap());

/// Find the JSON value in a reply: a fenced block, the whole reply, or the
/// first `{...}` or `[...]` span
pub fn extract_json(reply: &str) -> Option<Value> {
    let body = FENCED_JSON
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(reply)
        .trim();

    if let Ok(value) = serde_json::from_str(body) {
        return Some(value);
    }

    ['{', '[']
        .iter()
        .filter_map(|open| {
            let close = if *open == '{' { '}' } else { ']' };
            let start = body.find(*open)?;
            let end = body.rfind(close)?;
            (end > start).then(|| (start, &body[start..=end]))
        })
        .min_by_key(|(start, _)| *start)
        .and_then(|(_, span)| serde_json::from_str(span).ok())
}

/// Deserialize the JSON found in a reply into `T`
pub fn parse_json<T: DeserializeOwned>(reply: &str) -> Option<T> {
    extract_json(reply).and_then(|value| serde_json::from_value(value).ok())
}

pub fn is_yes(reply: &str) -> bool {
    YES_WORD.is_match(reply)
}

/// First line of a reply with quotes, backticks and trailing punctuation removed
pub fn clean_name(reply: &str) -> Option<String> {
    let name = reply
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())?
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.' || c.is_whitespace());

    if name.is_empty() || name.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(name.to_string())
    }
}

/// String field of a JSON object, ignoring blanks and nulls
pub fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(str::to_string)
}
