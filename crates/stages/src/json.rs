//! Recovery of JSON payloads from free-form model responses.
//!
//! Models wrap JSON in Markdown fences or surround it with prose. These
//! helpers strip fences, then fall back to the outermost bracketed span.

use serde_json::{Map, Value};

/// The first JSON array found in `text`. An object wrapping a single list
/// (`{"insights": [...]}`) yields that list.
pub(crate) fn array(text: &str) -> Option<Vec<Value>> {
    match recover(text, '[', ']')? {
        Value::Array(items) => Some(items),
        Value::Object(map) => map.into_iter().find_map(|(_, v)| match v {
            Value::Array(items) => Some(items),
            _ => None,
        }),
        _ => None,
    }
}

/// The first JSON object found in `text`.
pub(crate) fn object(text: &str) -> Option<Map<String, Value>> {
    match recover(text, '{', '}')? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn recover(text: &str, open: char, close: char) -> Option<Value> {
    let body = strip_fences(text);
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return Some(value);
    }
    let start = body.find(open)?;
    let end = body.rfind(close)?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&body[start..=end]).ok()
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// A trimmed, non-empty string field.
pub(crate) fn text_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_owned)
}

/// A finite numeric field, accepting numbers encoded as strings.
pub(crate) fn number_field(map: &Map<String, Value>, key: &str) -> Option<f64> {
    let value = match map.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    value.is_finite().then_some(value)
}

/// A list of non-empty strings.
pub(crate) fn string_list(map: &Map<String, Value>, key: &str) -> Vec<String> {
    map.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_arrays_are_recovered() {
        let text = "```json\n[{\"title\": \"a\"}]\n```";
        assert_eq!(array(text).unwrap().len(), 1);
    }

    #[test]
    fn arrays_inside_prose_are_recovered() {
        let text = "Here are the insights:\n[1, 2, 3]\nLet me know if you need more.";
        assert_eq!(array(text).unwrap().len(), 3);
    }

    #[test]
    fn wrapped_lists_are_unwrapped() {
        let text = "{\"findings\": [{\"source\": \"x\"}]}";
        assert_eq!(array(text).unwrap().len(), 1);
    }

    #[test]
    fn objects_are_not_mistaken_for_arrays() {
        assert!(array("{\"score\": 0.9}").is_none());
        assert_eq!(
            number_field(&object("Result: {\"score\": \"0.9\"}").unwrap(), "score"),
            Some(0.9)
        );
    }

    #[test]
    fn non_finite_numbers_are_ignored() {
        let map = object(r#"{"a": "NaN", "b": "inf", "c": "-Infinity", "d": "0.4"}"#).unwrap();
        assert_eq!(number_field(&map, "a"), None);
        assert_eq!(number_field(&map, "b"), None);
        assert_eq!(number_field(&map, "c"), None);
        assert_eq!(number_field(&map, "d"), Some(0.4));
    }

    #[test]
    fn unparseable_text_yields_nothing() {
        assert!(array("no json here").is_none());
        assert!(object("} backwards {").is_none());
    }
}
