//! Query string parsing into a structured map.
//!
//! Mirrors the conventions API clients already use for filtering:
//!
//! - `a=1&a=2` keeps every occurrence as an ordered array (deduplication is a
//!   later pipeline stage, so this layer never drops values)
//! - `price[gte]=500` nests into `{"price": {"gte": "500"}}`
//! - `tags[]=x&tags[]=y` appends into `{"tags": ["x", "y"]}`
//!
//! Values are always strings; no numeric coercion happens here.

use serde_json::{Map, Value};

/// Maximum bracket nesting honoured; deeper segments stay in the last key.
const MAX_DEPTH: usize = 5;

/// Parse a raw (still percent-encoded) query string.
pub fn parse_query(raw: &str) -> Map<String, Value> {
    let mut out = Map::new();

    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        if key.is_empty() {
            continue;
        }
        let path = split_key(&key);
        insert_path(&mut out, &path, value.into_owned());
    }

    out
}

/// Split `a[b][c]` into `["a", "b", "c"]`; `a[]` yields `["a", ""]`.
fn split_key(key: &str) -> Vec<String> {
    let Some(open) = key.find('[') else {
        return vec![key.to_string()];
    };
    if open == 0 {
        return vec![key.to_string()];
    }

    let (head, mut rest) = key.split_at(open);
    let mut segments = vec![head.to_string()];

    while let Some(stripped) = rest.strip_prefix('[') {
        let Some((segment, after)) = stripped.split_once(']') else {
            break;
        };
        if segments.len() > MAX_DEPTH {
            break;
        }
        segments.push(segment.to_string());
        rest = after;
    }

    if !rest.is_empty() {
        // Trailing garbage after the brackets: keep it attached to the last key.
        if let Some(last) = segments.last_mut() {
            last.push_str(rest);
        }
    }

    segments
}

fn insert_path(target: &mut Map<String, Value>, path: &[String], value: String) {
    let Some((head, tail)) = path.split_first() else {
        return;
    };

    if tail.is_empty() {
        push_value(target, head, Value::String(value));
        return;
    }

    // `a[]=x` appends to an array under `a`.
    if tail.len() == 1 && tail.first().is_some_and(|s| s.is_empty()) {
        push_value(target, head, Value::String(value));
        if let Some(existing) = target.get_mut(head)
            && !existing.is_array()
        {
            let single = existing.take();
            *existing = Value::Array(vec![single]);
        }
        return;
    }

    let entry = target
        .entry(head.clone())
        .or_insert_with(|| Value::Object(Map::new()));

    // A scalar seen earlier under the same key is replaced by the nested form.
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(child) = entry {
        insert_path(child, tail, value);
    }
}

fn push_value(target: &mut Map<String, Value>, key: &str, value: Value) {
    match target.get_mut(key) {
        None => {
            target.insert(key.to_string(), value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}
