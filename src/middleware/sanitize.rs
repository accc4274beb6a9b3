//! Input sanitization for query, body and path parameters.
//!
//! Two rewrites, applied recursively:
//!
//! - **Operator keys**: any object key starting with `$` or containing `.` is
//!   removed with its value, so `{"email": {"$gt": ""}}` cannot reach a
//!   document store as a query operator.
//! - **Markup**: in every string, `<` becomes `&lt;` and `>` becomes `&gt;`,
//!   and surrounding whitespace is trimmed.
//!
//! Both rewrites are idempotent. Neither touches `&`, so escaping an already
//! escaped string changes nothing.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::warn;

use crate::context::RequestContext;
use crate::pipeline::{Outcome, Stage, StageFuture};

/// Whether `key` could be read as a store operator or a dotted path.
pub fn is_operator_key(key: &str) -> bool {
    key.starts_with('$') || key.contains('.')
}

/// Neutralize markup and trim a single string.
pub fn sanitize_str(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.contains(['<', '>']) {
        return trimmed.to_string();
    }

    let mut out = String::with_capacity(trimmed.len() + 8);
    for c in trimmed.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

/// Sanitize `value` in place. Returns the dotted paths of removed keys.
pub fn sanitize_value(value: &mut Value) -> Vec<String> {
    let mut removed = Vec::new();
    walk(value, "", &mut removed);
    removed
}

/// Sanitize an object in place. Returns the dotted paths of removed keys.
pub fn sanitize_map(map: &mut Map<String, Value>) -> Vec<String> {
    let mut removed = Vec::new();
    walk_map(map, "", &mut removed);
    removed
}

fn walk(value: &mut Value, path: &str, removed: &mut Vec<String>) {
    match value {
        Value::String(s) => *s = sanitize_str(s),
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                walk(item, &join(path, &i.to_string()), removed);
            }
        }
        Value::Object(map) => walk_map(map, path, removed),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn walk_map(map: &mut Map<String, Value>, path: &str, removed: &mut Vec<String>) {
    map.retain(|key, _| {
        if is_operator_key(key) {
            removed.push(join(path, key));
            false
        } else {
            true
        }
    });

    for (key, child) in map.iter_mut() {
        walk(child, &join(path, key), removed);
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// Sanitization stage over query, body and path parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sanitizer;

impl Sanitizer {
    pub fn new() -> Self {
        Self
    }

    /// Apply both rewrites to every input of `ctx`.
    pub fn apply(&self, ctx: &mut RequestContext) {
        let removed = sanitize_map(&mut ctx.query);
        log_removed("query", &removed, ctx);

        let removed = sanitize_value(&mut ctx.body);
        log_removed("body", &removed, ctx);

        let removed = sanitize_params(&mut ctx.params);
        log_removed("params", &removed, ctx);
    }
}

/// Sanitize path parameters in place. Returns the removed keys.
///
/// Parameters are plain strings, so only keys and values need checking.
pub fn sanitize_params(params: &mut BTreeMap<String, String>) -> Vec<String> {
    let mut removed = Vec::new();
    params.retain(|key, _| {
        if is_operator_key(key) {
            removed.push(key.clone());
            false
        } else {
            true
        }
    });
    for value in params.values_mut() {
        *value = sanitize_str(value);
    }
    removed
}

pub(crate) fn log_removed(location: &'static str, removed: &[String], ctx: &RequestContext) {
    for key in removed {
        warn!(
            location,
            key = %key,
            client_ip = %ctx.client_ip,
            path = %ctx.path(),
            "Removed operator key from request input"
        );
    }
}

impl Stage for Sanitizer {
    fn name(&self) -> &'static str {
        "sanitizer"
    }

    fn run<'a>(&'a self, ctx: &'a mut RequestContext) -> StageFuture<'a> {
        self.apply(ctx);
        Box::pin(std::future::ready(Outcome::Continue))
    }
}
