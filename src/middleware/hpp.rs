//! HTTP parameter pollution protection.
//!
//! `?sort=price&sort=-name` would otherwise hand handlers an array where they
//! expect a string. Repeated top-level query keys collapse to their first
//! value, except for allow-listed keys where several values are legitimate
//! filters (`?duration=5&duration=9`).

use std::collections::HashSet;

use serde_json::Value;
use tracing::debug;

use crate::context::RequestContext;
use crate::pipeline::{Outcome, Stage, StageFuture};

/// Keys allowed to repeat by default.
pub const DEFAULT_WHITELIST: &[&str] = &[
    "duration",
    "ratingsQuantity",
    "ratingsAverage",
    "maxGroupSize",
    "difficulty",
    "price",
];

/// Query deduplication stage.
#[derive(Debug, Clone)]
pub struct ParameterDeduplicator {
    whitelist: HashSet<String>,
}

impl Default for ParameterDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_WHITELIST.iter().copied())
    }
}

impl ParameterDeduplicator {
    pub fn new<I, S>(whitelist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            whitelist: whitelist.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_whitelisted(&self, key: &str) -> bool {
        self.whitelist.contains(key)
    }

    /// Collapse repeated keys of `ctx.query` in place.
    pub fn apply(&self, ctx: &mut RequestContext) {
        for (key, value) in ctx.query.iter_mut() {
            if self.is_whitelisted(key) {
                continue;
            }
            let Value::Array(values) = value else {
                continue;
            };
            let Some(first) = values.first().cloned() else {
                continue;
            };

            debug!(key = %key, count = values.len(), "Collapsed repeated query parameter");
            let all = std::mem::replace(value, first);
            ctx.query_polluted.insert(key.clone(), all);
        }
    }
}

impl Stage for ParameterDeduplicator {
    fn name(&self) -> &'static str {
        "parameter_deduplicator"
    }

    fn run<'a>(&'a self, ctx: &'a mut RequestContext) -> StageFuture<'a> {
        self.apply(ctx);
        Box::pin(std::future::ready(Outcome::Continue))
    }
}
