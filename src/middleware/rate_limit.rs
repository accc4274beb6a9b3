//! Fixed-window rate limiting per client identity.
//!
//! # Algorithm
//!
//! Each identity owns a [`WindowEntry`] holding a request count and the
//! instant its window started. On every request:
//!
//! 1. Look up or create the entry.
//! 2. If the window has run out, reset the count and restart the window.
//! 3. Increment the count.
//! 4. Reject with 429 when the count exceeds `max`.
//!
//! Steps 1-3 run under the DashMap shard lock for that key, so concurrent
//! requests from one client are counted exactly: a burst of N > max requests
//! yields exactly `max` successes.
//!
//! # Response Headers
//!
//! Every request in scope gets:
//! - `X-RateLimit-Limit`: configured `max`
//! - `X-RateLimit-Remaining`: requests left in the current window
//! - `X-RateLimit-Reset`: seconds until the window restarts
//!
//! Rejections additionally carry `Retry-After`.
//!
//! # Storage
//!
//! The store is injected ([`RateLimitStore`]). [`MemoryStore`] keeps entries
//! in process memory; expired entries are removed by [`MemoryStore::sweep`],
//! which `AppState` runs periodically.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderName, HeaderValue, header};
use dashmap::DashMap;
use tracing::{trace, warn};

use crate::context::RequestContext;
use crate::error::AppError;
use crate::metrics;
use crate::pipeline::{Outcome, Stage, StageFuture};

/// Default rejection message.
pub const DEFAULT_MESSAGE: &str = "Too many requests from this IP , please try again in an hour!";

static LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
static RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Error type for rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// `max` cannot be zero.
    ZeroMax,
    /// The window cannot be zero.
    ZeroWindow,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroMax => {
                write!(f, "max must be greater than 0; leave the limiter out to disable it")
            }
            RateLimitError::ZeroWindow => write!(f, "window must be longer than 0ms"),
        }
    }
}

impl std::error::Error for RateLimitError {}

/// Limiter parameters, fixed at construction.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per window.
    pub max: u32,
    pub window: Duration,
    /// Path prefix the limiter guards.
    pub scope_path: String,
    /// Rejection message.
    pub message: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max: 100,
            window: Duration::from_millis(60 * 60 * 1000),
            scope_path: "/api".to_string(),
            message: DEFAULT_MESSAGE.to_string(),
        }
    }
}

/// Per-identity window state.
#[derive(Debug, Clone, Copy)]
pub struct WindowEntry {
    pub count: u32,
    pub window_start: Instant,
}

/// Result of recording one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    /// Count in the current window, including this request.
    pub count: u32,
    /// Time until the window restarts.
    pub reset_in: Duration,
}

/// Storage for window entries.
///
/// Implementations must make `hit` atomic per key.
pub trait RateLimitStore: Send + Sync + 'static {
    /// Record one request from `key` at `now`.
    fn hit(&self, key: &str, now: Instant) -> Hit;

    /// Drop entries whose window ended before `now`. Returns how many went.
    fn sweep(&self, now: Instant) -> usize;
}

/// In-process store backed by a sharded concurrent map.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, WindowEntry>,
    window: Duration,
}

impl MemoryStore {
    pub fn new(window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            window,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<WindowEntry> {
        self.entries.get(key).map(|entry| *entry)
    }

    fn expired(&self, entry: &WindowEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.window_start) >= self.window
    }
}

impl RateLimitStore for MemoryStore {
    fn hit(&self, key: &str, now: Instant) -> Hit {
        // The entry guard holds the shard lock until it drops.
        let mut entry = self
            .entries
            .entry(key.to_owned())
            .or_insert(WindowEntry {
                count: 0,
                window_start: now,
            });

        if self.expired(&entry, now) {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.count = entry.count.saturating_add(1);

        let elapsed = now.saturating_duration_since(entry.window_start);
        Hit {
            count: entry.count,
            reset_in: self.window.saturating_sub(elapsed),
        }
    }

    fn sweep(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !self.expired(entry, now));
        before.saturating_sub(self.entries.len())
    }
}

/// Rate limiting stage.
///
/// Register it with [`PipelineBuilder::scoped`](crate::pipeline::PipelineBuilder::scoped)
/// under [`RateLimitConfig::scope_path`].
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    max: u32,
    message: Arc<str>,
}

impl RateLimiter {
    /// Create a limiter with its own [`MemoryStore`].
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError`] if `max` or `window` is zero.
    pub fn new(config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        Self::validate(config)?;
        Ok(Self::with_store(
            config,
            Arc::new(MemoryStore::new(config.window)),
        ))
    }

    /// Create a limiter around an existing store.
    pub fn with_store(config: &RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            store,
            max: config.max,
            message: Arc::from(config.message.as_str()),
        }
    }

    pub fn validate(config: &RateLimitConfig) -> Result<(), RateLimitError> {
        if config.max == 0 {
            return Err(RateLimitError::ZeroMax);
        }
        if config.window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }
        Ok(())
    }

    fn check(&self, ctx: &mut RequestContext) -> Outcome {
        let hit = self.store.hit(&ctx.client_ip, Instant::now());
        let remaining = self.max.saturating_sub(hit.count);
        // Round up so clients never retry a fraction of a second early.
        let reset_secs = hit.reset_in.as_secs() + u64::from(hit.reset_in.subsec_nanos() > 0);

        let headers = &mut ctx.response_headers;
        headers.insert(LIMIT_HEADER.clone(), HeaderValue::from(self.max));
        headers.insert(REMAINING_HEADER.clone(), HeaderValue::from(remaining));
        headers.insert(RESET_HEADER.clone(), HeaderValue::from(reset_secs));

        if hit.count <= self.max {
            trace!(client_ip = %ctx.client_ip, count = hit.count, "Rate limit check passed");
            return Outcome::Continue;
        }

        headers.insert(header::RETRY_AFTER, HeaderValue::from(reset_secs.max(1)));
        warn!(
            client_ip = %ctx.client_ip,
            path = %ctx.path(),
            count = hit.count,
            retry_after_secs = reset_secs.max(1),
            "Rate limit exceeded for IP"
        );
        metrics::record_rate_limited();

        Outcome::Fail(AppError::too_many_requests(self.message.as_ref()))
    }
}

impl Stage for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn run<'a>(&'a self, ctx: &'a mut RequestContext) -> StageFuture<'a> {
        let outcome = self.check(ctx);
        Box::pin(std::future::ready(outcome))
    }
}
