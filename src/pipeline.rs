//! The ordered stage list and the loop that drives it.
//!
//! ```text
//!  Request ──► RequestContext
//!                 │
//!                 ▼
//!   stage 1 ─► stage 2 ─► ... ─► stage N ─► RouteTable ─► not-found
//!     │           │                 │           │              │
//!     └─ Respond ─┴──── Respond ────┴─► Response │              │
//!     └─ Fail ────┴──── Fail ───────┴───────────┴──────────────┴─► ErrorHandler
//! ```
//!
//! Every stage sees the context only after all earlier stages returned
//! [`Outcome::Continue`]. The first `Respond` or `Fail` ends the walk, and the
//! driver emits exactly one response.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::http::HeaderMap;
use axum::response::Response;
use tracing::{debug, trace};

use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::error_handler::ErrorHandler;
use crate::metrics;
use crate::middleware::ip::client_identity;
use crate::middleware::TrustedProxyConfig;
use crate::routing::RouteTable;

/// Boxed future borrowed from a stage and its context.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Future returned by [`Stage::run`].
pub type StageFuture<'a> = BoxFuture<'a, Outcome>;

/// What a stage decided for the current request.
#[derive(Debug)]
pub enum Outcome {
    /// Hand the context to the next stage.
    Continue,
    /// Stop here and send this response.
    Respond(Response),
    /// Stop here and send the failure to the error handler.
    Fail(AppError),
}

impl From<AppResult<Response>> for Outcome {
    fn from(result: AppResult<Response>) -> Self {
        match result {
            Ok(response) => Outcome::Respond(response),
            Err(err) => Outcome::Fail(err),
        }
    }
}

/// One step of the request pipeline.
pub trait Stage: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    fn run<'a>(&'a self, ctx: &'a mut RequestContext) -> StageFuture<'a>;
}

/// Whether `path` lies under `prefix` on a segment boundary.
///
/// `/api` covers `/api` and `/api/v1/tours` but not `/apiary`.
pub fn path_under(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Runs the inner stage only for paths under `prefix`.
pub struct Scoped<S> {
    prefix: String,
    inner: S,
}

impl<S: Stage> Scoped<S> {
    pub fn new(prefix: impl Into<String>, inner: S) -> Self {
        Self {
            prefix: prefix.into(),
            inner,
        }
    }
}

impl<S: Stage> Stage for Scoped<S> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn run<'a>(&'a self, ctx: &'a mut RequestContext) -> StageFuture<'a> {
        if path_under(ctx.path(), &self.prefix) {
            self.inner.run(ctx)
        } else {
            Box::pin(std::future::ready(Outcome::Continue))
        }
    }
}

/// Stage list, route table and error handler, fixed at startup.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    routes: RouteTable,
    errors: ErrorHandler,
    trusted_proxies: TrustedProxyConfig,
}

impl Pipeline {
    pub fn builder(errors: ErrorHandler) -> PipelineBuilder {
        PipelineBuilder {
            stages: Vec::new(),
            routes: RouteTable::new(),
            errors,
            trusted_proxies: TrustedProxyConfig::default(),
        }
    }

    pub fn error_handler(&self) -> &ErrorHandler {
        &self.errors
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Turn one request into exactly one response.
    pub async fn handle(&self, req: Request) -> Response {
        let started = Instant::now();
        let client_ip = client_identity(&req, &self.trusted_proxies).into_owned();
        let mut ctx = RequestContext::from_request(req, client_ip);

        let mut response = match self.drive(&mut ctx).await {
            Ok(response) => response,
            Err(err) => self.errors.render(err),
        };

        merge_headers(response.headers_mut(), &ctx.response_headers);
        metrics::record_request(response.status(), started.elapsed());
        response
    }

    async fn drive(&self, ctx: &mut RequestContext) -> AppResult<Response> {
        for stage in &self.stages {
            match stage.run(ctx).await {
                Outcome::Continue => trace!(stage = stage.name(), "stage passed"),
                Outcome::Respond(response) => {
                    debug!(stage = stage.name(), status = %response.status(), "stage responded");
                    return Ok(response);
                }
                Outcome::Fail(err) => {
                    debug!(stage = stage.name(), error = %err, "stage failed");
                    return Err(err);
                }
            }
        }

        self.routes.dispatch(ctx).await
    }
}

/// Copy pending headers onto the response unless a handler already set them.
fn merge_headers(target: &mut HeaderMap, pending: &HeaderMap) {
    for name in pending.keys() {
        if target.contains_key(name) {
            continue;
        }
        for value in pending.get_all(name) {
            target.append(name.clone(), value.clone());
        }
    }
}

/// Builder keeping registration order.
pub struct PipelineBuilder {
    stages: Vec<Box<dyn Stage>>,
    routes: RouteTable,
    errors: ErrorHandler,
    trusted_proxies: TrustedProxyConfig,
}

impl PipelineBuilder {
    pub fn stage(mut self, stage: impl Stage) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Register a stage only for paths under `prefix`.
    pub fn scoped(self, prefix: impl Into<String>, stage: impl Stage) -> Self {
        self.stage(Scoped::new(prefix, stage))
    }

    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    pub fn trusted_proxies(mut self, trusted: TrustedProxyConfig) -> Self {
        self.trusted_proxies = trusted;
        self
    }

    pub fn build(self) -> Arc<Pipeline> {
        Arc::new(Pipeline {
            stages: self.stages,
            routes: self.routes,
            errors: self.errors,
            trusted_proxies: self.trusted_proxies,
        })
    }
}
