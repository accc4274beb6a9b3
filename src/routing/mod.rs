//! Prefix dispatch to resource sub-routers and the not-found fallback.
//!
//! # Dispatch
//!
//! Mounted sub-routers are tried in registration order. A router is offered
//! the request when the path lies under its prefix on a segment boundary;
//! `ctx.base_path` is set to that prefix first. A router that has no matching
//! method/path returns [`Outcome::Continue`] and the next one gets a chance.
//!
//! When nobody answers, [`not_found`] manufactures the 404 failure. It never
//! responds directly: the error handler renders it like any other failure.

mod handler;
mod resource;

use std::sync::Arc;

use tracing::{debug, trace};

use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::pipeline::{Outcome, Stage, path_under};

pub use handler::Handler;
pub use resource::{Resource, RouteError};

/// Ordered `(prefix, sub-router)` pairs, fixed at startup.
#[derive(Default, Clone)]
pub struct RouteTable {
    mounts: Vec<(String, Arc<dyn Stage>)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `router` under `prefix`. Trailing slashes are ignored.
    pub fn mount(mut self, prefix: impl Into<String>, router: impl Stage) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        self.mounts.push((prefix, Arc::new(router)));
        self
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.mounts.iter().map(|(prefix, _)| prefix.as_str())
    }

    /// Offer the request to each matching router, then fall back to 404.
    pub async fn dispatch(&self, ctx: &mut RequestContext) -> AppResult<axum::response::Response> {
        for (prefix, router) in &self.mounts {
            if !path_under(ctx.path(), prefix) {
                continue;
            }

            ctx.base_path.clone_from(prefix);
            match router.run(ctx).await {
                Outcome::Continue => trace!(prefix = %prefix, "router passed"),
                Outcome::Respond(response) => {
                    debug!(prefix = %prefix, status = %response.status(), "router responded");
                    return Ok(response);
                }
                Outcome::Fail(err) => return Err(err),
            }
        }

        ctx.base_path.clear();
        Err(not_found(ctx))
    }
}

/// The 404 failure for a request no router claimed.
pub fn not_found(ctx: &RequestContext) -> AppError {
    AppError::not_found(format!("Can't find {} on this server!", ctx.original_url()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::Request;
    use axum::http::{Method, StatusCode};

    async fn named(ctx: RequestContext) -> AppResult<String> {
        Ok(format!("{} {}", ctx.base_path, ctx.params.get("id").cloned().unwrap_or_default()))
    }

    fn ctx(method: Method, uri: &str) -> RequestContext {
        RequestContext::from_request(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
            "ip",
        )
    }

    async fn text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn table() -> RouteTable {
        RouteTable::new()
            .mount("/api/v1/tours", Resource::new().get("/{id}", named).unwrap())
            .mount("/api/v1/users/", Resource::new().get("/{id}", named).unwrap())
    }

    #[tokio::test]
    async fn test_dispatches_by_prefix_with_base_path() {
        let table = table();

        let response = table
            .dispatch(&mut ctx(Method::GET, "/api/v1/users/42"))
            .await
            .unwrap();
        assert_eq!(text(response).await, "/api/v1/users 42");
    }

    #[tokio::test]
    async fn test_not_found_uses_original_url() {
        let table = table();
        let err = table
            .dispatch(&mut ctx(Method::GET, "/does/not/exist?x=1"))
            .await
            .err()
            .unwrap();

        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Can't find /does/not/exist?x=1 on this server!");
    }

    #[tokio::test]
    async fn test_prefix_requires_segment_boundary() {
        let table = table();
        let err = table
            .dispatch(&mut ctx(Method::GET, "/api/v1/toursxyz/1"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_continue_falls_through_to_next_router() {
        let table = RouteTable::new()
            .mount("/api", Resource::new().get("/health", named).unwrap())
            .mount("/api/v1/tours", Resource::new().get("/{id}", named).unwrap());

        let response = table
            .dispatch(&mut ctx(Method::GET, "/api/v1/tours/7"))
            .await
            .unwrap();
        assert_eq!(text(response).await, "/api/v1/tours 7");
    }

    #[tokio::test]
    async fn test_unmatched_method_under_prefix_is_not_found() {
        let table = table();
        let err = table
            .dispatch(&mut ctx(Method::PUT, "/api/v1/tours/1"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Can't find /api/v1/tours/1 on this server!");
    }

    #[test]
    fn test_prefixes_keep_order() {
        let prefixes: Vec<_> = table().prefixes().map(str::to_string).collect();
        assert_eq!(prefixes, vec!["/api/v1/tours", "/api/v1/users"]);
    }
}
