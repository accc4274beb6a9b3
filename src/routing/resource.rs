//! Method + path sub-router for one resource prefix.
//!
//! One radix tree per HTTP method. Paths are matched against the request path
//! relative to the prefix the resource is mounted at, so a resource mounted
//! at `/api/v1/tours` registers `/` and `/{id}`.

use std::collections::HashMap;

use axum::http::Method;
use matchit::Router as MatchitRouter;
use thiserror::Error;
use tracing::trace;

use super::handler::{BoxedHandler, Handler};
use crate::context::RequestContext;
use crate::middleware::sanitize::{log_removed, sanitize_params};
use crate::pipeline::{Outcome, Stage, StageFuture};

/// Route registration failure.
#[derive(Error, Debug)]
#[error("invalid route `{method} {path}`: {source}")]
pub struct RouteError {
    method: Method,
    path: String,
    #[source]
    source: matchit::InsertError,
}

/// Sub-router dispatching on method and relative path.
#[derive(Default)]
pub struct Resource {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl Resource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Path parameters use `{name}` syntax.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] if the path is malformed or conflicts with an
    /// earlier registration for the same method.
    pub fn route(
        mut self,
        method: Method,
        path: &str,
        handler: impl Handler,
    ) -> Result<Self, RouteError> {
        self.routes
            .entry(method.clone())
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .map_err(|source| RouteError {
                method,
                path: path.to_string(),
                source,
            })?;
        Ok(self)
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Result<Self, RouteError> {
        self.route(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Result<Self, RouteError> {
        self.route(Method::POST, path, handler)
    }

    pub fn patch(self, path: &str, handler: impl Handler) -> Result<Self, RouteError> {
        self.route(Method::PATCH, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Result<Self, RouteError> {
        self.route(Method::DELETE, path, handler)
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(BoxedHandler, Vec<(String, String)>)> {
        let tree = match self.routes.get(method) {
            Some(tree) => tree,
            None if *method == Method::HEAD => self.routes.get(&Method::GET)?,
            None => return None,
        };
        let matched = tree.at(path).ok()?;
        let params = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((matched.value.clone(), params))
    }
}

impl Stage for Resource {
    fn name(&self) -> &'static str {
        "resource"
    }

    fn run<'a>(&'a self, ctx: &'a mut RequestContext) -> StageFuture<'a> {
        Box::pin(async move {
            let path = without_trailing_slash(ctx.route_path());
            let Some((handler, params)) = self.lookup(&ctx.method, path) else {
                trace!(base_path = %ctx.base_path, path = %ctx.path(), "No route in resource");
                return Outcome::Continue;
            };

            ctx.params.extend(params);
            let removed = sanitize_params(&mut ctx.params);
            log_removed("params", &removed, ctx);

            Outcome::from(handler.call(ctx.detach()).await)
        })
    }
}

/// `/{id}/` routes like `/{id}`; the root `/` stays as is.
fn without_trailing_slash(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some(trimmed) if !trimmed.is_empty() => trimmed,
        _ => path,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};
    use axum::Json;
    use axum::body::Body;
    use axum::extract::Request;
    use axum::http::StatusCode;
    use serde_json::{Value, json};

    async fn echo_params(ctx: RequestContext) -> AppResult<Json<Value>> {
        Ok(Json(json!(ctx.params)))
    }

    async fn refuse(_ctx: RequestContext) -> AppResult<StatusCode> {
        Err(AppError::bad_request("refused"))
    }

    fn ctx(method: Method, uri: &str, base: &str) -> RequestContext {
        let mut ctx = RequestContext::from_request(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
            "ip",
        );
        ctx.base_path = base.to_string();
        ctx
    }

    fn resource() -> Resource {
        Resource::new()
            .get("/{id}", echo_params)
            .unwrap()
            .post("/", refuse)
            .unwrap()
    }

    #[tokio::test]
    async fn test_handler_sees_params() {
        let resource = Resource::new()
            .get("/{id}", |ctx: RequestContext| async move {
                let id = ctx.params.get("id").cloned().unwrap_or_default();
                Ok::<_, AppError>(id)
            })
            .unwrap();
        let mut ctx = ctx(Method::GET, "/api/v1/tours/5c88fa8cf4afda39709c2955", "/api/v1/tours");

        let Outcome::Respond(response) = resource.run(&mut ctx).await else {
            panic!("expected response");
        };
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"5c88fa8cf4afda39709c2955");
    }

    #[tokio::test]
    async fn test_unmatched_method_or_path_continues() {
        let resource = resource();

        let mut wrong_method = ctx(Method::DELETE, "/api/v1/tours/1", "/api/v1/tours");
        assert!(matches!(resource.run(&mut wrong_method).await, Outcome::Continue));

        let mut wrong_path = ctx(Method::GET, "/api/v1/tours/1/extra", "/api/v1/tours");
        assert!(matches!(resource.run(&mut wrong_path).await, Outcome::Continue));
    }

    #[tokio::test]
    async fn test_handler_failure_is_propagated() {
        let resource = resource();
        let mut ctx = ctx(Method::POST, "/api/v1/tours", "/api/v1/tours");

        match resource.run(&mut ctx).await {
            Outcome::Fail(err) => assert_eq!(err.status(), StatusCode::BAD_REQUEST),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_trailing_slash_matches_same_route() {
        let resource = resource();

        let mut with_slash = ctx(Method::GET, "/api/v1/tours/42/", "/api/v1/tours");
        let Outcome::Respond(response) = resource.run(&mut with_slash).await else {
            panic!("expected response");
        };
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"id": "42"}));

        let mut list = ctx(Method::POST, "/api/v1/tours/", "/api/v1/tours");
        assert!(matches!(resource.run(&mut list).await, Outcome::Fail(_)));
    }

    #[test]
    fn test_without_trailing_slash() {
        assert_eq!(without_trailing_slash("/"), "/");
        assert_eq!(without_trailing_slash("/42/"), "/42");
        assert_eq!(without_trailing_slash("/42"), "/42");
    }

    #[tokio::test]
    async fn test_head_falls_back_to_get() {
        let resource = resource();
        let mut ctx = ctx(Method::HEAD, "/api/v1/tours/1", "/api/v1/tours");
        assert!(matches!(resource.run(&mut ctx).await, Outcome::Respond(_)));
    }

    #[test]
    fn test_conflicting_route_is_an_error() {
        let err = Resource::new()
            .get("/{id}", echo_params)
            .unwrap()
            .get("/{slug}", echo_params)
            .err()
            .unwrap();
        assert!(err.to_string().contains("GET /{slug}"));
    }
}
