//! Request-scoped state threaded through the pipeline.
//!
//! A [`RequestContext`] is created from the incoming request at the pipeline
//! entry, lent mutably to each stage in turn, and dropped once the response
//! has been built. It also carries the headers of the response in progress so
//! stages that run before any response exists (security headers, rate limit
//! counters) can still contribute to it.

use std::collections::BTreeMap;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{Extensions, HeaderMap, Method, Uri};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::query::parse_query;

/// Time at which the request entered the router stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTime(pub DateTime<Utc>);

/// Correlation id for the request (propagated or generated).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Authenticated identity. Filled in by the auth collaborator, never by the
/// pipeline itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub role: String,
}

/// Mutable request record shared by every stage.
#[derive(Debug, Default)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Stable identity used for rate limiting (normally the client IP).
    pub client_ip: String,
    /// Parsed query; values are strings, string arrays, or nested objects.
    pub query: Map<String, Value>,
    /// Every value of query keys that were collapsed by deduplication.
    pub query_polluted: Map<String, Value>,
    /// Decoded JSON body, `{}` when absent.
    pub body: Value,
    /// Path parameters captured by the sub-router.
    pub params: BTreeMap<String, String>,
    /// Prefix of the sub-router currently handling the request.
    pub base_path: String,
    pub principal: Option<Principal>,
    /// Typed annotations such as [`RequestTime`] and [`RequestId`].
    pub extensions: Extensions,
    /// Headers to merge into whatever response is finally produced.
    pub response_headers: HeaderMap,
    raw_body: Option<Body>,
}

impl RequestContext {
    /// Split an incoming request into a context.
    pub fn from_request(req: Request, client_ip: impl Into<String>) -> Self {
        let (parts, body) = req.into_parts();
        let query = parts.uri.query().map(parse_query).unwrap_or_default();

        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            client_ip: client_ip.into(),
            query,
            query_polluted: Map::new(),
            body: Value::Object(Map::new()),
            params: BTreeMap::new(),
            base_path: String::new(),
            principal: None,
            extensions: parts.extensions,
            response_headers: HeaderMap::new(),
            raw_body: Some(body),
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Path plus query string exactly as the client sent it.
    pub fn original_url(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.uri.path())
    }

    /// Path relative to [`base_path`](Self::base_path); always starts with `/`.
    pub fn route_path(&self) -> &str {
        let rest = self
            .path()
            .strip_prefix(self.base_path.as_str())
            .unwrap_or(self.path());
        if rest.is_empty() { "/" } else { rest }
    }

    /// Take the unread body. Returns `None` once a stage has consumed it.
    pub fn take_raw_body(&mut self) -> Option<Body> {
        self.raw_body.take()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn request_time(&self) -> Option<DateTime<Utc>> {
        self.extensions.get::<RequestTime>().map(|t| t.0)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.extensions.get::<RequestId>().map(|id| id.0.as_str())
    }

    /// Move the request data out for a handler, leaving the pending
    /// response headers behind for the driver.
    pub fn detach(&mut self) -> RequestContext {
        let response_headers = std::mem::take(&mut self.response_headers);
        let mut detached = std::mem::take(self);
        self.response_headers = response_headers;
        // Keep the routing info so the driver can still log where it went.
        self.method = detached.method.clone();
        self.uri = detached.uri.clone();
        self.base_path = detached.base_path.clone();
        detached.response_headers = HeaderMap::new();
        detached
    }
}
