//! Request time and correlation id annotations.
//!
//! Runs right before dispatch, so handlers see a [`RequestTime`] for
//! `requestedAt` and a [`RequestId`] for log correlation. A client-supplied
//! `X-Request-Id` is propagated when it is short printable ASCII; otherwise a
//! UUIDv4 is generated. The id is echoed on the response.

use axum::http::HeaderValue;
use chrono::Utc;
use tracing::{Span, debug};
use uuid::Uuid;

use crate::context::{RequestContext, RequestId, RequestTime};
use crate::pipeline::{Outcome, Stage, StageFuture};

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

/// Stamping stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestStamp;

impl RequestStamp {
    pub fn new() -> Self {
        Self
    }

    pub fn apply(&self, ctx: &mut RequestContext) {
        let request_id = propagated_id(ctx).unwrap_or_else(|| Uuid::new_v4().to_string());

        ctx.extensions.insert(RequestTime(Utc::now()));
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            ctx.response_headers.insert(REQUEST_ID_HEADER, value);
        }

        Span::current().record("request_id", request_id.as_str());
        debug!(request_id = %request_id, path = %ctx.path(), "Dispatching request");
        ctx.extensions.insert(RequestId(request_id));
    }
}

fn propagated_id(ctx: &RequestContext) -> Option<String> {
    let value = ctx.headers.get(REQUEST_ID_HEADER)?.to_str().ok()?.trim();
    let acceptable = !value.is_empty()
        && value.len() <= MAX_REQUEST_ID_LEN
        && value.bytes().all(|b| b.is_ascii_graphic());
    acceptable.then(|| value.to_string())
}

impl Stage for RequestStamp {
    fn name(&self) -> &'static str {
        "request_stamp"
    }

    fn run<'a>(&'a self, ctx: &'a mut RequestContext) -> StageFuture<'a> {
        self.apply(ctx);
        Box::pin(std::future::ready(Outcome::Continue))
    }
}
