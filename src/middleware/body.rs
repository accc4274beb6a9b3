//! Bounded JSON body decoding.
//!
//! Only requests whose `Content-Type` is `application/json` or
//! `application/*+json` are read. Everything else leaves `ctx.body` as `{}`
//! and the raw body untouched for handlers that want it.
//!
//! The size cap is checked twice: against `Content-Length` before reading,
//! and while streaming, so chunked uploads cannot get past it either.

use axum::http::header;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde_json::{Map, Value};
use tracing::debug;

use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::pipeline::{Outcome, Stage, StageFuture};

/// Default cap: 10 KB.
pub const DEFAULT_LIMIT: usize = 10 * 1024;

pub const TOO_LARGE_MESSAGE: &str = "request entity too large";

/// JSON body decoding stage.
#[derive(Debug, Clone, Copy)]
pub struct BodyDecoder {
    limit: usize,
}

impl Default for BodyDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT)
    }
}

impl BodyDecoder {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    async fn decode(&self, ctx: &mut RequestContext) -> AppResult<()> {
        if !ctx.content_type().is_some_and(is_json) {
            return Ok(());
        }

        if let Some(declared) = ctx.headers.get(header::CONTENT_LENGTH)
            && let Ok(declared) = declared.to_str()
            && let Ok(declared) = declared.trim().parse::<u64>()
            && declared > self.limit as u64
        {
            debug!(declared, limit = self.limit, "Rejecting body by Content-Length");
            return Err(AppError::payload_too_large(TOO_LARGE_MESSAGE));
        }

        let Some(raw) = ctx.take_raw_body() else {
            return Ok(());
        };

        let bytes = match Limited::new(raw, self.limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
                debug!(limit = self.limit, "Body exceeded limit while streaming");
                return Err(AppError::payload_too_large(TOO_LARGE_MESSAGE));
            }
            Err(err) => {
                debug!(error = %err, "Failed to read request body");
                return Err(AppError::bad_request("request aborted"));
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            ctx.body = Value::Object(Map::new());
            return Ok(());
        }

        let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
            // Position only: never echo the payload back.
            AppError::bad_request(format!(
                "Invalid JSON body at line {}, column {}",
                e.line(),
                e.column()
            ))
        })?;

        if !(value.is_object() || value.is_array()) {
            return Err(AppError::bad_request(
                "Invalid JSON body: expected an object or an array",
            ));
        }

        ctx.body = value;
        Ok(())
    }
}

/// `application/json` or any `application/*+json`, parameters ignored.
fn is_json(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    essence == "application/json"
        || (essence.starts_with("application/") && essence.ends_with("+json"))
}

impl Stage for BodyDecoder {
    fn name(&self) -> &'static str {
        "body_decoder"
    }

    fn run<'a>(&'a self, ctx: &'a mut RequestContext) -> StageFuture<'a> {
        Box::pin(async move {
            match self.decode(ctx).await {
                Ok(()) => Outcome::Continue,
                Err(err) => Outcome::Fail(err),
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::Request;
    use axum::http::StatusCode;
    use serde_json::json;

    fn json_ctx(content_type: &str, body: impl Into<Body>) -> RequestContext {
        RequestContext::from_request(
            Request::builder()
                .method("POST")
                .uri("/api/v1/tours")
                .header(header::CONTENT_TYPE, content_type)
                .body(body.into())
                .unwrap(),
            "ip",
        )
    }

    async fn fail_status(decoder: BodyDecoder, ctx: &mut RequestContext) -> (StatusCode, String) {
        match decoder.run(ctx).await {
            Outcome::Fail(err) => (err.status(), err.to_string()),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_is_json() {
        assert!(is_json("application/json"));
        assert!(is_json("application/json; charset=utf-8"));
        assert!(is_json("Application/JSON"));
        assert!(is_json("application/vnd.api+json"));
        assert!(!is_json("text/plain"));
        assert!(!is_json("application/x-www-form-urlencoded"));
    }

    #[tokio::test]
    async fn test_decodes_object() {
        let mut ctx = json_ctx("application/json", r#"{"name":"The Forest Hiker","price":397}"#);
        let outcome = BodyDecoder::default().run(&mut ctx).await;

        assert!(matches!(outcome, Outcome::Continue));
        assert_eq!(ctx.body, json!({"name": "The Forest Hiker", "price": 397}));
    }

    #[tokio::test]
    async fn test_empty_body_is_empty_object() {
        let mut ctx = json_ctx("application/json", "  \n");
        assert!(matches!(
            BodyDecoder::default().run(&mut ctx).await,
            Outcome::Continue
        ));
        assert_eq!(ctx.body, json!({}));
    }

    #[tokio::test]
    async fn test_non_json_left_alone() {
        let mut ctx = json_ctx("text/plain", "hello");
        assert!(matches!(
            BodyDecoder::default().run(&mut ctx).await,
            Outcome::Continue
        ));
        assert_eq!(ctx.body, json!({}));
        assert!(ctx.take_raw_body().is_some());
    }

    #[tokio::test]
    async fn test_oversize_body_rejected_while_streaming() {
        let payload = format!(r#"{{"description":"{}"}}"#, "x".repeat(DEFAULT_LIMIT));
        let mut ctx = json_ctx("application/json", payload);

        let (status, message) = fail_status(BodyDecoder::default(), &mut ctx).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(message, TOO_LARGE_MESSAGE);
    }

    #[tokio::test]
    async fn test_oversize_content_length_rejected_up_front() {
        let mut ctx = RequestContext::from_request(
            Request::builder()
                .method("POST")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::CONTENT_LENGTH, "20000")
                .body(Body::from("{}"))
                .unwrap(),
            "ip",
        );

        let (status, _) = fail_status(BodyDecoder::default(), &mut ctx).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        // Nothing was read.
        assert!(ctx.take_raw_body().is_some());
    }

    #[tokio::test]
    async fn test_exactly_at_limit_is_accepted() {
        let filler = "x".repeat(DEFAULT_LIMIT - r#"{"a":""}"#.len());
        let payload = format!(r#"{{"a":"{filler}"}}"#);
        assert_eq!(payload.len(), DEFAULT_LIMIT);

        let mut ctx = json_ctx("application/json", payload);
        assert!(matches!(
            BodyDecoder::default().run(&mut ctx).await,
            Outcome::Continue
        ));
    }

    #[tokio::test]
    async fn test_malformed_json_does_not_echo_payload() {
        let mut ctx = json_ctx("application/json", r#"{"password": "hunter2""#);
        let (status, message) = fail_status(BodyDecoder::default(), &mut ctx).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(message.starts_with("Invalid JSON body"));
        assert!(!message.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_strict_mode_rejects_scalars() {
        let mut ctx = json_ctx("application/json", "\"just a string\"");
        let (status, _) = fail_status(BodyDecoder::default(), &mut ctx).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut ctx = json_ctx("application/json", "[1, 2]");
        assert!(matches!(
            BodyDecoder::default().run(&mut ctx).await,
            Outcome::Continue
        ));
    }
}
