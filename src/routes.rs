//! Pipeline assembly and the axum service around it.
//!
//! # Pipeline (stages run in order)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │ Security Headers │ ← always, also on errors
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded (only under RATE_LIMIT_SCOPE)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Body Decoder   │ ← 413 / 400
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │    Sanitizer     │ ← strips operator keys, escapes markup
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Deduplicator    │ ← collapses repeated query keys
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Static Assets   │ ← responds with a file when one exists
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Request Stamp   │ ← request time + X-Request-Id
//! └────────┬─────────┘
//!          ▼
//!   Route table → 404
//! ```
//!
//! # Service Layers
//!
//! The pipeline runs inside one axum fallback handler. Around it:
//! panic recovery (rendered by the same error handler) and, in development
//! mode only, the HTTP request logger.

use std::any::Any;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::response::Response;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::error::{AppError, Defect};
use crate::error_handler::ErrorHandler;
use crate::middleware::{
    BodyDecoder, MemoryStore, ParameterDeduplicator, RateLimitError, RateLimiter, RequestStamp,
    Sanitizer, SecurityHeaders, StaticAssets, TrustedProxyConfig,
};
use crate::pipeline::Pipeline;
use crate::routing::RouteTable;
use crate::state::AppState;
use crate::utils::panic_message;

/// Assemble the stage list around `routes`.
///
/// The limiter stage shares `store` with [`AppState`], which sweeps it.
///
/// # Errors
///
/// Returns [`RateLimitError`] if the rate limit configuration is invalid.
pub fn build_pipeline(
    config: &Config,
    routes: RouteTable,
    store: Arc<MemoryStore>,
) -> Result<Arc<Pipeline>, RateLimitError> {
    let errors = ErrorHandler::new(config.environment.verbosity());
    let mut builder = Pipeline::builder(errors)
        .trusted_proxies(TrustedProxyConfig::new(&config.trusted_proxies))
        .stage(SecurityHeaders::default());

    if config.rate_limiting_enabled() {
        let limit = config.rate_limit_config();
        RateLimiter::validate(&limit)?;
        info!(
            max = limit.max,
            window_ms = limit.window.as_millis() as u64,
            scope = %limit.scope_path,
            trusted_proxies = config.trusted_proxies.len(),
            "Rate limiting enabled"
        );
        builder = builder.scoped(
            limit.scope_path.clone(),
            RateLimiter::with_store(&limit, store),
        );
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_MAX=0)");
    }

    info!(
        max_body_bytes = config.max_body_bytes,
        public_dir = %config.public_dir.display(),
        "Input handling configured"
    );

    let pipeline = builder
        .stage(BodyDecoder::new(config.max_body_bytes))
        .stage(Sanitizer::new())
        .stage(ParameterDeduplicator::new(config.hpp_whitelist.iter().cloned()))
        .stage(StaticAssets::new(&config.public_dir))
        .stage(RequestStamp::new())
        .routes(routes)
        .build();

    info!(stages = ?pipeline.stage_names(), "Pipeline built");
    Ok(pipeline)
}

/// Wrap the pipeline in an axum router.
pub fn build_router(state: AppState) -> Router {
    let errors = *state.pipeline.error_handler();
    let headers = SecurityHeaders::default();
    let development = state.config.is_development();

    let mut router = Router::new()
        .fallback(run_pipeline)
        .with_state(state)
        .layer(CatchPanicLayer::custom(move |panic: Box<dyn Any + Send>| {
            render_panic(errors, &headers, panic)
        }));

    // The request logger only exists in development mode.
    if development {
        info!("Request logging enabled (development mode)");
        router = router.layer(TraceLayer::new_for_http());
    }

    router
}

async fn run_pipeline(State(state): State<AppState>, req: Request) -> Response {
    state.pipeline.handle(req).await
}

fn render_panic(errors: ErrorHandler, headers: &SecurityHeaders, panic: Box<dyn Any + Send>) -> Response {
    let err = AppError::from(Defect::Panic(panic_message(panic.as_ref())));
    let mut response = errors.render(err);
    headers.apply(response.headers_mut());
    response
}
