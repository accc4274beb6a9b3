//! # Resource Gateway
//!
//! The request-processing entry point of a resource-oriented HTTP service:
//! an explicit, ordered middleware pipeline in front of resource routers,
//! with one centralized error handler.
//!
//! - **Security**: protective headers, per-client rate limiting, operator-key
//!   and markup sanitization, parameter pollution protection
//! - **Bounded input**: JSON bodies capped before any handler runs
//! - **One failure path**: every error, expected or not, is rendered by
//!   [`ErrorHandler`](error_handler::ErrorHandler)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Panic recovery → (dev) request logger                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Pipeline: headers → rate limit → body → sanitize → hpp     │
//! │            → static files → stamp                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RouteTable (tours, users, reviews) → not found             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ErrorHandler (verbose in development, minimal otherwise)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resource_gateway::{AppState, Config, build_router, handlers, routing::RouteTable};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let routes = handlers::mount_collections(RouteTable::new())?;
//!
//!     let state = AppState::new(config, routes)?;
//!     let app = build_router(state);
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```
//!
//! ## Modes
//!
//! ```bash
//! APP_ENV=development cargo run   # stack traces in error bodies, request log
//! APP_ENV=production cargo run    # generic messages for unexpected failures
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod error_handler;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod routes;
pub mod routing;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use config::{Config, Environment};
pub use context::RequestContext;
pub use error::{AppError, AppResult, Defect};
pub use pipeline::{Outcome, Pipeline, Stage};
pub use routes::{build_pipeline, build_router};
pub use state::AppState;
