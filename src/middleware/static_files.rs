//! Static asset serving from the public directory.
//!
//! `GET` and `HEAD` requests whose path names a file under the public root
//! are answered directly and end the pipeline. Anything the file service
//! cannot find, including names the filesystem rejects as too long,
//! continues to the routers. Path traversal, conditional
//! requests and ranges are handled by [`ServeDir`].

use std::io;
use std::path::PathBuf;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use tower_http::services::ServeDir;
use tracing::{debug, error};

use crate::context::RequestContext;
use crate::error::{AppError, Defect};
use crate::pipeline::{Outcome, Stage, StageFuture};

/// Static file stage.
#[derive(Debug, Clone)]
pub struct StaticAssets {
    service: ServeDir,
}

impl StaticAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            service: ServeDir::new(root.into()),
        }
    }

    async fn serve(&self, ctx: &mut RequestContext) -> Outcome {
        if ctx.method != Method::GET && ctx.method != Method::HEAD {
            return Outcome::Continue;
        }

        let mut req = Request::new(Body::empty());
        *req.method_mut() = ctx.method.clone();
        *req.uri_mut() = ctx.uri.clone();
        *req.headers_mut() = ctx.headers.clone();

        let mut service = self.service.clone();
        let response = match service.try_call(req).await {
            Ok(response) => response,
            Err(err) if is_missing(&err) => {
                debug!(path = %ctx.path(), error = %err, "No static asset at path");
                return Outcome::Continue;
            }
            Err(err) => {
                error!(path = %ctx.path(), error = %err, "Static file service failed");
                return Outcome::Fail(AppError::from(Defect::Io(err)));
            }
        };

        if response.status() == StatusCode::NOT_FOUND {
            return Outcome::Continue;
        }

        debug!(path = %ctx.path(), status = %response.status(), "Served static asset");
        Outcome::Respond(response.map(Body::new))
    }
}

/// Lookup errors that only mean "no such asset": the request moves on to
/// the routers.
fn is_missing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory | io::ErrorKind::InvalidFilename
    )
}

impl Stage for StaticAssets {
    fn name(&self) -> &'static str {
        "static_assets"
    }

    fn run<'a>(&'a self, ctx: &'a mut RequestContext) -> StageFuture<'a> {
        Box::pin(self.serve(ctx))
    }
}
