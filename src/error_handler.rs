//! The terminal stage: every failure becomes exactly one JSON response here.
//!
//! # Modes
//!
//! - [`Verbosity::Verbose`] (development): the failure's own status and
//!   message, plus an `error` detail object and a `stack` trace.
//! - [`Verbosity::Minimal`] (production): known defect kinds are rewritten
//!   into operational failures with a safe message; anything still
//!   non-operational becomes a generic 500. Internals never leave the process.
//!
//! # Response Body
//!
//! ```json
//! { "status": "fail", "message": "Can't find /nope on this server!" }
//! ```

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error, warn};

use crate::error::{AppError, Defect, StatusLabel};
use crate::metrics;
use crate::models::{ErrorBody, ErrorDetail};

/// Message sent for any defect that survives production classification.
pub const GENERIC_MESSAGE: &str = "Something went very wrong!";

/// How much of a failure is shown to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Development: full detail and trace.
    Verbose,
    /// Production: operational messages only.
    Minimal,
}

/// Renders failures into responses according to the configured verbosity.
#[derive(Debug, Clone, Copy)]
pub struct ErrorHandler {
    verbosity: Verbosity,
}

impl ErrorHandler {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Classify `err` and build the final response.
    pub fn render(&self, err: AppError) -> Response {
        metrics::record_failure(err.kind());

        let (status, body) = match self.verbosity {
            Verbosity::Verbose => verbose_body(&err),
            Verbosity::Minimal => minimal_body(err),
        };

        (status, Json(body)).into_response()
    }
}

fn verbose_body(err: &AppError) -> (StatusCode, ErrorBody) {
    let status = err.status();
    if err.is_operational() {
        debug!(status = %status, error = %err, "operational failure");
    } else {
        error!(status = %status, kind = err.kind(), error = ?err, "unexpected failure");
    }

    let label = err.status_label();
    let body = ErrorBody {
        status: label.as_str(),
        message: err.to_string(),
        error: Some(ErrorDetail {
            status_code: status.as_u16(),
            status: label.as_str(),
            is_operational: err.is_operational(),
            kind: err.kind(),
            description: err.to_string(),
        }),
        stack: Some(err.trace()),
    };
    (status, body)
}

fn minimal_body(err: AppError) -> (StatusCode, ErrorBody) {
    match classify(err) {
        AppError::Operational { status, message } => {
            if status.is_server_error() {
                warn!(status = %status, message = %message, "operational server failure");
            } else {
                debug!(status = %status, message = %message, "operational failure");
            }
            (status, ErrorBody::new(StatusLabel::for_status(status).as_str(), message))
        }
        AppError::Defect(defect) => {
            // The only place the detail goes is the server log.
            error!(kind = defect.kind(), error = ?defect, "unexpected failure");
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            (
                status,
                ErrorBody::new(StatusLabel::for_status(status).as_str(), GENERIC_MESSAGE),
            )
        }
    }
}

/// Rewrite known defect kinds into operational failures.
///
/// Operational failures and unknown defects pass through untouched.
pub fn classify(err: AppError) -> AppError {
    let defect = match err {
        AppError::Defect(defect) => defect,
        operational => return operational,
    };

    match defect {
        Defect::MalformedId { path, value } => {
            AppError::bad_request(format!("Invalid {path}: {value}."))
        }
        Defect::DuplicateKey { value, .. } => AppError::bad_request(format!(
            "Duplicate field value: {value}. Please use another value!"
        )),
        Defect::Validation { errors } => {
            AppError::bad_request(format!("Invalid input data. {}", errors.join(". ")))
        }
        Defect::InvalidToken => AppError::unauthorized("Invalid token. Please log in again!"),
        Defect::ExpiredToken => {
            AppError::unauthorized("Your token has expired! Please log in again.")
        }
        other => AppError::Defect(other),
    }
}
