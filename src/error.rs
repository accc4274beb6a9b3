//! Failure types that flow from any pipeline stage or handler to the
//! [`ErrorHandler`](crate::error_handler::ErrorHandler).
//!
//! A failure is built once with its final shape and never patched afterwards:
//!
//! - [`AppError::Operational`] is an expected failure (bad input, not found,
//!   rate limited). Its message is safe to show to clients verbatim.
//! - [`AppError::Defect`] wraps an unexpected [`Defect`]. Its message is only
//!   shown in development mode.

use std::fmt;

use axum::http::StatusCode;
use thiserror::Error;

/// Structured failure propagated through the pipeline.
#[derive(Error, Debug)]
pub enum AppError {
    /// Expected, classifiable failure that is safe to expose.
    #[error("{message}")]
    Operational { status: StatusCode, message: String },

    /// Unexpected defect (bug, unhandled I/O error, panic, raw driver error).
    #[error(transparent)]
    Defect(#[from] Defect),
}

/// Raw defects raised by collaborators.
///
/// In production, the first five kinds are translated into operational
/// failures with a specific message. Everything else becomes a generic 500.
#[derive(Error, Debug)]
pub enum Defect {
    /// An identifier could not be cast to the store's id type.
    #[error("Cast to id failed for value \"{value}\" at path \"{path}\"")]
    MalformedId { path: String, value: String },

    /// A uniqueness constraint was violated.
    #[error("duplicate key error: {field} already holds {value}")]
    DuplicateKey { field: String, value: String },

    /// Document validation failed.
    #[error("validation failed: {}", .errors.join(", "))]
    Validation { errors: Vec<String> },

    /// A session/credential token could not be verified.
    #[error("invalid token signature")]
    InvalidToken,

    /// A session/credential token is past its expiry.
    #[error("token expired")]
    ExpiredToken,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stage or handler panicked.
    #[error("handler panicked: {0}")]
    Panic(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Defect {
    /// Short machine-readable name, used for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Defect::MalformedId { .. } => "malformed_id",
            Defect::DuplicateKey { .. } => "duplicate_key",
            Defect::Validation { .. } => "validation",
            Defect::InvalidToken => "invalid_token",
            Defect::ExpiredToken => "expired_token",
            Defect::Io(_) => "io",
            Defect::Panic(_) => "panic",
            Defect::Other(_) => "other",
        }
    }
}

/// Client-facing discriminator derived from the status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLabel {
    /// 4xx
    Fail,
    /// 5xx
    Error,
}

impl StatusLabel {
    pub fn for_status(status: StatusCode) -> Self {
        if status.is_client_error() {
            StatusLabel::Fail
        } else {
            StatusLabel::Error
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusLabel::Fail => "fail",
            StatusLabel::Error => "error",
        }
    }
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AppError {
    /// Build an operational failure with an explicit status.
    pub fn new(message: impl Into<String>, status: StatusCode) -> Self {
        AppError::Operational {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::BAD_REQUEST)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::UNAUTHORIZED)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::NOT_FOUND)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::PAYLOAD_TOO_LARGE)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::TOO_MANY_REQUESTS)
    }

    /// HTTP status this failure resolves to before any production rewriting.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Operational { status, .. } => *status,
            AppError::Defect(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn status_label(&self) -> StatusLabel {
        StatusLabel::for_status(self.status())
    }

    /// Whether the message may be shown to clients as-is.
    pub fn is_operational(&self) -> bool {
        matches!(self, AppError::Operational { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Operational { .. } => "operational",
            AppError::Defect(defect) => defect.kind(),
        }
    }

    /// Debug rendering plus the full `source()` chain.
    ///
    /// Only emitted in development responses.
    pub fn trace(&self) -> String {
        let mut trace = format!("{self:?}");
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            trace.push_str("\n    caused by: ");
            trace.push_str(&cause.to_string());
            source = cause.source();
        }
        trace
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Defect(Defect::Io(e))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Defect(Defect::Other(e))
    }
}

/// Configuration loading and validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
