use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Error response body produced by the error handler.
///
/// `error` and `stack` are only present in development mode.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// `"fail"` for 4xx, `"error"` for 5xx
    pub status: &'static str,
    /// User-facing message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorBody {
    /// Body with only the discriminator and message.
    pub fn new(status: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error: None,
            stack: None,
        }
    }
}

/// Development-only description of the failure.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub status_code: u16,
    pub status: &'static str,
    pub is_operational: bool,
    pub kind: &'static str,
    pub description: String,
}

/// Success envelope used by resource handlers.
///
/// ```json
/// { "status": "success", "requestedAt": "...", "results": 2, "data": { "data": [...] } }
/// ```
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<usize>,
    pub data: EnvelopeData,
}

#[derive(Debug, Serialize)]
pub struct EnvelopeData {
    pub data: Value,
}

impl Envelope {
    pub fn success(data: Value) -> Self {
        Self {
            status: "success",
            requested_at: None,
            results: None,
            data: EnvelopeData { data },
        }
    }

    /// List payload; `results` is the number of items.
    pub fn list(items: Vec<Value>) -> Self {
        let results = items.len();
        Self {
            results: Some(results),
            ..Self::success(Value::Array(items))
        }
    }

    pub fn requested_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.requested_at = at;
        self
    }
}
