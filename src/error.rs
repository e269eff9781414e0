//! # Error Handling
//!
//! Unified error responses for the relay API: a problem+json body carrying a
//! machine-readable `code`, the human message under `error`, optional details
//! and the request trace id.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::gradesync::UpstreamError;
use crate::sync_service::StartupError;
use crate::telemetry;

/// Longest upstream body excerpt echoed back to clients.
const BODY_SNIPPET_CHARS: usize = 200;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    #[schema(example = "NOT_FOUND")]
    pub code: Box<str>,
    /// Human-readable error message
    #[serde(rename = "error")]
    #[schema(example = "Sync job not found")]
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Trace id of the request being served, or a generated correlation id
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

/// Upstream failure information echoed in error details
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpstreamErrorDetails {
    /// HTTP status code from GradeSync, when it answered
    pub status: Option<u16>,
    /// Response body snippet from GradeSync (truncated)
    pub body_snippet: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<UpstreamError> for ApiError {
    fn from(error: UpstreamError) -> Self {
        match error {
            UpstreamError::Timeout { timeout_ms } => {
                tracing::warn!(timeout_ms, "GradeSync request timed out");
                ApiError::new(
                    StatusCode::GATEWAY_TIMEOUT,
                    "UPSTREAM_TIMEOUT",
                    "GradeSync did not respond in time",
                )
                .with_details(json!({ "timeout_ms": timeout_ms }))
            }
            UpstreamError::Http { status, body } => upstream_error(Some(status), Some(body)),
            other => {
                tracing::error!(error = %other, "GradeSync request failed");
                ApiError::new(
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_ERROR",
                    &other.to_string(),
                )
            }
        }
    }
}

impl From<StartupError> for ApiError {
    fn from(error: StartupError) -> Self {
        tracing::error!(error = %error, "Sync job could not be started");
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "SYNC_START_FAILED",
            &error.to_string(),
        )
    }
}

/// Create a gateway-failure error for a non-success GradeSync response
pub fn upstream_error(status: Option<u16>, body: Option<String>) -> ApiError {
    let details = UpstreamErrorDetails {
        status,
        body_snippet: body.map(|b| {
            if b.chars().count() > BODY_SNIPPET_CHARS {
                let truncated: String = b.chars().take(BODY_SNIPPET_CHARS).collect();
                format!("{}...", truncated)
            } else {
                b
            }
        }),
    };

    let message = match status {
        Some(status) => format!("GradeSync returned error status {}", status),
        None => "GradeSync request failed".to_string(),
    };

    ApiError::new(StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", &message).with_details(json!(details))
}

/// Create the 404 returned for unknown job ids
pub fn job_not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Sync job not found")
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}
