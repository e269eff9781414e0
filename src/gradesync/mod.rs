//! GradeSync upstream integration
//!
//! Types and the trait the rest of the relay uses to talk to the external
//! grade-sync service, plus the reqwest-backed implementation and the
//! progress-stream decoder.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use utoipa::ToSchema;

pub mod client;
pub mod stream;

pub use client::GradeSyncClient;
pub use stream::{NdjsonDecoder, ProgressUpdate, StreamEvent};

/// Failures talking to the GradeSync service
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The call exceeded its deadline
    #[error("GradeSync request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Non-success status; body captured verbatim
    #[error("GradeSync returned status {status}: {body}")]
    Http { status: u16, body: String },

    /// Response was not the JSON we expected
    #[error("GradeSync returned an invalid response: {0}")]
    Protocol(String),

    /// The progress stream carried an `error` event
    #[error("{message}")]
    StreamError { message: String },

    /// The streaming endpoint does not exist on this GradeSync deployment
    #[error("GradeSync streaming endpoint is not available")]
    StreamUnavailable,

    /// Connection-level failure (refused, reset, TLS, ...)
    #[error("GradeSync request failed: {0}")]
    Network(#[source] reqwest::Error),
}

impl UpstreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, UpstreamError::Timeout { .. })
    }

    /// Protocol-class failures: undecodable bodies and stream `error` events.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            UpstreamError::Protocol(_) | UpstreamError::StreamError { .. }
        )
    }
}

/// Individual grade sources GradeSync can sync on their own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SyncSource {
    Gradescope,
    Prairielearn,
    Iclicker,
}

impl SyncSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncSource::Gradescope => "gradescope",
            SyncSource::Prairielearn => "prairielearn",
            SyncSource::Iclicker => "iclicker",
        }
    }
}

impl std::str::FromStr for SyncSource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "gradescope" => Ok(SyncSource::Gradescope),
            "prairielearn" => Ok(SyncSource::Prairielearn),
            "iclicker" => Ok(SyncSource::Iclicker),
            other => Err(format!("unknown sync source: {other}")),
        }
    }
}

/// Operations the relay needs from GradeSync.
#[async_trait]
pub trait SyncUpstream: Send + Sync {
    /// List configured courses.
    async fn list_courses(&self) -> Result<JsonValue, UpstreamError>;

    /// Run a full course sync and wait for its result (non-streaming).
    async fn sync_course(&self, course_id: &str) -> Result<JsonValue, UpstreamError>;

    /// Run a single-source sync and wait for its result.
    async fn sync_source(
        &self,
        course_id: &str,
        source: SyncSource,
    ) -> Result<JsonValue, UpstreamError>;

    /// Run a full course sync over the progress stream.
    ///
    /// `on_progress` is invoked for every `progress` event. Resolves with the
    /// last `final` result, or an empty object if the stream closed cleanly
    /// without one.
    async fn stream_course_sync(
        &self,
        course_id: &str,
        on_progress: &mut (dyn FnMut(ProgressUpdate) + Send),
    ) -> Result<JsonValue, UpstreamError>;
}
