//! Reqwest-backed GradeSync client
//!
//! Two call shapes: a plain request/response [`GradeSyncClient::call`] and a
//! long-lived POST whose body is the NDJSON progress stream
//! ([`GradeSyncClient::stream`]). Each carries its own deadline, enforced by
//! reqwest over the whole exchange including the body.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Method, StatusCode, header::ACCEPT};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::AppConfig;
use crate::gradesync::{
    NdjsonDecoder, ProgressUpdate, StreamEvent, SyncSource, SyncUpstream, UpstreamError,
};

const NDJSON_MIME: &str = "application/x-ndjson";

/// HTTP client for the GradeSync API
#[derive(Debug, Clone)]
pub struct GradeSyncClient {
    http: Client,
    base_url: Url,
    courses_timeout: Duration,
    sync_timeout: Duration,
}

impl GradeSyncClient {
    /// Create a client against `base_url` with explicit timeouts.
    pub fn new(base_url: Url, courses_timeout: Duration, sync_timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            base_url,
            courses_timeout,
            sync_timeout,
        }
    }

    /// Create a client from application configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, url::ParseError> {
        Ok(Self::new(
            config.upstream_url()?,
            Duration::from_millis(config.courses_timeout_ms),
            Duration::from_millis(config.sync_timeout_ms),
        ))
    }

    /// Build `{base}/seg/seg/...`, percent-encoding each segment.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, UpstreamError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                UpstreamError::Protocol(format!(
                    "base URL {} cannot carry a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// One request/response exchange expecting a JSON body.
    pub async fn call(
        &self,
        method: Method,
        url: Url,
        body: Option<&JsonValue>,
        timeout: Duration,
    ) -> Result<JsonValue, UpstreamError> {
        let timeout_ms = timeout.as_millis() as u64;
        let started = Instant::now();
        debug!(%method, %url, timeout_ms, "Calling GradeSync");

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .timeout(timeout)
            .header(ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| classify(err, timeout_ms))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| classify(err, timeout_ms))?;

        debug!(
            %method,
            %url,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "GradeSync call finished"
        );

        if !status.is_success() {
            warn!(%url, status = status.as_u16(), "GradeSync returned non-success status");
            return Err(UpstreamError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text)
            .map_err(|err| UpstreamError::Protocol(format!("expected a JSON body: {err}")))
    }

    /// Open the progress stream at `url` and consume it to the end.
    pub async fn stream(
        &self,
        url: Url,
        on_progress: &mut (dyn FnMut(ProgressUpdate) + Send),
    ) -> Result<JsonValue, UpstreamError> {
        let timeout_ms = self.sync_timeout.as_millis() as u64;
        info!(%url, timeout_ms, "Opening GradeSync progress stream");

        let response = self
            .http
            .post(url.clone())
            .timeout(self.sync_timeout)
            .header(ACCEPT, NDJSON_MIME)
            .send()
            .await
            .map_err(|err| classify(err, timeout_ms))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            info!(%url, "GradeSync has no streaming endpoint");
            return Err(UpstreamError::StreamUnavailable);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|err| classify(err, timeout_ms))?;
            return Err(UpstreamError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let mut decoder = NdjsonDecoder::new();
        let mut final_result = None;
        let mut chunks = response.bytes_stream();

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|err| classify(err, timeout_ms))?;
            for event in decoder.push(&chunk) {
                // Returning early drops `chunks`, which closes the connection.
                handle_event(event, &mut final_result, on_progress)?;
            }
        }
        for event in decoder.finish() {
            handle_event(event, &mut final_result, on_progress)?;
        }

        match final_result {
            Some(result) => Ok(result),
            None => {
                warn!(%url, "GradeSync stream closed without a final event");
                Ok(json!({}))
            }
        }
    }
}

fn handle_event(
    event: StreamEvent,
    final_result: &mut Option<JsonValue>,
    on_progress: &mut (dyn FnMut(ProgressUpdate) + Send),
) -> Result<(), UpstreamError> {
    match event {
        StreamEvent::Heartbeat | StreamEvent::Unknown => Ok(()),
        StreamEvent::Progress(update) => {
            on_progress(update);
            Ok(())
        }
        StreamEvent::Final { result } => {
            *final_result = Some(result);
            Ok(())
        }
        error @ StreamEvent::Error { .. } => {
            let message = error
                .error_message()
                .unwrap_or_else(|| "GradeSync reported an error".to_string());
            warn!(error = %message, "GradeSync stream reported an error");
            Err(UpstreamError::StreamError { message })
        }
    }
}

fn classify(err: reqwest::Error, timeout_ms: u64) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout { timeout_ms }
    } else if err.is_decode() {
        UpstreamError::Protocol(err.to_string())
    } else {
        UpstreamError::Network(err)
    }
}

#[async_trait]
impl SyncUpstream for GradeSyncClient {
    async fn list_courses(&self) -> Result<JsonValue, UpstreamError> {
        let url = self.endpoint(&["api", "courses"])?;
        self.call(Method::GET, url, None, self.courses_timeout).await
    }

    async fn sync_course(&self, course_id: &str) -> Result<JsonValue, UpstreamError> {
        let url = self.endpoint(&["api", "sync", course_id])?;
        self.call(Method::POST, url, None, self.sync_timeout).await
    }

    async fn sync_source(
        &self,
        course_id: &str,
        source: SyncSource,
    ) -> Result<JsonValue, UpstreamError> {
        let url = self.endpoint(&["api", "sync", course_id, source.as_str()])?;
        self.call(Method::POST, url, None, self.sync_timeout).await
    }

    async fn stream_course_sync(
        &self,
        course_id: &str,
        on_progress: &mut (dyn FnMut(ProgressUpdate) + Send),
    ) -> Result<JsonValue, UpstreamError> {
        let url = self.endpoint(&["api", "sync", course_id, "stream"])?;
        self.stream(url, on_progress).await
    }
}
