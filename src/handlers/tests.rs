//! # Tests for Handlers
//!
//! Request-level tests driving the router with `oneshot` against a stub
//! upstream.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::gradesync::{ProgressUpdate, SyncSource, SyncUpstream, UpstreamError};
use crate::models::ServiceInfo;
use crate::models::sync_job::{JobStatus, SyncJob};
use crate::server::{AppState, create_app};

/// How the stub answers pass-through calls
#[derive(Clone, Copy)]
enum Reply {
    Ok,
    Timeout,
    ServerError,
}

struct StubUpstream {
    reply: Reply,
}

impl StubUpstream {
    fn answer(&self, body: Value) -> Result<Value, UpstreamError> {
        match self.reply {
            Reply::Ok => Ok(body),
            Reply::Timeout => Err(UpstreamError::Timeout { timeout_ms: 60_000 }),
            Reply::ServerError => Err(UpstreamError::Http {
                status: 500,
                body: "upstream exploded".to_string(),
            }),
        }
    }
}

#[async_trait]
impl SyncUpstream for StubUpstream {
    async fn list_courses(&self) -> Result<Value, UpstreamError> {
        self.answer(json!({"courses": [{"id": "101"}], "total": 1}))
    }

    async fn sync_course(&self, course_id: &str) -> Result<Value, UpstreamError> {
        self.answer(json!({"course": course_id, "synced": 3}))
    }

    async fn sync_source(&self, course_id: &str, source: SyncSource) -> Result<Value, UpstreamError> {
        self.answer(json!({"course": course_id, "source": source.as_str()}))
    }

    async fn stream_course_sync(
        &self,
        _course_id: &str,
        _on_progress: &mut (dyn FnMut(ProgressUpdate) + Send),
    ) -> Result<Value, UpstreamError> {
        // Keep jobs active so deduplication is observable.
        std::future::pending().await
    }
}

fn app_with(reply: Reply) -> (Router, AppState) {
    let state = AppState::with_upstream(
        AppConfig::default(),
        Arc::new(StubUpstream { reply }),
    );
    (create_app(state.clone()), state)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_root_handler_returns_expected_service_info() {
    let (app, _) = app_with(Reply::Ok);

    let response = app.oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let info: ServiceInfo = serde_json::from_value(json_body(response).await).unwrap();
    assert_eq!(info.service, "gradesync-relay");
    assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_healthz_reports_ok() {
    let (app, _) = app_with(Reply::Ok);

    let response = app.oneshot(get("/healthz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_list_courses_passes_upstream_json_through() {
    let (app, _) = app_with(Reply::Ok);

    let response = app.oneshot(get("/sync")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["courses"][0]["id"], "101");
}

#[tokio::test]
async fn test_list_courses_timeout_maps_to_504() {
    let (app, _) = app_with(Reply::Timeout);

    let response = app.oneshot(get("/sync")).await.unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/problem+json"
    );
    let body = json_body(response).await;
    assert_eq!(body["code"], "UPSTREAM_TIMEOUT");
}

#[tokio::test]
async fn test_sync_course_upstream_failure_maps_to_502() {
    let (app, _) = app_with(Reply::ServerError);

    let response = app.oneshot(post("/sync/101")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["code"], "UPSTREAM_ERROR");
    assert_eq!(body["details"]["status"], 500);
    assert_eq!(body["details"]["body_snippet"], "upstream exploded");
}

#[tokio::test]
async fn test_sync_course_returns_upstream_result() {
    let (app, _) = app_with(Reply::Ok);

    let response = app.oneshot(post("/sync/101")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"course": "101", "synced": 3})
    );
}

#[tokio::test]
async fn test_sync_source_accepts_known_sources_only() {
    let (app, _) = app_with(Reply::Ok);

    let ok = app
        .clone()
        .oneshot(post("/sync/101/sources/prairielearn"))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    assert_eq!(json_body(ok).await["source"], "prairielearn");

    let bad = app
        .oneshot(post("/sync/101/sources/canvas"))
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    let body = json_body(bad).await;
    assert_eq!(body["code"], "VALIDATION_FAILED");
    assert_eq!(body["details"]["source"], "canvas");
}

#[tokio::test]
async fn test_start_returns_202_and_deduplicates() {
    let (app, state) = app_with(Reply::Ok);

    let first = app.clone().oneshot(post("/sync/101/start")).await.unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let first: SyncJob = serde_json::from_value(json_body(first).await).unwrap();
    assert_eq!(first.course_id, "101");
    assert_eq!(first.status, JobStatus::Queued);

    let second = app.clone().oneshot(post("/sync/101/start")).await.unwrap();
    assert_eq!(second.status(), StatusCode::ACCEPTED);
    let second: SyncJob = serde_json::from_value(json_body(second).await).unwrap();
    assert_eq!(first.id, second.id);

    assert_eq!(state.store().len(), 1);
}

#[tokio::test]
async fn test_course_id_jobs_is_rejected_as_reserved() {
    let (app, state) = app_with(Reply::Ok);

    for uri in ["/sync/jobs", "/sync/jobs/start", "/sync/%20jobs%20/start"] {
        let response = app.clone().oneshot(post(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        let body = json_body(response).await;
        assert_eq!(body["code"], "VALIDATION_FAILED", "{uri}");
        assert_eq!(body["details"]["course_id"], "jobs", "{uri}");
    }

    assert!(state.store().is_empty());

    let listing = app.oneshot(get("/sync/jobs")).await.unwrap();
    assert_eq!(listing.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_get_job_returns_snapshot() {
    let (app, _) = app_with(Reply::Ok);

    let started = app.clone().oneshot(post("/sync/101/start")).await.unwrap();
    let started: SyncJob = serde_json::from_value(json_body(started).await).unwrap();

    let response = app
        .oneshot(get(&format!("/sync/jobs/{}", started.id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["id"], started.id.to_string());
    assert_eq!(body["courseId"], "101");
}

#[tokio::test]
async fn test_unknown_job_returns_404() {
    let (app, _) = app_with(Reply::Ok);

    for uri in [
        format!("/sync/jobs/{}", Uuid::new_v4()),
        "/sync/jobs/not-a-uuid".to_string(),
    ] {
        let response = app.clone().oneshot(get(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Sync job not found");
    }
}

#[tokio::test]
async fn test_list_jobs_filters_by_course_and_status() {
    let (app, _) = app_with(Reply::Ok);

    for course in ["101", "202"] {
        let response = app
            .clone()
            .oneshot(post(&format!("/sync/{course}/start")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let all = json_body(app.clone().oneshot(get("/sync/jobs")).await.unwrap()).await;
    assert_eq!(all["jobs"].as_array().unwrap().len(), 2);

    let one = json_body(
        app.clone()
            .oneshot(get("/sync/jobs?course_id=202"))
            .await
            .unwrap(),
    )
    .await;
    let jobs = one["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["courseId"], "202");

    let none = json_body(
        app.clone()
            .oneshot(get("/sync/jobs?status=completed"))
            .await
            .unwrap(),
    )
    .await;
    assert!(none["jobs"].as_array().unwrap().is_empty());

    let bad = app
        .oneshot(get("/sync/jobs?status=succeeded"))
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_request_id_is_echoed_and_attached_to_errors() {
    let (app, _) = app_with(Reply::Ok);

    let request = Request::builder()
        .method("GET")
        .uri(format!("/sync/jobs/{}", Uuid::new_v4()))
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-42");
    let body = json_body(response).await;
    assert_eq!(body["trace_id"], "req-42");
}

#[tokio::test]
async fn test_openapi_document_lists_sync_routes() {
    let (app, _) = app_with(Reply::Ok);

    let response = app.oneshot(get("/openapi.json")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let doc = json_body(response).await;
    assert!(doc["paths"]["/sync/{course_id}/start"]["post"].is_object());
    assert!(doc["paths"]["/sync/jobs/{job_id}"]["get"].is_object());
}
