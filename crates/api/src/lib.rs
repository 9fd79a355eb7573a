//! `api` crate: HTTP REST API over the workflow engine.
//!
//! Exposes:
//!   POST   /api/v1/workflows                 publish a graph version
//!   GET    /api/v1/workflows/:id             latest plan of a graph
//!   POST   /api/v1/workflows/:id/events      emit a trigger event
//!   GET    /api/v1/instances/:id             instance state
//!   POST   /api/v1/instances/:id/cancel      cancel an instance
//!   GET    /api/v1/instances/:id/audit       audit trail

pub mod error;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::ApiError;
pub use handlers::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/workflows", post(handlers::workflows::publish))
        .route("/api/v1/workflows/:id", get(handlers::workflows::get_latest))
        .route("/api/v1/workflows/:id/events", post(handlers::events::emit))
        .route("/api/v1/instances/:id", get(handlers::instances::get))
        .route("/api/v1/instances/:id/cancel", post(handlers::instances::cancel))
        .route("/api/v1/instances/:id/audit", get(handlers::instances::audit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `bind` until `shutdown` is cancelled.
pub async fn serve(
    bind: &str,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(bind).await?;
    info!("API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use engine::{EngineConfig, MemoryAuditRecorder, MemoryInstanceStore, MemoryPlanStore, WorkflowExecutor};
    use nodes::mock::MockInvoker;
    use queue::MemoryScheduler;

    fn app() -> (Router, Arc<WorkflowExecutor>) {
        let executor = Arc::new(WorkflowExecutor::new(
            Arc::new(MemoryInstanceStore::new()),
            Arc::new(MemoryPlanStore::new()),
            Arc::new(MemoryScheduler::new()),
            Arc::new(MemoryAuditRecorder::new()),
            Arc::new(MockInvoker::succeeding()),
            EngineConfig::default(),
        ));
        (router(AppState::new(executor.clone())), executor)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    const GRAPH_ID: &str = "6f1c1c1e-5d59-4a4b-9c5e-0c8f0c1d2e3f";

    fn tag_graph() -> Value {
        json!({
            "id": GRAPH_ID,
            "version": 1,
            "name": "tagged",
            "nodes": [
                { "id": "start", "type": "trigger", "kind": "tag_added" },
                { "id": "tag", "type": "action",
                  "action": { "kind": "add_tag", "params": { "tag": "welcomed" } } }
            ],
            "edges": [ { "from": "start", "to": "tag" } ]
        })
    }

    #[tokio::test]
    async fn publish_then_emit_then_inspect() {
        let (app, executor) = app();

        let (status, plan) = send(&app, "POST", "/api/v1/workflows", Some(tag_graph())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(plan["order"], json!(["start", "tag"]));
        assert_eq!(plan["trigger"], "tag_added");

        let (status, emitted) = send(
            &app,
            "POST",
            &format!("/api/v1/workflows/{GRAPH_ID}/events"),
            Some(json!({ "trigger": "tag_added", "context": { "tags": ["new"] }, "dedupe_key": "e1" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = emitted["instance_id"].as_str().unwrap().to_owned();

        executor.poll_once().await.unwrap();

        let (status, instance) = send(&app, "GET", &format!("/api/v1/instances/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(instance["status"], "succeeded");

        let (_, trail) = send(&app, "GET", &format!("/api/v1/instances/{id}/audit"), None).await;
        assert_eq!(trail.as_array().map(Vec::len), Some(2));

        let (status, body) = send(&app, "POST", &format!("/api/v1/instances/{id}/cancel"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");
    }

    #[tokio::test]
    async fn invalid_graph_is_unprocessable() {
        let (app, _) = app();
        let mut graph = tag_graph();
        graph["edges"] = json!([{ "from": "start", "to": "nowhere" }]);

        let (status, body) = send(&app, "POST", "/api/v1/workflows", Some(graph)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "invalid_graph");
    }

    #[tokio::test]
    async fn wrong_trigger_and_unknown_ids_are_rejected() {
        let (app, _) = app();
        send(&app, "POST", "/api/v1/workflows", Some(tag_graph())).await;

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/v1/workflows/{GRAPH_ID}/events"),
            Some(json!({ "trigger": "manual" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/v1/workflows/{GRAPH_ID}/events"),
            Some(json!({ "trigger": "tag_added", "context": [1, 2] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "GET",
            "/api/v1/instances/00000000-0000-0000-0000-000000000000",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
