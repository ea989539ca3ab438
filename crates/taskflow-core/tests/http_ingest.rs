use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use taskflow_core::config::IngestConfig;
use taskflow_core::http::build_router;
use taskflow_core::impls::memory::{Fault, InMemoryTaskStore};
use taskflow_core::ingest::IngestEndpoint;
use tower::ServiceExt;

const CONN: &str = "Server=tcp:db.internal,5432;Initial Catalog=tasks;User ID=ingest;Password=hunter2;Encrypt=True;";

fn app(conn: Option<&str>, store: Arc<InMemoryTaskStore>) -> Router {
    let mut config = IngestConfig::new(CONN);
    config.connection_string = conn.map(str::to_string);
    build_router(IngestEndpoint::new(Arc::new(config), store))
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .expect("request")
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    (status, String::from_utf8(bytes.to_vec()).expect("utf8"))
}

#[tokio::test]
async fn accepted_task_is_echoed() {
    let store = Arc::new(InMemoryTaskStore::new());

    let (status, body) = send(
        app(Some(CONN), store.clone()),
        post("/api/tasks", r#"{"task": "do something"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Task added: do something");
    let rows = store.rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].payload, "do something");
    assert!(!rows[0].processed);
}

#[tokio::test]
async fn legacy_trigger_path_is_routed() {
    let store = Arc::new(InMemoryTaskStore::new());

    let (status, _) = send(
        app(Some(CONN), store.clone()),
        post("/api/HttpTrigger", r#"{"task": "x"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn invalid_json_is_bad_request() {
    let store = Arc::new(InMemoryTaskStore::new());

    let (status, body) = send(app(Some(CONN), store.clone()), post("/api/tasks", "{task:")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Invalid JSON");
    assert_eq!(store.calls().await, 0);
}

#[tokio::test]
async fn missing_task_is_bad_request() {
    let store = Arc::new(InMemoryTaskStore::new());

    let (status, body) = send(
        app(Some(CONN), store.clone()),
        post("/api/tasks", r#"{"task": ""}"#),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Missing 'task'");
    assert_eq!(store.calls().await, 0);
}

#[tokio::test]
async fn unparsable_connection_string_is_internal_error() {
    let store = Arc::new(InMemoryTaskStore::new());
    let conn = "Server=tcp:db.internal,5432;Initial Catalog=tasks;Password=hunter2";

    let (status, body) = send(
        app(Some(conn), store.clone()),
        post("/api/tasks", r#"{"task": "x"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Invalid connection string format");
    assert_eq!(store.calls().await, 0);
}

#[tokio::test(start_paused = true)]
async fn store_outage_is_service_unavailable() {
    let store = Arc::new(InMemoryTaskStore::new().with_faults([Some(Fault::Execute); 3]));

    let (status, body) = send(
        app(Some(CONN), store.clone()),
        post("/api/tasks", r#"{"task": "x"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.starts_with("Database connection failed after 3 attempts:"));
    assert!(!body.contains("hunter2"));
    assert_eq!(store.calls().await, 3);
    assert!(store.rows().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_commit_then_success_stores_one_row() {
    let store = Arc::new(
        InMemoryTaskStore::new().with_faults([Some(Fault::Commit), Some(Fault::Connect), None]),
    );

    let (status, _) = send(
        app(Some(CONN), store.clone()),
        post("/api/tasks", r#"{"task": "retry me"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(store.calls().await, 3);
    assert_eq!(store.rows().await.len(), 1);
}

#[tokio::test]
async fn health_is_ok() {
    let store = Arc::new(InMemoryTaskStore::new());
    let request = Request::builder()
        .uri("/healthz")
        .body(Body::empty())
        .expect("request");

    let (status, body) = send(app(Some(CONN), store), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_each_commit_once() {
    const N: usize = 50;
    let store = Arc::new(InMemoryTaskStore::new().with_latency(Duration::from_millis(20)));
    let router = app(Some(CONN), store.clone());

    let mut joins = tokio::task::JoinSet::new();
    for i in 0..N {
        let router = router.clone();
        joins.spawn(async move {
            send(router, post("/api/tasks", format!(r#"{{"task": "load_{i}"}}"#))).await
        });
    }

    let mut bodies = HashSet::new();
    while let Some(result) = joins.join_next().await {
        let (status, body) = result.expect("join");
        assert_eq!(status, StatusCode::OK);
        bodies.insert(body);
    }
    assert_eq!(bodies.len(), N);

    let rows = store.rows().await;
    assert_eq!(rows.len(), N);
    let ids: HashSet<_> = rows.iter().map(|r| r.id).collect();
    assert_eq!(ids.len(), N);
    let payloads: HashSet<_> = rows.iter().map(|r| r.payload.clone()).collect();
    assert!((0..N).all(|i| payloads.contains(&format!("load_{i}"))));
    assert_eq!(store.open_connections(), 0);
}
