//! HTTP surface of the ingestion endpoint.
//!
//! Routes:
//! - `POST /api/tasks` (also `POST /api/HttpTrigger`): body `{"task": "..."}`
//! - `GET /healthz`
//!
//! Responses are plain text; the status code follows [`ResultCode`].

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tracing::info;

use crate::ingest::{IngestEndpoint, IngestOutcome, ResultCode};

pub fn build_router(endpoint: IngestEndpoint) -> Router {
    Router::new()
        .route("/api/tasks", post(submit_task))
        .route("/api/HttpTrigger", post(submit_task))
        .route("/healthz", get(health))
        .with_state(endpoint)
}

/// Serve until `shutdown` resolves. In-flight requests are allowed to finish.
pub async fn serve<F>(endpoint: IngestEndpoint, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_listener(endpoint, listener, shutdown).await
}

/// Same as [`serve`] on an already bound listener.
pub async fn serve_listener<F>(
    endpoint: IngestEndpoint,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = %listener.local_addr()?, "ingestion endpoint listening");
    axum::serve(listener, build_router(endpoint))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn submit_task(State(endpoint): State<IngestEndpoint>, body: Bytes) -> Response {
    endpoint.submit(&body).await.into_response()
}

async fn health() -> &'static str {
    "ok"
}

fn status_code(code: ResultCode) -> StatusCode {
    match code {
        ResultCode::Ok => StatusCode::OK,
        ResultCode::BadRequest => StatusCode::BAD_REQUEST,
        ResultCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        ResultCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for IngestOutcome {
    fn into_response(self) -> Response {
        (status_code(self.code()), self.message()).into_response()
    }
}
