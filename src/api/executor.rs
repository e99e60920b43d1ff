use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio_util::sync::CancellationToken;

use crate::shutdown::ShutdownCoordinator;
use crate::worker::{JobExecutor, JobSubmission, Rejection, SubmitRejection};

#[derive(Clone)]
pub struct ExecutorState {
    pub executor: JobExecutor,
    pub coordinator: ShutdownCoordinator,
}

/// Routes of an executor's HTTP surface.
pub fn router(state: ExecutorState) -> Router {
    Router::new()
        .route("/calculate", post(calculate_handler))
        .route("/ping", get(ping_handler))
        .route("/goroutines", get(goroutines_handler))
        .route("/shutdown", post(shutdown_handler))
        .with_state(state)
}

pub async fn serve_executor_api(
    listener: tokio::net::TcpListener,
    state: ExecutorState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

/// HTTP status an executor answers with for each kind of refusal.
pub fn rejection_status(rejection: &SubmitRejection) -> StatusCode {
    match rejection {
        SubmitRejection::Admission(Rejection::ServerShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
        SubmitRejection::Admission(Rejection::CapacityExhausted) => StatusCode::TOO_MANY_REQUESTS,
        SubmitRejection::AlreadyClaimed(_) => StatusCode::CONFLICT,
        SubmitRejection::UnknownJob(_) => StatusCode::NOT_FOUND,
        SubmitRejection::EmptyOperation => StatusCode::BAD_REQUEST,
        SubmitRejection::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn calculate_handler(
    State(state): State<ExecutorState>,
    payload: Result<Json<JobSubmission>, JsonRejection>,
) -> Response {
    let submission = match payload {
        Ok(Json(submission)) => submission,
        Err(rejection) => {
            return (StatusCode::BAD_REQUEST, rejection.body_text()).into_response();
        }
    };

    match state.executor.submit(submission).await {
        Ok(_handle) => (StatusCode::ACCEPTED, "Calculation started successfully.").into_response(),
        Err(rejection) => (rejection_status(&rejection), rejection.to_string()).into_response(),
    }
}

async fn ping_handler(State(state): State<ExecutorState>) -> impl IntoResponse {
    Json(state.executor.load_report())
}

async fn goroutines_handler(State(state): State<ExecutorState>) -> impl IntoResponse {
    format!(
        "Current number of goroutines: {}\n",
        state.executor.admission().load()
    )
}

async fn shutdown_handler(State(state): State<ExecutorState>) -> impl IntoResponse {
    if state.coordinator.trigger() {
        tracing::info!(executor = state.executor.name(), "Shutdown requested over HTTP");
    }
    "Server is shutting down...\n"
}
