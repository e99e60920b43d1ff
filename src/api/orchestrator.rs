use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::scheduler::{Dispatcher, Job, JobId, NewJob, OperationCosts};
use crate::store::JobStore;

#[derive(Clone)]
pub struct OrchestratorState {
    pub store: Arc<dyn JobStore>,
    pub dispatcher: Arc<Dispatcher>,
}

#[derive(Debug, Deserialize)]
pub struct CalculationRequest {
    pub operation: String,
    #[serde(default)]
    pub add_duration: u64,
    #[serde(default)]
    pub subtract_duration: u64,
    #[serde(default)]
    pub multiply_duration: u64,
    #[serde(default)]
    pub divide_duration: u64,
    #[serde(default)]
    pub inactive_server_time: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitCalculationResponse {
    pub id: JobId,
    pub status: String,
    pub operation: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CalculationResult {
    pub id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<f64>,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CalculationSummary {
    pub id: JobId,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<f64>,
    pub status: String,
}

impl From<&Job> for CalculationSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            operation: job.operation.clone(),
            result: job.result,
            status: job.status.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ResultQuery {
    id: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Routes of the client-facing orchestrator API.
pub fn router(state: OrchestratorState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/submit-calculation", post(submit_calculation_handler))
        .route("/get-calculation-result", get(calculation_result_handler))
        .route("/get-all-calculations", get(all_calculations_handler))
        .route("/clear-all-calculations", post(clear_calculations_handler))
        .route("/ping-servers", get(ping_servers_handler))
        .route("/orchestrator-status", get(orchestrator_status_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn serve_api(
    listener: tokio::net::TcpListener,
    state: OrchestratorState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn submit_calculation_handler(
    State(state): State<OrchestratorState>,
    Json(payload): Json<CalculationRequest>,
) -> Response {
    if payload.operation.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Operation cannot be empty");
    }

    let new_job = NewJob {
        operation: payload.operation,
        costs: OperationCosts {
            add_duration: payload.add_duration,
            subtract_duration: payload.subtract_duration,
            multiply_duration: payload.multiply_duration,
            divide_duration: payload.divide_duration,
        },
        inactive_server_time: payload.inactive_server_time,
    };

    match state.store.insert(new_job).await {
        Ok(job) => {
            tracing::info!(job_id = job.id, operation = %job.operation, "Calculation submitted");
            (
                StatusCode::OK,
                Json(SubmitCalculationResponse {
                    id: job.id,
                    status: "created".to_string(),
                    operation: job.operation,
                }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Error writing calculation to store");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

async fn calculation_result_handler(
    State(state): State<OrchestratorState>,
    Query(query): Query<ResultQuery>,
) -> Response {
    let Some(raw_id) = query.id.filter(|id| !id.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing id parameter");
    };
    let Ok(id) = raw_id.trim().parse::<JobId>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid id parameter");
    };

    match state.store.get(id).await {
        Ok(Some(job)) => Json(CalculationResult {
            id: job.id,
            result: job.result,
            status: job.status.to_string(),
        })
        .into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Calculation {} not found", id)),
        Err(e) => {
            tracing::error!(job_id = id, error = %e, "Error fetching calculation result");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

async fn all_calculations_handler(State(state): State<OrchestratorState>) -> Response {
    match state.store.list().await {
        Ok(jobs) => {
            let summaries: Vec<CalculationSummary> =
                jobs.iter().map(CalculationSummary::from).collect();
            Json(summaries).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Error fetching all calculations");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

async fn clear_calculations_handler(State(state): State<OrchestratorState>) -> Response {
    match state.store.clear().await {
        Ok(removed) => {
            tracing::info!(removed, "All calculations cleared");
            (
                StatusCode::OK,
                "All calculations have been cleared successfully.",
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Error clearing all calculations");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

async fn ping_servers_handler(State(state): State<OrchestratorState>) -> impl IntoResponse {
    Json(state.dispatcher.probe().await)
}

async fn orchestrator_status_handler() -> impl IntoResponse {
    Json(OrchestratorStatus {
        running: true,
        message: "Orchestrator is running".to_string(),
    })
}
