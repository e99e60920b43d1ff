
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use calcflow::api::executor::{self, ExecutorState};
use calcflow::api::orchestrator::{self, OrchestratorState};
use calcflow::scheduler::{Dispatcher, JobStatus, NewJob, OperationCosts};
use calcflow::store::JobStore;

use test_harness::{
    as_clients, assert_eventually, local_executor, memory_store, FailingStore, Script,
    ScriptedExecutor,
};

fn orchestrator_app(store: Arc<dyn JobStore>) -> Router {
    orchestrator::router(OrchestratorState {
        dispatcher: Arc::new(Dispatcher::new(store.clone(), Vec::new())),
        store,
    })
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

// =============================================================================
// Orchestrator API
// =============================================================================

#[tokio::test]
async fn test_submit_creates_pending_calculation() {
    let (_memory, store) = memory_store();
    let app = orchestrator_app(store.clone());

    let response = app
        .oneshot(json_request(
            "POST",
            "/submit-calculation",
            json!({
                "operation": "2+3*4",
                "add_duration": 1,
                "subtract_duration": 0,
                "multiply_duration": 2,
                "divide_duration": 0,
                "inactive_server_time": 7
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "created");
    assert_eq!(body["operation"], "2+3*4");

    let id = body["id"].as_i64().unwrap();
    let job = store.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.costs.multiply_duration, 2);
    assert_eq!(job.inactive_server_time, 7);
    assert!(job.start_time.is_none());
}

#[tokio::test]
async fn test_submit_rejects_empty_operation() {
    let (_memory, store) = memory_store();
    let app = orchestrator_app(store.clone());

    let response = app
        .oneshot(json_request(
            "POST",
            "/submit-calculation",
            json!({"operation": "   "}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_result_id_validation() {
    let (_memory, store) = memory_store();
    let app = orchestrator_app(store);

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/get-calculation-result"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Missing id parameter");

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/get-calculation-result?id=abc"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Invalid id parameter");

    let response = app
        .oneshot(empty_request("GET", "/get-calculation-result?id=999"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_result_reports_status_and_value() {
    let (_memory, store) = memory_store();
    let app = orchestrator_app(store.clone());

    let pending = store
        .insert(NewJob::new("1+1", OperationCosts::default()))
        .await
        .unwrap();
    let done = store
        .insert(NewJob::new("2*2", OperationCosts::default()))
        .await
        .unwrap();
    store
        .claim(done.id, "exec-a", chrono::Utc::now())
        .await
        .unwrap();
    store
        .complete(done.id, 4.0, chrono::Utc::now())
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(empty_request(
            "GET",
            &format!("/get-calculation-result?id={}", pending.id),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "pending");
    assert!(body.get("result").is_none());

    let response = app
        .oneshot(empty_request(
            "GET",
            &format!("/get-calculation-result?id={}", done.id),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result"], 4.0);
}

#[tokio::test]
async fn test_list_and_clear() {
    let (_memory, store) = memory_store();
    let app = orchestrator_app(store.clone());

    for op in ["1+1", "2+2", "3+3"] {
        store
            .insert(NewJob::new(op, OperationCosts::default()))
            .await
            .unwrap();
    }

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/get-all-calculations"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let ops: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["operation"].as_str().unwrap())
        .collect();
    assert_eq!(ops, vec!["1+1", "2+2", "3+3"]);

    let response = app
        .clone()
        .oneshot(empty_request("POST", "/clear-all-calculations"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        "All calculations have been cleared successfully."
    );

    // Clearing twice is fine
    let response = app
        .clone()
        .oneshot(empty_request("POST", "/clear-all-calculations"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(empty_request("GET", "/get-all-calculations"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!([]));
}

#[tokio::test]
async fn test_store_failure_returns_500_and_keeps_serving() {
    let app = orchestrator_app(FailingStore::new());

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/submit-calculation",
            json!({"operation": "1+1", "add_duration": 1}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["error"], "Internal server error");

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/get-calculation-result?id=1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = app
        .oneshot(empty_request("GET", "/orchestrator-status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_orchestrator_status() {
    let (_memory, store) = memory_store();
    let response = orchestrator_app(store)
        .oneshot(empty_request("GET", "/orchestrator-status"))
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["running"], true);
    assert_eq!(body["message"], "Orchestrator is running");
}

#[tokio::test]
async fn test_ping_servers_in_configured_order() {
    let (_memory, store) = memory_store();
    let up = ScriptedExecutor::new("http://exec-a:8081", Script::Accept);
    let down = ScriptedExecutor::new("http://exec-b:8081", Script::Unreachable);
    let dispatcher = Dispatcher::new(store.clone(), as_clients(&[up, down]));
    let app = orchestrator::router(OrchestratorState {
        store,
        dispatcher: Arc::new(dispatcher),
    });

    let response = app
        .oneshot(empty_request("GET", "/ping-servers"))
        .await
        .unwrap();
    let body = body_json(response).await;
    let views = body.as_array().unwrap();
    assert_eq!(views.len(), 2);

    assert_eq!(views[0]["url"], "http://exec-a:8081");
    assert_eq!(views[0]["running"], true);
    assert_eq!(views[0]["maxGoroutines"], 5);
    assert!(views[0].get("error").is_none());

    assert_eq!(views[1]["url"], "http://exec-b:8081");
    assert_eq!(views[1]["running"], false);
    assert!(views[1].get("maxGoroutines").is_none());
    assert!(views[1]["error"].as_str().unwrap().contains("connection refused"));
}

// =============================================================================
// Executor API
// =============================================================================

fn executor_app(name: &str, capacity: usize, store: Arc<dyn JobStore>) -> (Router, ExecutorState) {
    let (executor, coordinator) = local_executor(name, capacity, store);
    let state = ExecutorState {
        executor,
        coordinator,
    };
    (executor::router(state.clone()), state)
}

fn calculate_body(id: i64, operation: &str) -> Value {
    json!({
        "id": id,
        "operation": operation,
        "times": {
            "add_duration": 0,
            "subtract_duration": 0,
            "multiply_duration": 0,
            "divide_duration": 0
        }
    })
}

#[tokio::test]
async fn test_calculate_accepts_and_completes() {
    let (_memory, store) = memory_store();
    let job = store
        .insert(NewJob::new("2+3*4", OperationCosts::default()))
        .await
        .unwrap();
    let (app, _state) = executor_app("exec-a", 2, store.clone());

    let response = app
        .oneshot(json_request("POST", "/calculate", calculate_body(job.id, "2+3*4")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let id = job.id;
    assert_eventually(
        || {
            let store = store.clone();
            async move {
                let job = store.get(id).await.unwrap().unwrap();
                job.status == JobStatus::Completed && job.result == Some(14.0)
            }
        },
        Duration::from_secs(2),
        "calculation should complete with 14",
    )
    .await;
}

#[tokio::test]
async fn test_calculate_rejection_statuses() {
    let (_memory, store) = memory_store();
    let job = store
        .insert(NewJob::new("1+1", OperationCosts::default()))
        .await
        .unwrap();

    // No capacity at all
    let (full, _) = executor_app("exec-full", 0, store.clone());
    let response = full
        .oneshot(json_request("POST", "/calculate", calculate_body(job.id, "1+1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_text(response).await, "Server max capacity reached");

    // Shutting down
    let (draining, state) = executor_app("exec-draining", 2, store.clone());
    state.coordinator.trigger();
    let response = draining
        .oneshot(json_request("POST", "/calculate", calculate_body(job.id, "1+1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_text(response).await, "Server is shutting down");

    // Already claimed elsewhere
    store
        .claim(job.id, "exec-other", chrono::Utc::now())
        .await
        .unwrap();
    let (late, state) = executor_app("exec-late", 2, store.clone());
    let response = late
        .oneshot(json_request("POST", "/calculate", calculate_body(job.id, "1+1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(state.executor.admission().load(), 0);

    // The job was never touched by the rejecting executors
    let job = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.operation_server.as_deref(), Some("exec-other"));
}

#[tokio::test]
async fn test_calculate_refusals_that_allow_failover() {
    let (_memory, store) = memory_store();
    let job = store
        .insert(NewJob::new("1+1", OperationCosts::default()))
        .await
        .unwrap();
    let (app, state) = executor_app("exec-a", 2, store.clone());

    let response = app
        .clone()
        .oneshot(json_request("POST", "/calculate", calculate_body(job.id + 100, "1+1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(json_request("POST", "/calculate", calculate_body(job.id, " ")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "Operation cannot be empty");

    assert_eq!(state.executor.admission().load(), 0);
    assert_eq!(
        store.get(job.id).await.unwrap().unwrap().status,
        JobStatus::Pending
    );
}

#[tokio::test]
async fn test_calculate_store_failure_is_500() {
    let (app, state) = executor_app("exec-a", 1, FailingStore::new());

    let response = app
        .oneshot(json_request("POST", "/calculate", calculate_body(1, "1+1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(state.executor.admission().load(), 0);
}

#[tokio::test]
async fn test_calculate_bad_body() {
    let (_memory, store) = memory_store();
    let (app, _) = executor_app("exec-a", 2, store);

    let response = app
        .oneshot(json_request("POST", "/calculate", json!({"operation": 5})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ping_goroutines_and_shutdown() {
    let (_memory, store) = memory_store();
    let (app, state) = executor_app("exec-a", 3, store);

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/ping"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "running");
    assert_eq!(body["maxGoroutines"], 3);
    assert_eq!(body["currentGoroutines"], 0);

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/goroutines"))
        .await
        .unwrap();
    assert_eq!(body_text(response).await, "Current number of goroutines: 0\n");

    let response = app
        .clone()
        .oneshot(empty_request("POST", "/shutdown"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.coordinator.is_triggered());

    let response = app.oneshot(empty_request("GET", "/ping")).await.unwrap();
    assert_eq!(body_json(response).await["status"], "draining");
}
