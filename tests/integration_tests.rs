//! End-to-end tests over real loopback sockets.
//!
//! An orchestrator and one or more executors share an in-memory store; the
//! orchestrator reaches the executors through their HTTP surface.


use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use calcflow::config::{ExecutorConfig, OrchestratorConfig};
use calcflow::error::DispatchError;
use calcflow::node::StandaloneNode;
use calcflow::remote::{ExecutorClient, HttpExecutorClient};
use calcflow::scheduler::{JobStatus, NewJob, OperationCosts};
use calcflow::store::JobStore;
use calcflow::worker::JobSubmission;

use test_harness::{
    assert_eventually, dead_address, memory_store, spawn_executor, spawn_orchestrator,
    TEST_COST_UNIT,
};

const TIMEOUT: Duration = Duration::from_secs(2);

fn http_client(url: &str) -> Arc<dyn ExecutorClient> {
    Arc::new(HttpExecutorClient::new(url, TIMEOUT).unwrap())
}

async fn submit(base_url: &str, operation: &str, add_duration: u64) -> i64 {
    let response = reqwest::Client::new()
        .post(format!("{}/submit-calculation", base_url))
        .json(&json!({
            "operation": operation,
            "add_duration": add_duration,
            "subtract_duration": 0,
            "multiply_duration": 0,
            "divide_duration": 0,
            "inactive_server_time": 0
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    body["id"].as_i64().unwrap()
}

async fn result_of(base_url: &str, id: i64) -> Value {
    reqwest::Client::new()
        .get(format!("{}/get-calculation-result?id={}", base_url, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_submission_is_evaluated_by_remote_executor() {
    let (_memory, store) = memory_store();
    let executor = spawn_executor("exec-a", 2, store.clone(), false).await;
    let orchestrator = spawn_orchestrator(
        store.clone(),
        vec![http_client(&executor.http_url)],
        Duration::from_millis(50),
    )
    .await;

    let id = submit(&orchestrator.base_url, "2+3*4", 0).await;

    let base_url = orchestrator.base_url.clone();
    assert_eventually(
        || {
            let base_url = base_url.clone();
            async move {
                let body = result_of(&base_url, id).await;
                body["status"] == "completed" && body["result"] == 14.0
            }
        },
        Duration::from_secs(5),
        "calculation should complete through the executor",
    )
    .await;

    let job = store.get(id).await.unwrap().unwrap();
    assert_eq!(job.operation_server.as_deref(), Some("exec-a"));
}

#[tokio::test]
async fn test_dispatch_fails_over_past_unreachable_executor() {
    let (_memory, store) = memory_store();
    let dead = dead_address().await;
    let healthy = spawn_executor("exec-b", 2, store.clone(), false).await;
    let orchestrator = spawn_orchestrator(
        store.clone(),
        vec![http_client(&dead), http_client(&healthy.http_url)],
        Duration::from_millis(50),
    )
    .await;

    let id = submit(&orchestrator.base_url, "10/4", 0).await;

    assert_eventually(
        || {
            let store = store.clone();
            async move {
                let job = store.get(id).await.unwrap().unwrap();
                job.status == JobStatus::Completed
                    && job.operation_server.as_deref() == Some("exec-b")
            }
        },
        Duration::from_secs(5),
        "job should land on the second executor",
    )
    .await;
    assert_eq!(store.get(id).await.unwrap().unwrap().result, Some(2.5));

    let views = orchestrator.dispatcher.probe().await;
    assert!(!views[0].running);
    assert!(views[0].error.is_some());
    assert!(views[1].running);
}

#[tokio::test]
async fn test_every_executor_down_keeps_job_pending() {
    let (_memory, store) = memory_store();
    let dead = dead_address().await;
    let orchestrator = spawn_orchestrator(
        store.clone(),
        vec![http_client(&dead)],
        Duration::from_millis(20),
    )
    .await;

    let id = submit(&orchestrator.base_url, "1+1", 0).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let body = result_of(&orchestrator.base_url, id).await;
    assert_eq!(body["status"], "pending");
    assert!(body.get("result").is_none());
}

#[tokio::test]
async fn test_http_client_maps_executor_answers() {
    let (_memory, store) = memory_store();
    let executor = spawn_executor("exec-a", 1, store.clone(), false).await;
    let client = http_client(&executor.http_url);

    let slow = OperationCosts {
        add_duration: 5,
        ..Default::default()
    };
    let first = store.insert(NewJob::new("1+1", slow)).await.unwrap();
    let second = store.insert(NewJob::new("2+2", slow)).await.unwrap();

    let submission = |id: i64, operation: &str| JobSubmission {
        id,
        operation: operation.to_string(),
        times: slow,
    };

    client.submit(&submission(first.id, "1+1")).await.unwrap();

    let report = client.ping().await.unwrap();
    assert_eq!(report.max_goroutines, 1);
    assert_eq!(report.current_goroutines, 1);

    let full = client.submit(&submission(second.id, "2+2")).await.unwrap_err();
    assert!(matches!(full, DispatchError::Rejected(msg) if msg.contains("429")));

    let repeat = client.submit(&submission(first.id, "1+1")).await;
    assert!(repeat.is_err());

    let unknown = client
        .submit(&submission(second.id + 100, "3+3"))
        .await
        .unwrap_err();
    assert!(unknown.should_fail_over());
    assert!(matches!(unknown, DispatchError::Rejected(msg) if msg.contains("404")));
}

#[tokio::test]
async fn test_shutdown_drains_before_stopping() {
    let (_memory, store) = memory_store();
    let executor = spawn_executor("exec-a", 2, store.clone(), false).await;
    let client = http_client(&executor.http_url);

    let slow = OperationCosts {
        add_duration: 10,
        ..Default::default()
    };
    let running = store.insert(NewJob::new("4+4", slow)).await.unwrap();
    let late = store.insert(NewJob::new("5+5", slow)).await.unwrap();
    client
        .submit(&JobSubmission {
            id: running.id,
            operation: "4+4".to_string(),
            times: slow,
        })
        .await
        .unwrap();

    let response = reqwest::Client::new()
        .post(format!("{}/shutdown", executor.http_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // Still answering health checks while draining
    let report = client.ping().await.unwrap();
    assert_eq!(report.status, "draining");
    assert_eq!(report.current_goroutines, 1);

    let refused = client
        .submit(&JobSubmission {
            id: late.id,
            operation: "5+5".to_string(),
            times: slow,
        })
        .await
        .unwrap_err();
    assert!(matches!(refused, DispatchError::Rejected(msg) if msg.contains("503")));

    assert!(
        executor.wait_stopped(Duration::from_secs(5)).await,
        "executor should stop once drained"
    );
    let job = store.get(running.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(8.0));
    assert_eq!(
        store.get(late.id).await.unwrap().unwrap().status,
        JobStatus::Pending
    );
}

#[tokio::test]
async fn test_signal_triggers_drain() {
    let (_memory, store) = memory_store();
    let executor = spawn_executor("exec-a", 2, store, false).await;

    executor.signal.cancel();
    let coordinator = executor.coordinator.clone();
    assert!(executor.wait_stopped(Duration::from_secs(5)).await);
    assert!(coordinator.is_triggered());
}

#[tokio::test]
async fn test_standalone_shutdown_waits_for_in_process_executors() {
    let (_memory, store) = memory_store();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = OrchestratorConfig::new(listener.local_addr().unwrap());
    let node = StandaloneNode::new(
        config,
        store.clone(),
        vec![ExecutorConfig {
            name: "local-1".to_string(),
            capacity: 2,
            cost_unit_ms: TEST_COST_UNIT.as_millis() as u64,
            drain_poll_ms: 10,
            ..Default::default()
        }],
    );

    let slow = OperationCosts {
        add_duration: 10,
        ..Default::default()
    };
    let job = store.insert(NewJob::new("4+4", slow)).await.unwrap();
    assert_eq!(node.orchestrator.dispatcher.run_cycle().await.dispatched, 1);
    let coordinators = node.coordinators.clone();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(node.serve(listener, shutdown.clone()));
    shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("standalone node should stop once drained")
        .unwrap()
        .unwrap();

    // Returning means the evaluation already finished and was recorded
    let job = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(8.0));
    assert!(coordinators.iter().all(|c| c.terminated().is_cancelled()));
}
