//! Cloud Tasks contract tests
//!
//! Verify the task resource the dispatcher creates is what the worker's
//! execute route accepts: base64 body text, hex HMAC of that text, the
//! worker URL and dispatch deadline.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use lens_cloud_gcp::signing::{SignedBody, SIGNATURE_HEADER};
use lens_cloud_gcp::{CloudTasksQueue, GcpAuth, GcpConfig};
use lens_core::{BackfillTaskUnit, ErrorKind, TaskDispatcher, TaskRequest};
use lens_tests::fixtures::{sink, unit};
use lens_tests::MockTokenServer;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TASKS_PATH: &str = "/v2/projects/lens-host/locations/us-central1/queues/lens-backfill/tasks";
const SECRET: &str = "contract-secret";

fn config() -> GcpConfig {
    GcpConfig {
        project_id: "lens-host".to_string(),
        location: "us-central1".to_string(),
        queue_name: "lens-backfill".to_string(),
        worker_url: "https://worker.example.com/".to_string(),
        service_account_email: "lens@lens-host.iam.gserviceaccount.com".to_string(),
        service_account_key_json: None,
        hmac_secret: SECRET.to_string(),
    }
}

async fn queue(tasks: &MockServer, tokens: &MockTokenServer) -> CloudTasksQueue {
    let auth = Arc::new(GcpAuth::metadata(&tokens.uri(), "lens@lens-host.iam.gserviceaccount.com").unwrap());
    CloudTasksQueue::with_base_url(&config(), auth, &tasks.uri()).unwrap()
}

fn request_for(unit: &BackfillTaskUnit) -> TaskRequest {
    TaskRequest {
        path: "/tasks/backfill/execute".to_string(),
        body: serde_json::to_vec(unit).unwrap(),
        dispatch_deadline: Duration::from_secs(1800),
    }
}

fn created(name: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "name": name }))
}

#[tokio::test]
async fn test_task_resource_matches_worker_contract() {
    let tasks = MockServer::start().await;
    let tokens = MockTokenServer::start("test-token", 3600).await;
    Mock::given(method("POST"))
        .and(path(TASKS_PATH))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(created("projects/lens-host/locations/us-central1/queues/lens-backfill/tasks/1"))
        .expect(1)
        .mount(&tasks)
        .await;

    let unit = unit(&sink::simple(), "proj-a", 2);
    let handle = queue(&tasks, &tokens)
        .await
        .enqueue(request_for(&unit))
        .await
        .unwrap();
    assert!(handle.ends_with("/tasks/1"));

    let received = tasks.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    let http = &body["task"]["httpRequest"];
    assert_eq!(http["url"], "https://worker.example.com/tasks/backfill/execute");
    assert_eq!(http["httpMethod"], "POST");
    assert_eq!(
        http["oidcToken"]["serviceAccountEmail"],
        "lens@lens-host.iam.gserviceaccount.com"
    );
    assert_eq!(body["task"]["dispatchDeadline"], "1800s");

    // What the worker receives once Cloud Tasks decodes the API body
    let delivered = STANDARD.decode(http["body"].as_str().unwrap()).unwrap();
    let signature = http["headers"][SIGNATURE_HEADER].as_str().unwrap();
    let payload = SignedBody::open(&delivered, signature, SECRET).unwrap();
    let decoded: BackfillTaskUnit = serde_json::from_slice(&payload).unwrap();
    assert_eq!(decoded, unit);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let tasks = MockServer::start().await;
    let tokens = MockTokenServer::start("test-token", 3600).await;
    Mock::given(method("POST"))
        .and(path(TASKS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&tasks)
        .await;
    Mock::given(method("POST"))
        .and(path(TASKS_PATH))
        .respond_with(created("tasks/2"))
        .mount(&tasks)
        .await;

    let unit = unit(&sink::simple(), "proj-a", 2);
    let handle = queue(&tasks, &tokens)
        .await
        .enqueue(request_for(&unit))
        .await
        .unwrap();

    assert_eq!(handle, "tasks/2");
    assert_eq!(tasks.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_client_errors_are_classified_without_retry() {
    let tasks = MockServer::start().await;
    let tokens = MockTokenServer::start("test-token", 3600).await;
    Mock::given(method("POST"))
        .and(path(TASKS_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": { "code": 403, "message": "caller lacks cloudtasks.tasks.create" }
        })))
        .expect(1)
        .mount(&tasks)
        .await;

    let unit = unit(&sink::simple(), "proj-a", 2);
    let err = queue(&tasks, &tokens)
        .await
        .enqueue(request_for(&unit))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Forbidden);
    assert!(err.message.contains("cloudtasks.tasks.create"));
}

#[tokio::test]
async fn test_access_token_is_cached_across_enqueues() {
    let tasks = MockServer::start().await;
    let tokens = MockTokenServer::start("test-token", 3600).await;
    Mock::given(method("POST"))
        .and(path(TASKS_PATH))
        .respond_with(created("tasks/n"))
        .mount(&tasks)
        .await;

    let queue = queue(&tasks, &tokens).await;
    for day in 1..=3 {
        let unit = unit(&sink::simple(), "proj-a", day);
        queue.enqueue(request_for(&unit)).await.unwrap();
    }

    assert_eq!(tokens.token_requests().await, 1);
}
