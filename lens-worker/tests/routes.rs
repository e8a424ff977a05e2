//! Worker routes driven through the router with in-memory collaborators

use chrono::{Duration, Utc};
use http::StatusCode;
use lens_core::{DiscoveryRow, ExternalError, JobRecord};
use lens_runtime::{
    BackfillScheduler, ExecutorConfig, SchedulerConfig, TablesDiscovery, TablesDiscoveryConfig,
    UnitExecutor,
};
use lens_storage::ProgressTracker;
use lens_tests::assertions::{assert_status, window_dates};
use lens_tests::builders::{get, json_post, signed_json_post};
use lens_tests::fixtures::{self, date, table_row};
use lens_tests::{
    ExecuteRequestBuilder, RecordingDispatcher, ScriptedQueryEngine, ScriptedUsageProbe,
    SinkFactory, StaticEnumerator, ThrottlingSink,
};
use lens_worker::{router, AppState};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const SECRET: &str = "test-secret-0123456789";

struct TestApp {
    state: AppState,
    tracker: ProgressTracker,
    dispatcher: Arc<RecordingDispatcher>,
    jobs: Arc<ThrottlingSink<JobRecord>>,
    tables: Arc<ThrottlingSink<DiscoveryRow>>,
}

impl TestApp {
    async fn new(engine: ScriptedQueryEngine) -> Self {
        let (tracker, _store) = fixtures::tracker_with(&[fixtures::sink::simple()]).await;
        let engine = Arc::new(engine);
        let probe = Arc::new(
            ScriptedUsageProbe::new()
                .with_usage("proj-a", true)
                .with_usage("proj-b", false)
                .with_attributes("proj-a", &["US"], &[])
                .with_attributes("proj-b", &["US"], &[]),
        );
        let enumerator = Arc::new(StaticEnumerator::new(&["proj-a", "proj-b"]));
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let jobs = Arc::new(ThrottlingSink::unlimited());
        let tables = Arc::new(ThrottlingSink::unlimited());

        let scheduler = BackfillScheduler::new(
            tracker.clone(),
            enumerator.clone(),
            probe.clone(),
            engine.clone(),
            dispatcher.clone(),
            SchedulerConfig::default(),
        );
        let executor = UnitExecutor::new(
            tracker.clone(),
            engine.clone(),
            Arc::new(SinkFactory::new(jobs.clone())),
            ExecutorConfig::default(),
        );
        let discovery = TablesDiscovery::new(
            enumerator,
            probe,
            engine,
            Arc::new(SinkFactory::new(tables.clone())),
            TablesDiscoveryConfig::default(),
        )
        .unwrap();

        Self {
            state: AppState {
                scheduler: Arc::new(scheduler),
                executor: Arc::new(executor),
                discovery: Arc::new(discovery),
                hmac_secret: SECRET.to_string(),
                shutdown: CancellationToken::new(),
            },
            tracker,
            dispatcher,
            jobs,
            tables,
        }
    }

    async fn send(&self, request: http::Request<axum::body::Body>) -> http::Response<axum::body::Body> {
        router(self.state.clone()).oneshot(request).await.unwrap()
    }
}

fn engine_with_jobs() -> ScriptedQueryEngine {
    ScriptedQueryEngine::new()
        .with_earliest(Some(Utc::now() - Duration::days(2)))
        .with_jobs(
            "proj-a",
            fixtures::jobs("proj-a", 1, 5).into_iter().map(Ok).collect(),
        )
}

#[tokio::test]
async fn test_execute_requires_signature() {
    let app = TestApp::new(engine_with_jobs()).await;
    let unit = fixtures::unit(&fixtures::sink::simple(), "proj-a", 1);

    let body = assert_status(
        app.send(ExecuteRequestBuilder::new(&unit).build()).await,
        StatusCode::UNAUTHORIZED,
    )
    .await;
    assert_eq!(body["error"], "Missing signature header");

    assert_status(
        app.send(ExecuteRequestBuilder::new(&unit).signature("zz").build())
            .await,
        StatusCode::UNAUTHORIZED,
    )
    .await;

    assert_status(
        app.send(ExecuteRequestBuilder::new(&unit).signed("other-secret").build())
            .await,
        StatusCode::UNAUTHORIZED,
    )
    .await;

    assert_status(
        app.send(ExecuteRequestBuilder::new(&unit).signed(SECRET).tampered().build())
            .await,
        StatusCode::UNAUTHORIZED,
    )
    .await;

    assert!(app.jobs.accepted().is_empty());
}

#[tokio::test]
async fn test_execute_rejects_malformed_unit() {
    let app = TestApp::new(engine_with_jobs()).await;

    assert_status(
        app.send(ExecuteRequestBuilder::raw(b"{\"sink_id\":42}").signed(SECRET).build())
            .await,
        StatusCode::BAD_REQUEST,
    )
    .await;
}

#[tokio::test]
async fn test_execute_backfills_unit() {
    let app = TestApp::new(engine_with_jobs()).await;
    let sink = fixtures::sink::simple();
    let unit = fixtures::unit(&sink, "proj-a", 1);

    let body = assert_status(
        app.send(ExecuteRequestBuilder::new(&unit).signed(SECRET).build())
            .await,
        StatusCode::OK,
    )
    .await;

    assert_eq!(body["sink_id"], "sink-1");
    assert_eq!(body["project"], "proj-a");
    assert_eq!(body["date"], "2024-01-01");
    assert_eq!(body["written"], 5);
    assert_eq!(body["percent"], 100);
    assert_eq!(body["project_done"], true);
    assert_eq!(app.jobs.accepted().len(), 5);

    let (done, pending) = window_dates(&app.tracker, &sink.id, "proj-a").await;
    assert_eq!(done, vec![date(1)]);
    assert!(pending.is_empty());
}

#[tokio::test]
async fn test_execute_failure_is_retryable() {
    let engine = ScriptedQueryEngine::new().with_jobs(
        "proj-a",
        vec![Err(ExternalError::forbidden("jobs.list denied"))],
    );
    let app = TestApp::new(engine).await;
    let unit = fixtures::unit(&fixtures::sink::simple(), "proj-a", 1);

    let body = assert_status(
        app.send(ExecuteRequestBuilder::new(&unit).signed(SECRET).build())
            .await,
        StatusCode::INTERNAL_SERVER_ERROR,
    )
    .await;
    assert_eq!(body["kind"], "forbidden");

    let (done, _) = window_dates(&app.tracker, &unit.sink_id, "proj-a").await;
    assert!(done.is_empty());
}

#[tokio::test]
async fn test_schedule_dispatches_units() {
    let app = TestApp::new(engine_with_jobs()).await;

    let body = assert_status(
        app.send(signed_json_post(
            "/tasks/backfill/schedule",
            &json!({"sink_id": "sink-1"}),
            SECRET,
        ))
        .await,
        StatusCode::OK,
    )
    .await;

    assert_eq!(body["state"], "in_progress");
    assert_eq!(body["projects"], json!(["proj-a"]));
    assert_eq!(body["dispatch_failures"], 0);
    let units = app.dispatcher.units();
    assert!(!units.is_empty());
    assert_eq!(body["dispatched"], units.len());
    assert!(units.iter().all(|u| u.project.as_str() == "proj-a"));
}

#[tokio::test]
async fn test_schedule_in_test_mode_dispatches_nothing() {
    let app = TestApp::new(engine_with_jobs()).await;

    let body = assert_status(
        app.send(signed_json_post(
            "/tasks/backfill/schedule",
            &json!({"sink_id": "sink-1", "test_mode": true}),
            SECRET,
        ))
        .await,
        StatusCode::OK,
    )
    .await;

    assert_eq!(body["state"], "computed");
    assert_eq!(body["dispatched"], 0);
    assert!(app.dispatcher.units().is_empty());
}

#[tokio::test]
async fn test_schedule_errors() {
    let app = TestApp::new(engine_with_jobs()).await;
    assert_status(
        app.send(signed_json_post(
            "/tasks/backfill/schedule",
            &json!({"sink": 1}),
            SECRET,
        ))
        .await,
        StatusCode::BAD_REQUEST,
    )
    .await;

    assert_status(
        app.send(signed_json_post(
            "/tasks/backfill/schedule",
            &json!({"sink_id": "missing"}),
            SECRET,
        ))
        .await,
        StatusCode::INTERNAL_SERVER_ERROR,
    )
    .await;

    let failing = TestApp::new(
        ScriptedQueryEngine::new().with_earliest_error(ExternalError::forbidden("no access")),
    )
    .await;
    let body = assert_status(
        failing
            .send(signed_json_post(
                "/tasks/backfill/schedule",
                &json!({"sink_id": "sink-1"}),
                SECRET,
            ))
            .await,
        StatusCode::INTERNAL_SERVER_ERROR,
    )
    .await;
    assert_eq!(body["kind"], "forbidden");
    assert!(failing.dispatcher.units().is_empty());
}

#[tokio::test]
async fn test_discovery_route() {
    let engine = ScriptedQueryEngine::new()
        .with_query_handler(|_, _| Ok(vec![table_row("proj-a", "warehouse", "events")]));
    let app = TestApp::new(engine).await;

    let body = assert_status(
        app.send(signed_json_post(
            "/tasks/discovery/tables",
            &json!({"tenant_id": "tenant-1", "destination_project": "host-project"}),
            SECRET,
        ))
        .await,
        StatusCode::OK,
    )
    .await;

    assert_eq!(body["tenant_id"], "tenant-1");
    assert_eq!(body["projects"], 2);
    assert_eq!(body["regions"], json!(["US"]));
    assert_eq!(body["rows_written"], 1);
    assert_eq!(body["destination"], "host-project.lens_discovery.tables");
    assert_eq!(app.tables.accepted().len(), 1);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let app = TestApp::new(ScriptedQueryEngine::new()).await;

    let body = assert_status(app.send(get("/health")).await, StatusCode::OK).await;
    assert_eq!(body["status"], "healthy");

    assert_status(
        app.send(signed_json_post(
            "/tasks/backfill/schedule",
            &json!({}),
            SECRET,
        ))
        .await,
        StatusCode::BAD_REQUEST,
    )
    .await;

    let text = assert_status(app.send(get("/metrics")).await, StatusCode::OK).await;
    let text = text.as_str().unwrap();
    assert!(text.contains("lens_worker_requests_total"));
    assert!(text.contains("status=\"400\""));
}

#[tokio::test]
async fn test_schedule_and_discovery_require_signature() {
    let app = TestApp::new(engine_with_jobs()).await;

    assert_status(
        app.send(json_post("/tasks/backfill/schedule", &json!({"sink_id": "sink-1"})))
            .await,
        StatusCode::UNAUTHORIZED,
    )
    .await;
    assert_status(
        app.send(signed_json_post(
            "/tasks/backfill/schedule",
            &json!({"sink_id": "sink-1"}),
            "other-secret",
        ))
        .await,
        StatusCode::UNAUTHORIZED,
    )
    .await;
    assert_status(
        app.send(json_post(
            "/tasks/discovery/tables",
            &json!({"tenant_id": "tenant-1", "destination_project": "host-project"}),
        ))
        .await,
        StatusCode::UNAUTHORIZED,
    )
    .await;

    assert!(app.dispatcher.units().is_empty());
    assert!(app.tables.accepted().is_empty());
}
