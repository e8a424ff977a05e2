//! In-memory fakes for every collaborator trait
//!
//! Each fake records what it was asked to do so tests can assert on calls,
//! and can be scripted to fail the way the real service would.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use lens_core::{
    AnalyticalQueryEngine, BackfillTaskUnit, BulkSink, BulkSinkFactory, ExternalError,
    ExternalResult, JobRecord, ProjectAttributes, ProjectId, RecordStream, ResourceEnumerator,
    Row, Sink, TableRef, TableSchema, TaskDispatcher, TaskRequest, TenantId, TimeWindow,
    UsageProbe,
};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wiremock::{
    matchers::{method, path_regex},
    Mock, MockServer, ResponseTemplate,
};

/// Bulk sink that rejects batches above a size limit as `Throttled`
///
/// Scripted responses, if any, are consumed first, one per `put`.
pub struct ThrottlingSink<T> {
    max_batch: Option<usize>,
    script: Mutex<VecDeque<ExternalResult<()>>>,
    accepted: Mutex<Vec<T>>,
    attempts: Mutex<Vec<usize>>,
}

impl<T> ThrottlingSink<T> {
    /// Accepts every batch
    pub fn unlimited() -> Self {
        Self {
            max_batch: None,
            script: Mutex::new(VecDeque::new()),
            accepted: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Rejects batches larger than `max_batch`
    pub fn with_limit(max_batch: usize) -> Self {
        Self {
            max_batch: Some(max_batch),
            ..Self::unlimited()
        }
    }

    /// Queue responses returned before the size rule applies
    pub fn scripted(self, responses: Vec<ExternalResult<()>>) -> Self {
        *self.script.lock().unwrap() = responses.into();
        self
    }

    /// Batch sizes of every `put`, in call order
    pub fn attempts(&self) -> Vec<usize> {
        self.attempts.lock().unwrap().clone()
    }
}

impl<T: Clone> ThrottlingSink<T> {
    pub fn accepted(&self) -> Vec<T> {
        self.accepted.lock().unwrap().clone()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> BulkSink<T> for ThrottlingSink<T> {
    async fn put(&self, batch: &[T]) -> ExternalResult<()> {
        self.attempts.lock().unwrap().push(batch.len());

        if let Some(response) = self.script.lock().unwrap().pop_front() {
            response?;
        }
        if let Some(max) = self.max_batch {
            if batch.len() > max {
                return Err(ExternalError::throttled(format!(
                    "batch of {} exceeds {}",
                    batch.len(),
                    max
                )));
            }
        }
        self.accepted.lock().unwrap().extend_from_slice(batch);
        Ok(())
    }
}

/// Hands out one shared sink for every table and records the tables asked for
pub struct SinkFactory<T> {
    sink: Arc<ThrottlingSink<T>>,
    tables: Mutex<Vec<TableRef>>,
}

impl<T> SinkFactory<T> {
    pub fn new(sink: Arc<ThrottlingSink<T>>) -> Self {
        Self {
            sink,
            tables: Mutex::new(Vec::new()),
        }
    }

    pub fn sink(&self) -> &Arc<ThrottlingSink<T>> {
        &self.sink
    }

    pub fn tables(&self) -> Vec<TableRef> {
        self.tables.lock().unwrap().clone()
    }
}

impl<T: Clone + Send + Sync + 'static> BulkSinkFactory<T> for SinkFactory<T> {
    fn sink_for(&self, table: &TableRef) -> Arc<dyn BulkSink<T>> {
        self.tables.lock().unwrap().push(table.clone());
        self.sink.clone()
    }
}

/// Usage probe answering from per-project scripts
///
/// Unknown projects have no usage and no attributes.
#[derive(Default)]
pub struct ScriptedUsageProbe {
    usage: HashMap<ProjectId, ExternalResult<bool>>,
    attributes: HashMap<ProjectId, ExternalResult<ProjectAttributes>>,
    usage_calls: AtomicUsize,
    windows: Mutex<Vec<TimeWindow>>,
}

impl ScriptedUsageProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_usage(mut self, project: &str, used: bool) -> Self {
        self.usage.insert(ProjectId::new(project), Ok(used));
        self
    }

    pub fn with_usage_error(mut self, project: &str, error: ExternalError) -> Self {
        self.usage.insert(ProjectId::new(project), Err(error));
        self
    }

    /// `models` pairs dataset ids with storage billing models
    pub fn with_attributes(mut self, project: &str, regions: &[&str], models: &[(&str, &str)]) -> Self {
        self.attributes.insert(
            ProjectId::new(project),
            Ok(ProjectAttributes {
                regions: regions.iter().map(|r| r.to_string()).collect(),
                storage_billing_models: models
                    .iter()
                    .map(|(d, m)| (d.to_string(), m.to_string()))
                    .collect(),
            }),
        );
        self
    }

    pub fn with_attributes_error(mut self, project: &str, error: ExternalError) -> Self {
        self.attributes.insert(ProjectId::new(project), Err(error));
        self
    }

    pub fn usage_calls(&self) -> usize {
        self.usage_calls.load(Ordering::SeqCst)
    }

    /// Windows `has_usage` was asked about
    pub fn probed_windows(&self) -> Vec<TimeWindow> {
        self.windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl UsageProbe for ScriptedUsageProbe {
    async fn has_usage(&self, project: &ProjectId, window: &TimeWindow) -> ExternalResult<bool> {
        self.usage_calls.fetch_add(1, Ordering::SeqCst);
        self.windows.lock().unwrap().push(*window);
        self.usage.get(project).cloned().unwrap_or(Ok(false))
    }

    async fn discover_attributes(&self, project: &ProjectId) -> ExternalResult<ProjectAttributes> {
        self.attributes
            .get(project)
            .cloned()
            .unwrap_or_else(|| Ok(ProjectAttributes::default()))
    }
}

/// Enumerator returning a fixed project list for any tenant
pub struct StaticEnumerator {
    projects: ExternalResult<Vec<ProjectId>>,
}

impl StaticEnumerator {
    pub fn new(projects: &[&str]) -> Self {
        Self {
            projects: Ok(projects.iter().map(|p| ProjectId::new(*p)).collect()),
        }
    }

    pub fn failing(error: ExternalError) -> Self {
        Self {
            projects: Err(error),
        }
    }
}

#[async_trait]
impl ResourceEnumerator for StaticEnumerator {
    async fn list_projects(&self, _tenant: &TenantId) -> ExternalResult<Vec<ProjectId>> {
        self.projects.clone()
    }
}

type QueryHandler = Box<dyn Fn(&str, Option<&str>) -> ExternalResult<Vec<Row>> + Send + Sync>;

/// Warehouse fake with scripted queries, job listings and earliest record
pub struct ScriptedQueryEngine {
    earliest: ExternalResult<Option<DateTime<Utc>>>,
    jobs: HashMap<ProjectId, Vec<ExternalResult<JobRecord>>>,
    query_handler: QueryHandler,
    queries: Mutex<Vec<(String, Option<String>)>>,
    ensured: Mutex<Vec<(TableRef, TableSchema)>>,
}

impl Default for ScriptedQueryEngine {
    fn default() -> Self {
        Self {
            earliest: Ok(None),
            jobs: HashMap::new(),
            query_handler: Box::new(|_, _| Ok(Vec::new())),
            queries: Mutex::new(Vec::new()),
            ensured: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedQueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Earliest record already captured by the live sink
    pub fn with_earliest(mut self, earliest: Option<DateTime<Utc>>) -> Self {
        self.earliest = Ok(earliest);
        self
    }

    pub fn with_earliest_error(mut self, error: ExternalError) -> Self {
        self.earliest = Err(error);
        self
    }

    /// Jobs listed for `project`; records outside the asked window are filtered
    pub fn with_jobs(mut self, project: &str, jobs: Vec<ExternalResult<JobRecord>>) -> Self {
        self.jobs.insert(ProjectId::new(project), jobs);
        self
    }

    pub fn with_query_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, Option<&str>) -> ExternalResult<Vec<Row>> + Send + Sync + 'static,
    {
        self.query_handler = Box::new(handler);
        self
    }

    /// Every `run_query` call as (sql, location)
    pub fn queries(&self) -> Vec<(String, Option<String>)> {
        self.queries.lock().unwrap().clone()
    }

    pub fn ensured_tables(&self) -> Vec<TableRef> {
        self.ensured
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }
}

#[async_trait]
impl AnalyticalQueryEngine for ScriptedQueryEngine {
    async fn run_query(&self, sql: &str, location: Option<&str>) -> ExternalResult<RecordStream<Row>> {
        self.queries
            .lock()
            .unwrap()
            .push((sql.to_string(), location.map(String::from)));
        let rows = (self.query_handler)(sql, location)?;
        Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    async fn ensure_destination_schema(
        &self,
        table: &TableRef,
        schema: &TableSchema,
    ) -> ExternalResult<TableRef> {
        self.ensured
            .lock()
            .unwrap()
            .push((table.clone(), schema.clone()));
        Ok(table.clone())
    }

    async fn list_jobs(
        &self,
        project: &ProjectId,
        window: &TimeWindow,
    ) -> ExternalResult<RecordStream<JobRecord>> {
        let window = *window;
        let items: Vec<ExternalResult<JobRecord>> = self
            .jobs
            .get(project)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|item| match item {
                Ok(job) => job
                    .creation_time
                    .map_or(true, |t| t >= window.start && t < window.end),
                Err(_) => true,
            })
            .collect();
        Ok(stream::iter(items).boxed())
    }

    async fn earliest_captured_record(&self, _sink: &Sink) -> ExternalResult<Option<DateTime<Utc>>> {
        self.earliest.clone()
    }
}

type FailWhen = Box<dyn Fn(&BackfillTaskUnit) -> bool + Send + Sync>;

/// Task queue fake that keeps every enqueued request
pub struct RecordingDispatcher {
    requests: Mutex<Vec<TaskRequest>>,
    fail_when: FailWhen,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for RecordingDispatcher {
    fn default() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail_when: Box::new(|_| false),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject units matching `predicate`
    pub fn failing_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&BackfillTaskUnit) -> bool + Send + Sync + 'static,
    {
        self.fail_when = Box::new(predicate);
        self
    }

    pub fn requests(&self) -> Vec<TaskRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Accepted units, ordered by (project, date)
    pub fn units(&self) -> Vec<BackfillTaskUnit> {
        let mut units: Vec<BackfillTaskUnit> = self
            .requests()
            .iter()
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect();
        units.sort_by(|a, b| (&a.project, a.date).cmp(&(&b.project, b.date)));
        units
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Enqueue calls seen, rejected ones included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskDispatcher for RecordingDispatcher {
    async fn enqueue(&self, task: TaskRequest) -> ExternalResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let unit: BackfillTaskUnit = serde_json::from_slice(&task.body)
            .map_err(|e| ExternalError::bad_request(e.to_string()))?;
        if (self.fail_when)(&unit) {
            return Err(ExternalError::other(format!(
                "queue rejected {}/{}",
                unit.project, unit.date
            )));
        }

        let mut requests = self.requests.lock().unwrap();
        requests.push(task);
        Ok(format!("tasks/{}", requests.len()))
    }
}

/// Mock of the instance metadata token endpoint used by `GcpAuth`
pub struct MockTokenServer {
    server: MockServer,
}

impl MockTokenServer {
    /// Serve `token` with the given lifetime
    pub async fn start(token: &str, expires_in_secs: u64) -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/computeMetadata/v1/instance/service-accounts/.+/token$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": token,
                "expires_in": expires_in_secs,
                "token_type": "Bearer",
            })))
            .mount(&server)
            .await;
        Self { server }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Number of token requests served so far
    pub async fn token_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|r| r.len())
            .unwrap_or(0)
    }
}
