//! BigQuery REST client
//!
//! Implements the warehouse-facing collaborator traits:
//! - [`AnalyticalQueryEngine`]: `jobs.query` + `getQueryResults` paging,
//!   `jobs.list` paging, `tables.get`/`tables.insert` with dataset creation,
//!   and the earliest record of the live capture table
//! - [`UsageProbe`]: a one-row `jobs.list` and `datasets.list`/`datasets.get`
//! - [`BulkSinkFactory`]: `tabledata.insertAll` bound to one table
//!
//! Result pages are fetched lazily; an HTTP failure mid-stream becomes the
//! stream's last item.

use crate::auth::GcpAuth;
use crate::http::ApiClient;
use crate::metrics::{BIGQUERY_INSERT_ROWS_TOTAL, BIGQUERY_REQUESTS_TOTAL};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use lens_core::{
    AnalyticalQueryEngine, BulkSink, BulkSinkFactory, ErrorKind, ExternalError, ExternalResult,
    JobRecord, ProjectAttributes, ProjectId, RecordStream, Row, Sink, TableRef, TableSchema,
    TimeWindow, UsageProbe,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub const BIGQUERY_BASE_URL: &str = "https://bigquery.googleapis.com";

const QUERY_TIMEOUT_MS: u64 = 10_000;

/// Table holding the records the tenant's live sink already captured
#[derive(Debug, Clone)]
pub struct LiveCaptureTable {
    pub dataset: String,
    pub table: String,
    /// Days scanned back from today when looking for the earliest record
    pub lookback_days: u32,
}

impl Default for LiveCaptureTable {
    fn default() -> Self {
        Self {
            dataset: "lens_capture".to_string(),
            table: "cloudaudit_googleapis_com_data_access".to_string(),
            lookback_days: 30,
        }
    }
}

impl LiveCaptureTable {
    fn earliest_query(&self, project: &ProjectId) -> String {
        format!(
            "SELECT MIN(protopayload_auditlog.servicedata_v1_bigquery.jobCompletedEvent.job.jobStatistics.createTime) AS earliest \
             FROM `{project}.{dataset}.{table}` \
             WHERE protopayload_auditlog.servicedata_v1_bigquery.jobCompletedEvent.job.jobName.jobId IS NOT NULL \
             AND DATE(timestamp) >= DATE_SUB(CURRENT_DATE(), INTERVAL {days} DAY)",
            project = project,
            dataset = self.dataset,
            table = self.table,
            days = self.lookback_days,
        )
    }
}

#[derive(Clone)]
pub struct BigQueryClient {
    api: ApiClient,
    /// Project queries run and are billed in
    project: String,
    /// Location for datasets created on demand
    dataset_location: String,
    live_capture: LiveCaptureTable,
    page_size: u32,
}

impl BigQueryClient {
    pub fn new(auth: Arc<GcpAuth>, project: impl Into<String>) -> Result<Self> {
        Self::with_base_url(auth, project, BIGQUERY_BASE_URL)
    }

    pub fn with_base_url(
        auth: Arc<GcpAuth>,
        project: impl Into<String>,
        base_url: &str,
    ) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(auth, base_url, Duration::from_secs(60))?,
            project: project.into(),
            dataset_location: "US".to_string(),
            live_capture: LiveCaptureTable::default(),
            page_size: 1000,
        })
    }

    pub fn with_dataset_location(mut self, location: impl Into<String>) -> Self {
        self.dataset_location = location.into();
        self
    }

    pub fn with_live_capture(mut self, table: LiveCaptureTable) -> Self {
        self.live_capture = table;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn query_page(
        &self,
        job: &ApiJobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse> {
        let mut params = vec![
            ("maxResults", self.page_size.to_string()),
            ("timeoutMs", QUERY_TIMEOUT_MS.to_string()),
        ];
        if let Some(location) = &job.location {
            params.push(("location", location.clone()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        let path = format!(
            "/bigquery/v2/projects/{}/queries/{}",
            job.project_id, job.job_id
        );
        record("query_page", self.api.get(&path, &params).await)
    }

    async fn jobs_page(
        &self,
        project: &ProjectId,
        window: &TimeWindow,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<JobsListResponse> {
        let (min, max) = creation_bounds_ms(window);
        let mut params = vec![
            ("allUsers", "true".to_string()),
            ("projection", "full".to_string()),
            ("stateFilter", "done".to_string()),
            ("minCreationTime", min.to_string()),
            ("maxCreationTime", max.to_string()),
            ("maxResults", max_results.to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        let path = format!("/bigquery/v2/projects/{project}/jobs");
        record("jobs_list", self.api.get(&path, &params).await)
    }

    async fn ensure_dataset(&self, table: &TableRef) -> Result<()> {
        let path = format!(
            "/bigquery/v2/projects/{}/datasets/{}",
            table.project, table.dataset
        );
        match record("datasets_get", self.api.get::<Value>(&path, &[]).await) {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let body = json!({
            "datasetReference": { "projectId": table.project, "datasetId": table.dataset },
            "location": self.dataset_location,
        });
        let path = format!("/bigquery/v2/projects/{}/datasets", table.project);
        ignore_conflict(record("datasets_insert", self.api.post::<_, Value>(&path, &body).await))
    }

    /// Stream `tabledata.insertAll` for one batch
    pub async fn insert_all<T: Serialize>(&self, table: &TableRef, rows: &[T]) -> Result<()> {
        let rows = rows
            .iter()
            .map(|row| serde_json::to_value(row).map(|json| json!({ "json": json })))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Internal(format!("Failed to serialize row: {e}")))?;
        let count = rows.len() as u64;
        let body = json!({ "rows": rows, "skipInvalidRows": false, "ignoreUnknownValues": false });
        let path = format!(
            "/bigquery/v2/projects/{}/datasets/{}/tables/{}/insertAll",
            table.project, table.dataset, table.table
        );

        let result = record("insert_all", self.api.post::<_, InsertAllResponse>(&path, &body).await)
            .and_then(|response| match response.insert_errors.first() {
                None => Ok(()),
                Some(first) => Err(Error::Internal(format!(
                    "{} rows rejected by {table}, first at index {}: {}",
                    response.insert_errors.len(),
                    first.index,
                    first.errors.first().map(|e| e.message.as_str()).unwrap_or("unknown"),
                ))),
            });

        let outcome = match &result {
            Ok(()) => "ok",
            Err(e) if e.kind() == ErrorKind::Throttled => "throttled",
            Err(_) => "failed",
        };
        BIGQUERY_INSERT_ROWS_TOTAL
            .with_label_values(&[outcome])
            .inc_by(count);
        result
    }
}

fn record<T>(operation: &str, result: Result<T>) -> Result<T> {
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind().as_str(),
    };
    BIGQUERY_REQUESTS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
    result
}

fn ignore_conflict(result: Result<Value>) -> Result<()> {
    match result {
        Ok(_) | Err(Error::Api { status: 409, .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

/// `jobs.list` bounds: inclusive milliseconds, so the exclusive end loses 1ms
fn creation_bounds_ms(window: &TimeWindow) -> (i64, i64) {
    let min = window.start.timestamp_millis();
    let max = (window.end.timestamp_millis() - 1).max(min);
    (min, max)
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

impl Cursor {
    fn after(token: Option<String>) -> Self {
        token.map(Cursor::Next).unwrap_or(Cursor::Done)
    }
}

/// Lazily walk pages until the cursor runs out
fn paged<T, F, Fut>(initial: Cursor, fetch: F) -> RecordStream<T>
where
    T: Send + 'static,
    F: FnMut(Option<String>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(Vec<T>, Cursor)>> + Send + 'static,
{
    stream::try_unfold((fetch, initial), |(mut fetch, cursor)| async move {
        let token = match cursor {
            Cursor::Done => return Ok::<_, Error>(None),
            Cursor::Start => None,
            Cursor::Next(token) => Some(token),
        };
        let (items, next) = fetch(token).await?;
        Ok(Some((items, (fetch, next))))
    })
    .map_ok(|items: Vec<T>| stream::iter(items.into_iter().map(Ok::<T, Error>)))
    .try_flatten()
    .map_err(ExternalError::from)
    .boxed()
}

#[async_trait]
impl AnalyticalQueryEngine for BigQueryClient {
    #[instrument(skip(self, sql))]
    async fn run_query(&self, sql: &str, location: Option<&str>) -> ExternalResult<RecordStream<Row>> {
        let mut body = json!({
            "query": sql,
            "useLegacySql": false,
            "maxResults": self.page_size,
            "timeoutMs": QUERY_TIMEOUT_MS,
        });
        if let Some(location) = location {
            body["location"] = json!(location);
        }
        let path = format!("/bigquery/v2/projects/{}/queries", self.project);
        let first: QueryResponse = record("query", self.api.post(&path, &body).await)?;

        let rows = first.decoded_rows();
        let next = first.cursor();
        let Some(job) = first.job_reference else {
            return Ok(stream::iter(rows.into_iter().map(Ok)).boxed());
        };
        if matches!(next, Cursor::Done) {
            return Ok(stream::iter(rows.into_iter().map(Ok)).boxed());
        }

        let client = self.clone();
        let rest = paged(next, move |token| {
            let client = client.clone();
            let job = job.clone();
            async move {
                let page = client.query_page(&job, token.as_deref()).await?;
                // An unfinished job is polled again from the same position
                let next = if page.job_complete {
                    page.cursor()
                } else {
                    token.map(Cursor::Next).unwrap_or(Cursor::Start)
                };
                Ok((page.decoded_rows(), next))
            }
        });
        Ok(stream::iter(rows.into_iter().map(Ok)).chain(rest).boxed())
    }

    #[instrument(skip(self, schema), fields(table = %table))]
    async fn ensure_destination_schema(
        &self,
        table: &TableRef,
        schema: &TableSchema,
    ) -> ExternalResult<TableRef> {
        let path = format!(
            "/bigquery/v2/projects/{}/datasets/{}/tables/{}",
            table.project, table.dataset, table.table
        );
        match record("tables_get", self.api.get::<Value>(&path, &[]).await) {
            Ok(_) => return Ok(table.clone()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.ensure_dataset(table).await?;

        let mut body = json!({
            "tableReference": {
                "projectId": table.project,
                "datasetId": table.dataset,
                "tableId": table.table,
            },
            "schema": { "fields": schema.fields },
        });
        if let Some(field) = &schema.partition_field {
            body["timePartitioning"] = json!({ "type": "DAY", "field": field });
        }
        if !schema.clustering.is_empty() {
            body["clustering"] = json!({ "fields": schema.clustering });
        }
        let path = format!(
            "/bigquery/v2/projects/{}/datasets/{}/tables",
            table.project, table.dataset
        );
        ignore_conflict(record("tables_insert", self.api.post::<_, Value>(&path, &body).await))?;
        debug!("Created destination table");
        Ok(table.clone())
    }

    async fn list_jobs(
        &self,
        project: &ProjectId,
        window: &TimeWindow,
    ) -> ExternalResult<RecordStream<JobRecord>> {
        let client = self.clone();
        let project = project.clone();
        let window = *window;
        Ok(paged(Cursor::Start, move |token| {
            let client = client.clone();
            let project = project.clone();
            async move {
                let page = client
                    .jobs_page(&project, &window, client.page_size, token.as_deref())
                    .await?;
                let records = page.jobs.into_iter().map(ApiJob::into_record).collect();
                Ok((records, Cursor::after(page.next_page_token)))
            }
        }))
    }

    #[instrument(skip(self, sink), fields(sink_id = %sink.id))]
    async fn earliest_captured_record(&self, sink: &Sink) -> ExternalResult<Option<DateTime<Utc>>> {
        let sql = self.live_capture.earliest_query(&sink.source_project);
        let stream = match self.run_query(&sql, Some(&sink.source_location)).await {
            Ok(stream) => stream,
            Err(e) if e.kind == ErrorKind::NotFound => {
                debug!("Live capture table missing, nothing captured yet");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let rows: Vec<Row> = stream.try_collect().await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("earliest"))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| ts.with_timezone(&Utc)))
    }
}

#[async_trait]
impl UsageProbe for BigQueryClient {
    async fn has_usage(&self, project: &ProjectId, window: &TimeWindow) -> ExternalResult<bool> {
        match self.jobs_page(project, window, 1, None).await {
            Ok(page) => Ok(!page.jobs.is_empty()),
            // Warehouse disabled, no datasets or no access
            Err(e) if matches!(
                e.kind(),
                ErrorKind::NotFound | ErrorKind::BadRequest | ErrorKind::Forbidden
            ) =>
            {
                debug!(project = %project, error = %e, "Treating probe failure as no usage");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn discover_attributes(&self, project: &ProjectId) -> ExternalResult<ProjectAttributes> {
        let mut datasets = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut params = vec![("all", "true".to_string())];
            if let Some(t) = &token {
                params.push(("pageToken", t.clone()));
            }
            let path = format!("/bigquery/v2/projects/{project}/datasets");
            let page: DatasetsListResponse = record("datasets_list", self.api.get(&path, &params).await)?;
            datasets.extend(page.datasets);
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        let mut attributes = ProjectAttributes::default();
        let mut regions = BTreeSet::new();
        for dataset in datasets {
            let id = dataset.dataset_reference.dataset_id;
            if let Some(location) = dataset.location {
                regions.insert(location);
            }
            let path = format!("/bigquery/v2/projects/{project}/datasets/{id}");
            match record("datasets_get", self.api.get::<ApiDataset>(&path, &[]).await) {
                Ok(detail) => {
                    if let Some(model) = detail.storage_billing_model {
                        attributes.storage_billing_models.insert(id, model);
                    }
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(project = %project, dataset = %id, "Dataset vanished during discovery");
                }
                Err(e) => return Err(e.into()),
            }
        }
        attributes.regions = regions.into_iter().collect();
        Ok(attributes)
    }
}

/// Bulk sink writing to one BigQuery table
pub struct BigQueryTableSink<T> {
    client: BigQueryClient,
    table: TableRef,
    _rows: PhantomData<fn(T)>,
}

impl<T> BigQueryTableSink<T> {
    pub fn new(client: BigQueryClient, table: TableRef) -> Self {
        Self {
            client,
            table,
            _rows: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Serialize + Send + Sync> BulkSink<T> for BigQueryTableSink<T> {
    async fn put(&self, batch: &[T]) -> ExternalResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        Ok(self.client.insert_all(&self.table, batch).await?)
    }
}

impl<T: Serialize + Send + Sync + 'static> BulkSinkFactory<T> for BigQueryClient {
    fn sink_for(&self, table: &TableRef) -> Arc<dyn BulkSink<T>> {
        Arc::new(BigQueryTableSink::new(self.clone(), table.clone()))
    }
}

// --- wire types ---

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiJobReference {
    project_id: String,
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiSchema {
    #[serde(default)]
    fields: Vec<ApiField>,
}

#[derive(Debug, Deserialize)]
struct ApiField {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    fields: Vec<ApiField>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    job_reference: Option<ApiJobReference>,
    #[serde(default)]
    schema: Option<ApiSchema>,
    #[serde(default)]
    rows: Vec<Value>,
    #[serde(default)]
    page_token: Option<String>,
}

impl QueryResponse {
    fn cursor(&self) -> Cursor {
        if !self.job_complete {
            return Cursor::Start;
        }
        Cursor::after(self.page_token.clone())
    }

    fn decoded_rows(&self) -> Vec<Row> {
        let Some(schema) = &self.schema else {
            return Vec::new();
        };
        self.rows
            .iter()
            .map(|row| decode_row(&schema.fields, row))
            .collect()
    }
}

fn decode_row(fields: &[ApiField], row: &Value) -> Row {
    let cells = row.get("f").and_then(Value::as_array);
    fields
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let value = cells
                .and_then(|c| c.get(i))
                .and_then(|cell| cell.get("v"))
                .map(|v| decode_value(field, v))
                .unwrap_or(Value::Null);
            (field.name.clone(), value)
        })
        .collect()
}

fn decode_value(field: &ApiField, v: &Value) -> Value {
    if v.is_null() {
        return Value::Null;
    }
    if field.mode.as_deref() == Some("REPEATED") {
        let items = v
            .as_array()
            .map(|cells| {
                cells
                    .iter()
                    .map(|cell| decode_scalar(field, cell.get("v").unwrap_or(&Value::Null)))
                    .collect()
            })
            .unwrap_or_default();
        return Value::Array(items);
    }
    decode_scalar(field, v)
}

fn decode_scalar(field: &ApiField, v: &Value) -> Value {
    if v.is_null() {
        return Value::Null;
    }
    let text = v.as_str();
    match field.field_type.as_str() {
        "RECORD" | "STRUCT" => Value::Object(decode_row(&field.fields, v)),
        "INTEGER" | "INT64" => text
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or(Value::Null),
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => text
            .and_then(|s| s.parse::<f64>().ok())
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BOOLEAN" | "BOOL" => text.map(|s| Value::Bool(s == "true")).unwrap_or(Value::Null),
        "TIMESTAMP" => text
            .and_then(|s| s.parse::<f64>().ok())
            .and_then(|secs| DateTime::from_timestamp_micros((secs * 1e6).round() as i64))
            .map(|ts| Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true)))
            .unwrap_or(Value::Null),
        _ => v.clone(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobsListResponse {
    #[serde(default)]
    jobs: Vec<ApiJob>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiJob {
    #[serde(default)]
    job_reference: Option<ApiJobReference>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default, rename = "user_email")]
    user_email: Option<String>,
    #[serde(default)]
    configuration: Option<ApiJobConfiguration>,
    #[serde(default)]
    statistics: Option<ApiJobStatistics>,
    #[serde(default)]
    error_result: Option<ApiErrorProto>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiJobConfiguration {
    #[serde(default)]
    job_type: Option<String>,
    #[serde(default)]
    query: Option<ApiQueryConfiguration>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiQueryConfiguration {
    #[serde(default)]
    query: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiJobStatistics {
    #[serde(default)]
    creation_time: Option<String>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
    #[serde(default)]
    total_bytes_processed: Option<String>,
    #[serde(default)]
    total_slot_ms: Option<String>,
    #[serde(default, rename = "reservation_id")]
    reservation_id: Option<String>,
    #[serde(default)]
    query: Option<ApiQueryStatistics>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiQueryStatistics {
    #[serde(default)]
    total_bytes_billed: Option<String>,
    #[serde(default)]
    cache_hit: Option<bool>,
    #[serde(default)]
    referenced_tables: Vec<ApiTableReference>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiTableReference {
    project_id: String,
    dataset_id: String,
    table_id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorProto {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn millis(value: &Option<String>) -> Option<DateTime<Utc>> {
    value
        .as_deref()
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

fn int(value: &Option<String>) -> Option<i64> {
    value.as_deref().and_then(|s| s.parse().ok())
}

impl ApiJob {
    fn into_record(self) -> JobRecord {
        let reference = self.job_reference;
        let stats = self.statistics.unwrap_or_default();
        let query_stats = stats.query.unwrap_or_default();
        let config = self.configuration.unwrap_or_default();

        JobRecord {
            ts: None,
            job_id: reference.as_ref().map(|r| r.job_id.clone()).unwrap_or_default(),
            project_id: reference
                .as_ref()
                .map(|r| r.project_id.clone())
                .unwrap_or_default(),
            location: reference.and_then(|r| r.location),
            user_email: self.user_email,
            state: self.state,
            creation_time: millis(&stats.creation_time),
            start_time: millis(&stats.start_time),
            end_time: millis(&stats.end_time),
            query: config.query.and_then(|q| q.query),
            total_bytes_processed: int(&stats.total_bytes_processed),
            total_bytes_billed: int(&query_stats.total_bytes_billed),
            total_slot_ms: int(&stats.total_slot_ms),
            job_type: config.job_type,
            cache_hit: query_stats.cache_hit,
            referenced_tables: query_stats
                .referenced_tables
                .into_iter()
                .map(|t| format!("{}.{}.{}", t.project_id, t.dataset_id, t.table_id))
                .collect(),
            reservation_id: stats.reservation_id,
            error_reason: self.error_result.as_ref().and_then(|e| e.reason.clone()),
            error_message: self.error_result.and_then(|e| e.message),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetsListResponse {
    #[serde(default)]
    datasets: Vec<ApiDatasetListEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiDatasetListEntry {
    dataset_reference: ApiDatasetReference,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiDatasetReference {
    dataset_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiDataset {
    #[serde(default)]
    storage_billing_model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<ApiInsertError>,
}

#[derive(Debug, Deserialize)]
struct ApiInsertError {
    #[serde(default)]
    index: u64,
    #[serde(default)]
    errors: Vec<ApiInsertErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiInsertErrorDetail {
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, field_type: &str) -> ApiField {
        ApiField {
            name: name.to_string(),
            field_type: field_type.to_string(),
            mode: None,
            fields: Vec::new(),
        }
    }

    #[test]
    fn test_decode_row_types() {
        let mut tags = field("tags", "STRING");
        tags.mode = Some("REPEATED".to_string());
        let fields = vec![
            field("name", "STRING"),
            field("rows", "INTEGER"),
            field("cost", "FLOAT"),
            field("deleted", "BOOLEAN"),
            field("created", "TIMESTAMP"),
            tags,
            field("missing", "STRING"),
        ];
        let row = json!({ "f": [
            { "v": "events" },
            { "v": "42" },
            { "v": "0.04" },
            { "v": "false" },
            { "v": "1.7040672E9" },
            { "v": [{ "v": "a" }, { "v": "b" }] },
            { "v": null },
        ]});

        let decoded = decode_row(&fields, &row);
        assert_eq!(decoded["name"], json!("events"));
        assert_eq!(decoded["rows"], json!(42));
        assert_eq!(decoded["cost"], json!(0.04));
        assert_eq!(decoded["deleted"], json!(false));
        assert_eq!(decoded["created"], json!("2024-01-01T00:00:00.000000Z"));
        assert_eq!(decoded["tags"], json!(["a", "b"]));
        assert_eq!(decoded["missing"], Value::Null);
    }

    #[test]
    fn test_job_conversion() {
        let job: ApiJob = serde_json::from_value(json!({
            "jobReference": { "projectId": "p", "jobId": "j1", "location": "US" },
            "state": "DONE",
            "user_email": "a@example.com",
            "configuration": { "jobType": "QUERY", "query": { "query": "SELECT 1" } },
            "statistics": {
                "creationTime": "1704067200000",
                "totalBytesProcessed": "1024",
                "totalSlotMs": "77",
                "query": {
                    "totalBytesBilled": "10485760",
                    "cacheHit": false,
                    "referencedTables": [{ "projectId": "p", "datasetId": "d", "tableId": "t" }]
                }
            },
            "errorResult": { "reason": "invalidQuery", "message": "bad" }
        }))
        .unwrap();

        let record = job.into_record();
        assert_eq!(record.job_id, "j1");
        assert_eq!(record.location.as_deref(), Some("US"));
        assert_eq!(
            record.creation_time,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(record.total_bytes_billed, Some(10_485_760));
        assert_eq!(record.referenced_tables, vec!["p.d.t".to_string()]);
        assert_eq!(record.error_reason.as_deref(), Some("invalidQuery"));
        assert!(record.ts.is_none());
    }

    #[test]
    fn test_creation_bounds_exclude_window_end() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let window = TimeWindow::new(start, start + chrono::Duration::days(1));
        let (min, max) = creation_bounds_ms(&window);
        assert_eq!(min, 1_704_067_200_000);
        assert_eq!(max, 1_704_153_599_999);
    }
}
