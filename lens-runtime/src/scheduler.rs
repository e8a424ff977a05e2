//! Backfill scheduling for one sink
//!
//! Computes the backfill bounds, filters the tenant's projects down to those
//! with usage inside the bounds, persists progress and day windows, then fans
//! one task unit per (project, day) out to the dispatch queue. Unit executors
//! pick the units up independently and coordinate only through the
//! [`ProgressTracker`].

use crate::concurrency::ConcurrencyLimiter;
use crate::metrics::DISPATCH_TOTAL;
use crate::schemas::historical_jobs_schema;
use crate::state_machine::{BackfillState, BackfillStateMachine};
use crate::worker_pool::{DiscoveryWorkerPool, DEFAULT_DENYLIST, DEFAULT_WORKERS};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use lens_core::{
    AnalyticalQueryEngine, BackfillBounds, BackfillTaskUnit, DayWindow, ProjectId,
    ResourceEnumerator, Sink, SinkId, TableRef, TaskDispatcher, TaskRequest, UsageProbe,
};
use lens_storage::ProgressTracker;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Days of history to backfill behind today (default: 30)
    pub retention_days: u32,
    /// Usage probe workers (default: 4)
    pub discovery_workers: usize,
    /// Maximum in-flight enqueue calls (default: 64)
    pub dispatch_concurrency: usize,
    /// How long the queue waits on one unit (default: 30 minutes)
    pub dispatch_deadline: Duration,
    /// Worker route units are delivered to
    pub execute_path: String,
    /// Dataset of the historical jobs table, inside the sink's source project
    pub backfill_dataset: String,
    pub backfill_table: String,
    /// Project id prefixes never probed
    pub denylist: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            discovery_workers: DEFAULT_WORKERS,
            dispatch_concurrency: 64,
            dispatch_deadline: Duration::from_secs(1800),
            execute_path: "/tasks/backfill/execute".to_string(),
            backfill_dataset: "lens_usage".to_string(),
            backfill_table: "historical_jobs".to_string(),
            denylist: DEFAULT_DENYLIST.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl SchedulerConfig {
    /// Load from environment variables, falling back to defaults
    ///
    /// Environment variables:
    /// - `LENS_RETENTION_DAYS`
    /// - `LENS_DISCOVERY_WORKERS`
    /// - `LENS_DISPATCH_CONCURRENCY`
    /// - `LENS_DISPATCH_DEADLINE_SECS`
    /// - `LENS_EXECUTE_PATH`
    /// - `LENS_BACKFILL_DATASET`, `LENS_BACKFILL_TABLE`
    /// - `LENS_PROJECT_DENYLIST`: comma-separated prefixes
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            retention_days: parse_env("LENS_RETENTION_DAYS", defaults.retention_days)?,
            discovery_workers: parse_env("LENS_DISCOVERY_WORKERS", defaults.discovery_workers)?,
            dispatch_concurrency: parse_env(
                "LENS_DISPATCH_CONCURRENCY",
                defaults.dispatch_concurrency,
            )?,
            dispatch_deadline: Duration::from_secs(parse_env(
                "LENS_DISPATCH_DEADLINE_SECS",
                defaults.dispatch_deadline.as_secs(),
            )?),
            execute_path: env::var("LENS_EXECUTE_PATH").unwrap_or(defaults.execute_path),
            backfill_dataset: env::var("LENS_BACKFILL_DATASET")
                .unwrap_or(defaults.backfill_dataset),
            backfill_table: env::var("LENS_BACKFILL_TABLE").unwrap_or(defaults.backfill_table),
            denylist: match env::var("LENS_PROJECT_DENYLIST") {
                Ok(raw) => raw
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect(),
                Err(_) => defaults.denylist,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retention_days == 0 {
            return Err(Error::Configuration(
                "retention_days must be > 0".to_string(),
            ));
        }
        if self.discovery_workers == 0 || self.dispatch_concurrency == 0 {
            return Err(Error::Configuration(
                "discovery_workers and dispatch_concurrency must be > 0".to_string(),
            ));
        }
        if self.dispatch_deadline.is_zero() {
            return Err(Error::Configuration(
                "dispatch_deadline must be > 0".to_string(),
            ));
        }
        if !self.execute_path.starts_with('/') {
            return Err(Error::Configuration(format!(
                "execute_path must start with '/': {}",
                self.execute_path
            )));
        }
        if self.backfill_dataset.is_empty() || self.backfill_table.is_empty() {
            return Err(Error::Configuration(
                "backfill dataset and table cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Configuration(format!("{name} is not a valid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

/// Result of one scheduling run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleOutcome {
    pub state: BackfillState,
    /// Projects still being backfilled after this run
    pub projects: Vec<ProjectId>,
    pub dispatched: usize,
    pub dispatch_failures: usize,
}

impl ScheduleOutcome {
    fn finished(state: BackfillState, projects: Vec<ProjectId>) -> Self {
        Self {
            state,
            projects,
            dispatched: 0,
            dispatch_failures: 0,
        }
    }
}

pub struct BackfillScheduler {
    tracker: ProgressTracker,
    enumerator: Arc<dyn ResourceEnumerator>,
    probe: Arc<dyn UsageProbe>,
    engine: Arc<dyn AnalyticalQueryEngine>,
    dispatcher: Arc<dyn TaskDispatcher>,
    config: SchedulerConfig,
}

impl BackfillScheduler {
    pub fn new(
        tracker: ProgressTracker,
        enumerator: Arc<dyn ResourceEnumerator>,
        probe: Arc<dyn UsageProbe>,
        engine: Arc<dyn AnalyticalQueryEngine>,
        dispatcher: Arc<dyn TaskDispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            tracker,
            enumerator,
            probe,
            engine,
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub async fn schedule_backfill(
        &self,
        sink_id: &SinkId,
        test_mode: bool,
        cancel: &CancellationToken,
    ) -> Result<ScheduleOutcome> {
        self.schedule_backfill_at(sink_id, test_mode, Utc::now(), cancel)
            .await
    }

    /// Schedule with an explicit clock, used to pin the retention horizon
    #[instrument(skip(self, cancel), fields(sink_id = %sink_id))]
    pub async fn schedule_backfill_at(
        &self,
        sink_id: &SinkId,
        test_mode: bool,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ScheduleOutcome> {
        let mut machine = BackfillStateMachine::new();
        machine.transition(BackfillState::Computing)?;

        let sink = self.tracker.get_sink(sink_id).await?;
        self.engine
            .ensure_destination_schema(
                &TableRef::new(
                    sink.source_project.as_str(),
                    &self.config.backfill_dataset,
                    &self.config.backfill_table,
                ),
                &historical_jobs_schema(),
            )
            .await?;

        let Some(bounds) = self.compute_bounds(&sink, now).await? else {
            info!(sink_id = %sink_id, "Nothing to backfill");
            return self.complete(&mut machine, sink_id).await;
        };
        info!(
            sink_id = %sink_id,
            lower = %bounds.lower(),
            upper = %bounds.upper(),
            "Computed backfill bounds"
        );

        let retained = self.filter_projects(&sink, &bounds, cancel).await?;
        let remaining = self.persist_progress(sink_id, &retained).await?;
        if remaining.is_empty() {
            return self.complete(&mut machine, sink_id).await;
        }

        if test_mode {
            self.tracker
                .update_remaining_projects(sink_id, &remaining)
                .await?;
            machine.transition(BackfillState::Computed)?;
            info!(sink_id = %sink_id, projects = remaining.len(), "Test mode, nothing dispatched");
            return Ok(ScheduleOutcome::finished(machine.current_state(), remaining));
        }

        machine.transition(BackfillState::Dispatched)?;
        let units = self.persist_windows(&sink, &bounds, &remaining).await?;
        self.tracker
            .update_remaining_projects(sink_id, &remaining)
            .await?;

        if units.is_empty() {
            // Every window was already done; only the roll-up was missing
            let (still_remaining, _cleanup) = self.tracker.roll_up_remaining(sink_id).await?;
            if still_remaining.is_empty() {
                machine.transition(BackfillState::Complete)?;
            } else {
                machine.transition(BackfillState::InProgress)?;
            }
            return Ok(ScheduleOutcome::finished(
                machine.current_state(),
                still_remaining,
            ));
        }

        let (dispatched, dispatch_failures) = self.dispatch(units, cancel).await?;
        machine.transition(BackfillState::InProgress)?;

        info!(
            sink_id = %sink_id,
            projects = remaining.len(),
            dispatched,
            dispatch_failures,
            path = ?machine.path(),
            "Backfill scheduled"
        );
        Ok(ScheduleOutcome {
            state: machine.current_state(),
            projects: remaining,
            dispatched,
            dispatch_failures,
        })
    }

    async fn compute_bounds(
        &self,
        sink: &Sink,
        now: DateTime<Utc>,
    ) -> Result<Option<BackfillBounds>> {
        let lower = BackfillBounds::retention_lower_bound(now, self.config.retention_days);
        let upper = self.engine.earliest_captured_record(sink).await?;
        Ok(upper.and_then(|upper| BackfillBounds::new(lower, upper)))
    }

    /// Projects with usage inside the bounds, ordered by id
    async fn filter_projects(
        &self,
        sink: &Sink,
        bounds: &BackfillBounds,
        cancel: &CancellationToken,
    ) -> Result<Vec<ProjectId>> {
        let candidates = self.enumerator.list_projects(&sink.tenant_id).await?;
        let window = bounds.as_window();
        let probe = Arc::clone(&self.probe);

        let report = DiscoveryWorkerPool::new(self.config.discovery_workers)
            .with_denylist(self.config.denylist.clone())
            .run(
                candidates,
                move |project: ProjectId| {
                    let probe = Arc::clone(&probe);
                    async move {
                        let used = probe.has_usage(&project, &window).await?;
                        Ok(used.then_some(()))
                    }
                },
                cancel,
            )
            .await;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(report.projects())
    }

    /// Seed 0% progress for new projects; returns those not yet done
    ///
    /// Projects with stored, unfinished progress stay remaining even when
    /// this run's usage check dropped them. A transient usage error must not
    /// complete the sink underneath units that are still queued.
    async fn persist_progress(
        &self,
        sink_id: &SinkId,
        retained: &[ProjectId],
    ) -> Result<Vec<ProjectId>> {
        let existing: HashMap<ProjectId, bool> = self
            .tracker
            .get_sink_projects(sink_id)
            .await?
            .into_iter()
            .map(|p| (p.project, p.done))
            .collect();

        let mut remaining = BTreeSet::new();
        for project in retained {
            match existing.get(project) {
                Some(true) => {
                    debug!(project = %project, "Project already backfilled");
                }
                Some(false) => {
                    remaining.insert(project.clone());
                }
                None => {
                    self.tracker
                        .upsert_project_progress(sink_id, project, 0)
                        .await?;
                    remaining.insert(project.clone());
                }
            }
        }

        for (project, done) in existing {
            if !done && !remaining.contains(&project) {
                warn!(project = %project, "Project not retained this run, keeping its stored progress");
                remaining.insert(project);
            }
        }
        Ok(remaining.into_iter().collect())
    }

    /// Persist every pending day window before any unit is enqueued
    ///
    /// An executor rolls its project up from the full window set, so all
    /// windows must exist before the first one can complete.
    async fn persist_windows(
        &self,
        sink: &Sink,
        bounds: &BackfillBounds,
        projects: &[ProjectId],
    ) -> Result<Vec<BackfillTaskUnit>> {
        let days = bounds.days();
        let in_bounds: HashSet<NaiveDate> = days.iter().copied().collect();
        let mut units = Vec::with_capacity(projects.len() * days.len());

        for project in projects {
            // Windows behind a moved horizon are never dispatched again
            self.tracker
                .retain_day_windows(&sink.id, project, |date| in_bounds.contains(&date))
                .await?;

            let done: HashSet<NaiveDate> = self
                .tracker
                .get_project_dates(&sink.id, project)
                .await?
                .into_iter()
                .filter(|d| d.window.done)
                .map(|d| d.date)
                .collect();

            let mut pending = 0;
            for &date in &days {
                if done.contains(&date) {
                    DISPATCH_TOTAL.with_label_values(&["skipped_done"]).inc();
                    continue;
                }
                let window = bounds.clip_day(date);
                self.tracker
                    .upsert_day_window(&sink.id, project, date, &DayWindow::pending(window))
                    .await?;
                units.push(BackfillTaskUnit {
                    sink_id: sink.id.clone(),
                    tenant_id: sink.tenant_id.clone(),
                    project: project.clone(),
                    date,
                    window,
                });
                pending += 1;
            }

            if pending == 0 {
                self.tracker.roll_up_project(&sink.id, project).await?;
            }
        }
        Ok(units)
    }

    /// Enqueue units with bounded fan-out; failed enqueues are logged and dropped
    ///
    /// Each unit gets exactly one `enqueue` call. A dispatcher may retry
    /// throttled or 5xx transport responses inside that call (the Cloud Tasks
    /// adapter does, up to three attempts), but a call that still fails is
    /// counted in `dispatch_failures` and the unit waits for the next cycle.
    async fn dispatch(
        &self,
        units: Vec<BackfillTaskUnit>,
        cancel: &CancellationToken,
    ) -> Result<(usize, usize)> {
        let limiter = ConcurrencyLimiter::new(self.config.dispatch_concurrency);
        let mut tasks = JoinSet::new();
        let mut cancelled = false;

        for unit in units {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let body = serde_json::to_vec(&unit)
                .map_err(|e| Error::Internal(format!("failed to encode task unit: {e}")))?;
            let request = TaskRequest {
                path: self.config.execute_path.clone(),
                body,
                dispatch_deadline: self.config.dispatch_deadline,
            };

            let permit = limiter.acquire().await?;
            let dispatcher = Arc::clone(&self.dispatcher);
            tasks.spawn(async move {
                let _permit = permit;
                match dispatcher.enqueue(request).await {
                    Ok(handle) => {
                        DISPATCH_TOTAL.with_label_values(&["success"]).inc();
                        debug!(project = %unit.project, date = %unit.date, handle = %handle, "Unit enqueued");
                        true
                    }
                    Err(e) => {
                        DISPATCH_TOTAL.with_label_values(&["failure"]).inc();
                        warn!(
                            project = %unit.project,
                            date = %unit.date,
                            error = %e,
                            "Failed to enqueue unit, dropping"
                        );
                        false
                    }
                }
            });
        }

        let (mut dispatched, mut failures) = (0, 0);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => dispatched += 1,
                Ok(false) => failures += 1,
                Err(e) => {
                    error!(error = %e, "Dispatch task panicked");
                    failures += 1;
                }
            }
        }

        if cancelled {
            return Err(Error::Cancelled);
        }
        Ok((dispatched, failures))
    }

    async fn complete(
        &self,
        machine: &mut BackfillStateMachine,
        sink_id: &SinkId,
    ) -> Result<ScheduleOutcome> {
        // Clean-up runs detached; its failures are logged by the tracker
        let _cleanup = self.tracker.update_remaining_projects(sink_id, &[]).await?;
        machine.transition(BackfillState::Complete)?;
        Ok(ScheduleOutcome::finished(machine.current_state(), Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_config() {
        let zero = SchedulerConfig {
            dispatch_concurrency: 0,
            ..SchedulerConfig::default()
        };
        assert!(zero.validate().is_err());

        let relative = SchedulerConfig {
            execute_path: "tasks/execute".to_string(),
            ..SchedulerConfig::default()
        };
        assert!(relative.validate().is_err());
    }

    #[test]
    fn test_parse_env_default() {
        let v: u32 = parse_env("LENS_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(v, 7);
    }
}
