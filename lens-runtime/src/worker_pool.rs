//! Bounded fan-out over a set of projects
//!
//! A producer feeds project ids into a bounded flume queue; a fixed number of
//! workers take ids, run the probe and merge results into one shared report.
//! Shutdown is a cancellation token plus a join barrier: `run` returns only
//! after every worker has exited, so no partial report is ever observed.

use crate::metrics::POOL_PROBES_TOTAL;
use lens_core::{ExternalResult, ProjectId};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default worker count
pub const DEFAULT_WORKERS: usize = 4;

/// Project id prefixes never probed (system-managed projects)
pub const DEFAULT_DENYLIST: &[&str] = &["sys-"];

/// Merged output of one pool run
#[derive(Debug, Clone, PartialEq)]
pub struct PoolReport<R> {
    /// Projects whose probe returned a value, ordered by id
    pub results: Vec<(ProjectId, R)>,
    /// Projects whose probe failed; omitted from results
    pub failed: Vec<ProjectId>,
    /// Projects dropped by the denylist before submission
    pub denylisted: Vec<ProjectId>,
}

impl<R> Default for PoolReport<R> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            failed: Vec::new(),
            denylisted: Vec::new(),
        }
    }
}

impl<R> PoolReport<R> {
    /// Ids of projects with a result
    pub fn projects(&self) -> Vec<ProjectId> {
        self.results.iter().map(|(p, _)| p.clone()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryWorkerPool {
    workers: usize,
    queue_capacity: usize,
    denylist: Vec<String>,
}

impl DiscoveryWorkerPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            queue_capacity: workers * 2,
            denylist: DEFAULT_DENYLIST.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn with_denylist(mut self, prefixes: Vec<String>) -> Self {
        self.denylist = prefixes;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Probe every project with bounded concurrency
    ///
    /// `probe` returns `Ok(Some(value))` to keep a project, `Ok(None)` to
    /// drop it silently and `Err` to drop it with a warning. Errors are never
    /// retried or propagated. Once `cancel` fires no new id is handed out;
    /// probes already running finish.
    pub async fn run<R, F, Fut>(
        &self,
        projects: Vec<ProjectId>,
        probe: F,
        cancel: &CancellationToken,
    ) -> PoolReport<R>
    where
        R: Send + 'static,
        F: Fn(ProjectId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ExternalResult<Option<R>>> + Send + 'static,
    {
        let denylist: Vec<&str> = self.denylist.iter().map(String::as_str).collect();
        let (accepted, denylisted): (Vec<_>, Vec<_>) = projects
            .into_iter()
            .partition(|p| !p.has_prefix_in(&denylist));
        POOL_PROBES_TOTAL
            .with_label_values(&["denylisted"])
            .inc_by(denylisted.len() as u64);

        let submitted = accepted.len();
        let report = Arc::new(Mutex::new(PoolReport {
            denylisted,
            ..PoolReport::default()
        }));
        let probe = Arc::new(probe);
        let (sender, receiver) = flume::bounded::<ProjectId>(self.queue_capacity);

        let mut workers = JoinSet::new();
        for worker_idx in 0..self.workers {
            workers.spawn(run_worker(
                worker_idx,
                receiver.clone(),
                cancel.clone(),
                Arc::clone(&probe),
                Arc::clone(&report),
            ));
        }
        drop(receiver);

        for project in accepted {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Pool cancelled, no further projects submitted");
                    break;
                }
                sent = sender.send_async(project) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        drop(sender);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Discovery worker panicked");
            }
        }

        let mut report = match Arc::try_unwrap(report) {
            Ok(mutex) => mutex.into_inner(),
            Err(shared) => std::mem::take(&mut *shared.lock().await),
        };
        report.results.sort_by(|a, b| a.0.cmp(&b.0));
        report.failed.sort();

        info!(
            submitted,
            retained = report.results.len(),
            failed = report.failed.len(),
            denylisted = report.denylisted.len(),
            "Worker pool finished"
        );
        report
    }
}

async fn run_worker<R, F, Fut>(
    worker_idx: usize,
    receiver: flume::Receiver<ProjectId>,
    cancel: CancellationToken,
    probe: Arc<F>,
    report: Arc<Mutex<PoolReport<R>>>,
) -> usize
where
    F: Fn(ProjectId) -> Fut + Send + Sync,
    Fut: Future<Output = ExternalResult<Option<R>>> + Send,
{
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = receiver.recv_async() => {
                let Ok(project) = received else {
                    break;
                };

                match probe(project.clone()).await {
                    Ok(Some(value)) => {
                        POOL_PROBES_TOTAL.with_label_values(&["retained"]).inc();
                        report.lock().await.results.push((project, value));
                    }
                    Ok(None) => {
                        POOL_PROBES_TOTAL.with_label_values(&["filtered"]).inc();
                    }
                    Err(e) => {
                        POOL_PROBES_TOTAL.with_label_values(&["failed"]).inc();
                        warn!(
                            worker_idx,
                            project = %project,
                            error = %e,
                            "Probe failed, omitting project"
                        );
                        report.lock().await.failed.push(project);
                    }
                }
            }
        }
    }

    worker_idx
}
