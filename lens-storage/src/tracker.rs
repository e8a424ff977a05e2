//! Backfill progress tracker
//!
//! Maps the sink / project / day hierarchy onto a [`ProgressStore`]. Every
//! write is a merge of the fields it owns, so concurrent writers touching
//! different keys never conflict and repeated writes are idempotent.

use crate::document::{from_document, to_document, Document, DocumentKey, DAYS, PROJECTS};
use crate::metrics::GC_DELETED_DOCUMENTS_TOTAL;
use crate::store::ProgressStore;
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use lens_core::{DatedWindow, DayWindow, ProjectId, ProjectProgress, Sink, SinkId, TimeWindow};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Default number of documents removed per delete call during clean-up
pub const DEFAULT_GC_CHUNK_SIZE: usize = 20;

/// Stored field names of the sink document
mod sink_fields {
    pub const REMAINING_PROJECTS: &str = "remaining_projects";
    pub const BACKFILL_DONE: &str = "backfill_done";
}

/// Stored field names of day window documents
mod day_fields {
    pub const MIN_CREATION_TIME: &str = "minCreationTime";
    pub const MAX_CREATION_TIME: &str = "maxCreationTime";
    pub const DONE: &str = "done";
    pub const PROCESS_END_TIME: &str = "processEndTime";
    pub const PROCESS_LAST_UPDATE_TIME: &str = "processLastUpdateTime";
}

#[derive(Clone)]
pub struct ProgressTracker {
    store: Arc<dyn ProgressStore>,
    gc_chunk_size: usize,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        Self {
            store,
            gc_chunk_size: DEFAULT_GC_CHUNK_SIZE,
        }
    }

    pub fn with_gc_chunk_size(mut self, chunk_size: usize) -> Self {
        self.gc_chunk_size = chunk_size.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn ProgressStore> {
        &self.store
    }

    /// Create or replace the sink root document
    #[instrument(skip(self, sink), fields(sink_id = %sink.id))]
    pub async fn register_sink(&self, sink: &Sink) -> Result<()> {
        let key = DocumentKey::sink(&sink.id);
        self.store.set(&key, to_document(&key, sink)?).await
    }

    #[instrument(skip(self))]
    pub async fn get_sink(&self, sink: &SinkId) -> Result<Sink> {
        let key = DocumentKey::sink(sink);
        match self.store.get(&key).await? {
            Some(doc) => from_document(&key, doc),
            None => Err(Error::NotFound(format!("sink {}", sink))),
        }
    }

    /// All day windows recorded for a project, ordered by date
    #[instrument(skip(self))]
    pub async fn get_project_dates(
        &self,
        sink: &SinkId,
        project: &ProjectId,
    ) -> Result<Vec<DatedWindow>> {
        let parent = DocumentKey::project(sink, project);
        let children = self.store.list_children(&parent, DAYS).await?;

        children
            .into_iter()
            .map(|(key, doc)| {
                let date = NaiveDate::parse_from_str(key.id(), "%Y-%m-%d").map_err(|e| {
                    Error::Internal(format!("bad day key {}: {}", key, e))
                })?;
                let window: DayWindow = from_document(&key, doc)?;
                Ok(DatedWindow { date, window })
            })
            .collect()
    }

    #[instrument(skip(self, window), fields(done = window.done))]
    pub async fn upsert_day_window(
        &self,
        sink: &SinkId,
        project: &ProjectId,
        date: NaiveDate,
        window: &DayWindow,
    ) -> Result<()> {
        let key = DocumentKey::day(sink, project, date);
        self.store.merge(&key, to_document(&key, window)?).await
    }

    /// Stamp `processLastUpdateTime` on a window that is being processed
    ///
    /// A window without a stored document was collected or pruned since it
    /// was dispatched; nothing is written for it and `false` is returned.
    pub async fn touch_day_window(
        &self,
        sink: &SinkId,
        project: &ProjectId,
        date: NaiveDate,
        window: &TimeWindow,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let key = DocumentKey::day(sink, project, date);
        if self.store.get(&key).await?.is_none() {
            debug!(sink_id = %sink, project = %project, %date, "No stored window to touch");
            return Ok(false);
        }
        let mut patch = window_bounds(window);
        patch.insert(day_fields::PROCESS_LAST_UPDATE_TIME.into(), json!(at));
        self.store.merge(&key, patch).await?;
        Ok(true)
    }

    /// Delete a project's day windows whose date fails `keep`
    ///
    /// Used when the retention horizon moved past windows that were never
    /// processed. Returns the number of deleted windows.
    #[instrument(skip(self, keep))]
    pub async fn retain_day_windows<F>(
        &self,
        sink: &SinkId,
        project: &ProjectId,
        keep: F,
    ) -> Result<usize>
    where
        F: Fn(NaiveDate) -> bool + Send,
    {
        let parent = DocumentKey::project(sink, project);
        let stale: Vec<DocumentKey> = self
            .store
            .list_children(&parent, DAYS)
            .await?
            .into_iter()
            .filter_map(|(key, _)| {
                let date = NaiveDate::parse_from_str(key.id(), "%Y-%m-%d").ok()?;
                (!keep(date)).then_some(key)
            })
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let deleted = self.store.delete_many(&stale).await?;
        info!(sink_id = %sink, project = %project, deleted, "Dropped day windows outside the backfill bounds");
        Ok(deleted)
    }

    /// Flip a window to done and stamp `processEndTime`
    #[instrument(skip(self, window))]
    pub async fn complete_day_window(
        &self,
        sink: &SinkId,
        project: &ProjectId,
        date: NaiveDate,
        window: &TimeWindow,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut patch = window_bounds(window);
        patch.insert(day_fields::DONE.into(), Value::Bool(true));
        patch.insert(day_fields::PROCESS_END_TIME.into(), json!(at));
        patch.insert(day_fields::PROCESS_LAST_UPDATE_TIME.into(), json!(at));
        self.store
            .merge(&DocumentKey::day(sink, project, date), patch)
            .await
    }

    /// Record project progress; `done` is set iff `percent == 100`
    #[instrument(skip(self))]
    pub async fn upsert_project_progress(
        &self,
        sink: &SinkId,
        project: &ProjectId,
        percent: u8,
    ) -> Result<ProjectProgress> {
        let progress = ProjectProgress::new(project.clone(), percent);
        let key = DocumentKey::project(sink, project);
        self.store.merge(&key, to_document(&key, &progress)?).await?;
        Ok(progress)
    }

    #[instrument(skip(self))]
    pub async fn get_sink_projects(&self, sink: &SinkId) -> Result<Vec<ProjectProgress>> {
        let parent = DocumentKey::sink(sink);
        let children = self.store.list_children(&parent, PROJECTS).await?;
        children
            .into_iter()
            .map(|(key, doc)| from_document(&key, doc))
            .collect()
    }

    /// Replace the sink's remaining-project list
    ///
    /// An empty list marks the sink complete and spawns clean-up of every
    /// project and day document under it. The returned handle may be awaited
    /// or dropped; clean-up failures are logged, never propagated.
    #[instrument(skip(self, projects), fields(remaining = projects.len()))]
    pub async fn update_remaining_projects(
        &self,
        sink: &SinkId,
        projects: &[ProjectId],
    ) -> Result<Option<JoinHandle<usize>>> {
        let key = DocumentKey::sink(sink);
        let mut patch = Document::new();
        patch.insert(
            sink_fields::REMAINING_PROJECTS.into(),
            serde_json::to_value(projects).map_err(|source| Error::Malformed {
                path: key.path().to_string(),
                source,
            })?,
        );
        patch.insert(
            sink_fields::BACKFILL_DONE.into(),
            Value::Bool(projects.is_empty()),
        );
        self.store.merge(&key, patch).await?;

        if !projects.is_empty() {
            return Ok(None);
        }

        info!(sink_id = %sink, "Backfill complete, collecting progress documents");
        let tracker = self.clone();
        let sink = sink.clone();
        Ok(Some(tokio::spawn(async move {
            match tracker.collect_garbage(&sink).await {
                Ok(deleted) => deleted,
                Err(e) => {
                    warn!(sink_id = %sink, error = %e, "Progress clean-up failed");
                    0
                }
            }
        })))
    }

    /// Recompute a project's percent from its day windows
    #[instrument(skip(self))]
    pub async fn roll_up_project(
        &self,
        sink: &SinkId,
        project: &ProjectId,
    ) -> Result<ProjectProgress> {
        let dates = self.get_project_dates(sink, project).await?;
        let done = dates.iter().filter(|d| d.window.done).count();
        let percent = ProjectProgress::percent_of(done, dates.len());
        debug!(
            sink_id = %sink,
            project = %project,
            done_days = done,
            total_days = dates.len(),
            percent,
            "Rolled up project progress"
        );
        self.upsert_project_progress(sink, project, percent).await
    }

    /// Recompute the sink's remaining list from its project progress
    ///
    /// Returns the remaining projects and, when none remain, the clean-up
    /// handle from [`update_remaining_projects`](Self::update_remaining_projects).
    #[instrument(skip(self))]
    pub async fn roll_up_remaining(
        &self,
        sink: &SinkId,
    ) -> Result<(Vec<ProjectId>, Option<JoinHandle<usize>>)> {
        let remaining: Vec<ProjectId> = self
            .get_sink_projects(sink)
            .await?
            .into_iter()
            .filter(|p| !p.done)
            .map(|p| p.project)
            .collect();
        let cleanup = self.update_remaining_projects(sink, &remaining).await?;
        Ok((remaining, cleanup))
    }

    /// Delete every project and day document of a sink in small chunks
    ///
    /// A failing chunk is logged and skipped; the remaining chunks still run.
    /// Returns the number of deleted documents.
    #[instrument(skip(self))]
    pub async fn collect_garbage(&self, sink: &SinkId) -> Result<usize> {
        let sink_key = DocumentKey::sink(sink);
        let mut keys = Vec::new();
        for (project_key, _) in self.store.list_children(&sink_key, PROJECTS).await? {
            for (day_key, _) in self.store.list_children(&project_key, DAYS).await? {
                keys.push(day_key);
            }
            keys.push(project_key);
        }

        let mut deleted = 0;
        for chunk in keys.chunks(self.gc_chunk_size) {
            match self.store.delete_many(chunk).await {
                Ok(n) => {
                    deleted += n;
                    debug!(sink_id = %sink, deleted = n, "Deleted progress chunk");
                }
                Err(e) => {
                    warn!(sink_id = %sink, error = %e, chunk = chunk.len(), "Failed to delete progress chunk");
                }
            }
        }

        GC_DELETED_DOCUMENTS_TOTAL.inc_by(deleted as u64);
        info!(sink_id = %sink, deleted, candidates = keys.len(), "Progress clean-up finished");
        Ok(deleted)
    }
}

fn window_bounds(window: &TimeWindow) -> Document {
    let mut doc = Document::new();
    doc.insert(day_fields::MIN_CREATION_TIME.into(), json!(window.start));
    doc.insert(day_fields::MAX_CREATION_TIME.into(), json!(window.end));
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryProgressStore;
    use chrono::TimeZone;
    use lens_core::TenantId;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn sink() -> Sink {
        Sink {
            id: SinkId::new("s1"),
            tenant_id: TenantId::new("t1"),
            source_project: ProjectId::new("host"),
            source_location: "US".to_string(),
            remaining_projects: vec![],
            backfill_done: false,
        }
    }

    fn tracker() -> (ProgressTracker, InMemoryProgressStore) {
        let store = InMemoryProgressStore::new();
        (ProgressTracker::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_get_sink_not_found() {
        let (tracker, _) = tracker();
        let err = tracker.get_sink(&SinkId::new("nope")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_day_window_roundtrip_and_order() {
        let (tracker, _) = tracker();
        let s = sink();
        let p = ProjectId::new("p1");

        for d in [3, 1, 2] {
            let w = DayWindow::pending(TimeWindow::for_day(date(d)));
            tracker.upsert_day_window(&s.id, &p, date(d), &w).await.unwrap();
        }

        let dates = tracker.get_project_dates(&s.id, &p).await.unwrap();
        let days: Vec<_> = dates.iter().map(|d| d.date).collect();
        assert_eq!(days, vec![date(1), date(2), date(3)]);
        assert!(dates.iter().all(|d| !d.window.done));
    }

    #[tokio::test]
    async fn test_complete_day_window_keeps_bounds() {
        let (tracker, _) = tracker();
        let s = sink();
        let p = ProjectId::new("p1");
        let window = TimeWindow::for_day(date(1));
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap();

        tracker
            .upsert_day_window(&s.id, &p, date(1), &DayWindow::pending(window))
            .await
            .unwrap();
        tracker
            .complete_day_window(&s.id, &p, date(1), &window, at)
            .await
            .unwrap();

        let dates = tracker.get_project_dates(&s.id, &p).await.unwrap();
        assert_eq!(dates.len(), 1);
        assert!(dates[0].window.done);
        assert_eq!(dates[0].window.process_end_time, Some(at));
        assert_eq!(dates[0].window.time_window(), window);
    }

    #[tokio::test]
    async fn test_project_progress_done_flag() {
        let (tracker, _) = tracker();
        let s = sink();

        tracker
            .upsert_project_progress(&s.id, &ProjectId::new("a"), 40)
            .await
            .unwrap();
        tracker
            .upsert_project_progress(&s.id, &ProjectId::new("b"), 100)
            .await
            .unwrap();

        let projects = tracker.get_sink_projects(&s.id).await.unwrap();
        assert_eq!(projects.len(), 2);
        assert!(!projects[0].done);
        assert!(projects[1].done);
    }

    #[tokio::test]
    async fn test_update_remaining_projects_non_empty_keeps_state() {
        let (tracker, store) = tracker();
        let s = sink();
        tracker.register_sink(&s).await.unwrap();
        tracker
            .upsert_project_progress(&s.id, &ProjectId::new("a"), 0)
            .await
            .unwrap();

        let handle = tracker
            .update_remaining_projects(&s.id, &[ProjectId::new("a")])
            .await
            .unwrap();
        assert!(handle.is_none());

        let stored = tracker.get_sink(&s.id).await.unwrap();
        assert_eq!(stored.remaining_projects, vec![ProjectId::new("a")]);
        assert!(!stored.backfill_done);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_empty_remaining_completes_and_collects() {
        let (tracker, store) = tracker();
        let tracker = tracker.with_gc_chunk_size(3);
        let s = sink();
        tracker.register_sink(&s).await.unwrap();

        for p in ["a", "b"] {
            let p = ProjectId::new(p);
            tracker.upsert_project_progress(&s.id, &p, 100).await.unwrap();
            for d in 1..=4 {
                let w = DayWindow::pending(TimeWindow::for_day(date(d)));
                tracker.upsert_day_window(&s.id, &p, date(d), &w).await.unwrap();
            }
        }
        assert_eq!(store.len().await, 11);

        let handle = tracker
            .update_remaining_projects(&s.id, &[])
            .await
            .unwrap()
            .expect("clean-up should be spawned");
        assert_eq!(handle.await.unwrap(), 10);

        // Only the sink root survives
        assert_eq!(store.paths().await, vec!["sink/s1".to_string()]);
        let stored = tracker.get_sink(&s.id).await.unwrap();
        assert!(stored.backfill_done);
        assert!(stored.remaining_projects.is_empty());
    }

    #[tokio::test]
    async fn test_roll_up_three_of_four_then_all() {
        let (tracker, _) = tracker();
        let s = sink();
        let p = ProjectId::new("p1");
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        tracker.register_sink(&s).await.unwrap();
        tracker.upsert_project_progress(&s.id, &p, 0).await.unwrap();

        for d in 1..=4 {
            let w = DayWindow::pending(TimeWindow::for_day(date(d)));
            tracker.upsert_day_window(&s.id, &p, date(d), &w).await.unwrap();
        }
        for d in 1..=3 {
            tracker
                .complete_day_window(&s.id, &p, date(d), &TimeWindow::for_day(date(d)), at)
                .await
                .unwrap();
        }

        let progress = tracker.roll_up_project(&s.id, &p).await.unwrap();
        assert_eq!(progress.percent, 75);
        assert!(!progress.done);
        let (remaining, cleanup) = tracker.roll_up_remaining(&s.id).await.unwrap();
        assert_eq!(remaining, vec![p.clone()]);
        assert!(cleanup.is_none());

        tracker
            .complete_day_window(&s.id, &p, date(4), &TimeWindow::for_day(date(4)), at)
            .await
            .unwrap();
        let progress = tracker.roll_up_project(&s.id, &p).await.unwrap();
        assert_eq!(progress.percent, 100);
        assert!(progress.done);
        let (remaining, cleanup) = tracker.roll_up_remaining(&s.id).await.unwrap();
        assert!(remaining.is_empty());
        assert_eq!(cleanup.unwrap().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_collect_garbage_leaves_other_sinks() {
        let (tracker, store) = tracker();
        let other = SinkId::new("s2");
        tracker
            .upsert_project_progress(&other, &ProjectId::new("x"), 10)
            .await
            .unwrap();

        let deleted = tracker.collect_garbage(&SinkId::new("s1")).await.unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_touch_after_collection_writes_nothing() {
        let (tracker, store) = tracker();
        let s = sink();
        let p = ProjectId::new("p1");
        let window = TimeWindow::for_day(date(1));
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        let touched = tracker
            .touch_day_window(&s.id, &p, date(1), &window, at)
            .await
            .unwrap();
        assert!(!touched);
        assert!(store.is_empty().await);

        tracker
            .upsert_day_window(&s.id, &p, date(1), &DayWindow::pending(window))
            .await
            .unwrap();
        assert!(tracker
            .touch_day_window(&s.id, &p, date(1), &window, at)
            .await
            .unwrap());
        let dates = tracker.get_project_dates(&s.id, &p).await.unwrap();
        assert_eq!(dates[0].window.process_last_update_time, Some(at));
        assert!(!dates[0].window.done);
    }

    #[tokio::test]
    async fn test_window_without_done_field_reads_as_pending() {
        let (tracker, _) = tracker();
        let s = sink();
        let p = ProjectId::new("p1");
        tracker
            .store()
            .merge(
                &DocumentKey::day(&s.id, &p, date(2)),
                window_bounds(&TimeWindow::for_day(date(2))),
            )
            .await
            .unwrap();

        let dates = tracker.get_project_dates(&s.id, &p).await.unwrap();
        assert_eq!(dates.len(), 1);
        assert!(!dates[0].window.done);
        assert_eq!(tracker.roll_up_project(&s.id, &p).await.unwrap().percent, 0);
    }

    #[tokio::test]
    async fn test_retain_day_windows_drops_only_rejected_dates() {
        let (tracker, _) = tracker();
        let s = sink();
        let p = ProjectId::new("p1");
        let other = ProjectId::new("p2");
        for d in 1..=3 {
            let w = DayWindow::pending(TimeWindow::for_day(date(d)));
            tracker.upsert_day_window(&s.id, &p, date(d), &w).await.unwrap();
            tracker.upsert_day_window(&s.id, &other, date(d), &w).await.unwrap();
        }

        let deleted = tracker
            .retain_day_windows(&s.id, &p, |d| d >= date(2))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        let kept: Vec<NaiveDate> = tracker
            .get_project_dates(&s.id, &p)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.date)
            .collect();
        assert_eq!(kept, vec![date(2), date(3)]);
        assert_eq!(tracker.get_project_dates(&s.id, &other).await.unwrap().len(), 3);
    }
}
