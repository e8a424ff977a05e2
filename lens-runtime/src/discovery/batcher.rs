//! Size-bounded discovery queries per region
//!
//! A warehouse statement may reference at most `reference_limit` tables or
//! views. Each chunk references `shared_views` regional views plus
//! `views_per_project` views for every project, so a group is cut into
//! chunks of `floor((reference_limit - shared_views) / views_per_project)`.

use super::pricing::pricing_for;
use super::query::{regional_tables_query, SHARED_VIEWS_PER_QUERY, VIEWS_PER_PROJECT};
use crate::batch_writer::ThrottleAwareBatchWriter;
use crate::metrics::DISCOVERY_CHUNKS_TOTAL;
use crate::{Error, Result};
use futures::TryStreamExt;
use lens_core::{
    AnalyticalQueryEngine, BulkSink, DiscoveryRow, ErrorKind, ExternalResult, ProjectId,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default maximum number of referenced tables per statement
pub const DEFAULT_REFERENCE_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatcherConfig {
    pub reference_limit: usize,
    pub shared_views: usize,
    pub views_per_project: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            reference_limit: DEFAULT_REFERENCE_LIMIT,
            shared_views: SHARED_VIEWS_PER_QUERY,
            views_per_project: VIEWS_PER_PROJECT,
        }
    }
}

impl BatcherConfig {
    /// Projects per chunk; rejects configurations that fit no project
    pub fn batch_size(&self) -> Result<usize> {
        if self.views_per_project == 0 {
            return Err(Error::Configuration(
                "views_per_project must be > 0".to_string(),
            ));
        }
        if self.reference_limit <= self.shared_views {
            return Err(Error::Configuration(format!(
                "reference_limit ({}) must exceed shared_views ({})",
                self.reference_limit, self.shared_views
            )));
        }
        let size = (self.reference_limit - self.shared_views) / self.views_per_project;
        if size == 0 {
            return Err(Error::Configuration(
                "reference_limit leaves no room for a single project".to_string(),
            ));
        }
        Ok(size)
    }
}

/// Outcome counters of one or more groups
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupReport {
    pub chunks: usize,
    pub rows_written: usize,
    /// Chunks skipped because a resource or feature was missing
    pub skipped_chunks: usize,
    /// Chunks skipped for lack of permission
    pub forbidden_chunks: usize,
}

impl GroupReport {
    pub fn absorb(&mut self, other: GroupReport) {
        self.chunks += other.chunks;
        self.rows_written += other.rows_written;
        self.skipped_chunks += other.skipped_chunks;
        self.forbidden_chunks += other.forbidden_chunks;
    }
}

pub struct RegionQueryBatcher {
    engine: Arc<dyn AnalyticalQueryEngine>,
    writer: ThrottleAwareBatchWriter<DiscoveryRow>,
    batch_size: usize,
}

impl RegionQueryBatcher {
    pub fn new(
        engine: Arc<dyn AnalyticalQueryEngine>,
        sink: Arc<dyn BulkSink<DiscoveryRow>>,
        config: BatcherConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let batch_size = config.batch_size()?;
        Ok(Self {
            engine,
            writer: ThrottleAwareBatchWriter::new(sink, "tables_discovery")
                .with_cancellation(cancel),
            batch_size,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Query, post-process and persist every chunk of one region's projects
    ///
    /// Missing-resource and permission failures skip the chunk; anything
    /// else aborts the group and is returned.
    #[instrument(skip(self, projects, hook), fields(projects = projects.len()))]
    pub async fn run_group<H>(
        &self,
        region: &str,
        projects: &[ProjectId],
        hook: &H,
    ) -> Result<GroupReport>
    where
        H: Fn(&mut DiscoveryRow) + Send + Sync,
    {
        let pricing = pricing_for(region);
        let mut report = GroupReport::default();

        for (idx, chunk) in projects.chunks(self.batch_size).enumerate() {
            report.chunks += 1;
            let sql = regional_tables_query(region, chunk, &pricing);

            let mut rows = match self.fetch(&sql, region).await {
                Ok(rows) => rows,
                Err(e) => match e.kind {
                    ErrorKind::NotFound | ErrorKind::BadRequest => {
                        DISCOVERY_CHUNKS_TOTAL.with_label_values(&["skipped"]).inc();
                        debug!(region, chunk = idx, error = %e, "Discovery chunk skipped");
                        report.skipped_chunks += 1;
                        continue;
                    }
                    ErrorKind::Forbidden => {
                        DISCOVERY_CHUNKS_TOTAL.with_label_values(&["forbidden"]).inc();
                        warn!(
                            region,
                            chunk = idx,
                            error = %e,
                            "Discovery chunk not permitted, skipping"
                        );
                        report.forbidden_chunks += 1;
                        continue;
                    }
                    _ => {
                        DISCOVERY_CHUNKS_TOTAL.with_label_values(&["failed"]).inc();
                        return Err(e.into());
                    }
                },
            };

            rows.iter_mut().for_each(hook);
            let written = self.writer.insert(&rows).await.map_err(|e| {
                DISCOVERY_CHUNKS_TOTAL.with_label_values(&["failed"]).inc();
                e
            })?;
            DISCOVERY_CHUNKS_TOTAL.with_label_values(&["written"]).inc();
            report.rows_written += written.written;
        }

        info!(
            region,
            chunks = report.chunks,
            rows = report.rows_written,
            skipped = report.skipped_chunks,
            forbidden = report.forbidden_chunks,
            "Region discovery finished"
        );
        Ok(report)
    }

    async fn fetch(&self, sql: &str, region: &str) -> ExternalResult<Vec<DiscoveryRow>> {
        let stream = self.engine.run_query(sql, Some(region)).await?;
        stream.map_ok(DiscoveryRow::from).try_collect().await
    }
}
