//! Tables discovery cycle
//!
//! Enumerate a tenant's projects, discover each project's regions and
//! dataset billing models through the worker pool, then run one batched
//! metadata query per region chunk and append the rows to the destination
//! table.

pub mod batcher;
pub mod pricing;
pub mod query;

pub use batcher::{BatcherConfig, GroupReport, RegionQueryBatcher};

use crate::schemas::tables_discovery_schema;
use crate::worker_pool::{DiscoveryWorkerPool, DEFAULT_WORKERS};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use lens_core::{
    AnalyticalQueryEngine, BulkSinkFactory, DiscoveryRow, ProjectAttributes, ProjectId,
    ResourceEnumerator, TableRef, TenantId, UsageProbe,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Billing model assumed for datasets with no explicit setting
pub const DEFAULT_BILLING_MODEL: &str = "LOGICAL";

#[derive(Debug, Clone)]
pub struct TablesDiscoveryConfig {
    pub workers: usize,
    pub batcher: BatcherConfig,
    pub dataset: String,
    pub table: String,
}

impl Default for TablesDiscoveryConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            batcher: BatcherConfig::default(),
            dataset: "lens_discovery".to_string(),
            table: "tables".to_string(),
        }
    }
}

/// Summary of one discovery cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    pub projects: usize,
    pub regions: Vec<String>,
    pub failed_projects: Vec<ProjectId>,
    pub groups: GroupReport,
    pub destination: Option<TableRef>,
}

pub struct TablesDiscovery {
    enumerator: Arc<dyn ResourceEnumerator>,
    probe: Arc<dyn UsageProbe>,
    engine: Arc<dyn AnalyticalQueryEngine>,
    sinks: Arc<dyn BulkSinkFactory<DiscoveryRow>>,
    config: TablesDiscoveryConfig,
}

impl TablesDiscovery {
    pub fn new(
        enumerator: Arc<dyn ResourceEnumerator>,
        probe: Arc<dyn UsageProbe>,
        engine: Arc<dyn AnalyticalQueryEngine>,
        sinks: Arc<dyn BulkSinkFactory<DiscoveryRow>>,
        config: TablesDiscoveryConfig,
    ) -> Result<Self> {
        config.batcher.batch_size()?;
        if config.dataset.trim().is_empty() || config.table.trim().is_empty() {
            return Err(Error::Configuration(
                "discovery dataset and table cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            enumerator,
            probe,
            engine,
            sinks,
            config,
        })
    }

    /// Run one discovery cycle for `tenant`, writing into `destination_project`
    #[instrument(skip(self, cancel), fields(tenant_id = %tenant, destination = %destination_project))]
    pub async fn run(
        &self,
        tenant: &TenantId,
        destination_project: &ProjectId,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryOutcome> {
        let projects = self.enumerator.list_projects(tenant).await?;
        let mut outcome = DiscoveryOutcome {
            projects: projects.len(),
            ..DiscoveryOutcome::default()
        };

        let probe = Arc::clone(&self.probe);
        let pool = DiscoveryWorkerPool::new(self.config.workers);
        let report = pool
            .run(
                projects,
                move |project: ProjectId| {
                    let probe = Arc::clone(&probe);
                    async move { probe.discover_attributes(&project).await.map(Some) }
                },
                cancel,
            )
            .await;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        outcome.failed_projects = report.failed;

        let table = self
            .engine
            .ensure_destination_schema(
                &TableRef::new(
                    destination_project.as_str(),
                    &self.config.dataset,
                    &self.config.table,
                ),
                &tables_discovery_schema(),
            )
            .await?;

        let groups = group_by_region(&report.results);
        outcome.regions = groups.keys().cloned().collect();

        let hook = billing_model_hook(&report.results, Utc::now());
        let batcher = RegionQueryBatcher::new(
            Arc::clone(&self.engine),
            self.sinks.sink_for(&table),
            self.config.batcher,
            cancel.clone(),
        )?;
        for (region, projects) in &groups {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let group = batcher.run_group(region, projects, &hook).await?;
            outcome.groups.absorb(group);
        }

        info!(
            projects = outcome.projects,
            regions = outcome.regions.len(),
            rows = outcome.groups.rows_written,
            failed_projects = outcome.failed_projects.len(),
            "Tables discovery finished"
        );
        outcome.destination = Some(table);
        Ok(outcome)
    }
}

/// Region -> projects holding data there, both sorted
fn group_by_region(results: &[(ProjectId, ProjectAttributes)]) -> BTreeMap<String, Vec<ProjectId>> {
    let mut groups: BTreeMap<String, Vec<ProjectId>> = BTreeMap::new();
    for (project, attrs) in results {
        for region in &attrs.regions {
            groups.entry(region.clone()).or_default().push(project.clone());
        }
    }
    for projects in groups.values_mut() {
        projects.sort();
        projects.dedup();
    }
    groups
}

/// Row hook: billing model from the dataset map, the matching cost, the
/// shard-free table name and the run timestamp
fn billing_model_hook(
    results: &[(ProjectId, ProjectAttributes)],
    ts: DateTime<Utc>,
) -> impl Fn(&mut DiscoveryRow) + Send + Sync {
    let models: HashMap<String, HashMap<String, String>> = results
        .iter()
        .map(|(p, attrs)| (p.to_string(), attrs.storage_billing_models.clone()))
        .collect();
    let ts = ts.to_rfc3339();

    move |row: &mut DiscoveryRow| {
        let model = row
            .get_str("project_id")
            .zip(row.get_str("dataset_id"))
            .and_then(|(p, d)| models.get(p).and_then(|m| m.get(d)))
            .map(|m| m.to_ascii_uppercase())
            .unwrap_or_else(|| DEFAULT_BILLING_MODEL.to_string());

        let cost_field = if model == "PHYSICAL" {
            "physical_cost"
        } else {
            "logical_cost"
        };
        let cost = row.0.get(cost_field).cloned().unwrap_or(Value::Null);
        let base = row.get_str("table_id").map(|t| query::table_base_name(t).to_string());

        row.set("storage_billing_model", model);
        row.set("cost", cost);
        if let Some(base) = base {
            row.set("table_base_name", base);
        }
        row.set("ts", ts.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(regions: &[&str], models: &[(&str, &str)]) -> ProjectAttributes {
        ProjectAttributes {
            regions: regions.iter().map(|r| r.to_string()).collect(),
            storage_billing_models: models
                .iter()
                .map(|(d, m)| (d.to_string(), m.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_group_by_region() {
        let results = vec![
            (ProjectId::new("b"), attrs(&["US", "EU"], &[])),
            (ProjectId::new("a"), attrs(&["US"], &[])),
        ];
        let groups = group_by_region(&results);
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["EU", "US"]);
        assert_eq!(groups["US"], vec![ProjectId::new("a"), ProjectId::new("b")]);
    }

    #[test]
    fn test_hook_uses_dataset_billing_model() {
        let results = vec![(ProjectId::new("p"), attrs(&["US"], &[("phys", "PHYSICAL")]))];
        let hook = billing_model_hook(&results, Utc::now());

        let mut physical = DiscoveryRow(
            json!({
                "project_id": "p", "dataset_id": "phys", "table_id": "events_20240101",
                "physical_cost": 1.5, "logical_cost": 3.0
            })
            .as_object()
            .cloned()
            .unwrap(),
        );
        hook(&mut physical);
        assert_eq!(physical.get_str("storage_billing_model"), Some("PHYSICAL"));
        assert_eq!(physical.0["cost"], json!(1.5));
        assert_eq!(physical.get_str("table_base_name"), Some("events"));
        assert!(physical.get_str("ts").is_some());

        let mut logical = DiscoveryRow(
            json!({"project_id": "p", "dataset_id": "other", "table_id": "t", "logical_cost": 3.0})
                .as_object()
                .cloned()
                .unwrap(),
        );
        hook(&mut logical);
        assert_eq!(logical.get_str("storage_billing_model"), Some(DEFAULT_BILLING_MODEL));
        assert_eq!(logical.0["cost"], json!(3.0));
    }
}
