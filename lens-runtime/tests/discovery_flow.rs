//! Tables discovery against scripted warehouse and probe fakes

use lens_core::{DiscoveryRow, ExternalError, ProjectId, TenantId};
use lens_runtime::{BatcherConfig, Error, TablesDiscovery, TablesDiscoveryConfig};
use lens_tests::fixtures::table_row;
use lens_tests::{ScriptedQueryEngine, ScriptedUsageProbe, SinkFactory, StaticEnumerator, ThrottlingSink};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn discovery(
    enumerator: StaticEnumerator,
    probe: ScriptedUsageProbe,
    engine: Arc<ScriptedQueryEngine>,
    sink: Arc<ThrottlingSink<DiscoveryRow>>,
    batcher: BatcherConfig,
) -> TablesDiscovery {
    TablesDiscovery::new(
        Arc::new(enumerator),
        Arc::new(probe),
        engine,
        Arc::new(SinkFactory::new(sink)),
        TablesDiscoveryConfig {
            batcher,
            ..TablesDiscoveryConfig::default()
        },
    )
    .unwrap()
}

#[tokio::test]
async fn test_discovery_groups_regions_and_classifies_rows() {
    let probe = ScriptedUsageProbe::new()
        .with_attributes("proj-a", &["US", "EU"], &[("warehouse", "PHYSICAL")])
        .with_attributes("proj-b", &["US"], &[])
        .with_attributes_error("proj-c", ExternalError::forbidden("no access"))
        .with_attributes("sys-managed", &["US"], &[]);
    let engine = Arc::new(ScriptedQueryEngine::new().with_query_handler(|_, location| {
        match location {
            Some("EU") => Err(ExternalError::forbidden("org view not granted")),
            _ => Ok(vec![
                table_row("proj-a", "warehouse", "events_20240115"),
                table_row("proj-b", "staging", "users"),
            ]),
        }
    }));
    let sink = Arc::new(ThrottlingSink::unlimited());

    let outcome = discovery(
        StaticEnumerator::new(&["proj-a", "proj-b", "proj-c", "sys-managed"]),
        probe,
        engine.clone(),
        sink.clone(),
        BatcherConfig::default(),
    )
    .run(
        &TenantId::new("tenant-1"),
        &ProjectId::new("host-project"),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.projects, 4);
    assert_eq!(outcome.regions, vec!["EU".to_string(), "US".to_string()]);
    assert_eq!(outcome.failed_projects, vec![ProjectId::new("proj-c")]);
    assert_eq!(outcome.groups.chunks, 2);
    assert_eq!(outcome.groups.forbidden_chunks, 1);
    assert_eq!(outcome.groups.rows_written, 2);
    assert_eq!(
        outcome.destination.unwrap().to_string(),
        "host-project.lens_discovery.tables"
    );

    let queries = engine.queries();
    let us = queries
        .iter()
        .find(|(_, loc)| loc.as_deref() == Some("US"))
        .unwrap();
    assert!(us.0.contains("`proj-a.region-us`.INFORMATION_SCHEMA.TABLES"));
    assert!(us.0.contains("`proj-b.region-us`.INFORMATION_SCHEMA.TABLES"));
    assert!(!us.0.contains("sys-managed"));

    let rows = sink.accepted();
    let physical = rows
        .iter()
        .find(|r| r.get_str("project_id") == Some("proj-a"))
        .unwrap();
    assert_eq!(physical.get_str("storage_billing_model"), Some("PHYSICAL"));
    assert_eq!(physical.0["cost"], serde_json::json!(0.08));
    assert_eq!(physical.get_str("table_base_name"), Some("events"));

    let logical = rows
        .iter()
        .find(|r| r.get_str("project_id") == Some("proj-b"))
        .unwrap();
    assert_eq!(logical.get_str("storage_billing_model"), Some("LOGICAL"));
    assert_eq!(logical.0["cost"], serde_json::json!(0.04));
    assert!(rows.iter().all(|r| r.get_str("ts").is_some()));
}

#[tokio::test]
async fn test_chunks_never_exceed_batch_size() {
    let ids: Vec<String> = (0..7).map(|i| format!("proj-{i}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let mut probe = ScriptedUsageProbe::new();
    for id in &id_refs {
        probe = probe.with_attributes(id, &["US"], &[]);
    }
    let engine = Arc::new(ScriptedQueryEngine::new());
    let config = BatcherConfig {
        reference_limit: 4,
        shared_views: 1,
        views_per_project: 1,
    };

    let outcome = discovery(
        StaticEnumerator::new(&id_refs),
        probe,
        engine.clone(),
        Arc::new(ThrottlingSink::unlimited()),
        config,
    )
    .run(
        &TenantId::new("tenant-1"),
        &ProjectId::new("host-project"),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.groups.chunks, 3);
    let sizes: Vec<usize> = engine
        .queries()
        .iter()
        .map(|(sql, _)| sql.matches("INFORMATION_SCHEMA.TABLES").count())
        .collect();
    assert_eq!(sizes, vec![3, 3, 1]);
}

#[tokio::test]
async fn test_missing_feature_skips_chunk_and_other_errors_abort() {
    let probe = || {
        ScriptedUsageProbe::new()
            .with_attributes("proj-a", &["US"], &[])
            .with_attributes("proj-b", &["asia-northeast1"], &[])
    };

    let skipping = Arc::new(ScriptedQueryEngine::new().with_query_handler(|_, location| {
        match location {
            Some("US") => Err(ExternalError::not_found("dataset missing")),
            _ => Ok(vec![table_row("proj-b", "d", "t")]),
        }
    }));
    let outcome = discovery(
        StaticEnumerator::new(&["proj-a", "proj-b"]),
        probe(),
        skipping,
        Arc::new(ThrottlingSink::unlimited()),
        BatcherConfig::default(),
    )
    .run(
        &TenantId::new("t"),
        &ProjectId::new("host-project"),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.groups.skipped_chunks, 1);
    assert_eq!(outcome.groups.rows_written, 1);

    let failing = Arc::new(
        ScriptedQueryEngine::new()
            .with_query_handler(|_, _| Err(ExternalError::other("backend error"))),
    );
    let err = discovery(
        StaticEnumerator::new(&["proj-a", "proj-b"]),
        probe(),
        failing,
        Arc::new(ThrottlingSink::unlimited()),
        BatcherConfig::default(),
    )
    .run(
        &TenantId::new("t"),
        &ProjectId::new("host-project"),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::External(_)));
}

#[tokio::test]
async fn test_throttled_discovery_writes_converge() {
    let probe = ScriptedUsageProbe::new().with_attributes("proj-a", &["US"], &[]);
    let engine = Arc::new(ScriptedQueryEngine::new().with_query_handler(|_, _| {
        Ok((0..50)
            .map(|i| table_row("proj-a", "d", &format!("t{i}")))
            .collect())
    }));
    let sink = Arc::new(ThrottlingSink::with_limit(10));

    let outcome = discovery(
        StaticEnumerator::new(&["proj-a"]),
        probe,
        engine,
        sink.clone(),
        BatcherConfig::default(),
    )
    .run(
        &TenantId::new("t"),
        &ProjectId::new("host-project"),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.groups.rows_written, 50);
    assert_eq!(sink.accepted().len(), 50);
    assert!(sink.attempts().iter().any(|&n| n > 10));
}
