//! SQL for regional tables discovery
//!
//! One statement covers a chunk of projects in one region: a `UNION ALL` of
//! each project's `INFORMATION_SCHEMA.TABLES`, joined to the region's shared
//! `TABLE_STORAGE_BY_ORGANIZATION` view for byte counters.

use super::pricing::StoragePricing;
use chrono::NaiveDate;
use lens_core::ProjectId;

/// Views one chunk references besides the per-project ones
pub const SHARED_VIEWS_PER_QUERY: usize = 1;

/// Views referenced per project
pub const VIEWS_PER_PROJECT: usize = 1;

fn region_qualifier(region: &str) -> String {
    format!("region-{}", region.to_ascii_lowercase())
}

fn project_tables_fragment(project: &ProjectId, region: &str) -> String {
    format!(
        "SELECT table_catalog, table_schema, table_name, table_type, creation_time, ddl, \
         base_table_catalog, base_table_schema, base_table_name \
         FROM `{}.{}`.INFORMATION_SCHEMA.TABLES",
        project,
        region_qualifier(region)
    )
}

/// Combined discovery query for `projects` in `region`
pub fn regional_tables_query(
    region: &str,
    projects: &[ProjectId],
    pricing: &StoragePricing,
) -> String {
    let tables = projects
        .iter()
        .map(|p| project_tables_fragment(p, region))
        .collect::<Vec<_>>()
        .join("\n    UNION ALL\n    ");

    format!(
        r#"WITH
  tables AS (
    {tables}
  ),
  storage AS (
    SELECT * EXCEPT (creation_time, table_type)
    FROM `{qualifier}`.INFORMATION_SCHEMA.TABLE_STORAGE_BY_ORGANIZATION
  )
SELECT
  table_catalog AS project_id,
  table_schema AS dataset_id,
  table_name AS table_id,
  creation_time,
  ddl,
  table_type AS type,
  '{region}' AS location,
  base_table_catalog AS base_project_id,
  base_table_schema AS base_dataset_id,
  base_table_name AS base_table_id,
  total_rows,
  total_partitions,
  total_logical_bytes,
  active_logical_bytes,
  long_term_logical_bytes,
  total_physical_bytes,
  active_physical_bytes,
  long_term_physical_bytes,
  time_travel_physical_bytes,
  storage_last_modified_time,
  deleted,
  {physical} AS physical_cost,
  {logical} AS logical_cost
FROM tables
LEFT JOIN storage USING (table_catalog, table_schema, table_name)"#,
        tables = tables,
        qualifier = region_qualifier(region),
        region = region,
        physical = pricing.physical_cost_sql(),
        logical = pricing.logical_cost_sql(),
    )
}

/// Strip a date-shard suffix: `events_20240131` -> `events`
///
/// Only a trailing `_YYYYMMDD` that parses as a real calendar date counts.
pub fn table_base_name(table_id: &str) -> &str {
    if table_id.len() > 9 && table_id.is_char_boundary(table_id.len() - 9) {
        let (base, suffix) = table_id.split_at(table_id.len() - 9);
        if let Some(digits) = suffix.strip_prefix('_') {
            if digits.bytes().all(|b| b.is_ascii_digit())
                && NaiveDate::parse_from_str(digits, "%Y%m%d").is_ok()
            {
                return base;
            }
        }
    }
    table_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::pricing::pricing_for;

    #[test]
    fn test_query_has_one_fragment_per_project() {
        let projects = vec![ProjectId::new("a"), ProjectId::new("b"), ProjectId::new("c")];
        let sql = regional_tables_query("US", &projects, &pricing_for("US"));

        assert_eq!(sql.matches("INFORMATION_SCHEMA.TABLES").count(), 3);
        assert_eq!(sql.matches("UNION ALL").count(), 2);
        assert!(sql.contains("`a.region-us`.INFORMATION_SCHEMA.TABLES"));
        assert!(sql.contains("`region-us`.INFORMATION_SCHEMA.TABLE_STORAGE_BY_ORGANIZATION"));
        assert!(sql.contains("'US' AS location"));
    }

    #[test]
    fn test_table_base_name() {
        assert_eq!(table_base_name("events_20240131"), "events");
        assert_eq!(table_base_name("events_20241399"), "events_20241399");
        assert_eq!(table_base_name("events"), "events");
        assert_eq!(table_base_name("_20240131"), "_20240131");
        assert_eq!(table_base_name("v2_events_2024013x"), "v2_events_2024013x");
    }
}
