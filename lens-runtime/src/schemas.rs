//! Destination table layouts written by backfill and discovery

use lens_core::{FieldSchema, FieldType, TableSchema};

/// Historical jobs table, one row per backfilled job
pub fn historical_jobs_schema() -> TableSchema {
    use FieldType::*;

    TableSchema {
        fields: vec![
            FieldSchema::new("ts", Timestamp).required(),
            FieldSchema::new("jobId", String).required(),
            FieldSchema::new("projectId", String).required(),
            FieldSchema::new("location", String),
            FieldSchema::new("user_email", String),
            FieldSchema::new("state", String),
            FieldSchema::new("creationTime", Timestamp),
            FieldSchema::new("startTime", Timestamp),
            FieldSchema::new("endTime", Timestamp),
            FieldSchema::new("query", String),
            FieldSchema::new("totalBytesProcessed", Integer),
            FieldSchema::new("totalBytesBilled", Integer),
            FieldSchema::new("totalSlotMs", Integer),
            FieldSchema::new("jobType", String),
            FieldSchema::new("cacheHit", Boolean),
            FieldSchema::new("referencedTables", String).repeated(),
            FieldSchema::new("reservation_id", String),
            FieldSchema::new("errorReason", String),
            FieldSchema::new("errorMessage", String),
        ],
        partition_field: Some("creationTime".to_string()),
        clustering: vec!["projectId".to_string(), "user_email".to_string()],
    }
}

/// Tables discovery output, one row per table per discovery run
pub fn tables_discovery_schema() -> TableSchema {
    use FieldType::*;

    TableSchema {
        fields: vec![
            FieldSchema::new("ts", Timestamp).required(),
            FieldSchema::new("project_id", String).required(),
            FieldSchema::new("dataset_id", String).required(),
            FieldSchema::new("table_id", String).required(),
            FieldSchema::new("table_base_name", String),
            FieldSchema::new("creation_time", Timestamp),
            FieldSchema::new("ddl", String),
            FieldSchema::new("type", String),
            FieldSchema::new("location", String),
            FieldSchema::new("base_project_id", String),
            FieldSchema::new("base_dataset_id", String),
            FieldSchema::new("base_table_id", String),
            FieldSchema::new("total_rows", Integer),
            FieldSchema::new("total_partitions", Integer),
            FieldSchema::new("total_logical_bytes", Integer),
            FieldSchema::new("active_logical_bytes", Integer),
            FieldSchema::new("long_term_logical_bytes", Integer),
            FieldSchema::new("total_physical_bytes", Integer),
            FieldSchema::new("active_physical_bytes", Integer),
            FieldSchema::new("long_term_physical_bytes", Integer),
            FieldSchema::new("time_travel_physical_bytes", Integer),
            FieldSchema::new("storage_last_modified_time", Timestamp),
            FieldSchema::new("storage_billing_model", String),
            FieldSchema::new("deleted", Boolean),
            FieldSchema::new("cost", Float),
            FieldSchema::new("physical_cost", Float),
            FieldSchema::new("logical_cost", Float),
        ],
        partition_field: Some("ts".to_string()),
        clustering: vec!["project_id".to_string(), "dataset_id".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_core::JobRecord;

    #[test]
    fn test_job_record_fields_exist_in_schema() {
        let record = JobRecord {
            ts: Some(chrono::Utc::now()),
            job_id: "job_1".to_string(),
            project_id: "p".to_string(),
            location: Some("US".to_string()),
            cache_hit: Some(false),
            ..JobRecord::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        let schema = historical_jobs_schema();
        let names: Vec<&str> = schema.field_names().collect();

        for key in json.as_object().unwrap().keys() {
            assert!(names.contains(&key.as_str()), "missing column {key}");
        }
    }

    #[test]
    fn test_discovery_schema_carries_costs() {
        let schema = tables_discovery_schema();
        let names: Vec<&str> = schema.field_names().collect();
        for col in ["cost", "physical_cost", "logical_cost", "storage_billing_model"] {
            assert!(names.contains(&col));
        }
    }
}
