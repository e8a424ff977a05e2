//! PostgreSQL progress store
//!
//! One row per document in `progress_documents`, body in a JSONB column.
//! Merges use `doc || patch`, which overwrites top-level keys only.

use crate::document::{Document, DocumentKey};
use crate::metrics::{STORE_OPERATIONS_TOTAL, STORE_OPERATION_DURATION};
use crate::store::ProgressStore;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::{Duration, Instant};
use tracing::{error, instrument, warn};

/// Configuration for the PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 30,
            idle_timeout_secs: Some(600),
        }
    }
}

/// PostgreSQL-backed [`ProgressStore`]
#[derive(Clone)]
pub struct PostgresProgressStore {
    pool: PgPool,
}

impl PostgresProgressStore {
    /// Connect with the default pool configuration
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::with_pool_config(database_url, PoolConfig::default()).await
    }

    pub async fn with_pool_config(database_url: &str, config: PoolConfig) -> Result<Self> {
        if config.min_connections == 0 {
            return Err(crate::Error::ValidationError(
                "min_connections must be > 0".to_string(),
            ));
        }
        if config.max_connections < config.min_connections {
            return Err(crate::Error::ValidationError(
                "max_connections must be >= min_connections".to_string(),
            ));
        }

        let mut opts = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs));
        if let Some(idle) = config.idle_timeout_secs {
            opts = opts.idle_timeout(Duration::from_secs(idle));
        }

        let pool = opts.connect(database_url).await.map_err(map_db_error)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run all pending migrations (creates `progress_documents`)
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| crate::Error::Migration(e.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }

    fn observe(operation: &str, started: Instant) {
        let elapsed = started.elapsed();
        STORE_OPERATIONS_TOTAL
            .with_label_values(&["postgres", operation])
            .inc();
        STORE_OPERATION_DURATION
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
        if elapsed.as_millis() > 100 {
            warn!(
                operation,
                duration_ms = elapsed.as_millis() as u64,
                "Slow progress store operation detected"
            );
        }
    }
}

fn into_document(path: &str, value: Value) -> Result<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(crate::Error::Internal(format!(
            "document at {} is not an object: {}",
            path, other
        ))),
    }
}

#[async_trait]
impl ProgressStore for PostgresProgressStore {
    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "SELECT", path = %key)
    )]
    async fn get(&self, key: &DocumentKey) -> Result<Option<Document>> {
        let started = Instant::now();
        let row = sqlx::query("SELECT doc FROM progress_documents WHERE path = $1")
            .bind(key.path())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        Self::observe("get", started);

        match row {
            Some(row) => {
                let value: Value = row.try_get("doc").map_err(map_db_error)?;
                Ok(Some(into_document(key.path(), value)?))
            }
            None => Ok(None),
        }
    }

    #[instrument(
        skip(self, doc),
        fields(db.system = "postgresql", db.operation = "UPSERT", path = %key)
    )]
    async fn set(&self, key: &DocumentKey, doc: Document) -> Result<()> {
        let started = Instant::now();
        sqlx::query(
            r#"
            INSERT INTO progress_documents (path, collection_path, doc, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (path) DO UPDATE
            SET doc = EXCLUDED.doc, updated_at = now()
            "#,
        )
        .bind(key.path())
        .bind(key.collection_path())
        .bind(Value::Object(doc))
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Self::observe("set", started);
        Ok(())
    }

    #[instrument(
        skip(self, patch),
        fields(db.system = "postgresql", db.operation = "UPSERT", path = %key)
    )]
    async fn merge(&self, key: &DocumentKey, patch: Document) -> Result<()> {
        let started = Instant::now();
        sqlx::query(
            r#"
            INSERT INTO progress_documents (path, collection_path, doc, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (path) DO UPDATE
            SET doc = progress_documents.doc || EXCLUDED.doc, updated_at = now()
            "#,
        )
        .bind(key.path())
        .bind(key.collection_path())
        .bind(Value::Object(patch))
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Self::observe("merge", started);
        Ok(())
    }

    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "DELETE", path = %key)
    )]
    async fn delete(&self, key: &DocumentKey) -> Result<()> {
        let started = Instant::now();
        sqlx::query("DELETE FROM progress_documents WHERE path = $1")
            .bind(key.path())
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Self::observe("delete", started);
        Ok(())
    }

    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "SELECT", parent = %parent)
    )]
    async fn list_children(
        &self,
        parent: &DocumentKey,
        collection: &str,
    ) -> Result<Vec<(DocumentKey, Document)>> {
        let started = Instant::now();
        let rows = sqlx::query(
            "SELECT path, doc FROM progress_documents WHERE collection_path = $1 ORDER BY path",
        )
        .bind(parent.children_path(collection))
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        Self::observe("list_children", started);

        rows.into_iter()
            .map(|row| {
                let path: String = row.try_get("path").map_err(map_db_error)?;
                let value: Value = row.try_get("doc").map_err(map_db_error)?;
                let doc = into_document(&path, value)?;
                Ok((DocumentKey::from_path(path), doc))
            })
            .collect()
    }

    #[instrument(
        skip(self, keys),
        fields(db.system = "postgresql", db.operation = "DELETE", keys = keys.len())
    )]
    async fn delete_many(&self, keys: &[DocumentKey]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let started = Instant::now();
        let paths: Vec<String> = keys.iter().map(|k| k.path().to_string()).collect();
        let result = sqlx::query("DELETE FROM progress_documents WHERE path = ANY($1)")
            .bind(&paths)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Self::observe("delete_many", started);
        Ok(result.rows_affected() as usize)
    }
}

fn map_db_error(err: sqlx::Error) -> crate::Error {
    match &err {
        sqlx::Error::PoolTimedOut => {
            error!(error = %err, "Connection pool timed out");
            crate::Error::PoolExhausted("Connection pool timed out".to_string())
        }
        sqlx::Error::PoolClosed => {
            error!(error = %err, "Connection pool closed");
            crate::Error::ConnectionFailed("Connection pool closed".to_string())
        }
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            error!(error = %err, "Database connection failed");
            crate::Error::ConnectionFailed(err.to_string())
        }
        _ => crate::Error::Database(err),
    }
}
