//! SQLite-backed run store implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::warn;

use crate::error::HarborError;

use super::{RunRecord, RunStore, clamp_name};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed run store.
#[derive(Clone)]
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Create a new SQLite run store from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite run store from a file path.
    ///
    /// This convenience constructor handles all setup:
    /// - Creates parent directories if they don't exist
    /// - Creates the database file if it doesn't exist
    /// - Connects to the database with sensible defaults
    /// - Runs all migrations
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file (e.g., ".data/harbor.db")
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, HarborError> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| HarborError::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let path_str = path.to_string_lossy();
        let url = format!("sqlite:{}?mode=rwc", path_str);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| HarborError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| HarborError::Database {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl RunStore for SqliteRunStore {
    async fn persist(&self, record: &RunRecord) -> Result<(), HarborError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO runs (id, name, created_at, workflow, expiry,
                              readers, writers, destroyers,
                              owner, security_token, security_factory,
                              credentials, trust, remote_endpoint,
                              finished, provenance)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(clamp_name(&record.name))
        .bind(record.created_at)
        .bind(&record.workflow)
        .bind(record.expiry)
        .bind(&record.readers)
        .bind(&record.writers)
        .bind(&record.destroyers)
        .bind(&record.owner)
        .bind(&record.security_token)
        .bind(&record.security_factory)
        .bind(&record.credentials)
        .bind(&record.trust)
        .bind(&record.remote_endpoint)
        .bind(record.finished)
        .bind(record.provenance)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {
                tx.commit().await?;
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(HarborError::DuplicateRun {
                    run_id: record.id.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_by_id(&self, run_id: &str) -> Option<RunRecord> {
        // Storage failures during a read collapse to "not found"; a run that
        // vanished under a concurrent sweep and a flaky fetch look the same
        // to callers.
        let result = async {
            let mut tx = self.pool.begin().await?;
            let record = sqlx::query_as::<_, RunRecord>(
                r#"
                SELECT id, name, created_at, workflow, expiry,
                       readers, writers, destroyers,
                       owner, security_token, security_factory,
                       credentials, trust, remote_endpoint,
                       finished, provenance
                FROM runs
                WHERE id = ?
                "#,
            )
            .bind(run_id)
            .fetch_optional(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok::<_, sqlx::Error>(record)
        }
        .await;

        match result {
            Ok(record) => record,
            Err(e) => {
                warn!(run_id, error = %e, "run fetch failed, treating as absent");
                None
            }
        }
    }

    async fn update(&self, record: &RunRecord) -> Result<(), HarborError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE runs
            SET name = ?, expiry = ?,
                readers = ?, writers = ?, destroyers = ?,
                credentials = ?, trust = ?,
                finished = ?, provenance = ?
            WHERE id = ?
            "#,
        )
        .bind(clamp_name(&record.name))
        .bind(record.expiry)
        .bind(&record.readers)
        .bind(&record.writers)
        .bind(&record.destroyers)
        .bind(&record.credentials)
        .bind(&record.trust)
        .bind(record.finished)
        .bind(record.provenance)
        .bind(&record.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(HarborError::RunNotFound {
                run_id: record.id.clone(),
            });
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, run_id: &str) -> Result<bool, HarborError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM runs WHERE id = ?")
            .bind(run_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_runs(&self) -> Result<i64, HarborError> {
        let mut tx = self.pool.begin().await?;

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM runs")
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(count)
    }

    async fn list_run_ids(&self) -> Result<Vec<String>, HarborError> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<(String,)> = sqlx::query_as("SELECT id FROM runs ORDER BY created_at, id")
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn unterminated_run_ids(&self) -> Result<Vec<String>, HarborError> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM runs WHERE finished = 0 ORDER BY created_at, id")
                .fetch_all(&mut *tx)
                .await?;

        tx.commit().await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn expired_run_ids(&self, now: DateTime<Utc>) -> Result<Vec<String>, HarborError> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM runs WHERE expiry < ? ORDER BY created_at, id")
                .bind(now)
                .fetch_all(&mut *tx)
                .await?;

        tx.commit().await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}
