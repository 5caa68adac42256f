//! PostgreSQL-backed run store implementation.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;

use crate::error::HarborError;

use super::{RunRecord, RunStore, clamp_name};

/// PostgreSQL-backed run store.
#[derive(Clone)]
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    /// Create a new PostgreSQL run store from an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RunStore for PostgresRunStore {
    async fn persist(&self, record: &RunRecord) -> Result<(), HarborError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO runs (id, name, created_at, workflow, expiry,
                              readers, writers, destroyers,
                              owner, security_token, security_factory,
                              credentials, trust, remote_endpoint,
                              finished, provenance)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
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
                WHERE id = $1
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
            SET name = $1, expiry = $2,
                readers = $3, writers = $4, destroyers = $5,
                credentials = $6, trust = $7,
                finished = $8, provenance = $9
            WHERE id = $10
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

        let result = sqlx::query("DELETE FROM runs WHERE id = $1")
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
            sqlx::query_as("SELECT id FROM runs WHERE expiry < $1 ORDER BY created_at, id")
                .bind(now)
                .fetch_all(&mut *tx)
                .await?;

        tx.commit().await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}
