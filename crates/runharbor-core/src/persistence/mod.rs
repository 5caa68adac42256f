//! Persistence interfaces and backends for runharbor-core.
//!
//! This module defines the run store abstraction and backend implementations.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresRunStore;
pub use self::sqlite::SqliteRunStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::HarborError;

/// Display names longer than this are truncated on every write.
pub const NAME_LENGTH_LIMIT: usize = 48;

/// Truncate a display name to [`NAME_LENGTH_LIMIT`] characters.
pub fn clamp_name(name: &str) -> String {
    name.chars().take(NAME_LENGTH_LIMIT).collect()
}

/// Run record from the persistence layer: the durable projection of one run.
///
/// Write-once fields (`id`, `created_at`, `workflow`, `owner`,
/// `security_token`, `security_factory`, `remote_endpoint`) are set by
/// [`RunStore::persist`] and never touched by [`RunStore::update`], which
/// only writes the mutable column set.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunRecord {
    /// Unique identifier for the run.
    pub id: String,
    /// Display name, truncated to [`NAME_LENGTH_LIMIT`] characters on write.
    pub name: String,
    /// When the run was first persisted.
    pub created_at: DateTime<Utc>,
    /// Opaque serialized workflow document.
    pub workflow: Vec<u8>,
    /// When the run becomes eligible for automatic deletion.
    pub expiry: DateTime<Utc>,
    /// JSON array of principal names granted read access.
    pub readers: String,
    /// JSON array of principal names granted write access.
    pub writers: String,
    /// JSON array of principal names granted destroy access.
    pub destroyers: String,
    /// Principal name of the creator.
    pub owner: String,
    /// Secret for internal re-authentication (a run calling back as itself).
    pub security_token: String,
    /// Name of the security context factory that serves this run.
    pub security_factory: String,
    /// JSON array of persisted credentials.
    pub credentials: String,
    /// JSON array of persisted trust anchors.
    pub trust: String,
    /// JSON connection descriptor for the worker process.
    pub remote_endpoint: String,
    /// Whether the run has been observed terminal (0/1).
    pub finished: i32,
    /// Whether provenance capture is enabled for the run (0/1).
    pub provenance: i32,
}

/// Transactional gateway over run records.
///
/// Every operation runs inside its own transaction scoped to the call.
/// Lookups signal absence with `None`, never an error: a run deleted by a
/// concurrent sweep is a normal case for readers.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a new record. Fails with [`HarborError::DuplicateRun`] if the
    /// id already exists.
    async fn persist(&self, record: &RunRecord) -> Result<(), HarborError>;

    /// Fetch a record by run id.
    ///
    /// Returns `None` both for absent records and for storage failures
    /// during the fetch; the latter are logged at warn level and swallowed
    /// so that readers see one uniform "not there" signal.
    async fn get_by_id(&self, run_id: &str) -> Option<RunRecord>;

    /// Apply the mutable fields of `record` to the existing row.
    /// Fails with [`HarborError::RunNotFound`] if the row is absent.
    async fn update(&self, record: &RunRecord) -> Result<(), HarborError>;

    /// Remove the record. Returns whether a row was deleted.
    async fn delete(&self, run_id: &str) -> Result<bool, HarborError>;

    /// Total record count, via a dedicated count query.
    async fn count_runs(&self) -> Result<i64, HarborError>;

    /// All run ids, via a dedicated id-only query.
    async fn list_run_ids(&self) -> Result<Vec<String>, HarborError>;

    /// Ids of runs not yet observed terminal.
    async fn unterminated_run_ids(&self) -> Result<Vec<String>, HarborError>;

    /// Ids of runs whose expiry is strictly before `now`.
    async fn expired_run_ids(&self, now: DateTime<Utc>) -> Result<Vec<String>, HarborError>;
}
