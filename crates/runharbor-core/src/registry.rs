// Copyright (C) 2025 Runharbor contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The run registry: the single entry point the rest of the system uses to
//! interact with runs.
//!
//! Wraps the [`RunStore`] with handle reconstruction and policy logic.
//! Reads treat "record absent" and "record would not reconstruct" the same
//! way (`None`/skip): the layer above must not distinguish the two to
//! callers, so a broken-but-present run does not leak its existence.
//!
//! There is no optimistic-concurrency check on flush: two callers flushing
//! the same run id concurrently overwrite each other's mutable fields,
//! last writer wins. Expected usage is one owner driving a run at a time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::error::HarborError;
use crate::metrics::RegistryMetrics;
use crate::persistence::RunStore;
use crate::remote::RemoteConnector;
use crate::run::{RemoteRun, RunDeps};
use crate::security::SecurityFactoryRegistry;

/// Access-control predicate over (principal, run).
///
/// Supplied by the layer above; the registry only evaluates it.
pub trait Policy: Send + Sync {
    /// Whether `principal` may see `run` at all.
    fn permit_access(&self, principal: &str, run: &RemoteRun) -> bool;
}

/// Standard policy: the owner and anyone on an ACL list may access a run.
#[derive(Debug, Default, Clone)]
pub struct OwnerOrAclPolicy;

impl Policy for OwnerOrAclPolicy {
    fn permit_access(&self, principal: &str, run: &RemoteRun) -> bool {
        run.owner() == principal
            || run.readers().contains(principal)
            || run.writers().contains(principal)
            || run.destroyers().contains(principal)
    }
}

/// Façade over run records and their live handles.
pub struct RunRegistry {
    store: Arc<dyn RunStore>,
    connector: Arc<dyn RemoteConnector>,
    factories: Arc<SecurityFactoryRegistry>,
    metrics: Arc<RegistryMetrics>,
}

impl std::fmt::Debug for RunRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRegistry")
            .field("store", &"...")
            .field("connector", &"...")
            .field("factories", &self.factories)
            .finish()
    }
}

impl RunRegistry {
    /// Create a registry over the given collaborators.
    pub fn new(
        store: Arc<dyn RunStore>,
        connector: Arc<dyn RemoteConnector>,
        factories: Arc<SecurityFactoryRegistry>,
        metrics: Arc<RegistryMetrics>,
    ) -> Self {
        Self {
            store,
            connector,
            factories,
            metrics,
        }
    }

    /// The injected observability counters.
    pub fn metrics(&self) -> &Arc<RegistryMetrics> {
        &self.metrics
    }

    fn deps(&self) -> RunDeps {
        RunDeps {
            store: self.store.clone(),
            connector: self.connector.clone(),
            factories: self.factories.clone(),
        }
    }

    async fn reconstruct(&self, record: &crate::persistence::RunRecord) -> Option<RemoteRun> {
        match RemoteRun::from_record(record, &self.deps()).await {
            Ok(run) => Some(run),
            Err(e) => {
                self.metrics.record_reconstruction_failure();
                warn!(run_id = %record.id, error = %e, "failed to reconstruct run, skipping");
                None
            }
        }
    }

    /// Fetch a run and rebuild its live handle.
    ///
    /// Any failure along the way (absent record, reconstruction error)
    /// yields `None`.
    #[instrument(skip(self))]
    pub async fn get(&self, run_id: &str) -> Option<RemoteRun> {
        let record = self.store.get_by_id(run_id).await?;
        self.reconstruct(&record).await
    }

    /// All runs `principal` may access under `policy`, keyed by run id.
    ///
    /// Runs whose record will not reconstruct are silently skipped; callers
    /// see a smaller map, not an error.
    #[instrument(skip(self, policy))]
    pub async fn list_runs(
        &self,
        principal: &str,
        policy: &dyn Policy,
    ) -> Result<HashMap<String, RemoteRun>, HarborError> {
        let mut runs = HashMap::new();
        for run_id in self.store.list_run_ids().await? {
            let Some(record) = self.store.get_by_id(&run_id).await else {
                continue;
            };
            let Some(run) = self.reconstruct(&record).await else {
                continue;
            };
            if policy.permit_access(principal, &run) {
                runs.insert(run_id, run);
            }
        }
        Ok(runs)
    }

    /// All run ids whose record is currently fetchable.
    #[instrument(skip(self))]
    pub async fn list_run_names(&self) -> Result<Vec<String>, HarborError> {
        let mut names = Vec::new();
        for run_id in self.store.list_run_ids().await? {
            if self.store.get_by_id(&run_id).await.is_some() {
                names.push(run_id);
            }
        }
        Ok(names)
    }

    /// Total number of run records.
    pub async fn count_runs(&self) -> Result<i64, HarborError> {
        self.store.count_runs().await
    }

    /// The first run that reconstructs successfully, if any.
    ///
    /// Housekeeping tasks use this when they need "any run" as a
    /// representative, e.g. health checks against the shared worker factory.
    #[instrument(skip(self))]
    pub async fn pick_arbitrary_run(&self) -> Option<RemoteRun> {
        let ids = match self.store.list_run_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "run enumeration failed");
                return None;
            }
        };
        for run_id in ids {
            if let Some(run) = self.get(&run_id).await {
                return Some(run);
            }
        }
        None
    }

    /// Persist a freshly launched run for the first time.
    ///
    /// Must be called exactly once per run id; the write-once fields are
    /// captured here and never updated again.
    #[instrument(skip(self, run), fields(run_id = %run.id()))]
    pub async fn persist_run(&self, run: &RemoteRun) -> Result<(), HarborError> {
        self.store.persist(&run.to_record()?).await?;
        self.metrics.record_persist();
        info!(run_id = %run.id(), owner = %run.owner(), "run persisted");
        Ok(())
    }

    /// Fetch-then-delete. Returns whether a deletion occurred.
    #[instrument(skip(self))]
    pub async fn unpersist_run(&self, run_id: &str) -> Result<bool, HarborError> {
        if self.store.get_by_id(run_id).await.is_none() {
            return Ok(false);
        }
        let deleted = self.store.delete(run_id).await?;
        if deleted {
            self.metrics.record_delete();
            info!(run_id, "run unpersisted");
        }
        Ok(deleted)
    }

    /// Write a handle's mutable fields back to its existing record.
    ///
    /// Precondition: the record must already exist; fails with
    /// [`HarborError::RunNotFound`] otherwise.
    #[instrument(skip(self, run), fields(run_id = %run.id()))]
    pub async fn flush_to_disk(&self, run: &RemoteRun) -> Result<(), HarborError> {
        run.flush().await
    }

    /// Sweep for expired runs.
    ///
    /// For each run whose expiry has passed: best-effort destroy of the
    /// worker (failures are logged, never abort the sweep), then delete the
    /// record regardless. Returns the ids actually deleted.
    #[instrument(skip(self))]
    pub async fn do_clean(&self) -> Vec<String> {
        self.metrics.record_expiry_sweep();

        let now = Utc::now();
        let expired = match self.store.expired_run_ids(now).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "expired-run query failed, skipping sweep pass");
                return Vec::new();
            }
        };

        let mut deleted = Vec::new();
        for run_id in expired {
            if let Some(record) = self.store.get_by_id(&run_id).await {
                match self.reconstruct(&record).await {
                    Some(run) => {
                        if let Err(e) = run.delegate().destroy().await {
                            warn!(%run_id, error = %e, "remote destroy failed, deleting record anyway");
                        }
                    }
                    None => {
                        debug!(%run_id, "no live delegate to destroy");
                    }
                }
            }

            match self.store.delete(&run_id).await {
                Ok(true) => {
                    self.metrics.record_delete();
                    info!(%run_id, "expired run deleted");
                    deleted.push(run_id);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(%run_id, error = %e, "failed to delete expired run");
                }
            }
        }
        deleted
    }

    /// Rebuild every unterminated run for the completion sweep to inspect.
    ///
    /// Per-run failures are logged and skipped; the sweep must always get
    /// the rest of the batch.
    #[instrument(skip(self))]
    pub async fn get_potentially_notifiable(&self) -> Vec<RemoteRun> {
        let ids = match self.store.unterminated_run_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "unterminated-run query failed");
                return Vec::new();
            }
        };

        let mut runs = Vec::new();
        for run_id in ids {
            let Some(record) = self.store.get_by_id(&run_id).await else {
                continue;
            };
            if let Some(run) = self.reconstruct(&record).await {
                runs.push(run);
            }
        }
        runs
    }

    /// Set the finished flag on each of the given runs.
    ///
    /// Per-id errors are logged and that id skipped; the operation is not
    /// atomic across the set. Returns the ids actually flipped from
    /// unterminated to finished, which is what gates notification to
    /// exactly once.
    #[instrument(skip(self, run_ids))]
    pub async fn mark_finished<I, S>(&self, run_ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut flipped = Vec::new();
        for run_id in run_ids {
            let run_id = run_id.as_ref();
            let Some(record) = self.store.get_by_id(run_id).await else {
                warn!(run_id, "run vanished before it could be marked finished");
                continue;
            };
            if record.finished != 0 {
                continue;
            }

            // Reconstruction drives the handle's finish transition side
            // effects before the flag is made durable.
            let Some(mut run) = self.reconstruct(&record).await else {
                continue;
            };
            run.complete_finish_transition();

            let mut updated = record;
            updated.finished = 1;
            match self.store.update(&updated).await {
                Ok(()) => {
                    self.metrics.record_completion();
                    info!(run_id, "run marked finished");
                    flipped.push(run_id.to_string());
                }
                Err(e) => {
                    warn!(run_id, error = %e, "failed to mark run finished");
                }
            }
        }
        flipped
    }
}
