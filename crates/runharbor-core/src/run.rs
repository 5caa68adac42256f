// Copyright (C) 2025 Runharbor contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The live, in-memory counterpart of a run record.
//!
//! A [`RemoteRun`] is request-scoped: built fresh when a run is submitted,
//! converted to a record at first persist, rebuilt from its record on every
//! later read, and discarded after use. It is never cached across
//! transactions; the record is the durable source of truth.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::HarborError;
use crate::persistence::{RunRecord, RunStore, clamp_name};
use crate::remote::{RemoteConnector, RemoteEndpoint, RemoteRunDelegate};
use crate::security::{
    Credential, SecurityContext, SecurityFactoryRegistry, TrustAnchor, issue_token,
};

/// Shared collaborators needed to build and rebuild run handles.
#[derive(Clone)]
pub struct RunDeps {
    /// Gateway the handle flushes itself through.
    pub store: Arc<dyn RunStore>,
    /// Dials persisted endpoints back into live delegates.
    pub connector: Arc<dyn RemoteConnector>,
    /// Resolves the security factory a record names.
    pub factories: Arc<SecurityFactoryRegistry>,
}

impl std::fmt::Debug for RunDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunDeps")
            .field("store", &"...")
            .field("connector", &"...")
            .field("factories", &self.factories)
            .finish()
    }
}

/// Everything the submission layer supplies for a fresh run.
#[derive(Debug, Clone)]
pub struct RunParameters {
    /// Display name (truncated on write).
    pub name: String,
    /// Serialized workflow document.
    pub workflow: Vec<u8>,
    /// Principal submitting the run.
    pub owner: String,
    /// When the run becomes eligible for cleanup.
    pub expiry: DateTime<Utc>,
    /// Where the spawned worker process can be redialed.
    pub endpoint: RemoteEndpoint,
    /// Name of the security context factory to serve this run.
    pub security_factory: String,
    /// Whether provenance capture is requested.
    pub enable_provenance: bool,
}

/// Live handle for one workflow run.
///
/// Wraps the dialed worker delegate, the reconstructed security context, and
/// the mutable lifecycle fields (ACL sets, expiry, finished flag). Mutations
/// only become durable through [`flush`](Self::flush) or the registry's
/// `flush_to_disk`.
pub struct RemoteRun {
    id: String,
    name: String,
    created_at: DateTime<Utc>,
    workflow: Vec<u8>,
    expiry: DateTime<Utc>,
    readers: BTreeSet<String>,
    writers: BTreeSet<String>,
    destroyers: BTreeSet<String>,
    owner: String,
    security_token: String,
    security_factory: String,
    endpoint: RemoteEndpoint,
    finished: bool,
    provenance: bool,
    delegate: Arc<dyn RemoteRunDelegate>,
    security: Box<dyn SecurityContext>,
    store: Arc<dyn RunStore>,
}

impl std::fmt::Debug for RemoteRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteRun")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("expiry", &self.expiry)
            .field("finished", &self.finished)
            .finish()
    }
}

fn reconstruction(run_id: &str, reason: impl std::fmt::Display) -> HarborError {
    HarborError::Reconstruction {
        run_id: run_id.to_string(),
        reason: reason.to_string(),
    }
}

impl RemoteRun {
    /// Build the handle for a freshly submitted run.
    ///
    /// Assigns the run id, issues the security token, dials the worker, and
    /// creates the security context. The run is not durable until
    /// `persist_run` is called with the result.
    pub async fn launch(params: RunParameters, deps: &RunDeps) -> Result<Self, HarborError> {
        let id = uuid::Uuid::new_v4().to_string();

        let delegate = deps.connector.dial(&params.endpoint).await?;

        let factory = deps
            .factories
            .resolve(&params.security_factory)
            .ok_or_else(|| HarborError::Validation {
                field: "security_factory",
                message: format!("unknown security factory '{}'", params.security_factory),
            })?;
        let security = factory.create(&id, &params.owner)?;

        Ok(Self {
            id,
            name: clamp_name(&params.name),
            created_at: Utc::now(),
            workflow: params.workflow,
            expiry: params.expiry,
            readers: BTreeSet::new(),
            writers: BTreeSet::new(),
            destroyers: BTreeSet::new(),
            owner: params.owner,
            security_token: issue_token(),
            security_factory: params.security_factory,
            endpoint: params.endpoint,
            finished: false,
            provenance: params.enable_provenance,
            delegate,
            security,
            store: deps.store.clone(),
        })
    }

    /// Rebuild a live handle from its durable record.
    ///
    /// Fail-fast: corrupt endpoint or ACL material, an unknown security
    /// factory, or a failed redial fails the whole reconstruction. Callers
    /// in the registry convert that to not-found/skip.
    pub async fn from_record(record: &RunRecord, deps: &RunDeps) -> Result<Self, HarborError> {
        let endpoint = RemoteEndpoint::from_json(&record.remote_endpoint)
            .map_err(|e| reconstruction(&record.id, format!("corrupt remote endpoint: {}", e)))?;

        let delegate = deps
            .connector
            .dial(&endpoint)
            .await
            .map_err(|e| reconstruction(&record.id, format!("redial failed: {}", e)))?;

        let factory = deps.factories.resolve(&record.security_factory).ok_or_else(|| {
            reconstruction(
                &record.id,
                format!("unknown security factory '{}'", record.security_factory),
            )
        })?;
        let security = factory
            .create(&record.id, &record.owner)
            .map_err(|e| reconstruction(&record.id, format!("security context: {}", e)))?;

        let credentials: Vec<Credential> = serde_json::from_str(&record.credentials)
            .map_err(|e| reconstruction(&record.id, format!("corrupt credentials: {}", e)))?;
        let trust: Vec<TrustAnchor> = serde_json::from_str(&record.trust)
            .map_err(|e| reconstruction(&record.id, format!("corrupt trust anchors: {}", e)))?;
        security.install_credentials(credentials);
        security.install_trust(trust);

        let readers: BTreeSet<String> = serde_json::from_str(&record.readers)
            .map_err(|e| reconstruction(&record.id, format!("corrupt readers list: {}", e)))?;
        let writers: BTreeSet<String> = serde_json::from_str(&record.writers)
            .map_err(|e| reconstruction(&record.id, format!("corrupt writers list: {}", e)))?;
        let destroyers: BTreeSet<String> = serde_json::from_str(&record.destroyers)
            .map_err(|e| reconstruction(&record.id, format!("corrupt destroyers list: {}", e)))?;

        Ok(Self {
            id: record.id.clone(),
            name: record.name.clone(),
            created_at: record.created_at,
            workflow: record.workflow.clone(),
            expiry: record.expiry,
            readers,
            writers,
            destroyers,
            owner: record.owner.clone(),
            security_token: record.security_token.clone(),
            security_factory: record.security_factory.clone(),
            endpoint,
            finished: record.finished != 0,
            provenance: record.provenance != 0,
            delegate,
            security,
            store: deps.store.clone(),
        })
    }

    /// Project the handle back into its durable form.
    pub fn to_record(&self) -> Result<RunRecord, HarborError> {
        Ok(RunRecord {
            id: self.id.clone(),
            name: clamp_name(&self.name),
            created_at: self.created_at,
            workflow: self.workflow.clone(),
            expiry: self.expiry,
            readers: serde_json::to_string(&self.readers)?,
            writers: serde_json::to_string(&self.writers)?,
            destroyers: serde_json::to_string(&self.destroyers)?,
            owner: self.owner.clone(),
            security_token: self.security_token.clone(),
            security_factory: self.security_factory.clone(),
            credentials: serde_json::to_string(&self.security.credentials())?,
            trust: serde_json::to_string(&self.security.trusted())?,
            remote_endpoint: self.endpoint.to_json()?,
            finished: i32::from(self.finished),
            provenance: i32::from(self.provenance),
        })
    }

    /// Write the handle's mutable fields back to the store.
    ///
    /// The record must already exist; first-time persistence goes through
    /// the registry's `persist_run`.
    pub async fn flush(&self) -> Result<(), HarborError> {
        self.store.update(&self.to_record()?).await
    }

    /// The run's unique identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the run (truncated on the next write).
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = clamp_name(&name.into());
    }

    /// When the run was first persisted.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The serialized workflow document.
    pub fn workflow(&self) -> &[u8] {
        &self.workflow
    }

    /// When the run becomes eligible for cleanup.
    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    /// Move the cleanup deadline.
    pub fn set_expiry(&mut self, expiry: DateTime<Utc>) {
        self.expiry = expiry;
    }

    /// Principals granted read access beyond the owner.
    pub fn readers(&self) -> &BTreeSet<String> {
        &self.readers
    }

    /// Replace the reader set.
    pub fn set_readers(&mut self, readers: impl IntoIterator<Item = String>) {
        self.readers = readers.into_iter().collect();
    }

    /// Principals granted write access beyond the owner.
    pub fn writers(&self) -> &BTreeSet<String> {
        &self.writers
    }

    /// Replace the writer set.
    pub fn set_writers(&mut self, writers: impl IntoIterator<Item = String>) {
        self.writers = writers.into_iter().collect();
    }

    /// Principals granted destroy access beyond the owner.
    pub fn destroyers(&self) -> &BTreeSet<String> {
        &self.destroyers
    }

    /// Replace the destroyer set.
    pub fn set_destroyers(&mut self, destroyers: impl IntoIterator<Item = String>) {
        self.destroyers = destroyers.into_iter().collect();
    }

    /// Principal that created the run.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Secret the running workflow uses to re-authenticate as itself.
    pub fn security_token(&self) -> &str {
        &self.security_token
    }

    /// Name of the security context factory serving this run.
    pub fn security_factory(&self) -> &str {
        &self.security_factory
    }

    /// The persisted worker endpoint descriptor.
    pub fn endpoint(&self) -> &RemoteEndpoint {
        &self.endpoint
    }

    /// Whether the run has been observed terminal.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Flip the live handle to finished.
    ///
    /// Called when the delegate has been observed terminal; the registry's
    /// `mark_finished` drives this during reconstruction and then makes the
    /// flag durable.
    pub fn complete_finish_transition(&mut self) {
        self.finished = true;
    }

    /// Whether provenance capture is enabled.
    pub fn provenance_enabled(&self) -> bool {
        self.provenance
    }

    /// Toggle provenance capture.
    pub fn set_provenance_enabled(&mut self, enabled: bool) {
        self.provenance = enabled;
    }

    /// Replace the credential set held by the security context.
    pub fn set_credentials(&mut self, credentials: Vec<Credential>) {
        self.security.install_credentials(credentials);
    }

    /// Replace the trust anchors held by the security context.
    pub fn set_trust(&mut self, anchors: Vec<TrustAnchor>) {
        self.security.install_trust(anchors);
    }

    /// The live connection to the worker process.
    pub fn delegate(&self) -> &Arc<dyn RemoteRunDelegate> {
        &self.delegate
    }

    /// The reconstructed security context.
    pub fn security_context(&self) -> &dyn SecurityContext {
        self.security.as_ref()
    }
}
