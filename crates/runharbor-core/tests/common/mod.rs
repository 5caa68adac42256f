// Copyright (C) 2025 Runharbor contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for runharbor-core integration tests.
//!
//! Provides TestContext wiring a real SQLite-backed store to scripted
//! worker delegates and a recording notifier.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

use runharbor_core::error::HarborError;
use runharbor_core::metrics::RegistryMetrics;
use runharbor_core::persistence::SqliteRunStore;
use runharbor_core::registry::RunRegistry;
use runharbor_core::remote::{RemoteConnector, RemoteEndpoint, RemoteRunDelegate, RemoteStatus};
use runharbor_core::run::{RemoteRun, RunDeps, RunParameters};
use runharbor_core::security::SecurityFactoryRegistry;
use runharbor_core::sweep::CompletionNotifier;

/// Scripted worker fleet: per-address status, destroy log, and a set of
/// addresses whose destroy call should fail.
#[derive(Default)]
pub struct WorkerScript {
    pub status: Mutex<HashMap<String, RemoteStatus>>,
    pub destroyed: Mutex<Vec<String>>,
    pub failing_destroys: Mutex<HashSet<String>>,
}

/// Connector handing out delegates that read from the shared [`WorkerScript`].
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    pub script: Arc<WorkerScript>,
}

impl ScriptedConnector {
    /// Script the status the delegate at `address` reports.
    pub fn set_status(&self, address: &str, status: RemoteStatus) {
        self.script
            .status
            .lock()
            .unwrap()
            .insert(address.to_string(), status);
    }

    /// Make destroy fail for the delegate at `address`.
    pub fn fail_destroy(&self, address: &str) {
        self.script
            .failing_destroys
            .lock()
            .unwrap()
            .insert(address.to_string());
    }

    /// Addresses whose delegate received a destroy call.
    pub fn destroyed(&self) -> Vec<String> {
        self.script.destroyed.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteConnector for ScriptedConnector {
    async fn dial(
        &self,
        endpoint: &RemoteEndpoint,
    ) -> Result<Arc<dyn RemoteRunDelegate>, HarborError> {
        Ok(Arc::new(ScriptedDelegate {
            address: endpoint.address.clone(),
            script: self.script.clone(),
        }))
    }
}

pub struct ScriptedDelegate {
    address: String,
    script: Arc<WorkerScript>,
}

#[async_trait]
impl RemoteRunDelegate for ScriptedDelegate {
    async fn status(&self) -> Result<RemoteStatus, HarborError> {
        Ok(self
            .script
            .status
            .lock()
            .unwrap()
            .get(&self.address)
            .copied()
            .unwrap_or(RemoteStatus::Operating))
    }

    async fn destroy(&self) -> Result<(), HarborError> {
        self.script
            .destroyed
            .lock()
            .unwrap()
            .push(self.address.clone());
        if self
            .script
            .failing_destroys
            .lock()
            .unwrap()
            .contains(&self.address)
        {
            return Err(HarborError::Remote {
                endpoint: self.address.clone(),
                reason: "scripted destroy failure".to_string(),
            });
        }
        Ok(())
    }

    async fn creation_timestamp(&self) -> Result<Option<DateTime<Utc>>, HarborError> {
        Ok(None)
    }

    async fn start_timestamp(&self) -> Result<Option<DateTime<Utc>>, HarborError> {
        Ok(None)
    }

    async fn finish_timestamp(&self) -> Result<Option<DateTime<Utc>>, HarborError> {
        Ok(None)
    }
}

/// Notifier that records every delivery instead of sending it anywhere.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub deliveries: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingNotifier {
    /// (owner, subject) pairs delivered so far.
    pub fn delivered(&self) -> Vec<(String, String)> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    fn message_subject(&self, run: &RemoteRun) -> String {
        format!("Workflow run '{}' finished", run.name())
    }

    fn completion_message(&self, run: &RemoteRun) -> String {
        format!("Run {} finished.", run.id())
    }

    async fn deliver(&self, owner: &str, subject: &str, _body: &str) -> Result<(), HarborError> {
        self.deliveries
            .lock()
            .unwrap()
            .push((owner.to_string(), subject.to_string()));
        Ok(())
    }
}

/// Test context wiring a real SQLite store to scripted collaborators.
pub struct TestContext {
    pub store: Arc<SqliteRunStore>,
    pub connector: ScriptedConnector,
    pub notifier: RecordingNotifier,
    pub registry: RunRegistry,
}

impl TestContext {
    /// Set up an in-memory database and a registry over it.
    pub async fn new() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");
        runharbor_core::migrations::run_sqlite(&pool)
            .await
            .expect("Failed to run migrations");

        let store = Arc::new(SqliteRunStore::new(pool));
        let connector = ScriptedConnector::default();
        let notifier = RecordingNotifier::default();
        let registry = RunRegistry::new(
            store.clone(),
            Arc::new(connector.clone()),
            Arc::new(SecurityFactoryRegistry::default()),
            Arc::new(RegistryMetrics::new()),
        );

        Self {
            store,
            connector,
            notifier,
            registry,
        }
    }

    /// The dependency bundle handles are rebuilt with.
    pub fn deps(&self) -> RunDeps {
        RunDeps {
            store: self.store.clone(),
            connector: Arc::new(self.connector.clone()),
            factories: Arc::new(SecurityFactoryRegistry::default()),
        }
    }

    /// Launch and persist a run; returns the live handle.
    pub async fn launch_run(&self, name: &str, owner: &str, expiry: DateTime<Utc>) -> RemoteRun {
        let params = RunParameters {
            name: name.to_string(),
            workflow: b"<workflow/>".to_vec(),
            owner: owner.to_string(),
            expiry,
            endpoint: RemoteEndpoint {
                address: format!("worker-{}", Uuid::new_v4()),
                process_id: None,
                capability_token: "cap".to_string(),
            },
            security_factory: "local".to_string(),
            enable_provenance: false,
        };
        let deps = self.deps();
        let run = RemoteRun::launch(params, &deps)
            .await
            .expect("Failed to launch run");
        self.registry
            .persist_run(&run)
            .await
            .expect("Failed to persist run");
        run
    }

    /// Launch a run that expires an hour from now.
    pub async fn launch_long_lived_run(&self, name: &str, owner: &str) -> RemoteRun {
        self.launch_run(name, owner, Utc::now() + Duration::hours(1))
            .await
    }
}
