// Copyright (C) 2025 Runharbor contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for runharbor-core.
//!
//! This module provides [`HarborRuntime`] which allows embedding the run
//! registry and its background sweeps into an existing tokio application
//! instead of running the standalone server binary.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use runharbor_core::persistence::PostgresRunStore;
//! use runharbor_core::remote::LocalProcessConnector;
//! use runharbor_core::runtime::HarborRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::PgPool::connect("postgres://...").await?;
//!     let store = Arc::new(PostgresRunStore::new(pool));
//!
//!     let runtime = HarborRuntime::builder()
//!         .store(store)
//!         .connector(Arc::new(LocalProcessConnector))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     // Graceful shutdown
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::metrics::RegistryMetrics;
use crate::persistence::RunStore;
use crate::registry::RunRegistry;
use crate::remote::RemoteConnector;
use crate::security::SecurityFactoryRegistry;
use crate::sweep::{CompletionNotifier, LogNotifier, run_completion_sweep, run_expiry_sweep};

const DEFAULT_EXPIRY_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_COMPLETION_INTERVAL: Duration = Duration::from_secs(15);

/// Builder for creating a [`HarborRuntime`].
pub struct HarborRuntimeBuilder {
    store: Option<Arc<dyn RunStore>>,
    connector: Option<Arc<dyn RemoteConnector>>,
    factories: Option<Arc<SecurityFactoryRegistry>>,
    notifier: Option<Arc<dyn CompletionNotifier>>,
    metrics: Option<Arc<RegistryMetrics>>,
    expiry_interval: Duration,
    completion_interval: Duration,
}

impl std::fmt::Debug for HarborRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarborRuntimeBuilder")
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("connector", &self.connector.as_ref().map(|_| "..."))
            .field("expiry_interval", &self.expiry_interval)
            .field("completion_interval", &self.completion_interval)
            .finish()
    }
}

impl Default for HarborRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            connector: None,
            factories: None,
            notifier: None,
            metrics: None,
            expiry_interval: DEFAULT_EXPIRY_INTERVAL,
            completion_interval: DEFAULT_COMPLETION_INTERVAL,
        }
    }
}

impl HarborRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the run store (required).
    pub fn store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the remote connector (required).
    pub fn connector(mut self, connector: Arc<dyn RemoteConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set the security factory registry.
    ///
    /// Default: a registry with only the built-in `local` factory.
    pub fn factories(mut self, factories: Arc<SecurityFactoryRegistry>) -> Self {
        self.factories = Some(factories);
        self
    }

    /// Set the completion notifier.
    ///
    /// Default: [`LogNotifier`].
    pub fn notifier(mut self, notifier: Arc<dyn CompletionNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Set the metrics sink.
    ///
    /// Default: a fresh [`RegistryMetrics`].
    pub fn metrics(mut self, metrics: Arc<RegistryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the expiry sweep period.
    ///
    /// Default: 30 seconds.
    pub fn expiry_interval(mut self, interval: Duration) -> Self {
        self.expiry_interval = interval;
        self
    }

    /// Set the completion sweep period.
    ///
    /// Default: 15 seconds.
    pub fn completion_interval(mut self, interval: Duration) -> Self {
        self.completion_interval = interval;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<HarborRuntimeConfig> {
        let store = self.store.ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let connector = self
            .connector
            .ok_or_else(|| anyhow::anyhow!("connector is required"))?;

        Ok(HarborRuntimeConfig {
            store,
            connector,
            factories: self
                .factories
                .unwrap_or_else(|| Arc::new(SecurityFactoryRegistry::default())),
            notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
            metrics: self.metrics.unwrap_or_default(),
            expiry_interval: self.expiry_interval,
            completion_interval: self.completion_interval,
        })
    }
}

/// Configuration for a [`HarborRuntime`].
pub struct HarborRuntimeConfig {
    store: Arc<dyn RunStore>,
    connector: Arc<dyn RemoteConnector>,
    factories: Arc<SecurityFactoryRegistry>,
    notifier: Arc<dyn CompletionNotifier>,
    metrics: Arc<RegistryMetrics>,
    expiry_interval: Duration,
    completion_interval: Duration,
}

impl std::fmt::Debug for HarborRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarborRuntimeConfig")
            .field("store", &"...")
            .field("expiry_interval", &self.expiry_interval)
            .field("completion_interval", &self.completion_interval)
            .finish()
    }
}

impl HarborRuntimeConfig {
    /// Start the runtime, spawning the sweep tasks.
    pub async fn start(self) -> Result<HarborRuntime> {
        let registry = Arc::new(RunRegistry::new(
            self.store,
            self.connector,
            self.factories,
            self.metrics,
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let expiry_handle = tokio::spawn(run_expiry_sweep(
            registry.clone(),
            self.expiry_interval,
            shutdown_rx.clone(),
        ));
        let completion_handle = tokio::spawn(run_completion_sweep(
            registry.clone(),
            self.notifier,
            self.completion_interval,
            shutdown_rx,
        ));

        info!(
            expiry_interval = ?self.expiry_interval,
            completion_interval = ?self.completion_interval,
            "HarborRuntime started"
        );

        Ok(HarborRuntime {
            registry,
            shutdown_tx,
            expiry_handle,
            completion_handle,
        })
    }
}

/// A running runharbor-core instance that can be embedded in an application.
///
/// The runtime manages:
/// - the expiry sweep (deletes runs whose expiry has passed)
/// - the completion sweep (finish detection + one-shot notification)
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct HarborRuntime {
    registry: Arc<RunRegistry>,
    shutdown_tx: watch::Sender<bool>,
    expiry_handle: JoinHandle<()>,
    completion_handle: JoinHandle<()>,
}

impl HarborRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> HarborRuntimeBuilder {
        HarborRuntimeBuilder::new()
    }

    /// Get a reference to the shared run registry.
    ///
    /// This is what request handlers use for all run operations.
    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Gracefully shut down the runtime.
    ///
    /// This signals both sweep tasks to stop and waits for them to finish.
    pub async fn shutdown(self) -> Result<()> {
        info!("HarborRuntime shutting down...");

        // Signal shutdown
        let _ = self.shutdown_tx.send(true);

        for (name, handle) in [
            ("expiry sweep", self.expiry_handle),
            ("completion sweep", self.completion_handle),
        ] {
            if let Err(e) = handle.await {
                error!("{} task panicked: {}", name, e);
                return Err(anyhow::anyhow!("{} task panicked: {}", name, e));
            }
        }

        info!("HarborRuntime shutdown complete");
        Ok(())
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.expiry_handle.is_finished() && !self.completion_handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarborError;
    use crate::persistence::RunRecord;
    use crate::remote::{RemoteEndpoint, RemoteRunDelegate};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    /// Mock run store for testing the runtime builder without a database.
    struct MockStore;

    #[async_trait]
    impl RunStore for MockStore {
        async fn persist(&self, _record: &RunRecord) -> Result<(), HarborError> {
            Ok(())
        }

        async fn get_by_id(&self, _run_id: &str) -> Option<RunRecord> {
            None
        }

        async fn update(&self, _record: &RunRecord) -> Result<(), HarborError> {
            Ok(())
        }

        async fn delete(&self, _run_id: &str) -> Result<bool, HarborError> {
            Ok(false)
        }

        async fn count_runs(&self) -> Result<i64, HarborError> {
            Ok(0)
        }

        async fn list_run_ids(&self) -> Result<Vec<String>, HarborError> {
            Ok(Vec::new())
        }

        async fn unterminated_run_ids(&self) -> Result<Vec<String>, HarborError> {
            Ok(Vec::new())
        }

        async fn expired_run_ids(&self, _now: DateTime<Utc>) -> Result<Vec<String>, HarborError> {
            Ok(Vec::new())
        }
    }

    struct MockConnector;

    #[async_trait]
    impl RemoteConnector for MockConnector {
        async fn dial(
            &self,
            endpoint: &RemoteEndpoint,
        ) -> Result<Arc<dyn RemoteRunDelegate>, HarborError> {
            Err(HarborError::Remote {
                endpoint: endpoint.address.clone(),
                reason: "mock connector never dials".to_string(),
            })
        }
    }

    #[test]
    fn test_builder_default() {
        let builder = HarborRuntimeBuilder::default();
        assert!(builder.store.is_none());
        assert!(builder.connector.is_none());
        assert_eq!(builder.expiry_interval, DEFAULT_EXPIRY_INTERVAL);
        assert_eq!(builder.completion_interval, DEFAULT_COMPLETION_INTERVAL);
    }

    #[test]
    fn test_builder_chaining() {
        let builder = HarborRuntimeBuilder::new()
            .store(Arc::new(MockStore))
            .connector(Arc::new(MockConnector))
            .expiry_interval(Duration::from_secs(5))
            .completion_interval(Duration::from_secs(2));
        assert!(builder.store.is_some());
        assert!(builder.connector.is_some());
        assert_eq!(builder.expiry_interval, Duration::from_secs(5));
        assert_eq!(builder.completion_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_builder_debug() {
        let builder = HarborRuntimeBuilder::new().store(Arc::new(MockStore));
        let debug_str = format!("{:?}", builder);
        assert!(debug_str.contains("HarborRuntimeBuilder"));
        // store is shown as "..." to avoid leaking details
        assert!(debug_str.contains("..."));
    }

    #[test]
    fn test_builder_build_missing_store() {
        let result = HarborRuntimeBuilder::new()
            .connector(Arc::new(MockConnector))
            .build();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("store is required"));
    }

    #[test]
    fn test_builder_build_missing_connector() {
        let result = HarborRuntimeBuilder::new().store(Arc::new(MockStore)).build();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("connector is required")
        );
    }

    #[test]
    fn test_builder_build_success_fills_defaults() {
        let config = HarborRuntimeBuilder::new()
            .store(Arc::new(MockStore))
            .connector(Arc::new(MockConnector))
            .build()
            .unwrap();
        assert_eq!(config.expiry_interval, DEFAULT_EXPIRY_INTERVAL);
        // defaulted collaborators are present
        assert!(config.factories.resolve("local").is_some());
    }

    #[tokio::test]
    async fn test_runtime_start_and_shutdown() {
        let config = HarborRuntimeBuilder::new()
            .store(Arc::new(MockStore))
            .connector(Arc::new(MockConnector))
            .expiry_interval(Duration::from_millis(10))
            .completion_interval(Duration::from_millis(10))
            .build()
            .unwrap();

        let runtime = config.start().await.unwrap();
        assert!(runtime.is_running());

        // Let the sweeps tick a few times over the empty mock store
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(runtime.is_running());

        let registry = runtime.registry().clone();
        assert_eq!(registry.count_runs().await.unwrap(), 0);

        runtime.shutdown().await.unwrap();
    }
}
