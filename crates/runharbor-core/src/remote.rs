// Copyright (C) 2025 Runharbor contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Boundary contracts for the out-of-process execution delegate.
//!
//! Each run is executed by a separate worker process. The core never holds a
//! serialized object graph for that worker; it persists an opaque
//! [`RemoteEndpoint`] descriptor and redials it through a [`RemoteConnector`]
//! whenever a handle is reconstructed from its record.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HarborError;

/// Coarse execution state reported by a delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    /// Worker created, workflow not yet started.
    Initialized,
    /// Workflow is executing.
    Operating,
    /// Workflow paused by operator request.
    Stopped,
    /// Workflow reached a terminal state.
    Finished,
}

impl RemoteStatus {
    /// Whether this status is terminal (the run can never resume).
    pub fn is_terminal(self) -> bool {
        matches!(self, RemoteStatus::Finished)
    }
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RemoteStatus::Initialized => "Initialized",
            RemoteStatus::Operating => "Operating",
            RemoteStatus::Stopped => "Stopped",
            RemoteStatus::Finished => "Finished",
        };
        f.write_str(s)
    }
}

/// Opaque connection descriptor for a run's worker process.
///
/// This is what gets persisted in the run record: an address to redial plus
/// a capability token the worker requires, never a serialized live object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    /// Where the worker can be reached (host:port, socket path, ...).
    pub address: String,
    /// OS process id of the worker, when it runs on this host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    /// Capability token presented when dialing the worker.
    pub capability_token: String,
}

impl RemoteEndpoint {
    /// Serialize to the JSON form stored in the run record.
    pub fn to_json(&self) -> Result<String, HarborError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the JSON form stored in a run record.
    pub fn from_json(json: &str) -> Result<Self, HarborError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A live connection to the worker process executing one run.
///
/// All methods may fail with [`HarborError::Remote`]; callers in the sweep
/// paths are required to catch, log, and continue rather than abort a batch.
#[async_trait]
pub trait RemoteRunDelegate: Send + Sync {
    /// Current execution state of the workflow.
    async fn status(&self) -> Result<RemoteStatus, HarborError>;

    /// Tear the worker down. Best-effort from the caller's point of view:
    /// the expiry sweep deletes the record whether or not this succeeds.
    async fn destroy(&self) -> Result<(), HarborError>;

    /// When the worker was created, if it knows.
    async fn creation_timestamp(&self) -> Result<Option<DateTime<Utc>>, HarborError>;

    /// When the workflow started executing, if it has.
    async fn start_timestamp(&self) -> Result<Option<DateTime<Utc>>, HarborError>;

    /// When the workflow reached a terminal state, if it has.
    async fn finish_timestamp(&self) -> Result<Option<DateTime<Utc>>, HarborError>;
}

/// Dials a [`RemoteEndpoint`] back into a live delegate.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Look up or redial the worker behind `endpoint`.
    async fn dial(
        &self,
        endpoint: &RemoteEndpoint,
    ) -> Result<Arc<dyn RemoteRunDelegate>, HarborError>;
}

/// Connector for workers running as local OS processes.
///
/// Suited to single-node deployments where the submission layer spawns one
/// worker process per run on the same host. Liveness is read from `/proc`,
/// so this connector is Linux-only. A dead process reads as `Finished`;
/// dialing a dead endpoint still succeeds so the completion sweep can
/// observe the terminal state.
#[derive(Debug, Default, Clone)]
pub struct LocalProcessConnector;

#[async_trait]
impl RemoteConnector for LocalProcessConnector {
    async fn dial(
        &self,
        endpoint: &RemoteEndpoint,
    ) -> Result<Arc<dyn RemoteRunDelegate>, HarborError> {
        let pid = endpoint.process_id.ok_or_else(|| HarborError::Remote {
            endpoint: endpoint.address.clone(),
            reason: "endpoint carries no process id".to_string(),
        })?;
        Ok(Arc::new(LocalProcessDelegate {
            pid,
            address: endpoint.address.clone(),
        }))
    }
}

struct LocalProcessDelegate {
    pid: u32,
    address: String,
}

impl LocalProcessDelegate {
    fn alive(&self) -> bool {
        std::path::Path::new(&format!("/proc/{}", self.pid)).exists()
    }
}

#[async_trait]
impl RemoteRunDelegate for LocalProcessDelegate {
    async fn status(&self) -> Result<RemoteStatus, HarborError> {
        if self.alive() {
            Ok(RemoteStatus::Operating)
        } else {
            Ok(RemoteStatus::Finished)
        }
    }

    async fn destroy(&self) -> Result<(), HarborError> {
        if !self.alive() {
            return Ok(());
        }
        let status = tokio::process::Command::new("kill")
            .arg(self.pid.to_string())
            .status()
            .await
            .map_err(|e| HarborError::Remote {
                endpoint: self.address.clone(),
                reason: format!("failed to signal pid {}: {}", self.pid, e),
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(HarborError::Remote {
                endpoint: self.address.clone(),
                reason: format!("kill for pid {} exited with {}", self.pid, status),
            })
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_json_round_trip() {
        let endpoint = RemoteEndpoint {
            address: "worker-7.harbor.internal:9402".to_string(),
            process_id: Some(4711),
            capability_token: "tok-abc123".to_string(),
        };

        let json = endpoint.to_json().unwrap();
        let parsed = RemoteEndpoint::from_json(&json).unwrap();

        assert_eq!(parsed, endpoint);
    }

    #[test]
    fn test_endpoint_without_process_id_omits_field() {
        let endpoint = RemoteEndpoint {
            address: "worker-7:9402".to_string(),
            process_id: None,
            capability_token: "tok".to_string(),
        };

        let json = endpoint.to_json().unwrap();
        assert!(!json.contains("process_id"));

        let parsed = RemoteEndpoint::from_json(&json).unwrap();
        assert_eq!(parsed.process_id, None);
    }

    #[test]
    fn test_endpoint_from_corrupt_json() {
        let result = RemoteEndpoint::from_json("{not json");
        assert!(result.is_err());
    }

    #[test]
    fn test_terminal_status() {
        assert!(RemoteStatus::Finished.is_terminal());
        assert!(!RemoteStatus::Initialized.is_terminal());
        assert!(!RemoteStatus::Operating.is_terminal());
        assert!(!RemoteStatus::Stopped.is_terminal());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(RemoteStatus::Operating.to_string(), "Operating");
        assert_eq!(RemoteStatus::Finished.to_string(), "Finished");
    }

    #[tokio::test]
    async fn test_local_connector_requires_process_id() {
        let endpoint = RemoteEndpoint {
            address: "worker-1:9402".to_string(),
            process_id: None,
            capability_token: "tok".to_string(),
        };

        let result = LocalProcessConnector.dial(&endpoint).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_local_delegate_dead_pid_reads_finished() {
        // Pids wrap well below this on Linux, so the slot cannot be alive.
        let endpoint = RemoteEndpoint {
            address: "worker-1:9402".to_string(),
            process_id: Some(u32::MAX - 1),
            capability_token: "tok".to_string(),
        };

        let delegate = LocalProcessConnector.dial(&endpoint).await.unwrap();
        let status = delegate.status().await.unwrap();
        assert_eq!(status, RemoteStatus::Finished);

        // Destroying an already-dead worker is a no-op.
        delegate.destroy().await.unwrap();
    }
}
