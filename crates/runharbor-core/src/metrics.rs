// Copyright (C) 2025 Runharbor contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Observability counters for the run registry.
//!
//! Injected into [`RunRegistry`](crate::registry::RunRegistry) rather than
//! living as ambient globals, so embedders decide where the numbers go.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters tracking registry activity.
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    runs_persisted: AtomicU64,
    runs_deleted: AtomicU64,
    reconstruction_failures: AtomicU64,
    expiry_sweeps: AtomicU64,
    completions_detected: AtomicU64,
    notifications_sent: AtomicU64,
}

impl RegistryMetrics {
    /// Fresh, all-zero counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_persist(&self) {
        self.runs_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.runs_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconstruction_failure(&self) {
        self.reconstruction_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expiry_sweep(&self) {
        self.expiry_sweeps.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completion(&self) {
        self.completions_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_notification(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent-enough point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_persisted: self.runs_persisted.load(Ordering::Relaxed),
            runs_deleted: self.runs_deleted.load(Ordering::Relaxed),
            reconstruction_failures: self.reconstruction_failures.load(Ordering::Relaxed),
            expiry_sweeps: self.expiry_sweeps.load(Ordering::Relaxed),
            completions_detected: self.completions_detected.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`RegistryMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Runs persisted for the first time.
    pub runs_persisted: u64,
    /// Records deleted (unpersist + expiry sweep).
    pub runs_deleted: u64,
    /// Handles that failed to rebuild from their record.
    pub reconstruction_failures: u64,
    /// Expiry sweep passes executed.
    pub expiry_sweeps: u64,
    /// Runs observed transitioning to finished.
    pub completions_detected: u64,
    /// Completion notifications dispatched.
    pub notifications_sent: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = RegistryMetrics::new();
        metrics.record_persist();
        metrics.record_persist();
        metrics.record_delete();
        metrics.record_reconstruction_failure();

        let snap = metrics.snapshot();
        assert_eq!(snap.runs_persisted, 2);
        assert_eq!(snap.runs_deleted, 1);
        assert_eq!(snap.reconstruction_failures, 1);
        assert_eq!(snap.expiry_sweeps, 0);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let metrics = RegistryMetrics::new();
        let before = metrics.snapshot();
        metrics.record_notification();
        let after = metrics.snapshot();

        assert_eq!(before.notifications_sent, 0);
        assert_eq!(after.notifications_sent, 1);
    }
}
