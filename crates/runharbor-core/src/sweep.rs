// Copyright (C) 2025 Runharbor contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background sweeps: expiry cleanup and finish-once completion notification.
//!
//! Both sweeps run as independent tokio tasks on fixed intervals, driven by
//! [`HarborRuntime`](crate::runtime::HarborRuntime). A single run's failure
//! never aborts the rest of a batch; the flip of the durable finished flag
//! is what keeps notification to exactly once per run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::HarborError;
use crate::registry::RunRegistry;
use crate::run::RemoteRun;

/// Builds and delivers the one completion message a run gets.
///
/// Message templating and transport (mail, webhook, ...) live above this
/// crate; the sweep only asks for subject and body and hands them over.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    /// Subject line for the completion message of `run`.
    fn message_subject(&self, run: &RemoteRun) -> String;

    /// Body of the completion message of `run`.
    fn completion_message(&self, run: &RemoteRun) -> String;

    /// Deliver the message to the run's owner.
    async fn deliver(&self, owner: &str, subject: &str, body: &str) -> Result<(), HarborError>;
}

/// Notifier that writes completion messages to the log.
///
/// The default for deployments with no delivery channel configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl CompletionNotifier for LogNotifier {
    fn message_subject(&self, run: &RemoteRun) -> String {
        format!("Workflow run '{}' finished", run.name())
    }

    fn completion_message(&self, run: &RemoteRun) -> String {
        format!(
            "Your workflow run '{}' (id {}) has finished and its outputs are ready for collection.",
            run.name(),
            run.id()
        )
    }

    async fn deliver(&self, owner: &str, subject: &str, body: &str) -> Result<(), HarborError> {
        info!(owner, subject, body, "completion notification");
        Ok(())
    }
}

/// One expiry sweep pass. Returns the ids deleted.
pub async fn expiry_sweep_once(registry: &RunRegistry) -> Vec<String> {
    registry.do_clean().await
}

/// One completion sweep pass.
///
/// Probes every unterminated run's delegate for terminal status, marks the
/// terminal subset finished, and dispatches one notification per run that
/// actually flipped. Returns the flipped ids.
pub async fn completion_sweep_once(
    registry: &RunRegistry,
    notifier: &dyn CompletionNotifier,
) -> Vec<String> {
    let candidates = registry.get_potentially_notifiable().await;

    let mut terminal = Vec::new();
    let mut by_id = std::collections::HashMap::new();
    for run in candidates {
        match run.delegate().status().await {
            Ok(status) if status.is_terminal() => {
                terminal.push(run.id().to_string());
                by_id.insert(run.id().to_string(), run);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(run_id = %run.id(), error = %e, "status probe failed, will retry next pass");
            }
        }
    }

    if terminal.is_empty() {
        return Vec::new();
    }

    let flipped = registry.mark_finished(&terminal).await;
    for run_id in &flipped {
        let run = &by_id[run_id];
        let subject = notifier.message_subject(run);
        let body = notifier.completion_message(run);
        match notifier.deliver(run.owner(), &subject, &body).await {
            Ok(()) => registry.metrics().record_notification(),
            Err(e) => {
                // The finished flag is already durable; the notification for
                // this run is lost rather than retried.
                warn!(%run_id, error = %e, "completion notification failed");
            }
        }
    }
    flipped
}

/// Run the expiry sweep on `interval` until shutdown is signalled.
pub async fn run_expiry_sweep(
    registry: Arc<RunRegistry>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("expiry sweep received shutdown signal");
                    break;
                }
            }

            _ = ticker.tick() => {
                let deleted = expiry_sweep_once(&registry).await;
                if !deleted.is_empty() {
                    info!(count = deleted.len(), "expiry sweep deleted runs");
                }
            }
        }
    }

    info!("expiry sweep stopped");
}

/// Run the completion sweep on `interval` until shutdown is signalled.
pub async fn run_completion_sweep(
    registry: Arc<RunRegistry>,
    notifier: Arc<dyn CompletionNotifier>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("completion sweep received shutdown signal");
                    break;
                }
            }

            _ = ticker.tick() => {
                let finished = completion_sweep_once(&registry, notifier.as_ref()).await;
                if !finished.is_empty() {
                    info!(count = finished.len(), "completion sweep marked runs finished");
                }
            }
        }
    }

    info!("completion sweep stopped");
}
