// Copyright (C) 2025 Runharbor contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runharbor Core - Run Lifecycle Engine
//!
//! This crate provides the run lifecycle and persistence core for a workflow
//! run server. It tracks each submitted run as a database-backed record,
//! rebuilds live handles on demand, and sweeps for expired and newly
//! finished runs, persisting all state to PostgreSQL or SQLite.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         External Clients                                 │
//! │                  (REST/SOAP adapters, admin tooling)                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           RunRegistry                                    │
//! │      get / list / count / persist / unpersist / flush / sweeps          │
//! └─────────────────────────────────────────────────────────────────────────┘
//!        │                    │                          │
//!        │ records            │ redial                   │ contexts
//!        ▼                    ▼                          ▼
//! ┌───────────────┐   ┌────────────────────┐   ┌─────────────────────────┐
//! │   RunStore    │   │  RemoteConnector   │   │ SecurityFactoryRegistry │
//! │ (sqlx, 1 tx   │   │ (worker processes, │   │  (per-run credentials   │
//! │  per call)    │   │  one per run)      │   │   and trust anchors)    │
//! └───────┬───────┘   └────────────────────┘   └─────────────────────────┘
//!         │
//!         ▼
//! ┌───────────────────────┐
//! │  PostgreSQL / SQLite  │
//! │   (Durable Storage)   │
//! └───────────────────────┘
//! ```
//!
//! # Run lifecycle
//!
//! ```text
//!   submit ──► RemoteRun (live handle) ──► persist_run ──► run record
//!                                                              │
//!                   get / flush_to_disk (rebuild, mutate) ◄────┤
//!                                                              │
//!      completion sweep: delegate terminal? ──► mark_finished ─┤
//!                                                              │
//!      expiry sweep: expiry passed? ──► destroy + delete ──────┘
//! ```
//!
//! The record is the durable source of truth. A [`run::RemoteRun`] is a
//! request-scoped reconstruction: it wraps a redialed worker delegate and a
//! freshly built security context, and is discarded after use.
//!
//! ## Field mutability
//!
//! | Fields | On flush |
//! |--------|----------|
//! | `id`, `created_at`, `workflow`, `owner`, `security_token`, `security_factory`, `remote_endpoint` | never written again |
//! | `name`, `expiry`, ACL sets, `credentials`, `trust`, `finished`, `provenance` | updated every time |
//!
//! There is no version check on flush: concurrent flushes to one run are
//! last-writer-wins on the mutable fields.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `RUNHARBOR_DATABASE_URL` | Yes | - | PostgreSQL connection string |
//! | `RUNHARBOR_EXPIRY_SWEEP_SECS` | No | `30` | Expiry sweep period |
//! | `RUNHARBOR_COMPLETION_SWEEP_SECS` | No | `15` | Completion sweep period |
//!
//! # Modules
//!
//! - [`config`]: Server configuration from environment variables
//! - [`error`]: Error types with stable error-code mapping for transports
//! - [`metrics`]: Injected observability counters
//! - [`migrations`]: Embedded database migrations
//! - [`persistence`]: Run records and the transactional run store
//! - [`registry`]: The run registry façade and access policy
//! - [`remote`]: Worker endpoint descriptors, delegates, connectors
//! - [`run`]: The live run handle and record reconstruction
//! - [`runtime`]: Embeddable runtime owning the background sweeps
//! - [`security`]: Per-run credentials, trust anchors, token issuance
//! - [`sweep`]: Expiry cleanup and finish-once completion notification

#![deny(missing_docs)]

/// Server configuration loaded from environment variables.
pub mod config;

/// Error types for run lifecycle operations.
pub mod error;

/// Injected observability counters for the registry.
pub mod metrics;

/// Embedded database migrations.
pub mod migrations;

/// Run records and the transactional run store.
pub mod persistence;

/// The run registry façade and access policy.
pub mod registry;

/// Worker endpoint descriptors, delegates, and connectors.
pub mod remote;

/// The live run handle and record reconstruction.
pub mod run;

/// Embeddable runtime owning the background sweeps.
pub mod runtime;

/// Per-run security contexts, factories, and token issuance.
pub mod security;

/// Expiry cleanup and finish-once completion notification sweeps.
pub mod sweep;
