// Copyright (C) 2025 Runharbor contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for runharbor-core.
//!
//! Provides a unified error type plus the stable error-code mapping the
//! transport adapters translate into wire-level responses. "Run not found"
//! is deliberately NOT part of this taxonomy for read paths: lookups return
//! `Option`/`None` so that a run cleaned up concurrently stays a normal
//! case rather than an exceptional one.

use std::fmt;

/// Result type using HarborError
pub type Result<T> = std::result::Result<T, HarborError>;

/// Core errors that can occur while managing run records and handles.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum HarborError {
    /// A record with the same run id already exists (duplicate persist).
    DuplicateRun {
        /// The run id that already exists.
        run_id: String,
    },

    /// No record exists for the run id (flush precondition violated).
    RunNotFound {
        /// The run id that has no record.
        run_id: String,
    },

    /// A run record could not be rebuilt into a live handle.
    ///
    /// Covers corrupt endpoint/ACL/security material, unknown security
    /// factories, and failed redials. Reconstruction is fail-fast: a handle
    /// is never returned partially wired.
    Reconstruction {
        /// The run id whose record failed to reconstruct.
        run_id: String,
        /// What went wrong.
        reason: String,
    },

    /// The out-of-process execution delegate misbehaved.
    Remote {
        /// The endpoint address involved.
        endpoint: String,
        /// What went wrong.
        reason: String,
    },

    /// Input validation failed.
    Validation {
        /// The field that failed validation.
        field: &'static str,
        /// The validation error message.
        message: String,
    },

    /// Storage operation failed.
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl HarborError {
    /// Get the error code string for this error type.
    ///
    /// This is the single translation point the REST/SOAP adapters map to
    /// transport-level responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DuplicateRun { .. } => "DUPLICATE_RUN",
            Self::RunNotFound { .. } => "RUN_NOT_FOUND",
            Self::Reconstruction { .. } => "RECONSTRUCTION_FAILED",
            Self::Remote { .. } => "REMOTE_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }
}

impl fmt::Display for HarborError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateRun { run_id } => {
                write!(f, "Run '{}' already exists", run_id)
            }
            Self::RunNotFound { run_id } => {
                write!(f, "Run '{}' not found", run_id)
            }
            Self::Reconstruction { run_id, reason } => {
                write!(f, "Failed to reconstruct run '{}': {}", run_id, reason)
            }
            Self::Remote { endpoint, reason } => {
                write!(f, "Remote delegate at '{}' failed: {}", endpoint, reason)
            }
            Self::Validation { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::Database { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for HarborError {}

impl From<sqlx::Error> for HarborError {
    fn from(err: sqlx::Error) -> Self {
        HarborError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for HarborError {
    fn from(err: serde_json::Error) -> Self {
        HarborError::Database {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}
