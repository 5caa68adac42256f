// Copyright (C) 2025 Runharbor contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-run security material: credentials, trust anchors, and the contexts
//! that hold them.
//!
//! A run record names the factory that built its security context; on every
//! reconstruction the factory is resolved by name and invoked against the
//! owner principal, then the persisted credential and trust lists are
//! installed into the fresh context. Any failure fails the whole
//! reconstruction; a handle is never returned with a half-built context.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::HarborError;

/// A credential a run presents to some external service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// The service this credential is for.
    pub service_uri: String,
    /// Principal name presented to the service.
    pub username: String,
    /// Secret material (password, key, ...), opaque to this crate.
    pub secret: String,
}

/// A trust anchor a run accepts when talking to external services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustAnchor {
    /// Name of the issuing authority.
    pub authority: String,
    /// Certificate material (base64 DER), opaque to this crate.
    pub certificate: String,
}

/// Live security context for one run.
///
/// Install methods take `&self`; implementations carry interior mutability
/// because contexts are rebuilt and populated during reconstruction while
/// already shared with the handle.
pub trait SecurityContext: Send + Sync {
    /// The principal that owns the run.
    fn owner(&self) -> &str;

    /// Credentials currently held by the context.
    fn credentials(&self) -> Vec<Credential>;

    /// Trust anchors currently held by the context.
    fn trusted(&self) -> Vec<TrustAnchor>;

    /// Replace the credential set.
    fn install_credentials(&self, credentials: Vec<Credential>);

    /// Replace the trust anchor set.
    fn install_trust(&self, anchors: Vec<TrustAnchor>);
}

/// Builds security contexts for runs.
pub trait SecurityContextFactory: Send + Sync {
    /// Stable name stored in run records to find this factory again.
    fn name(&self) -> &'static str;

    /// Issue a context for `run_id` owned by `owner`.
    fn create(&self, run_id: &str, owner: &str) -> Result<Box<dyn SecurityContext>, HarborError>;
}

/// In-memory security context for single-node deployments and tests.
pub struct LocalSecurityContext {
    owner: String,
    credentials: Mutex<Vec<Credential>>,
    trust: Mutex<Vec<TrustAnchor>>,
}

impl LocalSecurityContext {
    /// Create an empty context owned by `owner`.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            credentials: Mutex::new(Vec::new()),
            trust: Mutex::new(Vec::new()),
        }
    }
}

impl SecurityContext for LocalSecurityContext {
    fn owner(&self) -> &str {
        &self.owner
    }

    fn credentials(&self) -> Vec<Credential> {
        self.credentials.lock().expect("credentials lock").clone()
    }

    fn trusted(&self) -> Vec<TrustAnchor> {
        self.trust.lock().expect("trust lock").clone()
    }

    fn install_credentials(&self, credentials: Vec<Credential>) {
        *self.credentials.lock().expect("credentials lock") = credentials;
    }

    fn install_trust(&self, anchors: Vec<TrustAnchor>) {
        *self.trust.lock().expect("trust lock") = anchors;
    }
}

/// Factory for [`LocalSecurityContext`], registered under the name `local`.
#[derive(Debug, Default, Clone)]
pub struct LocalSecurityFactory;

impl SecurityContextFactory for LocalSecurityFactory {
    fn name(&self) -> &'static str {
        "local"
    }

    fn create(&self, _run_id: &str, owner: &str) -> Result<Box<dyn SecurityContext>, HarborError> {
        Ok(Box::new(LocalSecurityContext::new(owner)))
    }
}

/// Registry of security context factories, keyed by the name persisted in
/// run records.
pub struct SecurityFactoryRegistry {
    factories: HashMap<&'static str, Arc<dyn SecurityContextFactory>>,
}

impl Default for SecurityFactoryRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(Arc::new(LocalSecurityFactory));
        registry
    }
}

impl SecurityFactoryRegistry {
    /// Registry with only the built-in `local` factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory; a later registration under the same name wins.
    pub fn register(&mut self, factory: Arc<dyn SecurityContextFactory>) {
        self.factories.insert(factory.name(), factory);
    }

    /// Find the factory a run record names.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn SecurityContextFactory>> {
        self.factories.get(name).cloned()
    }
}

impl std::fmt::Debug for SecurityFactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityFactoryRegistry")
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Issue a fresh secret token.
///
/// Used for the per-run security token (a running workflow re-authenticating
/// as itself) and for worker capability tokens. Printable, URL-safe, no
/// padding.
pub fn issue_token() -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}
