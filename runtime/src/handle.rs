//! Loaded-model handles.

use chrono::{DateTime, Utc};
use common::ModelMetadata;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tabagent_execution_providers::BackendType;

use crate::backend::BackendSession;
use crate::error::{Result, RuntimeError};
use crate::fingerprint::Fingerprint;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// A model loaded into a backend.
///
/// Owned by the model cache. Pipelines hold `Arc` clones as references but
/// only the cache disposes a handle (on last release, eviction or shutdown).
pub struct ModelHandle {
    id: u64,
    fingerprint: Fingerprint,
    metadata: ModelMetadata,
    backend: BackendType,
    loaded_at: DateTime<Utc>,
    session: RwLock<Option<Arc<dyn BackendSession>>>,
}

impl ModelHandle {
    pub(crate) fn new(
        fingerprint: Fingerprint,
        metadata: ModelMetadata,
        backend: BackendType,
        session: Arc<dyn BackendSession>,
    ) -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            fingerprint,
            metadata,
            backend,
            loaded_at: Utc::now(),
            session: RwLock::new(Some(session)),
        }
    }

    /// Process-unique handle id
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// Backend that executed the load
    pub fn backend(&self) -> BackendType {
        self.backend
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn is_loaded(&self) -> bool {
        self.session.read().is_some()
    }

    /// Session for one inference call. In-flight calls keep their clone
    /// alive past disposal; their results are still returned.
    pub(crate) fn session(&self) -> Result<Arc<dyn BackendSession>> {
        self.session
            .read()
            .clone()
            .ok_or_else(|| RuntimeError::HandleDisposed {
                model: self.fingerprint.model_id.to_string(),
                handle_id: self.id,
            })
    }

    /// Best-effort cancellation of in-flight inference
    pub(crate) fn cancel(&self) {
        if let Some(session) = self.session.read().as_ref() {
            session.cancel();
        }
    }

    /// Drop the backend session. Returns `false` if already disposed.
    pub(crate) fn dispose(&self) -> bool {
        let session = self.session.write().take();
        match session {
            Some(_) => {
                log::info!(
                    "Disposed model handle #{} ({}) after {}s",
                    self.id,
                    self.fingerprint,
                    (Utc::now() - self.loaded_at).num_seconds()
                );
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("id", &self.id)
            .field("fingerprint", &self.fingerprint)
            .field("backend", &self.backend)
            .field("loaded_at", &self.loaded_at)
            .field("is_loaded", &self.is_loaded())
            .finish()
    }
}
