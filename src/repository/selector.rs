//! Authoritative backend selection

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::StoragePreference;

use super::{BackendKind, StorageBackend};

/// Last-known health of the networked store.
///
/// Probed once at startup and cached for the life of the process; it is
/// never refreshed, so a restart is required to re-detect recovery. Held
/// behind an `Arc` and injected rather than kept as an ambient singleton.
#[derive(Debug)]
pub struct BackendHealth {
    networked_healthy: AtomicBool,
}

impl BackendHealth {
    pub fn new(networked_healthy: bool) -> Self {
        Self {
            networked_healthy: AtomicBool::new(networked_healthy),
        }
    }

    pub fn networked_healthy(&self) -> bool {
        self.networked_healthy.load(Ordering::Relaxed)
    }
}

/// Picks the authoritative store for one request boundary.
///
/// Performs no I/O. Every sub-operation of a request (validate, write,
/// adjust inventory) must reuse the backend resolved here unless an
/// explicit, logged fallback occurs.
#[derive(Clone)]
pub struct StorageSelector {
    preference: StoragePreference,
    networked: Arc<dyn StorageBackend>,
    embedded: Arc<dyn StorageBackend>,
    health: Arc<BackendHealth>,
}

impl StorageSelector {
    pub fn new(
        networked: Arc<dyn StorageBackend>,
        embedded: Arc<dyn StorageBackend>,
        preference: StoragePreference,
        health: Arc<BackendHealth>,
    ) -> Self {
        Self {
            preference,
            networked,
            embedded,
            health,
        }
    }

    /// Resolve the authoritative backend for an incoming request
    pub fn resolve(&self) -> Arc<dyn StorageBackend> {
        let backend = match self.preference {
            StoragePreference::Networked => self.networked.clone(),
            StoragePreference::Embedded => self.embedded.clone(),
            StoragePreference::Auto => {
                if self.health.networked_healthy() {
                    self.networked.clone()
                } else {
                    self.embedded.clone()
                }
            }
        };
        tracing::debug!("resolved {} store as authoritative", backend.kind());
        backend
    }

    /// The secondary store a failed read may fall back to. `None` when the
    /// preference pins a single store, or when the embedded store (the last
    /// resort) is the one that failed.
    pub fn fallback_for(&self, failed: BackendKind) -> Option<Arc<dyn StorageBackend>> {
        if self.preference != StoragePreference::Auto {
            return None;
        }
        match failed {
            BackendKind::Networked => Some(self.embedded.clone()),
            BackendKind::Embedded => None,
        }
    }

    /// The store opposite to `kind`, used as a donor for member profiles
    pub fn counterpart(&self, kind: BackendKind) -> Arc<dyn StorageBackend> {
        match kind {
            BackendKind::Networked => self.embedded.clone(),
            BackendKind::Embedded => self.networked.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MockStorageBackend;

    fn mock_backend(kind: BackendKind) -> Arc<dyn StorageBackend> {
        let mut mock = MockStorageBackend::new();
        mock.expect_kind().return_const(kind);
        Arc::new(mock)
    }

    fn selector(preference: StoragePreference, networked_healthy: bool) -> StorageSelector {
        StorageSelector::new(
            mock_backend(BackendKind::Networked),
            mock_backend(BackendKind::Embedded),
            preference,
            Arc::new(BackendHealth::new(networked_healthy)),
        )
    }

    #[test]
    fn test_auto_prefers_healthy_networked() {
        assert_eq!(
            selector(StoragePreference::Auto, true).resolve().kind(),
            BackendKind::Networked
        );
    }

    #[test]
    fn test_auto_falls_back_to_embedded_when_unhealthy() {
        assert_eq!(
            selector(StoragePreference::Auto, false).resolve().kind(),
            BackendKind::Embedded
        );
    }

    #[test]
    fn test_explicit_preference_ignores_health() {
        assert_eq!(
            selector(StoragePreference::Networked, false).resolve().kind(),
            BackendKind::Networked
        );
        assert_eq!(
            selector(StoragePreference::Embedded, true).resolve().kind(),
            BackendKind::Embedded
        );
    }

    #[test]
    fn test_fallback_only_in_auto_mode() {
        let auto = selector(StoragePreference::Auto, true);
        assert!(auto.fallback_for(BackendKind::Networked).is_some());
        assert!(auto.fallback_for(BackendKind::Embedded).is_none());

        let pinned = selector(StoragePreference::Networked, true);
        assert!(pinned.fallback_for(BackendKind::Networked).is_none());
    }

    #[test]
    fn test_counterpart_is_the_other_store() {
        let s = selector(StoragePreference::Auto, true);
        assert_eq!(s.counterpart(BackendKind::Networked).kind(), BackendKind::Embedded);
        assert_eq!(s.counterpart(BackendKind::Embedded).kind(), BackendKind::Networked);
    }
}
