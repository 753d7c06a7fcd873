//! Scoped per-attempt call contexts.
//!
//! A context scope represents the environment setup for one physical call
//! attempt (outgoing metadata, diagnostic scopes, and the like). It is opened
//! immediately before the attempt and released deterministically when the
//! guard drops, whatever path the attempt took. Scopes are never shared
//! across concurrent attempts.

use std::fmt;

use tessera_core::TransportError;

/// Opens the per-attempt call scope.
pub trait ContextFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns a `TransportError` when the scope could not be established;
    /// the failure is classified like any other attempt failure.
    fn open_context(&self) -> Result<ContextGuard, TransportError>;
}

/// RAII guard for one call scope; releases the scope on drop.
pub struct ContextGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ContextGuard {
    /// Guard that runs `release` when dropped.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Guard with nothing to release.
    #[must_use]
    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for ContextGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextGuard")
            .field("releases", &self.release.is_some())
            .finish()
    }
}

/// Factory for callers that need no per-attempt setup.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopContextFactory;

impl ContextFactory for NoopContextFactory {
    fn open_context(&self) -> Result<ContextGuard, TransportError> {
        Ok(ContextGuard::noop())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn guard_releases_exactly_once_on_drop() {
        let released = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&released);
        let guard = ContextGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(guard);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn noop_factory_opens_empty_scope() {
        let guard = NoopContextFactory.open_context().unwrap();
        drop(guard);
    }
}
