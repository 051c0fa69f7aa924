//! Deferred resource release.
//!
//! A [`DeletionQueue`] collects release actions while resources are still in
//! use by the GPU and runs them once it is safe. Actions run in reverse
//! registration order, so a resource registered after the one it depends on
//! (a view after its image, a set after its pool) is released first.
//!
//! The renderer keeps two scopes:
//! - one queue per frame slot, flushed after that slot's fence signals
//! - one global queue, flushed at shutdown after the device is idle
//!
//! Pushing an engine-lifetime release into a per-slot queue frees it one
//! frame later. Nothing detects that; pick the queue by the resource's lifetime.

use tracing::{trace, warn};

type ReleaseAction = Box<dyn FnOnce() + Send>;

/// A LIFO stack of release actions.
#[derive(Default)]
pub struct DeletionQueue {
    actions: Vec<ReleaseAction>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a release action to run on the next [`flush`](Self::flush).
    pub fn push(&mut self, action: impl FnOnce() + Send + 'static) {
        self.actions.push(Box::new(action));
    }

    /// Runs every pending action, last registered first, and empties the queue.
    pub fn flush(&mut self) {
        if self.actions.is_empty() {
            return;
        }
        trace!("Flushing {} deferred release(s)", self.actions.len());
        while let Some(action) = self.actions.pop() {
            action();
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for DeletionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletionQueue")
            .field("pending", &self.actions.len())
            .finish()
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        // The device may already be gone; running the actions here is unsafe.
        if !self.actions.is_empty() {
            warn!(
                "DeletionQueue dropped with {} unreleased action(s)",
                self.actions.len()
            );
        }
    }
}
