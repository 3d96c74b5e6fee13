//! One-shot cancellation handles returned by every registration.

use std::fmt;

use parking_lot::Mutex;

type Action = Box<dyn FnOnce() + Send>;

/// Reverses exactly one registration.
///
/// The wrapped action runs at most once; calling [`Disposer::dispose`] again
/// is a no-op. Dropping a disposer does not dispose it, so a plugin that
/// discards its handle keeps the registration until the host calls
/// `clear_plugin` for it.
pub struct Disposer {
    action: Mutex<Option<Action>>,
}

impl Disposer {
    /// Wrap a cleanup action.
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self { action: Mutex::new(Some(Box::new(action))) }
    }

    /// A disposer that does nothing.
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Run the cleanup action if it has not run yet.
    pub fn dispose(&self) {
        // Take the action first so it runs without the slot locked.
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    /// Whether the cleanup action has already run.
    pub fn is_disposed(&self) -> bool {
        self.action.lock().is_none()
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer").field("disposed", &self.is_disposed()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_dispose_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let disposer = Disposer::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!disposer.is_disposed());
        disposer.dispose();
        disposer.dispose();

        assert!(disposer.is_disposed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_does_not_dispose() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        drop(Disposer::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_action_may_reenter_disposer() {
        let inner = Arc::new(Disposer::noop());
        let nested = Arc::clone(&inner);
        let outer = Disposer::new(move || nested.dispose());

        outer.dispose();
        assert!(inner.is_disposed());
    }
}
