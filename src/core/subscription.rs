//! Subscription handles returned by every `on`/`subscribe` in the crate.

use std::sync::Mutex;

type Release = Box<dyn FnOnce() + Send>;

/// Releases a registered listener exactly once, on [`Subscription::unsubscribe`] or drop.
#[must_use = "dropping a Subscription releases the listener"]
pub struct Subscription {
    release: Mutex<Option<Release>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self { release: Mutex::new(Some(Box::new(release))) }
    }

    /// A handle with nothing to release.
    pub fn noop() -> Self {
        Self { release: Mutex::new(None) }
    }

    /// Idempotent: only the first call runs the release hook.
    pub fn unsubscribe(&self) {
        let release = self
            .release
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(release) = release {
            release();
        }
    }

    pub fn is_active(&self) -> bool {
        self.release
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Keep the listener registered for the lifetime of its target.
    pub fn detach(self) {
        self.release
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("active", &self.is_active()).finish()
    }
}
