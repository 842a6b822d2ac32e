//! Owned handle for a standing listener registration.

use std::fmt;

/// Keeps a listener registered until [`close`](Subscription::close) is called or
/// the handle is dropped.
///
/// Closing is idempotent: the disposer runs at most once.
#[must_use = "dropping a Subscription closes it immediately"]
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(dispose: impl FnOnce() + Send + 'static) -> Self {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    /// A handle with nothing to release.
    pub fn noop() -> Self {
        Self { dispose: None }
    }

    pub fn close(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.dispose.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}
