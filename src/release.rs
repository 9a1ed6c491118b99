//! Shared, single-fire release of a borrowed connection.
//!
//! Every proxy derived from one borrow (a streaming cursor, a statement, a transaction
//! and whatever it hands out) holds one [`ReleaseGuard`]. The guards share a counter and
//! a one-shot callback; the callback runs when the last guard goes away, whether it was
//! released explicitly, dropped on an error path, or dropped because a future was
//! cancelled.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type ReleaseFn = Box<dyn FnOnce() + Send + 'static>;

struct Obligation {
    refs: AtomicUsize,
    release: Mutex<Option<ReleaseFn>>,
}

impl Obligation {
    fn fire(&self) {
        let release = self
            .release
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(release) = release {
            release();
        }
    }
}

/// One reference on a release obligation.
///
/// Holding a guard keeps the connection borrowed. The callback passed to
/// [`ReleaseGuard::new`] runs exactly once, when the reference count drops from one to
/// zero.
pub struct ReleaseGuard {
    obligation: Arc<Obligation>,
}

impl ReleaseGuard {
    /// Create the first reference on a fresh obligation.
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            obligation: Arc::new(Obligation {
                refs: AtomicUsize::new(1),
                release: Mutex::new(Some(Box::new(release))),
            }),
        }
    }

    /// Add a reference; the returned guard co-owns the release.
    #[must_use]
    pub fn share(&self) -> ReleaseGuard {
        self.obligation.refs.fetch_add(1, Ordering::AcqRel);
        ReleaseGuard {
            obligation: Arc::clone(&self.obligation),
        }
    }

    /// Number of guards still holding the obligation open.
    #[must_use]
    pub fn references(&self) -> usize {
        self.obligation.refs.load(Ordering::Acquire)
    }

    /// Drop this reference now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if self.obligation.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.obligation.fire();
        }
    }
}

impl fmt::Debug for ReleaseGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseGuard")
            .field("references", &self.references())
            .finish()
    }
}
