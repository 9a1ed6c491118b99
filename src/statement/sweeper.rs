use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::affinity::StatementCache;

/// Background task that periodically sweeps one statement's affinity cache.
///
/// The task only holds a weak reference to the cache, so it ends on its own once the
/// statement is gone; dropping the `Sweeper` also cancels it.
pub(crate) struct Sweeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Start sweeping every `interval`. Returns `None` when `interval` is zero or no
    /// tokio runtime is available.
    pub(crate) fn spawn(
        cache: Weak<StatementCache>,
        max_idle_ms: Arc<AtomicU64>,
        interval: Duration,
    ) -> Option<Self> {
        if interval.is_zero() {
            return None;
        }
        let Ok(runtime) = Handle::try_current() else {
            tracing::debug!("no tokio runtime; statement sweeping disabled");
            return None;
        };

        let token = CancellationToken::new();
        let stop = token.clone();
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else { break };
                        let max_idle = Duration::from_millis(max_idle_ms.load(Ordering::Relaxed));
                        sweep_and_dispose(&cache, max_idle);
                    }
                }
            }
            tracing::trace!("statement sweeper stopped");
        });

        Some(Self { token, handle })
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("cancelled", &self.token.is_cancelled())
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

/// Sweep `cache` now and close evicted idle handles in the background.
///
/// Close failures are logged and otherwise ignored; a handle that fails to close is
/// already out of the cache either way. Returns the number of entries removed.
pub(crate) fn sweep_and_dispose(cache: &StatementCache, max_idle: Duration) -> usize {
    let outcome = cache.sweep(Instant::now(), max_idle);
    let evicted = outcome.evicted();
    if evicted > 0 || outcome.busy > 0 {
        tracing::debug!(
            query = cache.query(),
            dead = outcome.dead,
            idle = outcome.idle.len(),
            busy = outcome.busy,
            "swept statement cache"
        );
    }

    if outcome.idle.is_empty() {
        return evicted;
    }
    match Handle::try_current() {
        Ok(runtime) => {
            for statement in outcome.idle {
                runtime.spawn(async move {
                    if let Err(error) = statement.close().await {
                        tracing::debug!(%error, query = statement.query(), "closing idle statement failed");
                    }
                });
            }
        }
        Err(_) => {
            tracing::debug!("no tokio runtime; idle statements dropped without close");
        }
    }
    evicted
}
