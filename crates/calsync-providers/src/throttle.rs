//! Concurrency limiting for outbound provider requests.
//!
//! At most `max_concurrent` requests run at once. Further callers wait on a
//! fair semaphore, so they are admitted in FIFO order; a caller that had to
//! wait resumes after a short spacing delay so bursts are smoothed out.
//! Slots are RAII guards, so a request that errors or panics still releases
//! its slot, and a caller cancelled while waiting holds nothing.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Default number of concurrent requests.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;
/// Default pause before a queued request starts.
pub const DEFAULT_SPACING: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    pub max_concurrent: usize,
    pub spacing: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            spacing: DEFAULT_SPACING,
        }
    }
}

impl ThrottleConfig {
    /// A ceiling of zero would deadlock every caller, so it is clamped to one.
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    #[must_use]
    pub fn with_spacing(mut self, spacing: Duration) -> Self {
        self.spacing = spacing;
        self
    }
}

/// Shared request limiter. Cloning yields a handle to the same limiter.
#[derive(Debug, Clone)]
pub struct RequestThrottle {
    config: ThrottleConfig,
    semaphore: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
}

impl Default for RequestThrottle {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}

impl RequestThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        let config = config.with_max_concurrent(config.max_concurrent);
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            queued: Arc::new(AtomicUsize::new(0)),
            config,
        }
    }

    pub fn config(&self) -> ThrottleConfig {
        self.config
    }

    /// Number of slots currently held.
    pub fn active(&self) -> usize {
        self.config.max_concurrent - self.semaphore.available_permits()
    }

    /// Number of callers waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Waits for a slot. The returned guard releases it on drop.
    pub async fn acquire(&self) -> RequestSlot {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            trace!(active = self.active(), "request slot acquired");
            return RequestSlot { _permit: permit };
        }

        let permit = {
            let _waiting = QueuedGuard::enter(&self.queued);
            trace!(queued = self.queued(), "request queued");
            self.semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("throttle semaphore is never closed")
        };
        // The permit is ours from here on; dropping it during the pause releases it.
        let slot = RequestSlot { _permit: permit };
        tokio::time::sleep(self.config.spacing).await;
        trace!("request slot handed to waiter");
        slot
    }

    /// Runs `f` while holding a slot.
    pub async fn run<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _slot = self.acquire().await;
        f().await
    }
}

/// Permission to perform one outbound request.
#[derive(Debug)]
#[must_use = "the slot is released as soon as it is dropped"]
pub struct RequestSlot {
    _permit: OwnedSemaphorePermit,
}

/// Counts a caller as queued until it is admitted or cancelled.
struct QueuedGuard<'a>(&'a AtomicUsize);

impl<'a> QueuedGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
