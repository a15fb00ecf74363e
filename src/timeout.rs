use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::sleep;

use crate::session::UserId;

/// Identifies the single timer a `(user, slot)` pair may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutKey {
    pub user: UserId,
    pub slot_index: usize,
}

impl TimeoutKey {
    pub fn new(user: UserId, slot_index: usize) -> Self {
        Self { user, slot_index }
    }
}

/// One-shot, cancellable timers on the tokio runtime. Cancellation here is
/// best effort only: a callback that slips past `cancel` must be tolerated
/// by the caller, which the engine does with its cursor guard.
#[derive(Debug, Default)]
pub struct TimeoutScheduler {
    tasks: Mutex<HashMap<TimeoutKey, AbortHandle>>,
}

impl TimeoutScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a timer that runs `callback` once after `delay`. Re-arming an
    /// existing key aborts the previous timer, keeping at most one live
    /// timer per key.
    pub fn schedule<F, Fut>(self: &Arc<Self>, key: TimeoutKey, delay: Duration, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            scheduler.tasks.lock().unwrap().remove(&key);
            callback().await;
        });

        let mut tasks = self.tasks.lock().unwrap();
        if let Some(previous) = tasks.insert(key, handle.abort_handle()) {
            previous.abort();
        }
    }

    /// Disarms the timer for `key` if it is still pending. Safe to call for
    /// keys that already fired or were never armed.
    pub fn cancel(&self, key: &TimeoutKey) {
        if let Some(handle) = self.tasks.lock().unwrap().remove(key) {
            handle.abort();
        }
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(slot: usize) -> TimeoutKey {
        TimeoutKey::new(UserId(1), slot)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_the_delay() {
        let scheduler = Arc::new(TimeoutScheduler::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        scheduler.schedule(key(0), Duration::from_secs(30), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sleep(Duration::from_secs(29)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing_and_is_idempotent() {
        let scheduler = Arc::new(TimeoutScheduler::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        scheduler.schedule(key(0), Duration::from_secs(30), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.cancel(&key(0));
        scheduler.cancel(&key(0));

        sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_fire_is_a_no_op() {
        let scheduler = Arc::new(TimeoutScheduler::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        scheduler.schedule(key(3), Duration::from_secs(30), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sleep(Duration::from_secs(31)).await;
        scheduler.cancel(&key(3));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_a_key_replaces_the_previous_timer() {
        let scheduler = Arc::new(TimeoutScheduler::new());
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let counter = Arc::clone(&fired);
            scheduler.schedule(key(0), Duration::from_secs(30), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        sleep(Duration::from_secs(90)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
