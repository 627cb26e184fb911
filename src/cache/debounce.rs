//! Per-key debounce timers for coalescing cache invalidations
//!
//! Bulk role edits trigger one invalidation request per permission change;
//! the debouncer collapses a burst for the same `(tenant, role)` into a
//! single invalidation once the window elapses. State is process-local: a
//! duplicate invalidation across instances is harmless, so no coordination
//! is needed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Coalesces repeated calls for the same key into one action per window.
/// Each new call for a key cancels the pending timer and restarts it.
#[derive(Clone)]
pub struct Debouncer {
    window: Duration,
    timers: Arc<Mutex<HashMap<(Uuid, Uuid), JoinHandle<()>>>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedule `action` to run after the debounce window, cancelling any
    /// pending action for the same key.
    pub fn call<F, Fut>(&self, key: (Uuid, Uuid), action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut timers = match self.timers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(pending) = timers.remove(&key) {
            pending.abort();
        }

        let window = self.window;
        let timers_ref = Arc::clone(&self.timers);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Ok(mut map) = timers_ref.lock() {
                map.remove(&key);
            }
            action().await;
        });

        timers.insert(key, handle);
    }

    /// Number of keys with a pending (not yet fired) action.
    pub fn pending(&self) -> usize {
        self.timers
            .lock()
            .map(|map| map.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_to_one_action() {
        let debouncer = Debouncer::new(Duration::from_millis(500));
        let fired = Arc::new(AtomicUsize::new(0));
        let key = (Uuid::new_v4(), Uuid::new_v4());

        for _ in 0..10 {
            let fired = Arc::clone(&fired);
            debouncer.call(key, move || async move {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_fire_independently() {
        let debouncer = Debouncer::new(Duration::from_millis(500));
        let fired = Arc::new(AtomicUsize::new(0));
        let tenant = Uuid::new_v4();

        for _ in 0..3 {
            for role in [Uuid::from_u128(1), Uuid::from_u128(2)] {
                let fired = Arc::clone(&fired);
                debouncer.call((tenant, role), move || async move {
                    fired.fetch_add(1, Ordering::SeqCst);
                });
            }
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_call_restarts_window() {
        let debouncer = Debouncer::new(Duration::from_millis(500));
        let fired = Arc::new(AtomicUsize::new(0));
        let key = (Uuid::new_v4(), Uuid::new_v4());

        let f = Arc::clone(&fired);
        debouncer.call(key, move || async move {
            f.fetch_add(1, Ordering::SeqCst);
        });

        // Halfway through the window, request again: nothing has fired yet
        // and the timer restarts.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let f = Arc::clone(&fired);
        debouncer.call(key, move || async move {
            f.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
