//! Concurrency token accounting.
//!
//! Every tracked message in flight holds exactly one token from a fixed
//! budget. Injection acquires, settling releases. `try_acquire` backs the
//! non-blocking `enqueue` path; the blocking `acquire` backs `execute`.

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Fixed-capacity token pool with both blocking and non-blocking acquire.
pub(crate) struct TokenGovernor {
    capacity: usize,
    available: Mutex<usize>,
    freed: Notify,
}

impl TokenGovernor {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            available: Mutex::new(capacity),
            freed: Notify::new(),
        }
    }

    /// Takes `n` tokens atomically, or none at all.
    pub(crate) fn try_acquire(&self, n: usize) -> bool {
        let mut available = self.available.lock();
        if *available >= n {
            *available -= n;
            true
        } else {
            false
        }
    }

    /// Waits until `n` tokens can be taken atomically.
    pub(crate) async fn acquire(&self, n: usize) {
        loop {
            // Register interest before checking, so a release between the
            // check and the await cannot be missed.
            let freed = self.freed.notified();
            tokio::pin!(freed);
            freed.as_mut().enable();
            if self.try_acquire(n) {
                return;
            }
            freed.await;
        }
    }

    /// Returns `n` tokens to the pool.
    pub(crate) fn release(&self, n: usize) {
        let mut available = self.available.lock();
        *available = (*available + n).min(self.capacity);
        drop(available);
        self.freed.notify_waiters();
    }

    /// Tokens currently held by in-flight messages.
    pub(crate) fn in_flight(&self) -> usize {
        self.capacity - *self.available.lock()
    }

    /// Resolves once every token has been returned.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let freed = self.freed.notified();
            tokio::pin!(freed);
            freed.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            freed.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn acquire_is_all_or_nothing() {
        let governor = TokenGovernor::new(3);
        assert!(governor.try_acquire(2));
        assert!(!governor.try_acquire(2));
        assert_eq!(governor.in_flight(), 2);
        governor.release(1);
        assert!(governor.try_acquire(2));
        assert_eq!(governor.in_flight(), 3);
    }

    #[test]
    fn release_never_exceeds_capacity() {
        let governor = TokenGovernor::new(2);
        governor.release(5);
        assert_eq!(governor.in_flight(), 0);
        assert!(governor.try_acquire(2));
        assert!(!governor.try_acquire(1));
    }

    #[tokio::test]
    async fn blocking_acquire_wakes_on_release() {
        let governor = Arc::new(TokenGovernor::new(1));
        assert!(governor.try_acquire(1));
        let waiter = {
            let governor = Arc::clone(&governor);
            tokio::spawn(async move {
                governor.acquire(1).await;
            })
        };
        tokio::task::yield_now().await;
        governor.release(1);
        waiter.await.unwrap();
        assert_eq!(governor.in_flight(), 1);
    }

    #[tokio::test]
    async fn wait_idle_resolves_when_drained() {
        let governor = Arc::new(TokenGovernor::new(2));
        assert!(governor.try_acquire(2));
        let drainer = {
            let governor = Arc::clone(&governor);
            tokio::spawn(async move {
                governor.wait_idle().await;
            })
        };
        tokio::task::yield_now().await;
        governor.release(1);
        tokio::task::yield_now().await;
        governor.release(1);
        drainer.await.unwrap();
    }
}
