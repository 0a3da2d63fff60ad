//! Process-wide lifecycle synchronization.
//!
//! Two mechanisms keep the registry consistent under concurrency:
//!
//! - the **wrapper execution lock**, held around every thread-lifecycle
//!   operation so no two of them interleave. Lifecycle operations are rare
//!   next to steady-state execution, so one coarse lock buys the strong
//!   invariant cheaply;
//! - the **uninitialized-thread counter**, tracking threads that have been
//!   handed an identity but have not yet installed themselves in the
//!   registry. Join, detach, and the snapshot path wait for it to reach
//!   zero before trusting their view of the thread set.

use parking_lot::{Condvar, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct ThreadSync {
    wrapper: Mutex<()>,
    uninitialized: Mutex<usize>,
    registered: Condvar,
}

impl ThreadSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the wrapper execution lock for the duration of one lifecycle
    /// operation.
    pub fn wrapper_lock(&self) -> MutexGuard<'_, ()> {
        self.wrapper.lock()
    }

    /// A thread has been assigned an identity but has not registered yet.
    pub fn registration_started(&self) {
        *self.uninitialized.lock() += 1;
    }

    /// The thread is installed in the registry (or creation failed).
    pub fn registration_finished(&self) {
        let mut count = self.uninitialized.lock();
        debug_assert!(*count > 0, "registration finished without a start");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.registered.notify_all();
        }
    }

    /// Block until every in-flight registration has completed.
    pub fn wait_until_registered(&self) {
        let mut count = self.uninitialized.lock();
        while *count > 0 {
            self.registered.wait(&mut count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_wait_returns_immediately_when_none_pending() {
        let sync = ThreadSync::new();
        sync.wait_until_registered();
    }

    #[test]
    fn test_wait_blocks_until_registration_finishes() {
        let sync = Arc::new(ThreadSync::new());
        sync.registration_started();

        let waiter = {
            let sync = sync.clone();
            std::thread::spawn(move || sync.wait_until_registered())
        };

        // The waiter cannot finish while a registration is pending.
        std::thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        sync.registration_finished();
        waiter.join().unwrap();
    }
}
