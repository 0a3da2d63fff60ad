//! Condition-wait emulation.
//!
//! Waits pass through to the platform primitive, with one exception: a
//! bounded wait issued by the program's *main* thread can be rewritten
//! under the configured [`WaitPolicy`]. A main thread stuck in a long wait
//! never reaches the frame boundary, and inside a deterministic replay the
//! external stimulus that would have signaled it never arrives; rewriting
//! the wait and banking the requested time into the deterministic timer
//! keeps the run stepping.

use crate::context::Runtime;
use lockstep_core::WaitPolicy;
use parking_lot::{Condvar, MutexGuard};
use std::time::Duration;

/// How long each bounded probe of a rewritten wait lasts.
const FINITE_WAIT_PROBE: Duration = Duration::from_millis(100);

/// Outcome of a bounded wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The condition was signaled before the timeout.
    Signaled,
    /// The timeout expired first.
    TimedOut,
}

impl Runtime {
    /// Intercepted unbounded condition wait. Passes through unchanged.
    pub fn cond_wait<T>(&self, cv: &Condvar, guard: &mut MutexGuard<'_, T>) {
        tracing::debug!("condition wait");
        cv.wait(guard);
    }

    /// Intercepted bounded condition wait.
    ///
    /// On any thread but the main one, and under [`WaitPolicy::Native`],
    /// this is a plain bounded wait. On the main thread the policy may
    /// rewrite it; the requested timeout is then transferred into the
    /// deterministic timer so virtual time still observes the wait.
    ///
    /// Under adversarial signal timing the rewritten form can wait longer
    /// in wall-clock terms than the caller asked for; that is the
    /// established behavior of this layer.
    pub fn cond_timedwait<T>(
        &self,
        cv: &Condvar,
        guard: &mut MutexGuard<'_, T>,
        timeout: Duration,
    ) -> WaitOutcome {
        let policy = self.config_snapshot().wait_timeout;
        if policy == WaitPolicy::Native || !self.registry().is_main_thread() {
            return outcome(!cv.wait_for(guard, timeout).timed_out());
        }

        tracing::debug!(?timeout, ?policy, "rewriting main-thread wait");
        match policy {
            WaitPolicy::Finite => {
                if !cv.wait_for(guard, FINITE_WAIT_PROBE).timed_out() {
                    return WaitOutcome::Signaled;
                }
                // The real wait will not happen; virtual time must still
                // see the full requested duration pass.
                self.timer().add_delay(timeout);
                outcome(!cv.wait_for(guard, FINITE_WAIT_PROBE).timed_out())
            }
            WaitPolicy::FullInfinite => {
                self.timer().add_delay(timeout);
                cv.wait(guard);
                WaitOutcome::Signaled
            }
            WaitPolicy::Native => unreachable!("handled above"),
        }
    }

    /// Intercepted condition signal. Passes through unchanged.
    pub fn cond_signal(&self, cv: &Condvar) {
        cv.notify_one();
    }

    /// Intercepted condition broadcast. Passes through unchanged.
    pub fn cond_broadcast(&self, cv: &Condvar) {
        cv.notify_all();
    }
}

fn outcome(signaled: bool) -> WaitOutcome {
    if signaled {
        WaitOutcome::Signaled
    } else {
        WaitOutcome::TimedOut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_core::SharedConfig;
    use parking_lot::Mutex;

    fn runtime(policy: WaitPolicy) -> Runtime {
        Runtime::new(SharedConfig {
            wait_timeout: policy,
            ..SharedConfig::default()
        })
    }

    #[test]
    fn test_native_timedwait_times_out() {
        let rt = runtime(WaitPolicy::Native);
        let mutex = Mutex::new(());
        let cv = Condvar::new();

        let mut guard = mutex.lock();
        let outcome = rt.cond_timedwait(&cv, &mut guard, Duration::from_millis(5));
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(rt.timer().ticks(), Duration::ZERO);
    }

    #[test]
    fn test_finite_policy_banks_timeout_into_virtual_time() {
        let rt = runtime(WaitPolicy::Finite);
        rt.registry().set_main_thread();
        let mutex = Mutex::new(());
        let cv = Condvar::new();

        let requested = Duration::from_secs(30);
        let mut guard = mutex.lock();
        let outcome = rt.cond_timedwait(&cv, &mut guard, requested);
        assert_eq!(outcome, WaitOutcome::TimedOut);
        drop(guard);

        // The requested wait became a pending delay, visible after the
        // next frame boundary.
        let config = SharedConfig {
            fast_forward: true,
            wait_timeout: WaitPolicy::Finite,
            ..SharedConfig::default()
        };
        rt.timer().enter_frame_boundary(&config);
        rt.timer().exit_frame_boundary();
        assert!(rt.timer().ticks() >= requested);
    }

    #[test]
    fn test_finite_policy_leaves_other_threads_alone() {
        let rt = runtime(WaitPolicy::Finite);
        rt.registry().set_main_thread();

        // This wait runs on a non-main thread and must stay native.
        let worker_rt = rt.clone();
        let worker = std::thread::spawn(move || {
            let mutex = Mutex::new(());
            let cv = Condvar::new();
            let mut guard = mutex.lock();
            worker_rt.cond_timedwait(&cv, &mut guard, Duration::from_millis(5))
        });
        assert_eq!(worker.join().unwrap(), WaitOutcome::TimedOut);
        assert_eq!(rt.timer().ticks(), Duration::ZERO);

        let config = SharedConfig {
            fast_forward: true,
            ..SharedConfig::default()
        };
        rt.timer().enter_frame_boundary(&config);
        rt.timer().exit_frame_boundary();
        // Only the frame advance is visible; nothing was banked.
        assert_eq!(rt.timer().ticks(), config.frame_length());
    }

    #[test]
    fn test_signal_wakes_native_wait() {
        let rt = runtime(WaitPolicy::Native);
        let shared = std::sync::Arc::new((Mutex::new(false), Condvar::new()));

        let waiter_rt = rt.clone();
        let waiter_shared = shared.clone();
        let waiter = std::thread::spawn(move || {
            let (mutex, cv) = &*waiter_shared;
            let mut guard = mutex.lock();
            while !*guard {
                let outcome = waiter_rt.cond_timedwait(cv, &mut guard, Duration::from_secs(5));
                if outcome == WaitOutcome::TimedOut {
                    return WaitOutcome::TimedOut;
                }
            }
            WaitOutcome::Signaled
        });

        let (mutex, cv) = &*shared;
        *mutex.lock() = true;
        rt.cond_broadcast(cv);
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Signaled);
    }
}
