//! Deterministic virtual time.
//!
//! The timer is the single authority for "now" inside the controlled
//! program. Virtual time is strictly non-decreasing and advances through
//! exactly two paths: the per-frame boundary (one frame length per frame)
//! and the delay accumulator fed by blocking-call emulation. Direct OS
//! clock reads never leak into the program's logical time.

use crate::config::SharedConfig;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct TimerState {
    /// Virtual time since the run started.
    ticks: Duration,
    /// Delay accumulated by emulated sleeps/waits, folded into `ticks` at
    /// the next frame boundary.
    pending_delay: Duration,
    /// Wall-clock instant of the previous boundary exit, for pacing.
    last_exit: Option<Instant>,
}

/// A controllable monotonic clock for the run.
///
/// The timer cannot fail; `enter_frame_boundary` may block the caller to
/// pace virtual time against the wall clock.
#[derive(Debug, Default)]
pub struct DeterministicTimer {
    state: Mutex<TimerState>,
}

impl DeterministicTimer {
    /// Create a timer starting at virtual time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a timer starting at the given virtual time (used when
    /// resynchronizing after a snapshot restore).
    pub fn starting_at(ticks: Duration) -> Self {
        Self {
            state: Mutex::new(TimerState {
                ticks,
                ..TimerState::default()
            }),
        }
    }

    /// Current virtual time.
    pub fn ticks(&self) -> Duration {
        self.state.lock().ticks
    }

    /// Accumulate a delay representing an emulated sleep or wait.
    ///
    /// The delay becomes visible in `ticks()` at the next frame boundary.
    pub fn add_delay(&self, delay: Duration) {
        let mut state = self.state.lock();
        state.pending_delay = state.pending_delay.saturating_add(delay);
        tracing::debug!(?delay, total = ?state.pending_delay, "delay accumulated");
    }

    /// Force the virtual time to a specific value.
    ///
    /// Only legal while resynchronizing after a snapshot restore, when the
    /// restored memory image already carries the ticks of the restored
    /// frame; the controller remains the authority on which value that is.
    pub fn resync(&self, ticks: Duration) {
        let mut state = self.state.lock();
        state.ticks = ticks;
        state.pending_delay = Duration::ZERO;
    }

    /// Enter the per-frame synchronization point.
    ///
    /// Advances virtual time by one frame length plus whatever delay was
    /// accumulated since the last frame, then sleeps off the remainder of
    /// the real frame budget unless fast-forwarding.
    pub fn enter_frame_boundary(&self, config: &SharedConfig) {
        let frame_length = config.frame_length();

        let pace = {
            let mut state = self.state.lock();
            let delay = std::mem::take(&mut state.pending_delay);
            state.ticks = state.ticks.saturating_add(frame_length + delay);

            if config.fast_forward {
                None
            } else {
                state
                    .last_exit
                    .map(|exit| frame_length.saturating_sub(exit.elapsed()))
            }
        };

        // Sleep outside the lock so other threads can still read ticks and
        // bank delays while the main thread is being paced.
        if let Some(remaining) = pace {
            if !remaining.is_zero() {
                std::thread::sleep(remaining);
            }
        }
    }

    /// Leave the per-frame synchronization point.
    pub fn exit_frame_boundary(&self) {
        self.state.lock().last_exit = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> SharedConfig {
        SharedConfig {
            fast_forward: true,
            ..SharedConfig::default()
        }
    }

    #[test]
    fn test_ticks_start_at_zero() {
        let timer = DeterministicTimer::new();
        assert_eq!(timer.ticks(), Duration::ZERO);
    }

    #[test]
    fn test_frame_boundary_advances_one_frame() {
        let config = fast_config();
        let timer = DeterministicTimer::new();

        timer.enter_frame_boundary(&config);
        timer.exit_frame_boundary();
        assert_eq!(timer.ticks(), config.frame_length());

        timer.enter_frame_boundary(&config);
        timer.exit_frame_boundary();
        assert_eq!(timer.ticks(), config.frame_length() * 2);
    }

    #[test]
    fn test_delay_consumed_at_boundary() {
        let config = fast_config();
        let timer = DeterministicTimer::new();

        timer.add_delay(Duration::from_millis(250));
        // Not visible until the boundary.
        assert_eq!(timer.ticks(), Duration::ZERO);

        timer.enter_frame_boundary(&config);
        timer.exit_frame_boundary();
        assert_eq!(
            timer.ticks(),
            config.frame_length() + Duration::from_millis(250)
        );

        // The accumulator was drained.
        timer.enter_frame_boundary(&config);
        timer.exit_frame_boundary();
        assert_eq!(
            timer.ticks(),
            config.frame_length() * 2 + Duration::from_millis(250)
        );
    }

    #[test]
    fn test_ticks_never_regress() {
        let config = fast_config();
        let timer = DeterministicTimer::new();

        let mut previous = timer.ticks();
        for _ in 0..100 {
            timer.add_delay(Duration::from_micros(10));
            timer.enter_frame_boundary(&config);
            timer.exit_frame_boundary();
            let now = timer.ticks();
            assert!(now >= previous);
            previous = now;
        }
    }

    #[test]
    fn test_resync_overwrites_ticks() {
        let timer = DeterministicTimer::new();
        timer.add_delay(Duration::from_secs(5));
        timer.resync(Duration::from_secs(42));

        assert_eq!(timer.ticks(), Duration::from_secs(42));

        // Pending delay was cleared by the resync.
        let config = fast_config();
        timer.enter_frame_boundary(&config);
        timer.exit_frame_boundary();
        assert_eq!(timer.ticks(), Duration::from_secs(42) + config.frame_length());
    }
}
