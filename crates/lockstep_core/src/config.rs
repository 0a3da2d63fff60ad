//! Shared run configuration.
//!
//! One `SharedConfig` lives in the controlled program and one in the
//! controller; the controller's copy is authoritative and is pushed over the
//! control channel at every frame boundary where it changed. The program
//! never edits its copy, it only overwrites it with what the controller sent.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Policy applied to unbounded (or very long) waits performed by the main
/// thread of the controlled program.
///
/// A program waiting forever on a condition that only an external stimulus
/// would satisfy can soft-lock the whole run, because nothing external ever
/// happens inside a deterministic replay. Rewriting the wait keeps the main
/// thread reaching frame boundaries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitPolicy {
    /// Leave waits untouched.
    #[default]
    Native,
    /// Probe briefly, transfer the requested timeout into virtual time,
    /// then probe briefly again and give up.
    Finite,
    /// Transfer the requested timeout into virtual time, then wait
    /// unbounded.
    FullInfinite,
}

/// Run settings shared between the controlled program and the controller.
///
/// Replicated verbatim: the controller serializes the whole struct and the
/// program overwrites its copy wholesale on reception.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Free-running (true) or single-stepping under controller advance.
    pub running: bool,
    /// Fast-forward: drop wall-clock pacing and allow draw skipping.
    pub fast_forward: bool,
    /// While fast-forwarding, skip every draw instead of keeping a few
    /// frames per second on screen.
    pub fast_forward_skip_rendering: bool,
    /// An AV dump is in progress; every frame must be drawn and encoded.
    pub av_dumping: bool,
    /// Keep OS threads alive across logical-thread lifetimes so snapshots
    /// of process memory stay self-consistent across restores.
    pub recycle_threads: bool,
    /// Rewriting policy for unbounded main-thread waits.
    pub wait_timeout: WaitPolicy,
    /// Allow automatic backtrack snapshots around risky events.
    pub backtrack_snapshot: bool,
    /// Preserve screen pixels across redraws so the controller can ask for
    /// an identical redraw of the current frame.
    pub save_screen: bool,
    /// Nominal frames per second of the controlled program. Never zero.
    pub framerate: u32,
    /// Frame count the run started from (nonzero after a mid-run attach).
    pub initial_frame: u64,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            running: true,
            fast_forward: false,
            fast_forward_skip_rendering: false,
            av_dumping: false,
            recycle_threads: true,
            wait_timeout: WaitPolicy::Native,
            backtrack_snapshot: false,
            save_screen: true,
            framerate: 60,
            initial_frame: 0,
        }
    }
}

impl SharedConfig {
    /// Virtual duration of one frame.
    pub fn frame_length(&self) -> Duration {
        // Guard against a zeroed struct coming over the wire.
        Duration::from_nanos(1_000_000_000 / u64::from(self.framerate.max(1)))
    }
}
