//! Lockstep Core
//!
//! Foundational primitives for the Lockstep run-control runtime:
//!
//! - **Deterministic Timer**: the single authority for virtual time inside
//!   the controlled program
//! - **Shared Configuration**: the run settings replicated verbatim between
//!   the controlled program and the controller process
//! - **Input Payloads**: the per-frame input snapshot and one-shot program
//!   metadata carried over the control channel
//!
//! # Example
//!
//! ```rust
//! use lockstep_core::{DeterministicTimer, SharedConfig};
//!
//! let config = SharedConfig {
//!     fast_forward: true, // no wall-clock pacing
//!     ..SharedConfig::default()
//! };
//! let timer = DeterministicTimer::new();
//!
//! // One frame advances virtual time by exactly one frame length.
//! timer.enter_frame_boundary(&config);
//! timer.exit_frame_boundary();
//! assert_eq!(timer.ticks(), config.frame_length());
//! ```

pub mod config;
pub mod input;
pub mod timer;

pub use config::{SharedConfig, WaitPolicy};
pub use input::{InputState, ProgramInfo};
pub use timer::DeterministicTimer;
