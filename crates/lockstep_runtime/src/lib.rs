//! Lockstep Runtime
//!
//! The core of the Lockstep run-control system: an injected runtime that
//! makes an unmodified native program execute deterministically and
//! pausable/rewindable under external control.
//!
//! Three subsystems cooperate:
//!
//! - **Thread virtualization** ([`registry`], [`threads`]): the program's
//!   threading calls are intercepted and mapped onto *logical threads*.
//!   With recycling enabled, OS threads outlive individual routines and
//!   are reassigned, so whole-process memory snapshots stay consistent
//!   across restores.
//! - **Frame boundary control** ([`frame`]): once per rendered frame the
//!   program hands control to the external controller process and blocks
//!   until the controller ends the frame.
//! - **Deterministic time** (re-exported from `lockstep_core`): both of
//!   the above advance a virtual clock that never reads the OS clock.
//!
//! # Example
//!
//! ```rust
//! use lockstep_runtime::{CreateOpts, Runtime};
//! use lockstep_core::SharedConfig;
//!
//! let runtime = Runtime::new(SharedConfig::default());
//!
//! let id = runtime
//!     .create_thread(|| Box::new(2 + 2), CreateOpts::default().with_label("adder"))
//!     .unwrap();
//! let retval = runtime.join_thread(id).unwrap();
//! assert_eq!(*retval.downcast::<i32>().unwrap(), 4);
//! # runtime.terminate_threads();
//! ```

pub mod context;
pub mod error;
pub mod frame;
pub mod registry;
pub mod sync;
pub mod threads;
pub mod traits;
pub mod waits;

pub use context::Runtime;
pub use error::{Result, ThreadError};
pub use frame::{FpsCounter, FrameBoundary, FrameFlow, FrameState};
pub use registry::{LogicalThread, Registry, RetVal, StartRoutine, ThreadId, ThreadState};
pub use sync::ThreadSync;
pub use threads::CreateOpts;
pub use traits::{
    Checkpoint, Collaborators, Encoder, NoopCheckpoint, NoopEncoder, NoopScreenCapture,
    NoopTlsReset, NoopWindowShell, ScreenCapture, TlsReset, WindowShell,
};
pub use waits::WaitOutcome;
