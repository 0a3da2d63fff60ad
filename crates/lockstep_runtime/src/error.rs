//! Runtime error types

use thiserror::Error;

/// Thread-lifecycle errors, mirroring the platform's own failure taxonomy
/// so intercepted calls can hand the program the error it expects.
#[derive(Error, Debug)]
pub enum ThreadError {
    /// The identity is unknown or was already reaped
    #[error("no such logical thread")]
    NotFound,

    /// The logical thread was already detached
    #[error("logical thread is already detached")]
    AlreadyDetached,

    /// Non-blocking join on a thread that has not terminated
    #[error("logical thread has not terminated yet")]
    WouldBlock,

    /// Bounded join expired before the thread terminated
    #[error("timed out waiting for logical thread")]
    TimedOut,

    /// OS thread creation failed; the speculative slot was released
    #[error("OS thread creation failed: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result type for thread-lifecycle operations
pub type Result<T> = std::result::Result<T, ThreadError>;
