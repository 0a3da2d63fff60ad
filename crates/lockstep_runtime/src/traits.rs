//! Collaborator seams.
//!
//! The frame boundary and the trampoline drive several subsystems that live
//! outside this crate: the whole-process checkpoint engine, the screen
//! pixel store, the AV encoder, the window layer, and the platform's
//! thread-local-storage reset. Each is a trait here so the core can run
//! against no-op implementations in tests and against the real thing in
//! the injected build.

/// Whole-process snapshot capture and restore.
pub trait Checkpoint: Send {
    /// Directory the next snapshots are written under.
    fn set_path(&mut self, path: String);
    /// Slot index the next snapshots are written into.
    fn set_slot(&mut self, slot: u32);
    /// Capture the process state at the current execution point.
    ///
    /// Implementations must clear the restore-flight flag before a fresh
    /// capture returns, so `in_restore_flight` answers for this resumption
    /// only.
    fn capture(&mut self);
    /// Restore the process state from the current slot. On success
    /// execution resumes inside a past `capture`; returning from here
    /// means the restore failed.
    fn restore(&mut self);
    /// True when the current return from `capture` is the resumption of a
    /// previously issued `restore` rather than a fresh capture.
    fn in_restore_flight(&self) -> bool;
}

/// Screen pixel preservation, so the current frame can be redrawn
/// identically while the program is paused.
pub trait ScreenCapture: Send {
    /// Save the pixels of the frame about to be presented.
    fn store(&mut self);
    /// Put the saved pixels back on screen.
    fn restore(&mut self);
}

/// AV dump sink.
pub trait Encoder: Send {
    /// Output file and encoder options for the dump.
    fn set_output(&mut self, path: String, options: String);
    /// Encode the current frame; `drew` is false for non-draw frames,
    /// which still occupy one frame of output time.
    fn encode_frame(&mut self, drew: bool);
    /// Finalize and close the dump.
    fn finish(&mut self);
}

/// The program's window layer.
pub trait WindowShell: Send {
    /// Deliver a platform close-window event, so the program shuts down
    /// through its own quit path instead of being killed.
    fn push_quit_event(&mut self);
}

/// Platform reset of OS-thread-local state.
///
/// A recycled OS thread must not leak the previous logical thread's
/// thread-local values into the next routine. How that is done is
/// ABI-specific; the trampoline only knows to call this between routines.
pub trait TlsReset: Send + Sync {
    fn reset_current_thread(&self);
}

/// No-op checkpoint engine.
#[derive(Debug, Default)]
pub struct NoopCheckpoint;

impl Checkpoint for NoopCheckpoint {
    fn set_path(&mut self, _path: String) {}
    fn set_slot(&mut self, _slot: u32) {}
    fn capture(&mut self) {}
    fn restore(&mut self) {}
    fn in_restore_flight(&self) -> bool {
        false
    }
}

/// No-op screen store.
#[derive(Debug, Default)]
pub struct NoopScreenCapture;

impl ScreenCapture for NoopScreenCapture {
    fn store(&mut self) {}
    fn restore(&mut self) {}
}

/// Encoder that discards every frame.
#[derive(Debug, Default)]
pub struct NoopEncoder;

impl Encoder for NoopEncoder {
    fn set_output(&mut self, _path: String, _options: String) {}
    fn encode_frame(&mut self, _drew: bool) {}
    fn finish(&mut self) {}
}

/// Window layer that swallows quit events.
#[derive(Debug, Default)]
pub struct NoopWindowShell;

impl WindowShell for NoopWindowShell {
    fn push_quit_event(&mut self) {}
}

/// TLS reset that trusts routines not to leave state behind.
#[derive(Debug, Default)]
pub struct NoopTlsReset;

impl TlsReset for NoopTlsReset {
    fn reset_current_thread(&self) {}
}

/// The collaborator bundle handed to the frame boundary controller.
pub struct Collaborators {
    pub checkpoint: Box<dyn Checkpoint>,
    pub screen: Box<dyn ScreenCapture>,
    pub encoder: Box<dyn Encoder>,
    pub window: Box<dyn WindowShell>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            checkpoint: Box::new(NoopCheckpoint),
            screen: Box::new(NoopScreenCapture),
            encoder: Box::new(NoopEncoder),
            window: Box::new(NoopWindowShell),
        }
    }
}
