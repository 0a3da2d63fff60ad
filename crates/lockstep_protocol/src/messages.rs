//! Control-channel message vocabulary.
//!
//! Tagged values, copied not shared. `ControllerMessage` flows from the
//! controller process into the controlled program; `ProgramMessage` flows
//! the other way. The frame boundary defines the exchange order: the
//! program reports, ends with `StartFrameBoundary`, then services
//! controller messages until `EndFrameBoundary`.

use lockstep_core::{InputState, ProgramInfo, SharedConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Messages sent by the controller to the controlled program.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ControllerMessage {
    /// Overwrite the program's shared configuration verbatim.
    Config(SharedConfig),
    /// The full input state for the upcoming frame.
    AllInputs(InputState),
    /// A preview input state to overlay on a redraw, without committing it.
    PreviewInputs(InputState),
    /// Redraw the current screen content.
    Expose,
    /// Output file and encoder options for an AV dump.
    DumpFile { path: String, options: String },
    /// Stop an in-progress AV dump.
    StopEncode,
    /// Directory the next snapshots are saved under.
    SnapshotPath(String),
    /// Slot index the next snapshots are saved into.
    SnapshotIndex(u32),
    /// Capture a snapshot of the whole process now.
    SaveSnapshot,
    /// Restore the process from the current snapshot slot.
    LoadSnapshot,
    /// Show a message on the program's on-screen display.
    OsdMessage(String),
    /// The controller's turn is over; resume the program until the next
    /// frame boundary.
    EndFrameBoundary,
    /// The user asked the program to quit.
    UserQuit,
}

/// Messages sent by the controlled program to the controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ProgramMessage {
    /// An alert string to surface to the user.
    Alert(String),
    /// Current frame count and virtual time.
    FrameCountTime { frame: u64, ticks: Duration },
    /// One-shot program metadata.
    ProgramInfo(ProgramInfo),
    /// Displayed and logical frames per second.
    Fps { fps: f32, lfps: f32 },
    /// Ask the controller to perform a backtrack snapshot.
    DoBacktrackSnapshot,
    /// A snapshot restore completed and execution resumed from it.
    LoadingSucceeded,
    /// Terminal marker of the program's report; the controller's turn
    /// starts here.
    StartFrameBoundary,
}
