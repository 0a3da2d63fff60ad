//! Lockstep Control-Channel Protocol
//!
//! The message vocabulary and framing shared by the controlled program and
//! the controller process. The channel is message-oriented, in-order,
//! reliable, and bidirectional; both sides block on reads, which is what
//! turns free-running execution into controller-driven stepping.
//!
//! # Example
//!
//! ```rust
//! use lockstep_protocol::{ControlChannel, ControllerMessage, ProgramMessage};
//!
//! let (mut program, mut controller) = ControlChannel::pair().unwrap();
//!
//! program.send(&ProgramMessage::StartFrameBoundary).unwrap();
//! assert_eq!(
//!     controller.recv::<ProgramMessage>().unwrap(),
//!     ProgramMessage::StartFrameBoundary
//! );
//!
//! controller.send(&ControllerMessage::EndFrameBoundary).unwrap();
//! assert_eq!(
//!     program.recv::<ControllerMessage>().unwrap(),
//!     ControllerMessage::EndFrameBoundary
//! );
//! ```

pub mod channel;
pub mod error;
pub mod messages;

pub use channel::ControlChannel;
pub use error::{ProtocolError, Result};
pub use messages::{ControllerMessage, ProgramMessage};
