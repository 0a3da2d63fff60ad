//! Control-channel payload types.
//!
//! Plain copyable structs; messages carry owned values, never shared state.

use serde::{Deserialize, Serialize};

/// The full input snapshot the controller feeds the program for one frame.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputState {
    /// Key codes currently held down.
    pub keys: Vec<u32>,
    /// Pointer position in window coordinates.
    pub pointer_x: i32,
    pub pointer_y: i32,
    /// Bitmask of pressed pointer buttons.
    pub pointer_buttons: u32,
}

impl InputState {
    /// An input snapshot with nothing pressed.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when no key or button is held.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.pointer_buttons == 0
    }
}

/// One-shot metadata about the controlled program, sent at the first frame
/// boundary after it becomes known.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramInfo {
    /// Window title of the controlled program.
    pub title: String,
    /// Rendering backend the program was detected to use.
    pub video_backend: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        let input = InputState::empty();
        assert!(input.is_empty());

        let input = InputState {
            keys: vec![0x41],
            ..InputState::empty()
        };
        assert!(!input.is_empty());
    }
}
