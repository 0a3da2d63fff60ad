//! Frame boundary controller.
//!
//! Once per rendered frame the controlled program calls
//! [`FrameBoundary::on_frame_boundary`] from its present path. The call
//! advances virtual time, reports frame state to the controller, and then
//! blocks servicing controller messages until the controller ends the
//! frame. That blocking read is the whole stepping mechanism: the program
//! cannot run ahead of the controller by construction.

use crate::context::Runtime;
use crate::traits::Collaborators;
use lockstep_core::{InputState, SharedConfig};
use lockstep_protocol::{ControlChannel, ControllerMessage, ProgramMessage, ProtocolError, Result};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Samples kept in the fps rolling window.
const FPS_HISTORY: usize = 10;

/// Per-frame bookkeeping of the controlled program.
#[derive(Debug)]
pub struct FrameState {
    /// Frames elapsed since the start of the run. Increments by exactly
    /// one per boundary call, drawn or not.
    pub frame_count: u64,
    /// Frames that presented nothing.
    pub nondraw_frame_count: u64,
    /// Whether the current frame's draw is being suppressed.
    pub skipping_draw: bool,
    /// Displayed frames per wall-clock second.
    pub fps: f32,
    /// Displayed frames per virtual second.
    pub lfps: f32,
    /// At least one snapshot has been captured this run. Gates backtrack
    /// snapshots so an early rewind request never forces a full capture
    /// of a program that was never snapshotted.
    pub took_snapshot: bool,
    /// The controller asked the program to quit.
    pub is_exiting: bool,
    skip_counter: u32,
}

impl FrameState {
    fn new(initial_frame: u64) -> Self {
        Self {
            frame_count: initial_frame,
            nondraw_frame_count: 0,
            skipping_draw: false,
            fps: 0.0,
            lfps: 0.0,
            took_snapshot: false,
            is_exiting: false,
            skip_counter: 0,
        }
    }
}

/// Decide whether the next frame's draw should be suppressed.
fn should_skip_draw(state: &mut FrameState, config: &SharedConfig) -> bool {
    if !config.fast_forward {
        return false;
    }
    // Never skip while single-stepping: the user is looking at exactly
    // this frame.
    if !config.running {
        return false;
    }
    // Never skip a draw while encoding.
    if config.av_dumping {
        return false;
    }
    if config.fast_forward_skip_rendering {
        return true;
    }

    let mut skip_freq = 1u32;
    if state.fps > 1.0 {
        // Bands of equal skip frequency: the next power of two of fps/8,
        // so roughly eight effective frames per second stay visible.
        skip_freq = ((((state.fps - 1.0) as u32) + 1).next_power_of_two() / 8).max(1);
    }
    // At least skip 3 frames out of 4.
    if skip_freq < 4 {
        skip_freq = 4;
    }

    state.skip_counter += 1;
    if state.skip_counter >= skip_freq {
        state.skip_counter = 0;
        return false;
    }
    true
}

/// Rolling-window fps estimator.
///
/// Keeps the last `FPS_HISTORY` (frame, wall time, virtual time) samples
/// and reports both wall-clock fps and logical fps once the window has
/// filled. The sampling interval adapts while fast-forwarding so the
/// report stays responsive at high frame rates.
#[derive(Debug)]
pub struct FpsCounter {
    frames: [u64; FPS_HISTORY],
    times: [Option<Instant>; FPS_HISTORY],
    ticks: [Duration; FPS_HISTORY],
    refresh_freq: u32,
    refresh_counter: u32,
    index: usize,
    filled: bool,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self {
            frames: [0; FPS_HISTORY],
            times: [None; FPS_HISTORY],
            ticks: [Duration::ZERO; FPS_HISTORY],
            refresh_freq: 15,
            refresh_counter: 0,
            index: 0,
            filled: false,
        }
    }

    /// Feed one drawn frame; returns a fresh (fps, lfps) pair when the
    /// window produced one.
    pub fn sample(&mut self, frame: u64, ticks: Duration, fast_forward: bool) -> Option<(f32, f32)> {
        if !fast_forward {
            self.refresh_freq = 10;
        }

        self.refresh_counter += 1;
        if self.refresh_counter < self.refresh_freq {
            return None;
        }
        self.refresh_counter = 0;

        let now = Instant::now();
        let prev_frame = self.frames[self.index];
        let prev_time = self.times[self.index];
        let prev_ticks = self.ticks[self.index];
        self.frames[self.index] = frame;
        self.times[self.index] = Some(now);
        self.ticks[self.index] = ticks;

        self.index += 1;
        if self.index >= FPS_HISTORY {
            self.index = 0;
            self.filled = true;
        }
        if !self.filled {
            return None;
        }

        let delta_frames = frame.saturating_sub(prev_frame) as f32;
        let delta_time = prev_time.map(|t| now.duration_since(t))?;
        let delta_ticks = ticks.saturating_sub(prev_ticks);
        if delta_time.is_zero() || delta_ticks.is_zero() {
            return None;
        }

        let fps = delta_frames / delta_time.as_secs_f32();
        let lfps = delta_frames / delta_ticks.as_secs_f32();

        if fast_forward {
            self.refresh_freq = ((fps / 4.0) as u32).max(1);
        }
        Some((fps, lfps))
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// What the caller should do after a frame boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFlow {
    /// Keep running until the next boundary.
    Continue,
    /// The controller asked the program to quit; a close-window event was
    /// delivered through the window shell.
    Exiting,
}

/// The per-frame synchronization point.
pub struct FrameBoundary<S> {
    runtime: Runtime,
    channel: ControlChannel<S>,
    collab: Collaborators,
    state: FrameState,
    fps_counter: FpsCounter,
    inputs: InputState,
    encoder_active: bool,
}

impl<S: Read + Write> FrameBoundary<S> {
    /// Build the controller for one run.
    pub fn new(runtime: Runtime, channel: ControlChannel<S>, collab: Collaborators) -> Self {
        let config = runtime.config_snapshot();
        let mut state = FrameState::new(config.initial_frame);
        // The very first frame honors the skip policy too, so a run that
        // starts in skip-all-rendering mode never draws at all.
        state.skipping_draw = should_skip_draw(&mut state, &config);

        Self {
            runtime,
            channel,
            collab,
            state,
            fps_counter: FpsCounter::new(),
            inputs: InputState::empty(),
            encoder_active: false,
        }
    }

    /// Frame bookkeeping, for display layers.
    pub fn state(&self) -> &FrameState {
        &self.state
    }

    /// The inputs committed by the controller for the current frame.
    pub fn inputs(&self) -> &InputState {
        &self.inputs
    }

    /// The runtime this controller drives.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// The once-per-frame synchronization point.
    ///
    /// `draw` tells whether the program has content to present this frame;
    /// `draw_fn` performs the actual present and runs unless draw skipping
    /// suppressed it.
    ///
    /// A closed channel means the controller exited; it is reported as an
    /// error so the caller can shut the program down instead of spinning.
    pub fn on_frame_boundary<F>(&mut self, draw: bool, mut draw_fn: F) -> Result<FrameFlow>
    where
        F: FnMut(),
    {
        self.runtime.registry().set_main_thread();

        self.state.frame_count += 1;

        let config = self.runtime.config_snapshot();
        if draw {
            if let Some((fps, lfps)) = self.fps_counter.sample(
                self.state.frame_count,
                self.runtime.timer().ticks(),
                config.fast_forward,
            ) {
                self.state.fps = fps;
                self.state.lfps = lfps;
            }
        }

        self.runtime.timer().enter_frame_boundary(&config);

        // Report to the controller, terminated by the start marker.
        for alert in self.runtime.drain_alerts() {
            self.channel.send(&ProgramMessage::Alert(alert))?;
        }
        self.send_frame_report()?;
        if let Some(info) = self.runtime.take_program_info() {
            self.channel.send(&ProgramMessage::ProgramInfo(info))?;
        }
        self.channel.send(&ProgramMessage::Fps {
            fps: self.state.fps,
            lfps: self.state.lfps,
        })?;
        if self.runtime.take_backtrack_request()
            && config.backtrack_snapshot
            && self.state.took_snapshot
        {
            self.channel.send(&ProgramMessage::DoBacktrackSnapshot)?;
        }
        self.channel.send(&ProgramMessage::StartFrameBoundary)?;

        if !draw {
            self.state.nondraw_frame_count += 1;
        }

        // Save the pixels about to be presented so the frame can be
        // redrawn identically while paused.
        if !self.state.skipping_draw && draw && config.save_screen {
            self.collab.screen.store();
        }

        if config.av_dumping {
            if !self.encoder_active {
                tracing::debug!("starting AV dump");
                self.encoder_active = true;
            }
            self.collab.encoder.encode_frame(draw);
        } else if self.encoder_active {
            tracing::debug!("stopping AV dump");
            self.collab.encoder.finish();
            self.encoder_active = false;
        }

        if !self.state.skipping_draw {
            draw_fn();
        }

        // The controller's turn.
        let flow = self.receive_messages(&mut draw_fn)?;

        // Presenting may have dirtied the screen; put the clean frame
        // back so the next frame composes on the right base.
        let config = self.runtime.config_snapshot();
        if !self.state.skipping_draw && draw && config.save_screen {
            self.collab.screen.restore();
        }

        self.state.skipping_draw = should_skip_draw(&mut self.state, &config);

        self.runtime.timer().exit_frame_boundary();
        Ok(flow)
    }

    fn send_frame_report(&mut self) -> Result<()> {
        self.channel.send(&ProgramMessage::FrameCountTime {
            frame: self.state.frame_count,
            ticks: self.runtime.timer().ticks(),
        })
    }

    /// Service controller messages until the frame is ended.
    fn receive_messages(&mut self, draw_fn: &mut dyn FnMut()) -> Result<FrameFlow> {
        let mut preview = InputState::empty();
        let mut flow = FrameFlow::Continue;

        loop {
            let message = match self.channel.recv::<ControllerMessage>() {
                Ok(message) => message,
                Err(ProtocolError::Codec(err)) => {
                    // The protocol is controller-trusted: an unknown tag is
                    // a caller bug, logged and treated as end of frame.
                    tracing::error!(error = %err, "unknown control message");
                    return Ok(flow);
                }
                Err(err) => return Err(err),
            };

            match message {
                ControllerMessage::Config(config) => {
                    self.runtime.overwrite_config(config);
                }
                ControllerMessage::AllInputs(inputs) => {
                    self.inputs = inputs;
                }
                ControllerMessage::PreviewInputs(inputs) => {
                    preview = inputs;
                    self.screen_redraw(draw_fn, &preview);
                }
                ControllerMessage::Expose => {
                    self.screen_redraw(draw_fn, &preview);
                }
                ControllerMessage::DumpFile { path, options } => {
                    tracing::debug!(%path, "received dump filename");
                    self.collab.encoder.set_output(path, options);
                }
                ControllerMessage::StopEncode => {
                    if self.encoder_active {
                        tracing::debug!("stopping AV dump");
                        self.collab.encoder.finish();
                        self.encoder_active = false;
                    }
                    self.runtime.set_av_dumping(false);
                }
                ControllerMessage::SnapshotPath(path) => {
                    self.collab.checkpoint.set_path(path);
                }
                ControllerMessage::SnapshotIndex(slot) => {
                    self.collab.checkpoint.set_slot(slot);
                }
                ControllerMessage::SaveSnapshot => {
                    self.handle_save_snapshot()?;
                }
                ControllerMessage::LoadSnapshot => {
                    self.collab.checkpoint.restore();
                    // Restoring succeeded only if execution never comes
                    // back here; reaching this line means it failed. The
                    // controller pulls a frame report in either case.
                    self.send_frame_report()?;
                }
                ControllerMessage::OsdMessage(text) => {
                    tracing::debug!(%text, "on-screen message");
                    self.screen_redraw(draw_fn, &preview);
                }
                ControllerMessage::UserQuit => {
                    self.collab.window.push_quit_event();
                    self.state.is_exiting = true;
                    flow = FrameFlow::Exiting;
                }
                ControllerMessage::EndFrameBoundary => return Ok(flow),
            }
        }
    }

    /// Capture a snapshot, or resynchronize if this return is actually the
    /// resumption of an earlier restore.
    fn handle_save_snapshot(&mut self) -> Result<()> {
        // A capture must never observe a thread that has an identity but
        // no registry entry yet.
        self.runtime.sync().wait_until_registered();

        self.collab.checkpoint.capture();
        self.state.took_snapshot = true;

        if self.collab.checkpoint.in_restore_flight() {
            // Execution resumed from a restored snapshot: the program and
            // the controller no longer agree on anything; resync before
            // continuing.
            tracing::debug!("resumed from a restored snapshot");
            self.channel.send(&ProgramMessage::LoadingSucceeded)?;

            match self.channel.recv::<ControllerMessage>()? {
                ControllerMessage::Config(config) => self.runtime.overwrite_config(config),
                other => {
                    // Desynchronization upstream; all this layer can do is
                    // say so, loudly.
                    tracing::error!(message = ?other, "expected a config resync after restore");
                }
            }

            self.send_frame_report()?;
            self.collab.screen.restore();
        }
        Ok(())
    }

    fn screen_redraw(&mut self, draw_fn: &mut dyn FnMut(), preview: &InputState) {
        let config = self.runtime.config_snapshot();
        if !self.state.skipping_draw && config.save_screen {
            self.collab.screen.restore();
            if !preview.is_empty() {
                tracing::debug!(keys = preview.keys.len(), "redrawing with preview inputs");
            }
            draw_fn();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_draw_off_outside_fast_forward() {
        let mut state = FrameState::new(0);
        let config = SharedConfig::default();
        for _ in 0..20 {
            assert!(!should_skip_draw(&mut state, &config));
        }
    }

    #[test]
    fn test_skip_draw_always_in_rendering_skip_mode() {
        let mut state = FrameState::new(0);
        let config = SharedConfig {
            fast_forward: true,
            fast_forward_skip_rendering: true,
            ..SharedConfig::default()
        };
        for _ in 0..20 {
            assert!(should_skip_draw(&mut state, &config));
        }
    }

    #[test]
    fn test_skip_draw_never_while_single_stepping_or_encoding() {
        let mut state = FrameState::new(0);
        let stepping = SharedConfig {
            fast_forward: true,
            running: false,
            ..SharedConfig::default()
        };
        assert!(!should_skip_draw(&mut state, &stepping));

        let encoding = SharedConfig {
            fast_forward: true,
            av_dumping: true,
            ..SharedConfig::default()
        };
        assert!(!should_skip_draw(&mut state, &encoding));
    }

    #[test]
    fn test_skip_draw_floor_three_of_four() {
        let mut state = FrameState::new(0);
        state.fps = 10.0; // would give a skip frequency below the floor
        let config = SharedConfig {
            fast_forward: true,
            ..SharedConfig::default()
        };

        let mut drawn = 0;
        for _ in 0..40 {
            if !should_skip_draw(&mut state, &config) {
                drawn += 1;
            }
        }
        assert_eq!(drawn, 10);
    }

    #[test]
    fn test_skip_draw_bands_follow_fps() {
        let mut state = FrameState::new(0);
        state.fps = 60.0;
        let config = SharedConfig {
            fast_forward: true,
            ..SharedConfig::default()
        };

        // next_power_of_two(60) / 8 = 8: one draw in eight.
        let mut drawn = 0;
        for _ in 0..80 {
            if !should_skip_draw(&mut state, &config) {
                drawn += 1;
            }
        }
        assert_eq!(drawn, 10);
    }

    #[test]
    fn test_fps_counter_needs_full_window() {
        let mut counter = FpsCounter::new();
        let mut reported = None;
        // 10 samples spaced refresh_freq frames apart have to elapse
        // before anything is reported.
        for frame in 0..2000u64 {
            if let Some(pair) = counter.sample(
                frame,
                Duration::from_nanos(16_666_666) * frame as u32,
                false,
            ) {
                reported = Some((frame, pair));
                break;
            }
        }
        let (frame, (_fps, lfps)) = reported.expect("window fills eventually");
        assert!(frame > 100);
        // Logical fps tracks the virtual frame length exactly.
        assert!((lfps - 60.0).abs() < 1.0);
    }
}
