//! Playback control for softplayer
//!
//! This module ties the pipeline together: the `PlaybackController` owns the
//! state machine, the frame buffer and the threads of a playback session, and
//! forwards decoded frames to a `Presenter` at the stream's picture rate.

mod controller;
mod diagnostics;
mod pacing;
mod presenter;
mod state;

pub use controller::{PlaybackController, PlaybackControllerBuilder};
pub use diagnostics::{LogTeardownWatcher, TeardownReport, TeardownWatcher};
pub use pacing::{FrameInterval, FramePacer};
pub use presenter::{NullPresenter, Presenter, SizeTracker};
pub use state::{next_state, Action, PlayerState, StateMachine, Transition};

use crate::buffer::BufferStats;
use crate::decoder::SequenceHeader;
use serde::Serialize;

/// Player event for external event handling
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// The player moved between states
    StateChanged { from: PlayerState, to: PlayerState },

    /// A stream header was parsed; geometry or rate may have changed
    SequenceStarted { header: SequenceHeader },

    /// The last frame of the stream was presented
    EndOfStream,

    /// Playback failed; the error callback receives the typed error
    Error { message: String },
}

/// Player event handler trait
pub trait PlayerEventHandler: Send + Sync {
    /// Handle player event
    ///
    /// Called on whichever thread caused the event. Must not call back into
    /// the controller.
    fn handle_event(&mut self, event: PlayerEvent);
}

impl<F> PlayerEventHandler for F
where
    F: FnMut(PlayerEvent) + Send + Sync,
{
    fn handle_event(&mut self, event: PlayerEvent) {
        self(event)
    }
}

/// Playback statistics
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PlaybackStats {
    pub state: PlayerState,

    /// Sessions started by `play()`
    pub sessions: u64,

    /// Pictures decoded over the controller's lifetime
    pub frames_decoded: u64,

    /// Frames handed to the presenter
    pub frames_presented: u64,

    /// Failures reported through the error callback
    pub errors: u64,

    /// Current picture rate in frames per second, if the stream announced one
    pub picture_rate: Option<f64>,

    /// Visible and coded size of the current sequence
    pub geometry: Option<(u32, u32, u32, u32)>,

    pub buffer: BufferStats,
}
