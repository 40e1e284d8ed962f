//! Player state machine
//!
//! The state lives behind a single mutex. Every change goes through
//! `StateMachine::apply`, which validates it against the transition table and
//! then notifies event handlers once the lock is released.

use crate::player::{PlayerEvent, PlayerEventHandler};
use crate::utils::error::{PlayerError, Result};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Lifecycle state of a playback controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PlayerState {
    /// Nothing loaded yet
    Idle,

    /// Stream opened, waiting for the first sequence header
    Loading,

    /// Frames are being decoded and presented
    Playing,

    /// Decoding and presentation are suspended, the last frame stays up
    Paused,

    /// Playback ended, failed or was stopped; may be restarted
    Stopped,

    /// Torn down for good
    Destroyed,
}

impl PlayerState {
    /// Whether a session may be running in this state
    pub fn is_active(&self) -> bool {
        matches!(self, PlayerState::Loading | PlayerState::Playing | PlayerState::Paused)
    }
}

/// Something that moves the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Start a new session
    Load,
    /// The first sequence header arrived
    Ready,
    Pause,
    Resume,
    Stop,
    /// The stream ended after its last frame was presented
    Finish,
    /// The session failed with a stream or decode error
    Fail,
    Destroy,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Load,
        Action::Ready,
        Action::Pause,
        Action::Resume,
        Action::Stop,
        Action::Finish,
        Action::Fail,
        Action::Destroy,
    ];

    /// Verb used in error messages
    pub fn name(&self) -> &'static str {
        match self {
            Action::Load => "load",
            Action::Ready => "start playing",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::Stop => "stop",
            Action::Finish => "finish",
            Action::Fail => "fail",
            Action::Destroy => "destroy",
        }
    }
}

/// Look up `action` in the transition table
///
/// `Ok(Some(to))` is a state change, `Ok(None)` an accepted no-op.
pub fn next_state(from: PlayerState, action: Action) -> Result<Option<PlayerState>> {
    use PlayerState::*;

    let to = match (action, from) {
        (Action::Load, Idle | Stopped) => Some(Loading),
        (Action::Ready, Loading) => Some(Playing),
        (Action::Pause, Playing) => Some(Paused),
        (Action::Resume, Paused) => Some(Playing),
        (Action::Stop, Loading | Playing | Paused) => Some(Stopped),
        (Action::Stop, Idle | Stopped | Destroyed) => None,
        (Action::Finish, Playing | Paused) => Some(Stopped),
        (Action::Fail, Loading | Playing | Paused) => Some(Stopped),
        (Action::Destroy, Destroyed) => None,
        (Action::Destroy, _) => Some(Destroyed),
        _ => {
            return Err(PlayerError::InvalidTransition {
                from,
                action: action.name(),
            })
        }
    };

    Ok(to)
}

/// Result of a successful `StateMachine::apply`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Changed { from: PlayerState, to: PlayerState },
    Unchanged(PlayerState),
}

impl Transition {
    pub fn changed(&self) -> bool {
        matches!(self, Transition::Changed { .. })
    }

    /// State after the transition
    pub fn state(&self) -> PlayerState {
        match *self {
            Transition::Changed { to, .. } => to,
            Transition::Unchanged(state) => state,
        }
    }
}

/// Thread-safe owner of the player state and its event handlers
pub struct StateMachine {
    state: Mutex<PlayerState>,
    changed: Condvar,
    handlers: Mutex<Vec<Box<dyn PlayerEventHandler>>>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlayerState::Idle),
            changed: Condvar::new(),
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn current(&self) -> PlayerState {
        *self.state.lock()
    }

    /// Apply `action`, emitting `StateChanged` if the state moved
    pub fn apply(&self, action: Action) -> Result<Transition> {
        self.apply_with(action, |_| {})
    }

    /// Apply `action` and run `effect` with the new state while the state lock
    /// is still held
    ///
    /// `effect` only runs for actual changes. It must not call back into the
    /// state machine.
    pub fn apply_with<F>(&self, action: Action, effect: F) -> Result<Transition>
    where
        F: FnOnce(PlayerState),
    {
        let transition = {
            let mut state = self.state.lock();
            let from = *state;

            match next_state(from, action)? {
                Some(to) => {
                    *state = to;
                    effect(to);
                    self.changed.notify_all();
                    Transition::Changed { from, to }
                }
                None => Transition::Unchanged(from),
            }
        };

        if let Transition::Changed { from, to } = transition {
            info!("Player state: {:?} -> {:?} ({})", from, to, action.name());
            self.emit(PlayerEvent::StateChanged { from, to });
        } else {
            debug!("Ignoring {} while {:?}", action.name(), transition.state());
        }

        Ok(transition)
    }

    /// Block until `predicate` holds for the current state or `timeout` passes
    ///
    /// Returns the state last observed.
    pub fn wait_for<P>(&self, timeout: Duration, predicate: P) -> PlayerState
    where
        P: Fn(PlayerState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        while !predicate(*state) {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        *state
    }

    pub fn add_handler(&self, handler: Box<dyn PlayerEventHandler>) {
        self.handlers.lock().push(handler);
    }

    /// Deliver `event` to every handler
    ///
    /// Handlers run on the calling thread and must not call back into the
    /// controller that owns this state machine.
    pub fn emit(&self, event: PlayerEvent) {
        let mut handlers = self.handlers.lock();
        if handlers.is_empty() {
            return;
        }

        for handler in handlers.iter_mut() {
            handler.handle_event(event.clone());
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StateMachine {
    fn drop(&mut self) {
        let state = *self.state.get_mut();
        if state.is_active() {
            warn!("State machine dropped while {:?}", state);
        }
    }
}
