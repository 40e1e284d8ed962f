//! Playback controller implementation for softplayer
//!
//! The `PlaybackController` orchestrates one playback session at a time. A
//! session runs on its own thread: it opens the stream, starts a present
//! thread that pops frames and paces them to the presenter, and drives the
//! decoder, which fills pool buffers and pushes them into the frame buffer.
//!
//! Stop and destroy cancel the frame buffer, which wakes every blocking wait
//! on both threads, and then join the session thread. Joins happen outside
//! the session lock so the error callback can call back in while another
//! thread is waiting for its session. A session always releases its pool
//! memory before it records its final state.

use crate::buffer::{BufferStats, Frame, FrameBuffer, PixelBuffer, Pop};
use crate::decoder::{self, FrameSink, SequenceHeader};
use crate::internal_error;
use crate::player::{
    Action, FrameInterval, FramePacer, LogTeardownWatcher, NullPresenter, PlaybackStats, PlayerEvent,
    PlayerEventHandler, PlayerState, Presenter, SizeTracker, StateMachine, TeardownReport, TeardownWatcher,
};
use crate::stream::StreamOpener;
use crate::utils::config::Config;
use crate::utils::error::{PlayerError, Result};

use log::{debug, error, info, trace, warn};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

type ErrorCallback = Box<dyn FnMut(PlayerError) + Send>;

/// Lifetime counters
#[derive(Debug, Default)]
struct Counters {
    sessions: AtomicU64,
    frames_decoded: AtomicU64,
    frames_presented: AtomicU64,
    errors: AtomicU64,
    /// Sequence index following the last presented frame
    next_index: AtomicU64,
}

/// Everything the controller shares with its session threads
struct Core {
    config: Config,
    opener: Box<dyn StreamOpener>,
    presenter: Mutex<Box<dyn Presenter>>,
    on_error: Mutex<Option<ErrorCallback>>,
    watcher: Box<dyn TeardownWatcher>,
    state: StateMachine,
    frames: FrameBuffer,
    interval: FrameInterval,
    sequence: Mutex<Option<SequenceHeader>>,
    counters: Counters,
    /// Sessions that may still touch the frame buffer
    active: Mutex<usize>,
    released: Condvar,
}

impl Core {
    fn session_released(&self) {
        let mut active = self.active.lock();
        *active = active.saturating_sub(1);
        self.released.notify_all();
    }

    fn is_active(&self) -> bool {
        *self.active.lock() > 0
    }

    /// Block until no session uses the frame buffer any more
    fn wait_released(&self) {
        let mut active = self.active.lock();
        while *active > 0 {
            self.released.wait(&mut active);
        }
    }
}

/// Builder for `PlaybackController`
pub struct PlaybackControllerBuilder {
    config: Config,
    opener: Option<Box<dyn StreamOpener>>,
    presenter: Box<dyn Presenter>,
    on_error: Option<ErrorCallback>,
    event_handlers: Vec<Box<dyn PlayerEventHandler>>,
    watcher: Box<dyn TeardownWatcher>,
}

impl PlaybackControllerBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            opener: None,
            presenter: Box::new(NullPresenter),
            on_error: None,
            event_handlers: Vec::new(),
            watcher: Box::new(LogTeardownWatcher),
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Where each session gets its encoded bytes from
    pub fn with_source(mut self, opener: impl StreamOpener + 'static) -> Self {
        self.opener = Some(Box::new(opener));
        self
    }

    pub fn with_presenter(mut self, presenter: impl Presenter + 'static) -> Self {
        self.presenter = Box::new(presenter);
        self
    }

    /// Called once for every playback that fails
    pub fn on_error(mut self, callback: impl FnMut(PlayerError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Add an event handler
    pub fn with_event_handler(mut self, handler: impl PlayerEventHandler + 'static) -> Self {
        self.event_handlers.push(Box::new(handler));
        self
    }

    pub fn with_teardown_watcher(mut self, watcher: impl TeardownWatcher + 'static) -> Self {
        self.watcher = Box::new(watcher);
        self
    }

    /// Build the controller
    pub fn build(self) -> Result<PlaybackController> {
        self.config.validate()?;
        let opener = self
            .opener
            .ok_or_else(|| PlayerError::Config("no stream source configured".to_string()))?;

        let playback = &self.config.playback;
        let frames = FrameBuffer::new(playback.buffer_capacity, playback.pool_size, playback.wait_timeout());
        let interval = FrameInterval::from_fps(playback.default_picture_rate);

        let state = StateMachine::new();
        for handler in self.event_handlers {
            state.add_handler(handler);
        }

        debug!(
            "Playback controller for {}: capacity {}, pool {}",
            opener.describe(),
            playback.buffer_capacity,
            playback.pool_size
        );

        Ok(PlaybackController {
            core: Arc::new(Core {
                opener,
                presenter: Mutex::new(self.presenter),
                on_error: Mutex::new(self.on_error),
                watcher: self.watcher,
                state,
                frames,
                interval,
                sequence: Mutex::new(None),
                counters: Counters::default(),
                active: Mutex::new(0),
                released: Condvar::new(),
                config: self.config,
            }),
            session: Mutex::new(None),
        })
    }
}

impl Default for PlaybackControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives decoding and presentation of one stream at a time
///
/// All methods take `&self`; the controller can be shared between threads.
/// Presenters and event handlers must not call back into the controller. The
/// error callback may.
pub struct PlaybackController {
    core: Arc<Core>,
    /// Session thread; the lock also serializes play, stop and destroy but is
    /// never held while joining
    session: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackController {
    pub fn builder() -> PlaybackControllerBuilder {
        PlaybackControllerBuilder::new()
    }

    /// Start playback
    ///
    /// Loads the stream from `Idle` or `Stopped`, resumes from `Paused`, and
    /// does nothing while already loading or playing.
    pub fn play(&self) -> Result<()> {
        loop {
            let mut session = self.session.lock();

            match self.core.state.current() {
                PlayerState::Paused => return self.resume(),
                PlayerState::Loading | PlayerState::Playing => return Ok(()),
                PlayerState::Destroyed => {
                    return Err(PlayerError::InvalidTransition {
                        from: PlayerState::Destroyed,
                        action: Action::Load.name(),
                    })
                }
                PlayerState::Idle | PlayerState::Stopped => {}
            }

            // a session that ended by itself is still waiting to be joined
            if let Some(handle) = session.take() {
                drop(session);
                join_session(handle);
                continue;
            }
            // one taken by a concurrent stop may not have let go of the frames yet
            if self.core.is_active() {
                drop(session);
                self.core.wait_released();
                continue;
            }

            return self.start_session(&mut session);
        }
    }

    fn start_session(&self, session: &mut Option<JoinHandle<()>>) -> Result<()> {
        self.core.frames.reset();
        *self.core.sequence.lock() = None;

        self.core.state.apply(Action::Load)?;
        let id = self.core.counters.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Starting session {} from {}", id, self.core.opener.describe());

        *self.core.active.lock() += 1;
        let core = Arc::clone(&self.core);
        let spawned = thread::Builder::new()
            .name(format!("softplayer-session-{}", id))
            .spawn(move || run_session(core));

        match spawned {
            Ok(handle) => {
                *session = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.core.session_released();
                let err = internal_error!("failed to spawn session thread: {}", e);
                error!("{}", err);
                let _ = self.core.state.apply(Action::Fail);
                Err(err)
            }
        }
    }

    /// Suspend decoding and presentation; the current frame stays up
    pub fn pause(&self) -> Result<()> {
        let frames = &self.core.frames;
        self.core.state.apply_with(Action::Pause, |_| frames.set_paused(true))?;
        Ok(())
    }

    /// Continue after `pause()` with the next undelivered frame
    pub fn resume(&self) -> Result<()> {
        let frames = &self.core.frames;
        self.core.state.apply_with(Action::Resume, |_| frames.set_paused(false))?;
        Ok(())
    }

    /// Stop playback and wait for the session to wind down
    ///
    /// Safe from any state and idempotent; never fails.
    pub fn stop(&self) -> Result<()> {
        let handle = {
            let mut session = self.session.lock();
            let frames = &self.core.frames;
            self.core.state.apply_with(Action::Stop, |_| frames.cancel())?;
            session.take()
        };

        if let Some(handle) = handle {
            join_session(handle);
        }
        self.core.wait_released();
        Ok(())
    }

    /// Tear the controller down for good
    ///
    /// Cancels and joins any running session, releases all pool memory and
    /// reports to the teardown watcher. Later calls do nothing.
    pub fn destroy(&self) {
        let handle = {
            let mut session = self.session.lock();
            let frames = &self.core.frames;
            let transition = match self.core.state.apply_with(Action::Destroy, |_| frames.cancel()) {
                Ok(transition) => transition,
                Err(e) => {
                    warn!("Destroy rejected: {}", e);
                    return;
                }
            };
            if !transition.changed() {
                return;
            }
            session.take()
        };

        let session_joined = match handle {
            Some(handle) => join_session(handle),
            None => true,
        };
        self.core.wait_released();

        // counted across generations, so buffers kept past a reset still show
        let outstanding_buffers = self.core.frames.outstanding();
        self.core.frames.reset();

        let report = TeardownReport {
            outstanding_buffers,
            session_joined,
            frames_presented: self.core.counters.frames_presented.load(Ordering::SeqCst),
        };
        self.core.watcher.teardown_complete(&report);
    }

    pub fn state(&self) -> PlayerState {
        self.core.state.current()
    }

    /// Block until the player is in `state` or `timeout` passes
    ///
    /// Returns whether the state was reached.
    pub fn wait_for_state(&self, state: PlayerState, timeout: Duration) -> bool {
        self.core.state.wait_for(timeout, |current| current == state) == state
    }

    /// Get playback statistics
    pub fn stats(&self) -> PlaybackStats {
        let counters = &self.core.counters;
        let sequence = *self.core.sequence.lock();

        PlaybackStats {
            state: self.core.state.current(),
            sessions: counters.sessions.load(Ordering::SeqCst),
            frames_decoded: counters.frames_decoded.load(Ordering::SeqCst),
            frames_presented: counters.frames_presented.load(Ordering::SeqCst),
            errors: counters.errors.load(Ordering::SeqCst),
            picture_rate: sequence.and_then(|header| header.picture_rate.as_f64()),
            geometry: sequence.map(|header| header.geometry()),
            buffer: self.core.frames.stats(),
        }
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.core.frames.stats()
    }

    pub fn config(&self) -> &Config {
        &self.core.config
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.destroy();
        if let Some(handle) = self.session.get_mut().take() {
            join_session(handle);
        }
    }
}

/// Join a session thread unless we are running on it
fn join_session(handle: JoinHandle<()>) -> bool {
    if handle.thread().id() == thread::current().id() {
        debug!("Not joining the session thread from itself");
        return false;
    }

    match handle.join() {
        Ok(()) => true,
        Err(_) => {
            error!("Session thread panicked outside its guard");
            true
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `f`, turning a panic into an internal error
fn guarded<T>(what: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(internal_error!("{} panicked: {}", what, panic_message(payload.as_ref()))),
    }
}

/// Body of the session thread
fn run_session(core: Arc<Core>) {
    let result = guarded("session", || play_session(&core));
    finish_session(&core, result);
}

/// Decode the stream while the present thread consumes it
fn play_session(core: &Arc<Core>) -> Result<()> {
    let present = {
        let core = Arc::clone(core);
        thread::Builder::new()
            .name("softplayer-present".to_string())
            .spawn(move || {
                let result = guarded("presenter", || present_frames(&core));
                if matches!(&result, Err(e) if !e.is_cancellation()) {
                    // unblock the decoder so the session can end
                    core.frames.cancel();
                }
                result
            })
            .map_err(|e| internal_error!("failed to spawn present thread: {}", e))?
    };

    let decoded = guarded("decoder", || decode_stream(core));
    match &decoded {
        Err(e) if e.is_cancellation() => core.frames.cancel(),
        // frames decoded before a failure are still shown
        _ => core.frames.close(),
    }

    let presented = match present.join() {
        Ok(result) => result,
        Err(payload) => Err(internal_error!("present thread panicked: {}", panic_message(payload.as_ref()))),
    };

    // report the failure that ended the session, not the cancellation it caused
    match (decoded, presented) {
        (Err(e), _) if !e.is_cancellation() => Err(e),
        (_, Err(e)) if !e.is_cancellation() => Err(e),
        (Err(e), _) | (_, Err(e)) => Err(e),
        (Ok(()), Ok(())) => Ok(()),
    }
}

/// Release the session's resources and record how it ended
fn finish_session(core: &Core, result: Result<()>) {
    let released = core.frames.reset();
    trace!("Session released {} bytes of pooled pixels", released);
    core.session_released();

    match result {
        Ok(()) => {
            if core.state.apply(Action::Finish).is_ok() {
                info!("End of stream");
                core.state.emit(PlayerEvent::EndOfStream);
            }
        }
        Err(e) if e.is_cancellation() => {
            debug!("Session cancelled");
        }
        Err(e) => {
            if core.state.apply(Action::Fail).is_err() {
                warn!("Ignoring error after playback was stopped: {}", e);
                return;
            }

            error!("Playback failed: {}", e);
            core.counters.errors.fetch_add(1, Ordering::SeqCst);
            core.state.emit(PlayerEvent::Error { message: e.to_string() });

            // taken out so the callback may call back into the controller
            let callback = core.on_error.lock().take();
            if let Some(mut callback) = callback {
                callback(e);
                let mut slot = core.on_error.lock();
                if slot.is_none() {
                    *slot = Some(callback);
                }
            }
        }
    }
}

/// Decoder side of a session
struct SessionSink<'a> {
    core: &'a Core,
    ready: bool,
}

impl FrameSink for SessionSink<'_> {
    fn sequence_started(&mut self, header: &SequenceHeader) -> Result<()> {
        let interval = self
            .core
            .interval
            .update(header.picture_rate, self.core.config.playback.default_picture_rate);
        debug!("Frame interval {:?}", interval);

        *self.core.sequence.lock() = Some(*header);
        self.core.state.emit(PlayerEvent::SequenceStarted { header: *header });

        if !self.ready {
            self.ready = true;
            if let Err(e) = self.core.state.apply(Action::Ready) {
                debug!("Not entering playback: {}", e);
            }
        }
        Ok(())
    }

    fn fetch_buffer(&mut self, width: u32, height: u32) -> Result<PixelBuffer> {
        self.core.frames.wait_while_paused()?;
        self.core.frames.acquire_write_buffer(width, height)
    }

    fn picture_decoded(&mut self, frame: Frame) -> Result<()> {
        self.core.counters.frames_decoded.fetch_add(1, Ordering::SeqCst);
        self.core.frames.push(frame)
    }

    fn sequence_ended(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Run the decoder over the stream, reopening it when looping
fn decode_stream(core: &Core) -> Result<()> {
    let mut sink = SessionSink { core, ready: false };
    // a restart picks up after the last frame shown, not the last decoded
    let mut first_index = core.counters.next_index.load(Ordering::SeqCst);

    loop {
        let source = core.opener.open()?;
        let mut decoder = decoder::open(source, &core.config.decoder, first_index);

        decoder.decode_sequence(&mut sink)?;

        if !core.config.playback.loop_playback || decoder.frames_decoded() == 0 {
            return Ok(());
        }
        first_index = decoder.next_index();
        debug!("Looping {} after {} frames", core.opener.describe(), decoder.frames_decoded());
    }
}

/// Present thread: pop, pace and hand frames to the presenter
fn present_frames(core: &Core) -> Result<()> {
    let frames = &core.frames;
    let timeout = core.config.playback.wait_timeout();
    let mut pacer = FramePacer::new();
    let mut sizes = SizeTracker::new();
    // the frame on screen; replacing it returns its buffer to the pool
    let mut current: Option<Frame> = None;

    loop {
        frames.wait_while_paused()?;

        let frame = match frames.pop(timeout)? {
            Pop::Frame(frame) => frame,
            Pop::Timeout => continue,
            Pop::EndOfStream => break,
        };

        if let Some(wait) = pacer.wait_time(core.interval.get()) {
            frames.sleep(wait)?;
        }
        // a pause during the pacing wait holds this frame back too
        frames.wait_while_paused()?;

        {
            let mut presenter = core.presenter.lock();
            if let Some((width, height, coded_width, coded_height)) = sizes.update(&frame) {
                debug!("Size changed: {}x{} (coded {}x{})", width, height, coded_width, coded_height);
                presenter.on_size_changed(width, height, coded_width, coded_height);
            }
            trace!("Presenting frame {}", frame.sequence_index);
            presenter.on_frame_ready(&frame);
        }

        pacer.presented();
        core.counters.frames_presented.fetch_add(1, Ordering::SeqCst);
        core.counters.next_index.store(frame.sequence_index + 1, Ordering::SeqCst);
        current = Some(frame);
    }

    debug!("Presented {} frames this session", pacer.frames_paced());
    drop(current);
    Ok(())
}
