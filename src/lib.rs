//! softplayer - a software video decode and playback pipeline
//!
//! An encoded byte stream is decoded on a dedicated thread into RGBA frames,
//! handed through a bounded frame buffer with a capped pixel-buffer pool, and
//! presented at the stream's picture rate under the control of a playback
//! state machine.

pub mod buffer;
pub mod decoder;
pub mod player;
pub mod stream;
pub mod utils;

pub use buffer::{Frame, FrameBuffer, PixelBuffer, Pop};
pub use player::{PlaybackController, PlaybackControllerBuilder, PlayerEvent, PlayerState, Presenter};
pub use stream::{ByteStreamSource, FileOpener, MemoryOpener, StreamOpener};
pub use utils::{Config, PlayerError, Result};
