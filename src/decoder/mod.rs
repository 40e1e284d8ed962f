//! Decoder module for softplayer
//!
//! A decoder turns an encoded byte stream into a sequence of RGBA frames. It
//! runs on the session's decode thread and talks to the rest of the pipeline
//! only through a `FrameSink`: it reports sequence headers, asks the sink for
//! a write buffer before every picture, and hands finished frames back.

mod convert;
mod y4m;

pub use convert::{yuv_to_rgba, YuvPicture};
pub use y4m::Y4mDecoder;

use crate::buffer::{Frame, PixelBuffer};
use crate::stream::{ByteStreamSource, StreamReader};
use crate::utils::config::DecoderConfig;
use crate::utils::error::Result;
use serde::Serialize;
use std::time::Duration;

/// Receiver of decoder output
///
/// Every method may fail; the decoder propagates the error unchanged and
/// stops. That is how cancellation reaches a running decoder.
pub trait FrameSink {
    /// A stream header was parsed. Called before the first picture and again
    /// whenever a new header appears mid-stream.
    fn sequence_started(&mut self, header: &SequenceHeader) -> Result<()>;

    /// Provide a buffer for the next `width` x `height` picture
    ///
    /// Called once per picture before any of its data is read, which makes it
    /// the decoder's pause and cancellation checkpoint.
    fn fetch_buffer(&mut self, width: u32, height: u32) -> Result<PixelBuffer>;

    /// A picture is complete
    fn picture_decoded(&mut self, frame: Frame) -> Result<()>;

    /// The stream ended cleanly
    fn sequence_ended(&mut self) -> Result<()>;
}

/// Decoder trait defining the interface for video decoding
pub trait Decoder: Send {
    /// Decode the whole stream, reporting everything to `sink`
    ///
    /// Returns after `sequence_ended` on a clean end of stream, or with the
    /// first error from the stream, the bitstream or the sink.
    fn decode_sequence(&mut self, sink: &mut dyn FrameSink) -> Result<()>;

    /// Pictures decoded so far
    fn frames_decoded(&self) -> u64;

    /// Sequence index the next picture will get
    fn next_index(&self) -> u64;
}

/// Create the decoder for an encoded stream
///
/// Frames are numbered starting at `first_index`.
pub fn open(
    source: Box<dyn ByteStreamSource>,
    config: &DecoderConfig,
    first_index: u64,
) -> Box<dyn Decoder> {
    let reader = StreamReader::new(source);
    Box::new(Y4mDecoder::new(reader, config.clone()).starting_at(first_index))
}

/// Picture rate as a rational number of frames per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PictureRate {
    pub num: u32,
    pub den: u32,
}

impl PictureRate {
    pub const UNKNOWN: PictureRate = PictureRate { num: 0, den: 0 };

    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Whole frames per second
    pub fn fps(num: u32) -> Self {
        Self { num, den: 1 }
    }

    pub fn is_known(&self) -> bool {
        self.num != 0 && self.den != 0
    }

    /// Frames per second, if known
    pub fn as_f64(&self) -> Option<f64> {
        self.is_known().then(|| self.num as f64 / self.den as f64)
    }

    /// Time between two frames, if the rate is known
    pub fn frame_delay(&self) -> Option<Duration> {
        if !self.is_known() {
            return None;
        }
        Some(Duration::from_nanos(1_000_000_000 * self.den as u64 / self.num as u64))
    }
}

/// Chroma subsampling of the encoded planes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChromaFormat {
    Yuv420,
    Yuv422,
    Yuv444,
    Mono,
}

impl ChromaFormat {
    /// Size of one chroma plane for a `width` x `height` luma plane
    pub fn chroma_size(&self, width: u32, height: u32) -> (u32, u32) {
        match self {
            ChromaFormat::Yuv420 => ((width + 1) / 2, (height + 1) / 2),
            ChromaFormat::Yuv422 => ((width + 1) / 2, height),
            ChromaFormat::Yuv444 => (width, height),
            ChromaFormat::Mono => (0, 0),
        }
    }
}

/// Geometry and timing announced by a stream header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SequenceHeader {
    /// Visible size
    pub width: u32,
    pub height: u32,

    /// Macroblock-aligned size of the decoded planes
    pub coded_width: u32,
    pub coded_height: u32,

    pub picture_rate: PictureRate,
    pub chroma: ChromaFormat,

    /// Full-range (0-255) rather than studio-range samples
    pub full_range: bool,
}

/// Round a dimension up to the 16 pixel macroblock grid
pub fn coded_size(value: u32) -> u32 {
    (value + 15) & !15
}

impl SequenceHeader {
    pub fn new(width: u32, height: u32, picture_rate: PictureRate, chroma: ChromaFormat) -> Self {
        Self {
            width,
            height,
            coded_width: coded_size(width),
            coded_height: coded_size(height),
            picture_rate,
            chroma,
            full_range: false,
        }
    }

    /// Geometry tuple as reported to presenters
    pub fn geometry(&self) -> (u32, u32, u32, u32) {
        (self.width, self.height, self.coded_width, self.coded_height)
    }
}
