//! Decoded frame handoff between the decode thread and the presenter
//!
//! A `FrameBuffer` is a small bounded queue plus a capped pool of pixel
//! buffers. The decoder borrows write buffers from the pool, pushes finished
//! frames, and the presenter pops them. Dropping a frame returns its pixel
//! memory to the pool, so steady-state playback allocates nothing.

mod frame_buffer;

pub use frame_buffer::{BufferStats, FrameBuffer, PixelBuffer, Pop};

use std::fmt;

/// Bytes per pixel of the RGBA8 output format
pub const BYTES_PER_PIXEL: usize = 4;

/// One decoded picture
///
/// `pixels` holds `width * height` RGBA8 pixels with a row stride of
/// `width * 4`. The coded size is the decoder's macroblock-aligned size and
/// is never smaller than the visible size.
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub coded_width: u32,
    pub coded_height: u32,
    pub pixels: PixelBuffer,
    /// Position in decode order, strictly increasing per controller
    pub sequence_index: u64,
}

impl Frame {
    /// Length of one pixel row in bytes
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// RGBA bytes of row `y`
    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &self.pixels[start..start + stride]
    }

    /// RGBA value of the pixel at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let start = x as usize * BYTES_PER_PIXEL;
        let row = self.row(y);
        [row[start], row[start + 1], row[start + 2], row[start + 3]]
    }

    /// Geometry tuple as reported to presenters
    pub fn geometry(&self) -> (u32, u32, u32, u32) {
        (self.width, self.height, self.coded_width, self.coded_height)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence_index", &self.sequence_index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("coded_width", &self.coded_width)
            .field("coded_height", &self.coded_height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}
