//! Planar YUV to RGBA conversion (BT.601)

use super::{ChromaFormat, SequenceHeader};
use crate::buffer::BYTES_PER_PIXEL;

/// Decoded planes at the coded (macroblock-aligned) size
///
/// Rows are `stride` bytes apart; only the visible area is ever written.
#[derive(Debug, Clone)]
pub struct YuvPicture {
    pub chroma: ChromaFormat,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
    pub y_stride: usize,
    pub c_stride: usize,
}

impl YuvPicture {
    /// Allocate planes for the coded size of `header`
    pub fn for_header(header: &SequenceHeader) -> Self {
        let y_stride = header.coded_width as usize;
        let (c_width, c_height) = header.chroma.chroma_size(header.coded_width, header.coded_height);
        let c_stride = c_width as usize;
        let c_len = c_stride * c_height as usize;

        Self {
            chroma: header.chroma,
            y: vec![0; y_stride * header.coded_height as usize],
            u: vec![128; c_len],
            v: vec![128; c_len],
            y_stride,
            c_stride,
        }
    }

    /// Whether these planes can hold pictures described by `header`
    pub fn fits(&self, header: &SequenceHeader) -> bool {
        self.chroma == header.chroma
            && self.y_stride == header.coded_width as usize
            && self.y.len() == self.y_stride * header.coded_height as usize
    }

    fn chroma_index(&self, x: usize, y: usize) -> Option<usize> {
        match self.chroma {
            ChromaFormat::Yuv420 => Some((y / 2) * self.c_stride + x / 2),
            ChromaFormat::Yuv422 => Some(y * self.c_stride + x / 2),
            ChromaFormat::Yuv444 => Some(y * self.c_stride + x),
            ChromaFormat::Mono => None,
        }
    }
}

#[inline]
fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

#[inline]
fn studio_range(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = 298 * (y as i32 - 16);
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    [
        clamp((c + 409 * e + 128) >> 8),
        clamp((c - 100 * d - 208 * e + 128) >> 8),
        clamp((c + 516 * d + 128) >> 8),
    ]
}

#[inline]
fn full_range(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as i32;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    [
        clamp(y + ((359 * e + 128) >> 8)),
        clamp(y - ((88 * d + 183 * e + 128) >> 8)),
        clamp(y + ((454 * d + 128) >> 8)),
    ]
}

/// Convert the visible `width` x `height` area of `picture` into RGBA8
///
/// `out` must hold at least `width * height * 4` bytes.
pub fn yuv_to_rgba(picture: &YuvPicture, width: u32, height: u32, full: bool, out: &mut [u8]) {
    let width = width as usize;
    let height = height as usize;
    let convert = if full { full_range } else { studio_range };

    for (row, line) in out.chunks_exact_mut(width * BYTES_PER_PIXEL).take(height).enumerate() {
        let luma = &picture.y[row * picture.y_stride..row * picture.y_stride + width];

        for (col, (px, &y)) in line.chunks_exact_mut(BYTES_PER_PIXEL).zip(luma).enumerate() {
            let (u, v) = match picture.chroma_index(col, row) {
                Some(idx) => (picture.u[idx], picture.v[idx]),
                None => (128, 128),
            };
            let [r, g, b] = convert(y, u, v);
            px.copy_from_slice(&[r, g, b, 255]);
        }
    }
}
