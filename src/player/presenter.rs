//! Presenter interface
//!
//! A presenter is whatever puts frames on screen. The controller calls it from
//! the present thread only, one frame at a time in decode order.

use crate::buffer::Frame;

/// Receiver of decoded frames
pub trait Presenter: Send {
    /// Show `frame`
    ///
    /// The frame is borrowed for this call only. Its pixel memory goes back to
    /// the decoder once the next frame replaces it, so a presenter that keeps
    /// pixels around has to copy them. Must not block longer than one frame
    /// interval.
    fn on_frame_ready(&mut self, frame: &Frame);

    /// Geometry is known for the first time, or changed
    fn on_size_changed(&mut self, width: u32, height: u32, coded_width: u32, coded_height: u32);
}

/// Presenter that throws every frame away
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn on_frame_ready(&mut self, _frame: &Frame) {}

    fn on_size_changed(&mut self, _width: u32, _height: u32, _coded_width: u32, _coded_height: u32) {}
}

/// Detects geometry changes between consecutive frames
#[derive(Debug, Default, Clone)]
pub struct SizeTracker {
    current: Option<(u32, u32, u32, u32)>,
}

impl SizeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the geometry of `frame`; returns it if it differs from the last one
    pub fn update(&mut self, frame: &Frame) -> Option<(u32, u32, u32, u32)> {
        let geometry = frame.geometry();
        if self.current == Some(geometry) {
            return None;
        }
        self.current = Some(geometry);
        Some(geometry)
    }
}
