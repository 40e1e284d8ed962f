//! Frame pacing
//!
//! Presentation is paced by the stream's picture rate: after a frame has been
//! handed to the presenter the next one is held back for one frame interval.

use crate::decoder::PictureRate;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Frame interval shared between the decode and present threads
///
/// Written when a sequence header arrives, read before every presentation.
#[derive(Debug)]
pub struct FrameInterval {
    nanos: AtomicU64,
}

impl FrameInterval {
    pub fn new(interval: Duration) -> Self {
        Self {
            nanos: AtomicU64::new(interval.as_nanos() as u64),
        }
    }

    /// Interval for `fps` frames per second
    pub fn from_fps(fps: f64) -> Self {
        Self::new(fps_interval(fps))
    }

    pub fn get(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }

    pub fn set(&self, interval: Duration) {
        self.nanos.store(interval.as_nanos() as u64, Ordering::Release);
    }

    /// Switch to `rate`, or to `fallback_fps` when the stream did not say
    pub fn update(&self, rate: PictureRate, fallback_fps: f64) -> Duration {
        let interval = rate.frame_delay().unwrap_or_else(|| fps_interval(fallback_fps));
        self.set(interval);
        interval
    }
}

fn fps_interval(fps: f64) -> Duration {
    Duration::from_secs_f64(1.0 / fps)
}

/// Tracks when the last frame was presented
#[derive(Debug, Default)]
pub struct FramePacer {
    /// Last presented frame time
    last_present_time: Option<Instant>,

    frames_paced: u64,
}

impl FramePacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long to hold the next frame back, if at all
    pub fn wait_time(&self, interval: Duration) -> Option<Duration> {
        let last = self.last_present_time?;
        let due = last + interval;
        let now = Instant::now();
        (due > now).then(|| due - now)
    }

    /// Record that a frame was presented just now
    pub fn presented(&mut self) {
        self.last_present_time = Some(Instant::now());
        self.frames_paced += 1;
    }

    pub fn frames_paced(&self) -> u64 {
        self.frames_paced
    }
}
