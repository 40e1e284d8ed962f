//! Integration test utilities for softplayer
//!
//! This module provides common utilities for integration testing including:
//! - YUV4MPEG2 stream generation, in memory and on disk
//! - A presenter that records what it was shown
//! - Frame interval measurement

use anyhow::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Test fixture for integration tests
pub struct TestFixture {
    pub temp_dir: TempDir,
    pub media_files: MediaFiles,
}

/// Collection of generated test streams
pub struct MediaFiles {
    /// 64x48, 25 fps, 12 frames
    pub small_25fps: PathBuf,

    /// 100x50 at 100 fps followed by a 40x30 sequence at 50 fps
    pub size_change: PathBuf,

    /// Two good frames, then garbage
    pub corrupt: PathBuf,
}

impl TestFixture {
    /// Create a new test fixture with generated media files
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let media_files = MediaFiles::generate(&temp_dir)?;

        Ok(Self { temp_dir, media_files })
    }

    /// Get the path to the temporary directory
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}

impl MediaFiles {
    fn generate(dir: &TempDir) -> Result<Self> {
        let small_25fps = dir.path().join("small_25fps.y4m");
        std::fs::write(&small_25fps, y4m::stream(64, 48, "25:1", 12))?;

        let size_change = dir.path().join("size_change.y4m");
        let mut data = y4m::stream(100, 50, "100:1", 3);
        data.extend(y4m::stream(40, 30, "50:1", 3));
        std::fs::write(&size_change, data)?;

        let corrupt = dir.path().join("corrupt.y4m");
        let mut data = y4m::stream(16, 16, "100:1", 2);
        data.extend_from_slice(b"NOTAFRAME\n");
        std::fs::write(&corrupt, data)?;

        Ok(Self {
            small_25fps,
            size_change,
            corrupt,
        })
    }
}

/// YUV4MPEG2 stream generation
pub mod y4m {
    /// A 4:2:0 stream whose picture `i` has luma `16 + i % 200`
    pub fn stream(width: u32, height: u32, rate: &str, frames: usize) -> Vec<u8> {
        let mut out = format!("YUV4MPEG2 W{} H{} F{} Ip A1:1 C420jpeg\n", width, height, rate).into_bytes();
        for index in 0..frames {
            push_picture(&mut out, width, height, (16 + index % 200) as u8);
        }
        out
    }

    /// Append one 4:2:0 picture of uniform luma
    pub fn push_picture(out: &mut Vec<u8>, width: u32, height: u32, luma: u8) {
        let chroma = ((width + 1) / 2 * ((height + 1) / 2)) as usize;
        out.extend_from_slice(b"FRAME\n");
        out.extend(std::iter::repeat(luma).take((width * height) as usize));
        out.extend(std::iter::repeat(128u8).take(chroma * 2));
    }

    /// Byte offset of the start of picture `index` in a stream from `stream`
    pub fn picture_offset(width: u32, height: u32, rate: &str, index: usize) -> u64 {
        let header = format!("YUV4MPEG2 W{} H{} F{} Ip A1:1 C420jpeg\n", width, height, rate).len();
        let chroma = ((width + 1) / 2 * ((height + 1) / 2)) as usize;
        let picture = b"FRAME\n".len() + (width * height) as usize + chroma * 2;
        (header + picture * index) as u64
    }
}

/// Presenter that records every call
pub mod recording {
    use parking_lot::Mutex;
    use softplayer::buffer::Frame;
    use softplayer::player::Presenter;
    use std::sync::Arc;
    use std::time::Instant;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Shown {
        pub sequence_index: u64,
        pub geometry: (u32, u32, u32, u32),
        /// RGBA of the top-left pixel
        pub first_pixel: [u8; 4],
    }

    #[derive(Default)]
    struct Log {
        shown: Vec<(Shown, Instant)>,
        sizes: Vec<(u32, u32, u32, u32)>,
    }

    /// Cloneable handle; hand one clone to the controller and keep the other
    #[derive(Clone, Default)]
    pub struct RecordingPresenter {
        log: Arc<Mutex<Log>>,
    }

    impl RecordingPresenter {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn shown(&self) -> Vec<Shown> {
            self.log.lock().shown.iter().map(|(shown, _)| shown.clone()).collect()
        }

        pub fn indices(&self) -> Vec<u64> {
            self.log.lock().shown.iter().map(|(shown, _)| shown.sequence_index).collect()
        }

        pub fn count(&self) -> usize {
            self.log.lock().shown.len()
        }

        pub fn times(&self) -> Vec<Instant> {
            self.log.lock().shown.iter().map(|(_, at)| *at).collect()
        }

        pub fn sizes(&self) -> Vec<(u32, u32, u32, u32)> {
            self.log.lock().sizes.clone()
        }
    }

    impl Presenter for RecordingPresenter {
        fn on_frame_ready(&mut self, frame: &Frame) {
            let shown = Shown {
                sequence_index: frame.sequence_index,
                geometry: frame.geometry(),
                first_pixel: frame.pixel(0, 0),
            };
            self.log.lock().shown.push((shown, Instant::now()));
        }

        fn on_size_changed(&mut self, width: u32, height: u32, coded_width: u32, coded_height: u32) {
            self.log.lock().sizes.push((width, height, coded_width, coded_height));
        }
    }
}

/// Frame interval measurement
pub mod perf_test {
    use std::time::{Duration, Instant};

    pub struct IntervalStats {
        intervals: Vec<Duration>,
    }

    impl IntervalStats {
        /// Gaps between consecutive presentation times
        pub fn from_times(times: &[Instant]) -> Self {
            Self {
                intervals: times.windows(2).map(|w| w[1].duration_since(w[0])).collect(),
            }
        }

        pub fn average(&self) -> Duration {
            if self.intervals.is_empty() {
                return Duration::ZERO;
            }

            let sum: Duration = self.intervals.iter().sum();
            sum / self.intervals.len() as u32
        }

        pub fn min(&self) -> Option<Duration> {
            self.intervals.iter().min().copied()
        }

        pub fn max(&self) -> Option<Duration> {
            self.intervals.iter().max().copied()
        }

        pub fn report(&self, name: &str) {
            println!("Frame intervals: {}", name);
            println!("  Samples: {}", self.intervals.len());
            println!("  Average: {:?}", self.average());
            println!("  Min: {:?}", self.min().unwrap_or(Duration::ZERO));
            println!("  Max: {:?}", self.max().unwrap_or(Duration::ZERO));
        }
    }
}
