//! Bounded frame queue with a pixel buffer pool
//!
//! All state shared between the decode thread and the presenter lives behind
//! one mutex. Each blocking point has its own condition variable and also
//! wakes up every `poll_interval` to re-check the cancellation flag.

use super::{Frame, BYTES_PER_PIXEL};
use crate::utils::error::{PlayerError, Result};
use log::{debug, trace};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Result of a `FrameBuffer::pop`
#[derive(Debug)]
pub enum Pop {
    /// The next frame in decode order
    Frame(Frame),

    /// Nothing arrived before the timeout
    Timeout,

    /// The producer closed the buffer and every frame has been taken
    EndOfStream,
}

impl Pop {
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            Pop::Frame(frame) => Some(frame),
            _ => None,
        }
    }
}

/// Snapshot of buffer occupancy and pool usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    /// Maximum number of queued frames
    pub capacity: usize,

    /// Maximum number of pixel buffers per generation
    pub pool_limit: usize,

    /// Frames currently queued
    pub occupancy: usize,

    /// Highest occupancy ever observed
    pub max_occupancy: usize,

    /// Pixel buffers of the current generation in circulation
    pub allocated: usize,

    /// Highest `allocated` ever observed
    pub max_allocated: usize,

    /// Released buffers waiting to be reused
    pub pooled: usize,

    /// Pixel buffers still alive, whatever their generation
    pub outstanding: usize,

    /// Total frames pushed
    pub frames_pushed: u64,

    /// Total frames popped
    pub frames_popped: u64,

    /// Write buffers served from the pool instead of fresh allocations
    pub buffers_reused: u64,
}

struct Inner {
    queue: VecDeque<Frame>,
    pool: Vec<Vec<u8>>,
    allocated: usize,
    generation: u64,
    paused: bool,
    cancelled: bool,
    closed: bool,
    stats: BufferStats,
}

struct Shared {
    inner: Mutex<Inner>,
    frame_ready: Condvar,
    slot_free: Condvar,
    buffer_returned: Condvar,
    /// Pause, resume and cancellation
    control: Condvar,
    /// Lent `PixelBuffer`s not yet dropped; survives `reset`
    outstanding: AtomicUsize,
    capacity: usize,
    pool_limit: usize,
    poll_interval: Duration,
}

impl Shared {
    /// Take pixel memory back from a dropped `PixelBuffer`
    fn recycle(&self, data: Vec<u8>, generation: u64) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        if generation == inner.generation {
            inner.pool.push(data);
            inner.stats.pooled = inner.pool.len();
            self.buffer_returned.notify_one();
        }
    }
}

/// Pixel memory lent out by a `FrameBuffer` pool
///
/// Dereferences to the raw RGBA bytes. Dropping it hands the memory back to
/// the pool it came from, unless that pool has since been reset or dropped.
pub struct PixelBuffer {
    data: Vec<u8>,
    home: Weak<Shared>,
    generation: u64,
}

impl PixelBuffer {
    /// A buffer that belongs to no pool
    pub fn detached(len: usize) -> Self {
        Self {
            data: vec![0; len],
            home: Weak::new(),
            generation: 0,
        }
    }
}

impl Deref for PixelBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PixelBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        if let Some(shared) = self.home.upgrade() {
            shared.recycle(std::mem::take(&mut self.data), self.generation);
        }
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("len", &self.data.len())
            .field("generation", &self.generation)
            .finish()
    }
}

/// Thread-safe bounded frame handoff with buffer reuse
///
/// Cloning yields another handle to the same buffer.
#[derive(Clone)]
pub struct FrameBuffer {
    shared: Arc<Shared>,
}

impl FrameBuffer {
    /// Create a buffer holding up to `capacity` frames and lending out at most
    /// `pool_limit` pixel buffers at a time
    pub fn new(capacity: usize, pool_limit: usize, poll_interval: Duration) -> Self {
        let capacity = capacity.max(1);
        let pool_limit = pool_limit.max(1);

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    queue: VecDeque::with_capacity(capacity),
                    pool: Vec::with_capacity(pool_limit),
                    allocated: 0,
                    generation: 0,
                    paused: false,
                    cancelled: false,
                    closed: false,
                    stats: BufferStats {
                        capacity,
                        pool_limit,
                        ..BufferStats::default()
                    },
                }),
                frame_ready: Condvar::new(),
                slot_free: Condvar::new(),
                buffer_returned: Condvar::new(),
                control: Condvar::new(),
                outstanding: AtomicUsize::new(0),
                capacity,
                pool_limit,
                poll_interval,
            }),
        }
    }

    /// Get a pixel buffer for a `width` x `height` picture
    ///
    /// Allocates while fewer than `pool_limit` buffers are out, otherwise
    /// blocks until the consumer releases one and reuses it.
    pub fn acquire_write_buffer(&self, width: u32, height: u32) -> Result<PixelBuffer> {
        let len = width as usize * height as usize * BYTES_PER_PIXEL;
        let mut inner = self.shared.inner.lock();

        loop {
            if inner.cancelled {
                return Err(PlayerError::Cancelled);
            }

            if let Some(mut data) = inner.pool.pop() {
                inner.stats.pooled = inner.pool.len();
                inner.stats.buffers_reused += 1;
                let generation = inner.generation;
                drop(inner);

                data.resize(len, 0);
                return Ok(self.lend(data, generation));
            }

            if inner.allocated < self.shared.pool_limit {
                inner.allocated += 1;
                inner.stats.allocated = inner.allocated;
                inner.stats.max_allocated = inner.stats.max_allocated.max(inner.allocated);
                let generation = inner.generation;
                let count = inner.allocated;
                drop(inner);

                debug!("Allocating pixel buffer {}/{} ({}x{})", count, self.shared.pool_limit, width, height);
                return Ok(self.lend(vec![0; len], generation));
            }

            trace!("Pixel buffer pool exhausted, waiting for a release");
            self.shared.buffer_returned.wait_for(&mut inner, self.shared.poll_interval);
        }
    }

    fn lend(&self, data: Vec<u8>, generation: u64) -> PixelBuffer {
        self.shared.outstanding.fetch_add(1, Ordering::SeqCst);
        PixelBuffer {
            data,
            home: Arc::downgrade(&self.shared),
            generation,
        }
    }

    /// Queue a frame, blocking while the buffer is full
    pub fn push(&self, frame: Frame) -> Result<()> {
        let mut inner = self.shared.inner.lock();

        loop {
            if inner.cancelled {
                // release the lock before the frame hands its pixels back
                drop(inner);
                drop(frame);
                return Err(PlayerError::Cancelled);
            }

            if inner.queue.len() < self.shared.capacity {
                break;
            }

            self.shared.slot_free.wait_for(&mut inner, self.shared.poll_interval);
        }

        trace!("Queued frame {}", frame.sequence_index);
        inner.queue.push_back(frame);
        inner.stats.frames_pushed += 1;
        inner.stats.occupancy = inner.queue.len();
        inner.stats.max_occupancy = inner.stats.max_occupancy.max(inner.queue.len());
        self.shared.frame_ready.notify_one();

        Ok(())
    }

    /// Take the oldest frame, waiting at most `timeout` for one to arrive
    pub fn pop(&self, timeout: Duration) -> Result<Pop> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.inner.lock();

        loop {
            if inner.cancelled {
                return Err(PlayerError::Cancelled);
            }

            if let Some(frame) = inner.queue.pop_front() {
                inner.stats.frames_popped += 1;
                inner.stats.occupancy = inner.queue.len();
                self.shared.slot_free.notify_one();
                return Ok(Pop::Frame(frame));
            }

            if inner.closed {
                return Ok(Pop::EndOfStream);
            }

            if Instant::now() >= deadline {
                return Ok(Pop::Timeout);
            }

            self.shared.frame_ready.wait_until(&mut inner, deadline);
        }
    }

    /// Mark the end of the stream; `pop` reports it once the queue drains
    pub fn close(&self) {
        let mut inner = self.shared.inner.lock();
        inner.closed = true;
        self.shared.frame_ready.notify_all();
    }

    /// Set or clear the pause flag observed by `wait_while_paused`
    pub fn set_paused(&self, paused: bool) {
        let mut inner = self.shared.inner.lock();
        inner.paused = paused;
        self.shared.control.notify_all();
    }

    /// Pause checkpoint: block without spinning until resumed or cancelled
    pub fn wait_while_paused(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();

        loop {
            if inner.cancelled {
                return Err(PlayerError::Cancelled);
            }

            if !inner.paused {
                return Ok(());
            }

            self.shared.control.wait_for(&mut inner, self.shared.poll_interval);
        }
    }

    /// Sleep for `duration` unless cancelled first
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        let mut inner = self.shared.inner.lock();

        loop {
            if inner.cancelled {
                return Err(PlayerError::Cancelled);
            }

            if Instant::now() >= deadline {
                return Ok(());
            }

            self.shared.control.wait_until(&mut inner, deadline);
        }
    }

    /// Interrupt every current and future blocking call
    pub fn cancel(&self) {
        let mut inner = self.shared.inner.lock();
        inner.cancelled = true;

        self.shared.frame_ready.notify_all();
        self.shared.slot_free.notify_all();
        self.shared.buffer_returned.notify_all();
        self.shared.control.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.inner.lock().cancelled
    }

    /// Drop queued frames, release pooled memory and clear all flags
    ///
    /// Buffers still held elsewhere belong to the old generation and free
    /// their memory instead of rejoining the pool. Returns the number of
    /// pooled bytes released.
    pub fn reset(&self) -> usize {
        let (stale, released) = {
            let mut inner = self.shared.inner.lock();
            let stale: Vec<Frame> = inner.queue.drain(..).collect();
            let released = inner.pool.iter().map(Vec::capacity).sum::<usize>();

            inner.pool = Vec::new();
            inner.generation += 1;
            inner.allocated = 0;
            inner.paused = false;
            inner.cancelled = false;
            inner.closed = false;
            inner.stats.occupancy = 0;
            inner.stats.allocated = 0;
            inner.stats.pooled = 0;

            (stale, released)
        };

        // stale frames are from the old generation and simply free their memory
        drop(stale);
        debug!("Frame buffer reset, released {} pooled bytes", released);
        released
    }

    pub fn stats(&self) -> BufferStats {
        let mut stats = self.shared.inner.lock().stats;
        stats.outstanding = self.outstanding();
        stats
    }

    /// Pixel buffers lent out and not yet dropped, across resets
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn pool_limit(&self) -> usize {
        self.shared.pool_limit
    }
}
