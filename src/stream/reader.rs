//! Offset-tracking reader over a chunked byte source

use super::ByteStreamSource;
use crate::utils::error::{DecodeCause, PlayerError, Result};
use std::io;
use std::thread;

/// Consecutive empty chunks tolerated before the source counts as stalled
const MAX_EMPTY_READS: u32 = 10_000;

/// Buffered, forward-only reader that knows its absolute stream offset
///
/// Decoders use it to turn chunked input into lines and exact-size reads,
/// and to attach byte offsets to decode errors.
pub struct StreamReader {
    source: Box<dyn ByteStreamSource>,
    buffer: Vec<u8>,
    position: usize,
    /// Offset of `buffer[0]` in the stream
    base_offset: u64,
    eof: bool,
}

impl StreamReader {
    pub fn new(source: Box<dyn ByteStreamSource>) -> Self {
        Self {
            source,
            buffer: Vec::new(),
            position: 0,
            base_offset: 0,
            eof: false,
        }
    }

    /// Absolute offset of the next unread byte
    pub fn offset(&self) -> u64 {
        self.base_offset + self.position as u64
    }

    fn available(&self) -> usize {
        self.buffer.len() - self.position
    }

    /// Pull one more chunk from the source; false at end of stream
    fn fill(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }

        // compact consumed bytes before growing
        if self.position > 0 {
            self.base_offset += self.position as u64;
            self.buffer.drain(..self.position);
            self.position = 0;
        }

        let mut empty_reads = 0;
        loop {
            match self.source.read()? {
                Some(chunk) if chunk.is_empty() => {
                    empty_reads += 1;
                    if empty_reads >= MAX_EMPTY_READS {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("byte source returned {} empty chunks in a row", empty_reads),
                        )
                        .into());
                    }
                    thread::yield_now();
                }
                Some(chunk) => {
                    self.buffer.extend_from_slice(&chunk);
                    return Ok(true);
                }
                None => {
                    self.eof = true;
                    return Ok(false);
                }
            }
        }
    }

    /// Ensure at least `n` unread bytes are buffered; false if the stream ends first
    fn ensure(&mut self, n: usize) -> Result<bool> {
        while self.available() < n {
            if !self.fill()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// True once every byte has been consumed
    pub fn at_eof(&mut self) -> Result<bool> {
        Ok(!self.ensure(1)?)
    }

    /// Whether the unread bytes begin with `prefix`
    ///
    /// Returns false if the stream ends before `prefix.len()` bytes.
    pub fn starts_with(&mut self, prefix: &[u8]) -> Result<bool> {
        if !self.ensure(prefix.len())? {
            return Ok(false);
        }
        Ok(self.buffer[self.position..].starts_with(prefix))
    }

    /// Peek up to `max` unread bytes without consuming them
    pub fn peek(&mut self, max: usize) -> Result<&[u8]> {
        self.ensure(max)?;
        let end = (self.position + max).min(self.buffer.len());
        Ok(&self.buffer[self.position..end])
    }

    /// Read a `\n`-terminated line (terminator not included)
    ///
    /// Fails with `HeaderTooLong` if no terminator shows up within
    /// `max_len` bytes and with `UnexpectedEof` if the stream ends first.
    pub fn read_line(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let start = self.offset();
        let mut scanned = 0;

        loop {
            let unread = &self.buffer[self.position..];
            if let Some(idx) = unread[scanned..].iter().position(|&b| b == b'\n') {
                let end = scanned + idx;
                if end > max_len {
                    return Err(PlayerError::decode(start, DecodeCause::HeaderTooLong(max_len)));
                }
                let line = unread[..end].to_vec();
                self.position += end + 1;
                return Ok(line);
            }

            scanned = unread.len();
            if scanned > max_len {
                return Err(PlayerError::decode(start, DecodeCause::HeaderTooLong(max_len)));
            }

            if !self.fill()? {
                return Err(PlayerError::decode(self.offset() + self.available() as u64, DecodeCause::UnexpectedEof));
            }
        }
    }

    /// Fill `out` completely from the stream
    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        let mut written = 0;
        while written < out.len() {
            if self.available() == 0 && !self.fill()? {
                return Err(PlayerError::decode(self.offset(), DecodeCause::UnexpectedEof));
            }
            let n = self.available().min(out.len() - written);
            out[written..written + n].copy_from_slice(&self.buffer[self.position..self.position + n]);
            self.position += n;
            written += n;
        }
        Ok(())
    }
}
