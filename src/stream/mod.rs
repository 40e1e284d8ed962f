//! Encoded byte stream sources
//!
//! Stream acquisition (downloads, caches) lives outside this crate. The
//! pipeline only needs a forward-only supplier of byte chunks and a way to
//! open a fresh one for each playback session.

mod reader;

pub use reader::StreamReader;

use crate::utils::error::Result;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Sequential supplier of encoded bytes
pub trait ByteStreamSource: Send {
    /// Read the next chunk
    ///
    /// Returns `Ok(None)` at end of stream. Chunks may have any non-zero
    /// length; an empty chunk is treated as "nothing yet" and read again,
    /// up to a limit after which the stream fails as stalled.
    fn read(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// Opens a new byte stream for every load
pub trait StreamOpener: Send + Sync {
    fn open(&self) -> Result<Box<dyn ByteStreamSource>>;

    /// Human readable description for logs
    fn describe(&self) -> String {
        "stream".to_string()
    }
}

impl<F> StreamOpener for F
where
    F: Fn() -> Result<Box<dyn ByteStreamSource>> + Send + Sync,
{
    fn open(&self) -> Result<Box<dyn ByteStreamSource>> {
        self()
    }
}

/// Adapts any `Read` into fixed-size chunks
pub struct ReaderSource<R> {
    reader: R,
    chunk_size: usize,
}

impl<R: Read + Send> ReaderSource<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
        }
    }
}

impl<R: Read + Send> ByteStreamSource for ReaderSource<R> {
    fn read(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; self.chunk_size];
        loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    chunk.truncate(n);
                    return Ok(Some(chunk));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// In-memory stream delivered in chunks of a fixed size
pub struct MemorySource {
    data: Arc<[u8]>,
    position: usize,
    chunk_size: usize,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>, chunk_size: usize) -> Self {
        Self {
            data: data.into(),
            position: 0,
            chunk_size: chunk_size.max(1),
        }
    }
}

impl ByteStreamSource for MemorySource {
    fn read(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.position >= self.data.len() {
            return Ok(None);
        }

        let end = (self.position + self.chunk_size).min(self.data.len());
        let chunk = self.data[self.position..end].to_vec();
        self.position = end;
        Ok(Some(chunk))
    }
}

/// Opens a file from disk for every session
#[derive(Debug, Clone)]
pub struct FileOpener {
    path: PathBuf,
    chunk_size: usize,
}

impl FileOpener {
    pub fn new(path: impl AsRef<Path>, chunk_size: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            chunk_size,
        }
    }
}

impl StreamOpener for FileOpener {
    fn open(&self) -> Result<Box<dyn ByteStreamSource>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(ReaderSource::new(file, self.chunk_size)))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Replays a shared in-memory buffer for every session
#[derive(Debug, Clone)]
pub struct MemoryOpener {
    data: Arc<[u8]>,
    chunk_size: usize,
}

impl MemoryOpener {
    pub fn new(data: impl Into<Arc<[u8]>>, chunk_size: usize) -> Self {
        Self {
            data: data.into(),
            chunk_size,
        }
    }
}

impl StreamOpener for MemoryOpener {
    fn open(&self) -> Result<Box<dyn ByteStreamSource>> {
        Ok(Box::new(MemorySource::new(Arc::clone(&self.data), self.chunk_size)))
    }

    fn describe(&self) -> String {
        format!("memory ({} bytes)", self.data.len())
    }
}
