//! Compression block buffer (C3): an in-memory accumulator of uncompressed
//! bytes whose nominal disk address, while it sits in memory, is the
//! current `file_limit` maintained by C2 (see `index::DataCoordinate`).

use std::io::{self, Write};

use flate2::write::DeflateEncoder;
use flate2::Compression;

pub struct BlockBuffer {
    capacity: u32,
    buf: Vec<u8>,
}

impl BlockBuffer {
    pub fn new(capacity: u32) -> Self {
        BlockBuffer {
            capacity,
            buf: Vec::new(),
        }
    }

    /// Rehydrates a buffer from a master node's trailing compression-block
    /// region: `contents` is already truncated to the valid
    /// `compression_block_len` prefix.
    pub fn with_contents(capacity: u32, contents: Vec<u8>) -> Self {
        BlockBuffer {
            capacity,
            buf: contents,
        }
    }

    pub fn len(&self) -> u32 {
        self.buf.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Right-padded to exactly `compression_block_size` bytes — the shape
    /// stored in a master node's trailing region.
    pub fn padded(&self, compression_block_size: u32) -> Vec<u8> {
        let mut padded = vec![0u8; compression_block_size as usize];
        padded[..self.buf.len()].copy_from_slice(&self.buf);
        padded
    }

    fn is_full(&self) -> bool {
        self.buf.len() as u32 >= self.capacity
    }

    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// If the buffer has reached its nominal capacity, compresses the
    /// entire buffer as one deflate stream, clears it, and returns the
    /// compressed bytes for C2 to page out. Returns `None` if still under
    /// capacity (the caller keeps accumulating).
    pub fn flush_if_full(&mut self) -> io::Result<Option<Vec<u8>>> {
        if !self.is_full() {
            return Ok(None);
        }
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&self.buf)?;
        let compressed = encoder.finish()?;
        self.buf.clear();
        Ok(Some(compressed))
    }
}
