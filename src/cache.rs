//! Decompression cache (C4): a single-slot cache of the most recently
//! decompressed compression block, keyed by the block's file position.

use std::io::{self, Read};

use flate2::read::DeflateDecoder;

use crate::page_io::PageIo;

pub struct BlockCache {
    key: Option<u64>,
    block: Vec<u8>,
    /// Compressed bytes consumed decoding this block — lets the reader
    /// compute where the next block begins without a stored length.
    compressed_len: u64,
}

impl BlockCache {
    pub fn new() -> Self {
        BlockCache {
            key: None,
            block: Vec::new(),
            compressed_len: 0,
        }
    }

    pub fn invalidate(&mut self) {
        self.key = None;
    }

    /// Returns the decompressed bytes of the block at `block_file_pos`
    /// and the number of compressed bytes it occupied in the stream,
    /// fetching and decompressing on a cache miss. Blocks are
    /// self-delimited by the deflate stream terminator, so reading "to
    /// the next block boundary" just means feeding the decoder everything
    /// up to `file_limit` (spliced from disk and the in-memory tail as
    /// needed) and trusting it to stop at its own end.
    pub fn fetch(&mut self, page_io: &mut PageIo, block_file_pos: u64) -> io::Result<(&[u8], u64)> {
        if self.key != Some(block_file_pos) {
            let compressed = page_io.read_to_file_limit(block_file_pos)?;
            let mut decoder = DeflateDecoder::new(&compressed[..]);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            self.compressed_len = decoder.total_in();
            self.block = out;
            self.key = Some(block_file_pos);
        }
        Ok((&self.block, self.compressed_len))
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new()
    }
}
