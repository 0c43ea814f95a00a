//! Page I/O (C2): reads and writes the backing file at byte offsets and
//! enforces page alignment on bulk appends.
//!
//! Two distinct offsets are tracked. `disk_len` is how many bytes of the
//! data region are actually present in the backing file, always a
//! multiple of `page_size`. `file_limit` (= `disk_len + tail.len()`) is
//! the exact cumulative number of bytes ever handed to `append`, i.e. the
//! nominal stream position that `DataCoordinate`s are stamped against —
//! it must advance by precisely a block's compressed length on every
//! flush, not merely by whatever happened to land on a full page. The
//! trailing, not-yet-page-complete bytes (always `< page_size`) live only
//! in `tail` until a later `append` rounds out a full page; a reader
//! asking for stream bytes at or past `disk_len` is served from `tail`,
//! never from the file.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

pub struct PageIo {
    file: File,
    page_size: u32,
    disk_len: u64,
    tail: Vec<u8>,
}

impl PageIo {
    /// `file_limit` is the exact stream position (as stored in a master
    /// node); `tail` is the trailing `file_limit % page_size` bytes not
    /// yet physically on disk.
    pub fn new(file: File, page_size: u32, file_limit: u64, tail: Vec<u8>) -> Self {
        debug_assert!(tail.len() < page_size as usize);
        PageIo {
            file,
            page_size,
            disk_len: file_limit - tail.len() as u64,
            tail,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// The exact cumulative stream length — `disk_len + tail.len()`. This
    /// is the value stamped into `DataCoordinate`s and persisted as a
    /// master node's `file_limit`.
    pub fn file_limit(&self) -> u64 {
        self.disk_len + self.tail.len() as u64
    }

    pub fn tail(&self) -> &[u8] {
        &self.tail
    }

    /// The current tail, right-padded with zeros to exactly `page_size`
    /// bytes — the shape stored in a master node's partial-page region.
    pub fn tail_padded(&self) -> Vec<u8> {
        let mut padded = vec![0u8; self.page_size as usize];
        padded[..self.tail.len()].copy_from_slice(&self.tail);
        padded
    }

    pub fn read_exact_at(&mut self, offset: u64, n: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads every stream byte from `offset` to the current `file_limit`
    /// — enough for a deflate decoder to find its own stream terminator
    /// without the caller needing to know the compressed length in
    /// advance. The portion of that range at or past `disk_len` has never
    /// been written to the file, so it is spliced in from `tail` rather
    /// than read back from disk.
    pub fn read_to_file_limit(&mut self, offset: u64) -> io::Result<Vec<u8>> {
        debug_assert!(offset <= self.file_limit());
        let mut out = if offset < self.disk_len {
            let n = (self.disk_len - offset) as usize;
            self.read_exact_at(offset, n)?
        } else {
            Vec::new()
        };
        let tail_start = offset.saturating_sub(self.disk_len) as usize;
        out.extend_from_slice(&self.tail[tail_start..]);
        Ok(out)
    }

    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)
    }

    /// Appends already-compressed bytes to the stream. `file_limit`
    /// advances by exactly `bytes.len()`, regardless of page alignment:
    /// whatever now completes full pages is written to disk at
    /// `disk_len`, and the remainder (always `< page_size`) becomes the
    /// new tail.
    pub fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        let page_size = self.page_size as usize;
        let mut combined = std::mem::take(&mut self.tail);
        combined.extend_from_slice(bytes);
        let complete_len = (combined.len() / page_size) * page_size;
        if complete_len > 0 {
            self.write_at(self.disk_len, &combined[..complete_len])?;
            self.disk_len += complete_len as u64;
        }
        self.tail = combined[complete_len..].to_vec();
        Ok(())
    }

    /// Rewrites the tail's natural on-disk page, overwriting whatever
    /// torn bytes a previously interrupted commit may have left there.
    /// Used during recovery, after the current master slot is selected.
    pub fn rewrite_tail_page(&mut self) -> io::Result<()> {
        let page_start = self.disk_len;
        self.write_at(page_start, &self.tail_padded())
    }

    /// Replaces the in-memory view (disk_len + tail) after a `refresh`
    /// picks up a newer committed master, without reopening the file.
    /// `file_limit` is the exact stream position from the picked master;
    /// `tail` is its trailing `file_limit % page_size` bytes.
    pub fn reset_view(&mut self, file_limit: u64, tail: Vec<u8>) {
        debug_assert!(tail.len() < self.page_size as usize);
        self.disk_len = file_limit - tail.len() as u64;
        self.tail = tail;
    }

    pub fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }
}
