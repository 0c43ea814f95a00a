//! Transaction manager (C7) and the public `CaptureFile` handle:
//! `open`/`close`/`add_record`/`commit`/`record_at`/`record_count`/
//! `record_generator`/`get_metadata`/`set_metadata`/`refresh`.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::block_buffer::BlockBuffer;
use crate::cache::BlockCache;
use crate::codec::{read_u32_le, write_length_prefixed};
use crate::error::{CaptureError, Result};
use crate::index::{parse_full_node, serialize_full_node, ChildEntry, DataCoordinate, CHILD_ENTRY_LEN, RightmostPath};
use crate::lock::{self, WriterGuard};
use crate::master::{self, MasterNode};
use crate::page_io::PageIo;

const MAGIC: &[u8; 11] = b"MioCapture\0";
const VERSION: u32 = 2;
const FILE_HEADER_LEN: usize = 28;
const DEFAULT_PAGE_SIZE: u32 = 4096;
const DEFAULT_COMPRESSION_BLOCK_SIZE: u32 = 32768;
const DEFAULT_FAN_OUT: u32 = 32;
const INITIAL_PADDING_PAGES: u64 = 100;

/// The richer of the two constructor variants described by the open
/// question in the design notes — treated as authoritative. Builder
/// style: chain setters, then pass to `CaptureFile::open`.
#[derive(Clone, Debug)]
pub struct CaptureFileOptions {
    write: bool,
    initial_metadata: Option<Vec<u8>>,
    force_new_empty_file: bool,
    compression_block_size: u32,
    fan_out: u32,
    page_size: u32,
    use_os_file_locking: bool,
}

impl Default for CaptureFileOptions {
    fn default() -> Self {
        CaptureFileOptions {
            write: false,
            initial_metadata: None,
            force_new_empty_file: false,
            compression_block_size: DEFAULT_COMPRESSION_BLOCK_SIZE,
            fan_out: DEFAULT_FAN_OUT,
            page_size: DEFAULT_PAGE_SIZE,
            use_os_file_locking: false,
        }
    }
}

impl CaptureFileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn initial_metadata(mut self, metadata: Option<Vec<u8>>) -> Self {
        self.initial_metadata = metadata;
        self
    }

    pub fn force_new_empty_file(mut self, force: bool) -> Self {
        self.force_new_empty_file = force;
        self
    }

    pub fn compression_block_size(mut self, size: u32) -> Self {
        self.compression_block_size = size;
        self
    }

    pub fn fan_out(mut self, fan_out: u32) -> Self {
        self.fan_out = fan_out;
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn use_os_file_locking(mut self, use_locking: bool) -> Self {
        self.use_os_file_locking = use_locking;
        self
    }
}

/// An open capture file: either a single writer (which may also append
/// and commit), or a read-only snapshot that can be `refresh`ed to pick
/// up later commits.
pub struct CaptureFile {
    path: PathBuf,
    write_mode: bool,
    page_size: u32,
    compression_block_size: u32,
    fan_out: u32,
    page_io: PageIo,
    block_buffer: BlockBuffer,
    cache: BlockCache,
    path_index: RightmostPath,
    metadata_ptr: DataCoordinate,
    current_slot: usize,
    current_serial: u32,
    _writer_guard: Option<WriterGuard>,
}

fn master_slot_size(page_size: u32, compression_block_size: u32) -> u64 {
    2 * page_size as u64 + compression_block_size as u64
}

fn data_region_start(page_size: u32, compression_block_size: u32) -> u64 {
    2 * page_size as u64 + 2 * master_slot_size(page_size, compression_block_size)
}

fn write_file_header(page_size: u32, compression_block_size: u32, fan_out: u32) -> Vec<u8> {
    let mut buf = vec![0u8; page_size as usize];
    buf[0..11].copy_from_slice(MAGIC);
    buf[12..16].copy_from_slice(&VERSION.to_le_bytes());
    buf[16..20].copy_from_slice(&page_size.to_le_bytes());
    buf[20..24].copy_from_slice(&compression_block_size.to_le_bytes());
    buf[24..28].copy_from_slice(&fan_out.to_le_bytes());
    buf
}

fn parse_file_header(buf: &[u8]) -> Result<(u32, u32, u32)> {
    if buf.len() < FILE_HEADER_LEN || &buf[0..11] != MAGIC {
        return Err(CaptureError::InvalidCaptureFile("bad magic".into()));
    }
    let version = read_u32_le(buf, 12);
    if version != VERSION {
        return Err(CaptureError::InvalidCaptureFile(format!(
            "unsupported version {}",
            version
        )));
    }
    let page_size = read_u32_le(buf, 16);
    let compression_block_size = read_u32_le(buf, 20);
    let fan_out = read_u32_le(buf, 24);
    Ok((page_size, compression_block_size, fan_out))
}

/// Appends bytes to the compression stream and returns the coordinate of
/// their first byte, flushing a full compression block to disk as a
/// side effect when the threshold is crossed. Free function (rather than
/// a method) so it can be called with disjoint `&mut` borrows of the two
/// fields it needs, both before and after `CaptureFile` is assembled.
fn append_to_stream(
    page_io: &mut PageIo,
    block_buffer: &mut BlockBuffer,
    data: &[u8],
) -> std::io::Result<DataCoordinate> {
    let coordinate = DataCoordinate {
        block_file_pos: page_io.file_limit(),
        offset_in_block: block_buffer.len(),
    };
    block_buffer.append(data);
    if let Some(compressed) = block_buffer.flush_if_full()? {
        page_io.append(&compressed)?;
    }
    Ok(coordinate)
}

impl CaptureFile {
    /// Opens (or, per `options`, creates) a capture file at `path`.
    pub fn open(path: impl AsRef<Path>, options: &CaptureFileOptions) -> Result<CaptureFile> {
        let path = path.as_ref();
        let exists = path.metadata().map(|m| m.len() > 0).unwrap_or(false);
        if options.force_new_empty_file || !exists {
            if !options.write {
                return Err(CaptureError::NotOpenForWrite);
            }
            Self::create_new_file(path, options)
        } else {
            Self::open_existing_file(path, options)
        }
    }

    fn create_new_file(path: &Path, options: &CaptureFileOptions) -> Result<CaptureFile> {
        let page_size = options.page_size;
        let compression_block_size = options.compression_block_size;
        let fan_out = options.fan_out;

        let writer_guard = WriterGuard::acquire(path)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        if options.use_os_file_locking {
            lock::lock_exclusive(&file)?;
        }

        let data_start = data_region_start(page_size, compression_block_size);
        let initial_len = data_start.max(INITIAL_PADDING_PAGES * page_size as u64);
        file.set_len(initial_len)?;

        {
            let mut raw = file.try_clone()?;
            raw.seek(SeekFrom::Start(0))?;
            raw.write_all(&write_file_header(page_size, compression_block_size, fan_out))?;

            let zero_master = MasterNode::empty(fan_out, page_size, compression_block_size);
            let (p0, p1, blk) = zero_master.serialize(page_size, compression_block_size);
            let slot_size = master_slot_size(page_size, compression_block_size);
            for slot in 0..2u64 {
                raw.seek(SeekFrom::Start(page_size as u64 + slot * slot_size))?;
                raw.write_all(&p0)?;
                raw.write_all(&p1)?;
                raw.write_all(&blk)?;
            }
            raw.sync_all()?;
        }

        let mut page_io = PageIo::new(file, page_size, data_start, Vec::new());
        let mut block_buffer = BlockBuffer::new(compression_block_size);
        let path_index = RightmostPath::new(fan_out);
        let mut metadata_ptr = DataCoordinate::ZERO;

        if let Some(meta) = &options.initial_metadata {
            if meta.len() as u64 > u32::MAX as u64 {
                return Err(CaptureError::RecordTooLarge);
            }
            let mut payload = Vec::with_capacity(4 + meta.len());
            write_length_prefixed(&mut payload, meta);
            metadata_ptr = append_to_stream(&mut page_io, &mut block_buffer, &payload)?;
        }

        let mut handle = CaptureFile {
            path: path.to_path_buf(),
            write_mode: true,
            page_size,
            compression_block_size,
            fan_out,
            page_io,
            block_buffer,
            cache: BlockCache::new(),
            path_index,
            metadata_ptr,
            current_slot: 1,
            current_serial: 0,
            _writer_guard: Some(writer_guard),
        };
        handle.commit()?;
        tracing::info!(path = %path.display(), "created new capture file");
        Ok(handle)
    }

    fn open_existing_file(path: &Path, options: &CaptureFileOptions) -> Result<CaptureFile> {
        let write_mode = options.write;
        let writer_guard = if write_mode {
            Some(WriterGuard::acquire(path)?)
        } else {
            None
        };

        let mut open_opts = OpenOptions::new();
        open_opts.read(true);
        if write_mode {
            open_opts.write(true);
        }
        let file = open_opts.open(path)?;
        if options.use_os_file_locking {
            if write_mode {
                lock::lock_exclusive(&file)?;
            } else {
                lock::lock_shared(&file)?;
            }
        }

        let mut raw = file.try_clone()?;
        let mut header_buf = vec![0u8; FILE_HEADER_LEN];
        raw.seek(SeekFrom::Start(0))?;
        raw.read_exact(&mut header_buf)?;
        let (page_size, compression_block_size, fan_out) = parse_file_header(&header_buf)?;

        let slot_size = master_slot_size(page_size, compression_block_size);
        let slot0_off = page_size as u64;
        let slot1_off = slot0_off + slot_size;

        let mut read_slot = |off: u64| -> Result<Option<MasterNode>> {
            let mut p0 = vec![0u8; page_size as usize];
            let mut p1 = vec![0u8; page_size as usize];
            let mut blk = vec![0u8; compression_block_size as usize];
            raw.seek(SeekFrom::Start(off))?;
            raw.read_exact(&mut p0)?;
            raw.read_exact(&mut p1)?;
            raw.read_exact(&mut blk)?;
            Ok(MasterNode::parse(&p0, &p1, &blk, fan_out))
        };
        let slot0 = read_slot(slot0_off)?;
        let slot1 = read_slot(slot1_off)?;
        let both_valid = slot0.is_some() && slot1.is_some();
        let (current_slot, picked) = master::pick_current(slot0, slot1)
            .ok_or_else(|| CaptureError::InvalidCaptureFile("both master slots invalid".into()))?;

        let tail_len = (picked.file_limit % page_size as u64) as usize;
        let tail = picked.partial_page[..tail_len].to_vec();
        let mut page_io = PageIo::new(file, page_size, picked.file_limit, tail);

        if write_mode {
            page_io.rewrite_tail_page()?;
            if !both_valid {
                tracing::warn!(path = %path.display(), "recovered capture file: one master slot was corrupt");
            }
        }

        let block_buffer = BlockBuffer::with_contents(compression_block_size, picked.compression_block.clone());

        let handle = CaptureFile {
            path: path.to_path_buf(),
            write_mode,
            page_size,
            compression_block_size,
            fan_out,
            page_io,
            block_buffer,
            cache: BlockCache::new(),
            path_index: picked.rightmost_path,
            metadata_ptr: picked.metadata_ptr,
            current_slot,
            current_serial: picked.serial,
            _writer_guard: writer_guard,
        };
        tracing::info!(path = %path.display(), record_count = handle.record_count(), "opened capture file");
        Ok(handle)
    }

    /// Discards any uncommitted state and releases locks. Equivalent to
    /// dropping the handle; provided for symmetry with `open`.
    pub fn close(self) {
        tracing::info!(path = %self.path.display(), "closed capture file");
    }

    fn write_master_slot(&mut self, slot: usize, master: &MasterNode) -> Result<()> {
        let (p0, p1, blk) = master.serialize(self.page_size, self.compression_block_size);
        let slot_size = master_slot_size(self.page_size, self.compression_block_size);
        let base = self.page_size as u64 + slot as u64 * slot_size;
        self.page_io.write_at(base, &p0)?;
        self.page_io.write_at(base + self.page_size as u64, &p1)?;
        self.page_io
            .write_at(base + 2 * self.page_size as u64, &blk)?;
        Ok(())
    }

    /// Write-mode only. Appends a length-prefixed record to the
    /// compression stream and folds its coordinate into the rightmost
    /// path, cascading full-node emissions as needed.
    pub fn add_record(&mut self, data: &[u8]) -> Result<u64> {
        if !self.write_mode {
            return Err(CaptureError::NotOpenForWrite);
        }
        if data.len() as u64 > u32::MAX as u64 {
            return Err(CaptureError::RecordTooLarge);
        }
        let mut payload = Vec::with_capacity(4 + data.len());
        write_length_prefixed(&mut payload, data);

        let leaf_coordinate = append_to_stream(&mut self.page_io, &mut self.block_buffer, &payload)?;

        let page_io = &mut self.page_io;
        let block_buffer = &mut self.block_buffer;
        let mut emit = |entries: &[ChildEntry]| -> std::io::Result<DataCoordinate> {
            let node_bytes = serialize_full_node(entries);
            append_to_stream(page_io, block_buffer, &node_bytes)
        };
        self.path_index.insert(leaf_coordinate, &mut emit)?;

        let count = self.path_index.record_count();
        tracing::debug!(record_count = count, "appended record");
        Ok(count)
    }

    /// Write-mode only. Flushes the partial tail page into a new master
    /// node, writes it to the non-current slot, fsyncs, then flips the
    /// current-slot designation. All-or-nothing: if the process dies
    /// before the new slot's write completes, the previous commit is
    /// still current on the next open.
    pub fn commit(&mut self) -> Result<()> {
        if !self.write_mode {
            return Err(CaptureError::NotOpenForWrite);
        }
        let master = MasterNode {
            serial: self.current_serial.wrapping_add(1),
            file_limit: self.page_io.file_limit(),
            compression_block_len: self.block_buffer.len(),
            metadata_ptr: self.metadata_ptr,
            rightmost_path: self.path_index.clone(),
            partial_page: self.page_io.tail_padded(),
            compression_block: self.block_buffer.padded(self.compression_block_size),
        };
        let target_slot = 1 - self.current_slot;
        self.write_master_slot(target_slot, &master)?;
        self.page_io.sync()?;
        self.current_slot = target_slot;
        self.current_serial = master.serial;
        tracing::info!(
            path = %self.path.display(),
            serial = master.serial,
            record_count = self.path_index.record_count(),
            "committed capture file"
        );
        Ok(())
    }

    /// Up to date including uncommitted records while in write mode;
    /// otherwise reflects state at open/last `refresh`.
    pub fn record_count(&self) -> u64 {
        self.path_index.record_count()
    }

    /// 1-based. Fails with `OutOfRange` outside `[1, record_count()]`.
    pub fn record_at(&mut self, n: u64) -> Result<Vec<u8>> {
        let total = self.path_index.record_count();
        if n < 1 || n > total {
            return Err(CaptureError::OutOfRange);
        }
        let coordinate = self.locate(n - 1)?;
        self.read_record_at(coordinate)
    }

    /// Descends the rightmost path (and, through it, any fully persisted
    /// subtrees) to the leaf `DataCoordinate` for logical offset `k`
    /// (0-based).
    fn locate(&mut self, mut k: u64) -> Result<DataCoordinate> {
        enum Cursor {
            Rightmost(usize),
            Full(Vec<ChildEntry>),
        }

        let h_top = self.path_index.height();
        let mut height = h_top;
        let mut cursor = Cursor::Rightmost(h_top - 1);

        loop {
            let span = (self.fan_out as u64).pow((height - 1) as u32);
            let i = (k / span) as usize;
            k %= span;

            // Note: `height` here is the depth we track ourselves (one per
            // loop iteration), not the stored `ChildEntry::height` byte.
            // The stored byte names the *target* of the very edge that
            // created it, which only coincides with our depth counter at
            // the first step; relying on it to decide when to stop
            // descending would misidentify a persisted index node's own
            // coordinate as a leaf record after the first full subtree.
            let resolved = match &cursor {
                Cursor::Rightmost(idx) => {
                    let node = &self.path_index.nodes[*idx];
                    if i < node.children.len() {
                        Some(node.children[i].coordinate)
                    } else {
                        None
                    }
                }
                Cursor::Full(entries) => Some(entries[i].coordinate),
            };

            match resolved {
                Some(coordinate) if height == 1 => return Ok(coordinate),
                Some(coordinate) => {
                    let child_entries = self.read_full_node(coordinate)?;
                    height -= 1;
                    cursor = Cursor::Full(child_entries);
                }
                None => {
                    let idx = match cursor {
                        Cursor::Rightmost(idx) => idx,
                        Cursor::Full(_) => unreachable!(),
                    };
                    if idx == 0 {
                        return Err(CaptureError::InvalidCaptureFile(
                            "rightmost path exhausted before record was located".into(),
                        ));
                    }
                    height -= 1;
                    cursor = Cursor::Rightmost(idx - 1);
                }
            }
        }
    }

    fn read_full_node(&mut self, coordinate: DataCoordinate) -> Result<Vec<ChildEntry>> {
        let n = self.fan_out as usize * CHILD_ENTRY_LEN;
        let (bytes, _next) = self.read_stream(coordinate, n)?;
        Ok(parse_full_node(&bytes, self.fan_out))
    }

    fn read_record_at(&mut self, coordinate: DataCoordinate) -> Result<Vec<u8>> {
        let (len_bytes, next) = self.read_stream(coordinate, 4)?;
        let len = read_u32_le(&len_bytes, 0) as usize;
        let (payload, _next) = self.read_stream(next, len)?;
        Ok(payload)
    }

    /// Reads `need` bytes starting at `coordinate`, following the
    /// compression stream across block boundaries. The in-memory block
    /// (when `coordinate.block_file_pos == file_limit`) is served
    /// directly without decompression.
    fn read_stream(&mut self, mut coordinate: DataCoordinate, mut need: usize) -> Result<(Vec<u8>, DataCoordinate)> {
        let mut out = Vec::with_capacity(need);
        loop {
            let (block_len, compressed_len, take): (usize, u64, usize);
            if coordinate.block_file_pos == self.page_io.file_limit() {
                let block = self.block_buffer.bytes();
                block_len = block.len();
                let avail = block_len - coordinate.offset_in_block as usize;
                take = avail.min(need);
                out.extend_from_slice(
                    &block[coordinate.offset_in_block as usize..coordinate.offset_in_block as usize + take],
                );
                compressed_len = 0;
            } else {
                let (block, clen) = self.cache.fetch(&mut self.page_io, coordinate.block_file_pos)?;
                block_len = block.len();
                let avail = block_len - coordinate.offset_in_block as usize;
                take = avail.min(need);
                out.extend_from_slice(
                    &block[coordinate.offset_in_block as usize..coordinate.offset_in_block as usize + take],
                );
                compressed_len = clen;
            }

            need -= take;
            let new_offset = coordinate.offset_in_block + take as u32;
            if need == 0 {
                coordinate = DataCoordinate {
                    block_file_pos: coordinate.block_file_pos,
                    offset_in_block: new_offset,
                };
                break;
            }
            if coordinate.block_file_pos == self.page_io.file_limit() {
                return Err(CaptureError::InvalidCaptureFile(
                    "record or index node truncated at end of stream".into(),
                ));
            }
            coordinate = DataCoordinate {
                block_file_pos: coordinate.block_file_pos + compressed_len,
                offset_in_block: 0,
            };
        }
        Ok((out, coordinate))
    }

    pub fn get_metadata(&mut self) -> Result<Option<Vec<u8>>> {
        if self.metadata_ptr.is_none() {
            return Ok(None);
        }
        Ok(Some(self.read_record_at(self.metadata_ptr)?))
    }

    /// Write-mode only. `None` clears the metadata pointer; committing
    /// afterward makes the change durable.
    pub fn set_metadata(&mut self, data: Option<&[u8]>) -> Result<()> {
        if !self.write_mode {
            return Err(CaptureError::NotOpenForWrite);
        }
        match data {
            None => self.metadata_ptr = DataCoordinate::ZERO,
            Some(bytes) => {
                if bytes.len() as u64 > u32::MAX as u64 {
                    return Err(CaptureError::RecordTooLarge);
                }
                let mut payload = Vec::with_capacity(4 + bytes.len());
                write_length_prefixed(&mut payload, bytes);
                self.metadata_ptr = append_to_stream(&mut self.page_io, &mut self.block_buffer, &payload)?;
            }
        }
        Ok(())
    }

    /// Re-reads both master slots and, if a newer commit is current,
    /// rebuilds the in-memory rightmost path, file limit, and block
    /// view. Invalidates the decompression cache.
    pub fn refresh(&mut self) -> Result<()> {
        let slot_size = master_slot_size(self.page_size, self.compression_block_size);
        let slot0_off = self.page_size as u64;
        let slot1_off = slot0_off + slot_size;

        let read_slot = |page_io: &mut PageIo, off: u64, page_size: u32, block_size: u32, fan_out: u32| -> Result<Option<MasterNode>> {
            let p0 = page_io.read_exact_at(off, page_size as usize)?;
            let p1 = page_io.read_exact_at(off + page_size as u64, page_size as usize)?;
            let blk = page_io.read_exact_at(off + 2 * page_size as u64, block_size as usize)?;
            Ok(MasterNode::parse(&p0, &p1, &blk, fan_out))
        };
        let slot0 = read_slot(
            &mut self.page_io,
            slot0_off,
            self.page_size,
            self.compression_block_size,
            self.fan_out,
        )?;
        let slot1 = read_slot(
            &mut self.page_io,
            slot1_off,
            self.page_size,
            self.compression_block_size,
            self.fan_out,
        )?;
        let (slot, picked) = master::pick_current(slot0, slot1)
            .ok_or_else(|| CaptureError::InvalidCaptureFile("both master slots invalid".into()))?;

        if slot == self.current_slot && picked.serial == self.current_serial {
            return Ok(());
        }

        let tail_len = (picked.file_limit % self.page_size as u64) as usize;
        let tail = picked.partial_page[..tail_len].to_vec();
        self.page_io.reset_view(picked.file_limit, tail);
        self.block_buffer = BlockBuffer::with_contents(self.compression_block_size, picked.compression_block.clone());
        self.path_index = picked.rightmost_path;
        self.metadata_ptr = picked.metadata_ptr;
        self.current_slot = slot;
        self.current_serial = picked.serial;
        self.cache.invalidate();
        tracing::info!(path = %self.path.display(), record_count = self.path_index.record_count(), "refreshed capture file view");
        Ok(())
    }

    /// A lazy, one-shot sequence bounded by the record count at the
    /// moment this is called; later `refresh`es on this handle do not
    /// extend it.
    pub fn record_generator(&mut self, start: u64) -> RecordGenerator<'_> {
        let limit = self.path_index.record_count();
        RecordGenerator {
            handle: self,
            next: start.max(1),
            limit,
        }
    }
}

/// A pull-based iterator over records `[start, limit]`, where `limit` is
/// the record count captured when the generator was created.
pub struct RecordGenerator<'a> {
    handle: &'a mut CaptureFile,
    next: u64,
    limit: u64,
}

impl<'a> Iterator for RecordGenerator<'a> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.limit {
            return None;
        }
        let n = self.next;
        self.next += 1;
        Some(self.handle.record_at(n))
    }
}
