//! Master node (C6): the dual alternating slots that record committed
//! state and give commit atomicity across crashes.
//!
//! Each slot occupies `2*page_size + compression_block_size` bytes: page 0
//! holds a 32-byte fixed header (crc32, serial, file_limit,
//! compression_block_len, metadata_ptr) followed by the serialized
//! rightmost path, zero-padded to `page_size`; page 1 is a verbatim copy
//! of the data region's trailing partial page; the trailing region is the
//! in-memory compression block's raw bytes, zero-padded to
//! `compression_block_size`.

use crate::codec::{crc32, read_u32_le, read_u64_le, serial_is_newer, write_u32_le, write_u64_le};
use crate::index::{DataCoordinate, RightmostPath};

/// Offset of the CRC field within page 0 — everything after it (in both
/// pages and the block region) is covered by the checksum.
const CRC_LEN: usize = 4;
pub const MASTER_FIXED_HEADER_LEN: usize = 32;

#[derive(Clone, Debug)]
pub struct MasterNode {
    pub serial: u32,
    pub file_limit: u64,
    pub compression_block_len: u32,
    pub metadata_ptr: DataCoordinate,
    pub rightmost_path: RightmostPath,
    pub partial_page: Vec<u8>,
    pub compression_block: Vec<u8>,
}

impl MasterNode {
    pub fn empty(fan_out: u32, page_size: u32, compression_block_size: u32) -> Self {
        MasterNode {
            serial: 0,
            file_limit: 0,
            compression_block_len: 0,
            metadata_ptr: DataCoordinate::ZERO,
            rightmost_path: RightmostPath::new(fan_out),
            partial_page: vec![0u8; page_size as usize],
            compression_block: vec![0u8; compression_block_size as usize],
        }
    }

    /// Serializes this master into `(page0, page1, block_region)`, each of
    /// the correct fixed size, with the CRC computed and written into
    /// `page0[0..4]`.
    pub fn serialize(
        &self,
        page_size: u32,
        compression_block_size: u32,
    ) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let mut page0 = Vec::with_capacity(page_size as usize);
        page0.extend_from_slice(&[0u8; CRC_LEN]); // placeholder, filled below
        write_u32_le(&mut page0, self.serial);
        write_u64_le(&mut page0, self.file_limit);
        write_u32_le(&mut page0, self.compression_block_len);
        self.metadata_ptr.write(&mut page0);
        self.rightmost_path.write(&mut page0);
        debug_assert!(page0.len() <= page_size as usize, "rightmost path overflowed page 0");
        page0.resize(page_size as usize, 0);

        let mut page1 = self.partial_page.clone();
        page1.resize(page_size as usize, 0);

        let mut block_region = self.compression_block.clone();
        block_region.resize(compression_block_size as usize, 0);

        let mut crc_input = Vec::with_capacity(page0.len() - CRC_LEN + page1.len() + block_region.len());
        crc_input.extend_from_slice(&page0[CRC_LEN..]);
        crc_input.extend_from_slice(&page1);
        crc_input.extend_from_slice(&block_region);
        let crc = crc32(&crc_input);
        page0[0..CRC_LEN].copy_from_slice(&crc.to_le_bytes());

        (page0, page1, block_region)
    }

    /// Parses and CRC-validates a slot's three regions. Returns `None` if
    /// the stored CRC does not match — the slot is corrupt and ignored.
    pub fn parse(page0: &[u8], page1: &[u8], block_region: &[u8], fan_out: u32) -> Option<MasterNode> {
        if page0.len() < MASTER_FIXED_HEADER_LEN {
            return None;
        }
        let stored_crc = read_u32_le(page0, 0);
        let mut crc_input = Vec::with_capacity(page0.len() - CRC_LEN + page1.len() + block_region.len());
        crc_input.extend_from_slice(&page0[CRC_LEN..]);
        crc_input.extend_from_slice(page1);
        crc_input.extend_from_slice(block_region);
        if crc32(&crc_input) != stored_crc {
            return None;
        }

        let serial = read_u32_le(page0, 4);
        let file_limit = read_u64_le(page0, 8);
        let compression_block_len = read_u32_le(page0, 16);
        let metadata_ptr = DataCoordinate::read(page0, 20);
        let (rightmost_path, _consumed) = RightmostPath::read(&page0[MASTER_FIXED_HEADER_LEN..], fan_out);

        Some(MasterNode {
            serial,
            file_limit,
            compression_block_len,
            metadata_ptr,
            rightmost_path,
            partial_page: page1.to_vec(),
            compression_block: block_region[..compression_block_len as usize].to_vec(),
        })
    }
}

/// Picks the current slot out of up to two CRC-valid candidates, by
/// wrap-aware serial comparison. `(slot_index, master)`.
pub fn pick_current(slot0: Option<MasterNode>, slot1: Option<MasterNode>) -> Option<(usize, MasterNode)> {
    match (slot0, slot1) {
        (Some(a), Some(b)) => {
            if serial_is_newer(a.serial, b.serial) {
                Some((0, a))
            } else {
                Some((1, b))
            }
        }
        (Some(a), None) => Some((0, a)),
        (None, Some(b)) => Some((1, b)),
        (None, None) => None,
    }
}
