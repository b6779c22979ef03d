//! Disk layout:
//! [ super block | free bit map | inode table | general pool ]
//!
//! `format` computes the superblock once from the device geometry; `open`
//! reads it back from block 0 and trusts it after a magic check. All on-disk
//! integers, here and everywhere else, are little-endian.

use std::mem;

use byteorder::{ByteOrder, LittleEndian};
use static_assertions::const_assert;

use crate::device::BlockId;
use crate::error::{FsError, Result};
use crate::inode::InodeId;
use crate::param::BSIZE;

const FSMAGIC: u32 = 0x5346_424b;

/// Bitmap bits per block.
pub const BPB: usize = BSIZE * 8;

/// Inode-table entries per block.
pub const EPB: usize = BSIZE / mem::size_of::<u64>();

const_assert!(BSIZE % mem::size_of::<u64>() == 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    /// Size of the device (blocks).
    pub nblocks: u64,

    /// Number of inode-id slots, slot 0 included (and reserved).
    pub ninodes: u64,

    /// Block number of the first free-bitmap block. Always 1.
    pub bitmap_start: BlockId,

    /// Number of free-bitmap blocks.
    pub nbitmap: u64,

    /// Block number of the first inode-table block.
    pub inode_start: BlockId,

    /// Number of inode-table blocks.
    pub ninodeblocks: u64,

    /// First block of the general pool.
    pub data_start: BlockId,
}

impl Superblock {
    /// Lay out the metadata regions for a device of `nblocks` blocks and
    /// `ninodes` inode slots.
    pub fn new(nblocks: u64, ninodes: u64) -> Result<Self> {
        if ninodes < 2 {
            return Err(FsError::InvalidArg("at least two inode slots required"));
        }
        let nbitmap = (nblocks + BPB as u64 - 1) / BPB as u64;
        let ninodeblocks = (ninodes + EPB as u64 - 1) / EPB as u64;
        let bitmap_start = 1;
        let inode_start = bitmap_start + nbitmap;
        let data_start = inode_start + ninodeblocks;
        if data_start >= nblocks {
            return Err(FsError::InvalidArg("device too small for metadata"));
        }
        Ok(Self {
            nblocks,
            ninodes,
            bitmap_start,
            nbitmap,
            inode_start,
            ninodeblocks,
            data_start,
        })
    }

    pub fn decode(buf: &[u8; BSIZE]) -> Result<Self> {
        if LittleEndian::read_u32(&buf[0..4]) != FSMAGIC {
            return Err(FsError::InvalidArg("bad filesystem magic"));
        }
        let sb = Self {
            nblocks: LittleEndian::read_u64(&buf[8..16]),
            ninodes: LittleEndian::read_u64(&buf[16..24]),
            bitmap_start: LittleEndian::read_u64(&buf[24..32]),
            nbitmap: LittleEndian::read_u64(&buf[32..40]),
            inode_start: LittleEndian::read_u64(&buf[40..48]),
            ninodeblocks: LittleEndian::read_u64(&buf[48..56]),
            data_start: LittleEndian::read_u64(&buf[56..64]),
        };
        if sb.inode_start != sb.bitmap_start + sb.nbitmap
            || sb.data_start != sb.inode_start + sb.ninodeblocks
            || sb.data_start >= sb.nblocks
        {
            return Err(FsError::InvalidArg("inconsistent superblock regions"));
        }
        Ok(sb)
    }

    pub fn encode(&self, buf: &mut [u8; BSIZE]) {
        buf.fill(0);
        LittleEndian::write_u32(&mut buf[0..4], FSMAGIC);
        LittleEndian::write_u64(&mut buf[8..16], self.nblocks);
        LittleEndian::write_u64(&mut buf[16..24], self.ninodes);
        LittleEndian::write_u64(&mut buf[24..32], self.bitmap_start);
        LittleEndian::write_u64(&mut buf[32..40], self.nbitmap);
        LittleEndian::write_u64(&mut buf[40..48], self.inode_start);
        LittleEndian::write_u64(&mut buf[48..56], self.ninodeblocks);
        LittleEndian::write_u64(&mut buf[56..64], self.data_start);
    }

    /// Block of the free bitmap containing the bit for block `b`.
    pub fn bblock(&self, b: BlockId) -> BlockId {
        self.bitmap_start + b / BPB as u64
    }

    /// Block of the inode table containing the entry for inode `i`.
    pub fn iblock(&self, i: InodeId) -> BlockId {
        self.inode_start + i / EPB as u64
    }
}
