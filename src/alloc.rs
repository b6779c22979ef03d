//! Free-block allocator.
//!
//! Bit `i` of the on-disk bitmap is set iff block `i` is in use. The whole
//! bitmap region is mirrored in memory and written through one block at a
//! time on every mutation. Allocation is first-fit from a moving hint that
//! wraps at the end of the device; the metadata prefix and the tail bits
//! past the last real block are marked used forever at format time.

use log::{debug, warn};

use crate::device::{BlockDevice, BlockId};
use crate::error::{FsError, Result};
use crate::param::BSIZE;
use crate::superblock::{Superblock, BPB};

pub struct BlockAllocator {
    sb: Superblock,
    bits: Vec<u8>,
    hint: BlockId,
    free: u64,
}

impl BlockAllocator {
    /// Write a fresh bitmap: metadata blocks and tail padding used,
    /// everything else free.
    pub fn format<D: BlockDevice>(dev: &mut D, sb: &Superblock) -> Result<Self> {
        let mut alloc = Self {
            sb: *sb,
            bits: vec![0; sb.nbitmap as usize * BSIZE],
            hint: sb.data_start,
            free: sb.nblocks - sb.data_start,
        };
        for b in 0..sb.data_start {
            alloc.set(b);
        }
        for b in sb.nblocks..sb.nbitmap * BPB as u64 {
            alloc.set(b);
        }
        let mut buf = [0u8; BSIZE];
        for bi in 0..sb.nbitmap as usize {
            buf.copy_from_slice(&alloc.bits[bi * BSIZE..(bi + 1) * BSIZE]);
            dev.write_block(sb.bitmap_start + bi as u64, &buf)?;
        }
        Ok(alloc)
    }

    /// Mirror the bitmap region of an existing disk.
    pub fn load<D: BlockDevice>(dev: &mut D, sb: &Superblock) -> Result<Self> {
        let mut bits = vec![0u8; sb.nbitmap as usize * BSIZE];
        let mut buf = [0u8; BSIZE];
        for bi in 0..sb.nbitmap as usize {
            dev.read_block(sb.bitmap_start + bi as u64, &mut buf)?;
            bits[bi * BSIZE..(bi + 1) * BSIZE].copy_from_slice(&buf);
        }
        let free = bits.iter().map(|b| u64::from(b.count_zeros())).sum();
        let alloc = Self {
            sb: *sb,
            bits,
            hint: sb.data_start,
            free,
        };
        if !alloc.test(0) {
            return Err(FsError::InvalidArg("bitmap lost the superblock bit"));
        }
        Ok(alloc)
    }

    /// Claim the first free block at or after the hint, wrapping once.
    pub fn allocate<D: BlockDevice>(&mut self, dev: &mut D) -> Result<BlockId> {
        let candidates = (self.hint..self.sb.nblocks).chain(self.sb.data_start..self.hint);
        for b in candidates {
            if !self.test(b) {
                self.set(b);
                self.free -= 1;
                self.persist(dev, b)?;
                self.hint = if b + 1 >= self.sb.nblocks {
                    self.sb.data_start
                } else {
                    b + 1
                };
                debug!("alloc block {}", b);
                return Ok(b);
            }
        }
        warn!("allocate: out of blocks");
        Err(FsError::OutOfResource)
    }

    /// Return a block to the pool. Freeing a metadata block or a block
    /// that is already free is an error.
    pub fn deallocate<D: BlockDevice>(&mut self, dev: &mut D, b: BlockId) -> Result<()> {
        if b < self.sb.data_start || b >= self.sb.nblocks {
            return Err(FsError::InvalidArg("deallocate: block id out of range"));
        }
        if !self.test(b) {
            return Err(FsError::InvalidArg("deallocate: double free"));
        }
        self.clear(b);
        self.free += 1;
        self.persist(dev, b)?;
        debug!("free block {}", b);
        Ok(())
    }

    /// Number of blocks currently free.
    pub fn free_count(&self) -> u64 {
        self.free
    }

    fn test(&self, b: BlockId) -> bool {
        self.bits[(b / 8) as usize] & (1 << (b % 8)) != 0
    }

    fn set(&mut self, b: BlockId) {
        self.bits[(b / 8) as usize] |= 1 << (b % 8);
    }

    fn clear(&mut self, b: BlockId) {
        self.bits[(b / 8) as usize] &= !(1 << (b % 8));
    }

    /// Write back the bitmap block holding the bit for `b`.
    fn persist<D: BlockDevice>(&self, dev: &mut D, b: BlockId) -> Result<()> {
        let bi = (b / BPB as u64) as usize;
        let mut buf = [0u8; BSIZE];
        buf.copy_from_slice(&self.bits[bi * BSIZE..(bi + 1) * BSIZE]);
        dev.write_block(self.sb.bblock(b), &buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDisk;

    fn fixture() -> (MemoryDisk, Superblock, BlockAllocator) {
        let mut disk = MemoryDisk::new(64);
        let sb = Superblock::new(64, 16).unwrap();
        let alloc = BlockAllocator::format(&mut disk, &sb).unwrap();
        (disk, sb, alloc)
    }

    #[test]
    fn format_reserves_metadata() {
        let (_, sb, alloc) = fixture();
        assert_eq!(alloc.free_count(), 64 - sb.data_start);
        assert!(alloc.test(0));
        assert!(alloc.test(sb.data_start - 1));
        assert!(!alloc.test(sb.data_start));
    }

    #[test]
    fn allocate_is_first_fit_and_disjoint() {
        let (mut disk, sb, mut alloc) = fixture();
        let a = alloc.allocate(&mut disk).unwrap();
        let b = alloc.allocate(&mut disk).unwrap();
        assert_eq!(a, sb.data_start);
        assert_eq!(b, sb.data_start + 1);
        assert_ne!(a, b);

        alloc.deallocate(&mut disk, a).unwrap();
        // The hint has moved past `a`; the scan wraps back to it.
        let mut seen = vec![b];
        for _ in 0..(64 - sb.data_start - 1) {
            let id = alloc.allocate(&mut disk).unwrap();
            assert!(!seen.contains(&id));
            seen.push(id);
        }
        assert_eq!(alloc.free_count(), 0);
    }

    #[test]
    fn exhaustion_reports_out_of_resource() {
        let (mut disk, sb, mut alloc) = fixture();
        for _ in 0..(64 - sb.data_start) {
            alloc.allocate(&mut disk).unwrap();
        }
        assert!(matches!(
            alloc.allocate(&mut disk),
            Err(FsError::OutOfResource)
        ));
    }

    #[test]
    fn double_free_is_rejected() {
        let (mut disk, _, mut alloc) = fixture();
        let a = alloc.allocate(&mut disk).unwrap();
        alloc.deallocate(&mut disk, a).unwrap();
        assert!(matches!(
            alloc.deallocate(&mut disk, a),
            Err(FsError::InvalidArg(_))
        ));
    }

    #[test]
    fn metadata_blocks_cannot_be_freed() {
        let (mut disk, sb, mut alloc) = fixture();
        assert!(alloc.deallocate(&mut disk, 0).is_err());
        assert!(alloc.deallocate(&mut disk, sb.data_start - 1).is_err());
        assert!(alloc.deallocate(&mut disk, sb.nblocks).is_err());
    }

    #[test]
    fn free_count_survives_reload() {
        let (mut disk, sb, mut alloc) = fixture();
        let a = alloc.allocate(&mut disk).unwrap();
        let _b = alloc.allocate(&mut disk).unwrap();
        alloc.deallocate(&mut disk, a).unwrap();
        let expect = alloc.free_count();

        let reloaded = BlockAllocator::load(&mut disk, &sb).unwrap();
        assert_eq!(reloaded.free_count(), expect);
        assert!(!reloaded.test(a));
    }
}
