//! File-operation engine.
//!
//! Byte-level reads, writes and resizes over inode records. The write path
//! first grows or shrinks the block list to match the new content length
//! (allocating the indirect block lazily the moment a logical index past
//! the direct table is needed, and dropping it again when the last such
//! index goes away), then writes every data block, then the record, then
//! the indirect block if one is live.
//!
//! Nothing here is atomic. A failure mid-write leaves the old record on
//! disk; blocks allocated up to that point are returned to the pool on a
//! best-effort basis before the error is surfaced.

use std::cmp;

use log::{debug, info, warn};

use crate::alloc::BlockAllocator;
use crate::device::{BlockDevice, BlockId, INVALID_BLOCK};
use crate::error::{FsError, Result};
use crate::inode::{
    max_file_size, unix_now, FileAttr, IndirectBlock, Inode, InodeId, InodeTable, InodeType,
    NDIRECT, NINDIRECT,
};
use crate::param::BSIZE;
use crate::superblock::Superblock;

/// Number of blocks needed to hold `size` bytes.
fn blocks_for(size: u64) -> usize {
    ((size + BSIZE as u64 - 1) / BSIZE as u64) as usize
}

/// Resolve logical block `k` of an inode to its device block.
fn block_at(inode: &Inode, indirect: Option<&IndirectBlock>, k: usize) -> Result<BlockId> {
    let id = if Inode::is_direct(k) {
        inode.direct[k]
    } else {
        if k - NDIRECT >= NINDIRECT {
            return Err(FsError::InvalidArg("logical block index out of range"));
        }
        indirect
            .ok_or(FsError::InvalidArg("indirect block missing"))?
            .get(k - NDIRECT)
    };
    if id == INVALID_BLOCK {
        return Err(FsError::InvalidArg("unallocated data block in range"));
    }
    Ok(id)
}

/// The store: one device, its superblock, and the two metadata mirrors.
///
/// The engine owns the device for its whole life and hands it back through
/// [`FileSystem::into_device`]. It is not safe for concurrent callers; the
/// mount layer serializes requests.
pub struct FileSystem<D> {
    dev: D,
    sb: Superblock,
    alloc: BlockAllocator,
    itable: InodeTable,
}

impl<D: BlockDevice> FileSystem<D> {
    /// Lay down a fresh store on `dev`: superblock, empty bitmap, empty
    /// inode table. The caller allocates the root directory immediately
    /// afterwards; being the first allocation, it receives inode id 1.
    pub fn format(mut dev: D, ninodes: u64) -> Result<Self> {
        let sb = Superblock::new(dev.total_blocks(), ninodes)?;
        let mut buf = [0u8; BSIZE];
        sb.encode(&mut buf);
        dev.write_block(0, &buf)?;
        let alloc = BlockAllocator::format(&mut dev, &sb)?;
        let itable = InodeTable::format(&mut dev, &sb)?;
        info!(
            "format: {} blocks, {} inode slots, pool starts at block {}",
            sb.nblocks, sb.ninodes, sb.data_start
        );
        Ok(Self {
            dev,
            sb,
            alloc,
            itable,
        })
    }

    /// Mount an existing store from `dev`.
    pub fn open(mut dev: D) -> Result<Self> {
        let mut buf = [0u8; BSIZE];
        dev.read_block(0, &mut buf)?;
        let sb = Superblock::decode(&buf)?;
        if sb.nblocks != dev.total_blocks() {
            return Err(FsError::InvalidArg("superblock does not match device size"));
        }
        let alloc = BlockAllocator::load(&mut dev, &sb)?;
        let itable = InodeTable::load(&mut dev, &sb)?;
        info!(
            "open: {} blocks, {} free, {} inode slots",
            sb.nblocks,
            alloc.free_count(),
            sb.ninodes
        );
        Ok(Self {
            dev,
            sb,
            alloc,
            itable,
        })
    }

    /// Tear down, returning the device.
    pub fn into_device(self) -> D {
        self.dev
    }

    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    /// Blocks currently free in the pool.
    pub fn free_block_count(&self) -> u64 {
        self.alloc.free_count()
    }

    /// Allocate an inode of the given type: one pool block for the record,
    /// one table slot bound to it.
    pub fn alloc_inode(&mut self, typ: InodeType) -> Result<InodeId> {
        let block = self.alloc.allocate(&mut self.dev)?;
        match self.itable.allocate_inode(&mut self.dev, typ, block) {
            Ok(id) => Ok(id),
            Err(e) => {
                self.release_fresh(&[block]);
                Err(e)
            }
        }
    }

    pub fn getattr(&mut self, id: InodeId) -> Result<FileAttr> {
        self.itable.get_attr(&mut self.dev, id)
    }

    pub fn gettype(&mut self, id: InodeId) -> Result<InodeType> {
        self.itable.get_type(&mut self.dev, id)
    }

    pub fn get_type_attr(&mut self, id: InodeId) -> Result<(InodeType, FileAttr)> {
        self.itable.get_type_attr(&mut self.dev, id)
    }

    /// Load the full record of inode `id`. Intended for inspection tools
    /// and tests; file content goes through [`FileSystem::read_file`].
    pub fn read_inode(&mut self, id: InodeId) -> Result<Inode> {
        let block = self.itable.block_of(id)?;
        self.load_record(block)
    }

    /// Read the whole content of inode `id`.
    pub fn read_file(&mut self, id: InodeId) -> Result<Vec<u8>> {
        let block = self.itable.block_of(id)?;
        let inode = self.load_record(block)?;
        let size = inode.attr.size;
        if size > max_file_size() {
            return Err(FsError::OutOfResource);
        }
        let need = blocks_for(size);

        let indirect = if need > NDIRECT {
            if inode.indirect == INVALID_BLOCK {
                return Err(FsError::InvalidArg("file spans indirect range without one"));
            }
            let mut buf = [0u8; BSIZE];
            self.dev.read_block(inode.indirect, &mut buf)?;
            Some(IndirectBlock::decode(&buf))
        } else {
            None
        };

        // Read at block granularity, then trim the tail.
        let mut content = vec![0u8; need * BSIZE];
        let mut buf = [0u8; BSIZE];
        for k in 0..need {
            let b = block_at(&inode, indirect.as_ref(), k)?;
            self.dev.read_block(b, &mut buf)?;
            content[k * BSIZE..(k + 1) * BSIZE].copy_from_slice(&buf);
        }
        content.truncate(size as usize);
        Ok(content)
    }

    /// Replace the whole content of inode `id` with `content`.
    pub fn write_file(&mut self, id: InodeId, content: &[u8]) -> Result<()> {
        let record_block = self.itable.block_of(id)?;
        let mut inode = self.load_record(record_block)?;
        if inode.attr.size > max_file_size() {
            return Err(FsError::OutOfResource);
        }
        if content.len() as u64 > max_file_size() {
            warn!(
                "write inode {}: {} bytes exceeds the {} byte limit",
                id,
                content.len(),
                max_file_size()
            );
            return Err(FsError::OutOfResource);
        }

        let old_need = blocks_for(inode.attr.size);
        let new_need = blocks_for(content.len() as u64);
        // Blocks claimed by this call, handed back if it fails before the
        // new record reaches the disk.
        let mut fresh: Vec<BlockId> = Vec::new();

        let mut indirect = if new_need > NDIRECT || old_need > NDIRECT {
            if inode.indirect == INVALID_BLOCK {
                let b = self.alloc.allocate(&mut self.dev)?;
                fresh.push(b);
                let zero = [0u8; BSIZE];
                if let Err(e) = self.dev.write_block(b, &zero) {
                    self.release_fresh(&fresh);
                    return Err(e);
                }
                inode.indirect = b;
                Some(IndirectBlock::new())
            } else {
                let mut buf = [0u8; BSIZE];
                self.dev.read_block(inode.indirect, &mut buf)?;
                Some(IndirectBlock::decode(&buf))
            }
        } else {
            None
        };

        // Grow.
        for k in old_need..new_need {
            let b = match self.alloc.allocate(&mut self.dev) {
                Ok(b) => b,
                Err(e) => {
                    self.release_fresh(&fresh);
                    return Err(e);
                }
            };
            fresh.push(b);
            if Inode::is_direct(k) {
                inode.direct[k] = b;
            } else if let Some(ind) = indirect.as_mut() {
                ind.set(k - NDIRECT, b);
            } else {
                self.release_fresh(&fresh);
                return Err(FsError::InvalidArg("indirect block missing"));
            }
        }

        // Shrink.
        for k in new_need..old_need {
            let victim = if Inode::is_direct(k) {
                std::mem::replace(&mut inode.direct[k], INVALID_BLOCK)
            } else if let Some(ind) = indirect.as_mut() {
                ind.take(k - NDIRECT)
            } else {
                return Err(FsError::InvalidArg("indirect block missing"));
            };
            self.alloc.deallocate(&mut self.dev, victim)?;
        }
        if old_need > NDIRECT && new_need <= NDIRECT {
            self.alloc.deallocate(&mut self.dev, inode.indirect)?;
            inode.indirect = INVALID_BLOCK;
            indirect = None;
        }

        let now = unix_now();
        inode.attr.size = content.len() as u64;
        inode.attr.atime = now;
        inode.attr.mtime = now;
        inode.attr.ctime = now;

        // Data blocks first, zero-padding the tail of the last one.
        let mut buf = [0u8; BSIZE];
        for k in 0..new_need {
            let lo = k * BSIZE;
            let hi = cmp::min(lo + BSIZE, content.len());
            buf[..hi - lo].copy_from_slice(&content[lo..hi]);
            buf[hi - lo..].fill(0);
            let b = match block_at(&inode, indirect.as_ref(), k) {
                Ok(b) => b,
                Err(e) => {
                    self.release_fresh(&fresh);
                    return Err(e);
                }
            };
            if let Err(e) = self.dev.write_block(b, &buf) {
                self.release_fresh(&fresh);
                return Err(e);
            }
        }

        // Then the record; from here on the new block list is live.
        let mut rbuf = [0u8; BSIZE];
        inode.encode(&mut rbuf);
        if let Err(e) = self.dev.write_block(record_block, &rbuf) {
            self.release_fresh(&fresh);
            return Err(e);
        }
        if let Some(ind) = indirect.as_ref() {
            let mut ibuf = [0u8; BSIZE];
            ind.encode(&mut ibuf);
            self.dev.write_block(inode.indirect, &ibuf)?;
        }
        debug!(
            "write inode {}: {} bytes, {} -> {} blocks",
            id,
            content.len(),
            old_need,
            new_need
        );
        Ok(())
    }

    /// Read `size` bytes starting at byte `off`. An offset at or past the
    /// end yields an empty vector; a range crossing the end yields the
    /// available prefix.
    pub fn read_file_w_off(&mut self, id: InodeId, size: u64, off: u64) -> Result<Vec<u8>> {
        let content = self.read_file(id)?;
        let start = cmp::min(off as usize, content.len());
        let end = cmp::min(off.saturating_add(size), content.len() as u64) as usize;
        Ok(content[start..end].to_vec())
    }

    /// Overwrite bytes `[off, off + data.len())`, zero-filling any gap
    /// between the old end of file and `off`. Returns the byte count
    /// written.
    pub fn write_file_w_off(&mut self, id: InodeId, data: &[u8], off: u64) -> Result<u64> {
        let end = off
            .checked_add(data.len() as u64)
            .ok_or(FsError::OutOfResource)?;
        if end > max_file_size() {
            return Err(FsError::OutOfResource);
        }
        let mut content = self.read_file(id)?;
        if end as usize > content.len() {
            content.resize(end as usize, 0);
        }
        content[off as usize..end as usize].copy_from_slice(data);
        self.write_file(id, &content)?;
        Ok(data.len() as u64)
    }

    /// Set the content length to `new_size`, truncating or zero-extending,
    /// and return the resulting attributes.
    pub fn resize(&mut self, id: InodeId, new_size: u64) -> Result<FileAttr> {
        if new_size > max_file_size() {
            return Err(FsError::OutOfResource);
        }
        let attr = self.getattr(id)?;
        if attr.size == new_size {
            return Ok(attr);
        }
        let mut content = self.read_file(id)?;
        content.resize(new_size as usize, 0);
        self.write_file(id, &content)?;
        self.getattr(id)
    }

    /// Destroy inode `id`: free every data block, the indirect block if
    /// present, the record block, and the id slot.
    pub fn remove_file(&mut self, id: InodeId) -> Result<()> {
        let record_block = self.itable.block_of(id)?;
        let inode = self.load_record(record_block)?;

        for k in 0..NDIRECT {
            if inode.direct[k] != INVALID_BLOCK {
                self.alloc.deallocate(&mut self.dev, inode.direct[k])?;
            }
        }
        if inode.indirect != INVALID_BLOCK {
            let mut buf = [0u8; BSIZE];
            self.dev.read_block(inode.indirect, &mut buf)?;
            let ind = IndirectBlock::decode(&buf);
            for b in ind.iter().filter(|&b| b != INVALID_BLOCK) {
                self.alloc.deallocate(&mut self.dev, b)?;
            }
            self.alloc.deallocate(&mut self.dev, inode.indirect)?;
        }
        self.alloc.deallocate(&mut self.dev, record_block)?;
        self.itable.release(&mut self.dev, id)?;
        debug!("remove inode {}", id);
        Ok(())
    }

    fn load_record(&mut self, block: BlockId) -> Result<Inode> {
        let mut buf = [0u8; BSIZE];
        self.dev.read_block(block, &mut buf)?;
        Inode::decode(&buf)
    }

    /// Hand blocks claimed by a failed operation back to the pool.
    fn release_fresh(&mut self, fresh: &[BlockId]) {
        for &b in fresh {
            if let Err(e) = self.alloc.deallocate(&mut self.dev, b) {
                warn!("rollback: could not free block {}: {}", b, e);
            }
        }
    }
}
