//! Inodes.
//!
//! An inode describes a single unnamed file or directory. Its record
//! occupies exactly one block: a fixed header (type, then size and the
//! three timestamps) followed by `NDIRECT` direct block ids and, in the
//! last slot of the block, one indirect block id. The indirect block,
//! when present, is a dense array of further block ids, so a file can
//! span at most `NDIRECT + NINDIRECT` blocks.
//!
//! Inode ids index an on-disk table mapping each id to the block that
//! holds its record. Slot 0 is reserved so that 0 can serve as the
//! invalid id; the first id handed out on a fresh disk is therefore 1,
//! which hosts the root directory by convention.
//!
//! Records never cross the codec boundary as raw structs: `decode` and
//! `encode` are the layout contract, and every integer is little-endian.

use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{ByteOrder, LittleEndian};
use static_assertions::const_assert_eq;

use crate::device::{BlockDevice, BlockId, INVALID_BLOCK};
use crate::error::{FsError, Result};
use crate::param::BSIZE;
use crate::superblock::{Superblock, EPB};

/// Inode id. 0 is reserved as the invalid id.
pub type InodeId = u64;

pub const INVALID_INODE: InodeId = 0;

/// Root directory i-number: the first id handed out on a fresh disk.
pub const ROOT_INODE: InodeId = 1;

/// Bytes of record header before the block-id slots.
const INODE_HDR: usize = 40;

/// Direct block ids per inode record.
pub const NDIRECT: usize = (BSIZE - INODE_HDR) / 8 - 1;

/// Block ids per indirect block.
pub const NINDIRECT: usize = BSIZE / 8;

/// Maximum file length in blocks.
pub const MAXFILE: usize = NDIRECT + NINDIRECT;

// The header and the NDIRECT + 1 id slots tile the record block exactly.
const_assert_eq!(INODE_HDR + (NDIRECT + 1) * 8, BSIZE);

/// Largest byte length a single inode can address.
pub const fn max_file_size() -> u64 {
    (MAXFILE * BSIZE) as u64
}

/// Seconds since the epoch, saturating at zero before it.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// File type stored in an inode record.
///
/// Symbolic links are declared in the on-disk format but no operation
/// creates or follows them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
    File,
    Directory,
    SymLink,
}

impl InodeType {
    fn code(self) -> u32 {
        match self {
            InodeType::File => 1,
            InodeType::Directory => 2,
            InodeType::SymLink => 3,
        }
    }

    fn from_code(code: u32) -> Result<Self> {
        match code {
            1 => Ok(InodeType::File),
            2 => Ok(InodeType::Directory),
            3 => Ok(InodeType::SymLink),
            _ => Err(FsError::InvalidArg("unknown inode type code")),
        }
    }
}

/// Attributes carried by every inode. Timestamps are seconds since the
/// epoch; `atime` is only updated by writes, never by reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileAttr {
    pub size: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

/// In-memory copy of one on-disk inode record.
#[derive(Debug, Clone)]
pub struct Inode {
    pub typ: InodeType,
    pub attr: FileAttr,
    pub direct: [BlockId; NDIRECT],
    pub indirect: BlockId,
}

impl Inode {
    /// Fresh record: zero size, all slots invalid, every timestamp `now`.
    pub fn new(typ: InodeType, now: u64) -> Self {
        Self {
            typ,
            attr: FileAttr {
                size: 0,
                atime: now,
                mtime: now,
                ctime: now,
            },
            direct: [INVALID_BLOCK; NDIRECT],
            indirect: INVALID_BLOCK,
        }
    }

    /// Whether logical block `idx` lives in the direct table.
    pub fn is_direct(idx: usize) -> bool {
        idx < NDIRECT
    }

    pub fn decode(buf: &[u8; BSIZE]) -> Result<Self> {
        let typ = InodeType::from_code(LittleEndian::read_u32(&buf[0..4]))?;
        let attr = FileAttr {
            size: LittleEndian::read_u64(&buf[8..16]),
            atime: LittleEndian::read_u64(&buf[16..24]),
            mtime: LittleEndian::read_u64(&buf[24..32]),
            ctime: LittleEndian::read_u64(&buf[32..40]),
        };
        let mut direct = [INVALID_BLOCK; NDIRECT];
        LittleEndian::read_u64_into(&buf[INODE_HDR..INODE_HDR + NDIRECT * 8], &mut direct);
        let indirect = LittleEndian::read_u64(&buf[BSIZE - 8..]);
        Ok(Self {
            typ,
            attr,
            direct,
            indirect,
        })
    }

    /// Decode only the header; enough for attribute queries.
    pub fn decode_type_attr(buf: &[u8; BSIZE]) -> Result<(InodeType, FileAttr)> {
        let typ = InodeType::from_code(LittleEndian::read_u32(&buf[0..4]))?;
        let attr = FileAttr {
            size: LittleEndian::read_u64(&buf[8..16]),
            atime: LittleEndian::read_u64(&buf[16..24]),
            mtime: LittleEndian::read_u64(&buf[24..32]),
            ctime: LittleEndian::read_u64(&buf[32..40]),
        };
        Ok((typ, attr))
    }

    pub fn encode(&self, buf: &mut [u8; BSIZE]) {
        LittleEndian::write_u32(&mut buf[0..4], self.typ.code());
        LittleEndian::write_u32(&mut buf[4..8], 0);
        LittleEndian::write_u64(&mut buf[8..16], self.attr.size);
        LittleEndian::write_u64(&mut buf[16..24], self.attr.atime);
        LittleEndian::write_u64(&mut buf[24..32], self.attr.mtime);
        LittleEndian::write_u64(&mut buf[32..40], self.attr.ctime);
        LittleEndian::write_u64_into(&self.direct, &mut buf[INODE_HDR..INODE_HDR + NDIRECT * 8]);
        LittleEndian::write_u64(&mut buf[BSIZE - 8..], self.indirect);
    }
}

/// Decoded contents of an indirect block: `NINDIRECT` block ids.
#[derive(Debug, Clone)]
pub struct IndirectBlock {
    entries: [BlockId; NINDIRECT],
}

impl IndirectBlock {
    pub fn new() -> Self {
        Self {
            entries: [INVALID_BLOCK; NINDIRECT],
        }
    }

    pub fn decode(buf: &[u8; BSIZE]) -> Self {
        let mut entries = [INVALID_BLOCK; NINDIRECT];
        LittleEndian::read_u64_into(buf, &mut entries);
        Self { entries }
    }

    pub fn encode(&self, buf: &mut [u8; BSIZE]) {
        LittleEndian::write_u64_into(&self.entries, buf);
    }

    pub fn get(&self, i: usize) -> BlockId {
        self.entries[i]
    }

    pub fn set(&mut self, i: usize, id: BlockId) {
        self.entries[i] = id;
    }

    /// Replace entry `i` with the invalid id, returning the old value.
    pub fn take(&mut self, i: usize) -> BlockId {
        std::mem::replace(&mut self.entries[i], INVALID_BLOCK)
    }

    pub fn iter(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.entries.iter().copied()
    }
}

impl Default for IndirectBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// The inode-id to block-id table, mirrored in memory and written through
/// one table block at a time.
pub struct InodeTable {
    sb: Superblock,
    entries: Vec<BlockId>,
}

impl InodeTable {
    /// Zero the table region: every slot free.
    pub fn format<D: BlockDevice>(dev: &mut D, sb: &Superblock) -> Result<Self> {
        let buf = [0u8; BSIZE];
        for bi in 0..sb.ninodeblocks {
            dev.write_block(sb.inode_start + bi, &buf)?;
        }
        Ok(Self {
            sb: *sb,
            entries: vec![INVALID_BLOCK; sb.ninodes as usize],
        })
    }

    /// Mirror the table region of an existing disk.
    pub fn load<D: BlockDevice>(dev: &mut D, sb: &Superblock) -> Result<Self> {
        let mut entries = vec![INVALID_BLOCK; sb.ninodes as usize];
        let mut buf = [0u8; BSIZE];
        for bi in 0..sb.ninodeblocks as usize {
            dev.read_block(sb.inode_start + bi as u64, &mut buf)?;
            let lo = bi * EPB;
            let hi = usize::min(lo + EPB, entries.len());
            LittleEndian::read_u64_into(&buf[..(hi - lo) * 8], &mut entries[lo..hi]);
        }
        Ok(Self { sb: *sb, entries })
    }

    /// Bind the first free inode id to `block` and write a fresh record of
    /// the given type there. The record goes down before the table entry,
    /// so a torn sequence leaves the slot free rather than dangling.
    pub fn allocate_inode<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        typ: InodeType,
        block: BlockId,
    ) -> Result<InodeId> {
        let id = match (1..self.entries.len()).find(|&i| self.entries[i] == INVALID_BLOCK) {
            Some(i) => i as InodeId,
            None => return Err(FsError::OutOfResource),
        };
        let mut buf = [0u8; BSIZE];
        Inode::new(typ, unix_now()).encode(&mut buf);
        dev.write_block(block, &buf)?;
        self.entries[id as usize] = block;
        self.persist_entry(dev, id)?;
        Ok(id)
    }

    /// Block holding the record of inode `id`.
    pub fn block_of(&self, id: InodeId) -> Result<BlockId> {
        match self.entries.get(id as usize) {
            Some(&b) if id != INVALID_INODE && b != INVALID_BLOCK => Ok(b),
            _ => Err(FsError::NotExist),
        }
    }

    /// Release the id slot. The record block itself is the caller's to free.
    pub fn release<D: BlockDevice>(&mut self, dev: &mut D, id: InodeId) -> Result<()> {
        self.block_of(id)?;
        self.entries[id as usize] = INVALID_BLOCK;
        self.persist_entry(dev, id)
    }

    pub fn get_type_attr<D: BlockDevice>(
        &self,
        dev: &mut D,
        id: InodeId,
    ) -> Result<(InodeType, FileAttr)> {
        let block = self.block_of(id)?;
        let mut buf = [0u8; BSIZE];
        dev.read_block(block, &mut buf)?;
        Inode::decode_type_attr(&buf)
    }

    pub fn get_attr<D: BlockDevice>(&self, dev: &mut D, id: InodeId) -> Result<FileAttr> {
        self.get_type_attr(dev, id).map(|(_, attr)| attr)
    }

    pub fn get_type<D: BlockDevice>(&self, dev: &mut D, id: InodeId) -> Result<InodeType> {
        self.get_type_attr(dev, id).map(|(typ, _)| typ)
    }

    /// Write back the table block holding the entry for `id`.
    fn persist_entry<D: BlockDevice>(&self, dev: &mut D, id: InodeId) -> Result<()> {
        let bi = id as usize / EPB;
        let lo = bi * EPB;
        let hi = usize::min(lo + EPB, self.entries.len());
        let mut buf = [0u8; BSIZE];
        LittleEndian::write_u64_into(&self.entries[lo..hi], &mut buf[..(hi - lo) * 8]);
        dev.write_block(self.sb.iblock(id), &buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDisk;

    #[test]
    fn record_layout_constants() {
        assert_eq!(NDIRECT, 506);
        assert_eq!(NINDIRECT, 512);
        assert_eq!(max_file_size(), (506 + 512) as u64 * BSIZE as u64);
    }

    #[test]
    fn record_codec_round_trip() {
        let mut inode = Inode::new(InodeType::Directory, 1_700_000_000);
        inode.attr.size = 123_456;
        inode.direct[0] = 7;
        inode.direct[NDIRECT - 1] = 99;
        inode.indirect = 1234;

        let mut buf = [0u8; BSIZE];
        inode.encode(&mut buf);
        let back = Inode::decode(&buf).unwrap();
        assert_eq!(back.typ, InodeType::Directory);
        assert_eq!(back.attr, inode.attr);
        assert_eq!(back.direct[0], 7);
        assert_eq!(back.direct[1], INVALID_BLOCK);
        assert_eq!(back.direct[NDIRECT - 1], 99);
        assert_eq!(back.indirect, 1234);

        let (typ, attr) = Inode::decode_type_attr(&buf).unwrap();
        assert_eq!(typ, InodeType::Directory);
        assert_eq!(attr.size, 123_456);
    }

    #[test]
    fn record_decode_rejects_unknown_type() {
        let buf = [0u8; BSIZE];
        assert!(matches!(
            Inode::decode(&buf),
            Err(FsError::InvalidArg(_))
        ));
    }

    #[test]
    fn indirect_block_codec() {
        let mut ind = IndirectBlock::new();
        ind.set(0, 42);
        ind.set(NINDIRECT - 1, 43);
        let mut buf = [0u8; BSIZE];
        ind.encode(&mut buf);
        let back = IndirectBlock::decode(&buf);
        assert_eq!(back.get(0), 42);
        assert_eq!(back.get(1), INVALID_BLOCK);
        assert_eq!(back.get(NINDIRECT - 1), 43);
    }

    fn table_fixture() -> (MemoryDisk, Superblock, InodeTable) {
        let mut disk = MemoryDisk::new(64);
        let sb = Superblock::new(64, 4).unwrap();
        let table = InodeTable::format(&mut disk, &sb).unwrap();
        (disk, sb, table)
    }

    #[test]
    fn ids_start_at_one_and_slots_are_finite() {
        let (mut disk, _, mut table) = table_fixture();
        assert_eq!(
            table
                .allocate_inode(&mut disk, InodeType::Directory, 10)
                .unwrap(),
            1
        );
        assert_eq!(
            table.allocate_inode(&mut disk, InodeType::File, 11).unwrap(),
            2
        );
        assert_eq!(
            table.allocate_inode(&mut disk, InodeType::File, 12).unwrap(),
            3
        );
        assert!(matches!(
            table.allocate_inode(&mut disk, InodeType::File, 13),
            Err(FsError::OutOfResource)
        ));
    }

    #[test]
    fn release_frees_the_slot_for_reuse() {
        let (mut disk, _, mut table) = table_fixture();
        let a = table
            .allocate_inode(&mut disk, InodeType::File, 10)
            .unwrap();
        let _b = table
            .allocate_inode(&mut disk, InodeType::File, 11)
            .unwrap();
        table.release(&mut disk, a).unwrap();
        assert!(matches!(table.block_of(a), Err(FsError::NotExist)));
        let again = table
            .allocate_inode(&mut disk, InodeType::File, 12)
            .unwrap();
        assert_eq!(again, a);
    }

    #[test]
    fn allocate_initializes_the_record() {
        let (mut disk, _, mut table) = table_fixture();
        let id = table
            .allocate_inode(&mut disk, InodeType::Directory, 10)
            .unwrap();
        let (typ, attr) = table.get_type_attr(&mut disk, id).unwrap();
        assert_eq!(typ, InodeType::Directory);
        assert_eq!(attr.size, 0);
        assert!(attr.mtime > 0);
    }

    #[test]
    fn table_survives_reload() {
        let (mut disk, sb, mut table) = table_fixture();
        let a = table
            .allocate_inode(&mut disk, InodeType::File, 10)
            .unwrap();
        let b = table
            .allocate_inode(&mut disk, InodeType::File, 11)
            .unwrap();
        table.release(&mut disk, a).unwrap();

        let reloaded = InodeTable::load(&mut disk, &sb).unwrap();
        assert!(matches!(reloaded.block_of(a), Err(FsError::NotExist)));
        assert_eq!(reloaded.block_of(b).unwrap(), 11);
        assert!(matches!(
            reloaded.block_of(INVALID_INODE),
            Err(FsError::NotExist)
        ));
    }
}
