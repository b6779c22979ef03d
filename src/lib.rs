//! Single-node block file store. Five layers, leaves first:
//!   + Device: fixed-count array of fixed-size blocks, read and written by id.
//!   + Allocator: free-block bitmap over the device.
//!   + Inodes: id-to-block table and per-file records with direct and
//!     indirect block references.
//!   + Files: byte-level read, write and resize on top of inode records.
//!   + Directories: regular files whose content names other inodes.
//!
//! The mount adapter that forwards kernel VFS requests into this crate lives
//! in the host process. Everything here is synchronous and expects a single
//! caller; serialization is the host's job.

#![deny(rust_2018_idioms)]

pub mod alloc;
pub mod device;
pub mod dir;
pub mod error;
pub mod fs;
pub mod inode;
pub mod param;
pub mod superblock;

pub use crate::device::{BlockDevice, BlockId, FileDisk, MemoryDisk, INVALID_BLOCK};
pub use crate::dir::DirEntry;
pub use crate::error::{FsError, Result};
pub use crate::fs::FileSystem;
pub use crate::inode::{FileAttr, InodeId, InodeType, INVALID_INODE, ROOT_INODE};
pub use crate::param::BSIZE;
pub use crate::superblock::Superblock;
