//! Error kinds surfaced by every layer of the store.

use std::io;

use thiserror::Error;

/// Failure taxonomy shared by the allocator, the inode layer and the
/// file-operation engine. The mount adapter maps these onto errno values.
#[derive(Debug, Error)]
pub enum FsError {
    /// Inode id or directory entry absent.
    #[error("no such inode or directory entry")]
    NotExist,

    /// Directory entry with this name already present.
    #[error("directory entry already exists")]
    AlreadyExist,

    /// Directory removal attempted while entries remain.
    #[error("directory is not empty")]
    NotEmpty,

    /// No free block, no free inode slot, or the file would exceed the
    /// maximum size an inode can address.
    #[error("out of blocks, inode slots, or maximum file size exceeded")]
    OutOfResource,

    /// Malformed block id, bitmap inconsistency, double free, or a
    /// corrupted on-disk structure.
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),

    /// Underlying device i/o failed.
    #[error("device i/o: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;
