/// Block size (bytes).
pub const BSIZE: usize = 4096;

/// Default number of inode slots on a freshly formatted disk.
pub const DEFAULT_NINODES: u64 = 1024;

/// Default disk capacity in blocks (64 MiB at `BSIZE` = 4096).
pub const DEFAULT_NBLOCKS: u64 = 16384;
