//! Error types returned by every fallible `fs-core` operation.
//!
//! The original kernel module signals failure with a bare `-1` return or a
//! `NULL` pointer and logs the detail with `pr_err`/`pr_warn`. Here each of
//! those call sites gets its own variant so a caller can match on *why*
//! instead of re-deriving it from a log line.

use thiserror::Error;

/// Errors produced by `fs-core`.
#[derive(Debug, Error)]
pub enum FsError {
    /// The underlying block device failed a read or write.
    #[error("I/O error on block {block}: {source}")]
    Io {
        block: u32,
        #[source]
        source: std::io::Error,
    },

    /// The bitmap has no free blocks left.
    #[error("no free blocks remaining")]
    OutOfSpace,

    /// The inode table has no free slots left.
    #[error("no free inodes remaining")]
    OutOfInodes,

    /// An offset or length exceeds `MAX_FILE_BLOCKS` worth of bytes.
    #[error("file offset {0} exceeds the maximum representable file size")]
    TooLarge(u64),

    /// A bitmap bit was freed that was already clear, or a block number
    /// was out of range for the block region.
    #[error("filesystem corruption: {0}")]
    Corruption(String),

    /// The superblock magic did not match `FS_MAGIC`.
    #[error("not a cofs image: bad magic {found:#010x}, expected {expected:#010x}")]
    InvalidFormat { found: u32, expected: u32 },

    /// A path component that should be a directory was not one.
    #[error("not a directory (inode {0})")]
    NotADirectory(u32),

    /// A directory entry name exceeded `DIRENT_NAME_MAX` bytes.
    #[error("name {0:?} is longer than the {1}-byte limit")]
    NameTooLong(String, usize),

    /// `dir_link` was asked to insert a name that already exists.
    #[error("{0:?} already exists in directory {1}")]
    AlreadyExists(String, u32),

    /// A lookup failed to find the requested name.
    #[error("{0:?} not found in directory {1}")]
    NotFound(String, u32),

    /// `truncate` was asked to grow a file, or an offset was otherwise
    /// nonsensical for the operation.
    #[error("invalid offset: {0}")]
    InvalidOffset(String),
}

impl FsError {
    pub(crate) fn io(block: u32, source: std::io::Error) -> Self {
        FsError::Io { block, source }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
