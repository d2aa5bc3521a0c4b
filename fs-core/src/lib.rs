//! cofs: the on-disk layout and block-management core of a small
//! Unix-style filesystem.
//!
//! This crate covers exactly what spec.md scopes in: the superblock,
//! block bitmap, inode table, the direct/single-indirect/double-indirect
//! block map (`bmap`), file I/O on top of it, slotted directory entries,
//! and an offline image builder (`mkfs`). It does not integrate with any
//! host VFS — `FileSystem<D>` is a plain value a caller owns and drives.

pub mod bitmap;
pub mod block_device;
pub mod buffer_cache;
pub mod dir;
pub mod error;
pub mod fs;
pub mod inode;
pub mod mkfs;
pub mod params;
pub mod superblock;

pub use block_device::{Block, BlockDevice, FileDevice, MemDevice};
pub use error::{FsError, Result};
pub use fs::{FileSystem, Stat};
pub use inode::{Inode, InodeType};
pub use mkfs::ImageBuilder;
pub use superblock::SuperBlock;
