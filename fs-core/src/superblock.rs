//! The on-disk superblock (block 1) and its in-memory counterpart.
//!
//! Layout follows `cofs_common.h`'s `cofs_superblock_t`; the magic check at
//! mount time follows `original_source/super.c`'s `cofs_super_block_read`.

use bytemuck::{Pod, Zeroable};

use crate::block_device::BlockDevice;
use crate::buffer_cache::Cache;
use crate::error::{FsError, Result};
use crate::params::FS_MAGIC;

/// Byte-for-byte layout of the superblock as it sits in block 0.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct RawSuperblock {
    pub magic: u32,
    pub size: u32,
    pub num_blocks: u32,
    pub num_inodes: u32,
    pub bitmap_start: u32,
    pub inode_start: u32,
}

/// The superblock block number. Block 0 is always unused (spec.md §3's
/// layout: `[0] unused [1] superblock [bitmap_start..] bitmap blocks ...`).
pub const SUPERBLOCK_NO: u32 = 1;

/// In-memory superblock, read once at mount and held for the filesystem's
/// lifetime (cofs never resizes, so these fields never change after mkfs).
#[derive(Clone, Copy, Debug)]
pub struct SuperBlock {
    pub size: u32,
    pub num_blocks: u32,
    pub num_inodes: u32,
    pub bitmap_start: u32,
    pub inode_start: u32,
    /// First block of the data region: right after the inode table.
    pub data_start: u32,
}

impl SuperBlock {
    /// Read and validate the superblock from block 1.
    pub fn read<D: BlockDevice>(cache: &Cache<D>) -> Result<Self> {
        let guard = cache.get(SUPERBLOCK_NO)?;
        let raw: RawSuperblock = bytemuck::pod_read_unaligned(guard.as_slice());
        drop(guard);

        if raw.magic != FS_MAGIC {
            log::error!(
                "refusing to mount: bad superblock magic {:#010x} (expected {:#010x})",
                raw.magic,
                FS_MAGIC
            );
            return Err(FsError::InvalidFormat {
                found: raw.magic,
                expected: FS_MAGIC,
            });
        }

        let num_inode_blocks = crate::bitmap::inode_table_blocks(raw.num_inodes);
        let data_start = raw.inode_start + num_inode_blocks;

        Ok(SuperBlock {
            size: raw.size,
            num_blocks: raw.num_blocks,
            num_inodes: raw.num_inodes,
            bitmap_start: raw.bitmap_start,
            inode_start: raw.inode_start,
            data_start,
        })
    }

    /// Serialize and write this superblock to block 1.
    pub fn write<D: BlockDevice>(&self, cache: &Cache<D>) -> Result<()> {
        let raw = RawSuperblock {
            magic: FS_MAGIC,
            size: self.size,
            num_blocks: self.num_blocks,
            num_inodes: self.num_inodes,
            bitmap_start: self.bitmap_start,
            inode_start: self.inode_start,
        };
        let mut guard = cache.get_zeroed(SUPERBLOCK_NO);
        guard.as_mut_slice()[..std::mem::size_of::<RawSuperblock>()]
            .copy_from_slice(bytemuck::bytes_of(&raw));
        guard.release();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_device::MemDevice;

    #[test]
    fn roundtrip() {
        let cache = Cache::new(MemDevice::new(64));
        let sb = SuperBlock {
            size: 64,
            num_blocks: 64,
            num_inodes: 32,
            bitmap_start: 2,
            inode_start: 3,
            data_start: 7,
        };
        sb.write(&cache).unwrap();
        let back = SuperBlock::read(&cache).unwrap();
        assert_eq!(back.size, sb.size);
        assert_eq!(back.bitmap_start, sb.bitmap_start);
        assert_eq!(back.data_start, sb.data_start);
    }

    #[test]
    fn rejects_bad_magic() {
        let cache = Cache::new(MemDevice::new(8));
        // block 1 stays all-zero: magic 0 != FS_MAGIC
        assert!(matches!(
            SuperBlock::read(&cache),
            Err(FsError::InvalidFormat { .. })
        ));
    }
}
