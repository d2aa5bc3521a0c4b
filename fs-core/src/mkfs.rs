//! Offline image formatting: lay out a fresh superblock, bitmap and inode
//! table on a blank device and seed a root directory, mirroring
//! `original_source/mkfs.c`'s `main` and the teacher's `mkfs/src/main.rs`.
//!
//! Unlike `mkfs.c`, which tracks free blocks with its own counter to avoid
//! touching the runtime bitmap allocator, this builder marks the metadata
//! region used once via `bitmap::mark_used` and then drives the ordinary
//! `FileSystem` API (`mknod`, `write`) for everything after — the
//! allocator is cheap enough here that there's no reason to duplicate it.

use crate::bitmap::{bitmap_blocks, inode_table_blocks, mark_used};
use crate::block_device::BlockDevice;
use crate::buffer_cache::Cache;
use crate::error::{FsError, Result};
use crate::fs::FileSystem;
use crate::inode::{self, InodeType};
use crate::params::ROOT_INO;
use crate::superblock::{SuperBlock, SUPERBLOCK_NO};

/// The minimum number of inodes a formatted image carries, regardless of
/// size, so tiny test images still have room for more than the root.
const MIN_INODES: u32 = 16;

/// Bytes of data per inode `mkfs.c` budgets for when sizing the inode
/// table (`cofs_size * BLOCK_SIZE / 4096`).
const BYTES_PER_INODE: u32 = 4096;

/// Drives the construction of a fresh cofs image.
pub struct ImageBuilder<D: BlockDevice> {
    fs: FileSystem<D>,
}

impl<D: BlockDevice> ImageBuilder<D> {
    /// Format `device`, which must already be sized to hold `num_blocks`
    /// `BLOCK_SIZE` blocks, and seed an empty root directory.
    pub fn format(device: D, num_blocks: u32) -> Result<Self> {
        let num_inodes = (num_blocks * crate::params::BLOCK_SIZE as u32 / BYTES_PER_INODE).max(MIN_INODES);
        let bitmap_size = bitmap_blocks(num_blocks);
        let inodes_size = inode_table_blocks(num_inodes);
        let bitmap_start = SUPERBLOCK_NO + 1;
        let inode_start = bitmap_start + bitmap_size;
        // Block 0 (unused) and the superblock itself are metadata too, so
        // the bitmap marks them allocated right alongside the bitmap and
        // inode-table blocks: spec.md §3's layout is
        // `[0] unused [1] superblock [bitmap_start..] bitmap ...`.
        let num_meta_blocks = inode_start + inodes_size;

        log::info!(
            "formatting cofs image: {num_blocks} blocks, {num_inodes} inodes, \
             {num_meta_blocks} metadata blocks (bitmap at {bitmap_start}, inodes at {inode_start})"
        );

        let cache = Cache::new(device);

        // spec.md §4.8 step 3: a format wipes whatever the image held
        // before, metadata and data alike, so a reformat never leaks a
        // prior filesystem's bytes through an unallocated block.
        for b in 0..num_blocks {
            cache.get_zeroed(b).release();
        }

        let sb = SuperBlock {
            size: num_blocks,
            num_blocks,
            num_inodes,
            bitmap_start,
            inode_start,
            data_start: inode_start + inodes_size,
        };
        sb.write(&cache)?;
        mark_used(&cache, bitmap_start, num_meta_blocks)?;

        let mut root = inode::alloc_inode(&cache, inode_start, num_inodes, InodeType::Dir)?;
        assert_eq!(root.ino, ROOT_INO, "root directory must be the first inode allocated");
        root.nlink = 2;
        crate::dir::link(&cache, bitmap_start, &mut root, ".", root.ino)?;
        crate::dir::link(&cache, bitmap_start, &mut root, "..", root.ino)?;
        // spec.md:176: the root directory's size rounds up to a whole block.
        debug_assert_eq!(root.size % crate::params::BLOCK_SIZE as u32, 0);
        inode::iput(&cache, inode_start, &root)?;

        let fs = FileSystem::mount_prebuilt(cache, sb);
        Ok(ImageBuilder { fs })
    }

    /// Seed a regular file at the root with the given contents. Returns an
    /// error if `name` already exists.
    pub fn add_file(&mut self, name: &str, contents: &[u8]) -> Result<()> {
        let mut root = self.fs.root()?;
        let mut node = self.fs.create(&mut root, name)?;
        self.fs.write(&mut node, 0, contents)?;
        Ok(())
    }

    /// Finish building and hand back the mounted filesystem.
    pub fn finish(self) -> Result<FileSystem<D>> {
        self.fs.flush()?;
        Ok(self.fs)
    }

    /// Finish building and hand back the raw device (e.g. to close the
    /// file it's backed by).
    pub fn into_device(self) -> std::result::Result<D, FsError> {
        self.fs.into_device()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_device::MemDevice;

    #[test]
    fn format_creates_root_with_dot_entries() {
        let device = MemDevice::new(256);
        let builder = ImageBuilder::format(device, 256).unwrap();
        let fs = builder.finish().unwrap();
        let root = fs.root().unwrap();
        assert_eq!(root.kind, InodeType::Dir);

        let entries = fs.readdir(&root).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"."));
        assert!(names.contains(&".."));
    }

    #[test]
    fn seeded_file_is_readable_after_format() {
        let device = MemDevice::new(256);
        let mut builder = ImageBuilder::format(device, 256).unwrap();
        builder.add_file("readme.txt", b"welcome to cofs").unwrap();
        let fs = builder.finish().unwrap();

        let node = fs.namei("readme.txt").unwrap();
        let mut buf = vec![0u8; b"welcome to cofs".len()];
        fs.read(&node, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"welcome to cofs");
    }

    #[test]
    fn formatted_image_remounts_cleanly() {
        let device = MemDevice::new(256);
        let builder = ImageBuilder::format(device, 256).unwrap();
        let device = builder.into_device().unwrap();
        let fs = FileSystem::mount(device).unwrap();
        assert_eq!(fs.superblock().size, 256);
        assert_eq!(fs.superblock().num_blocks, 256);
    }
}
