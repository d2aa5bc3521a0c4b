//! The seam between the filesystem logic and whatever backs it: a real
//! file, a block device, or (in tests) an in-memory vector.
//!
//! Grounded in the `BlockDevice` trait pattern used by other crates in this
//! space (see `other_examples/.../fs-core-src-layout.rs`), generalized here
//! to cofs's fixed `BLOCK_SIZE`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{FsError, Result};
use crate::params::BLOCK_SIZE;

/// A fixed-size block of bytes read from or written to a `BlockDevice`.
pub type Block = [u8; BLOCK_SIZE];

/// Anything that can serve up `BLOCK_SIZE`-byte blocks by number.
///
/// Implementors need not be thread-safe; `fs-core` does not share a device
/// across threads (see spec.md's concurrency notes: single-writer, no
/// internal locking).
pub trait BlockDevice {
    /// Read block `blockno` into `buf`.
    fn read_block(&mut self, blockno: u32, buf: &mut Block) -> Result<()>;

    /// Write `buf` to block `blockno`.
    fn write_block(&mut self, blockno: u32, buf: &Block) -> Result<()>;

    /// Total number of `BLOCK_SIZE` blocks this device exposes.
    fn num_blocks(&self) -> u32;
}

/// A `BlockDevice` backed by a regular file (or block special file) opened
/// for read/write.
pub struct FileDevice {
    file: File,
    num_blocks: u32,
}

impl FileDevice {
    /// Wrap `file`, treating it as exactly `num_blocks` blocks long.
    /// Callers (mkfs) are responsible for sizing/truncating the file first.
    pub fn new(file: File, num_blocks: u32) -> Self {
        FileDevice { file, num_blocks }
    }

    fn seek_to(&mut self, blockno: u32) -> Result<()> {
        let offset = (blockno as u64) * (BLOCK_SIZE as u64);
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| FsError::io(blockno, e))?;
        Ok(())
    }
}

impl BlockDevice for FileDevice {
    fn read_block(&mut self, blockno: u32, buf: &mut Block) -> Result<()> {
        self.seek_to(blockno)?;
        self.file
            .read_exact(buf)
            .map_err(|e| FsError::io(blockno, e))
    }

    fn write_block(&mut self, blockno: u32, buf: &Block) -> Result<()> {
        self.seek_to(blockno)?;
        self.file
            .write_all(buf)
            .map_err(|e| FsError::io(blockno, e))
    }

    fn num_blocks(&self) -> u32 {
        self.num_blocks
    }
}

/// An in-memory `BlockDevice`, used by unit and integration tests so they
/// don't need a real filesystem path.
pub struct MemDevice {
    blocks: Vec<Block>,
}

impl MemDevice {
    pub fn new(num_blocks: u32) -> Self {
        MemDevice {
            blocks: vec![[0u8; BLOCK_SIZE]; num_blocks as usize],
        }
    }
}

impl BlockDevice for MemDevice {
    fn read_block(&mut self, blockno: u32, buf: &mut Block) -> Result<()> {
        let block = self.blocks.get(blockno as usize).ok_or_else(|| {
            FsError::Corruption(format!("read of out-of-range block {blockno}"))
        })?;
        buf.copy_from_slice(block);
        Ok(())
    }

    fn write_block(&mut self, blockno: u32, buf: &Block) -> Result<()> {
        let block = self.blocks.get_mut(blockno as usize).ok_or_else(|| {
            FsError::Corruption(format!("write of out-of-range block {blockno}"))
        })?;
        block.copy_from_slice(buf);
        Ok(())
    }

    fn num_blocks(&self) -> u32 {
        self.blocks.len() as u32
    }
}
