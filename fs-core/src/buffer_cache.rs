//! A small buffer cache sitting in front of a `BlockDevice`.
//!
//! The teacher's `kernel/src/bio.rs` keeps a fixed-size LRU ring of `Buf`
//! structs, each with a sleeplock, guarded by a global spinlock, because it
//! runs inside a multi-threaded kernel. None of that applies here — cofs is
//! explicitly single-writer with no internal locking (see spec.md's
//! concurrency notes) — so this cache keeps the same *idea* (don't go to
//! the device twice for the same block) with value-semantics guards instead
//! of shared mutable buffers: `get` hands out an owned copy of the block's
//! bytes, and `release`/`Drop` writes it back through the cache into the
//! dirty set only if the guard was actually mutated. This sidesteps
//! borrow-checker conflicts when one block's logic (e.g. an indirect table)
//! needs to call into another operation (e.g. the bitmap allocator) while
//! "holding" a block open.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::block_device::{Block, BlockDevice};
use crate::error::Result;
use crate::params::BLOCK_SIZE;

struct Inner<D: BlockDevice> {
    device: D,
    /// Blocks read or written since the last `flush`, keyed by block number.
    dirty: HashMap<u32, Block>,
}

impl<D: BlockDevice> Inner<D> {
    fn read(&mut self, blockno: u32) -> Result<Block> {
        if let Some(cached) = self.dirty.get(&blockno) {
            return Ok(*cached);
        }
        let mut buf = [0u8; BLOCK_SIZE];
        self.device.read_block(blockno, &mut buf)?;
        Ok(buf)
    }

    fn write(&mut self, blockno: u32, data: Block) {
        self.dirty.insert(blockno, data);
    }

    fn flush(&mut self) -> Result<()> {
        for (&blockno, data) in self.dirty.iter() {
            self.device.write_block(blockno, data)?;
        }
        self.dirty.clear();
        Ok(())
    }
}

/// A cloneable handle onto the shared cache state. Cheap to clone (it's a
/// refcounted pointer), so call sites that need to recurse into another
/// subsystem (bitmap, directory lookup) while working on a block can just
/// clone the handle rather than thread a borrow through.
pub struct Cache<D: BlockDevice> {
    inner: Rc<RefCell<Inner<D>>>,
}

impl<D: BlockDevice> Clone for Cache<D> {
    fn clone(&self) -> Self {
        Cache {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<D: BlockDevice> Cache<D> {
    pub fn new(device: D) -> Self {
        Cache {
            inner: Rc::new(RefCell::new(Inner {
                device,
                dirty: HashMap::new(),
            })),
        }
    }

    /// Read block `blockno`, returning an owned guard over its bytes.
    pub fn get(&self, blockno: u32) -> Result<BlockGuard<D>> {
        let data = self.inner.borrow_mut().read(blockno)?;
        Ok(BlockGuard {
            cache: self.clone(),
            blockno,
            data,
            dirty: false,
            written: false,
        })
    }

    /// Zero-initialize block `blockno` without reading it first (used when
    /// formatting or extending a file, where the old contents don't matter).
    /// Dirty from the start: the whole point of this call is to make the
    /// zeroed bytes reach the device, even if the caller never mutates them.
    pub fn get_zeroed(&self, blockno: u32) -> BlockGuard<D> {
        BlockGuard {
            cache: self.clone(),
            blockno,
            data: [0u8; BLOCK_SIZE],
            dirty: true,
            written: false,
        }
    }

    /// Number of blocks on the underlying device.
    pub fn num_blocks(&self) -> u32 {
        self.inner.borrow().device.num_blocks()
    }

    /// Push every dirty block down to the device.
    pub fn flush(&self) -> Result<()> {
        self.inner.borrow_mut().flush()
    }

    /// Flush and unwrap the underlying device, for callers (mkfs) that
    /// built an image in memory/on a handle and now want it back. Returns
    /// `Err(self)` unchanged if another clone of this cache is still alive.
    pub fn into_device(self) -> std::result::Result<D, Self> {
        if self.flush().is_err() {
            return Err(self);
        }
        match Rc::try_unwrap(self.inner) {
            Ok(cell) => Ok(cell.into_inner().device),
            Err(inner) => Err(Cache { inner }),
        }
    }
}

/// An owned copy of one block's bytes, plus a handle back to the cache it
/// came from. Read it, mutate it, and either call `release()` to persist
/// the change or let it drop — a guard that was never mutated through
/// `as_mut_slice()` drops as a no-op, matching a plain read.
pub struct BlockGuard<D: BlockDevice> {
    cache: Cache<D>,
    blockno: u32,
    data: Block,
    /// Set once the caller takes a mutable view. `get_zeroed` starts dirty
    /// unconditionally, since its whole purpose is writing zeros.
    dirty: bool,
    written: bool,
}

impl<D: BlockDevice> BlockGuard<D> {
    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.dirty = true;
        &mut self.data
    }

    /// Mark this block dirty and hand it back to the cache now, rather than
    /// waiting for `Drop`. Prefer this at the end of any scope that mutated
    /// the block — it makes the write point visible at the call site.
    pub fn release(mut self) {
        self.cache.inner.borrow_mut().write(self.blockno, self.data);
        self.written = true;
    }
}

impl<D: BlockDevice> Drop for BlockGuard<D> {
    fn drop(&mut self) {
        if self.dirty && !self.written {
            // A guard that was mutated but never explicitly released still
            // needs to reach the device; a guard that was only read never
            // sets `dirty` and drops without touching the cache.
            self.cache.inner.borrow_mut().write(self.blockno, self.data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_device::MemDevice;

    #[test]
    fn read_only_guard_dropped_without_release_does_not_dirty_the_cache() {
        let cache = Cache::new(MemDevice::new(4));
        {
            let guard = cache.get(0).unwrap();
            let _ = guard.as_slice();
        }
        assert!(cache.inner.borrow().dirty.is_empty());
    }

    #[test]
    fn mutated_guard_dropped_without_release_still_reaches_flush() {
        let cache = Cache::new(MemDevice::new(4));
        {
            let mut guard = cache.get(0).unwrap();
            guard.as_mut_slice()[0] = 0x42;
        }
        cache.flush().unwrap();
        let guard = cache.get(0).unwrap();
        assert_eq!(guard.as_slice()[0], 0x42);
    }

    #[test]
    fn get_zeroed_writes_back_even_without_mutation() {
        let cache = Cache::new(MemDevice::new(4));
        {
            let mut guard = cache.get(0).unwrap();
            guard.as_mut_slice()[0] = 0xFF;
            guard.release();
        }
        cache.get_zeroed(0).release();
        let guard = cache.get(0).unwrap();
        assert_eq!(guard.as_slice()[0], 0);
    }
}
