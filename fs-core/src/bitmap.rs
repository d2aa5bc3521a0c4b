//! The free-block bitmap: one bit per data-region block, packed into the
//! blocks starting at `bitmap_start`.
//!
//! Grounded in `original_source/block.c`: `cofs_block_alloc` does a
//! first-fit scan that skips whole words of already-set bits
//! (`0xFFFFFFFF`) before falling back to bit-by-bit, and `cofs_block_free`
//! treats clearing an already-clear bit as corruption rather than a no-op.
//! `cofs_scan_block` (here `count_nonzero_words`) counts how many u32 words
//! in a block are nonzero, used by truncate to decide whether an indirect
//! table can be freed outright.

use crate::block_device::BlockDevice;
use crate::buffer_cache::Cache;
use crate::error::{FsError, Result};
use crate::inode::INODES_PER_BLOCK;
use crate::params::BLOCK_SIZE;

/// Bits packed into a single bitmap block.
pub const BITS_PER_BLOCK: u32 = (BLOCK_SIZE as u32) * 8;

/// Number of blocks needed to hold `num_inodes` on-disk inodes.
pub fn inode_table_blocks(num_inodes: u32) -> u32 {
    ceil_div(num_inodes, INODES_PER_BLOCK as u32)
}

/// Number of bitmap blocks needed to track `num_blocks` data blocks.
pub fn bitmap_blocks(num_blocks: u32) -> u32 {
    ceil_div(num_blocks, BITS_PER_BLOCK)
}

fn ceil_div(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

/// Allocate the first free block at or after the data region's start,
/// marking its bit used. Returns the absolute block number, or
/// `FsError::OutOfSpace` if the bitmap is full.
pub fn alloc_block<D: BlockDevice>(
    cache: &Cache<D>,
    bitmap_start: u32,
    num_blocks: u32,
) -> Result<u32> {
    let nbitmap_blocks = bitmap_blocks(num_blocks);
    for bi in 0..nbitmap_blocks {
        let mut guard = cache.get(bitmap_start + bi)?;
        let mut words = read_words(guard.as_slice());
        for (wi, word) in words.iter_mut().enumerate() {
            if *word == u32::MAX {
                continue; // word.c's skip-whole-word fast path
            }
            for bit in 0..32 {
                if *word & (1u32 << bit) == 0 {
                    let blockno = bi * BITS_PER_BLOCK + (wi as u32) * 32 + bit;
                    if blockno >= num_blocks {
                        break;
                    }
                    *word |= 1u32 << bit;
                    write_words(guard.as_mut_slice(), &words);
                    guard.release();
                    log::debug!("alloc_block: allocated block {blockno}");
                    return Ok(blockno);
                }
            }
        }
    }
    log::warn!("alloc_block: bitmap exhausted ({num_blocks} blocks)");
    Err(FsError::OutOfSpace)
}

/// Clear `blockno`'s bit. Clearing an already-clear bit is filesystem
/// corruption (a double free), not a silent no-op.
pub fn free_block<D: BlockDevice>(cache: &Cache<D>, bitmap_start: u32, blockno: u32) -> Result<()> {
    let bi = blockno / BITS_PER_BLOCK;
    let bit_in_block = blockno % BITS_PER_BLOCK;
    let wi = (bit_in_block / 32) as usize;
    let bit = bit_in_block % 32;

    let mut guard = cache.get(bitmap_start + bi)?;
    let mut words = read_words(guard.as_slice());
    if words[wi] & (1u32 << bit) == 0 {
        return Err(FsError::Corruption(format!(
            "double free of block {blockno}"
        )));
    }
    words[wi] &= !(1u32 << bit);
    write_words(guard.as_mut_slice(), &words);
    guard.release();
    Ok(())
}

/// Mark the first `count` blocks used, unconditionally. Used only by the
/// image builder, which tracks free blocks with its own counter instead of
/// reading the bitmap back (mirrors `mkfs.c`'s `block_alloc`).
pub fn mark_used<D: BlockDevice>(cache: &Cache<D>, bitmap_start: u32, count: u32) -> Result<()> {
    let nbitmap_blocks = bitmap_blocks(count.max(1));
    for bi in 0..nbitmap_blocks {
        let mut guard = cache.get_zeroed(bitmap_start + bi);
        let mut words = read_words(guard.as_slice());
        for (wi, word) in words.iter_mut().enumerate() {
            for bit in 0..32 {
                let blockno = bi * BITS_PER_BLOCK + (wi as u32) * 32 + bit;
                if blockno < count {
                    *word |= 1u32 << bit;
                }
            }
        }
        write_words(guard.as_mut_slice(), &words);
        guard.release();
    }
    Ok(())
}

/// Count the nonzero 32-bit words in a block's worth of pointers. Used by
/// truncate to decide whether an indirect table is now entirely empty and
/// can itself be freed.
pub fn count_nonzero_words(block: &[u8]) -> usize {
    block.chunks_exact(4).filter(|w| w != &[0, 0, 0, 0]).count()
}

/// Decode a block's bytes into native-endian `u32` words. Goes through
/// `chunks_exact` rather than a cast so it never assumes the byte buffer is
/// 4-byte aligned.
fn read_words(block: &[u8]) -> Vec<u32> {
    block
        .chunks_exact(4)
        .map(|w| u32::from_ne_bytes(w.try_into().unwrap()))
        .collect()
}

/// Encode `words` back into `block`'s bytes.
fn write_words(block: &mut [u8], words: &[u32]) {
    for (chunk, word) in block.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_ne_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_device::MemDevice;

    #[test]
    fn alloc_then_free_roundtrips() {
        let cache = Cache::new(MemDevice::new(16));
        let a = alloc_block(&cache, 0, 64).unwrap();
        let b = alloc_block(&cache, 0, 64).unwrap();
        assert_ne!(a, b);
        free_block(&cache, 0, a).unwrap();
        let c = alloc_block(&cache, 0, 64).unwrap();
        assert_eq!(a, c, "first-fit should reuse the freed block");
    }

    #[test]
    fn double_free_is_corruption() {
        let cache = Cache::new(MemDevice::new(16));
        let a = alloc_block(&cache, 0, 64).unwrap();
        free_block(&cache, 0, a).unwrap();
        assert!(matches!(
            free_block(&cache, 0, a),
            Err(FsError::Corruption(_))
        ));
    }

    #[test]
    fn exhaustion_is_out_of_space() {
        let cache = Cache::new(MemDevice::new(4));
        for _ in 0..32 {
            alloc_block(&cache, 0, 32).unwrap();
        }
        assert!(matches!(
            alloc_block(&cache, 0, 32),
            Err(FsError::OutOfSpace)
        ));
    }

    #[test]
    fn alloc_returns_a_zeroed_block() {
        let cache = Cache::new(MemDevice::new(16));
        // poison the region with garbage first, to prove alloc zeroes it
        // rather than happening to find already-zero bytes.
        for b in 4..16 {
            let mut guard = cache.get(b).unwrap();
            guard.as_mut_slice().fill(0xAA);
            guard.release();
        }
        let b = alloc_block(&cache, 0, 16).unwrap();
        let guard = cache.get(b).unwrap();
        assert!(guard.as_slice().iter().all(|&byte| byte == 0));
    }

    proptest::proptest! {
        /// Property 1 (spec.md §8): after any sequence of allocs/frees
        /// where every freed block was previously allocated, the set of
        /// bits set in the bitmap equals the set of currently-allocated
        /// blocks.
        #[test]
        fn alloc_free_sequence_matches_bitmap(
            ops in proptest::collection::vec(proptest::bool::ANY, 1..200)
        ) {
            let total = 256u32;
            let cache = Cache::new(MemDevice::new(total as usize + 8));
            let mut allocated: std::collections::HashSet<u32> = std::collections::HashSet::new();

            for do_alloc in ops {
                if do_alloc || allocated.is_empty() {
                    if let Ok(b) = alloc_block(&cache, 0, total) {
                        proptest::prop_assert!(allocated.insert(b));
                    }
                } else {
                    let &victim = allocated.iter().next().unwrap();
                    allocated.remove(&victim);
                    free_block(&cache, 0, victim).unwrap();
                }
            }

            for bi in 0..bitmap_blocks(total) {
                let guard = cache.get(bi).unwrap();
                let words = read_words(guard.as_slice());
                for (wi, word) in words.iter().enumerate() {
                    for bit in 0..32 {
                        let blockno = bi * BITS_PER_BLOCK + (wi as u32) * 32 + bit;
                        if blockno >= total {
                            continue;
                        }
                        let is_set = word & (1u32 << bit) != 0;
                        proptest::prop_assert_eq!(is_set, allocated.contains(&blockno));
                    }
                }
            }
        }
    }
}
