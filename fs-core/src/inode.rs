//! On-disk inodes, the block-pointer tree (`bmap`), and the file I/O that
//! sits on top of it.
//!
//! Layout follows `cofs_common.h`'s `cofs_inode_t`. `bmap`'s three cases
//! (direct, single-indirect, double-indirect) and `truncate`'s pruning walk
//! are grounded in `original_source/block.c`'s `cofs_get_real_block` and
//! `original_source/inode.c`'s `cofs_truncate`, with the two bugs spec.md
//! §9 calls out corrected: DIND indexing is zone-relative, and the
//! truncate upper bound is a ceiling division, not `size/B + 1`.

use std::time::{SystemTime, UNIX_EPOCH};

use bytemuck::{Pod, Zeroable};

use crate::bitmap::{self, count_nonzero_words};
use crate::block_device::BlockDevice;
use crate::buffer_cache::Cache;
use crate::error::{FsError, Result};
use crate::params::{BLOCK_SIZE, DIND_IDX, MAX_FILE_BLOCKS, NUM_ADDRS, NUM_DIRECT, PTRS_PER_BLOCK, SIND_IDX};

/// Byte-for-byte layout of one inode record.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct RawInode {
    pub kind: u16,
    pub major: u16,
    pub minor: u16,
    pub uid: u16,
    pub gid: u16,
    pub num_links: u16,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub size: u32,
    pub addrs: [u32; NUM_ADDRS],
}

pub const INODE_SIZE: usize = std::mem::size_of::<RawInode>();
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

const _: () = assert!(INODE_SIZE * INODES_PER_BLOCK <= BLOCK_SIZE);

/// What an inode record represents. `Unknown` covers the original's
/// default-case warning path for a type byte that doesn't match anything
/// cofs defines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InodeType {
    Free,
    File,
    Dir,
    Dev,
    Unknown(u16),
}

impl InodeType {
    fn from_raw(v: u16) -> Self {
        match v {
            0 => InodeType::Free,
            1 => InodeType::File,
            2 => InodeType::Dir,
            3 => InodeType::Dev,
            other => {
                log::warn!("inode has unrecognized type tag {other}");
                InodeType::Unknown(other)
            }
        }
    }

    fn to_raw(self) -> u16 {
        match self {
            InodeType::Free => 0,
            InodeType::File => 1,
            InodeType::Dir => 2,
            InodeType::Dev => 3,
            InodeType::Unknown(v) => v,
        }
    }
}

/// The in-memory form of an inode: a plain owned value. Unlike the
/// teacher's `no_std` `ITable`, there is no global refcounted cache here —
/// open-file reference counting is VFS territory and out of scope (spec.md
/// §1). Callers load one with `iget`, mutate it, and persist it with
/// `iput`.
#[derive(Clone, Debug)]
pub struct Inode {
    pub ino: u32,
    pub kind: InodeType,
    pub major: u16,
    pub minor: u16,
    pub uid: u16,
    pub gid: u16,
    pub nlink: u16,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub size: u32,
    pub addrs: [u32; NUM_ADDRS],
}

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

fn inode_block(inode_start: u32, ino: u32) -> u32 {
    inode_start + ino / (INODES_PER_BLOCK as u32)
}

fn inode_offset(ino: u32) -> usize {
    (ino as usize % INODES_PER_BLOCK) * INODE_SIZE
}

impl Inode {
    fn from_raw(ino: u32, raw: &RawInode) -> Self {
        Inode {
            ino,
            kind: InodeType::from_raw(raw.kind),
            major: raw.major,
            minor: raw.minor,
            uid: raw.uid,
            gid: raw.gid,
            nlink: raw.num_links,
            atime: raw.atime,
            mtime: raw.mtime,
            ctime: raw.ctime,
            size: raw.size,
            addrs: raw.addrs,
        }
    }

    fn to_raw(&self) -> RawInode {
        RawInode {
            kind: self.kind.to_raw(),
            major: self.major,
            minor: self.minor,
            uid: self.uid,
            gid: self.gid,
            num_links: self.nlink,
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
            size: self.size,
            addrs: self.addrs,
        }
    }
}

/// Read inode `ino` off disk.
pub fn iget<D: BlockDevice>(cache: &Cache<D>, inode_start: u32, ino: u32) -> Result<Inode> {
    let guard = cache.get(inode_block(inode_start, ino))?;
    let off = inode_offset(ino);
    let raw: RawInode = bytemuck::pod_read_unaligned(&guard.as_slice()[off..off + INODE_SIZE]);
    Ok(Inode::from_raw(ino, &raw))
}

/// Write `inode` back to its slot. Always serializes the full record,
/// `addrs` included (spec.md §9's resolved question 6: nothing here can go
/// stale behind an owned value's back).
pub fn iput<D: BlockDevice>(cache: &Cache<D>, inode_start: u32, inode: &Inode) -> Result<()> {
    let mut guard = cache.get(inode_block(inode_start, inode.ino))?;
    let off = inode_offset(inode.ino);
    let raw = inode.to_raw();
    guard.as_mut_slice()[off..off + INODE_SIZE].copy_from_slice(bytemuck::bytes_of(&raw));
    guard.release();
    Ok(())
}

/// Scan the inode table for a free slot, skipping inode 0 (reserved as the
/// "no inode" sentinel, mirroring `cofs_inode_alloc`'s start-at-1 scan).
pub fn alloc_inode<D: BlockDevice>(
    cache: &Cache<D>,
    inode_start: u32,
    num_inodes: u32,
    kind: InodeType,
) -> Result<Inode> {
    for ino in 1..num_inodes {
        let existing = iget(cache, inode_start, ino)?;
        if existing.kind == InodeType::Free {
            if ino > num_inodes / 2 {
                log::debug!("alloc_inode: linear scan reached inode {ino} of {num_inodes}");
            }
            let t = now();
            let inode = Inode {
                ino,
                kind,
                major: 0,
                minor: 0,
                uid: 0,
                gid: 0,
                nlink: 0,
                atime: t,
                mtime: t,
                ctime: t,
                size: 0,
                addrs: [0; NUM_ADDRS],
            };
            iput(cache, inode_start, &inode)?;
            return Ok(inode);
        }
    }
    log::warn!("alloc_inode: inode table exhausted ({num_inodes} inodes)");
    Err(FsError::OutOfInodes)
}

/// Release `inode` from the caller's hands. If it still has links, this is
/// a no-op (the slot stays live on disk for its next `iget`). Once
/// `nlink` has dropped to zero, free every data block it owns and mark the
/// slot free on disk (spec.md §4.4's `evict`).
pub fn evict<D: BlockDevice>(
    cache: &Cache<D>,
    inode_start: u32,
    bitmap_start: u32,
    inode: &mut Inode,
) -> Result<()> {
    if inode.nlink > 0 {
        return Ok(());
    }
    truncate(cache, bitmap_start, inode, 0)?;
    inode.kind = InodeType::Free;
    iput(cache, inode_start, inode)
}

/// Translate logical block `lbn` (0-based) to a physical block number,
/// allocating new blocks (and indirect tables) as needed. `None` logical
/// positions beyond `MAX_FILE_BLOCKS` are rejected before any allocation
/// happens.
pub fn bmap<D: BlockDevice>(
    cache: &Cache<D>,
    bitmap_start: u32,
    inode: &mut Inode,
    lbn: usize,
) -> Result<u32> {
    if lbn >= MAX_FILE_BLOCKS {
        return Err(FsError::TooLarge((lbn as u64) * (BLOCK_SIZE as u64)));
    }

    if lbn < NUM_DIRECT {
        return get_or_alloc(cache, bitmap_start, &mut inode.addrs[lbn]);
    }

    if lbn < NUM_DIRECT + PTRS_PER_BLOCK {
        let sind = get_or_alloc(cache, bitmap_start, &mut inode.addrs[SIND_IDX])?;
        return bmap_table_slot(cache, bitmap_start, sind, lbn - NUM_DIRECT);
    }

    // Double-indirect: the corrected, zone-relative indexing (spec.md §9,
    // resolved question 1) rather than the original's raw r/W, r%W.
    let rel = lbn - NUM_DIRECT - PTRS_PER_BLOCK;
    let sidx = rel / PTRS_PER_BLOCK;
    let didx = rel % PTRS_PER_BLOCK;

    let dind = get_or_alloc(cache, bitmap_start, &mut inode.addrs[DIND_IDX])?;
    let sind = bmap_table_slot(cache, bitmap_start, dind, sidx)?;
    bmap_table_slot(cache, bitmap_start, sind, didx)
}

/// Read-only `bmap`: never allocates. Used by `read`, which must not
/// mutate the inode it's reading from. A logical block past the end of
/// what's allocated reads back as "no block" (i.e. a hole, read as zeros).
pub fn bmap_read<D: BlockDevice>(cache: &Cache<D>, inode: &Inode, lbn: usize) -> Result<Option<u32>> {
    if lbn >= MAX_FILE_BLOCKS {
        return Err(FsError::TooLarge((lbn as u64) * (BLOCK_SIZE as u64)));
    }

    if lbn < NUM_DIRECT {
        return Ok(nonzero(inode.addrs[lbn]));
    }

    if lbn < NUM_DIRECT + PTRS_PER_BLOCK {
        let Some(sind) = nonzero(inode.addrs[SIND_IDX]) else {
            return Ok(None);
        };
        return Ok(read_table_slot(cache, sind, lbn - NUM_DIRECT)?);
    }

    let rel = lbn - NUM_DIRECT - PTRS_PER_BLOCK;
    let sidx = rel / PTRS_PER_BLOCK;
    let didx = rel % PTRS_PER_BLOCK;

    let Some(dind) = nonzero(inode.addrs[DIND_IDX]) else {
        return Ok(None);
    };
    let Some(sind) = read_table_slot(cache, dind, sidx)? else {
        return Ok(None);
    };
    Ok(read_table_slot(cache, sind, didx)?)
}

fn nonzero(v: u32) -> Option<u32> {
    if v == 0 {
        None
    } else {
        Some(v)
    }
}

fn get_or_alloc<D: BlockDevice>(cache: &Cache<D>, bitmap_start: u32, slot: &mut u32) -> Result<u32> {
    if *slot == 0 {
        let blockno = bitmap::alloc_block(cache, bitmap_start, cache.num_blocks())?;
        cache.get_zeroed(blockno).release();
        *slot = blockno;
    }
    Ok(*slot)
}

fn read_table_slot<D: BlockDevice>(cache: &Cache<D>, table: u32, idx: usize) -> Result<Option<u32>> {
    let guard = cache.get(table)?;
    let off = idx * 4;
    let v = u32::from_ne_bytes(guard.as_slice()[off..off + 4].try_into().unwrap());
    Ok(nonzero(v))
}

fn bmap_table_slot<D: BlockDevice>(
    cache: &Cache<D>,
    bitmap_start: u32,
    table: u32,
    idx: usize,
) -> Result<u32> {
    let mut guard = cache.get(table)?;
    let off = idx * 4;
    let existing = u32::from_ne_bytes(guard.as_slice()[off..off + 4].try_into().unwrap());
    if existing != 0 {
        return Ok(existing);
    }
    drop(guard);
    let blockno = bitmap::alloc_block(cache, bitmap_start, cache.num_blocks())?;
    cache.get_zeroed(blockno).release();

    let mut guard = cache.get(table)?;
    guard.as_mut_slice()[off..off + 4].copy_from_slice(&blockno.to_ne_bytes());
    guard.release();
    Ok(blockno)
}

/// Shrink `inode` to `new_len` bytes, freeing every block beyond the new
/// end and pruning indirect tables that become entirely empty. Growing is
/// rejected (spec.md §9, resolved question 5): files only grow by writing
/// past their current end.
pub fn truncate<D: BlockDevice>(
    cache: &Cache<D>,
    bitmap_start: u32,
    inode: &mut Inode,
    new_len: u32,
) -> Result<()> {
    if new_len > inode.size {
        return Err(FsError::InvalidOffset(format!(
            "truncate to {new_len} exceeds current size {}",
            inode.size
        )));
    }

    let keep_blocks = ceil_div(new_len, BLOCK_SIZE as u32) as usize;
    let old_blocks = ceil_div(inode.size, BLOCK_SIZE as u32) as usize;

    for lbn in keep_blocks..old_blocks.min(NUM_DIRECT) {
        free_slot(cache, bitmap_start, &mut inode.addrs[lbn])?;
    }

    if old_blocks > NUM_DIRECT {
        let sind = inode.addrs[SIND_IDX];
        if sind != 0 {
            let sind_start = keep_blocks.saturating_sub(NUM_DIRECT);
            let sind_end = (old_blocks - NUM_DIRECT).min(PTRS_PER_BLOCK);
            free_table_range(cache, bitmap_start, sind, sind_start, sind_end)?;
            if keep_blocks <= NUM_DIRECT {
                prune_table_if_empty(cache, bitmap_start, &mut inode.addrs[SIND_IDX])?;
            }
        }
    }

    if old_blocks > NUM_DIRECT + PTRS_PER_BLOCK {
        let dind = inode.addrs[DIND_IDX];
        if dind != 0 {
            let base = NUM_DIRECT + PTRS_PER_BLOCK;
            let first_rel = keep_blocks.saturating_sub(base);
            let last_rel = old_blocks - base;
            let first_sidx = first_rel / PTRS_PER_BLOCK;
            let last_sidx = ceil_div(last_rel as u32, PTRS_PER_BLOCK as u32) as usize;

            for sidx in first_sidx..last_sidx {
                let Some(sind) = read_table_slot(cache, dind, sidx)? else {
                    continue;
                };
                let lo = if sidx == first_sidx {
                    first_rel % PTRS_PER_BLOCK
                } else {
                    0
                };
                let hi = if sidx + 1 == last_sidx {
                    let rem = last_rel % PTRS_PER_BLOCK;
                    if rem == 0 {
                        PTRS_PER_BLOCK
                    } else {
                        rem
                    }
                } else {
                    PTRS_PER_BLOCK
                };
                free_table_range(cache, bitmap_start, sind, lo, hi)?;

                let mut slot = sind;
                prune_table_if_empty(cache, bitmap_start, &mut slot)?;
                if slot == 0 {
                    clear_table_slot(cache, dind, sidx)?;
                }
            }

            if keep_blocks <= base {
                prune_table_if_empty(cache, bitmap_start, &mut inode.addrs[DIND_IDX])?;
            }
        }
    }

    inode.size = new_len;
    Ok(())
}

fn ceil_div(a: u32, b: u32) -> u32 {
    if a == 0 {
        0
    } else {
        (a + b - 1) / b
    }
}

fn free_slot<D: BlockDevice>(cache: &Cache<D>, bitmap_start: u32, slot: &mut u32) -> Result<()> {
    if *slot != 0 {
        bitmap::free_block(cache, bitmap_start, *slot)?;
        *slot = 0;
    }
    Ok(())
}

fn free_table_range<D: BlockDevice>(
    cache: &Cache<D>,
    bitmap_start: u32,
    table: u32,
    lo: usize,
    hi: usize,
) -> Result<()> {
    for idx in lo..hi {
        if let Some(slot) = read_table_slot(cache, table, idx)? {
            bitmap::free_block(cache, bitmap_start, slot)?;
            clear_table_slot(cache, table, idx)?;
        }
    }
    Ok(())
}

fn clear_table_slot<D: BlockDevice>(cache: &Cache<D>, table: u32, idx: usize) -> Result<()> {
    let mut guard = cache.get(table)?;
    let off = idx * 4;
    guard.as_mut_slice()[off..off + 4].copy_from_slice(&0u32.to_ne_bytes());
    guard.release();
    Ok(())
}

/// If every pointer slot in `*slot`'s table is now zero, free the table
/// block itself and zero the slot. Mirrors `cofs_scan_block`'s role in
/// `cofs_truncate`: a table with zero nonzero words is dead weight.
fn prune_table_if_empty<D: BlockDevice>(cache: &Cache<D>, bitmap_start: u32, slot: &mut u32) -> Result<()> {
    if *slot == 0 {
        return Ok(());
    }
    let guard = cache.get(*slot)?;
    let empty = count_nonzero_words(guard.as_slice()) == 0;
    drop(guard);
    if empty {
        bitmap::free_block(cache, bitmap_start, *slot)?;
        *slot = 0;
    }
    Ok(())
}

/// Read up to `buf.len()` bytes starting at `offset`, clamped to the
/// inode's current size. Never mutates `inode` — unallocated (hole)
/// blocks within the file's size read back as zeros.
pub fn read<D: BlockDevice>(cache: &Cache<D>, inode: &Inode, offset: u32, buf: &mut [u8]) -> Result<usize> {
    if offset >= inode.size {
        return Ok(0);
    }
    let end = (offset as u64 + buf.len() as u64).min(inode.size as u64) as u32;
    let mut n = 0usize;
    let mut pos = offset;
    while pos < end {
        let lbn = (pos / BLOCK_SIZE as u32) as usize;
        let off_in_block = (pos % BLOCK_SIZE as u32) as usize;
        let chunk = (BLOCK_SIZE - off_in_block).min((end - pos) as usize);

        match bmap_read(cache, inode, lbn)? {
            Some(blockno) => {
                let guard = cache.get(blockno)?;
                buf[n..n + chunk].copy_from_slice(&guard.as_slice()[off_in_block..off_in_block + chunk]);
            }
            None => {
                buf[n..n + chunk].fill(0);
            }
        }
        n += chunk;
        pos += chunk as u32;
    }
    Ok(n)
}

/// Write `buf` at `offset`, extending the file and allocating blocks as
/// needed. Per spec.md §9's resolved question 7: if allocation fails after
/// at least one byte has been written, returns the count written so far
/// instead of an error; if the very first block can't be allocated,
/// returns `FsError::OutOfSpace`.
pub fn write<D: BlockDevice>(
    cache: &Cache<D>,
    bitmap_start: u32,
    inode: &mut Inode,
    offset: u32,
    buf: &[u8],
) -> Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    let end = offset as u64 + buf.len() as u64;
    if end > (MAX_FILE_BLOCKS as u64) * (BLOCK_SIZE as u64) {
        return Err(FsError::TooLarge(end));
    }

    let mut n = 0usize;
    let mut pos = offset;
    while n < buf.len() {
        let lbn = (pos / BLOCK_SIZE as u32) as usize;
        let off_in_block = (pos % BLOCK_SIZE as u32) as usize;
        let chunk = (BLOCK_SIZE - off_in_block).min(buf.len() - n);

        let blockno = match bmap(cache, bitmap_start, inode, lbn) {
            Ok(b) => b,
            Err(FsError::OutOfSpace) if n > 0 => {
                log::warn!("write: out of space after {n} bytes, returning partial write");
                break;
            }
            Err(e) => return Err(e),
        };

        let mut guard = cache.get(blockno)?;
        guard.as_mut_slice()[off_in_block..off_in_block + chunk].copy_from_slice(&buf[n..n + chunk]);
        guard.release();

        n += chunk;
        pos += chunk as u32;
        if pos > inode.size {
            inode.size = pos;
        }
    }
    Ok(n)
}
