//! On-disk constants shared by every layer.
//!
//! Mirrors `cofs_common.h` from the original kernel module: block size,
//! pointer-table fan-out, and the fixed slot layout of the inode address
//! table.

/// Bytes per block. The whole on-disk format is defined in terms of this.
pub const BLOCK_SIZE: usize = 512;

/// Pointer entries that fit in one block (`B / sizeof(u32)`). Called `W` in
/// spec.md, `NUM_SIND`/`NUM_EINB` in the original C.
pub const PTRS_PER_BLOCK: usize = BLOCK_SIZE / 4;

/// Direct block pointers held in the inode itself.
pub const NUM_DIRECT: usize = 6;

/// Index into `addrs` of the single-indirect table pointer.
pub const SIND_IDX: usize = NUM_DIRECT;

/// Index into `addrs` of the double-indirect table pointer.
pub const DIND_IDX: usize = NUM_DIRECT + 1;

/// Total pointer slots in an inode: direct + SIND + DIND + one reserved
/// slot for a future triple-indirect pointer.
pub const NUM_ADDRS: usize = NUM_DIRECT + 3;

/// Largest file offset expressible through the three-level pointer tree,
/// in blocks: direct + single-indirect + double-indirect.
pub const MAX_FILE_BLOCKS: usize = NUM_DIRECT + PTRS_PER_BLOCK + PTRS_PER_BLOCK * PTRS_PER_BLOCK;

/// Superblock magic (`cosiris FS`).
pub const FS_MAGIC: u32 = 0xC051_7155;

/// Max bytes in a directory entry name.
pub const DIRENT_NAME_MAX: usize = 28;

/// The inode number of the filesystem root, fixed at mkfs time.
pub const ROOT_INO: u32 = 1;

const _: () = assert!(BLOCK_SIZE % 4 == 0);
const _: () = assert!(PTRS_PER_BLOCK * 4 == BLOCK_SIZE);
