//! Directory entries: a flat array of fixed-size slots inside a regular
//! file's data blocks.
//!
//! Layout follows `cofs_common.h`'s `cofs_dirent` (a `u32` inode number
//! plus a 28-byte name). Lookup and link are linear scans, as in
//! `original_source/dir.c`'s `cofs_lookup`/`cofs_dir_link` — cofs has no
//! hashing or B-tree directory index.

use bytemuck::{Pod, Zeroable};

use crate::block_device::BlockDevice;
use crate::buffer_cache::Cache;
use crate::error::{FsError, Result};
use crate::inode::{self, Inode, InodeType};
use crate::params::{BLOCK_SIZE, DIRENT_NAME_MAX};

/// Byte-for-byte layout of one directory slot.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct RawDirent {
    pub ino: u32,
    pub name: [u8; DIRENT_NAME_MAX],
}

pub const DIRENT_SIZE: usize = std::mem::size_of::<RawDirent>();

/// A decoded directory entry. `ino == 0` marks a free (unused or deleted)
/// slot, the same convention the inode table uses for "no inode".
#[derive(Clone, Debug)]
pub struct Dirent {
    pub ino: u32,
    pub name: String,
}

fn decode(raw: &RawDirent) -> Option<Dirent> {
    if raw.ino == 0 {
        return None;
    }
    let nul = raw.name.iter().position(|&b| b == 0).unwrap_or(raw.name.len());
    let name = String::from_utf8_lossy(&raw.name[..nul]).into_owned();
    Some(Dirent { ino: raw.ino, name })
}

fn encode(ino: u32, name: &str) -> Result<RawDirent> {
    if name.len() > DIRENT_NAME_MAX {
        return Err(FsError::NameTooLong(name.to_string(), DIRENT_NAME_MAX));
    }
    let mut buf = [0u8; DIRENT_NAME_MAX];
    buf[..name.len()].copy_from_slice(name.as_bytes());
    Ok(RawDirent { ino, name: buf })
}

/// Read every occupied slot out of a directory inode's data.
pub fn read_all<D: BlockDevice>(cache: &Cache<D>, dir: &Inode) -> Result<Vec<Dirent>> {
    require_dir(dir)?;
    let mut out = Vec::new();
    let mut buf = [0u8; DIRENT_SIZE];
    let mut offset = 0u32;
    while offset < dir.size {
        let n = inode::read(cache, dir, offset, &mut buf)?;
        if n < DIRENT_SIZE {
            break;
        }
        let raw: RawDirent = bytemuck::pod_read_unaligned(&buf);
        if let Some(d) = decode(&raw) {
            out.push(d);
        }
        offset += DIRENT_SIZE as u32;
    }
    Ok(out)
}

/// Find `name` in `dir`, returning its inode number.
pub fn lookup<D: BlockDevice>(cache: &Cache<D>, dir: &Inode, name: &str) -> Result<u32> {
    require_dir(dir)?;
    for ent in read_all(cache, dir)? {
        if ent.name == name {
            return Ok(ent.ino);
        }
    }
    Err(FsError::NotFound(name.to_string(), dir.ino))
}

/// Insert `(ino, name)` into `dir`, reusing the first free slot if one
/// exists or appending a new one otherwise. Rejects a name that's already
/// present — cofs has no notion of overwriting a link in place.
pub fn link<D: BlockDevice>(
    cache: &Cache<D>,
    bitmap_start: u32,
    dir: &mut Inode,
    name: &str,
    ino: u32,
) -> Result<()> {
    require_dir(dir)?;
    let raw = encode(ino, name)?;

    let mut buf = [0u8; DIRENT_SIZE];
    let mut offset = 0u32;
    while offset < dir.size {
        inode::read(cache, dir, offset, &mut buf)?;
        let existing: RawDirent = bytemuck::pod_read_unaligned(&buf);
        if let Some(ent) = decode(&existing) {
            if ent.name == name {
                return Err(FsError::AlreadyExists(name.to_string(), dir.ino));
            }
        } else {
            inode::write(cache, bitmap_start, dir, offset, bytemuck::bytes_of(&raw))?;
            return Ok(());
        }
        offset += DIRENT_SIZE as u32;
    }

    // No free slot: append into a freshly-allocated block. `dir.size` must
    // grow by a whole block (spec.md:161), not just by the dirent's width —
    // `inode::write`'s offset-based growth would only carry it to
    // `dir.size + DIRENT_SIZE`, so set it explicitly afterward. Persisting
    // the updated inode is the caller's job, same as every other `dir::link`
    // path here.
    let write_offset = dir.size;
    inode::write(cache, bitmap_start, dir, write_offset, bytemuck::bytes_of(&raw))?;
    let old_blocks = write_offset / BLOCK_SIZE as u32;
    dir.size = (old_blocks + 1) * BLOCK_SIZE as u32;
    debug_assert_eq!(dir.size % BLOCK_SIZE as u32, 0);
    Ok(())
}

fn require_dir(inode: &Inode) -> Result<()> {
    if inode.kind != InodeType::Dir {
        return Err(FsError::NotADirectory(inode.ino));
    }
    Ok(())
}
