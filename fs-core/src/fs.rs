//! The filesystem handle: ties the superblock, buffer cache, inode layer
//! and directory layer together into the operations an external caller
//! actually uses (mount, path lookup, mknod, statfs).
//!
//! Path resolution follows the teacher's `namex`/`namei` split
//! (`kernel/src/fs/fs.rs`): walk one component at a time through
//! `dir::lookup`, requiring every intermediate component to be a
//! directory.

use crate::bitmap::bitmap_blocks;
use crate::block_device::BlockDevice;
use crate::buffer_cache::Cache;
use crate::dir;
use crate::error::{FsError, Result};
use crate::inode::{self, Inode, InodeType};
use crate::params::{BLOCK_SIZE, FS_MAGIC, ROOT_INO};
use crate::superblock::SuperBlock;

/// Statistics reported by `statfs`, following `cofs_statfs`'s fields.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub f_type: u32,
    pub f_bsize: u32,
    pub f_blocks: u32,
    pub f_bfree: u32,
    pub f_files: u32,
    pub f_namelen: u32,
}

/// A mounted cofs image.
pub struct FileSystem<D: BlockDevice> {
    cache: Cache<D>,
    sb: SuperBlock,
}

impl<D: BlockDevice> FileSystem<D> {
    /// Mount `device`: read and validate its superblock.
    pub fn mount(device: D) -> Result<Self> {
        let cache = Cache::new(device);
        let sb = SuperBlock::read(&cache)?;
        log::info!(
            "mounted cofs image: {} blocks, {} inodes, data starts at block {}",
            sb.num_blocks,
            sb.num_inodes,
            sb.data_start
        );
        Ok(FileSystem { cache, sb })
    }

    /// Construct a handle from an already-formatted cache and superblock,
    /// skipping the magic re-check. Used only by `ImageBuilder`, which just
    /// wrote that superblock itself.
    pub(crate) fn mount_prebuilt(cache: Cache<D>, sb: SuperBlock) -> Self {
        FileSystem { cache, sb }
    }

    pub fn superblock(&self) -> &SuperBlock {
        &self.sb
    }

    /// Load the root directory's inode.
    pub fn root(&self) -> Result<Inode> {
        self.iget(ROOT_INO)
    }

    pub fn iget(&self, ino: u32) -> Result<Inode> {
        inode::iget(&self.cache, self.sb.inode_start, ino)
    }

    pub fn iput(&self, node: &Inode) -> Result<()> {
        inode::iput(&self.cache, self.sb.inode_start, node)
    }

    /// Free a no-longer-linked inode's data and mark its slot free.
    pub fn evict(&self, node: &mut Inode) -> Result<()> {
        inode::evict(&self.cache, self.sb.inode_start, self.sb.bitmap_start, node)
    }

    pub fn read(&self, node: &Inode, offset: u32, buf: &mut [u8]) -> Result<usize> {
        inode::read(&self.cache, node, offset, buf)
    }

    pub fn write(&self, node: &mut Inode, offset: u32, buf: &[u8]) -> Result<usize> {
        let n = inode::write(&self.cache, self.sb.bitmap_start, node, offset, buf)?;
        self.iput(node)?;
        Ok(n)
    }

    pub fn truncate(&self, node: &mut Inode, new_len: u32) -> Result<()> {
        inode::truncate(&self.cache, self.sb.bitmap_start, node, new_len)?;
        self.iput(node)
    }

    pub fn readdir(&self, dir: &Inode) -> Result<Vec<dir::Dirent>> {
        dir::read_all(&self.cache, dir)
    }

    /// Resolve a `/`-separated path from the root. Every component but the
    /// last must be a directory.
    pub fn namei(&self, path: &str) -> Result<Inode> {
        let mut cur = self.root()?;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if cur.kind != InodeType::Dir {
                return Err(FsError::NotADirectory(cur.ino));
            }
            let ino = dir::lookup(&self.cache, &cur, component)?;
            cur = self.iget(ino)?;
        }
        Ok(cur)
    }

    /// Resolve all but the last component of `path`, returning the parent
    /// directory inode and the final component's name.
    pub fn nameiparent<'a>(&self, path: &'a str) -> Result<(Inode, &'a str)> {
        let trimmed = path.trim_end_matches('/');
        let (parent_path, name) = match trimmed.rfind('/') {
            Some(i) => (&trimmed[..i], &trimmed[i + 1..]),
            None => ("", trimmed),
        };
        let parent = if parent_path.is_empty() {
            self.root()?
        } else {
            self.namei(parent_path)?
        };
        Ok((parent, name))
    }

    /// Create a new inode of `kind` and link it into `parent` under `name`.
    /// `major`/`minor` are only meaningful for `InodeType::Dev` (spec.md's
    /// supplemented device-node support; no device I/O backs the node).
    pub fn mknod(
        &self,
        parent: &mut Inode,
        name: &str,
        kind: InodeType,
        major: u16,
        minor: u16,
    ) -> Result<Inode> {
        if dir::lookup(&self.cache, parent, name).is_ok() {
            return Err(FsError::AlreadyExists(name.to_string(), parent.ino));
        }

        let mut node = inode::alloc_inode(&self.cache, self.sb.inode_start, self.sb.num_inodes, kind)?;
        node.major = major;
        node.minor = minor;
        node.nlink = 1;

        if kind == InodeType::Dir {
            dir::link(&self.cache, self.sb.bitmap_start, &mut node, ".", node.ino)?;
            dir::link(&self.cache, self.sb.bitmap_start, &mut node, "..", parent.ino)?;
            // The new subdirectory's ".." is a back-reference to the
            // parent, so the parent gains a link (spec.md §9, resolved
            // question 4). `dir::link` itself never touches nlink.
            parent.nlink += 1;
        }

        self.iput(&node)?;
        dir::link(&self.cache, self.sb.bitmap_start, parent, name, node.ino)?;
        self.iput(parent)?;
        Ok(node)
    }

    pub fn mkdir(&self, parent: &mut Inode, name: &str) -> Result<Inode> {
        self.mknod(parent, name, InodeType::Dir, 0, 0)
    }

    pub fn create(&self, parent: &mut Inode, name: &str) -> Result<Inode> {
        self.mknod(parent, name, InodeType::File, 0, 0)
    }

    /// Approximate filesystem statistics. `f_bfree` is a real bitmap scan,
    /// unlike the original's hardcoded constant (spec.md's supplemented
    /// `statfs`).
    pub fn statfs(&self) -> Result<Stat> {
        let mut free = 0u32;
        let nbitmap_blocks = bitmap_blocks(self.sb.num_blocks);
        let mut buf = [0u8; BLOCK_SIZE];
        for bi in 0..nbitmap_blocks {
            let guard = self.cache_get(self.sb.bitmap_start + bi)?;
            buf.copy_from_slice(guard.as_slice());
            free += (BLOCK_SIZE * 8) as u32 - popcount(&buf);
        }
        // The last bitmap block may cover bit positions beyond num_blocks;
        // those phantom bits read as free but don't exist. Clamp.
        free = free.min(self.sb.num_blocks);

        Ok(Stat {
            f_type: FS_MAGIC,
            f_bsize: BLOCK_SIZE as u32,
            f_blocks: self.sb.num_blocks,
            f_bfree: free,
            f_files: self.sb.num_inodes,
            f_namelen: crate::params::DIRENT_NAME_MAX as u32,
        })
    }

    fn cache_get(&self, blockno: u32) -> Result<crate::buffer_cache::BlockGuard<D>> {
        self.cache.get(blockno)
    }

    /// Persist every dirty block to the underlying device.
    pub fn flush(&self) -> Result<()> {
        self.cache.flush()
    }

    /// Flush and hand back the underlying device, e.g. to close the file
    /// it's backed by.
    pub fn into_device(self) -> std::result::Result<D, FsError> {
        self.cache
            .into_device()
            .map_err(|_| FsError::Corruption("device still has outstanding cache handles".into()))
    }

    pub(crate) fn cache(&self) -> &Cache<D> {
        &self.cache
    }

    pub(crate) fn bitmap_start(&self) -> u32 {
        self.sb.bitmap_start
    }
}

fn popcount(buf: &[u8]) -> u32 {
    buf.iter().map(|b| b.count_ones()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mkfs::ImageBuilder;
    use crate::block_device::MemDevice;

    fn mounted() -> FileSystem<MemDevice> {
        let device = MemDevice::new(256);
        let builder = ImageBuilder::format(device, 64).unwrap();
        let device = builder.into_device();
        FileSystem::mount(device).unwrap()
    }

    #[test]
    fn root_is_a_directory() {
        let fs = mounted();
        let root = fs.root().unwrap();
        assert_eq!(root.kind, InodeType::Dir);
        assert_eq!(root.ino, ROOT_INO);
    }

    #[test]
    fn mkdir_and_lookup_by_path() {
        let fs = mounted();
        let mut root = fs.root().unwrap();
        fs.mkdir(&mut root, "etc").unwrap();
        let found = fs.namei("etc").unwrap();
        assert_eq!(found.kind, InodeType::Dir);

        let root_reloaded = fs.root().unwrap();
        assert_eq!(root_reloaded.nlink, root.nlink);
    }

    #[test]
    fn create_file_and_write_read() {
        let fs = mounted();
        let mut root = fs.root().unwrap();
        let mut file = fs.create(&mut root, "hello.txt").unwrap();
        fs.write(&mut file, 0, b"hi").unwrap();

        let (parent, name) = fs.nameiparent("hello.txt").unwrap();
        assert_eq!(parent.ino, ROOT_INO);
        assert_eq!(name, "hello.txt");

        let node = fs.namei("hello.txt").unwrap();
        let mut buf = [0u8; 2];
        fs.read(&node, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn statfs_reports_some_free_blocks() {
        let fs = mounted();
        let stat = fs.statfs().unwrap();
        assert_eq!(stat.f_type, FS_MAGIC);
        assert!(stat.f_bfree > 0);
        assert!(stat.f_bfree <= stat.f_blocks);
    }

    #[test]
    fn duplicate_mkdir_rejected() {
        let fs = mounted();
        let mut root = fs.root().unwrap();
        fs.mkdir(&mut root, "x").unwrap();
        assert!(matches!(
            fs.mkdir(&mut root, "x"),
            Err(FsError::AlreadyExists(_, _))
        ));
    }
}
