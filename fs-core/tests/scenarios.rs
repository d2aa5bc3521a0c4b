//! End-to-end scenarios from spec.md §8, run against a 1 MiB (2048-block)
//! in-memory image, plus a file-backed round-trip through `FileDevice` to
//! exercise the on-disk codec path `tempfile` makes possible.

use fs_core::block_device::{FileDevice, MemDevice};
use fs_core::inode::InodeType;
use fs_core::params::{BLOCK_SIZE, NUM_DIRECT, PTRS_PER_BLOCK, SIND_IDX};
use fs_core::{FileSystem, FsError, ImageBuilder};

const IMAGE_BLOCKS: u32 = 2048;

fn formatted() -> FileSystem<MemDevice> {
    let device = MemDevice::new(IMAGE_BLOCKS);
    let builder = ImageBuilder::format(device, IMAGE_BLOCKS).unwrap();
    builder.finish().unwrap()
}

/// S1: format then mount an image with no seed files.
#[test]
fn s1_format_then_mount() {
    let fs = formatted();
    let root = fs.namei("").unwrap();
    assert_eq!(root.ino, fs_core::params::ROOT_INO);
    assert_eq!(root.kind, InodeType::Dir);

    let entries = fs.readdir(&root).unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec![".", ".."]);
}

/// S2: create a small file, write under NUM_DIRECT*BLOCK_SIZE bytes, read
/// it back whole.
#[test]
fn s2_small_file_roundtrip() {
    let fs = formatted();
    let mut root = fs.root().unwrap();
    let mut file = fs.create(&mut root, "f").unwrap();

    let body: Vec<u8> = (0u8..100).collect();
    let n = fs.write(&mut file, 0, &body).unwrap();
    assert_eq!(n, 100);

    let file = fs.namei("f").unwrap();
    assert_eq!(file.size, 100);

    let mut back = vec![0u8; 100];
    let r = fs.read(&file, 0, &mut back).unwrap();
    assert_eq!(r, 100);
    assert_eq!(back, body);

    assert_ne!(file.addrs[0], 0);
    assert_eq!(file.addrs[1], 0, "100 bytes must fit in a single direct block");
}

/// S3: span the single-indirect zone (8 blocks ≥ NUM_DIRECT).
#[test]
fn s3_spans_single_indirect() {
    let fs = formatted();
    let mut root = fs.root().unwrap();
    let mut file = fs.create(&mut root, "big").unwrap();

    let body = vec![0xABu8; BLOCK_SIZE * 8];
    fs.write(&mut file, 0, &body).unwrap();

    let file = fs.namei("big").unwrap();
    for slot in file.addrs.iter().take(NUM_DIRECT) {
        assert_ne!(*slot, 0);
    }
    assert_ne!(file.addrs[SIND_IDX], 0);

    let mut back = vec![0u8; body.len()];
    fs.read(&file, 0, &mut back).unwrap();
    assert_eq!(back, body);
}

/// S4: a single byte at the first double-indirect offset leaves a hole of
/// zeros before it and round-trips correctly.
#[test]
fn s4_spans_double_indirect() {
    let fs = formatted();
    let mut root = fs.root().unwrap();
    let mut file = fs.create(&mut root, "huge").unwrap();

    let offset = ((NUM_DIRECT + PTRS_PER_BLOCK) * BLOCK_SIZE) as u32;
    fs.write(&mut file, offset, &[0x7F]).unwrap();

    let file = fs.namei("huge").unwrap();
    assert_ne!(file.addrs[fs_core::params::DIND_IDX], 0);

    let mut hole = [0xFFu8; 4];
    fs.read(&file, 0, &mut hole).unwrap();
    assert_eq!(hole, [0, 0, 0, 0]);

    let mut byte = [0u8];
    fs.read(&file, offset, &mut byte).unwrap();
    assert_eq!(byte, [0x7F]);
}

/// S5: truncating a double-indirect file back to zero prunes every table
/// and restores the pre-create allocated-block count.
#[test]
fn s5_truncate_prunes_everything() {
    let fs = formatted();
    let baseline = fs.statfs().unwrap().f_bfree;

    let mut root = fs.root().unwrap();
    let mut file = fs.create(&mut root, "huge").unwrap();
    let offset = ((NUM_DIRECT + PTRS_PER_BLOCK) * BLOCK_SIZE) as u32;
    fs.write(&mut file, offset, &[0x7F]).unwrap();

    let mut file = fs.namei("huge").unwrap();
    fs.truncate(&mut file, 0).unwrap();

    assert_eq!(file.size, 0);
    assert!(file.addrs.iter().all(|&a| a == 0));

    let after = fs.statfs().unwrap().f_bfree;
    assert_eq!(after, baseline, "every data and indirect block must be freed");
}

/// S6: mkdir grows root by at most one block and the new directory's `.`
/// and `..` resolve correctly.
#[test]
fn s6_mkdir() {
    let fs = formatted();
    let mut root = fs.root().unwrap();
    let before_size = root.size;

    let dir = fs.mkdir(&mut root, "d").unwrap();
    let root_after = fs.namei("").unwrap();
    assert_eq!(root_after.size % BLOCK_SIZE as u32, 0, "directory size must stay block-aligned");
    assert_eq!(root_after.size - before_size, BLOCK_SIZE as u32);

    let found = fs.namei("d").unwrap();
    assert_eq!(found.ino, dir.ino);

    let entries = fs.readdir(&found).unwrap();
    let dot = entries.iter().find(|e| e.name == ".").unwrap();
    assert_eq!(dot.ino, found.ino);
    let dotdot = entries.iter().find(|e| e.name == "..").unwrap();
    assert_eq!(dotdot.ino, root.ino);
}

/// Property 7: a fresh image round-trips through a real file on disk, not
/// just an in-memory device.
#[test]
fn format_round_trips_through_a_real_file() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.as_file().set_len((IMAGE_BLOCKS as u64) * (BLOCK_SIZE as u64)).unwrap();

    let device = FileDevice::new(tmp.reopen().unwrap(), IMAGE_BLOCKS);
    let mut builder = ImageBuilder::format(device, IMAGE_BLOCKS).unwrap();
    builder.add_file("hello.txt", b"hi from disk").unwrap();
    let device = builder.into_device().unwrap();

    let fs = FileSystem::mount(device).unwrap();
    let node = fs.namei("hello.txt").unwrap();
    let mut buf = vec![0u8; b"hi from disk".len()];
    fs.read(&node, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"hi from disk");
}

#[test]
fn mounting_a_non_cofs_file_is_rejected() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.as_file().set_len((IMAGE_BLOCKS as u64) * (BLOCK_SIZE as u64)).unwrap();
    let device = FileDevice::new(tmp.reopen().unwrap(), IMAGE_BLOCKS);
    assert!(matches!(
        FileSystem::mount(device),
        Err(FsError::InvalidFormat { .. })
    ));
}
