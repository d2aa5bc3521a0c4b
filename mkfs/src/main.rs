//! `mkfs-cofs`: the offline image builder's CLI front end.
//!
//! Formats `image` (a regular file or, on Linux, a block device) as a
//! fresh cofs filesystem and optionally seeds its root directory with the
//! named files, per spec.md §4.8 and §6. Grounded in
//! `original_source/mkfs.c`'s `main`, with sizing delegated to `fs-core`'s
//! `ImageBuilder`.

use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use fs_core::block_device::FileDevice;
use fs_core::params::BLOCK_SIZE;
use fs_core::ImageBuilder;

/// Format an image and optionally seed it with files.
#[derive(Parser, Debug)]
#[command(name = "mkfs-cofs", version)]
struct Args {
    /// Path to the image to format: a regular file or block device.
    image: PathBuf,

    /// Files to copy into the freshly-formatted root directory.
    files: Vec<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("mkfs-cofs: {msg}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), String> {
    let file = File::options()
        .read(true)
        .write(true)
        .open(&args.image)
        .map_err(|e| format!("{}: {e}", args.image.display()))?;

    let num_blocks = device_size_in_blocks(&file, &args.image)?;
    if num_blocks == 0 {
        return Err(format!("{}: image is empty", args.image.display()));
    }

    log::info!(
        "formatting {} as cofs: {num_blocks} blocks of {BLOCK_SIZE} bytes",
        args.image.display()
    );

    let device = FileDevice::new(file, num_blocks);
    let mut builder = ImageBuilder::format(device, num_blocks).map_err(|e| e.to_string())?;

    for path in &args.files {
        let contents = std::fs::read(path).map_err(|e| format!("{}: {e}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("{}: not a valid file name", path.display()))?;
        log::info!("seeding {name} ({} bytes)", contents.len());
        builder
            .add_file(name, &contents)
            .map_err(|e| format!("{name}: {e}"))?;
    }

    builder.finish().map_err(|e| e.to_string())?;
    Ok(())
}

/// Number of `BLOCK_SIZE` blocks `image` holds: `Metadata::len` for a
/// regular file, a `BLKGETSIZE64` ioctl for a block device (Linux only) —
/// mirrors `original_source/mkfs.c`'s `S_ISREG`/`S_ISBLK` branch.
fn device_size_in_blocks(file: &File, path: &std::path::Path) -> Result<u32, String> {
    let metadata = file
        .metadata()
        .map_err(|e| format!("{}: {e}", path.display()))?;

    let bytes = if metadata.is_file() {
        metadata.len()
    } else {
        block_device_size_bytes(file, path)?
    };

    Ok((bytes / BLOCK_SIZE as u64) as u32)
}

#[cfg(target_os = "linux")]
fn block_device_size_bytes(file: &File, path: &std::path::Path) -> Result<u64, String> {
    use std::os::unix::io::AsRawFd;

    const BLKGETSIZE64: libc::c_ulong = 0x8008_1272;

    let mut size: u64 = 0;
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64, &mut size as *mut u64) };
    if ret < 0 {
        return Err(format!(
            "{}: BLKGETSIZE64 failed: {}",
            path.display(),
            std::io::Error::last_os_error()
        ));
    }
    Ok(size)
}

#[cfg(not(target_os = "linux"))]
fn block_device_size_bytes(_file: &File, path: &std::path::Path) -> Result<u64, String> {
    Err(format!(
        "{}: not a regular file, and block-device sizing is only supported on Linux",
        path.display()
    ))
}
