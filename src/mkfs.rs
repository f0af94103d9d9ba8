//! The `mkfs` tool allows to create a filesystem on a device.

use crate::util::error;
use crate::util::get_device_size;
use crate::util::prompt;
use lfs::layout;
use lfs::layout::BLOCK_SIZE;
use lfs::layout::DEFAULT_TOTAL_BLOCKS;
use lfs::layout::LFS_MAGIC;
use lfs::layout::Superblock;
use std::collections::HashMap;
use std::env::ArgsOs;
use std::fs::File;
use std::io;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::process::exit;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// The number of blocks of the created filesystem.
    blocks: Option<u32>,
    /// The path to the device file on which the filesystem will be created.
    device_path: Option<PathBuf>,
}

fn parse_args(mut args: ArgsOs) -> Args {
    let mut res: Args = Default::default();
    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            Some("-b" | "--blocks") => {
                res.blocks = args.next().and_then(|s| s.to_str()?.parse().ok());
                if res.blocks.is_none() {
                    error("mkfs", "-b requires a number of blocks");
                }
            }
            _ => {
                res.device_path = Some(PathBuf::from(arg));
            }
        }
    }
    res
}

/// Prints the command's usage.
fn print_usage() {
    eprintln!("Usage:");
    eprintln!(" mkfs.lfs [-h] [-b <blocks>] <device>");
    eprintln!();
    eprintln!("Options:");
    eprintln!(" -h:\t\tprints usage");
    eprintln!(" -b <blocks>:\tthe size of the filesystem in blocks");
    eprintln!(" device:\tthe device or image file on which the filesystem is created");
}

/// A trait representing an object used to create a filesystem on a device.
pub trait FsFactory {
    /// Tells whether a filesystem corresponding to the factory is present on
    /// the device at `path`.
    fn is_present(&self, path: &Path) -> io::Result<bool>;

    /// Creates the filesystem on the device at `path`.
    fn create(&self, path: &Path) -> lfs::Result<()>;
}

/// A factory to create an LFS image.
#[derive(Default)]
pub struct LfsFactory {
    /// The number of blocks of the filesystem, if forced.
    blocks: Option<u32>,
}

impl FsFactory for LfsFactory {
    fn is_present(&self, path: &Path) -> io::Result<bool> {
        let mut file = File::open(path)?;
        let mut buf = [0u8; BLOCK_SIZE as usize];
        match file.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e),
        }
        let sb: Superblock = layout::from_block(&buf);
        Ok(sb.magic == LFS_MAGIC)
    }

    fn create(&self, path: &Path) -> lfs::Result<()> {
        let blocks = match self.blocks {
            Some(blocks) => blocks,
            None => {
                let size = get_device_size(path)?;
                if size == 0 {
                    DEFAULT_TOTAL_BLOCKS
                } else {
                    (size / BLOCK_SIZE as u64) as u32
                }
            }
        };
        lfs::format::format(path, blocks, &[])
    }
}

pub fn main(fs_name: &str, args: ArgsOs) {
    let args = parse_args(args);
    if args.help {
        print_usage();
        exit(0);
    }

    let factories = HashMap::<&str, Box<dyn FsFactory>>::from([(
        "lfs",
        Box::new(LfsFactory {
            blocks: args.blocks,
        }) as Box<dyn FsFactory>,
    )]);
    let factory = factories.get(fs_name).unwrap_or_else(|| {
        error("mkfs", format_args!("invalid filesystem type `{fs_name}`"));
    });
    let device_path = args.device_path.unwrap_or_else(|| {
        error("mkfs", "specify path to a device");
    });

    let present = match factory.is_present(&device_path) {
        Ok(present) => present,
        // A missing image file is simply created
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => error("mkfs", format_args!("{}: {e}", device_path.display())),
    };
    if present {
        println!("{} already contains an LFS image", device_path.display());
        let confirm = prompt("Proceed anyway? (y/N) ")
            .map(|s| s.to_lowercase() == "y")
            .unwrap_or(false);
        if !confirm {
            eprintln!("Abort.");
            exit(1);
        }
    }
    factory.create(&device_path).unwrap_or_else(|e| {
        error("mkfs", format_args!("failed to create filesystem: {e}"));
    });
}
