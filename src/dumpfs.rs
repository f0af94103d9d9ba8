//! The `dumpfs` tool prints the metadata of a filesystem image.

use crate::util::error;
use lfs::disk::Disk;
use lfs::inode::InodeMap;
use lfs::layout;
use lfs::layout::BLOCK_SIZE;
use lfs::layout::BLOCKS_PER_SEGMENT;
use lfs::layout::Inode;
use lfs::layout::LFS_MAGIC;
use lfs::layout::SegmentSummary;
use lfs::layout::Superblock;
use std::env::ArgsOs;
use std::path::PathBuf;
use std::process::exit;

/// Prints the command's usage.
fn print_usage() {
    eprintln!("Usage:");
    eprintln!(" dumpfs <image>");
}

pub fn main(args: ArgsOs) {
    let args: Vec<_> = args.collect();
    let path = match &args[..] {
        [path] => PathBuf::from(path),
        _ => {
            print_usage();
            exit(1);
        }
    };

    let disk = Disk::open(&path).unwrap_or_else(|e| {
        error("dumpfs", format_args!("{}: {e}", path.display()));
    });
    let mut buf = [0u8; BLOCK_SIZE as usize];
    disk.read(0, &mut buf).unwrap_or_else(|e| {
        error("dumpfs", format_args!("cannot read superblock: {e}"));
    });
    let sb: Superblock = layout::from_block(&buf);
    if sb.magic != LFS_MAGIC {
        error("dumpfs", format_args!("{}: not an LFS image", path.display()));
    }

    let block_size = sb.block_size;
    let total_blocks = sb.total_blocks;
    let inode_map_block = sb.inode_map_block;
    let log_start = sb.log_start;
    let log_tail = sb.log_tail;
    println!("{}: LFS image", path.display());
    println!("  Block size:\t{block_size} bytes");
    println!("  Total blocks:\t{total_blocks}");
    println!("  Inode map:\tblock {inode_map_block}");
    println!("  Log region:\tblocks {log_start} to {total_blocks}");
    println!(
        "  Log tail:\t{log_tail} ({} blocks free)",
        total_blocks.saturating_sub(log_tail)
    );

    disk.read(inode_map_block, &mut buf).unwrap_or_else(|e| {
        error("dumpfs", format_args!("cannot read inode map: {e}"));
    });
    let imap = InodeMap::from_block(&buf);

    println!();
    println!("Inodes:");
    for (ino, block) in imap.iter() {
        if disk.read(block, &mut buf).is_err() {
            println!(" {ino}:\tblock {block} (unreadable)");
            continue;
        }
        let inode: Inode = layout::from_block(&buf);
        let kind = if inode.is_dir() { "directory" } else { "file" };
        let size = inode.size;
        let nlinks = inode.nlinks;
        println!(" {ino}:\t{kind}, {size} bytes, {nlinks} links, block {block}");

        let direct = inode.direct;
        let ptrs: Vec<String> = direct
            .iter()
            .filter(|ptr| **ptr != 0)
            .map(|ptr| ptr.to_string())
            .collect();
        if !ptrs.is_empty() {
            println!("\tdata blocks: {}", ptrs.join(", "));
        }
    }

    println!();
    println!("Segment summaries:");
    let mut base = log_start - log_start % BLOCKS_PER_SEGMENT;
    if base < log_start {
        base += BLOCKS_PER_SEGMENT;
    }
    while base < log_tail {
        if disk.read(base, &mut buf).is_err() {
            break;
        }
        let summary: SegmentSummary = layout::from_block(&buf);
        let entries = summary.entries;

        println!(" segment at block {base}:");
        for (i, entry) in entries.iter().enumerate().skip(1) {
            let ino = entry.inode_no;
            let idx = entry.block_idx;
            if ino != 0 || idx != 0 {
                println!("\tblock {}: inode {ino}, index {idx}", base + i as u32);
            }
        }
        base += BLOCKS_PER_SEGMENT;
    }
}
