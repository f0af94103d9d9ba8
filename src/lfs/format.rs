//! Creation of fresh filesystem images.

use crate::error::Error;
use crate::error::Result;
use crate::inode::InodeMap;
use crate::layout;
use crate::layout::BLOCK_SIZE;
use crate::layout::Block;
use crate::layout::Dirent;
use crate::layout::INODE_MAP_BLOCK;
use crate::layout::INODE_MAP_SIZE;
use crate::layout::INODE_TYPE_DIR;
use crate::layout::INODE_TYPE_FILE;
use crate::layout::Inode;
use crate::layout::LFS_MAGIC;
use crate::layout::LOG_START_BLOCK;
use crate::layout::MAX_NAME_LEN;
use crate::layout::ROOT_INO;
use crate::layout::Superblock;
use std::fs::File;
use std::fs::OpenOptions;
use std::mem::size_of;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// The block holding the root inode on a fresh image.
const ROOT_INODE_BLOCK: u32 = 2;
/// The block holding the root directory data on a fresh image.
const ROOT_DATA_BLOCK: u32 = 3;

/// A file seeded into a fresh image at format time.
pub struct Seed<'s> {
    /// The file's name under the root.
    pub name: &'s str,
    /// The file's content; at most one block.
    pub content: &'s [u8],
}

/// Formats the image at `path` with `total_blocks` blocks and the given seed
/// files.
///
/// The image file is created or truncated to exactly
/// `total_blocks * BLOCK_SIZE` bytes. Layout: superblock in block 0, inode
/// map in block 1, root inode in block 2, root directory data in block 3,
/// then one data block and one inode block per seed file. The log tail starts
/// at the first block after the seeded content; seeds must fit in the
/// reserved area below the log region.
pub fn format(path: &Path, total_blocks: u32, seeds: &[Seed<'_>]) -> Result<()> {
    if total_blocks <= LOG_START_BLOCK {
        return Err(Error::NoSpace);
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.set_len(total_blocks as u64 * BLOCK_SIZE as u64)?;

    let mut imap = InodeMap::new();
    imap.set(ROOT_INO, ROOT_INODE_BLOCK);

    let mut root = Inode::new(ROOT_INO, INODE_TYPE_DIR);
    root.nlinks = 2;
    let mut direct = root.direct;
    direct[0] = ROOT_DATA_BLOCK;
    root.direct = direct;

    // Root directory data: `.` and `..` both point at the root itself
    let mut dir = [0u8; BLOCK_SIZE as usize];
    layout::set_dirent(&mut dir, 0, &Dirent::new(ROOT_INO, "."));
    layout::set_dirent(&mut dir, 1, &Dirent::new(ROOT_INO, ".."));
    let mut entries = 2;

    let mut next_block = ROOT_DATA_BLOCK + 1;
    let mut next_ino = 1;
    for seed in seeds {
        if seed.name.len() >= MAX_NAME_LEN {
            return Err(Error::NameTooLong);
        }
        if seed.content.len() > BLOCK_SIZE as usize {
            return Err(Error::TooLarge);
        }
        // One data block and one inode block per seed, all of which must
        // stay below the log region
        if next_block + 2 > LOG_START_BLOCK || next_ino as usize >= INODE_MAP_SIZE {
            return Err(Error::NoSpace);
        }

        let data_block = next_block;
        let inode_block = next_block + 1;
        next_block += 2;

        let mut data = [0u8; BLOCK_SIZE as usize];
        data[..seed.content.len()].copy_from_slice(seed.content);
        write_block(&file, data_block, &data)?;

        let mut inode = Inode::new(next_ino, INODE_TYPE_FILE);
        inode.size = seed.content.len() as u32;
        let mut direct = inode.direct;
        direct[0] = data_block;
        inode.direct = direct;
        write_block(&file, inode_block, &layout::to_block(&inode))?;

        layout::set_dirent(&mut dir, entries, &Dirent::new(next_ino, seed.name));
        entries += 1;
        imap.set(next_ino, inode_block);
        next_ino += 1;
    }
    root.size = (entries * size_of::<Dirent>()) as u32;

    write_block(&file, ROOT_DATA_BLOCK, &dir)?;
    write_block(&file, ROOT_INODE_BLOCK, &layout::to_block(&root))?;
    write_block(&file, INODE_MAP_BLOCK, &imap.to_block())?;

    let sb = Superblock {
        magic: LFS_MAGIC,
        block_size: BLOCK_SIZE,
        total_blocks,
        inode_map_block: INODE_MAP_BLOCK,
        log_start: LOG_START_BLOCK,
        log_tail: next_block,
    };
    write_block(&file, 0, &layout::to_block(&sb))?;
    Ok(())
}

/// Writes one block at the given position.
fn write_block(file: &File, block: u32, buf: &Block) -> Result<()> {
    file.write_all_at(buf, block as u64 * BLOCK_SIZE as u64)?;
    Ok(())
}
