//! Inode management.
//!
//! Inodes have no fixed home on disk: every update appends a fresh copy to
//! the log and repoints the inode map, which is the sole authority on where
//! an inode currently lives. The map itself is held in memory and reaches the
//! disk only at checkpoint time.

use crate::error::Error;
use crate::error::Result;
use crate::fs::Lfs;
use crate::layout;
use crate::layout::BLOCK_SIZE;
use crate::layout::Block;
use crate::layout::INODE_MAP_SIZE;
use crate::layout::Inode;

/// The in-memory inode map.
///
/// Entry `i` is the number of the block currently holding inode `i`, or `0`
/// when the inode does not exist.
#[derive(Clone)]
pub struct InodeMap([u32; INODE_MAP_SIZE]);

impl InodeMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self([0; INODE_MAP_SIZE])
    }

    /// Loads the map from its on-disk block.
    pub fn from_block(buf: &Block) -> Self {
        let mut map = [0u32; INODE_MAP_SIZE];
        for (entry, bytes) in map.iter_mut().zip(buf.chunks_exact(4)) {
            *entry = u32::from_ne_bytes(bytes.try_into().unwrap());
        }
        Self(map)
    }

    /// Serializes the map into a zero-padded block.
    pub fn to_block(&self) -> Block {
        let mut buf = [0u8; BLOCK_SIZE as usize];
        for (i, block) in self.0.iter().enumerate() {
            buf[i * 4..(i + 1) * 4].copy_from_slice(&block.to_ne_bytes());
        }
        buf
    }

    /// Returns the block holding inode `ino`, or `None` when the inode does
    /// not exist.
    pub fn get(&self, ino: u32) -> Option<u32> {
        match self.0.get(ino as usize) {
            Some(&block) if block != 0 => Some(block),
            _ => None,
        }
    }

    /// Points inode `ino` at the given block.
    pub fn set(&mut self, ino: u32, block: u32) {
        self.0[ino as usize] = block;
    }

    /// Returns the first unused inode number.
    ///
    /// Inode 0 is the root and is never handed out. Fails with
    /// [`Error::NoSpace`] when every entry is taken.
    pub fn allocate(&self) -> Result<u32> {
        for ino in 1..INODE_MAP_SIZE {
            if self.0[ino] == 0 {
                return Ok(ino as u32);
            }
        }
        Err(Error::NoSpace)
    }

    /// Iterates over the allocated inodes as `(inode number, block)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, block)| **block != 0)
            .map(|(ino, block)| (ino as u32, *block))
    }
}

impl Lfs {
    /// Reads the current copy of inode `ino`.
    pub(crate) fn read_inode(&self, ino: u32) -> Result<Inode> {
        let block = self.inode_map.get(ino).ok_or(Error::NotFound)?;
        let mut buf = [0u8; BLOCK_SIZE as usize];
        self.disk.read(block, &mut buf)?;

        let inode: Inode = layout::from_block(&buf);
        if inode.inode_no != ino {
            return Err(Error::BadFormat);
        }
        Ok(inode)
    }

    /// Appends a fresh copy of the given inode to the log and repoints the
    /// inode map at it. The previous on-disk copy becomes dead.
    pub(crate) fn write_inode(&mut self, inode: &Inode) -> Result<()> {
        let ino = inode.inode_no;
        if ino as usize >= INODE_MAP_SIZE {
            return Err(Error::NotFound);
        }
        let block = self.append_meta(&layout::to_block(inode))?;
        self.inode_map.set(ino, block);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::format;
    use crate::layout::DEFAULT_TOTAL_BLOCKS;
    use crate::layout::INODE_TYPE_FILE;
    use crate::layout::ROOT_INO;
    use tempfile::NamedTempFile;

    #[test]
    fn map_round_trip() {
        let mut map = InodeMap::new();
        map.set(0, 2);
        map.set(17, 345);

        let map = InodeMap::from_block(&map.to_block());
        assert_eq!(map.get(0), Some(2));
        assert_eq!(map.get(17), Some(345));
        assert_eq!(map.get(1), None);
        assert_eq!(map.get(INODE_MAP_SIZE as u32), None);
    }

    #[test]
    fn allocation_scans_from_one() {
        let mut map = InodeMap::new();
        map.set(0, 2);
        assert_eq!(map.allocate().unwrap(), 1);

        map.set(1, 10);
        map.set(2, 11);
        assert_eq!(map.allocate().unwrap(), 3);

        for ino in 1..INODE_MAP_SIZE {
            map.set(ino as u32, 10);
        }
        assert!(matches!(map.allocate(), Err(Error::NoSpace)));
    }

    #[test]
    fn inode_round_trip_through_log() {
        let img = NamedTempFile::new().unwrap();
        format::format(img.path(), DEFAULT_TOTAL_BLOCKS, &[]).unwrap();
        let mut fs = Lfs::mount(img.path()).unwrap();

        let mut inode = Inode::new(5, INODE_TYPE_FILE);
        inode.size = 123;
        fs.write_inode(&inode).unwrap();
        let first_home = fs.inode_map.get(5).unwrap();

        let read_back = fs.read_inode(5).unwrap();
        assert_eq!({ read_back.inode_no }, 5);
        assert_eq!({ read_back.size }, 123);

        // A rewrite lands in a new block; the map follows
        fs.write_inode(&read_back).unwrap();
        let second_home = fs.inode_map.get(5).unwrap();
        assert_ne!(first_home, second_home);
        assert_eq!({ fs.read_inode(5).unwrap().size }, 123);
    }

    #[test]
    fn out_of_range_inodes_are_rejected() {
        let img = NamedTempFile::new().unwrap();
        format::format(img.path(), DEFAULT_TOTAL_BLOCKS, &[]).unwrap();
        let mut fs = Lfs::mount(img.path()).unwrap();

        assert!(matches!(fs.read_inode(42), Err(Error::NotFound)));
        assert!(matches!(
            fs.read_inode(INODE_MAP_SIZE as u32),
            Err(Error::NotFound)
        ));

        let inode = Inode::new(INODE_MAP_SIZE as u32, INODE_TYPE_FILE);
        assert!(matches!(fs.write_inode(&inode), Err(Error::NotFound)));

        // The root written by the formatter is intact
        let root = fs.read_inode(ROOT_INO).unwrap();
        assert!(root.is_dir());
    }
}
