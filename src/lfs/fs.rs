//! Filesystem operations over a mounted image.
//!
//! The filesystem is flat: the root directory holds regular files and nothing
//! else. Every mutating operation appends its blocks to the log, then commits
//! by writing a checkpoint; a crash in between is observed at remount as the
//! pre-operation state.

use crate::disk::Disk;
use crate::error::Error;
use crate::error::Result;
use crate::inode::InodeMap;
use crate::layout;
use crate::layout::BLOCK_SIZE;
use crate::layout::Block;
use crate::layout::Dirent;
use crate::layout::INODE_TYPE_FILE;
use crate::layout::Inode;
use crate::layout::LFS_MAGIC;
use crate::layout::MAX_DIRECT_PTRS;
use crate::layout::MAX_NAME_LEN;
use crate::layout::ROOT_INO;
use crate::layout::Superblock;
use log::debug;
use log::info;
use std::mem::size_of;
use std::path::Path;

/// The type of a file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileKind {
    /// A regular file.
    Regular,
    /// A directory.
    Directory,
}

/// The attributes of a file, as returned by [`Lfs::getattr`].
#[derive(Clone, Copy, Debug)]
pub struct FileAttr {
    /// The file's inode number.
    pub ino: u32,
    /// The size of the file's content in bytes.
    pub size: u32,
    /// The number of hard links to the file.
    pub nlinks: u32,
    /// The file's type.
    pub kind: FileKind,
}

/// A mounted filesystem.
///
/// The session owns the device handle and the in-memory state: the superblock
/// copy, whose `log_tail` field is kept current, and the inode map. State is
/// mutated on the caller's thread only and reaches the disk through log
/// appends followed by a checkpoint.
pub struct Lfs {
    /// The handle to the underlying image.
    pub(crate) disk: Disk,
    /// The in-memory copy of the superblock.
    pub(crate) sb: Superblock,
    /// The in-memory inode map.
    pub(crate) inode_map: InodeMap,
}

impl Lfs {
    /// Mounts the image at the given path.
    ///
    /// Reads the superblock and the inode map and restores the log tail from
    /// the superblock's tail field. Whatever the last checkpoint persisted is
    /// the state; there is no journal to replay.
    pub fn mount(path: &Path) -> Result<Self> {
        let disk = Disk::open(path)?;

        let mut buf = [0u8; BLOCK_SIZE as usize];
        disk.read(0, &mut buf)?;
        let sb: Superblock = layout::from_block(&buf);
        if sb.magic != LFS_MAGIC {
            return Err(Error::BadFormat);
        }

        disk.read(sb.inode_map_block, &mut buf)?;
        let inode_map = InodeMap::from_block(&buf);

        let total = sb.total_blocks;
        let tail = sb.log_tail;
        info!("mounted: {total} blocks, log tail at block {tail}");
        Ok(Self {
            disk,
            sb,
            inode_map,
        })
    }

    /// Unmounts the filesystem: writes a final checkpoint and closes the
    /// image.
    pub fn unmount(mut self) -> Result<()> {
        self.checkpoint()?;
        info!("unmounted");
        Ok(())
    }

    /// Resolves the given path to an inode number.
    ///
    /// Only the root and names directly under it exist; anything deeper does
    /// not resolve.
    fn path_to_inode(&self, path: &str) -> Result<u32> {
        if path == "/" {
            return Ok(ROOT_INO);
        }
        let name = path.strip_prefix('/').ok_or(Error::NotFound)?;
        if name.is_empty() || name.contains('/') {
            return Err(Error::NotFound);
        }

        let root = self.read_inode(ROOT_INO)?;
        let direct = root.direct;
        if direct[0] == 0 {
            return Err(Error::NotFound);
        }
        let mut buf = [0u8; BLOCK_SIZE as usize];
        self.disk.read(direct[0], &mut buf)?;

        let count = root.size as usize / size_of::<Dirent>();
        for i in 0..count {
            let ent = layout::dirent_at(&buf, i);
            if ent.inode_no != 0 && ent.name() == name {
                return Ok(ent.inode_no);
            }
        }
        Err(Error::NotFound)
    }

    /// Returns the attributes of the file at the given path.
    pub fn getattr(&self, path: &str) -> Result<FileAttr> {
        let ino = self.path_to_inode(path)?;
        let inode = self.read_inode(ino)?;

        let (kind, nlinks) = if inode.is_dir() {
            (FileKind::Directory, 2)
        } else {
            (FileKind::Regular, u32::max(inode.nlinks, 1))
        };
        Ok(FileAttr {
            ino: inode.inode_no,
            size: inode.size,
            nlinks,
            kind,
        })
    }

    /// Lists the names in the directory at the given path.
    ///
    /// `.` and `..` are always reported first.
    pub fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let ino = self.path_to_inode(path)?;
        let inode = self.read_inode(ino)?;
        if !inode.is_dir() {
            return Err(Error::NotDirectory);
        }

        let mut names = vec![".".to_owned(), "..".to_owned()];
        let direct = inode.direct;
        if direct[0] == 0 {
            return Ok(names);
        }
        let mut buf = [0u8; BLOCK_SIZE as usize];
        self.disk.read(direct[0], &mut buf)?;

        let count = inode.size as usize / size_of::<Dirent>();
        for i in 0..count {
            let ent = layout::dirent_at(&buf, i);
            let name = ent.name();
            if ent.inode_no != 0 && name != "." && name != ".." {
                names.push(name.to_owned());
            }
        }
        Ok(names)
    }

    /// Reads up to `size` bytes at `offset` from the file at the given path.
    ///
    /// Reads past the end of the file are shortened; a zero direct pointer is
    /// a hole and reads as zeros.
    pub fn read(&self, path: &str, offset: u64, size: usize) -> Result<Vec<u8>> {
        let ino = self.path_to_inode(path)?;
        let inode = self.read_inode(ino)?;
        if inode.is_dir() {
            return Err(Error::IsDirectory);
        }

        let file_size = inode.size as u64;
        if offset >= file_size {
            return Ok(Vec::new());
        }
        let size = size.min((file_size - offset) as usize);
        let direct = inode.direct;

        let mut out = vec![0u8; size];
        let mut done = 0;
        while done < size {
            let pos = offset as usize + done;
            let idx = pos / BLOCK_SIZE as usize;
            let off = pos % BLOCK_SIZE as usize;
            let chunk = usize::min(BLOCK_SIZE as usize - off, size - done);

            let mut data = [0u8; BLOCK_SIZE as usize];
            if direct[idx] != 0 {
                self.disk.read(direct[idx], &mut data)?;
            }
            out[done..done + chunk].copy_from_slice(&data[off..off + chunk]);
            done += chunk;
        }
        Ok(out)
    }

    /// Creates an empty regular file directly under the root.
    ///
    /// No data block is allocated: the direct pointers stay clear until the
    /// first write.
    pub fn create(&mut self, path: &str) -> Result<()> {
        let Some(name) = path.strip_prefix('/') else {
            return Err(Error::PermissionDenied);
        };
        if name.is_empty() || name.contains('/') {
            return Err(Error::PermissionDenied);
        }
        if name.len() >= MAX_NAME_LEN {
            return Err(Error::NameTooLong);
        }
        match self.path_to_inode(path) {
            Ok(_) => return Err(Error::Exists),
            Err(Error::NotFound) => {}
            Err(err) => return Err(err),
        }

        let ino = self.inode_map.allocate()?;
        if self.gc_needed() {
            self.collect()?;
        }
        debug!("create: {path} -> inode {ino}");

        self.write_inode(&Inode::new(ino, INODE_TYPE_FILE))?;

        // Register the name under the root
        let mut root = self.read_inode(ROOT_INO)?;
        let direct = root.direct;
        let mut buf = [0u8; BLOCK_SIZE as usize];
        if direct[0] != 0 {
            self.disk.read(direct[0], &mut buf)?;
        }
        let slot = root.size as usize / size_of::<Dirent>();
        if slot * size_of::<Dirent>() >= BLOCK_SIZE as usize {
            return Err(Error::NoSpace);
        }
        layout::set_dirent(&mut buf, slot, &Dirent::new(ino, name));

        let dir_block = self.append_meta(&buf)?;
        let mut direct = root.direct;
        direct[0] = dir_block;
        root.direct = direct;
        root.size = root.size + size_of::<Dirent>() as u32;
        self.write_inode(&root)?;

        self.checkpoint()
    }

    /// Writes `buf` at `offset` into the file at the given path and returns
    /// the number of bytes written.
    ///
    /// Writes starting at or past the maximum file size fail with
    /// [`Error::TooLarge`]; writes crossing it are shortened.
    pub fn write(&mut self, path: &str, offset: u64, buf: &[u8]) -> Result<usize> {
        let ino = self.path_to_inode(path)?;
        let mut inode = self.read_inode(ino)?;
        if inode.is_dir() {
            return Err(Error::IsDirectory);
        }

        let max_size = MAX_DIRECT_PTRS as u64 * BLOCK_SIZE as u64;
        if offset >= max_size {
            return Err(Error::TooLarge);
        }
        let size = buf.len().min((max_size - offset) as usize);
        if size == 0 {
            return Ok(0);
        }
        debug!("write: {path} offset {offset} size {size}");

        let first = (offset / BLOCK_SIZE as u64) as usize;
        let last = ((offset + size as u64 - 1) / BLOCK_SIZE as u64) as usize;
        for idx in first..=last {
            let block_start = idx as u64 * BLOCK_SIZE as u64;
            let write_start = u64::max(offset, block_start);
            let write_end = u64::min(offset + size as u64, block_start + BLOCK_SIZE as u64);
            let block_off = (write_start - block_start) as usize;
            let buf_off = (write_start - offset) as usize;
            let chunk = (write_end - write_start) as usize;

            // Read-modify-write: bytes of the block outside the written range
            // are preserved, holes start out as zeros
            let mut data = self.materialize_block(&inode, idx)?;
            data[block_off..block_off + chunk].copy_from_slice(&buf[buf_off..buf_off + chunk]);

            if self.gc_needed() {
                self.collect()?;
                // The collection may have moved both the inode block and the
                // data blocks: reload the inode and rebuild the buffer from
                // the relocated pointer
                inode = self.read_inode(ino)?;
                data = self.materialize_block(&inode, idx)?;
                data[block_off..block_off + chunk]
                    .copy_from_slice(&buf[buf_off..buf_off + chunk]);
            }

            let new_block = self.append(&data, ino, idx as u32)?;
            let mut direct = inode.direct;
            direct[idx] = new_block;
            inode.direct = direct;
        }

        let end = (offset + size as u64) as u32;
        if end > inode.size {
            inode.size = end;
        }
        self.write_inode(&inode)?;
        self.checkpoint()?;
        Ok(size)
    }

    /// Reads the current content of the file's `idx`th logical block, or
    /// zeros when the block is a hole.
    fn materialize_block(&self, inode: &Inode, idx: usize) -> Result<Block> {
        let mut data = [0u8; BLOCK_SIZE as usize];
        let direct = inode.direct;
        if direct[idx] != 0 {
            self.disk.read(direct[idx], &mut data)?;
        }
        Ok(data)
    }

    /// Truncates the file at the given path.
    ///
    /// Only truncation to an empty file is supported. The dropped data blocks
    /// become dead and are reclaimed by the next collection.
    pub fn truncate(&mut self, path: &str, size: u64) -> Result<()> {
        if size != 0 {
            return Err(Error::PermissionDenied);
        }
        let ino = self.path_to_inode(path)?;
        let mut inode = self.read_inode(ino)?;

        inode.size = 0;
        inode.direct = [0; MAX_DIRECT_PTRS];
        self.write_inode(&inode)?;
        self.checkpoint()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::format;
    use crate::layout::DEFAULT_TOTAL_BLOCKS;
    use tempfile::NamedTempFile;

    fn fresh_fs() -> (NamedTempFile, Lfs) {
        let img = NamedTempFile::new().unwrap();
        format::format(img.path(), DEFAULT_TOTAL_BLOCKS, &[]).unwrap();
        let fs = Lfs::mount(img.path()).unwrap();
        (img, fs)
    }

    #[test]
    fn fresh_root_listing() {
        let (_img, fs) = fresh_fs();
        assert_eq!(fs.readdir("/").unwrap(), [".", ".."]);

        let attr = fs.getattr("/").unwrap();
        assert_eq!(attr.ino, ROOT_INO);
        assert_eq!(attr.kind, FileKind::Directory);
        assert_eq!(attr.nlinks, 2);
    }

    #[test]
    fn create_write_read() {
        let (_img, mut fs) = fresh_fs();
        fs.create("/a").unwrap();
        assert_eq!(fs.write("/a", 0, b"hello").unwrap(), 5);
        assert_eq!(fs.read("/a", 0, 5).unwrap(), b"hello");

        let attr = fs.getattr("/a").unwrap();
        assert_eq!(attr.size, 5);
        assert_eq!(attr.kind, FileKind::Regular);
        assert_eq!(attr.nlinks, 1);

        assert_eq!(fs.readdir("/").unwrap(), [".", "..", "a"]);
    }

    #[test]
    fn remount_persists() {
        let img = NamedTempFile::new().unwrap();
        format::format(img.path(), DEFAULT_TOTAL_BLOCKS, &[]).unwrap();

        let mut fs = Lfs::mount(img.path()).unwrap();
        fs.create("/a").unwrap();
        fs.write("/a", 0, b"hello").unwrap();
        fs.unmount().unwrap();

        let fs = Lfs::mount(img.path()).unwrap();
        assert_eq!(fs.read("/a", 0, 5).unwrap(), b"hello");
        assert_eq!(fs.getattr("/a").unwrap().size, 5);
    }

    #[test]
    fn create_existing_fails() {
        let (_img, mut fs) = fresh_fs();
        fs.create("/a").unwrap();
        assert!(matches!(fs.create("/a"), Err(Error::Exists)));
    }

    #[test]
    fn name_length_bounds() {
        let (_img, mut fs) = fresh_fs();

        let ok = format!("/{}", "x".repeat(MAX_NAME_LEN - 1));
        fs.create(&ok).unwrap();
        assert_eq!(fs.getattr(&ok).unwrap().size, 0);

        let long = format!("/{}", "x".repeat(MAX_NAME_LEN));
        assert!(matches!(fs.create(&long), Err(Error::NameTooLong)));
    }

    #[test]
    fn nested_paths_rejected() {
        let (_img, mut fs) = fresh_fs();
        assert!(matches!(fs.create("/a/b"), Err(Error::PermissionDenied)));
        assert!(matches!(fs.getattr("/a/b"), Err(Error::NotFound)));
        assert!(matches!(fs.read("/a/b", 0, 1), Err(Error::NotFound)));
    }

    #[test]
    fn kind_mismatches() {
        let (_img, mut fs) = fresh_fs();
        fs.create("/a").unwrap();
        assert!(matches!(fs.readdir("/a"), Err(Error::NotDirectory)));
        assert!(matches!(fs.read("/", 0, 1), Err(Error::IsDirectory)));
        assert!(matches!(fs.write("/", 0, b"x"), Err(Error::IsDirectory)));
    }

    #[test]
    fn write_size_bounds() {
        let (_img, mut fs) = fresh_fs();
        fs.create("/a").unwrap();

        let max = MAX_DIRECT_PTRS as u64 * BLOCK_SIZE as u64;
        assert_eq!(fs.write("/a", max - 1, b"z").unwrap(), 1);
        assert_eq!(fs.getattr("/a").unwrap().size as u64, max);
        assert_eq!(fs.read("/a", max - 1, 8).unwrap(), b"z");

        assert!(matches!(fs.write("/a", max, b"z"), Err(Error::TooLarge)));

        // A write crossing the limit is shortened
        assert_eq!(fs.write("/a", max - 2, b"abc").unwrap(), 2);
        assert_eq!(fs.read("/a", max - 2, 8).unwrap(), b"ab");
    }

    #[test]
    fn sparse_read_returns_zeros() {
        let (_img, mut fs) = fresh_fs();
        fs.create("/a").unwrap();
        // Block 0 is never written and stays a hole
        fs.write("/a", 5000, b"x").unwrap();

        let data = fs.read("/a", 0, 5001).unwrap();
        assert_eq!(data.len(), 5001);
        assert!(data[..5000].iter().all(|b| *b == 0));
        assert_eq!(data[5000], b'x');
    }

    #[test]
    fn partial_overwrite_preserves_rest() {
        let (_img, mut fs) = fresh_fs();
        fs.create("/a").unwrap();
        fs.write("/a", 0, &[b'A'; 2 * BLOCK_SIZE as usize]).unwrap();
        // Straddles the boundary between logical blocks 0 and 1
        fs.write("/a", BLOCK_SIZE as u64 - 6, b"0123456789").unwrap();

        let data = fs.read("/a", 0, 2 * BLOCK_SIZE as usize).unwrap();
        assert!(data[..BLOCK_SIZE as usize - 6].iter().all(|b| *b == b'A'));
        assert_eq!(
            &data[BLOCK_SIZE as usize - 6..BLOCK_SIZE as usize + 4],
            b"0123456789"
        );
        assert!(data[BLOCK_SIZE as usize + 4..].iter().all(|b| *b == b'A'));
    }

    #[test]
    fn rewrite_is_idempotent() {
        let (_img, mut fs) = fresh_fs();
        fs.create("/a").unwrap();
        fs.write("/a", 0, b"same bytes").unwrap();
        fs.write("/a", 0, b"same bytes").unwrap();

        assert_eq!(fs.getattr("/a").unwrap().size, 10);
        assert_eq!(fs.read("/a", 0, 10).unwrap(), b"same bytes");
    }

    #[test]
    fn truncate_to_zero() {
        let (_img, mut fs) = fresh_fs();
        fs.create("/a").unwrap();
        fs.write("/a", 0, b"hello").unwrap();

        fs.truncate("/a", 0).unwrap();
        assert_eq!(fs.getattr("/a").unwrap().size, 0);
        assert_eq!(fs.read("/a", 0, 16).unwrap(), b"");

        assert!(matches!(fs.truncate("/a", 1), Err(Error::PermissionDenied)));
    }

    #[test]
    fn read_past_end_is_empty() {
        let (_img, mut fs) = fresh_fs();
        fs.create("/a").unwrap();
        fs.write("/a", 0, b"abc").unwrap();
        assert_eq!(fs.read("/a", 3, 10).unwrap(), b"");
        assert_eq!(fs.read("/a", 100, 10).unwrap(), b"");
        // Length clamped to the end of the file
        assert_eq!(fs.read("/a", 1, 10).unwrap(), b"bc");
    }

    #[test]
    fn mount_rejects_foreign_image() {
        let img = NamedTempFile::new().unwrap();
        img.as_file()
            .set_len(DEFAULT_TOTAL_BLOCKS as u64 * BLOCK_SIZE as u64)
            .unwrap();
        assert!(matches!(Lfs::mount(img.path()), Err(Error::BadFormat)));
    }
}
