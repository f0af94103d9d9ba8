//! Block-level access to the filesystem image.

use crate::error::Result;
use crate::layout::BLOCK_SIZE;
use crate::layout::Block;
use std::fs::File;
use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// A handle to the image backing the filesystem.
///
/// Blocks are addressed by number and transferred whole. All I/O is
/// positional so the handle carries no cursor; a short transfer is an error.
/// The handle closes when the value is dropped, which covers every exit path
/// of the mount session.
pub struct Disk(File);

impl Disk {
    /// Opens the image at the given path for reading and writing.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self(file))
    }

    /// Reads the block `block` into `buf`.
    pub fn read(&self, block: u32, buf: &mut Block) -> Result<()> {
        self.0
            .read_exact_at(buf, block as u64 * BLOCK_SIZE as u64)?;
        Ok(())
    }

    /// Writes `buf` to the block `block`.
    pub fn write(&self, block: u32, buf: &Block) -> Result<()> {
        self.0
            .write_all_at(buf, block as u64 * BLOCK_SIZE as u64)?;
        Ok(())
    }
}
