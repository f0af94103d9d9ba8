//! The append-only write path.
//!
//! Every block that reaches the disk during normal operation goes through
//! [`Lfs::append`], which consumes the block at the current log tail. The
//! tail only ever advances here; it survives a restart through
//! [`Lfs::checkpoint`], which persists the inode map and the superblock.

use crate::error::Error;
use crate::error::Result;
use crate::fs::Lfs;
use crate::layout;
use crate::layout::BLOCK_SIZE;
use crate::layout::BLOCKS_PER_SEGMENT;
use crate::layout::Block;
use crate::layout::SegmentSummary;
use crate::layout::SummaryEntry;
use log::trace;

impl Lfs {
    /// Appends `buf` to the log and returns the block number consumed.
    ///
    /// `owner` and `block_idx` name the inode and the logical block the
    /// content belongs to; they are recorded in the containing segment's
    /// summary when that segment keeps one. Fails with [`Error::NoSpace`]
    /// when the log has reached the end of the image.
    pub(crate) fn append(&mut self, buf: &Block, owner: u32, block_idx: u32) -> Result<u32> {
        let mut block = self.sb.log_tail;
        if block >= self.sb.total_blocks {
            return Err(Error::NoSpace);
        }
        // The first block of a log-region segment is reserved for its
        // summary. When the tail lands on one, claim it with a blank summary
        // and place the payload right after; the tail rewind guarantees
        // every block past it is dead.
        if block % BLOCKS_PER_SEGMENT == 0 && block >= self.sb.log_start {
            self.disk.write(block, &[0u8; BLOCK_SIZE as usize])?;
            block += 1;
            if block >= self.sb.total_blocks {
                return Err(Error::NoSpace);
            }
        }

        self.disk.write(block, buf)?;
        self.record_provenance(block, owner, block_idx)?;

        self.sb.log_tail = block + 1;
        trace!("append: block {block} (inode {owner}, index {block_idx})");
        Ok(block)
    }

    /// Appends a metadata block (an inode or directory data), whose
    /// provenance is not tracked per owner.
    pub(crate) fn append_meta(&mut self, buf: &Block) -> Result<u32> {
        self.append(buf, 0, 0)
    }

    /// Records in the containing segment's summary which inode and logical
    /// block the block `block` holds.
    ///
    /// Nothing is recorded when the segment's first block lies outside the
    /// log region: the low blocks of segment 0 hold the superblock and the
    /// inode map.
    fn record_provenance(&mut self, block: u32, owner: u32, block_idx: u32) -> Result<()> {
        let base = block - block % BLOCKS_PER_SEGMENT;
        let pos = (block % BLOCKS_PER_SEGMENT) as usize;
        if pos == 0 || base < self.sb.log_start {
            return Ok(());
        }

        let mut buf = [0u8; BLOCK_SIZE as usize];
        self.disk.read(base, &mut buf)?;
        let mut summary: SegmentSummary = layout::from_block(&buf);
        let mut entries = summary.entries;
        entries[pos] = SummaryEntry {
            inode_no: owner,
            block_idx,
        };
        summary.entries = entries;
        self.disk.write(base, &layout::to_block(&summary))
    }

    /// Persists the inode map and the superblock.
    ///
    /// This is the commit point of every mutating operation: a crash before
    /// the checkpoint is observed at remount as the pre-operation state. The
    /// tail never moves here.
    pub(crate) fn checkpoint(&mut self) -> Result<()> {
        self.disk
            .write(self.sb.inode_map_block, &self.inode_map.to_block())?;
        self.disk.write(0, &layout::to_block(&self.sb))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::format;
    use crate::layout::DEFAULT_TOTAL_BLOCKS;
    use crate::layout::LOG_START_BLOCK;
    use tempfile::NamedTempFile;

    fn fresh_fs() -> (NamedTempFile, Lfs) {
        let img = NamedTempFile::new().unwrap();
        format::format(img.path(), DEFAULT_TOTAL_BLOCKS, &[]).unwrap();
        let fs = Lfs::mount(img.path()).unwrap();
        (img, fs)
    }

    #[test]
    fn append_advances_tail() {
        let (_img, mut fs) = fresh_fs();
        let tail = fs.sb.log_tail;

        let buf = [0x5a; BLOCK_SIZE as usize];
        let block = fs.append_meta(&buf).unwrap();
        assert_eq!(block, tail);
        assert_eq!({ fs.sb.log_tail }, tail + 1);

        let mut read_back = [0u8; BLOCK_SIZE as usize];
        fs.disk.read(block, &mut read_back).unwrap();
        assert_eq!(read_back, buf);
    }

    #[test]
    fn append_fails_when_full() {
        let (_img, mut fs) = fresh_fs();
        fs.sb.log_tail = fs.sb.total_blocks;

        let buf = [0u8; BLOCK_SIZE as usize];
        assert!(matches!(fs.append_meta(&buf), Err(Error::NoSpace)));
    }

    #[test]
    fn append_records_provenance() {
        let (_img, mut fs) = fresh_fs();
        // Land inside a segment whose summary lies in the log region
        fs.sb.log_tail = 2 * BLOCKS_PER_SEGMENT + 5;

        let buf = [1u8; BLOCK_SIZE as usize];
        let block = fs.append(&buf, 7, 3).unwrap();

        let mut sbuf = [0u8; BLOCK_SIZE as usize];
        fs.disk.read(2 * BLOCKS_PER_SEGMENT, &mut sbuf).unwrap();
        let summary: SegmentSummary = layout::from_block(&sbuf);
        let entry = summary.entries[(block % BLOCKS_PER_SEGMENT) as usize];
        assert_eq!({ entry.inode_no }, 7);
        assert_eq!({ entry.block_idx }, 3);
    }

    #[test]
    fn summary_position_is_skipped() {
        let (_img, mut fs) = fresh_fs();
        let base = 2 * BLOCKS_PER_SEGMENT;
        fs.sb.log_tail = base;

        // The tail lands on the segment's summary position: the payload is
        // placed right after it, over a freshly claimed summary
        let buf = [9u8; BLOCK_SIZE as usize];
        let block = fs.append(&buf, 4, 1).unwrap();
        assert_eq!(block, base + 1);
        assert_eq!({ fs.sb.log_tail }, base + 2);

        let mut read_back = [0u8; BLOCK_SIZE as usize];
        fs.disk.read(block, &mut read_back).unwrap();
        assert_eq!(read_back, buf);

        let mut sbuf = [0u8; BLOCK_SIZE as usize];
        fs.disk.read(base, &mut sbuf).unwrap();
        let summary: SegmentSummary = layout::from_block(&sbuf);
        let entry = summary.entries[1];
        assert_eq!({ entry.inode_no }, 4);
        assert_eq!({ entry.block_idx }, 1);
    }

    #[test]
    fn no_provenance_below_log_region() {
        let (_img, mut fs) = fresh_fs();
        // A fresh image appends into the reserved area first; block 0 of
        // segment 0 is the superblock and must not be touched
        assert!({ fs.sb.log_tail } < LOG_START_BLOCK);

        let buf = [3u8; BLOCK_SIZE as usize];
        fs.append(&buf, 5, 0).unwrap();

        let mut sb_block = [0u8; BLOCK_SIZE as usize];
        fs.disk.read(0, &mut sb_block).unwrap();
        let sb: crate::layout::Superblock = layout::from_block(&sb_block);
        assert_eq!({ sb.magic }, crate::layout::LFS_MAGIC);
    }

    #[test]
    fn checkpoint_persists_tail_and_map() {
        let (_img, mut fs) = fresh_fs();

        let buf = [0x11; BLOCK_SIZE as usize];
        let block = fs.append_meta(&buf).unwrap();
        fs.inode_map.set(9, block);
        fs.checkpoint().unwrap();

        let mut sb_block = [0u8; BLOCK_SIZE as usize];
        fs.disk.read(0, &mut sb_block).unwrap();
        let on_disk: crate::layout::Superblock = layout::from_block(&sb_block);
        assert_eq!({ on_disk.log_tail }, { fs.sb.log_tail });

        let mut map_block = [0u8; BLOCK_SIZE as usize];
        fs.disk.read(fs.sb.inode_map_block, &mut map_block).unwrap();
        assert_eq!(map_block, fs.inode_map.to_block());
    }
}
