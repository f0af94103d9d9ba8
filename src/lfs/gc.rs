//! The relocating garbage collector.
//!
//! Space is reclaimed in one pass: mark every block reachable from the inode
//! map, slide the live blocks of the log region toward its start, rewrite
//! every pointer that referenced a moved block and rewind the log tail over
//! the freed suffix.

use crate::error::Result;
use crate::fs::Lfs;
use crate::layout;
use crate::layout::BLOCK_SIZE;
use crate::layout::BLOCKS_PER_SEGMENT;
use crate::layout::GC_THRESHOLD;
use crate::layout::INODE_MAP_SIZE;
use crate::layout::Inode;
use log::debug;
use log::info;

impl Lfs {
    /// Tells whether a collection should run before the next append.
    ///
    /// Advisory: the write paths consult it, the log writer does not.
    pub(crate) fn gc_needed(&self) -> bool {
        self.sb.total_blocks - self.sb.log_tail < GC_THRESHOLD
    }

    /// Runs one collection pass.
    ///
    /// A pass with no dead blocks is a no-op. On success the tail has been
    /// rewound (never advanced) and a checkpoint has been written. If a move
    /// fails, the relocations that did complete are still applied to every
    /// pointer and persisted, so the in-memory map keeps describing valid
    /// on-disk blocks.
    pub(crate) fn collect(&mut self) -> Result<()> {
        let old_tail = self.sb.log_tail;
        let log_start = self.sb.log_start;
        let free = self.sb.total_blocks - old_tail;
        info!("gc: starting, log tail {old_tail}, {free} blocks free");

        let mut live = self.liveness_bitmap()?;
        let dead = (log_start..old_tail)
            .filter(|b| !live[*b as usize])
            .count();
        debug!(
            "gc: {dead} dead blocks out of {} used",
            old_tail.saturating_sub(log_start)
        );
        if dead == 0 {
            info!("gc: nothing to collect");
            return Ok(());
        }

        let mut relocations = Vec::new();
        let compacted = self.compact(&mut live, old_tail, &mut relocations);
        if !relocations.is_empty() {
            self.apply_relocations(&relocations)?;
        }
        if let Err(err) = compacted {
            self.checkpoint()?;
            return Err(err);
        }
        info!("gc: moved {} blocks", relocations.len());

        // Rewind the tail to the next segment boundary past the highest live
        // pointer; never advance it.
        let mut new_tail = self.high_water_mark()? + 1;
        if new_tail % BLOCKS_PER_SEGMENT != 0 {
            new_tail = (new_tail / BLOCKS_PER_SEGMENT + 1) * BLOCKS_PER_SEGMENT;
        }
        let new_tail = u32::min(new_tail, old_tail);
        self.sb.log_tail = new_tail;
        info!(
            "gc: rewound log tail {old_tail} -> {new_tail} ({} blocks reclaimed)",
            old_tail - new_tail
        );
        self.checkpoint()
    }

    /// Builds the liveness bitmap: a block is live iff an inode-map entry
    /// names it, or the direct array of a mapped inode does.
    ///
    /// Segment summaries record where the log writer once placed blocks, not
    /// whether those blocks still matter, and are never consulted here.
    fn liveness_bitmap(&self) -> Result<Vec<bool>> {
        let total = self.sb.total_blocks as usize;
        let mut live = vec![false; total];
        let mut buf = [0u8; BLOCK_SIZE as usize];
        for (_, block) in self.inode_map.iter() {
            if (block as usize) < total {
                live[block as usize] = true;
            }
            self.disk.read(block, &mut buf)?;
            let inode: Inode = layout::from_block(&buf);
            let direct = inode.direct;
            for ptr in direct {
                if ptr != 0 && (ptr as usize) < total {
                    live[ptr as usize] = true;
                }
            }
        }
        Ok(live)
    }

    /// Slides every live block of `[log_start, old_tail)` as far left as it
    /// can go: `dst` chases the next dead slot, `src` the next live block.
    /// The vacated source is zeroed and the move recorded in `relocations`.
    fn compact(
        &self,
        live: &mut [bool],
        old_tail: u32,
        relocations: &mut Vec<(u32, u32)>,
    ) -> Result<()> {
        let log_start = self.sb.log_start;
        let zero = [0u8; BLOCK_SIZE as usize];
        let mut buf = [0u8; BLOCK_SIZE as usize];
        let mut dst = log_start;
        for src in log_start..old_tail {
            if !live[src as usize] {
                continue;
            }
            while dst < src && live[dst as usize] {
                dst += 1;
            }
            if dst >= src {
                // Compact up to here already
                dst = src + 1;
                continue;
            }

            self.disk.read(src, &mut buf)?;
            self.disk.write(dst, &buf)?;
            self.disk.write(src, &zero)?;
            live[dst as usize] = true;
            live[src as usize] = false;
            relocations.push((src, dst));
            dst += 1;
        }
        Ok(())
    }

    /// Rewrites every pointer that referenced a moved block: inode-map
    /// entries first, then the direct arrays of every mapped inode.
    ///
    /// Inode blocks are patched in place. Their own block identity is
    /// unchanged by the patch, so this is the one sanctioned in-place
    /// mutation of log content.
    fn apply_relocations(&mut self, relocations: &[(u32, u32)]) -> Result<()> {
        for (old, new) in relocations {
            for ino in 0..INODE_MAP_SIZE as u32 {
                if self.inode_map.get(ino) == Some(*old) {
                    self.inode_map.set(ino, *new);
                }
            }
        }

        let mapped: Vec<(u32, u32)> = self.inode_map.iter().collect();
        let mut buf = [0u8; BLOCK_SIZE as usize];
        for (_, block) in mapped {
            self.disk.read(block, &mut buf)?;
            let mut inode: Inode = layout::from_block(&buf);
            let mut direct = inode.direct;
            let mut dirty = false;
            for ptr in direct.iter_mut() {
                if *ptr == 0 {
                    continue;
                }
                if let Some((_, new)) = relocations.iter().find(|(old, _)| *old == *ptr) {
                    *ptr = *new;
                    dirty = true;
                }
            }
            if dirty {
                inode.direct = direct;
                self.disk.write(block, &layout::to_block(&inode))?;
            }
        }
        Ok(())
    }

    /// Returns the highest block referenced by any live pointer, with the
    /// start of the log region as a floor.
    fn high_water_mark(&self) -> Result<u32> {
        let mut highest = self.sb.log_start;
        let mut buf = [0u8; BLOCK_SIZE as usize];
        for (_, block) in self.inode_map.iter() {
            highest = u32::max(highest, block);
            self.disk.read(block, &mut buf)?;
            let inode: Inode = layout::from_block(&buf);
            let direct = inode.direct;
            for ptr in direct {
                if ptr != 0 {
                    highest = u32::max(highest, ptr);
                }
            }
        }
        Ok(highest)
    }
}
