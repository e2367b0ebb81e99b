//! # Global Data-Space Manager
//!
//! The global space manager owns the data file as a whole and hands out
//! main blocks to per-table space allocators. It is the seam behind which
//! the file I/O primitives live; the engine only ever talks to the trait.
//!
//! ## Contract
//!
//! - `get_file_blocks` returns the byte position of a run of main blocks
//!   reserved for the given space, or -1 when the file cannot grow.
//! - `free_table_space` / `free_table_space_range` take back extents a
//!   table allocator no longer wants: either an accumulated free set or
//!   the unused tail of the current fresh extent.
//!
//! One instance is shared by every table of a database, behind a
//! `parking_lot::Mutex`.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::DEFAULT_MAIN_BLOCK_SIZE;
use crate::storage::FreeBlock;

/// Shared handle to the database's space manager.
pub type SharedSpaceManager = Arc<Mutex<dyn DataSpaceManager + Send>>;

pub trait DataSpaceManager {
    /// Size in bytes of one main block.
    fn main_block_size(&self) -> usize;

    /// Reserves `block_count` contiguous main blocks for `space_id` and
    /// returns the byte position of the run, or -1 when space is
    /// exhausted.
    fn get_file_blocks(&mut self, space_id: u32, block_count: usize) -> i64;

    /// Takes back a set of released extents (scaled positions).
    fn free_table_space(&mut self, space_id: u32, blocks: &[FreeBlock]);

    /// Takes back the byte range `[free_pos, limit)` of a fresh extent.
    fn free_table_space_range(&mut self, space_id: u32, free_pos: i64, limit: i64);
}

/// In-process space manager backing memory databases and tests. Grows a
/// virtual file by bumping a high-water mark; freed space is recorded per
/// space id but not reused across tables.
pub struct BlockSpaceManager {
    main_block_size: usize,
    next_free: i64,
    file_limit: Option<i64>,
    freed: HashMap<u32, Vec<FreeBlock>>,
}

impl BlockSpaceManager {
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_MAIN_BLOCK_SIZE)
    }

    pub fn with_block_size(main_block_size: usize) -> Self {
        Self {
            main_block_size,
            next_free: 0,
            file_limit: None,
            freed: HashMap::new(),
        }
    }

    /// Caps the virtual file. Requests past the cap fail, which is how
    /// tests exercise the no-space path.
    pub fn with_file_limit(mut self, limit: i64) -> Self {
        self.file_limit = Some(limit);
        self
    }

    pub fn shared(self) -> SharedSpaceManager {
        Arc::new(Mutex::new(self))
    }

    pub fn allocated_bytes(&self) -> i64 {
        self.next_free
    }

    pub fn freed_blocks(&self, space_id: u32) -> &[FreeBlock] {
        self.freed.get(&space_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for BlockSpaceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSpaceManager for BlockSpaceManager {
    fn main_block_size(&self) -> usize {
        self.main_block_size
    }

    fn get_file_blocks(&mut self, space_id: u32, block_count: usize) -> i64 {
        let bytes = (self.main_block_size * block_count) as i64;

        if let Some(limit) = self.file_limit {
            if self.next_free + bytes > limit {
                debug!(space_id, block_count, "file block request refused");
                return -1;
            }
        }

        let position = self.next_free;
        self.next_free += bytes;

        debug!(space_id, position, bytes, "file blocks reserved");

        position
    }

    fn free_table_space(&mut self, space_id: u32, blocks: &[FreeBlock]) {
        if blocks.is_empty() {
            return;
        }

        self.freed
            .entry(space_id)
            .or_default()
            .extend_from_slice(blocks);
    }

    fn free_table_space_range(&mut self, space_id: u32, free_pos: i64, limit: i64) {
        if limit <= free_pos {
            return;
        }

        self.freed.entry(space_id).or_default().push(FreeBlock {
            position: free_pos,
            size: (limit - free_pos) as usize,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_contiguous_and_sized() {
        let mut manager = BlockSpaceManager::with_block_size(1024);

        let first = manager.get_file_blocks(1, 1);
        let second = manager.get_file_blocks(1, 2);

        assert_eq!(first, 0);
        assert_eq!(second, 1024);
        assert_eq!(manager.allocated_bytes(), 3 * 1024);
    }

    #[test]
    fn limit_refuses_with_negative_position() {
        let mut manager = BlockSpaceManager::with_block_size(1024).with_file_limit(1024);

        assert_eq!(manager.get_file_blocks(1, 1), 0);
        assert_eq!(manager.get_file_blocks(1, 1), -1);
    }

    #[test]
    fn freed_space_is_recorded_per_space() {
        let mut manager = BlockSpaceManager::new();

        manager.free_table_space(
            7,
            &[FreeBlock {
                position: 16,
                size: 256,
            }],
        );
        manager.free_table_space_range(7, 4096, 8192);

        let freed = manager.freed_blocks(7);
        assert_eq!(freed.len(), 2);
        assert_eq!(freed[1].size, 4096);
        assert!(manager.freed_blocks(8).is_empty());
    }

    #[test]
    fn empty_range_is_ignored() {
        let mut manager = BlockSpaceManager::new();
        manager.free_table_space_range(1, 100, 100);
        assert!(manager.freed_blocks(1).is_empty());
    }
}
