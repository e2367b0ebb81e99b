//! # Table-Space Allocator
//!
//! Per-table slot allocator. Each table owns one of these; it carves row
//! slots out of a current "fresh" extent and recycles released slots
//! through a capacity-bounded [`FreeBlockIndex`]. When the fresh extent is
//! exhausted it asks the shared global space manager for a new run of main
//! blocks and hands back the unused tail of the old one.
//!
//! ## Positions and Scale
//!
//! All positions returned by the allocator are scaled: the byte offset
//! divided by the file scale (a power of two). Index nodes store scaled
//! positions in 32-bit fields, so a scale of 16 addresses 64 GiB of data
//! file. Sizes stay in bytes throughout.
//!
//! ## Allocation Strategy
//!
//! ```text
//! get_file_position(row_size, as_blocks)
//!       │
//!       ├─ capacity == 0, or size > 2^31-1 ──────────► bump fresh extent
//!       │
//!       ├─ first-fit search of the free-block index
//!       │     │
//!       │     ├─ hit: take entry, reinsert the remainder
//!       │     │
//!       │     └─ block-aligned request: walk forward to an entry whose
//!       │        position is aligned to the fixed block unit
//!       │
//!       └─ miss ──────────────────────────────────────► bump fresh extent
//!
//! bump fresh extent: when the extent lacks room, release the tail
//! [free_pos, limit) and request max(main_block_size, smallest power-of-
//! two multiple >= row_size) from the global manager.
//! ```
//!
//! ## Failure Semantics
//!
//! The only failure is space exhaustion, surfaced as an error naming the
//! space id and the requested size. The allocator never partially
//! allocates: a failed request leaves every structure as it was.

use eyre::{bail, Result};
use tracing::debug;

use crate::config::{FIXED_BLOCK_SIZE_UNIT, MAX_LOOKUP_POSITION};
use crate::storage::{FreeBlockIndex, SharedSpaceManager};

fn binary_multiple_ceiling(value: usize, unit: usize) -> usize {
    (value + unit - 1) & !(unit - 1)
}

pub struct TableSpaceAllocator {
    space_manager: SharedSpaceManager,
    space_id: u32,
    scale: usize,
    main_block_size: usize,
    capacity: usize,
    lookup: FreeBlockIndex,

    // current fresh extent, byte positions
    fresh_block_pos: i64,
    fresh_block_free_pos: i64,
    fresh_block_limit: i64,

    release_count: u64,
    request_count: u64,
    request_size: u64,
    free_block_size: u64,
    is_modified: bool,
}

impl TableSpaceAllocator {
    pub fn new(
        space_manager: SharedSpaceManager,
        space_id: u32,
        main_block_size: usize,
        capacity: usize,
        file_scale: usize,
    ) -> Self {
        debug_assert!(file_scale.is_power_of_two());

        Self {
            space_manager,
            space_id,
            scale: file_scale,
            main_block_size,
            capacity,
            lookup: FreeBlockIndex::new(capacity),
            fresh_block_pos: 0,
            fresh_block_free_pos: 0,
            fresh_block_limit: 0,
            release_count: 0,
            request_count: 0,
            request_size: 0,
            free_block_size: 0,
            is_modified: false,
        }
    }

    pub fn space_id(&self) -> u32 {
        self.space_id
    }

    pub fn scale(&self) -> usize {
        self.scale
    }

    pub fn has_file_room(&self, block_size: usize) -> bool {
        self.fresh_block_limit - self.fresh_block_free_pos > block_size as i64
    }

    /// Installs a fresh extent read back from the file header, releasing
    /// whatever remained of the previous one.
    pub fn add_file_block(&mut self, block_pos: i64, block_free_pos: i64, block_limit: i64) {
        let released = self.fresh_block_limit - self.fresh_block_free_pos;

        if released > 0 {
            self.release(self.fresh_block_free_pos / self.scale as i64, released as usize);
        }

        self.initialise_file_block(block_pos, block_free_pos, block_limit);
    }

    pub fn initialise_file_block(
        &mut self,
        block_pos: i64,
        block_free_pos: i64,
        block_limit: i64,
    ) {
        self.fresh_block_pos = block_pos;
        self.fresh_block_free_pos = block_free_pos;
        self.fresh_block_limit = block_limit;
    }

    fn get_new_main_block(&mut self, row_size: usize) -> bool {
        let released = self.fresh_block_limit - self.fresh_block_free_pos;

        if released > 0 {
            self.release(self.fresh_block_free_pos / self.scale as i64, released as usize);
        }

        let mut block_size = self.main_block_size;

        while block_size < row_size {
            block_size += block_size;
        }

        let block_count = block_size / self.main_block_size;
        let position = self
            .space_manager
            .lock()
            .get_file_blocks(self.space_id, block_count);

        if position < 0 {
            return false;
        }

        debug!(
            space_id = self.space_id,
            position, block_size, "fresh extent acquired"
        );

        self.fresh_block_pos = position;
        self.fresh_block_free_pos = position;
        self.fresh_block_limit = position + block_size as i64;

        true
    }

    fn get_new_block(&mut self, row_size: usize, as_blocks: bool) -> Result<i64> {
        let row_size = if as_blocks {
            binary_multiple_ceiling(row_size, FIXED_BLOCK_SIZE_UNIT)
        } else {
            row_size
        };

        if self.fresh_block_free_pos + row_size as i64 > self.fresh_block_limit
            && !self.get_new_main_block(row_size)
        {
            bail!(
                "no space available in table space {}: requested {} bytes",
                self.space_id,
                row_size
            );
        }

        let mut position = self.fresh_block_free_pos;

        if as_blocks {
            position = binary_multiple_ceiling(position as usize, FIXED_BLOCK_SIZE_UNIT) as i64;

            let released = position - self.fresh_block_free_pos;

            if released > 0 {
                self.release(self.fresh_block_free_pos / self.scale as i64, released as usize);

                self.fresh_block_free_pos = position;
            }
        }

        self.fresh_block_free_pos += row_size as i64;

        Ok(position / self.scale as i64)
    }

    /// Marks the extent at scaled position `pos` free. Positions at or
    /// beyond the 32-bit bound are dropped here; they become the global
    /// manager's responsibility on close. A full index is flushed to the
    /// global manager first.
    pub fn release(&mut self, pos: i64, row_size: usize) {
        self.is_modified = true;
        self.release_count += 1;

        if self.lookup.is_full() {
            self.reset_list();
        }

        if pos < MAX_LOOKUP_POSITION {
            // capacity checked above, position bounded by the branch
            let _ = self.lookup.add(pos, row_size);

            self.free_block_size += row_size as u64;
        }
    }

    /// Returns the scaled position of a slot at least `row_size` bytes
    /// long, reusing a released extent when one fits, else carving the
    /// fresh extent. Block-aligned requests round the size up to the
    /// fixed block unit and only accept aligned positions.
    pub fn get_file_position(&mut self, row_size: usize, as_blocks: bool) -> Result<i64> {
        if self.capacity == 0 {
            return self.get_new_block(row_size, as_blocks);
        }

        let row_size = if as_blocks {
            binary_multiple_ceiling(row_size, FIXED_BLOCK_SIZE_UNIT)
        } else {
            row_size
        };

        if row_size > i32::MAX as usize {
            return self.get_new_block(row_size, as_blocks);
        }

        let mut index = match self.lookup.find_first_greater_equal(row_size) {
            Some(i) => i,
            None => return self.get_new_block(row_size, as_blocks),
        };

        if as_blocks {
            let unit = (FIXED_BLOCK_SIZE_UNIT / self.scale) as i64;

            while index < self.lookup.len() {
                if self.lookup.get_position(index) % unit == 0 {
                    break;
                }

                index += 1;
            }

            if index == self.lookup.len() {
                return self.get_new_block(row_size, as_blocks);
            }
        }

        // statistics for successful requests only
        self.request_count += 1;
        self.request_size += row_size as u64;

        let length = self.lookup.get_size(index);
        let difference = length - row_size;
        let key = self.lookup.get_position(index);

        self.lookup.remove(index);

        if difference > 0 {
            let pos = key + (row_size / self.scale) as i64;

            // the remainder stays below the bound its parent satisfied
            let _ = self.lookup.add(pos, difference);
        }

        self.free_block_size -= row_size as u64;

        Ok(key)
    }

    pub fn free_block_count(&self) -> usize {
        self.lookup.len()
    }

    pub fn free_block_size(&self) -> u64 {
        self.free_block_size
    }

    pub fn release_count(&self) -> u64 {
        self.release_count
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub fn request_size(&self) -> u64 {
        self.request_size
    }

    pub fn is_modified(&self) -> bool {
        self.is_modified
    }

    /// Hands the free set to the global manager and restarts the index
    /// empty. Invoked internally when the index reaches capacity.
    pub fn reset_list(&mut self) {
        let blocks = self.lookup.drain();

        debug!(
            space_id = self.space_id,
            flushed = blocks.len(),
            "free block index flushed to space manager"
        );

        self.space_manager
            .lock()
            .free_table_space(self.space_id, &blocks);

        self.free_block_size = 0;
    }

    /// Hands the free set and the fresh-extent tail back to the global
    /// manager and resets all state.
    pub fn close(&mut self) {
        let blocks = self.lookup.drain();

        let mut manager = self.space_manager.lock();

        manager.free_table_space(self.space_id, &blocks);
        manager.free_table_space_range(
            self.space_id,
            self.fresh_block_free_pos,
            self.fresh_block_limit,
        );

        drop(manager);

        self.free_block_size = 0;
        self.fresh_block_pos = 0;
        self.fresh_block_free_pos = 0;
        self.fresh_block_limit = 0;
    }
}
