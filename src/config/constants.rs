//! # Engine Configuration Constants
//!
//! This module centralizes the storage-engine constants, grouping
//! interdependent values together. Constants that depend on each other are
//! co-located to prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! DEFAULT_FILE_SCALE (16)
//!       │
//!       ├─> Row positions are stored divided by the scale, so a 32-bit
//!       │   field addresses scale * 2^32 bytes of data file.
//!       │
//!       └─> FIXED_BLOCK_SIZE_UNIT must be a multiple of the scale:
//!           block-aligned allocations are expressed in scaled positions
//!           and tested with FIXED_BLOCK_SIZE_UNIT / scale.
//!
//! DEFAULT_MAIN_BLOCK_SIZE (128 KiB)
//!       │
//!       └─> When a row exceeds the main block size, the allocator grows
//!           the request by doubling until it fits (power-of-two multiple
//!           of the main block size).
//!
//! DEFAULT_SPACE_CAPACITY (2048)
//!       │
//!       └─> Bound on the per-table free-block index. When the index is
//!           full the accumulated free set is flushed to the global space
//!           manager and the index restarts empty.
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `DEFAULT_FILE_SCALE` is a power of two.
//! 2. `FIXED_BLOCK_SIZE_UNIT % DEFAULT_FILE_SCALE == 0`.
//! 3. `DEFAULT_MAIN_BLOCK_SIZE % FIXED_BLOCK_SIZE_UNIT == 0`.

/// Power-of-two divisor applied to byte offsets so 32-bit ints suffice as
/// row positions in index nodes.
pub const DEFAULT_FILE_SCALE: usize = 16;

/// Allocation unit for block-aligned requests (blob and lob pages).
/// Ordinary rows need only scale-byte alignment.
pub const FIXED_BLOCK_SIZE_UNIT: usize = 4096;

/// Size of the extent requested from the global space manager when the
/// fresh extent is exhausted.
pub const DEFAULT_MAIN_BLOCK_SIZE: usize = 128 * 1024;

/// Capacity of the per-table free-block index.
pub const DEFAULT_SPACE_CAPACITY: usize = 2048;

/// Largest position admitted into a free-block index entry. Positions at
/// or beyond this bound stay with the global space manager.
pub const MAX_LOOKUP_POSITION: i64 = i32::MAX as i64;

/// Identity columns start here unless the column definition overrides it.
pub const DEFAULT_IDENTITY_START: i64 = 1;

/// Identity columns advance by this step unless overridden.
pub const DEFAULT_IDENTITY_INCREMENT: i64 = 1;

const _: () = assert!(DEFAULT_FILE_SCALE.is_power_of_two());
const _: () = assert!(FIXED_BLOCK_SIZE_UNIT % DEFAULT_FILE_SCALE == 0);
const _: () = assert!(DEFAULT_MAIN_BLOCK_SIZE % FIXED_BLOCK_SIZE_UNIT == 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_divides_block_unit() {
        assert_eq!(FIXED_BLOCK_SIZE_UNIT % DEFAULT_FILE_SCALE, 0);
    }

    #[test]
    fn main_block_is_block_unit_multiple() {
        assert_eq!(DEFAULT_MAIN_BLOCK_SIZE % FIXED_BLOCK_SIZE_UNIT, 0);
    }

    #[test]
    fn lookup_bound_is_i32_max() {
        assert_eq!(MAX_LOOKUP_POSITION, 2147483647);
    }
}
