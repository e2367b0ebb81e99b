//! # Free-Block Index
//!
//! Ordered table of `(position, size)` pairs describing released file
//! extents, sorted by size so that allocation is a first-fit search by
//! minimum acceptable size.
//!
//! ## Design Overview
//!
//! The index is the in-memory core of per-table space reuse. Positions are
//! scaled file positions (bytes divided by the file scale) and must fit in
//! 32 bits; the caller routes larger positions straight to the global
//! space manager instead of adding them here.
//!
//! Entries are kept in a vector sorted by `(size, position)`. Insertion is
//! a binary search plus shift; lookup is a binary search for the first
//! entry whose size is greater than or equal to the requested size. When
//! several entries share a size, any of them may satisfy a request; the
//! position tie-break only keeps insertion deterministic.
//!
//! ## Capacity
//!
//! The index is capacity-bounded. It never grows past `capacity`; the
//! allocator that owns it flushes the accumulated free set to the global
//! space manager and starts fresh when the bound is reached.
//!
//! ## Invariants
//!
//! - Entries never overlap and never cover a live row.
//! - Every position is below 2^31 (caller-guaranteed).
//! - `len() <= capacity()` at all times.

use eyre::{ensure, Result};

/// A released extent: scaled file position plus size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    pub position: i64,
    pub size: usize,
}

#[derive(Debug)]
pub struct FreeBlockIndex {
    entries: Vec<FreeBlock>,
    capacity: usize,
}

impl FreeBlockIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Inserts a released extent, keeping the size order. The caller
    /// guarantees the position fits in 32 bits and the index is not full.
    pub fn add(&mut self, position: i64, size: usize) -> Result<()> {
        ensure!(!self.is_full(), "free block index is full: {}", self.capacity);
        ensure!(
            position <= i32::MAX as i64,
            "free block position exceeds 32-bit bound: {}",
            position
        );

        let at = self
            .entries
            .partition_point(|e| (e.size, e.position) < (size, position));
        self.entries.insert(at, FreeBlock { position, size });
        Ok(())
    }

    /// Index of the first entry whose size is greater than or equal to
    /// `min_size`, or `None` when no entry is large enough.
    pub fn find_first_greater_equal(&self, min_size: usize) -> Option<usize> {
        let at = self.entries.partition_point(|e| e.size < min_size);
        (at < self.entries.len()).then_some(at)
    }

    pub fn get_position(&self, index: usize) -> i64 {
        self.entries[index].position
    }

    pub fn get_size(&self, index: usize) -> usize {
        self.entries[index].size
    }

    pub fn remove(&mut self, index: usize) -> FreeBlock {
        self.entries.remove(index)
    }

    pub fn remove_all(&mut self) {
        self.entries.clear();
    }

    /// Empties the index and returns the accumulated free set, oldest
    /// ordering not preserved (size order). Used when flushing to the
    /// global space manager.
    pub fn drain(&mut self) -> Vec<FreeBlock> {
        std::mem::take(&mut self.entries)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FreeBlock> {
        self.entries.iter()
    }
}
