//! # Row Stores
//!
//! A row store persists the rows of one table and owns everything the
//! table's indexes hang off: the node arena and one root accessor per
//! index. Three backings share the struct:
//!
//! - **Memory**: rows live on the heap, positions are a counter.
//! - **Cached**: rows are backed by the data file; positions come from the
//!   table-space allocator and are scaled byte offsets.
//! - **Text**: delimited-file backing; allocation works like cached.
//!
//! The backing is a closed sum dispatched by match — which variant a store
//! is decides where positions come from and whether index roots persist,
//! nothing else.
//!
//! ## Lifecycle Invariant
//!
//! Once `get_new_cached_object` returns a position, the row is reachable
//! through `row(pos)` until `commit` finalises it or `remove` takes it
//! out. `remove` on a file-backed store releases the row's slot back to
//! the table space.

use hashbrown::HashMap;

use eyre::{ensure, Result};

use crate::index::{NodeArena, NodeId};
use crate::rows::Row;
use crate::storage::index_roots::{format_index_roots, parse_index_roots};
use crate::storage::TableSpaceAllocator;
use crate::types::Value;

/// Fixed per-row overhead in the serialized image: position stamp.
const ROW_IMAGE_HEADER: usize = 4;

fn row_image_size(data: &[Value], scale: usize) -> usize {
    let raw = ROW_IMAGE_HEADER + data.iter().map(Value::storage_size).sum::<usize>();
    (raw + scale - 1) & !(scale - 1)
}

enum StoreBacking {
    Memory,
    Cached(TableSpaceAllocator),
    Text(TableSpaceAllocator),
}

pub struct RowStore {
    backing: StoreBacking,
    rows: HashMap<i64, Row>,
    arena: NodeArena,
    accessors: Vec<Option<NodeId>>,
    next_memory_pos: i64,
    index_count: usize,
    loaded_roots: Option<Vec<i64>>,
}

impl RowStore {
    pub fn memory(index_count: usize) -> Self {
        Self::with_backing(StoreBacking::Memory, index_count)
    }

    pub fn cached(space: TableSpaceAllocator, index_count: usize) -> Self {
        Self::with_backing(StoreBacking::Cached(space), index_count)
    }

    pub fn text(space: TableSpaceAllocator, index_count: usize) -> Self {
        Self::with_backing(StoreBacking::Text(space), index_count)
    }

    fn with_backing(backing: StoreBacking, index_count: usize) -> Self {
        Self {
            backing,
            rows: HashMap::new(),
            arena: NodeArena::new(),
            accessors: vec![None; index_count],
            next_memory_pos: 0,
            index_count,
            loaded_roots: None,
        }
    }

    pub fn is_file_based(&self) -> bool {
        matches!(self.backing, StoreBacking::Cached(_) | StoreBacking::Text(_))
    }

    pub fn index_count(&self) -> usize {
        self.index_count
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn space(&self) -> Option<&TableSpaceAllocator> {
        match &self.backing {
            StoreBacking::Memory => None,
            StoreBacking::Cached(space) | StoreBacking::Text(space) => Some(space),
        }
    }

    /// Allocates a new row holding `data` and returns its position. File
    /// backings draw the position from the table space; the memory
    /// backing bumps a counter.
    pub fn get_new_cached_object(&mut self, data: Vec<Value>) -> Result<i64> {
        let pos = match &mut self.backing {
            StoreBacking::Memory => {
                let pos = self.next_memory_pos;
                self.next_memory_pos += 1;
                pos
            }
            StoreBacking::Cached(space) | StoreBacking::Text(space) => {
                let size = row_image_size(&data, space.scale());
                space.get_file_position(size, false)?
            }
        };

        let row = Row::new(pos, data, self.index_count);
        self.rows.insert(pos, row);

        Ok(pos)
    }

    pub fn row(&self, pos: i64) -> Option<&Row> {
        self.rows.get(&pos)
    }

    pub fn row_mut(&mut self, pos: i64) -> Option<&mut Row> {
        self.rows.get_mut(&pos)
    }

    pub fn row_data(&self, pos: i64) -> &[Value] {
        &self
            .rows
            .get(&pos)
            .unwrap_or_else(|| panic!("internal invariant: row {} not in store", pos))
            .data
    }

    pub fn contains(&self, pos: i64) -> bool {
        self.rows.contains_key(&pos)
    }

    /// All row positions, sorted. Rebuild scans and full-table fallbacks
    /// use this; ordinary access goes through an index cursor.
    pub fn row_positions(&self) -> Vec<i64> {
        let mut positions: Vec<i64> = self.rows.keys().copied().collect();
        positions.sort_unstable();
        positions
    }

    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    /// Split borrow for index maintenance: read access to the rows for
    /// key comparison, write access to the arena and the root slots.
    pub(crate) fn index_parts(
        &mut self,
    ) -> (&HashMap<i64, Row>, &mut NodeArena, &mut [Option<NodeId>]) {
        (&self.rows, &mut self.arena, self.accessors.as_mut_slice())
    }

    pub fn accessor(&self, index: usize) -> Option<NodeId> {
        self.accessors[index]
    }

    pub fn set_accessor(&mut self, index: usize, node: Option<NodeId>) {
        self.accessors[index] = node;
    }

    pub(crate) fn set_row_node(&mut self, pos: i64, index: usize, node: Option<NodeId>) {
        if let Some(row) = self.rows.get_mut(&pos) {
            row.set_node(index, node);
        }
    }

    /// Finalises a staged row: the creating action is settled and the
    /// journal back-reference drops.
    pub fn commit(&mut self, pos: i64) {
        if let Some(row) = self.rows.get_mut(&pos) {
            row.set_row_action(None);
        }
    }

    /// Removes the row and, on file backings, returns its slot to the
    /// table space. The caller has already unlinked the row from every
    /// index.
    pub fn remove(&mut self, pos: i64) {
        let Some(row) = self.rows.remove(&pos) else {
            return;
        };

        if let StoreBacking::Cached(space) | StoreBacking::Text(space) = &mut self.backing {
            let size = row_image_size(&row.data, space.scale());
            space.release(pos, size);
        }
    }

    /// Drops every row and node and closes the table space. Used when a
    /// DDL rebuild fails and the new store is abandoned.
    pub fn release(&mut self) {
        self.rows.clear();
        self.arena.clear();
        for slot in self.accessors.iter_mut() {
            *slot = None;
        }

        if let StoreBacking::Cached(space) | StoreBacking::Text(space) = &mut self.backing {
            space.close();
        }
    }

    /// Serialises the index roots: the root node's row position per
    /// index, -1 for an empty index.
    pub fn get_index_roots_string(&self) -> String {
        let roots: Vec<i64> = self
            .accessors
            .iter()
            .map(|root| root.map(|n| self.arena.row_pos(n)).unwrap_or(-1))
            .collect();

        format_index_roots(&roots)
    }

    /// Accepts a persisted roots string. The positions are kept for the
    /// loader to rebind once row images are materialised.
    pub fn set_index_roots(&mut self, text: &str) -> Result<()> {
        let roots = parse_index_roots(text)?;

        ensure!(
            roots.len() == self.index_count,
            "index roots count {} does not match index count {}",
            roots.len(),
            self.index_count
        );

        self.loaded_roots = Some(roots);
        Ok(())
    }

    pub fn loaded_roots(&self) -> Option<&[i64]> {
        self.loaded_roots.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FIXED_BLOCK_SIZE_UNIT;
    use crate::storage::BlockSpaceManager;

    fn cached_store(index_count: usize) -> RowStore {
        let manager = BlockSpaceManager::with_block_size(4 * FIXED_BLOCK_SIZE_UNIT).shared();
        let space = TableSpaceAllocator::new(manager, 1, 4 * FIXED_BLOCK_SIZE_UNIT, 64, 16);
        RowStore::cached(space, index_count)
    }

    #[test]
    fn memory_store_positions_are_sequential() {
        let mut store = RowStore::memory(1);

        let a = store.get_new_cached_object(vec![Value::Int(1)]).unwrap();
        let b = store.get_new_cached_object(vec![Value::Int(2)]).unwrap();

        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(store.row_count(), 2);
    }

    #[test]
    fn cached_store_positions_are_scaled_slots() {
        let mut store = cached_store(1);

        let a = store.get_new_cached_object(vec![Value::Int(1)]).unwrap();
        let b = store.get_new_cached_object(vec![Value::Int(2)]).unwrap();

        assert_eq!(a, 0);
        // int row image: 4 header + 9 value = 13, rounded to scale 16 → 1 slot
        assert_eq!(b, 1);
    }

    #[test]
    fn row_reachable_until_removed() {
        let mut store = RowStore::memory(1);
        let pos = store.get_new_cached_object(vec![Value::Int(5)]).unwrap();

        assert!(store.contains(pos));
        store.commit(pos);
        assert!(store.contains(pos));

        store.remove(pos);
        assert!(!store.contains(pos));
    }

    #[test]
    fn remove_returns_slot_to_table_space() {
        let mut store = cached_store(1);

        let pos = store.get_new_cached_object(vec![Value::Int(1)]).unwrap();
        assert_eq!(store.space().unwrap().free_block_count(), 0);

        store.remove(pos);
        assert_eq!(store.space().unwrap().free_block_count(), 1);
    }

    #[test]
    fn roots_string_round_trips_through_parser() {
        let store = cached_store(3);

        let text = store.get_index_roots_string();
        assert_eq!(text, "-1 -1 -1");

        let parsed = parse_index_roots(&text).unwrap();
        assert_eq!(format_index_roots(&parsed), text);
    }

    #[test]
    fn set_index_roots_validates_count() {
        let mut store = cached_store(2);

        assert!(store.set_index_roots("1 -1").is_ok());
        assert_eq!(store.loaded_roots(), Some(&[1, -1][..]));

        assert!(store.set_index_roots("1 2 3").is_err());
    }

    #[test]
    fn release_clears_everything() {
        let mut store = cached_store(1);
        store.get_new_cached_object(vec![Value::Int(1)]).unwrap();

        store.release();

        assert_eq!(store.row_count(), 0);
        assert!(store.arena().is_empty());
        assert_eq!(store.accessor(0), None);
    }
}
