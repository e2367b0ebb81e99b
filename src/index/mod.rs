//! # Ordered Index
//!
//! A balanced multi-column index over one table. The `Index` struct is
//! metadata only — name, ordinal position, key columns, uniqueness; the
//! nodes live in the row store's arena and the root hangs off the store's
//! accessor slot for this index's position. Keeping structure out of the
//! metadata is what lets a DDL rebuild swap stores without touching index
//! definitions.
//!
//! ## Key Order
//!
//! Keys compare lexicographically over the indexed columns using each
//! column type's collation. Equal keys (always legal on non-unique
//! indexes, legal on unique indexes when the key carries a null) fall back
//! to row-position order, so the tree's order is total and every row has
//! exactly one node per index.
//!
//! ## Uniqueness
//!
//! Insertion into a unique index first probes for an equal key. A hit is a
//! violation unless the incoming key carries a null in some indexed
//! column — SQL unique constraints admit any number of rows whose key is
//! not fully comparable.

mod tree;

pub use tree::{AvlNode, NodeArena, NodeId};

use std::cmp::Ordering;

use eyre::{bail, Result};
use smallvec::SmallVec;

use crate::storage::RowStore;
use crate::types::{DataType, Value};

/// Lexicographic comparison of two rows over a column map. `col_map[i]`
/// selects the column in both rows; `types[i]` supplies the collation.
pub fn compare_rows(
    a: &[Value],
    b: &[Value],
    col_map: &[usize],
    types: &[DataType],
) -> Ordering {
    for (i, &col) in col_map.iter().enumerate() {
        let order = types[i].compare(&a[col], &b[col]);
        if order != Ordering::Equal {
            return order;
        }
    }

    Ordering::Equal
}

#[derive(Debug, Clone)]
pub struct Index {
    name: String,
    position: usize,
    cols: SmallVec<[usize; 4]>,
    col_types: SmallVec<[DataType; 4]>,
    unique: bool,
    constraint: bool,
    primary: bool,
}

impl Index {
    pub fn new(
        name: impl Into<String>,
        position: usize,
        cols: impl IntoIterator<Item = usize>,
        col_types: impl IntoIterator<Item = DataType>,
        unique: bool,
    ) -> Self {
        Self {
            name: name.into(),
            position,
            cols: cols.into_iter().collect(),
            col_types: col_types.into_iter().collect(),
            unique,
            constraint: false,
            primary: false,
        }
    }

    pub fn as_primary(mut self) -> Self {
        self.primary = true;
        self.constraint = true;
        self.unique = true;
        self
    }

    pub fn as_constraint(mut self) -> Self {
        self.constraint = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn columns(&self) -> &[usize] {
        &self.cols
    }

    pub fn column_types(&self) -> &[DataType] {
        &self.col_types
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn is_constraint(&self) -> bool {
        self.constraint
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// Key comparison between two rows of this table over the indexed
    /// columns, no tie-break.
    fn compare_keys(&self, a: &[Value], b: &[Value]) -> Ordering {
        for (i, &col) in self.cols.iter().enumerate() {
            let order = self.col_types[i].compare(&a[col], &b[col]);
            if order != Ordering::Equal {
                return order;
            }
        }

        Ordering::Equal
    }

    fn key_has_null(&self, data: &[Value]) -> bool {
        self.cols.iter().any(|&c| data[c].is_null())
    }

    fn format_key(&self, data: &[Value]) -> String {
        let parts: Vec<String> = self.cols.iter().map(|&c| format!("{:?}", data[c])).collect();
        parts.join(", ")
    }

    /// Links the row into this index. Fails on a unique violation; the
    /// tree is untouched in that case.
    pub fn insert(&self, store: &mut RowStore, row_pos: i64) -> Result<()> {
        let node = {
            let (rows, arena, accessors) = store.index_parts();
            let data = &rows
                .get(&row_pos)
                .unwrap_or_else(|| panic!("internal invariant: row {} not in store", row_pos))
                .data;

            let mut root = accessors[self.position];

            if self.unique && !self.key_has_null(data) {
                // delete-staged rows stay indexed until commit; they do
                // not count against uniqueness
                let mut duplicate = arena.find_first_equal(root, |other_pos| {
                    let other = &rows[&other_pos].data;
                    self.compare_keys(data, other)
                });

                while let Some(node) = duplicate {
                    let other = &rows[&arena.row_pos(node)];

                    if self.compare_keys(data, &other.data) != Ordering::Equal {
                        break;
                    }

                    if !other.is_cascade_deleted() {
                        bail!(
                            "UNIQUE constraint violated on index '{}': duplicate key ({})",
                            self.name,
                            self.format_key(data)
                        );
                    }

                    duplicate = arena.next(node);
                }
            }

            let node = arena.insert(&mut root, row_pos, |other_pos| {
                let other = &rows[&other_pos].data;
                self.compare_keys(data, other)
                    .then_with(|| row_pos.cmp(&other_pos))
            });

            accessors[self.position] = root;
            node
        };

        store.set_row_node(row_pos, self.position, Some(node));

        Ok(())
    }

    /// Unlinks a node from this index and clears the row's back-pointer.
    pub fn delete(&self, store: &mut RowStore, node: NodeId) {
        let row_pos = store.arena().row_pos(node);

        {
            let (_, arena, accessors) = store.index_parts();
            let mut root = accessors[self.position];
            arena.remove(node, &mut root);
            accessors[self.position] = root;
        }

        store.set_row_node(row_pos, self.position, None);
    }

    /// Cursor at the first row whose key equals `key` on the leading
    /// `key.len()` indexed columns. The cursor runs to the end of the
    /// index; callers stop when the prefix no longer matches.
    pub fn find_first_row(&self, store: &RowStore, key: &[Value]) -> Cursor {
        let arena = store.arena();
        let root = store.accessor(self.position);

        let node = arena.find_first_equal(root, |other_pos| {
            let other = store.row_data(other_pos);
            self.compare_prefix(key, other)
        });

        Cursor { next: node }
    }

    /// Cursor at the first row matching another row's values mapped onto
    /// this index: key column `i` compares against `data[col_mapping[i]]`.
    pub fn find_first_row_iterator(
        &self,
        store: &RowStore,
        data: &[Value],
        col_mapping: &[usize],
    ) -> Cursor {
        let key: SmallVec<[Value; 4]> =
            col_mapping.iter().map(|&c| data[c].clone()).collect();
        self.find_first_row(store, &key)
    }

    /// Cursor at the first row whose key is greater than or equal to
    /// `key` on the leading columns. Range scans start here.
    pub fn find_first_greater_equal(&self, store: &RowStore, key: &[Value]) -> Cursor {
        let arena = store.arena();
        let root = store.accessor(self.position);

        let node = arena.find_first_greater_equal(root, |other_pos| {
            let other = store.row_data(other_pos);
            self.compare_prefix(key, other)
        });

        Cursor { next: node }
    }

    /// Cursor over the whole index in key order.
    pub fn first_row_cursor(&self, store: &RowStore) -> Cursor {
        let root = store.accessor(self.position);
        Cursor {
            next: store.arena().first(root),
        }
    }

    fn compare_prefix(&self, key: &[Value], row: &[Value]) -> Ordering {
        for (i, key_value) in key.iter().enumerate() {
            let order = self.col_types[i].compare(key_value, &row[self.cols[i]]);
            if order != Ordering::Equal {
                return order;
            }
        }

        Ordering::Equal
    }

    /// True when the leading `key.len()` columns of `row` equal `key`.
    pub fn prefix_matches(&self, key: &[Value], row: &[Value]) -> bool {
        self.compare_prefix(key, row) == Ordering::Equal
    }

    /// Comparison of a search row against a stored row over an explicit
    /// column map, used for range-end detection on non-unique lookups.
    pub fn compare_row_non_unique(
        &self,
        key: &[Value],
        cols: &[usize],
        row: &[Value],
    ) -> Ordering {
        for (i, &col) in cols.iter().enumerate() {
            let order = self.col_types[i].compare(&key[col], &row[col]);
            if order != Ordering::Equal {
                return order;
            }
        }

        Ordering::Equal
    }
}

/// Ascending iterator over index nodes. Holds no borrow on the store;
/// each step reads through the arena, so callers may interleave reads.
#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    next: Option<NodeId>,
}

impl Cursor {
    pub fn empty() -> Self {
        Self { next: None }
    }

    pub fn peek(&self) -> Option<NodeId> {
        self.next
    }

    /// Returns the current row position and advances.
    pub fn next(&mut self, store: &RowStore) -> Option<i64> {
        let node = self.next?;
        let arena = store.arena();
        self.next = arena.next(node);
        Some(arena.row_pos(node))
    }
}
