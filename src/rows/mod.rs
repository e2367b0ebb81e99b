//! # Row Objects
//!
//! A `Row` is the unit the table engine moves around: a stable position,
//! the column values, and one node back-pointer per table index. The
//! back-pointers are what make "unlink this row from index i" an O(1)
//! lookup instead of a key search, and they are pre-sized at creation —
//! one slot per index — which is why adding an index rebuilds the table.
//!
//! A row also carries two pieces of transactional state: the journal slot
//! of the action that created or deleted it, and the `cascade_deleted`
//! flag that makes cascading deletes idempotent (a cascade path that
//! reaches the same row twice sees the flag and stops).

use smallvec::SmallVec;

use crate::index::NodeId;
use crate::types::Value;

#[derive(Debug)]
pub struct Row {
    pos: i64,
    pub(crate) data: Vec<Value>,
    nodes: SmallVec<[Option<NodeId>; 2]>,
    row_action: Option<usize>,
    cascade_deleted: bool,
}

impl Row {
    pub fn new(pos: i64, data: Vec<Value>, index_count: usize) -> Self {
        Self {
            pos,
            data,
            nodes: smallvec::smallvec![None; index_count],
            row_action: None,
            cascade_deleted: false,
        }
    }

    pub fn pos(&self) -> i64 {
        self.pos
    }

    pub fn data(&self) -> &[Value] {
        &self.data
    }

    pub fn node(&self, index: usize) -> Option<NodeId> {
        self.nodes[index]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn set_node(&mut self, index: usize, node: Option<NodeId>) {
        self.nodes[index] = node;
    }

    /// Clears every index back-pointer. Used when a partially indexed row
    /// is rolled back.
    pub(crate) fn clear_nodes(&mut self) {
        for slot in self.nodes.iter_mut() {
            *slot = None;
        }
    }

    /// True when the row is linked into at least one index.
    pub fn is_linked(&self) -> bool {
        self.nodes.iter().any(|n| n.is_some())
    }

    pub fn is_cascade_deleted(&self) -> bool {
        self.cascade_deleted
    }

    pub(crate) fn set_cascade_deleted(&mut self, deleted: bool) {
        self.cascade_deleted = deleted;
    }

    pub fn row_action(&self) -> Option<usize> {
        self.row_action
    }

    pub(crate) fn set_row_action(&mut self, action: Option<usize>) {
        self.row_action = action;
    }
}
