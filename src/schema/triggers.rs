//! # Triggers
//!
//! Trigger definitions and the six per-table firing lists: before/after
//! crossed with insert/update/delete. Each list is ordered; row-level and
//! statement-level triggers share a list and are told apart by
//! `for_each_row`.
//!
//! Firing semantics (enforced by the DML layer):
//!
//! - BEFORE row triggers receive the new data mutably and may rewrite it.
//! - AFTER row triggers receive a duplicated buffer per row, so a handler
//!   can never observe mutations made by later handlers.
//! - Statement-level triggers fire once with no row pair.
//! - Nothing fires while referential integrity is toggled off.

use eyre::Result;

use crate::types::Value;

pub const NUM_TRIGGER_LISTS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerTiming {
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    Insert,
    Update,
    Delete,
}

/// Slot of a (timing, event) pair in the table's trigger lists.
pub fn trigger_list_index(timing: TriggerTiming, event: TriggerEvent) -> usize {
    let event = match event {
        TriggerEvent::Insert => 0,
        TriggerEvent::Update => 1,
        TriggerEvent::Delete => 2,
    };

    match timing {
        TriggerTiming::Before => event,
        TriggerTiming::After => NUM_TRIGGER_LISTS / 2 + event,
    }
}

/// Callback body of a trigger. Row-level firings pass the old and/or new
/// row; statement-level firings pass neither.
pub trait TriggerHandler: Send {
    fn fire(&mut self, old: Option<&[Value]>, new: Option<&mut Vec<Value>>) -> Result<()>;
}

impl<F> TriggerHandler for F
where
    F: FnMut(Option<&[Value]>, Option<&mut Vec<Value>>) -> Result<()> + Send,
{
    fn fire(&mut self, old: Option<&[Value]>, new: Option<&mut Vec<Value>>) -> Result<()> {
        self(old, new)
    }
}

pub struct TriggerDef {
    name: String,
    timing: TriggerTiming,
    event: TriggerEvent,
    for_each_row: bool,
    update_columns: Option<Vec<usize>>,
    handler: Box<dyn TriggerHandler>,
}

impl TriggerDef {
    pub fn new(
        name: impl Into<String>,
        timing: TriggerTiming,
        event: TriggerEvent,
        for_each_row: bool,
        handler: Box<dyn TriggerHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            timing,
            event,
            for_each_row,
            update_columns: None,
            handler,
        }
    }

    /// Restricts an UPDATE trigger to fire only when one of these columns
    /// is among the updated set.
    pub fn with_update_columns(mut self, columns: Vec<usize>) -> Self {
        self.update_columns = Some(columns);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timing(&self) -> TriggerTiming {
        self.timing
    }

    pub fn event(&self) -> TriggerEvent {
        self.event
    }

    pub fn is_for_each_row(&self) -> bool {
        self.for_each_row
    }

    pub fn update_columns(&self) -> Option<&[usize]> {
        self.update_columns.as_deref()
    }

    pub fn list_index(&self) -> usize {
        trigger_list_index(self.timing, self.event)
    }

    /// Remaps the update-column filter after a column move. Columns the
    /// map drops fall out of the filter.
    pub(crate) fn adjust_update_columns(&mut self, map: impl Fn(usize) -> Option<usize>) {
        if let Some(cols) = &mut self.update_columns {
            *cols = cols.iter().filter_map(|&c| map(c)).collect();
        }
    }

    pub fn fire(
        &mut self,
        old: Option<&[Value]>,
        new: Option<&mut Vec<Value>>,
    ) -> Result<()> {
        self.handler.fire(old, new)
    }
}

impl std::fmt::Debug for TriggerDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerDef")
            .field("name", &self.name)
            .field("timing", &self.timing)
            .field("event", &self.event)
            .field("for_each_row", &self.for_each_row)
            .finish()
    }
}
