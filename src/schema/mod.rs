//! # Schema Objects
//!
//! Table, column, trigger and identity-sequence definitions, and the
//! per-database catalog that owns them. The catalog is the arena for
//! tables and constraint cores; everything cross-table goes through ids.

mod catalog;
mod column;
mod sequence;
mod table;
mod triggers;

pub use catalog::Catalog;
pub use column::ColumnDef;
pub use sequence::NumberSequence;
pub use table::{PersistenceScope, Table, TableId, TableKind};
pub use triggers::{
    trigger_list_index, TriggerDef, TriggerEvent, TriggerHandler, TriggerTiming,
    NUM_TRIGGER_LISTS,
};
