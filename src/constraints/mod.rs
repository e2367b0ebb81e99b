//! # Constraints
//!
//! Constraint definitions for the row engine. A constraint is a *core* —
//! the single record of what the constraint is — stored in the catalog's
//! arena and referenced by id from every table it touches. A foreign key
//! core is referenced by both the main (referenced) table and the
//! referencing table; a DDL rebuild of either table rebinds the id, it
//! never duplicates the core.
//!
//! ## Kinds
//!
//! | Kind        | Backing                                      |
//! |-------------|----------------------------------------------|
//! | PrimaryKey  | unique index 0 on the owning table           |
//! | Unique      | dedicated unique index                       |
//! | ForeignKey  | referenced table's unique index + an index on the referencing columns |
//! | Check       | predicate over the row                       |
//! | NotNull     | single column, checked inline on every write |
//!
//! Primary-key and unique cores are enforced by their backing index at
//! insert time; the core exists so the constraint can be named, dropped,
//! and consulted by referential actions. Foreign keys are enforced by
//! probing the referenced table's unique index; their referential actions
//! (`CASCADE`, `SET NULL`, `SET DEFAULT`) drive the cascade walk in the
//! DML layer.

use std::fmt;
use std::sync::Arc;

use crate::schema::TableId;
use crate::types::Value;

pub type ConstraintId = u64;

/// Predicate form of a CHECK constraint. The SQL expression itself is
/// compiled outside the engine; the core keeps the compiled closure.
pub type CheckPredicate = Arc<dyn Fn(&[Value]) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    Check,
    NotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
    #[default]
    NoAction,
}

#[derive(Clone)]
pub struct ConstraintCore {
    pub id: ConstraintId,
    pub name: String,
    pub kind: ConstraintKind,

    /// Referenced table for a foreign key; the owning table otherwise.
    pub main_table: TableId,
    pub main_cols: Vec<usize>,
    /// Ordinal of the unique index backing the main columns.
    pub main_index: usize,

    /// Referencing table for a foreign key; the owning table otherwise.
    pub ref_table: TableId,
    pub ref_cols: Vec<usize>,
    /// Ordinal of the index over the referencing columns.
    pub ref_index: usize,

    pub delete_action: ReferentialAction,
    pub update_action: ReferentialAction,

    /// Column guarded by a NOT NULL core.
    pub not_null_column: Option<usize>,

    pub check: Option<CheckPredicate>,
}

impl ConstraintCore {
    pub fn primary_key(name: impl Into<String>, table: TableId, cols: Vec<usize>) -> Self {
        Self::backed(name, ConstraintKind::PrimaryKey, table, cols, 0)
    }

    pub fn unique(
        name: impl Into<String>,
        table: TableId,
        cols: Vec<usize>,
        index: usize,
    ) -> Self {
        Self::backed(name, ConstraintKind::Unique, table, cols, index)
    }

    fn backed(
        name: impl Into<String>,
        kind: ConstraintKind,
        table: TableId,
        cols: Vec<usize>,
        index: usize,
    ) -> Self {
        Self {
            id: 0,
            name: name.into(),
            kind,
            main_table: table,
            main_cols: cols.clone(),
            main_index: index,
            ref_table: table,
            ref_cols: cols,
            ref_index: index,
            delete_action: ReferentialAction::NoAction,
            update_action: ReferentialAction::NoAction,
            not_null_column: None,
            check: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn foreign_key(
        name: impl Into<String>,
        main_table: TableId,
        main_cols: Vec<usize>,
        main_index: usize,
        ref_table: TableId,
        ref_cols: Vec<usize>,
        ref_index: usize,
        delete_action: ReferentialAction,
        update_action: ReferentialAction,
    ) -> Self {
        Self {
            id: 0,
            name: name.into(),
            kind: ConstraintKind::ForeignKey,
            main_table,
            main_cols,
            main_index,
            ref_table,
            ref_cols,
            ref_index,
            delete_action,
            update_action,
            not_null_column: None,
            check: None,
        }
    }

    pub fn not_null(name: impl Into<String>, table: TableId, column: usize) -> Self {
        let mut core = Self::backed(name, ConstraintKind::NotNull, table, vec![column], 0);
        core.not_null_column = Some(column);
        core
    }

    pub fn check(name: impl Into<String>, table: TableId, predicate: CheckPredicate) -> Self {
        let mut core = Self::backed(name, ConstraintKind::Check, table, Vec::new(), 0);
        core.check = Some(predicate);
        core
    }

    pub fn is_foreign_key(&self) -> bool {
        self.kind == ConstraintKind::ForeignKey
    }

    pub fn is_not_null(&self) -> bool {
        self.kind == ConstraintKind::NotNull
    }

    pub fn is_unique_kind(&self) -> bool {
        matches!(self.kind, ConstraintKind::PrimaryKey | ConstraintKind::Unique)
    }

    /// True when deleting or updating a referenced row triggers work on
    /// the referencing table.
    pub fn has_triggered_action(&self) -> bool {
        self.kind == ConstraintKind::ForeignKey
            && matches!(
                self.delete_action,
                ReferentialAction::Cascade
                    | ReferentialAction::SetNull
                    | ReferentialAction::SetDefault
            )
    }

    /// True when this is a UNIQUE or PRIMARY KEY core over exactly the
    /// given column set.
    pub fn is_unique_with_columns(&self, cols: &[usize]) -> bool {
        self.is_unique_kind()
            && self.main_cols.len() == cols.len()
            && self.main_cols.iter().all(|c| cols.contains(c))
    }
}

impl fmt::Debug for ConstraintCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstraintCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("main_table", &self.main_table)
            .field("main_cols", &self.main_cols)
            .field("ref_table", &self.ref_table)
            .field("ref_cols", &self.ref_cols)
            .field("delete_action", &self.delete_action)
            .field("check", &self.check.is_some())
            .finish()
    }
}
