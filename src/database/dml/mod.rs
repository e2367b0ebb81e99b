//! # DML Orchestration
//!
//! Row lifecycle over the catalog and the stores: insert with constraint
//! enforcement and multi-index installation, transactional delete with
//! referential actions, delete-then-insert updates, and the log-replay
//! variants of each. The submodules split by verb the way the operations
//! compose: [`insert`], [`delete`], [`update`].
//!
//! This module holds what every verb shares — per-column constraint
//! enforcement, check-constraint evaluation, foreign-key probes, trigger
//! firing, and the all-or-nothing `index_row`.

pub mod delete;
pub mod insert;
pub mod update;

use eyre::{bail, Result};

use crate::database::Database;
use crate::schema::{trigger_list_index, Table, TableId, TriggerEvent, TriggerTiming};
use crate::storage::RowStore;
use crate::types::Value;

impl Database {
    /// Per-column enforcement: type limits, then NOT NULL. Named NOT NULL
    /// constraints lend their name to the error; a primary-key column
    /// falls back to the primary-key constraint.
    pub(crate) fn enforce_row_constraints(&self, table: &Table, data: &[Value]) -> Result<()> {
        eyre::ensure!(
            data.len() == table.column_count(),
            "row has {} values, table '{}' has {} columns",
            data.len(),
            table.name(),
            table.column_count()
        );

        for (i, column) in table.columns().iter().enumerate() {
            column
                .data_type()
                .convert_to_type_limits(&data[i], column.max_length())?;

            if data[i].is_null() && table.col_not_null()[i] {
                let constraint_name = table
                    .constraint_ids()
                    .iter()
                    .filter_map(|&id| self.catalog.constraint(id).ok())
                    .find(|core| core.not_null_column == Some(i))
                    .or_else(|| {
                        table
                            .constraint_ids()
                            .first()
                            .and_then(|&id| self.catalog.constraint(id).ok())
                            .filter(|core| {
                                core.is_unique_kind() && core.main_cols.contains(&i)
                            })
                    })
                    .map(|core| core.name.clone());

                match constraint_name {
                    Some(name) => bail!(
                        "NOT NULL constraint violated on column '{}' in table '{}' (constraint '{}')",
                        column.name(),
                        table.name(),
                        name
                    ),
                    None => bail!(
                        "NOT NULL constraint violated on column '{}' in table '{}'",
                        column.name(),
                        table.name()
                    ),
                }
            }
        }

        Ok(())
    }

    /// Insert-side validation: column limits, CHECK predicates, and
    /// foreign-key probes against each referenced table's unique index.
    pub(crate) fn check_row_data_insert(
        &self,
        session: &crate::session::Session,
        table: &Table,
        data: &[Value],
    ) -> Result<()> {
        self.enforce_row_constraints(table, data)?;

        if !self.referential_integrity {
            return Ok(());
        }

        for &id in table.constraint_ids() {
            let core = self.catalog.constraint(id)?;

            if let Some(predicate) = &core.check {
                if !predicate(data) {
                    bail!(
                        "CHECK constraint violated: constraint '{}' on table '{}'",
                        core.name,
                        table.name()
                    );
                }
            }

            if core.is_foreign_key() && core.ref_table == table.id() {
                self.check_fk_insert(session, core, data)?;
            }
        }

        Ok(())
    }

    /// Update-side validation: column limits and CHECK predicates. The
    /// unique side is enforced by the indexes at re-insert.
    pub(crate) fn check_row_data(&self, table: &Table, data: &[Value]) -> Result<()> {
        self.enforce_row_constraints(table, data)?;

        for &id in table.constraint_ids() {
            let core = self.catalog.constraint(id)?;

            if let Some(predicate) = &core.check {
                if !predicate(data) {
                    bail!(
                        "CHECK constraint violated: constraint '{}' on table '{}'",
                        core.name,
                        table.name()
                    );
                }
            }
        }

        Ok(())
    }

    /// Probes the referenced table's unique index for the foreign key's
    /// parent row. A null anywhere in the referencing columns passes
    /// (SQL simple match); a delete-staged parent does not count.
    pub(crate) fn check_fk_insert(
        &self,
        session: &crate::session::Session,
        core: &crate::constraints::ConstraintCore,
        data: &[Value],
    ) -> Result<()> {
        if core.ref_cols.iter().any(|&c| data[c].is_null()) {
            return Ok(());
        }

        let main_table = self.catalog.table(core.main_table)?;
        let main_index = &main_table.indexes()[core.main_index];
        let store = Self::resolve_store(&self.stores, session, main_table)?;

        let key: Vec<Value> = core.ref_cols.iter().map(|&c| data[c].clone()).collect();
        let mut cursor = main_index.find_first_row(store, &key);

        while let Some(pos) = cursor.next(store) {
            let row = store.row_data(pos);

            if !main_index.prefix_matches(&key, row) {
                break;
            }

            let staged_delete = store
                .row(pos)
                .map(|r| r.is_cascade_deleted())
                .unwrap_or(true);

            if !staged_delete {
                return Ok(());
            }
        }

        bail!(
            "FOREIGN KEY constraint violated: no parent row for constraint '{}' in table '{}'",
            core.name,
            main_table.name()
        );
    }

    /// Fires BEFORE triggers of one event. Row-level triggers see the old
    /// data and may rewrite the new data; statement-level triggers fire
    /// once with neither. Nothing fires while referential integrity is
    /// off.
    pub(crate) fn fire_before_triggers(
        &mut self,
        table_id: TableId,
        event: TriggerEvent,
        old: Option<&[Value]>,
        mut new: Option<&mut Vec<Value>>,
        cols: Option<&[usize]>,
    ) -> Result<()> {
        if !self.referential_integrity {
            return Ok(());
        }

        let list_index = trigger_list_index(TriggerTiming::Before, event);
        let table = self.catalog.table_mut(table_id)?;

        for trigger in table.trigger_list_mut(list_index) {
            if let (Some(cols), Some(trigger_cols)) = (cols, trigger.update_columns()) {
                if !trigger_cols.iter().any(|c| cols.contains(c)) {
                    continue;
                }
            }

            if trigger.is_for_each_row() {
                trigger.fire(old, new.as_deref_mut())?;
            } else {
                trigger.fire(None, None)?;
            }
        }

        Ok(())
    }

    /// Fires AFTER triggers of one event over a finished row set. Each
    /// row-level firing receives its own duplicated buffer, so a handler
    /// never observes later mutations.
    pub(crate) fn fire_after_triggers(
        &mut self,
        table_id: TableId,
        event: TriggerEvent,
        rows: &[Vec<Value>],
    ) -> Result<()> {
        if !self.referential_integrity {
            return Ok(());
        }

        let list_index = trigger_list_index(TriggerTiming::After, event);
        let table = self.catalog.table_mut(table_id)?;

        for trigger in table.trigger_list_mut(list_index) {
            if trigger.is_for_each_row() {
                for row in rows {
                    let mut duplicate = row.clone();

                    match event {
                        TriggerEvent::Delete => trigger.fire(Some(&duplicate), None)?,
                        _ => trigger.fire(None, Some(&mut duplicate))?,
                    }
                }
            } else {
                trigger.fire(None, None)?;
            }
        }

        Ok(())
    }
}

/// Installs a row into every index of its table. A failure at index k
/// unwinds indexes 0..k, unlinks the row, and removes it from the store
/// before re-raising, so a unique violation leaves no trace.
pub(crate) fn index_row(table: &Table, store: &mut RowStore, row_pos: i64) -> Result<()> {
    let mut completed = 0;
    let mut failure = None;

    for index in table.indexes() {
        match index.insert(store, row_pos) {
            Ok(()) => completed += 1,
            Err(error) => {
                failure = Some(error);
                break;
            }
        }
    }

    let Some(error) = failure else {
        return Ok(());
    };

    // unique violation - roll back the partial installation
    for position in (0..completed).rev() {
        let node = store.row(row_pos).and_then(|row| row.node(position));

        if let Some(node) = node {
            table.indexes()[position].delete(store, node);
        }
    }

    if let Some(row) = store.row_mut(row_pos) {
        row.clear_nodes();
    }
    store.remove(row_pos);

    Err(error)
}
