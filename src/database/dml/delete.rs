//! Row deletion and referential actions.
//!
//! Deletion is staged: `delete_no_check` journals the action and sets the
//! row's cascade flag, but the row stays linked in every index until the
//! transaction commits. That is what preserves a statement's snapshot of
//! the table while it mutates it.
//!
//! A delete accepted on a referenced table walks the foreign keys whose
//! main side is that table. `CASCADE` recurses; `SET NULL` and
//! `SET DEFAULT` collect updates that replay only after the full delete
//! closure is known; `RESTRICT`/`NO ACTION` refuse while live referencing
//! rows remain. The per-row cascade flag is the cycle guard: a row the
//! walk has already claimed is skipped wherever it is reached again.

use std::cmp::Ordering;

use eyre::{bail, Result};
use tracing::trace;

use crate::constraints::ReferentialAction;
use crate::database::Database;
use crate::index::compare_rows;
use crate::schema::{TableId, TriggerEvent};
use crate::session::Session;
use crate::types::Value;

/// A SET NULL / SET DEFAULT update collected during the cascade walk,
/// replayed after the delete closure completes.
struct PendingUpdate {
    table: TableId,
    row_pos: i64,
    data: Vec<Value>,
    cols: Vec<usize>,
}

impl Database {
    /// Full delete path: BEFORE triggers, referential actions, staged
    /// delete, deferred referencing updates, AFTER triggers.
    pub fn delete_row(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        row_pos: i64,
    ) -> Result<()> {
        self.catalog.table(table_id)?.check_data_is_writable()?;

        let old_data = {
            let store = self.store(session, table_id)?;
            match store.row(row_pos) {
                Some(row) => row.data().to_vec(),
                None => bail!(
                    "object not found: row {} in table id {}",
                    row_pos,
                    table_id
                ),
            }
        };

        self.fire_before_triggers(
            table_id,
            TriggerEvent::Delete,
            Some(&old_data),
            None,
            None,
        )?;

        let mut pending = Vec::new();

        if self.referential_integrity {
            self.cascade_delete(session, table_id, row_pos, &mut pending)?;
        } else {
            self.delete_no_check(session, table_id, row_pos)?;
        }

        // referencing updates replay only after the full delete closure
        for update in pending {
            self.update_row_set(
                session,
                update.table,
                vec![(update.row_pos, update.data)],
                Some(&update.cols),
                true,
            )?;
        }

        self.fire_after_triggers(table_id, TriggerEvent::Delete, std::slice::from_ref(&old_data))?;

        Ok(())
    }

    /// Delete for referential triggered actions: no triggers, no
    /// constraint checks of its own.
    pub fn delete_row_as_triggered_action(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        row_pos: i64,
    ) -> Result<()> {
        self.delete_no_check(session, table_id, row_pos)
    }

    /// Mid-level delete: fires BEFORE triggers but runs no integrity
    /// checks.
    pub fn delete_no_ref_check(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        row_pos: i64,
    ) -> Result<()> {
        let old_data = {
            let store = self.store(session, table_id)?;
            store.row(row_pos).map(|row| row.data().to_vec())
        };

        if let Some(old_data) = old_data {
            self.fire_before_triggers(
                table_id,
                TriggerEvent::Delete,
                Some(&old_data),
                None,
                None,
            )?;
        }

        self.delete_no_check(session, table_id, row_pos)
    }

    /// Low-level staged delete. Idempotent: a row already claimed by a
    /// cascade path returns without a second journal entry. The row
    /// remains indexed until commit.
    pub fn delete_no_check(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        row_pos: i64,
    ) -> Result<()> {
        let (logged, schema, name, data) = {
            let table = self.catalog.table(table_id)?;
            let store = Self::resolve_store_mut(&mut self.stores, session, table)?;

            let Some(row) = store.row(row_pos) else {
                bail!(
                    "object not found: row {} in table '{}'",
                    row_pos,
                    table.name()
                );
            };

            if row.is_cascade_deleted() {
                return Ok(());
            }

            (
                table.is_logged(),
                table.schema().to_string(),
                table.name().to_string(),
                row.data().to_vec(),
            )
        };

        let action = session.add_delete_action(table_id, row_pos);

        {
            let table = self.catalog.table(table_id)?;
            let store = Self::resolve_store_mut(&mut self.stores, session, table)?;
            if let Some(row) = store.row_mut(row_pos) {
                row.set_cascade_deleted(true);
                row.set_row_action(Some(action));
            }
        }

        if logged {
            if let Some(logger) = self.logger.as_mut() {
                logger.write_delete_statement(&schema, &name, &data)?;
            }
        }

        Ok(())
    }

    /// Log-replay delete: locates the matching row via the primary index
    /// when available, else the best non-unique index, else a linear scan
    /// comparing all columns. A missing row is a no-op, as in replay.
    pub fn delete_no_check_from_log(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        data: &[Value],
    ) -> Result<()> {
        let found = {
            let table = self.catalog.table(table_id)?;
            let store = Self::resolve_store(&self.stores, session, table)?;
            let types = table.column_types();

            if table.has_primary_key() {
                let primary = table.primary_index();
                let mut cursor =
                    primary.find_first_row_iterator(store, data, primary.columns());
                cursor.next(store)
            } else if let Some(best) = table.best_index() {
                let mut cursor = best.find_first_row_iterator(store, data, best.columns());
                let mut found = None;

                while let Some(pos) = cursor.next(store) {
                    session.check_interrupt()?;
                    let row_data = store.row_data(pos);

                    // reached end of range
                    if best.compare_row_non_unique(data, best.columns(), row_data)
                        != Ordering::Equal
                    {
                        break;
                    }

                    if compare_rows(row_data, data, table.default_column_map(), &types)
                        == Ordering::Equal
                    {
                        found = Some(pos);
                        break;
                    }
                }

                found
            } else {
                let mut found = None;

                for pos in store.row_positions() {
                    session.check_interrupt()?;

                    if compare_rows(
                        store.row_data(pos),
                        data,
                        table.default_column_map(),
                        &types,
                    ) == Ordering::Equal
                    {
                        found = Some(pos);
                        break;
                    }
                }

                found
            }
        };

        match found {
            Some(pos) => self.delete_no_check(session, table_id, pos),
            None => Ok(()),
        }
    }

    /// Claims a row for deletion and recursively walks every foreign key
    /// referencing its table. The claim happens before the walk, so a
    /// cyclic reference chain reaching back here terminates.
    fn cascade_delete(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        row_pos: i64,
        pending: &mut Vec<PendingUpdate>,
    ) -> Result<()> {
        {
            let store = self.store(session, table_id)?;
            match store.row(row_pos) {
                Some(row) if row.is_cascade_deleted() => return Ok(()),
                Some(_) => {}
                None => return Ok(()),
            }
        }

        self.delete_no_check(session, table_id, row_pos)?;
        self.perform_referential_actions(session, table_id, row_pos, pending)
    }

    fn perform_referential_actions(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        row_pos: i64,
        pending: &mut Vec<PendingUpdate>,
    ) -> Result<()> {
        let row_data = self.store(session, table_id)?.row_data(row_pos).to_vec();

        for constraint_id in self.catalog.constraints_referencing(table_id) {
            let core = self.catalog.constraint(constraint_id)?.clone();

            // a null key matches nothing
            if core.main_cols.iter().any(|&c| row_data[c].is_null()) {
                continue;
            }

            let key: Vec<Value> = core.main_cols.iter().map(|&c| row_data[c].clone()).collect();

            let matches: Vec<i64> = {
                let ref_table = self.catalog.table(core.ref_table)?;
                let ref_index = &ref_table.indexes()[core.ref_index];
                let store = Self::resolve_store(&self.stores, session, ref_table)?;

                let mut cursor = ref_index.find_first_row(store, &key);
                let mut matches = Vec::new();

                while let Some(pos) = cursor.next(store) {
                    session.check_interrupt()?;

                    let row = match store.row(pos) {
                        Some(row) => row,
                        None => continue,
                    };

                    if !ref_index.prefix_matches(&key, row.data()) {
                        break;
                    }

                    if !row.is_cascade_deleted() {
                        matches.push(pos);
                    }
                }

                matches
            };

            if matches.is_empty() {
                continue;
            }

            trace!(
                constraint = %core.name,
                action = ?core.delete_action,
                referencing = matches.len(),
                "referential action"
            );

            match core.delete_action {
                ReferentialAction::Cascade => {
                    for pos in matches {
                        self.cascade_delete(session, core.ref_table, pos, pending)?;
                    }
                }
                ReferentialAction::SetNull | ReferentialAction::SetDefault => {
                    let defaults: Vec<Value> = if core.delete_action
                        == ReferentialAction::SetDefault
                    {
                        let ref_table = self.catalog.table(core.ref_table)?;
                        core.ref_cols
                            .iter()
                            .map(|&c| {
                                ref_table
                                    .column(c)
                                    .default_value()
                                    .cloned()
                                    .unwrap_or(Value::Null)
                            })
                            .collect()
                    } else {
                        vec![Value::Null; core.ref_cols.len()]
                    };

                    for pos in matches {
                        let mut data =
                            self.store(session, core.ref_table)?.row_data(pos).to_vec();

                        for (i, &c) in core.ref_cols.iter().enumerate() {
                            data[c] = defaults[i].clone();
                        }

                        pending.push(PendingUpdate {
                            table: core.ref_table,
                            row_pos: pos,
                            data,
                            cols: core.ref_cols.clone(),
                        });
                    }
                }
                ReferentialAction::Restrict | ReferentialAction::NoAction => {
                    bail!(
                        "FOREIGN KEY constraint violated: row is referenced through constraint '{}'",
                        core.name
                    );
                }
            }
        }

        Ok(())
    }
}
