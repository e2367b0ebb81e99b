//! Row updates.
//!
//! An update is a delete-then-insert over a row set. All deletes run
//! before any insert, which is what lets a single statement swap unique
//! keys between rows: both old rows are delete-staged before either new
//! row arrives, and the uniqueness probe does not count delete-staged
//! rows.

use eyre::{bail, Result};

use crate::database::Database;
use crate::schema::{TableId, TriggerEvent};
use crate::session::Session;
use crate::types::Value;

impl Database {
    /// Updates a set of rows with BEFORE and AFTER trigger firing.
    /// `cols` names the assigned columns for trigger filtering.
    pub fn update_rows(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        row_set: Vec<(i64, Vec<Value>)>,
        cols: Option<&[usize]>,
    ) -> Result<usize> {
        let mut staged = Vec::with_capacity(row_set.len());

        for (pos, mut data) in row_set {
            let old_data = {
                let store = self.store(session, table_id)?;
                store.row(pos).map(|row| row.data().to_vec())
            };

            self.fire_before_triggers(
                table_id,
                TriggerEvent::Update,
                old_data.as_deref(),
                Some(&mut data),
                cols,
            )?;

            staged.push((pos, data));
        }

        let new_rows: Vec<Vec<Value>> = staged.iter().map(|(_, data)| data.clone()).collect();
        let count = self.update_row_set(session, table_id, staged, cols, false)?;

        self.fire_after_triggers(table_id, TriggerEvent::Update, &new_rows)?;

        Ok(count)
    }

    /// Core update: validates the set, deletes every old row, then
    /// inserts every new row. A triggered set (cascade SET NULL /
    /// SET DEFAULT replay) silently drops rows the delete closure already
    /// claimed; a user statement touching such a row is an error.
    pub fn update_row_set(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        row_set: Vec<(i64, Vec<Value>)>,
        _cols: Option<&[usize]>,
        is_triggered_set: bool,
    ) -> Result<usize> {
        self.catalog.table(table_id)?.check_data_is_writable()?;

        let mut set = Vec::with_capacity(row_set.len());

        {
            let table = self.catalog.table(table_id)?;
            let store = Self::resolve_store(&self.stores, session, table)?;

            for (pos, data) in row_set {
                let Some(row) = store.row(pos) else {
                    bail!(
                        "object not found: row {} in table '{}'",
                        pos,
                        table.name()
                    );
                };

                if row.is_cascade_deleted() {
                    if is_triggered_set {
                        continue;
                    }

                    bail!(
                        "triggered data change violation: row already deleted in table '{}'",
                        table.name()
                    );
                }

                set.push((pos, data));
            }
        }

        for (pos, data) in &set {
            {
                let table = self.catalog.table(table_id)?;
                self.check_row_data(table, data)?;
            }

            self.delete_no_check(session, table_id, *pos)?;
        }

        let count = set.len();

        for (_pos, data) in set {
            self.insert_no_check(session, table_id, data)?;
        }

        Ok(count)
    }
}
