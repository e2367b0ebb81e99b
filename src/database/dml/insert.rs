//! Row insertion.
//!
//! `insert_row` is the full transactional path: identity, BEFORE
//! triggers, constraint checks, multi-index installation, journal entry,
//! log record. The `*_from_log`, `*_from_script` and `insert_sys`
//! variants replay or stage rows with progressively fewer checks — the
//! log already proved the row once.

use eyre::Result;

use crate::database::dml::index_row;
use crate::database::Database;
use crate::schema::{TableId, TriggerEvent};
use crate::session::Session;
use crate::types::Value;

impl Database {
    /// Mid-level insert: performs constraint checks and fires row-level
    /// triggers, then stages the row. Returns the new row's position.
    pub fn insert_row(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        mut data: Vec<Value>,
    ) -> Result<i64> {
        self.catalog.table(table_id)?.check_data_is_writable()?;

        if let Some(identity) = self.catalog.table_mut(table_id)?.set_identity_column(&mut data)
        {
            session.set_last_identity(identity);
        }

        self.fire_before_triggers(table_id, TriggerEvent::Insert, None, Some(&mut data), None)?;

        {
            let table = self.catalog.table(table_id)?;
            self.check_row_data_insert(session, table, &data)?;
        }

        let pos = self.insert_no_check(session, table_id, data)?;

        let inserted = self.store(session, table_id)?.row_data(pos).to_vec();
        self.fire_after_triggers(table_id, TriggerEvent::Insert, std::slice::from_ref(&inserted))?;

        Ok(pos)
    }

    /// Low-level insert. UNIQUE and PRIMARY KEY are enforced by the
    /// attempt to add the row to the indexes.
    pub(crate) fn insert_no_check(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        data: Vec<Value>,
    ) -> Result<i64> {
        let (pos, logged, schema, name, logged_data) = {
            let table = self.catalog.table(table_id)?;
            let store = Self::resolve_store_mut(&mut self.stores, session, table)?;

            let pos = store.get_new_cached_object(data)?;
            index_row(table, store, pos)?;

            let logged_data = table.is_logged().then(|| store.row_data(pos).to_vec());

            (
                pos,
                table.is_logged(),
                table.schema().to_string(),
                table.name().to_string(),
                logged_data,
            )
        };

        let action = session.add_insert_action(table_id, pos);

        {
            let table = self.catalog.table(table_id)?;
            let store = Self::resolve_store_mut(&mut self.stores, session, table)?;
            if let Some(row) = store.row_mut(pos) {
                row.set_row_action(Some(action));
            }
        }

        if logged {
            if let (Some(logger), Some(data)) = (self.logger.as_mut(), logged_data) {
                logger.write_insert_statement(&schema, &name, &data)?;
            }
        }

        Ok(pos)
    }

    /// Log-replay insert: advances the identity sequence past the
    /// persisted value, stages the row, writes no log record.
    pub fn insert_no_check_from_log(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        data: Vec<Value>,
    ) -> Result<i64> {
        self.catalog
            .table_mut(table_id)?
            .system_update_identity_value(&data);

        let pos = {
            let table = self.catalog.table(table_id)?;
            let store = Self::resolve_store_mut(&mut self.stores, session, table)?;

            let pos = store.get_new_cached_object(data)?;
            index_row(table, store, pos)?;
            pos
        };

        let action = session.add_insert_action(table_id, pos);
        {
            let table = self.catalog.table(table_id)?;
            let store = Self::resolve_store_mut(&mut self.stores, session, table)?;
            if let Some(row) = store.row_mut(pos) {
                row.set_row_action(Some(action));
            }
        }

        Ok(pos)
    }

    /// Script-replay insert: unconditional, committed directly.
    pub fn insert_from_script(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        data: Vec<Value>,
    ) -> Result<i64> {
        self.catalog
            .table_mut(table_id)?
            .system_update_identity_value(&data);

        self.insert_data(session, table_id, data)
    }

    /// Unchecked insert committed straight to the store. Internal result
    /// staging and loaders use this.
    pub fn insert_data(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        data: Vec<Value>,
    ) -> Result<i64> {
        let table = self.catalog.table(table_id)?;
        let store = Self::resolve_store_mut(&mut self.stores, session, table)?;

        let pos = store.get_new_cached_object(data)?;
        index_row(table, store, pos)?;
        store.commit(pos);

        Ok(pos)
    }

    /// System-table insert: no checks, no identity columns.
    pub fn insert_sys(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        data: Vec<Value>,
    ) -> Result<i64> {
        let table = self.catalog.table(table_id)?;
        let store = Self::resolve_store_mut(&mut self.stores, session, table)?;

        let pos = store.get_new_cached_object(data)?;
        index_row(table, store, pos)?;

        Ok(pos)
    }
}
