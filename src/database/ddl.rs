//! # Definition Moves
//!
//! Adding or dropping a column, constraint, or index never mutates a live
//! table in place. The operation constructs a new `Table` definition,
//! `move_data` copies every row across — translating columns, re-seeding
//! the identity, re-enforcing constraints, re-indexing — and only then
//! does the catalog swap definitions and the store registry swap stores.
//! On any failure the new store is released and the old table is
//! untouched.
//!
//! Every operation here is a DDL commit: the global change timestamp and
//! the schema change timestamp both advance, which is what invalidates
//! resident prepared statements.

use eyre::{bail, Result};
use tracing::debug;

use crate::constraints::{CheckPredicate, ConstraintCore, ConstraintKind, ReferentialAction};
use crate::database::dml::index_row;
use crate::database::Database;
use crate::index::Index;
use crate::schema::{ColumnDef, Table, TableId};
use crate::session::Session;
use crate::types::{DataType, Value};

/// Copies a row image across a column move. `adjust` +1 inserts
/// `substitute` at `colindex`, -1 drops the column, 0 substitutes in
/// place; with no column affected the row copies unchanged.
pub(crate) fn copy_adjust_array(
    source: &[Value],
    colindex: Option<usize>,
    adjust: i8,
    substitute: Option<&Value>,
) -> Vec<Value> {
    let Some(colindex) = colindex else {
        return source.to_vec();
    };

    let substitute = substitute.cloned().unwrap_or(Value::Null);
    let mut dest = Vec::with_capacity((source.len() as i64 + adjust as i64) as usize);

    match adjust {
        1 => {
            dest.extend_from_slice(&source[..colindex]);
            dest.push(substitute);
            dest.extend_from_slice(&source[colindex..]);
        }
        -1 => {
            dest.extend_from_slice(&source[..colindex]);
            dest.extend_from_slice(&source[colindex + 1..]);
        }
        _ => {
            dest.extend_from_slice(source);
            dest[colindex] = substitute;
        }
    }

    dest
}

/// Secondary-index shape carried through a rebuild.
#[derive(Debug, Clone)]
struct IndexSpec {
    name: String,
    cols: Vec<usize>,
    unique: bool,
    constraint: bool,
}

/// Everything a rebuild needs from the old definition.
struct RebuildSpec {
    columns: Vec<ColumnDef>,
    pk_cols: Vec<usize>,
    secondary: Vec<IndexSpec>,
}

impl Database {
    fn gather_secondary(table: &Table, map: impl Fn(usize) -> usize) -> Vec<IndexSpec> {
        table
            .indexes()
            .iter()
            .skip(1)
            .map(|index| IndexSpec {
                name: index.name().to_string(),
                cols: index.columns().iter().map(|&c| map(c)).collect(),
                unique: index.is_unique(),
                constraint: index.is_constraint(),
            })
            .collect()
    }

    /// Rebuilds `table_id` to the given shape and moves the data.
    /// `colindex`/`adjust`/`substitute` describe the column translation.
    fn rebuild_table(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        spec: RebuildSpec,
        colindex: Option<usize>,
        adjust: i8,
        substitute: Option<Value>,
    ) -> Result<()> {
        let (schema, name, kind, old_pid, constraint_ids, read_only) = {
            let old = self.catalog.table(table_id)?;
            (
                old.schema().to_string(),
                old.name().to_string(),
                old.kind(),
                old.persistence_id(),
                old.constraint_ids().to_vec(),
                old.is_read_only(),
            )
        };

        let new_pid = self.catalog.next_persistence_id();
        let mut new_table = Table::new(table_id, new_pid, schema, name, kind, spec.columns)?;
        new_table.set_read_only(read_only);
        new_table.create_primary_key(spec.pk_cols);

        for (i, index_spec) in spec.secondary.iter().enumerate() {
            let types: Vec<DataType> = index_spec
                .cols
                .iter()
                .map(|&c| new_table.column(c).data_type())
                .collect();

            let mut index = Index::new(
                index_spec.name.clone(),
                i + 1,
                index_spec.cols.clone(),
                types,
                index_spec.unique,
            );
            if index_spec.constraint {
                index = index.as_constraint();
            }

            new_table.add_index(index);
        }

        new_table.set_constraint_ids(constraint_ids);

        // carry triggers over, remapping their update-column filters
        let mut trigger_lists = self.catalog.table_mut(table_id)?.take_trigger_lists();
        if let Some(affected) = colindex {
            for list in trigger_lists.iter_mut() {
                for trigger in list.iter_mut() {
                    trigger.adjust_update_columns(|c| match adjust {
                        1 if c >= affected => Some(c + 1),
                        -1 if c == affected => None,
                        -1 if c > affected => Some(c - 1),
                        _ => Some(c),
                    });
                }
            }
        }
        new_table.set_trigger_lists(trigger_lists);

        let mut new_store = self.new_store_for(&new_table);

        let moved = self.move_data(
            session,
            table_id,
            &mut new_table,
            &mut new_store,
            colindex,
            adjust,
            substitute,
        );

        if let Err(error) = moved {
            new_store.release();

            // triggers go back to the old definition
            let lists = new_table.take_trigger_lists();
            self.catalog.table_mut(table_id)?.set_trigger_lists(lists);

            return Err(error);
        }

        let path = self
            .catalog
            .get_constraint_path(table_id, new_table.default_column_map());
        new_table.set_fk_path(path);

        let session_based = new_table.is_session_based();
        self.catalog.replace_table(new_table)?;

        if session_based {
            if let Some(mut old_store) = session.remove_session_store(old_pid) {
                old_store.release();
            }
            session.put_session_store(new_pid, new_store);
        } else {
            if let Some(mut old_store) = self.stores.remove(&old_pid) {
                old_store.release();
            }
            self.stores.insert(new_pid, new_store);
        }

        Ok(())
    }

    /// Copies every row of the old table into the new store, column-
    /// translated, identity-fed, constraint-checked, fully re-indexed.
    #[allow(clippy::too_many_arguments)]
    fn move_data(
        &self,
        session: &Session,
        table_id: TableId,
        new_table: &mut Table,
        new_store: &mut crate::storage::RowStore,
        colindex: Option<usize>,
        adjust: i8,
        substitute: Option<Value>,
    ) -> Result<()> {
        let old_table = self.catalog.table(table_id)?;
        let old_store = match Self::resolve_store(&self.stores, session, old_table) {
            Ok(store) => store,
            // a session-based table the session never touched holds no rows
            Err(_) if old_table.is_session_based() => return Ok(()),
            Err(error) => return Err(error),
        };

        let mut cursor = old_table.primary_index().first_row_cursor(old_store);

        while let Some(pos) = cursor.next(old_store) {
            session.check_interrupt()?;

            let old_row = old_store
                .row(pos)
                .unwrap_or_else(|| panic!("internal invariant: row {} vanished mid-scan", pos));

            let mut data =
                copy_adjust_array(old_row.data(), colindex, adjust, substitute.as_ref());

            new_table.set_identity_column(&mut data);
            self.enforce_row_constraints(new_table, &data)?;

            let new_pos = new_store.get_new_cached_object(data)?;

            if let (Some(new_row), Some(action)) =
                (new_store.row_mut(new_pos), old_row.row_action())
            {
                new_row.set_row_action(Some(action));
            }

            index_row(new_table, new_store, new_pos)?;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // column moves

    pub fn add_column(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        colindex: usize,
        column: ColumnDef,
    ) -> Result<()> {
        let substitute = column.default_value().cloned();

        let spec = {
            let table = self.catalog.table(table_id)?;
            let map = |c: usize| if c >= colindex { c + 1 } else { c };

            let mut columns = table.columns().to_vec();
            columns.insert(colindex, column);

            RebuildSpec {
                columns,
                pk_cols: table.primary_key_cols().iter().map(|&c| map(c)).collect(),
                secondary: Self::gather_secondary(table, map),
            }
        };

        self.catalog
            .check_constraint_columns_adjustable(table_id, colindex, 1)?;
        self.rebuild_table(session, table_id, spec, Some(colindex), 1, substitute)?;
        self.catalog.adjust_constraint_columns(table_id, colindex, 1);
        self.bump_ddl_timestamps();

        debug!(table_id, colindex, "column added");

        Ok(())
    }

    pub fn drop_column(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        colindex: usize,
    ) -> Result<()> {
        let spec = {
            let table = self.catalog.table(table_id)?;

            if table.primary_key_cols().contains(&colindex) {
                bail!(
                    "schema object 'SYS_PK_{}' is in use: references the dropped column",
                    table.id()
                );
            }

            for index in table.indexes().iter().skip(1) {
                if index.columns().contains(&colindex) {
                    bail!(
                        "schema object '{}' is in use: references the dropped column",
                        index.name()
                    );
                }
            }

            let map = |c: usize| if c > colindex { c - 1 } else { c };

            let mut columns = table.columns().to_vec();
            columns.remove(colindex);

            RebuildSpec {
                columns,
                pk_cols: table.primary_key_cols().iter().map(|&c| map(c)).collect(),
                secondary: Self::gather_secondary(table, map),
            }
        };

        self.catalog
            .check_constraint_columns_adjustable(table_id, colindex, -1)?;
        self.rebuild_table(session, table_id, spec, Some(colindex), -1, None)?;
        self.catalog.adjust_constraint_columns(table_id, colindex, -1);
        self.bump_ddl_timestamps();

        debug!(table_id, colindex, "column dropped");

        Ok(())
    }

    // ------------------------------------------------------------------
    // index moves

    /// Adds a secondary index, rebuilding the table so every row gains a
    /// node slot. Fails (and leaves the table unchanged) when a unique
    /// index meets duplicate data.
    pub fn add_index(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        name: &str,
        cols: Vec<usize>,
        unique: bool,
    ) -> Result<usize> {
        let spec = {
            let table = self.catalog.table(table_id)?;

            if table.get_index(name).is_some() {
                bail!("duplicate object: index '{}'", name);
            }

            let mut secondary = Self::gather_secondary(table, |c| c);
            secondary.push(IndexSpec {
                name: name.to_string(),
                cols,
                unique,
                constraint: false,
            });

            RebuildSpec {
                columns: table.columns().to_vec(),
                pk_cols: table.primary_key_cols().to_vec(),
                secondary,
            }
        };

        self.rebuild_table(session, table_id, spec, None, 0, None)?;
        self.bump_ddl_timestamps();

        let position = self.catalog.table(table_id)?.index_count() - 1;

        debug!(table_id, name, position, "index added");

        Ok(position)
    }

    pub fn drop_index(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        name: &str,
    ) -> Result<()> {
        let position = {
            let table = self.catalog.table(table_id)?;

            let Some(position) = table.get_index_position(name) else {
                bail!("object not found: index '{}'", name);
            };

            if position == 0 {
                bail!("schema object '{}' is in use: primary index", name);
            }

            if table.indexes()[position].is_constraint() {
                bail!("schema object '{}' is in use: backing a constraint", name);
            }

            position
        };

        self.catalog
            .check_constraint_index_droppable(table_id, position)?;

        let spec = {
            let table = self.catalog.table(table_id)?;
            let mut secondary = Self::gather_secondary(table, |c| c);
            secondary.remove(position - 1);

            RebuildSpec {
                columns: table.columns().to_vec(),
                pk_cols: table.primary_key_cols().to_vec(),
                secondary,
            }
        };

        self.rebuild_table(session, table_id, spec, None, 0, None)?;
        self.catalog.adjust_constraint_index_ordinals(table_id, position);
        self.bump_ddl_timestamps();

        Ok(())
    }

    /// Rebuilds one index in place after its storage anchor was reset:
    /// unlinks every node of that index, then reinserts every row.
    pub fn reindex(&mut self, session: &mut Session, table_id: TableId, name: &str) -> Result<()> {
        let table = self.catalog.table(table_id)?;

        let Some(position) = table.get_index_position(name) else {
            bail!("object not found: index '{}'", name);
        };

        let index = &table.indexes()[position];
        let store = Self::resolve_store_mut(&mut self.stores, session, table)?;

        for pos in store.row_positions() {
            let node = store.row(pos).and_then(|row| row.node(position));
            if let Some(node) = node {
                index.delete(store, node);
            }
        }

        store.set_accessor(position, None);

        for pos in store.row_positions() {
            index.insert(store, pos)?;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // constraint moves

    /// Adds a UNIQUE constraint backed by a fresh unique index.
    pub fn add_unique_constraint(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        name: &str,
        cols: Vec<usize>,
    ) -> Result<()> {
        let index_name = format!("SYS_IDX_{}", name);
        let position = self.add_index(session, table_id, &index_name, cols.clone(), true)?;

        self.catalog
            .add_constraint(ConstraintCore::unique(name, table_id, cols, position))?;
        self.bump_ddl_timestamps();

        Ok(())
    }

    /// Adds a CHECK constraint after validating it against every
    /// existing row.
    pub fn add_check_constraint(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        name: &str,
        predicate: CheckPredicate,
    ) -> Result<()> {
        {
            let table = self.catalog.table(table_id)?;
            let store = Self::resolve_store(&self.stores, session, table)?;

            for pos in store.row_positions() {
                session.check_interrupt()?;

                if !predicate(store.row_data(pos)) {
                    bail!(
                        "CHECK constraint violated: constraint '{}' on table '{}'",
                        name,
                        table.name()
                    );
                }
            }
        }

        self.catalog
            .add_constraint(ConstraintCore::check(name, table_id, predicate))?;
        self.bump_ddl_timestamps();

        Ok(())
    }

    /// Adds a foreign key from `ref_table(ref_cols)` to
    /// `main_table(main_cols)`. The referenced columns must already carry
    /// a unique index; the referencing side gains a plain index when it
    /// has none. Existing rows are validated.
    #[allow(clippy::too_many_arguments)]
    pub fn add_foreign_key(
        &mut self,
        session: &mut Session,
        name: &str,
        main_table: TableId,
        main_cols: Vec<usize>,
        ref_table: TableId,
        ref_cols: Vec<usize>,
        delete_action: ReferentialAction,
        update_action: ReferentialAction,
    ) -> Result<()> {
        let main_index = {
            let table = self.catalog.table(main_table)?;
            table
                .indexes()
                .iter()
                .position(|i| i.is_unique() && i.columns() == main_cols.as_slice())
        };

        let Some(main_index) = main_index else {
            bail!(
                "object not found: no unique constraint on the referenced columns of table id {}",
                main_table
            );
        };

        let ref_index = {
            let table = self.catalog.table(ref_table)?;
            table
                .indexes()
                .iter()
                .position(|i| i.columns() == ref_cols.as_slice())
        };

        let ref_index = match ref_index {
            Some(position) => position,
            None => self.add_index(
                session,
                ref_table,
                &format!("SYS_IDX_{}", name),
                ref_cols.clone(),
                false,
            )?,
        };

        let core = ConstraintCore::foreign_key(
            name,
            main_table,
            main_cols,
            main_index,
            ref_table,
            ref_cols.clone(),
            ref_index,
            delete_action,
            update_action,
        );

        // existing rows must satisfy the new key
        {
            let table = self.catalog.table(ref_table)?;
            let store = Self::resolve_store(&self.stores, session, table)?;

            for pos in store.row_positions() {
                session.check_interrupt()?;
                self.check_fk_insert(session, &core, store.row_data(pos))?;
            }
        }

        self.catalog.add_constraint(core)?;
        self.bump_ddl_timestamps();

        Ok(())
    }

    /// Drops a named constraint. A unique constraint takes its backing
    /// index with it; a primary key or a unique core backing a foreign
    /// key refuses.
    pub fn drop_constraint(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        name: &str,
    ) -> Result<()> {
        let (id, kind, index_name) = {
            let Some(core) = self.catalog.find_constraint(table_id, name) else {
                bail!("object not found: constraint '{}'", name);
            };

            if core.kind == ConstraintKind::PrimaryKey {
                bail!("schema object '{}' is in use: primary key", name);
            }

            let index_name = (core.kind == ConstraintKind::Unique).then(|| {
                self.catalog
                    .table(table_id)
                    .ok()
                    .map(|t| t.indexes()[core.main_index].name().to_string())
            });

            (core.id, core.kind, index_name.flatten())
        };

        self.catalog.drop_constraint(id)?;

        if kind == ConstraintKind::Unique {
            if let Some(index_name) = index_name {
                // the backing index is no longer constraint-bound
                self.drop_constraint_index(session, table_id, &index_name)?;
            }
        }

        self.bump_ddl_timestamps();

        Ok(())
    }

    fn drop_constraint_index(
        &mut self,
        session: &mut Session,
        table_id: TableId,
        name: &str,
    ) -> Result<()> {
        let position = {
            let table = self.catalog.table(table_id)?;
            match table.get_index_position(name) {
                Some(position) if position > 0 => position,
                _ => return Ok(()),
            }
        };

        self.catalog
            .check_constraint_index_droppable(table_id, position)?;

        let spec = {
            let table = self.catalog.table(table_id)?;
            let mut secondary = Self::gather_secondary(table, |c| c);
            secondary.remove(position - 1);

            RebuildSpec {
                columns: table.columns().to_vec(),
                pk_cols: table.primary_key_cols().to_vec(),
                secondary,
            }
        };

        self.rebuild_table(session, table_id, spec, None, 0, None)?;
        self.catalog.adjust_constraint_index_ordinals(table_id, position);

        Ok(())
    }

    // ------------------------------------------------------------------
    // triggers

    /// Adds a trigger, optionally ordered before an existing one.
    pub fn add_trigger(
        &mut self,
        table_id: TableId,
        trigger: crate::schema::TriggerDef,
        before: Option<&str>,
    ) -> Result<()> {
        self.catalog.table_mut(table_id)?.add_trigger(trigger, before);
        self.bump_ddl_timestamps();
        Ok(())
    }

    pub fn drop_trigger(&mut self, table_id: TableId, name: &str) -> Result<()> {
        let table = self.catalog.table_mut(table_id)?;

        if table.get_trigger(name).is_none() {
            bail!("object not found: trigger '{}'", name);
        }

        table.remove_trigger(name);
        self.bump_ddl_timestamps();
        Ok(())
    }

    /// SET TABLE ... READONLY. A DDL commit like any other.
    pub fn set_table_read_only(&mut self, table_id: TableId, read_only: bool) -> Result<()> {
        self.catalog.table_mut(table_id)?.set_read_only(read_only);
        self.bump_ddl_timestamps();
        Ok(())
    }

    // ------------------------------------------------------------------
    // table drop

    pub fn drop_table(&mut self, table_id: TableId) -> Result<()> {
        let table = self.catalog.drop_table(table_id)?;

        if let Some(mut store) = self.stores.remove(&table.persistence_id()) {
            store.release();
        }

        self.bump_ddl_timestamps();

        debug!(table = table.name(), "table dropped");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_adjust_inserts_at_index() {
        let source = vec![Value::Int(1), Value::Int(3)];
        let out = copy_adjust_array(&source, Some(1), 1, Some(&Value::Int(2)));

        assert_eq!(out, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn copy_adjust_drops_at_index() {
        let source = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
        let out = copy_adjust_array(&source, Some(1), -1, None);

        assert_eq!(out, vec![Value::Int(1), Value::Int(3)]);
    }

    #[test]
    fn copy_adjust_substitutes_in_place() {
        let source = vec![Value::Int(1), Value::Int(2)];
        let out = copy_adjust_array(&source, Some(0), 0, Some(&Value::Int(9)));

        assert_eq!(out, vec![Value::Int(9), Value::Int(2)]);
    }

    #[test]
    fn copy_adjust_without_column_is_identity() {
        let source = vec![Value::Int(1), Value::Int(2)];
        let out = copy_adjust_array(&source, None, 0, None);

        assert_eq!(out, source);
    }

    #[test]
    fn missing_column_insert_defaults_to_null() {
        let source = vec![Value::Int(1)];
        let out = copy_adjust_array(&source, Some(1), 1, None);

        assert_eq!(out, vec![Value::Int(1), Value::Null]);
    }
}
