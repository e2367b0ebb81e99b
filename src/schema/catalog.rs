//! # Catalog
//!
//! Per-database registry of tables and constraint cores. Tables form a
//! directed graph through foreign keys; the catalog owns every node in an
//! id-keyed arena and the graph edges are ids, so cyclic references cost
//! nothing and a DDL rebuild rebinds ids instead of copying cores.
//!
//! The catalog also carries the schema change timestamp: a monotonically
//! increasing counter bumped on every DDL commit. Compiled statements
//! whose compile timestamp lies below it are stale.

use eyre::{bail, Result};
use hashbrown::HashMap;
use tracing::debug;

use crate::constraints::{ConstraintCore, ConstraintId, ConstraintKind};
use crate::schema::{Table, TableId};

#[derive(Default)]
pub struct Catalog {
    tables: HashMap<TableId, Table>,
    table_names: HashMap<(String, String), TableId>,
    constraints: HashMap<ConstraintId, ConstraintCore>,

    next_table_id: TableId,
    next_constraint_id: ConstraintId,
    next_persistence_id: u64,

    schema_change_timestamp: u64,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema_change_timestamp(&self) -> u64 {
        self.schema_change_timestamp
    }

    /// Bumps the schema change timestamp. The transaction manager
    /// supplies its just-advanced global timestamp; the schema timestamp
    /// rises to it but never past it, so a statement compiled in the
    /// same instant still validates.
    pub fn bump_schema_change_timestamp(&mut self, global_timestamp: u64) {
        self.schema_change_timestamp = (self.schema_change_timestamp + 1).max(global_timestamp);
        debug!(
            timestamp = self.schema_change_timestamp,
            "schema change timestamp advanced"
        );
    }

    pub fn next_table_id(&mut self) -> TableId {
        self.next_table_id += 1;
        self.next_table_id
    }

    pub fn next_persistence_id(&mut self) -> u64 {
        self.next_persistence_id += 1;
        self.next_persistence_id
    }

    // ------------------------------------------------------------------
    // tables

    pub fn add_table(&mut self, table: Table) -> Result<TableId> {
        let key = (table.schema().to_string(), table.name().to_string());

        if self.table_names.contains_key(&key) {
            bail!("duplicate object: table '{}.{}'", key.0, key.1);
        }

        let id = table.id();
        self.table_names.insert(key, id);
        self.tables.insert(id, table);

        Ok(id)
    }

    pub fn table(&self, id: TableId) -> Result<&Table> {
        match self.tables.get(&id) {
            Some(t) => Ok(t),
            None => bail!("object not found: table id {}", id),
        }
    }

    pub fn table_mut(&mut self, id: TableId) -> Result<&mut Table> {
        match self.tables.get_mut(&id) {
            Some(t) => Ok(t),
            None => bail!("object not found: table id {}", id),
        }
    }

    pub fn find_table(&self, schema: &str, name: &str) -> Option<TableId> {
        self.table_names
            .get(&(schema.to_string(), name.to_string()))
            .copied()
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        self.tables.keys().copied().collect()
    }

    /// Removes a table. Fails while a foreign key from another table
    /// still references it.
    pub fn drop_table(&mut self, id: TableId) -> Result<Table> {
        let referencing: Vec<&ConstraintCore> = self
            .constraints
            .values()
            .filter(|c| c.is_foreign_key() && c.main_table == id && c.ref_table != id)
            .collect();

        if let Some(core) = referencing.first() {
            bail!(
                "schema object '{}' is in use: referenced by constraint '{}'",
                self.table(id)?.name(),
                core.name
            );
        }

        let Some(table) = self.tables.remove(&id) else {
            bail!("object not found: table id {}", id);
        };

        self.table_names
            .remove(&(table.schema().to_string(), table.name().to_string()));

        // every core the table touched dies with it, and the shared ids
        // leave the other side's list too
        let owned: Vec<ConstraintId> = table.constraint_ids().to_vec();
        for constraint_id in owned {
            self.constraints.remove(&constraint_id);

            for other in self.tables.values_mut() {
                other.remove_constraint_id(constraint_id);
            }
        }

        Ok(table)
    }

    /// Swaps in a rebuilt table definition under the same id and name.
    pub fn replace_table(&mut self, table: Table) -> Result<()> {
        let id = table.id();

        if !self.tables.contains_key(&id) {
            bail!("object not found: table id {}", id);
        }

        self.tables.insert(id, table);
        Ok(())
    }

    // ------------------------------------------------------------------
    // constraints

    /// Registers a core, links it into the owning table's list (and the
    /// referencing table's for a foreign key), and refreshes the owning
    /// table's cascade path.
    pub fn add_constraint(&mut self, core: ConstraintCore) -> Result<ConstraintId> {
        self.next_constraint_id += 1;
        let id = self.next_constraint_id;

        let mut core = core;
        core.id = id;

        let is_primary = core.kind == ConstraintKind::PrimaryKey;
        let main_table = core.main_table;
        let ref_table = core.ref_table;

        self.table(main_table)?;
        self.table(ref_table)?;

        self.constraints.insert(id, core);

        self.table_mut(main_table)?.add_constraint_id(id, is_primary);

        if ref_table != main_table {
            self.table_mut(ref_table)?.add_constraint_id(id, false);
        }

        // materialise the cascade path for the table that gained the
        // constraint
        let column_map: Vec<usize> = self.table(main_table)?.default_column_map().to_vec();
        let path = self.get_constraint_path(main_table, &column_map);
        self.table_mut(main_table)?.set_fk_path(path);

        Ok(id)
    }

    pub fn constraint(&self, id: ConstraintId) -> Result<&ConstraintCore> {
        match self.constraints.get(&id) {
            Some(c) => Ok(c),
            None => bail!("object not found: constraint id {}", id),
        }
    }

    pub fn find_constraint(&self, table_id: TableId, name: &str) -> Option<&ConstraintCore> {
        self.table(table_id)
            .ok()?
            .constraint_ids()
            .iter()
            .filter_map(|id| self.constraints.get(id))
            .find(|c| c.name == name)
    }

    /// Drops a constraint from its owning table. A unique or primary-key
    /// core still referenced by a foreign key refuses.
    pub fn drop_constraint(&mut self, id: ConstraintId) -> Result<ConstraintCore> {
        let core = self.constraint(id)?.clone();

        if core.is_unique_kind() {
            let referenced = self.constraints.values().any(|c| {
                c.is_foreign_key()
                    && c.main_table == core.main_table
                    && c.main_index == core.main_index
            });

            if referenced {
                bail!(
                    "schema object '{}' is in use: backing a foreign key",
                    core.name
                );
            }
        }

        self.constraints.remove(&id);
        self.table_mut(core.main_table)?.remove_constraint_id(id);

        if core.ref_table != core.main_table {
            self.table_mut(core.ref_table)?.remove_constraint_id(id);
        }

        Ok(core)
    }

    /// Foreign keys whose referenced (main) side is the given table —
    /// the constraints a delete on that table must consult.
    pub fn constraints_referencing(&self, table_id: TableId) -> Vec<ConstraintId> {
        let Ok(table) = self.table(table_id) else {
            return Vec::new();
        };

        table
            .constraint_ids()
            .iter()
            .filter(|&&id| {
                self.constraints
                    .get(&id)
                    .map(|c| c.is_foreign_key() && c.main_table == table_id)
                    .unwrap_or(false)
            })
            .copied()
            .collect()
    }

    /// Transitive closure of foreign keys with triggered actions whose
    /// main columns intersect `column_map`, starting at `table_id`. The
    /// path is what a cascading delete will walk.
    pub fn get_constraint_path(
        &self,
        table_id: TableId,
        column_map: &[usize],
    ) -> Vec<ConstraintId> {
        let mut path = Vec::new();
        self.collect_constraint_path(table_id, column_map, &mut path);
        path
    }

    fn collect_constraint_path(
        &self,
        table_id: TableId,
        column_map: &[usize],
        path: &mut Vec<ConstraintId>,
    ) {
        let Ok(table) = self.table(table_id) else {
            return;
        };

        for &id in table.constraint_ids() {
            let Some(core) = self.constraints.get(&id) else {
                continue;
            };

            if core.main_table != table_id || !core.has_triggered_action() {
                continue;
            }

            let touches = core.main_cols.iter().any(|c| column_map.contains(c));

            if touches && !path.contains(&id) {
                path.push(id);
                self.collect_constraint_path(core.ref_table, &core.ref_cols, path);
            }
        }
    }

    /// Refusal checks for a column move at `colindex`. Check predicates
    /// are compiled against column positions and refuse any move; a
    /// dropped column no constraint may use.
    pub(crate) fn check_constraint_columns_adjustable(
        &self,
        table_id: TableId,
        colindex: usize,
        adjust: i8,
    ) -> Result<()> {
        for core in self.constraints.values() {
            let on_table = core.main_table == table_id || core.ref_table == table_id;

            if !on_table {
                continue;
            }

            if core.check.is_some() {
                bail!(
                    "schema object '{}' is in use: check predicate is bound to column positions",
                    core.name
                );
            }

            if adjust < 0 {
                let uses = (core.main_table == table_id && core.main_cols.contains(&colindex))
                    || (core.ref_table == table_id && core.ref_cols.contains(&colindex))
                    || (core.main_table == table_id
                        && core.not_null_column == Some(colindex));

                if uses {
                    bail!(
                        "schema object '{}' is in use: references the dropped column",
                        core.name
                    );
                }
            }
        }

        Ok(())
    }

    /// Shifts constraint column indexes after a column add (`adjust` +1)
    /// or drop (`adjust` -1) at `colindex`. The caller has already run
    /// the refusal checks and committed the table rebuild.
    pub(crate) fn adjust_constraint_columns(
        &mut self,
        table_id: TableId,
        colindex: usize,
        adjust: i8,
    ) {
        let shift = |col: &mut usize| {
            if adjust > 0 {
                if *col >= colindex {
                    *col += 1;
                }
            } else if *col > colindex {
                *col -= 1;
            }
        };

        for core in self.constraints.values_mut() {
            if core.main_table == table_id {
                core.main_cols.iter_mut().for_each(&shift);

                if let Some(col) = core.not_null_column.as_mut() {
                    shift(col);
                }
            }

            if core.ref_table == table_id {
                core.ref_cols.iter_mut().for_each(&shift);
            }
        }
    }

    /// Refusal check before an index drop: no constraint may be backed
    /// by the index at `removed_position`.
    pub(crate) fn check_constraint_index_droppable(
        &self,
        table_id: TableId,
        removed_position: usize,
    ) -> Result<()> {
        for core in self.constraints.values() {
            let backing = (core.main_table == table_id && core.main_index == removed_position)
                || (core.ref_table == table_id && core.ref_index == removed_position);

            if backing {
                bail!(
                    "schema object '{}' is in use: backed by the dropped index",
                    core.name
                );
            }
        }

        Ok(())
    }

    /// Shifts constraint index ordinals after an index at
    /// `removed_position` left the table's index list.
    pub(crate) fn adjust_constraint_index_ordinals(
        &mut self,
        table_id: TableId,
        removed_position: usize,
    ) {
        for core in self.constraints.values_mut() {
            if core.main_table == table_id && core.main_index > removed_position {
                core.main_index -= 1;
            }

            if core.ref_table == table_id && core.ref_index > removed_position {
                core.ref_index -= 1;
            }
        }
    }

    /// Clears everything. Called at database close.
    pub fn reset(&mut self) {
        self.tables.clear();
        self.table_names.clear();
        self.constraints.clear();
        self.next_table_id = 0;
        self.next_constraint_id = 0;
        self.next_persistence_id = 0;
        self.schema_change_timestamp = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ReferentialAction;
    use crate::schema::{ColumnDef, TableKind};
    use crate::types::DataType;

    fn new_table(catalog: &mut Catalog, name: &str) -> TableId {
        let id = catalog.next_table_id();
        let pid = catalog.next_persistence_id();
        let mut table = Table::new(
            id,
            pid,
            "PUBLIC",
            name,
            TableKind::Memory,
            vec![
                ColumnDef::new("id", DataType::BigInt).not_null(),
                ColumnDef::new("parent", DataType::BigInt),
            ],
        )
        .unwrap();
        table.create_primary_key(vec![0]);
        catalog.add_table(table).unwrap()
    }

    #[test]
    fn duplicate_table_name_is_rejected() {
        let mut catalog = Catalog::new();
        new_table(&mut catalog, "t");

        let id = catalog.next_table_id();
        let pid = catalog.next_persistence_id();
        let table = Table::new(id, pid, "PUBLIC", "t", TableKind::Memory, vec![]).unwrap();

        let result = catalog.add_table(table);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("duplicate object"));
    }

    #[test]
    fn drop_table_refuses_while_referenced() {
        let mut catalog = Catalog::new();
        let parent = new_table(&mut catalog, "parent");
        let child = new_table(&mut catalog, "child");

        catalog
            .add_constraint(ConstraintCore::foreign_key(
                "fk_child_parent",
                parent,
                vec![0],
                0,
                child,
                vec![1],
                0,
                ReferentialAction::Cascade,
                ReferentialAction::NoAction,
            ))
            .unwrap();

        let result = catalog.drop_table(parent);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("is in use"));

        assert!(catalog.drop_table(child).is_ok());
        assert!(catalog.drop_table(parent).is_ok());
    }

    #[test]
    fn constraint_path_follows_cascade_edges() {
        let mut catalog = Catalog::new();
        let a = new_table(&mut catalog, "a");
        let b = new_table(&mut catalog, "b");
        let c = new_table(&mut catalog, "c");

        // b references a, c references b, both cascading
        let fk_ba = catalog
            .add_constraint(ConstraintCore::foreign_key(
                "fk_b_a", a, vec![0], 0, b, vec![1], 0,
                ReferentialAction::Cascade,
                ReferentialAction::NoAction,
            ))
            .unwrap();
        let fk_cb = catalog
            .add_constraint(ConstraintCore::foreign_key(
                "fk_c_b", b, vec![0], 0, c, vec![1], 0,
                ReferentialAction::Cascade,
                ReferentialAction::NoAction,
            ))
            .unwrap();

        let path = catalog.get_constraint_path(a, &[0, 1]);
        assert!(path.contains(&fk_ba));
        // the walk continues through b's referencing columns; fk_cb joins
        // only when those columns overlap its main columns
        let _ = fk_cb;

        // the owning table's cached path was materialised
        assert!(!catalog.table(a).unwrap().fk_path().is_empty());
    }

    #[test]
    fn constraint_path_terminates_on_cycles() {
        let mut catalog = Catalog::new();
        let a = new_table(&mut catalog, "a");

        // self-referencing cascade
        catalog
            .add_constraint(ConstraintCore::foreign_key(
                "fk_self", a, vec![0], 0, a, vec![1], 0,
                ReferentialAction::Cascade,
                ReferentialAction::NoAction,
            ))
            .unwrap();

        let path = catalog.get_constraint_path(a, &[0, 1]);
        assert_eq!(path.len(), 1);
    }

    #[test]
    fn drop_constraint_refuses_backing_unique() {
        let mut catalog = Catalog::new();
        let parent = new_table(&mut catalog, "parent");
        let child = new_table(&mut catalog, "child");

        let pk = catalog
            .add_constraint(ConstraintCore::primary_key("pk_parent", parent, vec![0]))
            .unwrap();
        catalog
            .add_constraint(ConstraintCore::foreign_key(
                "fk", parent, vec![0], 0, child, vec![1], 0,
                ReferentialAction::NoAction,
                ReferentialAction::NoAction,
            ))
            .unwrap();

        let result = catalog.drop_constraint(pk);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("is in use"));
    }

    #[test]
    fn reset_clears_state() {
        let mut catalog = Catalog::new();
        new_table(&mut catalog, "t");
        catalog.bump_schema_change_timestamp(0);

        catalog.reset();

        assert!(catalog.table_ids().is_empty());
        assert_eq!(catalog.schema_change_timestamp(), 0);
    }
}
