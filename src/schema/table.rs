//! # Table Definition
//!
//! The in-memory representation of one table: ordered, name-indexed
//! columns; the index list with the primary index at position 0; the
//! constraint id list with the primary-key constraint at position 0 when
//! present; the six trigger lists; and the identity sequence.
//!
//! A table is one of a closed set of variants. The variant decides the
//! capability set — persistence scope, session binding, logging, file
//! backing — and everything downstream dispatches on the capabilities,
//! not the variant.
//!
//! | Variant | scope       | session-based | logged | file-backed |
//! |---------|-------------|---------------|--------|-------------|
//! | Memory  | full        | no            | yes    | no          |
//! | Cached  | full        | no            | yes    | yes         |
//! | Text    | full        | no            | no     | yes         |
//! | Temp    | transaction | yes           | no     | no          |
//! | View    | statement   | yes           | no     | no          |
//!
//! Row lifecycle (insert/update/delete orchestration) lives in the
//! database DML layer; this type owns definitions and the small pieces of
//! mutable state that belong to the definition, the identity sequence
//! above all.

use eyre::{bail, Result};
use hashbrown::HashMap;

use crate::constraints::ConstraintId;
use crate::index::Index;
use crate::schema::{ColumnDef, NumberSequence, TriggerDef, NUM_TRIGGER_LISTS};
use crate::types::{DataType, Value};

pub type TableId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Memory,
    Cached,
    Text,
    Temp,
    View,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceScope {
    Statement,
    Session,
    Transaction,
    Full,
}

pub struct Table {
    id: TableId,
    persistence_id: u64,
    schema: String,
    name: String,
    kind: TableKind,

    columns: Vec<ColumnDef>,
    column_map: HashMap<String, usize>,
    col_not_null: Vec<bool>,
    default_column_map: Vec<usize>,

    indexes: Vec<Index>,
    primary_key_cols: Vec<usize>,

    constraints: Vec<ConstraintId>,
    fk_path: Vec<ConstraintId>,

    trigger_lists: [Vec<TriggerDef>; NUM_TRIGGER_LISTS],

    identity_column: Option<usize>,
    identity_sequence: Option<NumberSequence>,

    read_only: bool,
}

impl Table {
    pub fn new(
        id: TableId,
        persistence_id: u64,
        schema: impl Into<String>,
        name: impl Into<String>,
        kind: TableKind,
        columns: Vec<ColumnDef>,
    ) -> Result<Self> {
        let mut column_map = HashMap::with_capacity(columns.len());
        let mut identity_column = None;

        for (i, col) in columns.iter().enumerate() {
            if column_map.insert(col.name().to_string(), i).is_some() {
                bail!("duplicate object: column '{}'", col.name());
            }

            if col.is_identity() {
                if identity_column.is_some() {
                    bail!("duplicate object: second identity column '{}'", col.name());
                }
                identity_column = Some(i);
            }
        }

        let col_not_null = columns.iter().map(ColumnDef::is_not_null).collect();
        let default_column_map = (0..columns.len()).collect();
        let identity_sequence = identity_column.map(|_| {
            NumberSequence::new(
                crate::config::DEFAULT_IDENTITY_START,
                crate::config::DEFAULT_IDENTITY_INCREMENT,
            )
        });

        Ok(Self {
            id,
            persistence_id,
            schema: schema.into(),
            name: name.into(),
            kind,
            columns,
            column_map,
            col_not_null,
            default_column_map,
            indexes: Vec::new(),
            primary_key_cols: Vec::new(),
            constraints: Vec::new(),
            fk_path: Vec::new(),
            trigger_lists: std::array::from_fn(|_| Vec::new()),
            identity_column,
            identity_sequence,
            read_only: false,
        })
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn persistence_id(&self) -> u64 {
        self.persistence_id
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    // ------------------------------------------------------------------
    // capabilities

    pub fn persistence_scope(&self) -> PersistenceScope {
        match self.kind {
            TableKind::Memory | TableKind::Cached | TableKind::Text => PersistenceScope::Full,
            TableKind::Temp => PersistenceScope::Transaction,
            TableKind::View => PersistenceScope::Statement,
        }
    }

    pub fn is_session_based(&self) -> bool {
        matches!(self.kind, TableKind::Temp | TableKind::View)
    }

    pub fn is_logged(&self) -> bool {
        matches!(self.kind, TableKind::Memory | TableKind::Cached) && !self.read_only
    }

    pub fn is_file_based(&self) -> bool {
        matches!(self.kind, TableKind::Cached | TableKind::Text)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn check_data_is_writable(&self) -> Result<()> {
        if self.read_only || self.kind == TableKind::View {
            bail!("table '{}' is read only", self.name);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // columns

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> &ColumnDef {
        &self.columns[index]
    }

    pub fn get_column_index(&self, name: &str) -> Result<usize> {
        match self.column_map.get(name) {
            Some(&i) => Ok(i),
            None => bail!("column not found: '{}' in table '{}'", name, self.name),
        }
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.column_map.get(name).copied()
    }

    pub fn column_types(&self) -> Vec<DataType> {
        self.columns.iter().map(ColumnDef::data_type).collect()
    }

    pub fn col_not_null(&self) -> &[bool] {
        &self.col_not_null
    }

    /// The identity column map 0,1,2,... over all columns.
    pub fn default_column_map(&self) -> &[usize] {
        &self.default_column_map
    }

    pub fn rename_column(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        if self.column_map.contains_key(new_name) {
            bail!("duplicate object: column '{}'", new_name);
        }

        let index = self.get_column_index(old_name)?;
        self.column_map.remove(old_name);
        self.column_map.insert(new_name.to_string(), index);
        self.columns[index].set_name(new_name);

        Ok(())
    }

    pub fn get_empty_row_data(&self) -> Vec<Value> {
        vec![Value::Null; self.columns.len()]
    }

    // ------------------------------------------------------------------
    // indexes

    /// Installs the primary index at position 0. Every table gets one; a
    /// table without a primary key gets a non-unique index over no
    /// columns, which orders rows by position alone.
    pub fn create_primary_key(&mut self, cols: Vec<usize>) {
        debug_assert!(self.indexes.is_empty(), "primary index must come first");

        let types: Vec<DataType> = cols.iter().map(|&c| self.columns[c].data_type()).collect();
        let unique = !cols.is_empty();
        let mut index = Index::new("SYS_IDX_PK", 0, cols.clone(), types, unique);
        if unique {
            index = index.as_primary();
        }

        self.primary_key_cols = cols;
        self.indexes.push(index);
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key_cols.is_empty()
    }

    pub fn primary_key_cols(&self) -> &[usize] {
        &self.primary_key_cols
    }

    pub fn add_index(&mut self, index: Index) {
        debug_assert_eq!(index.position(), self.indexes.len());
        self.indexes.push(index);
    }

    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }

    pub fn primary_index(&self) -> &Index {
        &self.indexes[0]
    }

    pub fn get_index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name() == name)
    }

    pub fn get_index_position(&self, name: &str) -> Option<usize> {
        self.indexes.iter().position(|i| i.name() == name)
    }

    /// Index used to locate a row by full-row match when there is no
    /// primary key: the first secondary, if any.
    pub fn best_index(&self) -> Option<&Index> {
        self.indexes.get(1)
    }

    // ------------------------------------------------------------------
    // constraints

    /// Adds a constraint id. The primary-key constraint takes position 0;
    /// everything else appends.
    pub fn add_constraint_id(&mut self, id: ConstraintId, is_primary_key: bool) {
        if is_primary_key {
            self.constraints.insert(0, id);
        } else {
            self.constraints.push(id);
        }
    }

    pub fn constraint_ids(&self) -> &[ConstraintId] {
        &self.constraints
    }

    pub fn remove_constraint_id(&mut self, id: ConstraintId) {
        self.constraints.retain(|&c| c != id);
    }

    pub(crate) fn set_constraint_ids(&mut self, ids: Vec<ConstraintId>) {
        self.constraints = ids;
    }

    pub fn fk_path(&self) -> &[ConstraintId] {
        &self.fk_path
    }

    pub fn set_fk_path(&mut self, path: Vec<ConstraintId>) {
        self.fk_path = path;
    }

    // ------------------------------------------------------------------
    // triggers

    pub fn has_trigger(&self, list_index: usize) -> bool {
        !self.trigger_lists[list_index].is_empty()
    }

    pub fn trigger_list(&self, list_index: usize) -> &[TriggerDef] {
        &self.trigger_lists[list_index]
    }

    pub fn trigger_list_mut(&mut self, list_index: usize) -> &mut Vec<TriggerDef> {
        &mut self.trigger_lists[list_index]
    }

    /// Adds a trigger, optionally ordered before an existing one in the
    /// same list.
    pub fn add_trigger(&mut self, trigger: TriggerDef, before: Option<&str>) {
        let list = &mut self.trigger_lists[trigger.list_index()];

        if let Some(other) = before {
            if let Some(at) = list.iter().position(|t| t.name() == other) {
                list.insert(at, trigger);
                return;
            }
        }

        list.push(trigger);
    }

    pub fn get_trigger(&self, name: &str) -> Option<&TriggerDef> {
        self.trigger_lists
            .iter()
            .flat_map(|list| list.iter())
            .find(|t| t.name() == name)
    }

    pub fn remove_trigger(&mut self, name: &str) {
        for list in self.trigger_lists.iter_mut() {
            list.retain(|t| t.name() != name);
        }
    }

    pub fn release_triggers(&mut self) {
        for list in self.trigger_lists.iter_mut() {
            list.clear();
        }
    }

    /// Moves the trigger lists out, for a DDL rebuild carrying them to
    /// the new definition.
    pub(crate) fn take_trigger_lists(&mut self) -> [Vec<TriggerDef>; NUM_TRIGGER_LISTS] {
        std::mem::replace(&mut self.trigger_lists, std::array::from_fn(|_| Vec::new()))
    }

    pub(crate) fn set_trigger_lists(&mut self, lists: [Vec<TriggerDef>; NUM_TRIGGER_LISTS]) {
        self.trigger_lists = lists;
    }

    // ------------------------------------------------------------------
    // identity

    pub fn identity_column(&self) -> Option<usize> {
        self.identity_column
    }

    pub fn identity_sequence(&self) -> Option<&NumberSequence> {
        self.identity_sequence.as_ref()
    }

    /// Next identity value without consuming it; None when the table has
    /// no identity column.
    pub fn peek_identity(&self) -> Option<i64> {
        self.identity_sequence.as_ref().map(NumberSequence::peek)
    }

    /// Fills or observes the identity column on insert. Returns the value
    /// the row ends up carrying, for the session's last-identity slot.
    pub fn set_identity_column(&mut self, data: &mut [Value]) -> Option<Value> {
        let column = self.identity_column?;
        let sequence = self
            .identity_sequence
            .as_mut()
            .unwrap_or_else(|| panic!("internal invariant: identity column without sequence"));

        let id = match data[column] {
            Value::Null => {
                let id = sequence.get_value();
                data[column] = Value::Int(id);
                id
            }
            Value::Int(user_value) => {
                sequence.user_update(user_value);
                user_value
            }
            ref other => {
                return Some(other.clone());
            }
        };

        Some(Value::Int(id))
    }

    /// Log-replay observation: advance the sequence past an already
    /// persisted identity value, never generate.
    pub fn system_update_identity_value(&mut self, data: &[Value]) {
        let Some(column) = self.identity_column else {
            return;
        };

        if let Value::Int(id) = data[column] {
            if let Some(sequence) = self.identity_sequence.as_mut() {
                sequence.system_update(id);
            }
        }
    }

    pub fn reset_identity(&mut self) {
        if let Some(sequence) = self.identity_sequence.as_mut() {
            sequence.reset();
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("schema", &self.schema)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("columns", &self.columns.len())
            .field("indexes", &self.indexes.len())
            .field("constraints", &self.constraints.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{TriggerEvent, TriggerTiming};

    fn table_with_columns() -> Table {
        Table::new(
            1,
            1,
            "PUBLIC",
            "accounts",
            TableKind::Memory,
            vec![
                ColumnDef::new("id", DataType::BigInt).identity(),
                ColumnDef::new("name", DataType::Varchar).not_null(),
                ColumnDef::new("balance", DataType::Double),
            ],
        )
        .unwrap()
    }

    #[test]
    fn duplicate_column_name_is_rejected() {
        let result = Table::new(
            1,
            1,
            "PUBLIC",
            "t",
            TableKind::Memory,
            vec![
                ColumnDef::new("a", DataType::Integer),
                ColumnDef::new("a", DataType::Integer),
            ],
        );

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("duplicate object"));
    }

    #[test]
    fn capabilities_follow_variant() {
        let mut table = table_with_columns();
        assert!(table.is_logged());
        assert!(!table.is_file_based());
        assert!(!table.is_session_based());
        assert_eq!(table.persistence_scope(), PersistenceScope::Full);

        table.set_read_only(true);
        assert!(!table.is_logged());
        assert!(table.check_data_is_writable().is_err());
    }

    #[test]
    fn primary_key_index_sits_at_position_zero() {
        let mut table = table_with_columns();
        table.create_primary_key(vec![0]);

        assert!(table.has_primary_key());
        assert!(table.primary_index().is_unique());
        assert_eq!(table.primary_index().position(), 0);
    }

    #[test]
    fn table_without_pk_gets_row_order_index() {
        let mut table = table_with_columns();
        table.create_primary_key(vec![]);

        assert!(!table.has_primary_key());
        assert!(!table.primary_index().is_unique());
    }

    #[test]
    fn identity_fills_null_and_observes_user_values() {
        let mut table = table_with_columns();

        let mut data = vec![Value::Null, Value::Text("a".into()), Value::Null];
        let id = table.set_identity_column(&mut data);
        assert_eq!(id, Some(Value::Int(1)));
        assert_eq!(data[0], Value::Int(1));

        let mut data = vec![Value::Int(10), Value::Text("b".into()), Value::Null];
        table.set_identity_column(&mut data);
        assert_eq!(table.peek_identity(), Some(11));
    }

    #[test]
    fn system_update_never_generates() {
        let mut table = table_with_columns();

        let data = vec![Value::Int(42), Value::Text("a".into()), Value::Null];
        table.system_update_identity_value(&data);

        assert_eq!(table.peek_identity(), Some(43));
    }

    #[test]
    fn trigger_ordering_honors_before() {
        let mut table = table_with_columns();
        let noop = || {
            Box::new(
                |_: Option<&[Value]>, _: Option<&mut Vec<Value>>| -> eyre::Result<()> { Ok(()) },
            ) as Box<dyn crate::schema::TriggerHandler>
        };

        table.add_trigger(
            TriggerDef::new("second", TriggerTiming::Before, TriggerEvent::Insert, true, noop()),
            None,
        );
        table.add_trigger(
            TriggerDef::new("first", TriggerTiming::Before, TriggerEvent::Insert, true, noop()),
            Some("second"),
        );

        let list_index =
            crate::schema::trigger_list_index(TriggerTiming::Before, TriggerEvent::Insert);
        let names: Vec<&str> = table
            .trigger_list(list_index)
            .iter()
            .map(TriggerDef::name)
            .collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn remove_trigger_empties_list() {
        let mut table = table_with_columns();
        table.add_trigger(
            TriggerDef::new(
                "trg",
                TriggerTiming::After,
                TriggerEvent::Delete,
                false,
                Box::new(
                    |_: Option<&[Value]>, _: Option<&mut Vec<Value>>| -> eyre::Result<()> {
                        Ok(())
                    },
                ),
            ),
            None,
        );

        let list_index =
            crate::schema::trigger_list_index(TriggerTiming::After, TriggerEvent::Delete);
        assert!(table.has_trigger(list_index));

        table.remove_trigger("trg");
        assert!(!table.has_trigger(list_index));
    }
}
