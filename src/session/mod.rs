//! # Session Surface
//!
//! The engine never owns a connection; it sees a `Session`: the current
//! schema, the transaction journal of row actions, the last identity value
//! handed out, a cooperative abort flag checked at row-iteration
//! boundaries, and the statement-compiler callback the statement cache
//! drives.
//!
//! ## Journal
//!
//! Mutating statements append `RowAction`s. An insert's row is live
//! immediately; a delete's row stays linked in every index until the
//! transaction commits — that is what keeps a statement's own snapshot
//! stable — and only commit unlinks and removes it. Rollback unwinds
//! inserts and clears delete marks.

use eyre::{bail, Result};
use hashbrown::HashMap;

use crate::database::Statement;
use crate::schema::{Catalog, TableId};
use crate::storage::RowStore;
use crate::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowActionKind {
    Insert,
    Delete,
}

#[derive(Debug, Clone, Copy)]
pub struct RowAction {
    pub kind: RowActionKind,
    pub table: TableId,
    pub row_pos: i64,
}

/// Compiler callback. SQL text goes in, an executable statement comes
/// out; parsing and planning live entirely behind this seam.
pub trait StatementCompiler: Send {
    fn compile(
        &mut self,
        catalog: &Catalog,
        schema: &str,
        sql: &str,
        properties: u8,
    ) -> Result<Statement>;
}

impl<F> StatementCompiler for F
where
    F: FnMut(&Catalog, &str, &str, u8) -> Result<Statement> + Send,
{
    fn compile(
        &mut self,
        catalog: &Catalog,
        schema: &str,
        sql: &str,
        properties: u8,
    ) -> Result<Statement> {
        self(catalog, schema, sql, properties)
    }
}

pub struct Session {
    id: u64,
    current_schema: String,
    journal: Vec<RowAction>,
    last_identity: Option<Value>,
    abort_requested: bool,
    compiler: Box<dyn StatementCompiler>,
    session_stores: HashMap<u64, RowStore>,
}

impl Session {
    pub fn new(id: u64, schema: impl Into<String>, compiler: Box<dyn StatementCompiler>) -> Self {
        Self {
            id,
            current_schema: schema.into(),
            journal: Vec::new(),
            last_identity: None,
            abort_requested: false,
            compiler,
            session_stores: HashMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn current_schema(&self) -> &str {
        &self.current_schema
    }

    pub fn set_schema(&mut self, schema: impl Into<String>) {
        self.current_schema = schema.into();
    }

    // ------------------------------------------------------------------
    // journal

    pub fn add_insert_action(&mut self, table: TableId, row_pos: i64) -> usize {
        self.push_action(RowActionKind::Insert, table, row_pos)
    }

    pub fn add_delete_action(&mut self, table: TableId, row_pos: i64) -> usize {
        self.push_action(RowActionKind::Delete, table, row_pos)
    }

    fn push_action(&mut self, kind: RowActionKind, table: TableId, row_pos: i64) -> usize {
        self.journal.push(RowAction {
            kind,
            table,
            row_pos,
        });
        self.journal.len() - 1
    }

    pub fn journal(&self) -> &[RowAction] {
        &self.journal
    }

    pub(crate) fn take_journal(&mut self) -> Vec<RowAction> {
        std::mem::take(&mut self.journal)
    }

    // ------------------------------------------------------------------
    // identity

    pub fn last_identity(&self) -> Option<&Value> {
        self.last_identity.as_ref()
    }

    pub fn set_last_identity(&mut self, value: Value) {
        self.last_identity = Some(value);
    }

    // ------------------------------------------------------------------
    // cancellation

    pub fn request_abort(&mut self) {
        self.abort_requested = true;
    }

    pub fn clear_abort(&mut self) {
        self.abort_requested = false;
    }

    /// Checked at row-iteration boundaries; there is no mid-row abort.
    pub fn check_interrupt(&self) -> Result<()> {
        if self.abort_requested {
            bail!("statement execution aborted by session {}", self.id);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // compiler

    pub fn compile_statement(
        &mut self,
        catalog: &Catalog,
        sql: &str,
        properties: u8,
    ) -> Result<Statement> {
        let schema = self.current_schema.clone();
        self.compiler.compile(catalog, &schema, sql, properties)
    }

    // ------------------------------------------------------------------
    // session-scoped stores

    /// Row store for a session-based table, created on first touch.
    pub fn session_store_mut(
        &mut self,
        persistence_id: u64,
        create: impl FnOnce() -> RowStore,
    ) -> &mut RowStore {
        self.session_stores
            .entry(persistence_id)
            .or_insert_with(create)
    }

    pub fn session_store(&self, persistence_id: u64) -> Option<&RowStore> {
        self.session_stores.get(&persistence_id)
    }

    pub(crate) fn put_session_store(&mut self, persistence_id: u64, store: RowStore) {
        self.session_stores.insert(persistence_id, store);
    }

    pub(crate) fn remove_session_store(&mut self, persistence_id: u64) -> Option<RowStore> {
        self.session_stores.remove(&persistence_id)
    }

    pub fn drop_session_stores(&mut self) {
        self.session_stores.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Statement, StatementType};

    fn stub_compiler() -> Box<dyn StatementCompiler> {
        Box::new(
            |_catalog: &Catalog, schema: &str, sql: &str, props: u8| -> eyre::Result<Statement> {
                Ok(Statement::new(sql, schema, StatementType::Query, props))
            },
        )
    }

    #[test]
    fn journal_preserves_order() {
        let mut session = Session::new(1, "PUBLIC", stub_compiler());

        session.add_insert_action(10, 0);
        session.add_delete_action(10, 1);
        session.add_insert_action(11, 2);

        let kinds: Vec<RowActionKind> = session.journal().iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RowActionKind::Insert,
                RowActionKind::Delete,
                RowActionKind::Insert
            ]
        );
    }

    #[test]
    fn interrupt_flag_fails_checks_until_cleared() {
        let mut session = Session::new(3, "PUBLIC", stub_compiler());
        assert!(session.check_interrupt().is_ok());

        session.request_abort();
        let err = session.check_interrupt().unwrap_err().to_string();
        assert!(err.contains("aborted"));

        session.clear_abort();
        assert!(session.check_interrupt().is_ok());
    }

    #[test]
    fn compile_uses_current_schema() {
        let mut session = Session::new(1, "S1", stub_compiler());
        let catalog = Catalog::new();

        let stmt = session.compile_statement(&catalog, "SELECT 1", 0).unwrap();
        assert_eq!(stmt.schema(), "S1");

        session.set_schema("S2");
        let stmt = session.compile_statement(&catalog, "SELECT 1", 0).unwrap();
        assert_eq!(stmt.schema(), "S2");
    }
}
