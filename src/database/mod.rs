//! # Database Context
//!
//! The per-database singletons, owned in one place with an explicit
//! lifecycle: the catalog (tables, constraint cores, schema change
//! timestamp), the transaction manager's global change timestamp, the row
//! stores, the shared space manager, the statement cache, and the
//! referential-integrity toggle. Nothing here is module-global; `reset`
//! returns the context to its open state.
//!
//! DML orchestration lives in [`dml`], definition moves in [`ddl`], the
//! statement cache in [`statements`].
//!
//! ## Timestamps
//!
//! The transaction manager's `global_change_timestamp` advances on every
//! commit and every DDL. The catalog's `schema_change_timestamp` advances
//! on DDL only and lower-bounds the validity of compiled statements.

pub mod ddl;
pub mod dml;
mod statements;

pub use statements::{
    GeneratedColumnInfo, Statement, StatementCache, StatementRequest, StatementType,
};

use eyre::{bail, Result};
use hashbrown::HashMap;
use tracing::debug;

use crate::config::{
    DEFAULT_FILE_SCALE, DEFAULT_MAIN_BLOCK_SIZE, DEFAULT_SPACE_CAPACITY,
};
use crate::schema::{Catalog, ColumnDef, Table, TableId, TableKind};
use crate::session::{RowActionKind, Session, StatementCompiler};
use crate::storage::{
    BlockSpaceManager, RowStore, SharedSpaceManager, TableSpaceAllocator,
};
use crate::types::Value;

/// Write-ahead statement log seam. Only logged tables reach it; replay
/// comes back through the `*_from_log` and `*_from_script` paths.
pub trait StatementLogger: Send {
    fn write_insert_statement(&mut self, schema: &str, table: &str, data: &[Value])
        -> Result<()>;

    fn write_delete_statement(&mut self, schema: &str, table: &str, data: &[Value])
        -> Result<()>;
}

/// Transaction manager surface: the commit ordering counter.
#[derive(Debug, Default)]
pub struct TransactionManager {
    global_change_timestamp: u64,
}

impl TransactionManager {
    pub fn global_change_timestamp(&self) -> u64 {
        self.global_change_timestamp
    }

    pub fn advance(&mut self) -> u64 {
        self.global_change_timestamp += 1;
        self.global_change_timestamp
    }

    fn reset(&mut self) {
        self.global_change_timestamp = 0;
    }
}

pub struct Database {
    pub(crate) catalog: Catalog,
    pub(crate) tx: TransactionManager,
    pub(crate) stores: HashMap<u64, RowStore>,
    space_manager: SharedSpaceManager,
    statement_cache: StatementCache,
    pub(crate) referential_integrity: bool,
    pub(crate) logger: Option<Box<dyn StatementLogger>>,
    next_session_id: u64,
    next_space_id: u32,
}

impl Database {
    pub fn new() -> Self {
        Self::with_space_manager(BlockSpaceManager::new().shared())
    }

    pub fn with_space_manager(space_manager: SharedSpaceManager) -> Self {
        Self {
            catalog: Catalog::new(),
            tx: TransactionManager::default(),
            stores: HashMap::new(),
            space_manager,
            statement_cache: StatementCache::new(),
            referential_integrity: true,
            logger: None,
            next_session_id: 0,
            next_space_id: 0,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn global_change_timestamp(&self) -> u64 {
        self.tx.global_change_timestamp()
    }

    pub fn schema_change_timestamp(&self) -> u64 {
        self.catalog.schema_change_timestamp()
    }

    pub fn is_referential_integrity(&self) -> bool {
        self.referential_integrity
    }

    /// Session toggle: disables constraint checks, referential actions
    /// and trigger firing. Used by bulk loads and script replay.
    pub fn set_referential_integrity(&mut self, enabled: bool) {
        self.referential_integrity = enabled;
    }

    pub fn set_logger(&mut self, logger: Box<dyn StatementLogger>) {
        self.logger = Some(logger);
    }

    pub fn statement_cache(&self) -> &StatementCache {
        &self.statement_cache
    }

    // ------------------------------------------------------------------
    // sessions

    pub fn create_session(&mut self, compiler: Box<dyn StatementCompiler>) -> Session {
        self.next_session_id += 1;
        Session::new(self.next_session_id, "PUBLIC", compiler)
    }

    // ------------------------------------------------------------------
    // statements

    pub fn compile(
        &self,
        session: &mut Session,
        request: &StatementRequest,
    ) -> Result<Statement> {
        self.statement_cache.compile(
            session,
            &self.catalog,
            self.tx.global_change_timestamp(),
            request,
        )
    }

    pub fn get_statement(&self, session: &mut Session, id: i64) -> Option<Statement> {
        self.statement_cache.get_statement(
            session,
            &self.catalog,
            self.tx.global_change_timestamp(),
            id,
        )
    }

    // ------------------------------------------------------------------
    // tables and stores

    /// Creates a table with its primary key and backing store. A DDL
    /// operation: both timestamps advance.
    pub fn create_table(
        &mut self,
        schema: &str,
        name: &str,
        kind: TableKind,
        columns: Vec<ColumnDef>,
        primary_key_cols: Vec<usize>,
    ) -> Result<TableId> {
        if self.catalog.find_table(schema, name).is_some() {
            bail!("duplicate object: table '{}.{}'", schema, name);
        }

        let id = self.catalog.next_table_id();
        let persistence_id = self.catalog.next_persistence_id();

        let mut table = Table::new(id, persistence_id, schema, name, kind, columns)?;
        table.create_primary_key(primary_key_cols.clone());

        if !table.is_session_based() {
            let store = self.new_store_for(&table);
            self.stores.insert(persistence_id, store);
        }

        let has_pk = table.has_primary_key();
        self.catalog.add_table(table)?;

        if has_pk {
            self.catalog.add_constraint(
                crate::constraints::ConstraintCore::primary_key(
                    format!("SYS_PK_{}", id),
                    id,
                    primary_key_cols,
                ),
            )?;
        }

        self.bump_ddl_timestamps();

        debug!(table = name, id, "table created");

        Ok(id)
    }

    pub(crate) fn new_store_for(&mut self, table: &Table) -> RowStore {
        let index_count = table.index_count();

        if table.is_file_based() {
            self.next_space_id += 1;
            let space = TableSpaceAllocator::new(
                self.space_manager.clone(),
                self.next_space_id,
                DEFAULT_MAIN_BLOCK_SIZE,
                DEFAULT_SPACE_CAPACITY,
                DEFAULT_FILE_SCALE,
            );

            match table.kind() {
                TableKind::Text => RowStore::text(space, index_count),
                _ => RowStore::cached(space, index_count),
            }
        } else {
            RowStore::memory(index_count)
        }
    }

    /// Resolves the row store for a table: the session's for
    /// session-based tables, the database's otherwise. Associated
    /// function so callers can keep a catalog borrow alive.
    pub(crate) fn resolve_store_mut<'a>(
        stores: &'a mut HashMap<u64, RowStore>,
        session: &'a mut Session,
        table: &Table,
    ) -> Result<&'a mut RowStore> {
        let key = table.persistence_id();

        if table.is_session_based() {
            let index_count = table.index_count();
            return Ok(session.session_store_mut(key, || RowStore::memory(index_count)));
        }

        match stores.get_mut(&key) {
            Some(store) => Ok(store),
            None => bail!("object not found: store for table '{}'", table.name()),
        }
    }

    pub(crate) fn resolve_store<'a>(
        stores: &'a HashMap<u64, RowStore>,
        session: &'a Session,
        table: &Table,
    ) -> Result<&'a RowStore> {
        let key = table.persistence_id();

        if table.is_session_based() {
            return match session.session_store(key) {
                Some(store) => Ok(store),
                None => bail!("object not found: store for table '{}'", table.name()),
            };
        }

        match stores.get(&key) {
            Some(store) => Ok(store),
            None => bail!("object not found: store for table '{}'", table.name()),
        }
    }

    /// Read access to a table's store.
    pub fn store<'a>(&'a self, session: &'a Session, table_id: TableId) -> Result<&'a RowStore> {
        let table = self.catalog.table(table_id)?;
        Self::resolve_store(&self.stores, session, table)
    }

    pub fn row_count(&self, session: &Session, table_id: TableId) -> Result<usize> {
        Ok(self.store(session, table_id)?.row_count())
    }

    pub(crate) fn bump_ddl_timestamps(&mut self) {
        let global = self.tx.advance();
        self.catalog.bump_schema_change_timestamp(global);
    }

    // ------------------------------------------------------------------
    // transaction boundaries

    /// Applies the session's journal: staged inserts settle, staged
    /// deletes leave the indexes and the store. Advances the global
    /// change timestamp.
    pub fn commit(&mut self, session: &mut Session) -> Result<()> {
        let journal = session.take_journal();

        for action in &journal {
            let table = self.catalog.table(action.table)?;
            let store = Self::resolve_store_mut(&mut self.stores, session, table)?;

            match action.kind {
                RowActionKind::Insert => {
                    store.commit(action.row_pos);
                }
                RowActionKind::Delete => {
                    unlink_row(table, store, action.row_pos);
                    store.remove(action.row_pos);
                }
            }
        }

        self.tx.advance();

        Ok(())
    }

    /// Unwinds the session's journal in reverse: staged inserts leave the
    /// indexes and the store, delete marks clear.
    pub fn rollback(&mut self, session: &mut Session) -> Result<()> {
        let journal = session.take_journal();

        for action in journal.iter().rev() {
            let table = self.catalog.table(action.table)?;
            let store = Self::resolve_store_mut(&mut self.stores, session, table)?;

            match action.kind {
                RowActionKind::Insert => {
                    unlink_row(table, store, action.row_pos);
                    store.remove(action.row_pos);
                }
                RowActionKind::Delete => {
                    if let Some(row) = store.row_mut(action.row_pos) {
                        row.set_cascade_deleted(false);
                        row.set_row_action(None);
                    }
                }
            }
        }

        Ok(())
    }

    /// Returns the database to its open state: stores released, catalog
    /// and statement cache cleared, timestamps zeroed.
    pub fn reset(&mut self) {
        for store in self.stores.values_mut() {
            store.release();
        }
        self.stores.clear();
        self.catalog.reset();
        self.statement_cache.reset();
        self.tx.reset();
        self.next_space_id = 0;
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

/// Unlinks a row from every index of its table.
pub(crate) fn unlink_row(table: &Table, store: &mut RowStore, row_pos: i64) {
    for index in table.indexes() {
        let node = store
            .row(row_pos)
            .and_then(|row| row.node(index.position()));

        if let Some(node) = node {
            index.delete(store, node);
        }
    }
}
