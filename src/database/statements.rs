//! # Statement Cache
//!
//! Per-database registry of compiled statements. A statement is interned
//! by (schema, SQL text); sessions share the compiled object through its
//! id. DDL invalidates by timestamp: a statement compiled before the
//! catalog's schema change timestamp is stale, and the next use recompiles
//! it from the retained SQL text under the statement's original schema.
//!
//! ## Ownership Model
//!
//! The cache does not reference-count sessions. A statement stays
//! resident until either a schema change invalidates it (and a subsequent
//! use frees it on recompile failure) or the cache is reset. That trades
//! a small residency cost for never leaking statements when a session
//! dies without cleaning up.
//!
//! ## State Invariant
//!
//! `id_to_sql` and `id_to_statement` always hold identical key sets, and
//! `by_schema[s][sql] = id` implies `id_to_sql[id] = sql` with the
//! statement's schema equal to `s`.
//!
//! ## Concurrency
//!
//! Every public method is mutually exclusive on the instance: one
//! `parking_lot::Mutex` wraps the whole state and stays held across the
//! compile callback, exactly like the original's method-level
//! synchronization.

use eyre::Result;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::schema::Catalog;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    Query,
    Insert,
    Update,
    Delete,
    Ddl,
}

/// Metadata for RETURNING / generated-key result sets, attached by the
/// client request rather than the SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedColumnInfo {
    pub generated_kind: u8,
    pub column_names: Vec<String>,
}

/// A compiled statement. The executable plan lives behind the compiler
/// seam; the engine tracks identity, schema, and compile-time validity.
#[derive(Debug, Clone)]
pub struct Statement {
    id: i64,
    sql: String,
    schema: String,
    statement_type: StatementType,
    compile_timestamp: u64,
    result_properties: u8,
    generated_column_info: Option<GeneratedColumnInfo>,
    valid: bool,
}

impl Statement {
    pub fn new(
        sql: impl Into<String>,
        schema: impl Into<String>,
        statement_type: StatementType,
        result_properties: u8,
    ) -> Self {
        Self {
            id: -1,
            sql: sql.into(),
            schema: schema.into(),
            statement_type,
            compile_timestamp: 0,
            result_properties,
            generated_column_info: None,
            valid: true,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn statement_type(&self) -> StatementType {
        self.statement_type
    }

    pub fn compile_timestamp(&self) -> u64 {
        self.compile_timestamp
    }

    pub(crate) fn set_compile_timestamp(&mut self, timestamp: u64) {
        self.compile_timestamp = timestamp;
    }

    pub fn result_properties(&self) -> u8 {
        self.result_properties
    }

    pub fn generated_column_info(&self) -> Option<&GeneratedColumnInfo> {
        self.generated_column_info.as_ref()
    }

    pub fn set_generated_column_info(&mut self, info: Option<GeneratedColumnInfo>) {
        self.generated_column_info = info;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

/// A client prepare request: the SQL plus execution properties and any
/// generated-column metadata to attach.
#[derive(Debug, Clone)]
pub struct StatementRequest {
    pub sql: String,
    pub execute_properties: u8,
    pub generated_column_info: Option<GeneratedColumnInfo>,
}

impl StatementRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            execute_properties: 0,
            generated_column_info: None,
        }
    }
}

#[derive(Default)]
struct CacheState {
    /// schema name -> (sql -> statement id)
    by_schema: HashMap<String, HashMap<String, i64>>,
    /// statement id -> original sql, kept for recompilation
    id_to_sql: HashMap<i64, String>,
    /// statement id -> current compiled statement
    id_to_statement: HashMap<i64, Statement>,
    next_id: i64,
}

impl CacheState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn statement_id(&self, schema: &str, sql: &str) -> i64 {
        self.by_schema
            .get(schema)
            .and_then(|sql_map| sql_map.get(sql))
            .copied()
            .unwrap_or(-1)
    }

    fn register_statement(&mut self, id: i64, mut statement: Statement, timestamp: u64) -> i64 {
        let id = if id < 0 {
            let id = self.next_id();

            self.by_schema
                .entry(statement.schema().to_string())
                .or_default()
                .insert(statement.sql().to_string(), id);
            self.id_to_sql.insert(id, statement.sql().to_string());

            id
        } else {
            id
        };

        statement.set_id(id);
        statement.set_compile_timestamp(timestamp);
        self.id_to_statement.insert(id, statement);

        id
    }

    fn free_statement(&mut self, id: i64) {
        if id == -1 {
            // statement was never added
            return;
        }

        if let Some(statement) = self.id_to_statement.remove(&id) {
            let sql = self.id_to_sql.remove(&id);

            if let (Some(sql), Some(sql_map)) =
                (sql, self.by_schema.get_mut(statement.schema()))
            {
                sql_map.remove(&sql);
            }
        }
    }
}

pub struct StatementCache {
    state: Mutex<CacheState>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Number of resident statements.
    pub fn len(&self) -> usize {
        self.state.lock().id_to_statement.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: i64) -> bool {
        self.state.lock().id_to_statement.contains_key(&id)
    }

    /// Compiles a request, reusing the resident statement when it is
    /// still valid against the schema change timestamp.
    pub fn compile(
        &self,
        session: &mut Session,
        catalog: &Catalog,
        global_change_timestamp: u64,
        request: &StatementRequest,
    ) -> Result<Statement> {
        let mut state = self.state.lock();

        let mut id = state.statement_id(session.current_schema(), &request.sql);
        let resident = state.id_to_statement.get(&id);

        let reusable = resident
            .map(|s| s.is_valid() && s.compile_timestamp() >= catalog.schema_change_timestamp())
            .unwrap_or(false);

        if !reusable {
            let compiled =
                session.compile_statement(catalog, &request.sql, request.execute_properties)?;

            id = state.register_statement(id, compiled, global_change_timestamp);
        }

        let statement = state
            .id_to_statement
            .get_mut(&id)
            .unwrap_or_else(|| panic!("internal invariant: registered statement {} missing", id));

        statement.set_generated_column_info(request.generated_column_info.clone());

        Ok(statement.clone())
    }

    /// Fetches a statement by id, recompiling a stale one under its
    /// original schema. Returns None for an unknown id or when
    /// recompilation fails — in which case the entry is freed and the
    /// caller observes an unknown id from then on. The session's schema
    /// is always restored.
    pub fn get_statement(
        &self,
        session: &mut Session,
        catalog: &Catalog,
        global_change_timestamp: u64,
        id: i64,
    ) -> Option<Statement> {
        let mut state = self.state.lock();

        let statement = state.id_to_statement.get(&id)?;

        if statement.compile_timestamp() >= catalog.schema_change_timestamp() {
            return Some(statement.clone());
        }

        // stale: revalidate with the original schema
        let sql = state.id_to_sql.get(&id)?.clone();
        let schema = statement.schema().to_string();
        let properties = statement.result_properties();
        let generated = statement.generated_column_info().cloned();
        let old_schema = session.current_schema().to_string();

        debug!(id, schema = %schema, "recompiling stale statement");

        session.set_schema(schema);
        let recompiled = session.compile_statement(catalog, &sql, properties);
        session.set_schema(old_schema);

        match recompiled {
            Ok(mut statement) => {
                statement.set_id(id);
                statement.set_compile_timestamp(global_change_timestamp);
                statement.set_generated_column_info(generated);

                state.id_to_statement.insert(id, statement.clone());

                Some(statement)
            }
            Err(_) => {
                debug!(id, "recompilation failed, statement freed");
                state.free_statement(id);
                None
            }
        }
    }

    pub fn free_statement(&self, id: i64) {
        self.state.lock().free_statement(id);
    }

    /// Clears all state and restarts the id sequence.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.by_schema.clear();
        state.id_to_sql.clear();
        state.id_to_statement.clear();
        state.next_id = 0;
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new()
    }
}
