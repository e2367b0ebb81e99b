//! # emberdb - Embedded Relational Storage Engine
//!
//! The core storage and execution engine of an embedded relational
//! database: per-table file-space allocation, the table/row engine with
//! multi-index consistency and referential-integrity cascades, and the
//! per-database prepared-statement cache.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │            Database (per-db context)          │
//! │  catalog │ tx timestamps │ statement cache    │
//! ├───────────────────────────────────────────────┤
//! │        DML / DDL orchestration (database)     │
//! ├──────────────────┬────────────────────────────┤
//! │  Schema objects  │     Ordered indexes        │
//! │  tables, columns │     AVL over node arena    │
//! │  triggers, ids   │                            │
//! ├──────────────────┴────────────────────────────┤
//! │       Row stores (memory / cached / text)     │
//! ├───────────────────────────────────────────────┤
//! │  Table-space allocator │ free-block index     │
//! ├───────────────────────────────────────────────┤
//! │        Global space manager (trait seam)      │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! SQL parsing and planning, the client protocol, write-ahead logging and
//! file I/O primitives live outside the engine, behind the
//! [`session::StatementCompiler`], [`database::StatementLogger`] and
//! [`storage::DataSpaceManager`] seams.
//!
//! ## Module Overview
//!
//! - [`storage`]: free-block index, table-space allocator, row stores
//! - [`index`]: balanced multi-column ordered index
//! - [`schema`]: tables, columns, triggers, identity sequences, catalog
//! - [`constraints`]: constraint cores and referential actions
//! - [`database`]: per-database context, DML/DDL, statement cache
//! - [`session`]: session surface, journal, compiler seam

pub mod config;
pub mod constraints;
pub mod database;
pub mod index;
pub mod rows;
pub mod schema;
pub mod session;
pub mod storage;
pub mod types;

pub use database::{Database, Statement, StatementCache, StatementRequest, StatementType};
pub use schema::{Catalog, ColumnDef, Table, TableId, TableKind};
pub use session::Session;
pub use types::{DataType, Value};
