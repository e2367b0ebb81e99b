//! # Row Lifecycle Test Suite
//!
//! End-to-end coverage of the table engine: insert with multi-index
//! installation and rollback, identity sequences, staged deletes across
//! commit and rollback, trigger firing, and the delete-then-insert
//! update path.

use emberdb::schema::Catalog;
use emberdb::session::StatementCompiler;
use emberdb::{ColumnDef, Database, DataType, Statement, StatementType, TableKind, Value};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn stub_compiler() -> Box<dyn StatementCompiler> {
    Box::new(
        |_catalog: &Catalog, schema: &str, sql: &str, props: u8| -> eyre::Result<Statement> {
            Ok(Statement::new(sql, schema, StatementType::Query, props))
        },
    )
}

fn accounts_table(db: &mut Database) -> emberdb::TableId {
    db.create_table(
        "PUBLIC",
        "accounts",
        TableKind::Memory,
        vec![
            ColumnDef::new("id", DataType::BigInt).not_null(),
            ColumnDef::new("code", DataType::BigInt),
            ColumnDef::new("name", DataType::Varchar).with_max_length(20),
        ],
        vec![0],
    )
    .expect("create accounts table")
}

// ============================================================================
// INSERT AND UNIQUE ROLLBACK
// ============================================================================

#[test]
fn insert_links_row_into_every_index() {
    let mut db = Database::new();
    let mut session = db.create_session(stub_compiler());
    let tid = accounts_table(&mut db);

    db.add_index(&mut session, tid, "idx_code", vec![1], false)
        .unwrap();

    db.insert_row(
        &mut session,
        tid,
        vec![Value::Int(1), Value::Int(10), Value::Text("a".into())],
    )
    .unwrap();

    let store = db.store(&session, tid).unwrap();
    // one node per index
    assert_eq!(store.arena().len(), 2);

    let pos = store.row_positions()[0];
    let row = store.row(pos).unwrap();
    assert!(row.node(0).is_some());
    assert!(row.node(1).is_some());
}

#[test]
fn unique_violation_rolls_back_partial_index_installation() {
    let mut db = Database::new();
    let mut session = db.create_session(stub_compiler());
    let tid = accounts_table(&mut db);

    db.add_index(&mut session, tid, "idx_code", vec![1], false)
        .unwrap();

    db.insert_row(
        &mut session,
        tid,
        vec![Value::Int(1), Value::Int(10), Value::Text("a".into())],
    )
    .unwrap();

    let result = db.insert_row(
        &mut session,
        tid,
        vec![Value::Int(1), Value::Int(20), Value::Text("b".into())],
    );

    assert!(result.is_err());
    let message = result.unwrap_err().to_string();
    assert!(message.contains("UNIQUE constraint violated"));

    let store = db.store(&session, tid).unwrap();
    assert_eq!(store.row_count(), 1);

    // the secondary index still has exactly one node
    let table = db.catalog().table(tid).unwrap();
    let mut cursor = table.indexes()[1].first_row_cursor(store);
    let mut count = 0;
    while cursor.next(store).is_some() {
        count += 1;
    }
    assert_eq!(count, 1);
}

#[test]
fn unique_index_admits_null_keys() {
    let mut db = Database::new();
    let mut session = db.create_session(stub_compiler());
    let tid = accounts_table(&mut db);

    db.add_index(&mut session, tid, "idx_code", vec![1], true)
        .unwrap();

    db.insert_row(
        &mut session,
        tid,
        vec![Value::Int(1), Value::Null, Value::Text("a".into())],
    )
    .unwrap();
    db.insert_row(
        &mut session,
        tid,
        vec![Value::Int(2), Value::Null, Value::Text("b".into())],
    )
    .unwrap();

    assert_eq!(db.row_count(&session, tid).unwrap(), 2);
}

#[test]
fn range_scan_starts_at_first_greater_equal_key() {
    let mut db = Database::new();
    let mut session = db.create_session(stub_compiler());
    let tid = accounts_table(&mut db);

    db.add_index(&mut session, tid, "idx_code", vec![1], false)
        .unwrap();

    for (id, code) in [(1, 10), (2, 30), (3, 20), (4, 40)] {
        db.insert_row(
            &mut session,
            tid,
            vec![Value::Int(id), Value::Int(code), Value::Text("r".into())],
        )
        .unwrap();
    }

    let store = db.store(&session, tid).unwrap();
    let table = db.catalog().table(tid).unwrap();
    let index = &table.indexes()[1];

    let mut cursor = index.find_first_greater_equal(store, &[Value::Int(25)]);
    let mut codes = Vec::new();
    while let Some(pos) = cursor.next(store) {
        codes.push(store.row_data(pos)[1].clone());
    }

    assert_eq!(codes, vec![Value::Int(30), Value::Int(40)]);
}

// ============================================================================
// CONSTRAINT CHECKS
// ============================================================================

#[test]
fn not_null_violation_names_column_and_table() {
    let mut db = Database::new();
    let mut session = db.create_session(stub_compiler());
    let tid = accounts_table(&mut db);

    let result = db.insert_row(
        &mut session,
        tid,
        vec![Value::Null, Value::Int(1), Value::Text("a".into())],
    );

    assert!(result.is_err());
    let message = result.unwrap_err().to_string();
    assert!(message.contains("NOT NULL constraint violated"));
    assert!(message.contains("id"));
    assert!(message.contains("accounts"));
}

#[test]
fn varchar_limit_is_enforced_on_insert() {
    let mut db = Database::new();
    let mut session = db.create_session(stub_compiler());
    let tid = accounts_table(&mut db);

    let long_name = "x".repeat(50);
    let result = db.insert_row(
        &mut session,
        tid,
        vec![Value::Int(1), Value::Int(1), Value::Text(long_name)],
    );

    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("exceeds maximum length"));
}

#[test]
fn check_constraint_rejects_failing_rows() {
    let mut db = Database::new();
    let mut session = db.create_session(stub_compiler());
    let tid = accounts_table(&mut db);

    db.add_check_constraint(
        &mut session,
        tid,
        "ck_code_positive",
        std::sync::Arc::new(|data: &[Value]| {
            data[1].as_int().map(|code| code >= 0).unwrap_or(true)
        }),
    )
    .unwrap();

    let result = db.insert_row(
        &mut session,
        tid,
        vec![Value::Int(1), Value::Int(-5), Value::Text("a".into())],
    );

    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("CHECK constraint violated"));
}

#[test]
fn read_only_table_refuses_writes() {
    let mut db = Database::new();
    let mut session = db.create_session(stub_compiler());
    let tid = accounts_table(&mut db);

    db.set_table_read_only(tid, true).unwrap();

    let result = db.insert_row(
        &mut session,
        tid,
        vec![Value::Int(1), Value::Int(1), Value::Text("a".into())],
    );

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("read only"));
}

// ============================================================================
// IDENTITY SEQUENCE
// ============================================================================

#[test]
fn identity_generates_and_observes_user_values() {
    let mut db = Database::new();
    let mut session = db.create_session(stub_compiler());

    let tid = db
        .create_table(
            "PUBLIC",
            "events",
            TableKind::Memory,
            vec![
                ColumnDef::new("id", DataType::BigInt).identity(),
                ColumnDef::new("label", DataType::Text),
            ],
            vec![0],
        )
        .unwrap();

    db.insert_row(&mut session, tid, vec![Value::Null, Value::Text("a".into())])
        .unwrap();
    assert_eq!(session.last_identity(), Some(&Value::Int(1)));

    db.insert_row(&mut session, tid, vec![Value::Int(10), Value::Text("b".into())])
        .unwrap();
    assert_eq!(session.last_identity(), Some(&Value::Int(10)));

    db.insert_row(&mut session, tid, vec![Value::Null, Value::Text("c".into())])
        .unwrap();
    assert_eq!(session.last_identity(), Some(&Value::Int(11)));
}

#[test]
fn identity_peek_is_monotonic_across_inserts() {
    let mut db = Database::new();
    let mut session = db.create_session(stub_compiler());

    let tid = db
        .create_table(
            "PUBLIC",
            "events",
            TableKind::Memory,
            vec![
                ColumnDef::new("id", DataType::BigInt).identity(),
                ColumnDef::new("label", DataType::Text),
            ],
            vec![0],
        )
        .unwrap();

    let mut last = 0;
    for user_value in [None, Some(7), None, Some(3), None] {
        let before = db.catalog().table(tid).unwrap().peek_identity().unwrap();
        assert!(before >= last);

        let id_value = user_value.map(Value::Int).unwrap_or(Value::Null);
        db.insert_row(&mut session, tid, vec![id_value, Value::Null])
            .unwrap();

        let after = db.catalog().table(tid).unwrap().peek_identity().unwrap();
        assert!(after >= before);
        last = after;
    }
}

// ============================================================================
// DELETE, COMMIT, ROLLBACK
// ============================================================================

#[test]
fn staged_delete_keeps_row_indexed_until_commit() {
    let mut db = Database::new();
    let mut session = db.create_session(stub_compiler());
    let tid = accounts_table(&mut db);

    let pos = db
        .insert_row(
            &mut session,
            tid,
            vec![Value::Int(1), Value::Int(1), Value::Text("a".into())],
        )
        .unwrap();
    db.commit(&mut session).unwrap();

    db.delete_row(&mut session, tid, pos).unwrap();

    // still present until the transaction commits
    assert_eq!(db.row_count(&session, tid).unwrap(), 1);
    assert!(db
        .store(&session, tid)
        .unwrap()
        .row(pos)
        .unwrap()
        .is_cascade_deleted());

    db.commit(&mut session).unwrap();
    assert_eq!(db.row_count(&session, tid).unwrap(), 0);
}

#[test]
fn double_delete_is_idempotent() {
    let mut db = Database::new();
    let mut session = db.create_session(stub_compiler());
    let tid = accounts_table(&mut db);

    let pos = db
        .insert_row(
            &mut session,
            tid,
            vec![Value::Int(1), Value::Int(1), Value::Text("a".into())],
        )
        .unwrap();
    db.commit(&mut session).unwrap();

    db.delete_row(&mut session, tid, pos).unwrap();
    db.delete_no_check(&mut session, tid, pos).unwrap();

    // one journal entry only
    assert_eq!(session.journal().len(), 1);

    db.commit(&mut session).unwrap();
    assert_eq!(db.row_count(&session, tid).unwrap(), 0);
}

#[test]
fn rollback_unwinds_inserts_and_revives_deletes() {
    let mut db = Database::new();
    let mut session = db.create_session(stub_compiler());
    let tid = accounts_table(&mut db);

    let kept = db
        .insert_row(
            &mut session,
            tid,
            vec![Value::Int(1), Value::Int(1), Value::Text("a".into())],
        )
        .unwrap();
    db.commit(&mut session).unwrap();

    db.delete_row(&mut session, tid, kept).unwrap();
    db.insert_row(
        &mut session,
        tid,
        vec![Value::Int(2), Value::Int(2), Value::Text("b".into())],
    )
    .unwrap();

    db.rollback(&mut session).unwrap();

    let store = db.store(&session, tid).unwrap();
    assert_eq!(store.row_count(), 1);
    assert!(!store.row(kept).unwrap().is_cascade_deleted());
}

#[test]
fn insert_then_delete_restores_row_count_and_roots() {
    let mut db = Database::new();
    let mut session = db.create_session(stub_compiler());

    let tid = db
        .create_table(
            "PUBLIC",
            "persisted",
            TableKind::Cached,
            vec![
                ColumnDef::new("id", DataType::BigInt).not_null(),
                ColumnDef::new("payload", DataType::Text),
            ],
            vec![0],
        )
        .unwrap();

    let before_count = db.row_count(&session, tid).unwrap();
    let before_roots = db.store(&session, tid).unwrap().get_index_roots_string();
    assert_eq!(before_roots, "-1");

    let pos = db
        .insert_row(
            &mut session,
            tid,
            vec![Value::Int(1), Value::Text("payload".into())],
        )
        .unwrap();
    db.delete_row(&mut session, tid, pos).unwrap();
    db.commit(&mut session).unwrap();

    assert_eq!(db.row_count(&session, tid).unwrap(), before_count);
    assert_eq!(
        db.store(&session, tid).unwrap().get_index_roots_string(),
        before_roots
    );
}

// ============================================================================
// UPDATE
// ============================================================================

#[test]
fn update_swaps_unique_keys_within_one_statement() {
    let mut db = Database::new();
    let mut session = db.create_session(stub_compiler());
    let tid = accounts_table(&mut db);

    db.add_unique_constraint(&mut session, tid, "uq_code", vec![1])
        .unwrap();

    let a = db
        .insert_row(
            &mut session,
            tid,
            vec![Value::Int(1), Value::Int(10), Value::Text("a".into())],
        )
        .unwrap();
    let b = db
        .insert_row(
            &mut session,
            tid,
            vec![Value::Int(2), Value::Int(20), Value::Text("b".into())],
        )
        .unwrap();
    db.commit(&mut session).unwrap();

    // swap the unique codes of both rows in a single update set
    let count = db
        .update_row_set(
            &mut session,
            tid,
            vec![
                (a, vec![Value::Int(1), Value::Int(20), Value::Text("a".into())]),
                (b, vec![Value::Int(2), Value::Int(10), Value::Text("b".into())]),
            ],
            Some(&[1]),
            false,
        )
        .unwrap();
    db.commit(&mut session).unwrap();

    assert_eq!(count, 2);
    assert_eq!(db.row_count(&session, tid).unwrap(), 2);
}

#[test]
fn update_refuses_row_claimed_by_cascade() {
    let mut db = Database::new();
    let mut session = db.create_session(stub_compiler());
    let tid = accounts_table(&mut db);

    let pos = db
        .insert_row(
            &mut session,
            tid,
            vec![Value::Int(1), Value::Int(1), Value::Text("a".into())],
        )
        .unwrap();
    db.commit(&mut session).unwrap();

    db.delete_row(&mut session, tid, pos).unwrap();

    let result = db.update_row_set(
        &mut session,
        tid,
        vec![(pos, vec![Value::Int(1), Value::Int(2), Value::Text("a".into())])],
        Some(&[1]),
        false,
    );

    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("triggered data change violation"));
}

// ============================================================================
// LOG REPLAY
// ============================================================================

#[test]
fn replay_insert_advances_identity_past_persisted_values() {
    let mut db = Database::new();
    let mut session = db.create_session(stub_compiler());

    let tid = db
        .create_table(
            "PUBLIC",
            "events",
            TableKind::Memory,
            vec![
                ColumnDef::new("id", DataType::BigInt).identity(),
                ColumnDef::new("label", DataType::Text),
            ],
            vec![0],
        )
        .unwrap();

    db.insert_no_check_from_log(
        &mut session,
        tid,
        vec![Value::Int(42), Value::Text("replayed".into())],
    )
    .unwrap();
    db.commit(&mut session).unwrap();

    assert_eq!(db.catalog().table(tid).unwrap().peek_identity(), Some(43));
}

#[test]
fn replay_delete_locates_row_by_primary_key() {
    let mut db = Database::new();
    let mut session = db.create_session(stub_compiler());
    let tid = accounts_table(&mut db);

    db.insert_row(
        &mut session,
        tid,
        vec![Value::Int(1), Value::Int(10), Value::Text("a".into())],
    )
    .unwrap();
    db.insert_row(
        &mut session,
        tid,
        vec![Value::Int(2), Value::Int(20), Value::Text("b".into())],
    )
    .unwrap();
    db.commit(&mut session).unwrap();

    db.delete_no_check_from_log(
        &mut session,
        tid,
        &[Value::Int(1), Value::Int(10), Value::Text("a".into())],
    )
    .unwrap();
    db.commit(&mut session).unwrap();

    assert_eq!(db.row_count(&session, tid).unwrap(), 1);
}

#[test]
fn replay_delete_of_missing_row_is_noop() {
    let mut db = Database::new();
    let mut session = db.create_session(stub_compiler());
    let tid = accounts_table(&mut db);

    db.delete_no_check_from_log(
        &mut session,
        tid,
        &[Value::Int(9), Value::Int(9), Value::Text("x".into())],
    )
    .unwrap();

    assert!(session.journal().is_empty());
}
