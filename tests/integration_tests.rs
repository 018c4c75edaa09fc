//! End-to-end scenarios: SQL queries over stored tables, transactions,
//! durability and crash recovery.

use stratadb::{
    ColumnDefinition, ColumnType, Database, DbConfig, DbError, QueryOutcome, Record,
    SharedDatabase, TableSchema,
};

fn config(root: &std::path::Path) -> DbConfig {
    DbConfig::new(512, 64 * 1024, 1 << 20, root)
}

fn users_schema() -> TableSchema {
    TableSchema::new(
        "users",
        vec![
            ColumnDefinition::new("id", ColumnType::Integer, 16),
            ColumnDefinition::new("name", ColumnType::String, 64),
            ColumnDefinition::new("age", ColumnType::Integer, 8),
        ],
    )
    .unwrap()
}

fn open_users_db(root: &std::path::Path) -> SharedDatabase {
    let db = SharedDatabase::open(config(root)).unwrap();
    db.register_table(users_schema()).unwrap();
    for (id, name, age) in [
        (1, "Alice", 30),
        (2, "Bob", 42),
        (3, "Carol", 28),
        (4, "Dave", 55),
    ] {
        db.insert_record(
            "users",
            Record::new(vec![id.to_string(), name.to_string(), age.to_string()]),
        )
        .unwrap();
    }
    db
}

fn rows_of(db: &SharedDatabase, sql: &str) -> Vec<Vec<String>> {
    db.query(sql).unwrap().rows()
}

#[test]
fn distinct_with_descending_order() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_users_db(dir.path());
    // A duplicate age to make DISTINCT meaningful.
    db.insert_record(
        "users",
        Record::new(vec!["5".into(), "Erin".into(), "42".into()]),
    )
    .unwrap();

    let rows = rows_of(&db, "SELECT DISTINCT age FROM users ORDER BY age DESC");
    assert_eq!(
        rows,
        vec![
            vec!["55".to_string()],
            vec!["42".to_string()],
            vec!["30".to_string()],
            vec!["28".to_string()],
        ]
    );
}

#[test]
fn inner_join_orders_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_users_db(dir.path());
    db.register_table(
        TableSchema::new(
            "orders",
            vec![
                ColumnDefinition::new("id", ColumnType::Integer, 16),
                ColumnDefinition::new("user_id", ColumnType::Integer, 16),
                ColumnDefinition::new("amount", ColumnType::Integer, 16),
            ],
        )
        .unwrap(),
    )
    .unwrap();
    for (id, user_id, amount) in [(100, 1, 200), (101, 2, 300), (102, 3, 150), (103, 4, 500)] {
        db.insert_record(
            "orders",
            Record::new(vec![
                id.to_string(),
                user_id.to_string(),
                amount.to_string(),
            ]),
        )
        .unwrap();
    }

    let rows = rows_of(
        &db,
        "SELECT users.name, orders.amount FROM users JOIN orders ON users.id = orders.user_id ORDER BY users.name",
    );
    assert_eq!(
        rows,
        vec![
            vec!["Alice".to_string(), "200".to_string()],
            vec!["Bob".to_string(), "300".to_string()],
            vec!["Carol".to_string(), "150".to_string()],
            vec!["Dave".to_string(), "500".to_string()],
        ]
    );
}

#[test]
fn aggregate_group_by_having() {
    let dir = tempfile::tempdir().unwrap();
    let db = SharedDatabase::open(config(dir.path())).unwrap();
    db.register_table(
        TableSchema::new(
            "sales",
            vec![
                ColumnDefinition::new("region", ColumnType::String, 16),
                ColumnDefinition::new("amount", ColumnType::Integer, 8),
            ],
        )
        .unwrap(),
    )
    .unwrap();
    for (region, amount) in [
        ("north", 10),
        ("north", 15),
        ("south", 20),
        ("south", 5),
        ("south", 8),
    ] {
        db.insert_record(
            "sales",
            Record::new(vec![region.to_string(), amount.to_string()]),
        )
        .unwrap();
    }

    let rows = rows_of(
        &db,
        "SELECT region, COUNT(*) AS cnt, SUM(amount) AS total FROM sales GROUP BY region HAVING cnt > 2",
    );
    assert_eq!(
        rows,
        vec![vec![
            "south".to_string(),
            "3".to_string(),
            "33".to_string()
        ]]
    );
}

#[test]
fn explicit_transaction_rollback_restores_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_users_db(dir.path());
    db.create_index("idx_users_id", "users", "id").unwrap();
    let baseline = db.dump_table("users", 0, 0).unwrap().total_records;

    db.begin_transaction().unwrap();
    db.insert_record(
        "users",
        Record::new(vec!["99".into(), "Temp".into(), "99".into()]),
    )
    .unwrap();
    let ptr = db.search_index("idx_users_id", "1").unwrap().unwrap();
    assert!(db.write().delete_record(&ptr.address, ptr.slot).unwrap());
    let ptr2 = db.search_index("idx_users_id", "2").unwrap().unwrap();
    assert!(db
        .write()
        .update_record(
            &ptr2.address,
            ptr2.slot,
            Record::new(vec!["2".into(), "Bobby".into(), "43".into()]),
        )
        .unwrap());
    db.rollback_transaction().unwrap();

    let dump = db.dump_table("users", 0, 0).unwrap();
    assert_eq!(dump.total_records, baseline);
    let ids: Vec<String> = dump.rows.iter().map(|r| r.values[0].clone()).collect();
    assert!(ids.contains(&"1".to_string()));
    assert!(!ids.contains(&"99".to_string()));
    let bob = dump
        .rows
        .iter()
        .find(|r| r.values[0] == "2")
        .expect("id=2 present");
    assert_eq!(bob.values[1], "Bob");
    // The unique view through the index is also back to the baseline.
    assert!(db.search_index("idx_users_id", "99").unwrap().is_none());
    assert!(db.search_index("idx_users_id", "1").unwrap().is_some());
}

#[test]
fn index_rebuild_after_lost_tree_file() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = SharedDatabase::open(config(dir.path())).unwrap();
        db.register_table(
            TableSchema::new(
                "people",
                vec![
                    ColumnDefinition::new("id", ColumnType::Integer, 16),
                    ColumnDefinition::new("name", ColumnType::String, 32),
                ],
            )
            .unwrap(),
        )
        .unwrap();
        for (id, name) in [(1, "Alice"), (2, "Bob"), (3, "Carol")] {
            db.insert_record(
                "people",
                Record::new(vec![id.to_string(), name.to_string()]),
            )
            .unwrap();
        }
        db.create_index("idx", "people", "id").unwrap();
        db.flush_all().unwrap();
    }
    // Simulated crash damage: the index data file disappears.
    std::fs::remove_file(dir.path().join("indexes/idx.tree")).unwrap();

    let db = SharedDatabase::open(config(dir.path())).unwrap();
    db.register_table(
        TableSchema::new(
            "people",
            vec![
                ColumnDefinition::new("id", ColumnType::Integer, 16),
                ColumnDefinition::new("name", ColumnType::String, 32),
            ],
        )
        .unwrap(),
    )
    .unwrap();
    let ptr = db.search_index("idx", "2").unwrap().expect("rebuilt index");
    let record = db.write().read_record(&ptr.address, ptr.slot).unwrap().unwrap();
    assert_eq!(record.values[0], "2");
}

#[test]
fn outer_joins_pad_with_null() {
    let dir = tempfile::tempdir().unwrap();
    let db = SharedDatabase::open(config(dir.path())).unwrap();
    db.register_table(
        TableSchema::new(
            "users",
            vec![
                ColumnDefinition::new("id", ColumnType::Integer, 16),
                ColumnDefinition::new("name", ColumnType::String, 32),
            ],
        )
        .unwrap(),
    )
    .unwrap();
    db.register_table(
        TableSchema::new(
            "purchases",
            vec![
                ColumnDefinition::new("user_id", ColumnType::Integer, 16),
                ColumnDefinition::new("amount", ColumnType::Integer, 16),
            ],
        )
        .unwrap(),
    )
    .unwrap();
    for (id, name) in [(1, "Alice"), (2, "Bob"), (3, "Carol")] {
        db.insert_record("users", Record::new(vec![id.to_string(), name.to_string()]))
            .unwrap();
    }
    for (user_id, amount) in [(1, 100), (2, 200), (4, 400)] {
        db.insert_record(
            "purchases",
            Record::new(vec![user_id.to_string(), amount.to_string()]),
        )
        .unwrap();
    }

    let rows = rows_of(
        &db,
        "SELECT users.id, purchases.amount FROM users LEFT JOIN purchases ON users.id = purchases.user_id ORDER BY users.id",
    );
    assert_eq!(
        rows,
        vec![
            vec!["1".to_string(), "100".to_string()],
            vec!["2".to_string(), "200".to_string()],
            vec!["3".to_string(), "NULL".to_string()],
        ]
    );

    let rows = rows_of(
        &db,
        "SELECT purchases.user_id, users.name FROM users RIGHT JOIN purchases ON users.id = purchases.user_id ORDER BY purchases.user_id",
    );
    assert_eq!(
        rows,
        vec![
            vec!["1".to_string(), "Alice".to_string()],
            vec!["2".to_string(), "Bob".to_string()],
            vec!["4".to_string(), "NULL".to_string()],
        ]
    );
}

#[test]
fn sql_mutations_report_affected_rows() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_users_db(dir.path());

    match db.execute_sql("INSERT INTO users VALUES (7, 'Grace', 33)").unwrap() {
        QueryOutcome::Affected(n) => assert_eq!(n, 1),
        other => panic!("unexpected outcome {:?}", other),
    }
    match db
        .execute_sql("UPDATE users SET age = age + 1 WHERE age < 40")
        .unwrap()
    {
        // Alice(30), Carol(28), Grace(33).
        QueryOutcome::Affected(n) => assert_eq!(n, 3),
        other => panic!("unexpected outcome {:?}", other),
    }
    match db.execute_sql("DELETE FROM users WHERE name = 'Grace'").unwrap() {
        QueryOutcome::Affected(n) => assert_eq!(n, 1),
        other => panic!("unexpected outcome {:?}", other),
    }
    let rows = rows_of(&db, "SELECT name FROM users WHERE age = 31");
    assert_eq!(rows, vec![vec!["Alice".to_string()]]);
}

#[test]
fn where_equality_uses_index_scan() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_users_db(dir.path());
    db.create_index("idx_users_id", "users", "id").unwrap();

    let rows = rows_of(&db, "SELECT name FROM users WHERE id = 3");
    assert_eq!(rows, vec![vec!["Carol".to_string()]]);
    // The recorded plan for the query carries the cheap index-scan cost.
    let plans = db.read().cached_access_plans(1);
    assert!(
        plans[0].contains("[cost=1"),
        "expected an index-backed plan, got {:?}",
        plans
    );
}

#[test]
fn cross_product_with_where_equals_explicit_join() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_users_db(dir.path());
    db.register_table(
        TableSchema::new(
            "orders",
            vec![
                ColumnDefinition::new("id", ColumnType::Integer, 16),
                ColumnDefinition::new("user_id", ColumnType::Integer, 16),
                ColumnDefinition::new("amount", ColumnType::Integer, 16),
            ],
        )
        .unwrap(),
    )
    .unwrap();
    for (id, user_id, amount) in [(100, 1, 200), (101, 2, 300)] {
        db.insert_record(
            "orders",
            Record::new(vec![
                id.to_string(),
                user_id.to_string(),
                amount.to_string(),
            ]),
        )
        .unwrap();
    }

    let mut implicit = rows_of(
        &db,
        "SELECT users.name, orders.amount FROM users, orders WHERE users.id = orders.user_id",
    );
    let mut explicit = rows_of(
        &db,
        "SELECT users.name, orders.amount FROM users JOIN orders ON users.id = orders.user_id",
    );
    implicit.sort();
    explicit.sort();
    assert_eq!(implicit, explicit);
    assert_eq!(implicit.len(), 2);
}

#[test]
fn data_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = open_users_db(dir.path());
        db.flush_all().unwrap();
    }
    let mut db = Database::open(config(dir.path())).unwrap();
    let restored = db.bootstrap_schemas().unwrap();
    assert_eq!(restored, vec!["users".to_string()]);
    let dump = db.dump_table("users", 0, 0).unwrap();
    assert_eq!(dump.total_records, 4);
    let mut names: Vec<String> = dump.rows.iter().map(|r| r.values[1].clone()).collect();
    names.sort();
    assert_eq!(names, vec!["Alice", "Bob", "Carol", "Dave"]);
}

#[test]
fn single_frame_buffer_still_durable() {
    let dir = tempfile::tempdir().unwrap();
    // Memory sized so the data-buffer partition holds exactly one frame.
    let cfg = DbConfig::new(512, 1280, 1 << 20, dir.path());
    {
        let db = SharedDatabase::open(cfg.clone()).unwrap();
        assert_eq!(db.read().buffer_capacity(), 1);
        db.register_table(
            TableSchema::new(
                "kv",
                vec![
                    ColumnDefinition::new("k", ColumnType::String, 32),
                    ColumnDefinition::new("v", ColumnType::String, 32),
                ],
            )
            .unwrap(),
        )
        .unwrap();
        for i in 0..20 {
            db.insert_record(
                "kv",
                Record::new(vec![format!("key-{i:02}"), format!("val-{i:02}")]),
            )
            .unwrap();
        }
        db.flush_all().unwrap();
    }
    let mut db = Database::open(cfg).unwrap();
    db.bootstrap_schemas().unwrap();
    let dump = db.dump_table("kv", 0, 0).unwrap();
    assert_eq!(dump.total_records, 20);
}

#[test]
fn oversized_record_is_rejected_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let db = SharedDatabase::open(config(dir.path())).unwrap();
    db.register_table(
        TableSchema::new(
            "blobs",
            vec![ColumnDefinition::new("data", ColumnType::String, 4096)],
        )
        .unwrap(),
    )
    .unwrap();
    let huge = "x".repeat(600);
    let err = db
        .insert_record("blobs", Record::new(vec![huge]))
        .unwrap_err();
    assert!(matches!(err, DbError::CapacityExceeded(_)));
    assert_eq!(db.dump_table("blobs", 0, 0).unwrap().total_records, 0);
}

#[test]
fn disk_budget_rejects_overflowing_insert() {
    let dir = tempfile::tempdir().unwrap();
    // One block of disk budget only.
    let cfg = DbConfig::new(512, 64 * 1024, 512, dir.path());
    let db = SharedDatabase::open(cfg).unwrap();
    db.register_table(
        TableSchema::new(
            "t",
            vec![ColumnDefinition::new("v", ColumnType::String, 400)],
        )
        .unwrap(),
    )
    .unwrap();
    // Fill the single block, then force an allocation that must fail.
    db.insert_record("t", Record::new(vec!["a".repeat(200)])).unwrap();
    db.insert_record("t", Record::new(vec!["b".repeat(200)])).unwrap();
    let err = db
        .insert_record("t", Record::new(vec!["c".repeat(200)]))
        .unwrap_err();
    assert!(matches!(err, DbError::CapacityExceeded(_)));
    assert_eq!(db.dump_table("t", 0, 0).unwrap().total_records, 2);
}

#[test]
fn unique_index_blocks_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_users_db(dir.path());
    db.create_unique_index("uq_users_id", "users", "id").unwrap();
    let err = db
        .insert_record(
            "users",
            Record::new(vec!["1".into(), "Imposter".into(), "1".into()]),
        )
        .unwrap_err();
    assert!(matches!(err, DbError::Conflict(_)));
    assert_eq!(db.dump_table("users", 0, 0).unwrap().total_records, 4);
}

#[test]
fn crash_recovery_replays_committed_and_reverts_uncommitted() {
    let dir = tempfile::tempdir().unwrap();
    let schema = || {
        TableSchema::new(
            "events",
            vec![
                ColumnDefinition::new("id", ColumnType::Integer, 16),
                ColumnDefinition::new("kind", ColumnType::String, 32),
            ],
        )
        .unwrap()
    };
    {
        let db = SharedDatabase::open(config(dir.path())).unwrap();
        db.register_table(schema()).unwrap();
        // Implicit transactions: committed in the WAL.
        db.insert_record("events", Record::new(vec!["1".into(), "signup".into()]))
            .unwrap();
        db.insert_record("events", Record::new(vec!["2".into(), "login".into()]))
            .unwrap();
        // Explicit transaction left open: its entries stay uncommitted.
        db.begin_transaction().unwrap();
        db.insert_record("events", Record::new(vec!["3".into(), "phantom".into()]))
            .unwrap();
        // No commit, no clean shutdown: the WAL still holds everything.
    }
    let db = SharedDatabase::open(config(dir.path())).unwrap();
    db.register_table(schema()).unwrap();
    let dump = db.dump_table("events", 0, 0).unwrap();
    let mut ids: Vec<String> = dump.rows.iter().map(|r| r.values[0].clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["1".to_string(), "2".to_string()]);
}

#[test]
fn aggregate_on_empty_input() {
    let dir = tempfile::tempdir().unwrap();
    let db = SharedDatabase::open(config(dir.path())).unwrap();
    db.register_table(
        TableSchema::new(
            "empty_t",
            vec![ColumnDefinition::new("v", ColumnType::Integer, 8)],
        )
        .unwrap(),
    )
    .unwrap();

    // Global aggregate over no rows: exactly one output row.
    let rows = rows_of(
        &db,
        "SELECT COUNT(*) AS c, SUM(v) AS s, MIN(v) AS lo FROM empty_t",
    );
    assert_eq!(
        rows,
        vec![vec!["0".to_string(), "0".to_string(), "NULL".to_string()]]
    );

    // With GROUP BY: zero rows.
    let rows = rows_of(&db, "SELECT v, COUNT(*) AS c FROM empty_t GROUP BY v");
    assert!(rows.is_empty());
}

#[test]
fn limit_and_offset() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_users_db(dir.path());
    let rows = rows_of(&db, "SELECT name FROM users ORDER BY id LIMIT 2 OFFSET 1");
    assert_eq!(
        rows,
        vec![vec!["Bob".to_string()], vec!["Carol".to_string()]]
    );
}

#[test]
fn operator_tree_replays_after_close() {
    use stratadb::sql::executor::{build_operator, run_to_result_set};
    use stratadb::sql::parser::Parser;
    use stratadb::sql::planner::{build_logical_plan, generate_physical_plan, optimize};
    use stratadb::sql::ast::Statement;

    let dir = tempfile::tempdir().unwrap();
    let db = open_users_db(dir.path());
    let Statement::Select(select) =
        Parser::parse("SELECT name FROM users WHERE age > 29 ORDER BY name").unwrap()
    else {
        panic!("expected SELECT");
    };
    let optimized = optimize(build_logical_plan(&select).unwrap());
    let physical = {
        let guard = db.read();
        generate_physical_plan(&optimized, &*guard)
    };
    let mut root = build_operator(&physical, &db).unwrap();

    // init -> drain -> close, twice: the second pass must see the same rows.
    let first = run_to_result_set(root.as_mut()).unwrap().rows();
    let second = run_to_result_set(root.as_mut()).unwrap().rows();
    assert_eq!(first, second);
    assert_eq!(
        first,
        vec![
            vec!["Alice".to_string()],
            vec!["Bob".to_string()],
            vec!["Dave".to_string()],
        ]
    );
}

#[test]
fn table_alias_in_queries() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_users_db(dir.path());
    let rows = rows_of(&db, "SELECT u.name FROM users u WHERE u.id = 4");
    assert_eq!(rows, vec![vec!["Dave".to_string()]]);
}

#[test]
fn subquery_in_from_with_alias() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_users_db(dir.path());
    let rows = rows_of(
        &db,
        "SELECT grownups.name FROM (SELECT name, age FROM users WHERE age > 29) grownups ORDER BY grownups.name",
    );
    assert_eq!(
        rows,
        vec![
            vec!["Alice".to_string()],
            vec!["Bob".to_string()],
            vec!["Dave".to_string()],
        ]
    );
}
