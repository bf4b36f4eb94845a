#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use rusqlite::Connection;
use stoner_backup::audit::{AuditAction, AuditOutcome};
use stoner_backup::db::next_key;
use stoner_backup::error::FailurePhase;
use stoner_backup::import::{SchemaViolation, TableKind};
use stoner_backup::{pipeline, Actor, PipelineConfig, PipelineError};
use util::*;

async fn import(h: &Harness, source: &std::path::Path) -> Result<stoner_backup::import::ImportReport, PipelineError> {
    let guard = h.ctx.begin_operation()?;
    let staged = pipeline::stage_file(&h.ctx, source).await?;
    pipeline::import_staged(&h.ctx, &guard, &Actor::new("admin"), staged).await
}

async fn total_rows(h: &Harness) -> i64 {
    h.ctx.store.table_counts().await.unwrap().values().sum()
}

#[tokio::test]
async fn fifty_rows_land_and_cursors_move_past_them() {
    let h = sqlite_harness().await;
    let source = seeded_source(h.root.path(), "stoner.db");

    let report = import(&h, &source).await.expect("import succeeds");
    assert_eq!(report.total_rows, 50);
    assert_eq!(report.tables[&TableKind::Payments].attempted, SEEDED_PAYMENTS as u64);

    let store = &h.ctx.store;
    assert_eq!(store.count_rows(TableKind::Stores).await.unwrap(), SEEDED_STORES);
    assert_eq!(store.count_rows(TableKind::Users).await.unwrap(), SEEDED_USERS);
    assert_eq!(store.count_rows(TableKind::Payments).await.unwrap(), SEEDED_PAYMENTS);
    assert_eq!(store.count_rows(TableKind::CustomerOrders).await.unwrap(), SEEDED_ORDERS);
    assert_eq!(store.count_rows(TableKind::AuditLogs).await.unwrap(), SEEDED_AUDIT_LOGS);
    assert_eq!(total_rows(&h).await, 50);

    let mut conn = store.pool().acquire().await.unwrap();
    let orders_next = next_key(&mut conn, store.engine(), TableKind::CustomerOrders)
        .await
        .unwrap();
    assert!(orders_next > FIRST_ORDER_ID + SEEDED_ORDERS - 1);
    let stores_next = next_key(&mut conn, store.engine(), TableKind::Stores).await.unwrap();
    assert_eq!(stores_next, SEEDED_STORES + 1);
    drop(conn);

    let orders_state = report
        .sequences
        .iter()
        .find(|state| state.table == TableKind::CustomerOrders)
        .unwrap();
    assert_eq!(orders_state.max_key, FIRST_ORDER_ID + SEEDED_ORDERS - 1);

    // A default insert after the import must not collide.
    sqlx::query(
        "INSERT INTO customer_orders (order_date, products, customer_name, customer_phone) \
         VALUES ('2024-07-01', 'Cake', 'Walk-in', '0900000000')",
    )
    .execute(store.pool())
    .await
    .expect("insert after import");

    let events = h.audit.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, AuditAction::DatabaseImport);
    assert_eq!(events[0].outcome, AuditOutcome::Success);
    assert_eq!(events[0].original_name.as_deref(), Some("stoner.db"));
    assert!(files_in(&h.config().upload_dir).is_empty());
}

#[tokio::test]
async fn unknown_table_rejects_the_whole_file() {
    let h = sqlite_harness().await;
    let source = seeded_source(h.root.path(), "stoner.sqlite");
    Connection::open(&source)
        .unwrap()
        .execute_batch("CREATE TABLE secrets (id INTEGER PRIMARY KEY, token TEXT);")
        .unwrap();

    let err = import(&h, &source).await.expect_err("rejected");
    match &err {
        PipelineError::Schema(SchemaViolation::UnexpectedTable { table }) => {
            assert_eq!(table, "secrets")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.phase(), FailurePhase::RejectedBeforeChange);
    assert_eq!(total_rows(&h).await, 0);

    let events = h.audit.events();
    assert_eq!(events[0].outcome, AuditOutcome::Failure);
    assert_eq!(events[0].error_code.as_deref(), Some("BACKUP/SCHEMA"));
    assert!(files_in(&h.config().upload_dir).is_empty());
}

#[tokio::test]
async fn extra_column_is_named_and_nothing_is_written() {
    let h = sqlite_harness().await;
    let source = seeded_source(h.root.path(), "stoner.db");
    Connection::open(&source)
        .unwrap()
        .execute_batch("ALTER TABLE users ADD COLUMN ssn TEXT;")
        .unwrap();

    let err = import(&h, &source).await.expect_err("rejected");
    match err {
        PipelineError::Schema(SchemaViolation::UnexpectedColumn { table, column }) => {
            assert_eq!(table, "users");
            assert_eq!(column, "ssn");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(total_rows(&h).await, 0);
}

#[tokio::test]
async fn a_bad_row_rolls_back_every_table() {
    let h = sqlite_harness().await;
    let source = seeded_source(h.root.path(), "stoner.db");
    Connection::open(&source)
        .unwrap()
        .execute(
            "UPDATE payments SET paid_at = 'sometime last week' WHERE uuid = 'pay-0015'",
            [],
        )
        .unwrap();

    let err = import(&h, &source).await.expect_err("row failure");
    assert!(matches!(err, PipelineError::Transaction(_)));
    assert_eq!(err.code(), "BACKUP/TRANSACTION");
    assert_eq!(err.phase(), FailurePhase::FailedDuringOperation);
    assert!(err.retry_safe());
    assert!(err.to_string().contains("paid_at"));

    // Stores and users were applied before payments; they must be gone too.
    assert_eq!(total_rows(&h).await, 0);
    assert!(files_in(&h.config().upload_dir).is_empty());
}

#[tokio::test]
async fn importing_the_same_file_twice_is_idempotent() {
    let h = sqlite_harness().await;
    let source = seeded_source(h.root.path(), "stoner.db");

    import(&h, &source).await.expect("first import");
    let before = h.ctx.store.table_counts().await.unwrap();
    import(&h, &source).await.expect("second import");
    let after = h.ctx.store.table_counts().await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn empty_tables_leave_cursors_at_their_start() {
    let h = sqlite_harness().await;
    let source = h.path("empty.db");
    drop(create_source(&source));

    let report = import(&h, &source).await.expect("empty import");
    assert_eq!(report.total_rows, 0);
    assert!(report.sequences.iter().all(|state| state.next_key == 1));

    let mut conn = h.ctx.store.pool().acquire().await.unwrap();
    let next = next_key(&mut conn, h.ctx.store.engine(), TableKind::Users)
        .await
        .unwrap();
    assert_eq!(next, 1);
}

#[tokio::test]
async fn missing_tables_and_columns_use_defaults() {
    let h = sqlite_harness().await;
    let source = h.path("partial.db");
    let conn = Connection::open(&source).unwrap();
    conn.execute_batch(
        "CREATE TABLE stores (id INTEGER PRIMARY KEY, name TEXT, code TEXT);
         INSERT INTO stores VALUES (7, 'Harbour', 'H07');
         CREATE TABLE payments (uuid TEXT PRIMARY KEY, paid_at TEXT, payment_method TEXT);
         INSERT INTO payments VALUES ('p-1', '2024-03-01T08:00:00Z', 'cash');",
    )
    .unwrap();
    drop(conn);

    let report = import(&h, &source).await.expect("partial import");
    assert_eq!(report.tables[&TableKind::Users].attempted, 0);

    let (status, amount): (String, i64) =
        sqlx::query_as("SELECT status, CAST(amount AS BIGINT) FROM payments WHERE uuid = 'p-1'")
            .fetch_one(h.ctx.store.pool())
            .await
            .unwrap();
    assert_eq!(status, "已入帳");
    assert_eq!(amount, 0);
}

#[tokio::test]
async fn concurrent_operation_is_refused() {
    let h = sqlite_harness().await;
    let source = seeded_source(h.root.path(), "stoner.db");

    let held = h.ctx.begin_operation().unwrap();
    let err = import(&h, &source).await.expect_err("busy");
    assert!(matches!(err, PipelineError::Busy));
    drop(held);
    assert_eq!(total_rows(&h).await, 0);
    import(&h, &source).await.expect("import after release");
}

#[tokio::test]
async fn small_batches_cover_every_row_in_source_order() {
    let root = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig::sqlite(&root.path().join("target.sqlite3"), root.path());
    config.batch_size = 3;
    let h = harness_with(root, config).await;
    let source = seeded_source(h.root.path(), "stoner.db");

    let report = import(&h, &source).await.expect("import succeeds");
    assert_eq!(report.total_rows, 50);
    assert_eq!(report.tables[&TableKind::Payments].attempted, SEEDED_PAYMENTS as u64);
    assert_eq!(total_rows(&h).await, 50);

    let applied: Vec<String> = sqlx::query_scalar("SELECT uuid FROM payments ORDER BY rowid")
        .fetch_all(h.ctx.store.pool())
        .await
        .unwrap();
    let expected: Vec<String> = (1..=SEEDED_PAYMENTS).map(|i| format!("pay-{i:04}")).collect();
    assert_eq!(applied, expected);
}

#[tokio::test]
async fn without_rowid_source_tables_are_imported() {
    let h = sqlite_harness().await;
    let source = h.path("clustered.db");
    Connection::open(&source)
        .unwrap()
        .execute_batch(
            "CREATE TABLE payments (uuid TEXT PRIMARY KEY, paid_at TEXT, amount INTEGER) WITHOUT ROWID;
             INSERT INTO payments VALUES ('p-2', '2024-03-02 08:00:00', 200),
                                         ('p-1', '2024-03-01 08:00:00', 100);",
        )
        .unwrap();

    let report = import(&h, &source).await.expect("import succeeds");
    assert_eq!(report.tables[&TableKind::Payments].attempted, 2);
    assert_eq!(h.ctx.store.count_rows(TableKind::Payments).await.unwrap(), 2);
}

#[tokio::test]
async fn extreme_epoch_timestamp_rolls_back_instead_of_panicking() {
    let h = sqlite_harness().await;
    let source = seeded_source(h.root.path(), "stoner.db");
    Connection::open(&source)
        .unwrap()
        .execute(
            "UPDATE payments SET paid_at = -9223372036854775808 WHERE uuid = 'pay-0003'",
            [],
        )
        .unwrap();

    let err = import(&h, &source).await.expect_err("row failure");
    assert!(matches!(err, PipelineError::Transaction(_)));
    assert!(err.to_string().contains("paid_at"));
    assert_eq!(total_rows(&h).await, 0);
}
