//! Auto-increment cursor reconciliation after an import.

use serde::Serialize;
use sqlx::AnyConnection;

use super::StoreEngine;
use crate::import::whitelist::{sequenced_tables, TableKind};

/// Cursor of one synthetic-key table after reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceState {
    pub table: TableKind,
    /// Largest key present, 0 for an empty table.
    pub max_key: i64,
    /// Key the next insert without an explicit id will receive.
    pub next_key: i64,
}

async fn max_key(conn: &mut AnyConnection, table: TableKind) -> Result<i64, sqlx::Error> {
    let schema = table.schema();
    let sql = format!(
        "SELECT CAST(COALESCE(MAX(\"{}\"), 0) AS BIGINT) FROM \"{}\"",
        schema.key,
        table.name()
    );
    sqlx::query_scalar(&sql).fetch_one(&mut *conn).await
}

/// Point every synthetic-key sequence at `MAX(key) + 1`. Runs on the
/// caller's connection so it shares the import transaction.
pub async fn reconcile_sequences(
    conn: &mut AnyConnection,
    engine: StoreEngine,
) -> Result<Vec<SequenceState>, sqlx::Error> {
    let mut states = Vec::new();
    for table in sequenced_tables() {
        let max = max_key(conn, table).await?;
        let next = max + 1;
        match engine {
            StoreEngine::Postgres => {
                let _: i64 = sqlx::query_scalar(
                    "SELECT CAST(setval(pg_get_serial_sequence($1, $2), $3, false) AS BIGINT)",
                )
                .bind(table.name())
                .bind(table.schema().key)
                .bind(next)
                .fetch_one(&mut *conn)
                .await?;
            }
            StoreEngine::Sqlite => {
                // AUTOINCREMENT hands out max(seq, MAX(rowid)) + 1.
                sqlx::query("DELETE FROM sqlite_sequence WHERE name = ?1")
                    .bind(table.name())
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)")
                    .bind(table.name())
                    .bind(max)
                    .execute(&mut *conn)
                    .await?;
            }
        }
        states.push(SequenceState {
            table,
            max_key: max,
            next_key: next,
        });
    }
    tracing::info!(
        target: "stoner_backup",
        event = "sequences_reconciled",
        tables = states.len()
    );
    Ok(states)
}

/// Key the next default insert into `table` would receive, without
/// consuming it.
pub async fn next_key(
    conn: &mut AnyConnection,
    engine: StoreEngine,
    table: TableKind,
) -> Result<i64, sqlx::Error> {
    match engine {
        StoreEngine::Postgres => {
            let sql = format!(
                "SELECT CAST(CASE WHEN is_called THEN last_value + 1 ELSE last_value END AS BIGINT) \
                 FROM {}",
                sequence_relation(conn, table).await?
            );
            sqlx::query_scalar(&sql).fetch_one(&mut *conn).await
        }
        StoreEngine::Sqlite => {
            let seq: Option<i64> = sqlx::query_scalar(
                "SELECT CAST(seq AS BIGINT) FROM sqlite_sequence WHERE name = ?1",
            )
            .bind(table.name())
            .fetch_optional(&mut *conn)
            .await?;
            let max = max_key(conn, table).await?;
            Ok(seq.unwrap_or(0).max(max) + 1)
        }
    }
}

async fn sequence_relation(
    conn: &mut AnyConnection,
    table: TableKind,
) -> Result<String, sqlx::Error> {
    let name: Option<String> = sqlx::query_scalar("SELECT pg_get_serial_sequence($1, $2)")
        .bind(table.name())
        .bind(table.schema().key)
        .fetch_one(&mut *conn)
        .await?;
    name.ok_or_else(|| sqlx::Error::Protocol(format!("no sequence owns {}.id", table.name())))
}
