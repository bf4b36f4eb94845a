use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::AnyConnection;
use thiserror::Error;

use super::report::{ImportJob, TableCounts};
use super::rows::{format_timestamp, RowError, TableRecord};
use super::source::EmbeddedSource;
use super::validator::{ValidatedSource, ValidatedTable};
use super::whitelist::TableKind;
use crate::db::dialect::bind_values;
use crate::db::{reconcile_sequences, SequenceState, TargetStore};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{table} row {row}: missing required value for column {column}")]
    MissingField {
        table: TableKind,
        column: &'static str,
        row: i64,
    },
    #[error("{table} row {row}: invalid value for column {column}: {reason}")]
    InvalidValue {
        table: TableKind,
        column: &'static str,
        row: i64,
        reason: String,
    },
    #[error("failed to read {table} from uploaded database: {source}")]
    SourceRead {
        table: TableKind,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to write {table}: {source}")]
    Database {
        table: TableKind,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to reconcile sequences: {0}")]
    Sequence(#[source] sqlx::Error),
    #[error("transaction error: {0}")]
    Transaction(#[source] sqlx::Error),
}

impl ExecutionError {
    fn from_row(table: TableKind, row: i64, err: RowError) -> Self {
        match err {
            RowError::Missing { column } => ExecutionError::MissingField { table, column, row },
            RowError::Invalid { column, reason } => ExecutionError::InvalidValue {
                table,
                column,
                row,
                reason,
            },
        }
    }
}

/// What a committed import wrote.
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    pub tables: BTreeMap<TableKind, TableCounts>,
    pub sequences: Vec<SequenceState>,
}

/// Apply every validated table in import order, then reconcile sequences, all
/// inside one transaction. Any failure rolls the whole import back.
pub async fn execute_import(
    store: &TargetStore,
    source: &EmbeddedSource,
    validated: &ValidatedSource,
    batch_size: usize,
    job: &mut ImportJob,
) -> Result<ExecutionSummary, ExecutionError> {
    let mut tx = store
        .pool()
        .begin()
        .await
        .map_err(ExecutionError::Transaction)?;
    tracing::info!(target: "stoner_backup", event = "db_tx_begin");

    let imported_at = format_timestamp(&Utc::now().naive_utc());
    let outcome = apply_tables(&mut *tx, store, source, validated, batch_size, &imported_at, job).await;

    match outcome {
        Ok(sequences) => {
            tx.commit().await.map_err(ExecutionError::Transaction)?;
            tracing::info!(target: "stoner_backup", event = "db_tx_commit");
            Ok(ExecutionSummary {
                tables: job.tables().clone(),
                sequences,
            })
        }
        Err(err) => {
            if let Err(rb) = tx.rollback().await {
                tracing::error!(target: "stoner_backup", event = "db_tx_rollback_failed", error = %rb);
            } else {
                tracing::warn!(target: "stoner_backup", event = "db_tx_rollback", error = %err);
            }
            Err(err)
        }
    }
}

async fn apply_tables(
    conn: &mut AnyConnection,
    store: &TargetStore,
    source: &EmbeddedSource,
    validated: &ValidatedSource,
    batch_size: usize,
    imported_at: &str,
    job: &mut ImportJob,
) -> Result<Vec<SequenceState>, ExecutionError> {
    for entry in validated.tables() {
        import_table(&mut *conn, store, source, entry, batch_size, imported_at, job).await?;
    }
    reconcile_sequences(conn, store.engine())
        .await
        .map_err(ExecutionError::Sequence)
}

async fn import_table(
    conn: &mut AnyConnection,
    store: &TargetStore,
    source: &EmbeddedSource,
    entry: &ValidatedTable,
    batch_size: usize,
    imported_at: &str,
    job: &mut ImportJob,
) -> Result<(), ExecutionError> {
    let table = entry.table;
    let sql = store.dialect().upsert_sql(table.schema());
    let batch_size = batch_size.max(1);
    let mut cursor = source
        .cursor(table.name())
        .await
        .map_err(|source| ExecutionError::SourceRead { table, source })?;
    let mut batches = 0_u64;

    loop {
        let batch = source
            .read_batch(table.name(), &entry.columns, &mut cursor, batch_size)
            .await
            .map_err(|source| ExecutionError::SourceRead { table, source })?;
        if batch.is_empty() {
            break;
        }

        let mut applied = 0_u64;
        for row in &batch {
            job.record_attempt(table);
            let record = TableRecord::from_source(table, row, imported_at)
                .map_err(|err| ExecutionError::from_row(table, row.rowid, err))?;
            let result = bind_values(sqlx::query(&sql), record.into_values())
                .execute(&mut *conn)
                .await
                .map_err(|source| ExecutionError::Database { table, source })?;
            job.record_written(table, result.rows_affected());
            applied += 1;
        }
        batches += 1;
        tracing::debug!(
            target: "stoner_backup",
            event = "batch_applied",
            table = table.name(),
            batch = batches,
            rows = applied
        );

        // Let unrelated requests make progress between batches.
        tokio::task::yield_now().await;

        if batch.len() < batch_size {
            break;
        }
    }

    tracing::info!(
        target: "stoner_backup",
        event = "table_imported",
        table = table.name(),
        batches,
        attempted = job.counts(table).attempted,
        written = job.counts(table).written
    );
    Ok(())
}
