use thiserror::Error;

use super::source::EmbeddedSource;
use super::whitelist::{TableKind, IMPORT_ORDER};

#[derive(Debug, Error)]
pub enum SchemaViolation {
    #[error("unexpected table in uploaded database: {table}")]
    UnexpectedTable { table: String },
    #[error("unexpected column in uploaded database: {table}.{column}")]
    UnexpectedColumn { table: String, column: String },
    #[error("uploaded file is not a readable SQLite database: {0}")]
    Catalog(#[source] sqlx::Error),
}

/// A whitelisted table present in the source, with the columns it has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTable {
    pub table: TableKind,
    pub columns: Vec<String>,
}

/// Proof that every table and column in a source passed the whitelist.
/// Only [`validate_source`] constructs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSource {
    tables: Vec<ValidatedTable>,
}

impl ValidatedSource {
    /// Present tables, in import order.
    pub fn tables(&self) -> &[ValidatedTable] {
        &self.tables
    }

    pub fn contains(&self, table: TableKind) -> bool {
        self.tables.iter().any(|entry| entry.table == table)
    }
}

/// Two passes over the catalog: every table name first, then every column of
/// every table. No row is read here.
pub async fn validate_source(source: &EmbeddedSource) -> Result<ValidatedSource, SchemaViolation> {
    let names = source
        .table_names()
        .await
        .map_err(SchemaViolation::Catalog)?;

    let mut present = Vec::with_capacity(names.len());
    for name in &names {
        match TableKind::from_name(name) {
            Some(table) => present.push(table),
            None => {
                tracing::warn!(
                    target: "stoner_backup",
                    event = "schema_rejected",
                    table = %name,
                    reason = "unexpected_table"
                );
                return Err(SchemaViolation::UnexpectedTable {
                    table: name.clone(),
                });
            }
        }
    }

    let mut tables = Vec::with_capacity(present.len());
    for table in IMPORT_ORDER {
        if !present.contains(&table) {
            continue;
        }
        let schema = table.schema();
        let columns = source
            .column_names(table.name())
            .await
            .map_err(SchemaViolation::Catalog)?;
        if let Some(column) = columns.iter().find(|column| !schema.permits(column)) {
            tracing::warn!(
                target: "stoner_backup",
                event = "schema_rejected",
                table = table.name(),
                column = %column,
                reason = "unexpected_column"
            );
            return Err(SchemaViolation::UnexpectedColumn {
                table: table.name().to_string(),
                column: column.clone(),
            });
        }
        tables.push(ValidatedTable { table, columns });
    }

    tracing::info!(
        target: "stoner_backup",
        event = "schema_validated",
        tables = tables.len()
    );
    Ok(ValidatedSource { tables })
}
