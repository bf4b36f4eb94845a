//! Read-only access to an uploaded SQLite file.

use std::path::Path;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool, TypeInfo, ValueRef};

/// One untyped cell as stored in the source file.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SourceValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SourceValue::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SourceValue::Null => "null",
            SourceValue::Integer(_) => "integer",
            SourceValue::Real(_) => "real",
            SourceValue::Text(_) => "text",
            SourceValue::Blob(_) => "blob",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceRow {
    pub rowid: i64,
    columns: Arc<[String]>,
    values: Vec<SourceValue>,
}

impl SourceRow {
    pub fn new(rowid: i64, columns: Arc<[String]>, values: Vec<SourceValue>) -> Self {
        Self {
            rowid,
            columns,
            values,
        }
    }

    /// Value of `column`, or `Null` when the source table lacks it.
    pub fn get(&self, column: &str) -> &SourceValue {
        const NULL: &SourceValue = &SourceValue::Null;
        self.columns
            .iter()
            .position(|name| name == column)
            .and_then(|idx| self.values.get(idx))
            .unwrap_or(NULL)
    }
}

/// Paging position inside one source table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchCursor {
    Rowid { after: Option<i64> },
    PrimaryKey { order_by: String, consumed: i64 },
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// An uploaded SQLite database opened read-only and immutable.
pub struct EmbeddedSource {
    pool: SqlitePool,
}

impl EmbeddedSource {
    pub async fn open(path: &Path) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .immutable(true)
            .create_if_missing(false)
            .foreign_keys(false);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .after_connect(|conn, _| {
                Box::pin(async move {
                    // Views and triggers in an untrusted file must not run app functions.
                    sqlx::query("PRAGMA trusted_schema = OFF;")
                        .execute(&mut *conn)
                        .await?;
                    Ok::<_, sqlx::Error>(())
                })
            })
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// User tables, excluding the engine's internal `sqlite_*` tables.
    pub async fn table_names(&self) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
             ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn column_names(&self, table: &str) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
            .bind(table)
            .fetch_all(&self.pool)
            .await
    }

    /// Start position for reading `table` in batches.
    ///
    /// Ordinary tables are paged by `rowid`. `WITHOUT ROWID` tables have no
    /// rowid, so they are walked in primary-key order instead.
    pub async fn cursor(&self, table: &str) -> Result<BatchCursor, sqlx::Error> {
        let without_rowid: Option<i64> =
            sqlx::query_scalar("SELECT wr FROM pragma_table_list WHERE schema = 'main' AND name = ?1")
                .bind(table)
                .fetch_optional(&self.pool)
                .await?;
        if without_rowid.unwrap_or(0) == 0 {
            return Ok(BatchCursor::Rowid { after: None });
        }

        let key: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk")
                .bind(table)
                .fetch_all(&self.pool)
                .await?;
        let order_by = key
            .iter()
            .map(|name| quote(name))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(BatchCursor::PrimaryKey {
            order_by,
            consumed: 0,
        })
    }

    /// Next batch of rows at `cursor`, advancing it past the returned rows.
    ///
    /// `table` and `columns` must already have passed whitelist validation;
    /// they are quoted but never taken from anywhere else.
    pub async fn read_batch(
        &self,
        table: &str,
        columns: &[String],
        cursor: &mut BatchCursor,
        limit: usize,
    ) -> Result<Vec<SourceRow>, sqlx::Error> {
        let mut selected = Vec::with_capacity(columns.len() + 1);
        selected.push(match cursor {
            BatchCursor::Rowid { .. } => "rowid".to_string(),
            BatchCursor::PrimaryKey { .. } => "NULL".to_string(),
        });
        selected.extend(columns.iter().map(|name| quote(name)));
        let projection = selected.join(", ");
        let table = quote(table);

        let (sql, position) = match cursor {
            BatchCursor::Rowid { after: None } => (
                format!("SELECT {projection} FROM {table} ORDER BY rowid LIMIT ?1"),
                None,
            ),
            BatchCursor::Rowid { after: Some(after) } => (
                format!("SELECT {projection} FROM {table} WHERE rowid > ?2 ORDER BY rowid LIMIT ?1"),
                Some(*after),
            ),
            BatchCursor::PrimaryKey { order_by, consumed } => (
                format!("SELECT {projection} FROM {table} ORDER BY {order_by} LIMIT ?1 OFFSET ?2"),
                Some(*consumed),
            ),
        };
        let mut query = sqlx::query(&sql).bind(limit as i64);
        if let Some(position) = position {
            query = query.bind(position);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let shared: Arc<[String]> = columns.into();
        let mut batch = Vec::with_capacity(rows.len());
        for row in &rows {
            let rowid = match cursor {
                BatchCursor::Rowid { after } => {
                    let rowid: i64 = row.try_get(0)?;
                    *after = Some(rowid);
                    rowid
                }
                // Row number within the key order; immutable files keep it stable.
                BatchCursor::PrimaryKey { consumed, .. } => {
                    *consumed += 1;
                    *consumed
                }
            };
            let values = (1..=columns.len())
                .map(|idx| decode_value(row, idx))
                .collect::<Result<Vec<_>, _>>()?;
            batch.push(SourceRow::new(rowid, Arc::clone(&shared), values));
        }
        Ok(batch)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Decode by the value's storage class, not the declared column type.
fn decode_value(row: &SqliteRow, idx: usize) -> Result<SourceValue, sqlx::Error> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(SourceValue::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();
    let value = match type_name.as_str() {
        "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => SourceValue::Integer(row.try_get(idx)?),
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => SourceValue::Real(row.try_get(idx)?),
        "BLOB" => SourceValue::Blob(row.try_get(idx)?),
        _ => SourceValue::Text(row.try_get(idx)?),
    };
    Ok(value)
}
