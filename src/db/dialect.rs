use sqlx::any::{Any, AnyArguments};
use sqlx::query::Query;

use super::StoreEngine;
use crate::import::rows::BindValue;
use crate::import::whitelist::{ColumnKind, ConflictPolicy, TableSchema};

/// SQL rendering differences between the two target engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    engine: StoreEngine,
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl Dialect {
    pub fn new(engine: StoreEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> StoreEngine {
        self.engine
    }

    /// 1-based positional parameter.
    pub fn placeholder(&self, index: usize) -> String {
        match self.engine {
            StoreEngine::Postgres => format!("${index}"),
            StoreEngine::Sqlite => format!("?{index}"),
        }
    }

    /// Parameter with the cast PostgreSQL needs for text-encoded values.
    pub fn typed_placeholder(&self, index: usize, kind: ColumnKind) -> String {
        let placeholder = self.placeholder(index);
        match (self.engine, kind) {
            (StoreEngine::Postgres, ColumnKind::Timestamp) => {
                format!("CAST({placeholder} AS TIMESTAMP)")
            }
            (StoreEngine::Postgres, ColumnKind::Json) => format!("CAST({placeholder} AS JSONB)"),
            _ => placeholder,
        }
    }

    /// `INSERT ... ON CONFLICT (key) DO UPDATE|NOTHING` over every column of
    /// `schema`, in schema order.
    pub fn upsert_sql(&self, schema: &TableSchema) -> String {
        let columns = schema
            .columns
            .iter()
            .map(|spec| quote_ident(spec.name))
            .collect::<Vec<_>>()
            .join(", ");
        let values = schema
            .columns
            .iter()
            .enumerate()
            .map(|(idx, spec)| self.typed_placeholder(idx + 1, spec.kind))
            .collect::<Vec<_>>()
            .join(", ");
        let conflict = match schema.conflict {
            ConflictPolicy::Ignore => "DO NOTHING".to_string(),
            ConflictPolicy::Overwrite => {
                let assignments = schema
                    .updatable_columns()
                    .map(|spec| {
                        let col = quote_ident(spec.name);
                        format!("{col} = EXCLUDED.{col}")
                    })
                    .collect::<Vec<_>>();
                if assignments.is_empty() {
                    "DO NOTHING".to_string()
                } else {
                    format!("DO UPDATE SET {}", assignments.join(", "))
                }
            }
        };
        format!(
            "INSERT INTO {} ({columns}) VALUES ({values}) ON CONFLICT ({}) {conflict}",
            quote_ident(schema.name()),
            quote_ident(schema.key),
        )
    }
}

/// Bind typed values onto a query in order.
pub fn bind_values<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    values: Vec<BindValue>,
) -> Query<'q, Any, AnyArguments<'q>> {
    for value in values {
        query = match value {
            BindValue::Int(v) => query.bind(v),
            BindValue::Text(v) => query.bind(v),
            BindValue::Bool(v) => query.bind(v),
        };
    }
    query
}
