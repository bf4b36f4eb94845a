//! The target relational store: PostgreSQL in production, SQLite for
//! single-box installs and tests. Both are driven through `sqlx::AnyPool`.

pub mod backup;
pub mod dialect;
pub mod schema;
pub mod sequence;

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use sqlx::any::AnyPoolOptions;
use sqlx::postgres::PgConnectOptions;
use sqlx::{AnyPool, ConnectOptions};

use crate::config::PipelineConfig;
use crate::import::whitelist::{TableKind, IMPORT_ORDER};

pub use dialect::Dialect;
pub use schema::ensure_target_schema;
pub use sequence::{next_key, reconcile_sequences, SequenceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StoreEngine {
    #[serde(rename = "postgresql")]
    Postgres,
    #[serde(rename = "sqlite")]
    Sqlite,
}

impl StoreEngine {
    pub fn slug(self) -> &'static str {
        match self {
            StoreEngine::Postgres => "postgresql",
            StoreEngine::Sqlite => "sqlite",
        }
    }

    pub fn from_slug(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Some(StoreEngine::Postgres),
            "sqlite" => Some(StoreEngine::Sqlite),
            _ => None,
        }
    }

    /// Extension of artifacts this engine exports.
    pub fn artifact_extension(self) -> &'static str {
        match self {
            StoreEngine::Postgres => "sql",
            StoreEngine::Sqlite => "db",
        }
    }
}

impl std::fmt::Display for StoreEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

/// Handle to the target store. Cheap to clone.
#[derive(Clone, Debug)]
pub struct TargetStore {
    pool: AnyPool,
    engine: StoreEngine,
}

impl TargetStore {
    pub async fn connect(config: &PipelineConfig) -> Result<Self, sqlx::Error> {
        sqlx::any::install_default_drivers();
        let url = match config.engine {
            StoreEngine::Postgres => {
                let params = &config.postgres;
                let port = params.port.trim().parse::<u16>().unwrap_or(5432);
                let mut options = PgConnectOptions::new()
                    .host(&params.host)
                    .port(port)
                    .username(&params.user)
                    .database(&params.database);
                if let Some(password) = &params.password {
                    options = options.password(password);
                }
                options.to_url_lossy().to_string()
            }
            StoreEngine::Sqlite => {
                if let Some(parent) = config.sqlite_path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
                    }
                }
                sqlite_url(&config.sqlite_path)
            }
        };

        let max_connections = match config.engine {
            StoreEngine::Postgres => 5,
            StoreEngine::Sqlite => 1,
        };
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await?;
        tracing::info!(
            target: "stoner_backup",
            event = "target_store_open",
            engine = config.engine.slug()
        );
        Ok(Self {
            pool,
            engine: config.engine,
        })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn engine(&self) -> StoreEngine {
        self.engine
    }

    pub fn dialect(&self) -> Dialect {
        Dialect::new(self.engine)
    }

    pub async fn count_rows(&self, table: TableKind) -> Result<i64, sqlx::Error> {
        let sql = format!("SELECT CAST(COUNT(*) AS BIGINT) FROM \"{}\"", table.name());
        sqlx::query_scalar(&sql).fetch_one(&self.pool).await
    }

    /// Row counts for every whitelisted table, keyed by table name.
    pub async fn table_counts(&self) -> Result<BTreeMap<&'static str, i64>, sqlx::Error> {
        let mut counts = BTreeMap::new();
        for table in IMPORT_ORDER {
            counts.insert(table.name(), self.count_rows(table).await?);
        }
        Ok(counts)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn sqlite_url(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}
