use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::StoreEngine;

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_MIN_ARTIFACT_BYTES: u64 = 100;
const DEFAULT_RESTORE_TIMEOUT_MS: u64 = 120_000;
const MIN_RESTORE_TIMEOUT_MS: u64 = 1_000;
const MAX_RESTORE_TIMEOUT_MS: u64 = 30 * 60 * 1_000;
const DEFAULT_BATCH_SIZE: usize = 100;
const MAX_BATCH_SIZE: usize = 10_000;
const DEFAULT_RETENTION_COUNT: usize = 30;
const HARD_MAX_RETENTION_COUNT: usize = 500;
const DEFAULT_BIND: &str = "127.0.0.1:3001";

/// Connection parameters for the PostgreSQL target and its native tools.
///
/// Values are kept as raw strings; they are validated against a strict
/// character class right before they are placed on a child process argv.
#[derive(Clone)]
pub struct PgParams {
    pub host: String,
    pub port: String,
    pub user: String,
    pub database: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for PgParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for PgParams {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: "5432".into(),
            user: "stoner".into(),
            database: "stoner_system".into(),
            password: None,
        }
    }
}

/// Upload gating limits applied while staging an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingLimits {
    pub max_bytes: u64,
    pub min_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub engine: StoreEngine,
    pub postgres: PgParams,
    pub sqlite_path: PathBuf,
    pub backup_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub min_artifact_bytes: u64,
    pub restore_timeout: Duration,
    pub batch_size: usize,
    pub pg_dump_bin: String,
    pub psql_bin: String,
    pub retention_max_count: usize,
    pub bind: String,
}

impl PipelineConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup. Unparseable or
    /// out-of-range numeric values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let engine = get("STONER_DB_ENGINE")
            .and_then(|value| StoreEngine::from_slug(value.trim()))
            .unwrap_or(StoreEngine::Postgres);

        let defaults = PgParams::default();
        let postgres = PgParams {
            host: get("PG_HOST").unwrap_or(defaults.host),
            port: get("PG_PORT").unwrap_or(defaults.port),
            user: get("PG_USERNAME").unwrap_or(defaults.user),
            database: get("PG_DATABASE").unwrap_or(defaults.database),
            password: get("PG_PASSWORD"),
        };

        let max_upload_bytes = get("STONER_MAX_UPLOAD_BYTES")
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(|value| value.min(DEFAULT_MAX_UPLOAD_BYTES))
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        let min_artifact_bytes = get("STONER_MIN_ARTIFACT_BYTES")
            .and_then(|value| value.parse::<u64>().ok())
            .map(|value| value.min(max_upload_bytes))
            .unwrap_or(DEFAULT_MIN_ARTIFACT_BYTES);

        let restore_timeout_ms = get("STONER_RESTORE_TIMEOUT_MS")
            .and_then(|value| value.parse::<u64>().ok())
            .map(|value| value.clamp(MIN_RESTORE_TIMEOUT_MS, MAX_RESTORE_TIMEOUT_MS))
            .unwrap_or(DEFAULT_RESTORE_TIMEOUT_MS);

        let batch_size = get("STONER_IMPORT_BATCH_SIZE")
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .map(|value| value.min(MAX_BATCH_SIZE))
            .unwrap_or(DEFAULT_BATCH_SIZE);

        let retention_max_count = get("STONER_BACKUP_MAX_COUNT")
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .map(|value| value.min(HARD_MAX_RETENTION_COUNT))
            .unwrap_or(DEFAULT_RETENTION_COUNT);

        Self {
            engine,
            postgres,
            sqlite_path: get("STONER_SQLITE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/stoner.sqlite3")),
            backup_dir: get("STONER_BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("backups")),
            upload_dir: get("STONER_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            max_upload_bytes,
            min_artifact_bytes,
            restore_timeout: Duration::from_millis(restore_timeout_ms),
            batch_size,
            pg_dump_bin: get("STONER_PG_DUMP_BIN").unwrap_or_else(|| "pg_dump".into()),
            psql_bin: get("STONER_PSQL_BIN").unwrap_or_else(|| "psql".into()),
            retention_max_count,
            bind: get("STONER_BIND").unwrap_or_else(|| DEFAULT_BIND.into()),
        }
    }

    /// Defaults for a SQLite target rooted at `root`, with `backups/` and
    /// `uploads/` below it.
    pub fn sqlite(db_path: &Path, root: &Path) -> Self {
        let mut config = Self::from_lookup(|_| None);
        config.engine = StoreEngine::Sqlite;
        config.sqlite_path = db_path.to_path_buf();
        config.backup_dir = root.join("backups");
        config.upload_dir = root.join("uploads");
        config
    }

    pub fn staging_limits(&self) -> StagingLimits {
        StagingLimits {
            max_bytes: self.max_upload_bytes,
            min_bytes: self.min_artifact_bytes,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

/// Convenience for tests and tools that hold configuration in a map.
pub fn lookup_from_map(map: HashMap<String, String>) -> impl Fn(&str) -> Option<String> {
    move |key| map.get(key).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(pairs: &[(&str, &str)]) -> PipelineConfig {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(lookup_from_map(map))
    }

    #[test]
    fn defaults_match_original_deployment() {
        let cfg = config_with(&[]);
        assert_eq!(cfg.engine, StoreEngine::Postgres);
        assert_eq!(cfg.postgres.host, "localhost");
        assert_eq!(cfg.postgres.port, "5432");
        assert_eq!(cfg.postgres.database, "stoner_system");
        assert_eq!(cfg.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(cfg.min_artifact_bytes, 100);
        assert_eq!(cfg.restore_timeout, Duration::from_millis(120_000));
        assert_eq!(cfg.batch_size, 100);
    }

    #[test]
    fn numeric_values_are_clamped() {
        let cfg = config_with(&[
            ("STONER_MAX_UPLOAD_BYTES", "999999999999"),
            ("STONER_RESTORE_TIMEOUT_MS", "5"),
            ("STONER_IMPORT_BATCH_SIZE", "0"),
            ("STONER_BACKUP_MAX_COUNT", "100000"),
        ]);
        assert_eq!(cfg.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(cfg.restore_timeout, Duration::from_millis(MIN_RESTORE_TIMEOUT_MS));
        assert_eq!(cfg.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(cfg.retention_max_count, HARD_MAX_RETENTION_COUNT);
    }

    #[test]
    fn engine_and_paths_come_from_env() {
        let cfg = config_with(&[
            ("STONER_DB_ENGINE", "sqlite"),
            ("STONER_SQLITE_PATH", "/srv/stoner/db.sqlite3"),
            ("STONER_BACKUP_DIR", "/srv/stoner/backups"),
        ]);
        assert_eq!(cfg.engine, StoreEngine::Sqlite);
        assert_eq!(cfg.sqlite_path, PathBuf::from("/srv/stoner/db.sqlite3"));
        assert_eq!(cfg.backup_dir, PathBuf::from("/srv/stoner/backups"));
    }

    #[test]
    fn password_is_redacted_in_debug_output() {
        let cfg = config_with(&[("PG_PASSWORD", "hunter2")]);
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
