//! Point-in-time export of the target store into the backup directory.
//!
//! PostgreSQL targets are dumped with `pg_dump`; SQLite targets are copied
//! with the online backup API. Either way the artifact name is generated
//! here and a failed export leaves no file behind.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use fs2::available_space;
use rusqlite::{backup::Backup, Connection, OpenFlags};
use serde::Serialize;
use tokio::task;

use super::StoreEngine;
use crate::artifact::{prune_artifacts, unique_artifact_name, ArtifactName};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::native::{run_tool, ToolInvocation};

const PARTIAL_SUFFIX: &str = ".partial";
const REQUIRED_FREE_MULTIPLIER: f64 = 1.2;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExportOutcome {
    pub filename: String,
    pub engine: StoreEngine,
    pub size_bytes: u64,
    pub elapsed_ms: u64,
    /// Older artifacts removed by retention after this export.
    pub pruned: Vec<String>,
}

pub async fn export_database(config: &PipelineConfig) -> Result<ExportOutcome, PipelineError> {
    let started = Instant::now();
    let dir = config.backup_dir.clone();
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|err| PipelineError::internal("create backup directory", err))?;
    let name = unique_artifact_name(&dir, config.engine, Utc::now())?;

    tracing::info!(
        target: "stoner_backup",
        event = "export_started",
        engine = config.engine.slug(),
        filename = %name
    );

    let result = match config.engine {
        StoreEngine::Postgres => export_postgres(config, &dir, &name).await,
        StoreEngine::Sqlite => {
            let db_path = config.sqlite_path.clone();
            let dir = dir.clone();
            let name = name.clone();
            task::spawn_blocking(move || export_sqlite_sync(&db_path, &dir, &name))
                .await
                .map_err(|err| PipelineError::internal("backup task panicked", err))?
        }
    };

    let size_bytes = match result {
        Ok(size) => size,
        Err(err) => {
            tracing::warn!(
                target: "stoner_backup",
                event = "export_failed",
                filename = %name,
                code = err.code(),
                error = %err
            );
            return Err(err);
        }
    };

    let pruned = {
        let dir = dir.clone();
        let keep = config.retention_max_count;
        task::spawn_blocking(move || prune_artifacts(&dir, keep))
            .await
            .map_err(|err| PipelineError::internal("retention task panicked", err))??
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        target: "stoner_backup",
        event = "export_finished",
        filename = %name,
        size_bytes,
        elapsed_ms,
        pruned = pruned.len()
    );
    Ok(ExportOutcome {
        filename: name.to_string(),
        engine: name.engine(),
        size_bytes,
        elapsed_ms,
        pruned,
    })
}

async fn export_postgres(
    config: &PipelineConfig,
    dir: &Path,
    name: &ArtifactName,
) -> Result<u64, PipelineError> {
    let params = config.postgres.checked()?;
    let output = dir.join(name.as_str());

    let mut args = params.connection_args();
    args.extend([
        "-f".to_string(),
        output.to_string_lossy().into_owned(),
        "--verbose".to_string(),
        "--no-password".to_string(),
    ]);
    let invocation = ToolInvocation {
        tool: "pg_dump",
        program: config.pg_dump_bin.clone(),
        args,
        password: config.postgres.password.clone(),
        timeout: None,
    };

    if let Err(err) = run_tool(invocation).await {
        remove_partial(&output).await;
        return Err(err.redact_path(&output, name.as_str()).into());
    }

    match tokio::fs::metadata(&output).await {
        Ok(meta) => Ok(meta.len()),
        Err(err) => {
            remove_partial(&output).await;
            Err(PipelineError::Subprocess {
                tool: "pg_dump",
                reason: format!("dump file was not produced: {err}"),
            })
        }
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::info!(target: "stoner_backup", event = "partial_export_removed"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(
            target: "stoner_backup",
            event = "partial_export_cleanup_failed",
            path = %path.display(),
            error = %err
        ),
    }
}

fn export_sqlite_sync(db_path: &Path, dir: &Path, name: &ArtifactName) -> Result<u64, PipelineError> {
    let db_size = fs::metadata(db_path)
        .map_err(|err| PipelineError::internal("read database metadata", err))?
        .len();
    let required = required_free_bytes(db_size);
    let available =
        available_space(dir).map_err(|err| PipelineError::internal("check free disk space", err))?;
    if available < required {
        return Err(PipelineError::Internal(format!(
            "not enough disk space for backup: need {required} bytes, {available} available"
        )));
    }

    let partial: PathBuf = dir.join(format!("{}{PARTIAL_SUFFIX}", name.as_str()));
    let final_path = dir.join(name.as_str());
    let result = run_sqlite_backup(db_path, &partial).and_then(|()| {
        fs::rename(&partial, &final_path)
            .map_err(|err| PipelineError::internal("finalize backup file", err))
    });
    if let Err(err) = result {
        let _ = fs::remove_file(&partial);
        return Err(err);
    }
    fs::metadata(&final_path)
        .map(|meta| meta.len())
        .map_err(|err| PipelineError::internal("read backup metadata", err))
}

fn required_free_bytes(db_size: u64) -> u64 {
    (db_size as f64 * REQUIRED_FREE_MULTIPLIER).ceil() as u64
}

fn run_sqlite_backup(src: &Path, dest: &Path) -> Result<(), PipelineError> {
    let src_flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI;
    let src_conn = Connection::open_with_flags(src, src_flags)
        .map_err(|err| PipelineError::internal("open source database", err))?;
    let mut dest_conn = Connection::open(dest)
        .map_err(|err| PipelineError::internal("create backup database", err))?;

    {
        let backup = Backup::new(&src_conn, &mut dest_conn)
            .map_err(|err| PipelineError::internal("backup init", err))?;
        backup
            .step(-1)
            .map_err(|err| PipelineError::internal("backup step", err))?;
    }

    dest_conn.execute_batch("PRAGMA journal_mode=DELETE;").ok();
    dest_conn
        .close()
        .map_err(|(_, err)| PipelineError::internal("close backup database", err))?;
    src_conn
        .close()
        .map_err(|(_, err)| PipelineError::internal("close source database", err))?;
    Ok(())
}
