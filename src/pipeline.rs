//! Operations exposed to the HTTP and CLI shells.
//!
//! Each one takes the [`PipelineContext`] explicitly and emits exactly one
//! audit event per attempt, success or failure.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use tokio::io::AsyncReadExt;
use tokio::task;

use crate::artifact::{
    self, classify, ArtifactInfo, ArtifactKind, ArtifactName, SniffError, StagedUpload,
    StagingWriter,
};
use crate::audit::{Actor, AuditAction, AuditEvent};
use crate::db::backup::{self, ExportOutcome};
use crate::db::SequenceState;
use crate::error::PipelineError;
use crate::import::{
    execute_import, restore_text_dump, validate_source, EmbeddedSource, ImportJob, ImportReport,
    SchemaViolation,
};
use crate::state::{OperationGuard, PipelineContext};

const COPY_CHUNK_BYTES: usize = 64 * 1024;

/// Produce a new artifact from the target store and apply retention.
pub async fn export_database(
    ctx: &PipelineContext,
    actor: &Actor,
) -> Result<ExportOutcome, PipelineError> {
    let result = match ctx.begin_operation() {
        Ok(_guard) => backup::export_database(&ctx.config).await,
        Err(err) => Err(err),
    };
    let event = match &result {
        Ok(outcome) => AuditEvent::success(actor, AuditAction::DatabaseBackup)
            .with_bytes(outcome.size_bytes)
            .with_artifact(outcome.filename.clone()),
        Err(err) => AuditEvent::failure(actor, AuditAction::DatabaseBackup, err),
    };
    ctx.audit.emit(event);
    result
}

/// Import a staged upload. The caller holds `_guard` from before the upload
/// was received. The staged file is removed before this returns.
pub async fn import_staged(
    ctx: &PipelineContext,
    _guard: &OperationGuard,
    actor: &Actor,
    upload: StagedUpload,
) -> Result<ImportReport, PipelineError> {
    let result = run_import(ctx, &upload).await;
    match &result {
        Ok(report) => {
            tracing::info!(
                target: "stoner_backup",
                event = "import_finished",
                format = ?report.format,
                rows = report.total_rows,
                elapsed_ms = report.elapsed_ms
            );
            ctx.audit.emit(
                AuditEvent::success(actor, AuditAction::DatabaseImport)
                    .with_bytes(upload.size())
                    .with_original_name(upload.display_name()),
            );
        }
        Err(err) => {
            log_import_failure(err);
            ctx.audit.emit(
                AuditEvent::failure(actor, AuditAction::DatabaseImport, err)
                    .with_bytes(upload.size())
                    .with_original_name(upload.display_name()),
            );
        }
    }
    upload.discard();
    result
}

/// Audit an import that failed before a staged upload existed (busy store,
/// bad extension, size limits).
pub fn audit_import_failure(
    ctx: &PipelineContext,
    actor: &Actor,
    display_name: Option<&str>,
    err: &PipelineError,
) {
    log_import_failure(err);
    let mut event = AuditEvent::failure(actor, AuditAction::DatabaseImport, err);
    if let Some(name) = display_name {
        event = event.with_original_name(name);
    }
    ctx.audit.emit(event);
}

fn log_import_failure(err: &PipelineError) {
    tracing::warn!(
        target: "stoner_backup",
        event = "import_failed",
        code = err.code(),
        phase = err.phase().as_str(),
        retry_safe = err.retry_safe(),
        error = %err
    );
}

async fn run_import(ctx: &PipelineContext, upload: &StagedUpload) -> Result<ImportReport, PipelineError> {
    let kind = classify(upload.path(), upload.declared())
        .await
        .map_err(|err| match err {
            SniffError::Io(err) => PipelineError::internal("read staged upload", err),
            other => PipelineError::Format(other),
        })?;
    tracing::info!(
        target: "stoner_backup",
        event = "import_started",
        format = ?kind,
        size_bytes = upload.size(),
        original_name = upload.display_name()
    );

    match kind {
        ArtifactKind::EmbeddedFile => import_embedded(ctx, upload).await,
        ArtifactKind::TextDump => {
            let started = Instant::now();
            restore_text_dump(&ctx.config, upload.path(), upload.display_name()).await?;
            Ok(ImportReport {
                format: ArtifactKind::TextDump,
                size_bytes: upload.size(),
                total_rows: 0,
                elapsed_ms: started.elapsed().as_millis() as u64,
                tables: BTreeMap::new(),
                sequences: Vec::new(),
            })
        }
        ArtifactKind::Unrecognized => Err(SniffError::Unrecognized.into()),
    }
}

async fn import_embedded(
    ctx: &PipelineContext,
    upload: &StagedUpload,
) -> Result<ImportReport, PipelineError> {
    let mut job = ImportJob::new(ArtifactKind::EmbeddedFile, upload.size());
    let source = EmbeddedSource::open(upload.path())
        .await
        .map_err(SchemaViolation::Catalog)?;
    let outcome = validate_and_apply(ctx, &source, &mut job).await;
    source.close().await;
    let sequences = outcome?;
    Ok(job.finish(sequences))
}

async fn validate_and_apply(
    ctx: &PipelineContext,
    source: &EmbeddedSource,
    job: &mut ImportJob,
) -> Result<Vec<SequenceState>, PipelineError> {
    let validated = validate_source(source).await?;
    let summary = execute_import(&ctx.store, source, &validated, ctx.config.batch_size, job).await?;
    Ok(summary.sequences)
}

/// Stage a local file the same way an HTTP upload is staged.
pub async fn stage_file(ctx: &PipelineContext, path: &Path) -> Result<StagedUpload, PipelineError> {
    let client_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let mut writer =
        StagingWriter::create(&ctx.config.upload_dir, client_name, ctx.config.staging_limits())
            .await?;
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|err| PipelineError::internal("open import file", err))?;
    let mut buf = vec![0_u8; COPY_CHUNK_BYTES];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|err| PipelineError::internal("read import file", err))?;
        if n == 0 {
            break;
        }
        writer.write_chunk(&buf[..n]).await?;
    }
    writer.finish().await
}

pub async fn list_artifacts(ctx: &PipelineContext) -> Result<Vec<ArtifactInfo>, PipelineError> {
    let dir = ctx.config.backup_dir.clone();
    task::spawn_blocking(move || artifact::list_artifacts(&dir))
        .await
        .map_err(|err| PipelineError::internal("list task panicked", err))?
}

/// An artifact opened for streaming to a client.
#[derive(Debug)]
pub struct ArtifactDownload {
    pub name: ArtifactName,
    pub file: tokio::fs::File,
    pub size: u64,
}

pub async fn open_artifact(
    ctx: &PipelineContext,
    actor: &Actor,
    filename: &str,
) -> Result<ArtifactDownload, PipelineError> {
    let result = open_resolved(ctx, filename).await;
    let event = match &result {
        Ok(download) => AuditEvent::success(actor, AuditAction::BackupDownload)
            .with_bytes(download.size)
            .with_artifact(download.name.as_str()),
        Err(err) => AuditEvent::failure(actor, AuditAction::BackupDownload, err),
    };
    ctx.audit.emit(event);
    result
}

async fn open_resolved(ctx: &PipelineContext, filename: &str) -> Result<ArtifactDownload, PipelineError> {
    let (name, path) = artifact::resolve_artifact(&ctx.config.backup_dir, filename)?;
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|err| PipelineError::internal("open artifact", err))?;
    let size = file
        .metadata()
        .await
        .map_err(|err| PipelineError::internal("read artifact metadata", err))?
        .len();
    Ok(ArtifactDownload { name, file, size })
}

pub async fn delete_artifact(
    ctx: &PipelineContext,
    actor: &Actor,
    filename: &str,
) -> Result<String, PipelineError> {
    let dir = ctx.config.backup_dir.clone();
    let requested = filename.to_string();
    let result = task::spawn_blocking(move || artifact::delete_artifact(&dir, &requested))
        .await
        .map_err(|err| PipelineError::internal("delete task panicked", err))
        .and_then(|inner| inner);
    let event = match &result {
        Ok((name, size)) => {
            tracing::info!(target: "stoner_backup", event = "artifact_deleted", filename = %name);
            AuditEvent::success(actor, AuditAction::BackupDelete)
                .with_bytes(*size)
                .with_artifact(name.as_str())
        }
        Err(err) => AuditEvent::failure(actor, AuditAction::BackupDelete, err),
    };
    ctx.audit.emit(event);
    result.map(|(name, _)| name.to_string())
}
