//! Backup artifacts on disk: generated names, listing, resolution and
//! retention for the flat backup directory.

pub mod sniff;
pub mod staging;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::db::StoreEngine;
use crate::error::PipelineError;
use crate::security::fs_policy::{resolve_within, FsPolicyError};

pub use sniff::{classify, sniff_bytes, sniff_file, ArtifactKind, SniffError};
pub use staging::{StagedUpload, StagingWriter};

const MAX_DISPLAY_NAME_CHARS: usize = 100;

static ARTIFACT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^backup-(postgresql|sqlite)-(\d{4})-(\d{2})-(\d{2})T(\d{2})-(\d{2})-(\d{2})-(\d{3})Z\.(sql|db)$",
    )
    .expect("artifact name pattern to compile")
});

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unsupported file type; allowed extensions are .sql, .db, .sqlite and .sqlite3")]
    UnsupportedExtension,
    #[error("no database file was uploaded")]
    MissingFile,
    #[error("malformed upload: {0}")]
    MalformedUpload(String),
    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },
    #[error("file of {size} bytes is smaller than the {minimum} byte minimum")]
    TooSmall { size: u64, minimum: u64 },
    #[error("invalid backup filename")]
    InvalidFilename,
    #[error("requested file is outside the backup directory")]
    PathOutsideBackupDir,
    #[error("invalid connection parameter {name}: {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: &'static str,
    },
    #[error("text dumps can only be restored into a PostgreSQL target")]
    EngineMismatch,
}

/// A filename that matches the generated artifact pattern, with the engine
/// and timestamp it encodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    name: String,
    engine: StoreEngine,
    created_at: DateTime<Utc>,
}

impl ArtifactName {
    /// `backup-<engine>-<ISO 8601 with ':' and '.' replaced by '-'>.<ext>`
    pub fn generate(engine: StoreEngine, at: DateTime<Utc>) -> Self {
        let stamp = at.format("%Y-%m-%dT%H-%M-%S-%3fZ");
        let name = format!(
            "backup-{}-{}.{}",
            engine.slug(),
            stamp,
            engine.artifact_extension()
        );
        // Truncate to whole milliseconds so parse(generate(t)) == t.
        let created_at = at
            - ChronoDuration::nanoseconds(i64::from(at.timestamp_subsec_nanos() % 1_000_000));
        Self {
            name,
            engine,
            created_at,
        }
    }

    pub fn parse(candidate: &str) -> Result<Self, ValidationError> {
        let caps = ARTIFACT_NAME
            .captures(candidate)
            .ok_or(ValidationError::InvalidFilename)?;
        let engine = StoreEngine::from_slug(&caps[1]).ok_or(ValidationError::InvalidFilename)?;
        if &caps[9] != engine.artifact_extension() {
            return Err(ValidationError::InvalidFilename);
        }
        let num = |idx: usize| caps[idx].parse::<u32>().ok();
        let created_at = (|| {
            let date = NaiveDate::from_ymd_opt(caps[2].parse().ok()?, num(3)?, num(4)?)?;
            let time = date.and_hms_milli_opt(num(5)?, num(6)?, num(7)?, num(8)?)?;
            Some(time.and_utc())
        })()
        .ok_or(ValidationError::InvalidFilename)?;
        Ok(Self {
            name: candidate.to_string(),
            engine,
            created_at,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> StoreEngine {
        self.engine
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl std::fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    pub filename: String,
    pub engine: StoreEngine,
    pub size_bytes: u64,
    pub created_at: String,
    pub modified_at: String,
}

/// Kind implied by a client-supplied filename. Only a coarse filter; the
/// content decides in [`sniff::classify`].
pub fn declared_kind(filename: &str) -> Result<ArtifactKind, ValidationError> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .ok_or(ValidationError::UnsupportedExtension)?;
    match ext.as_str() {
        "sql" => Ok(ArtifactKind::TextDump),
        "db" | "sqlite" | "sqlite3" => Ok(ArtifactKind::EmbeddedFile),
        _ => Err(ValidationError::UnsupportedExtension),
    }
}

/// Client filenames are only ever logged or audited, never used on disk.
pub fn sanitize_display_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    base.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_DISPLAY_NAME_CHARS)
        .collect()
}

/// Artifacts in `dir` whose names match the generated pattern, newest first.
pub fn list_artifacts(dir: &Path) -> Result<Vec<ArtifactInfo>, PipelineError> {
    let mut found = collect(dir)?;
    found.sort_by(|a, b| b.0.created_at().cmp(&a.0.created_at()));
    Ok(found.into_iter().map(|(_, info)| info).collect())
}

fn collect(dir: &Path) -> Result<Vec<(ArtifactName, ArtifactInfo)>, PipelineError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries =
        fs::read_dir(dir).map_err(|err| PipelineError::internal("read backup directory", err))?;

    let mut out = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(target: "stoner_backup", event = "skip_backup_entry", error = %err);
                continue;
            }
        };
        let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let Ok(name) = ArtifactName::parse(&file_name) else {
            continue;
        };
        let meta = match fs::symlink_metadata(entry.path()) {
            Ok(meta) if meta.is_file() => meta,
            _ => continue,
        };
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| name.created_at());
        let info = ArtifactInfo {
            filename: file_name,
            engine: name.engine(),
            size_bytes: meta.len(),
            created_at: name
                .created_at()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            modified_at: modified.to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        out.push((name, info));
    }
    Ok(out)
}

/// Validate `filename` against the generated pattern, then resolve it inside
/// `dir`. The pattern check runs before any file-system access.
pub fn resolve_artifact(dir: &Path, filename: &str) -> Result<(ArtifactName, PathBuf), PipelineError> {
    let name = ArtifactName::parse(filename)?;
    let path = resolve_within(dir, name.as_str()).map_err(|err| match err {
        FsPolicyError::NotFound => PipelineError::NotFound,
        FsPolicyError::Io(err) => PipelineError::internal("resolve artifact", err),
        other => {
            tracing::warn!(
                target: "stoner_backup",
                event = "artifact_path_rejected",
                reason = other.name(),
                filename = %name
            );
            PipelineError::Validation(ValidationError::PathOutsideBackupDir)
        }
    })?;
    Ok((name, path))
}

/// Remove one artifact, returning its size.
pub fn delete_artifact(dir: &Path, filename: &str) -> Result<(ArtifactName, u64), PipelineError> {
    let (name, path) = resolve_artifact(dir, filename)?;
    let size = fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0);
    fs::remove_file(&path).map_err(|err| PipelineError::internal("delete artifact", err))?;
    Ok((name, size))
}

/// Delete the oldest artifacts so at most `keep` remain. Failures are logged
/// and skipped.
pub fn prune_artifacts(dir: &Path, keep: usize) -> Result<Vec<String>, PipelineError> {
    let mut found = collect(dir)?;
    if found.len() <= keep {
        return Ok(Vec::new());
    }
    found.sort_by(|a, b| a.0.created_at().cmp(&b.0.created_at()));
    let excess = found.len() - keep;
    let mut removed = Vec::new();
    for (name, _) in found.into_iter().take(excess) {
        match fs::remove_file(dir.join(name.as_str())) {
            Ok(()) => removed.push(name.to_string()),
            Err(err) => tracing::warn!(
                target: "stoner_backup",
                event = "failed_to_remove_old_backup",
                filename = %name,
                error = %err
            ),
        }
    }
    Ok(removed)
}

/// A name for a new artifact that does not collide with an existing file.
pub fn unique_artifact_name(
    dir: &Path,
    engine: StoreEngine,
    at: DateTime<Utc>,
) -> Result<ArtifactName, PipelineError> {
    for offset in 0..100 {
        let candidate = ArtifactName::generate(engine, at + ChronoDuration::milliseconds(offset));
        let exists = dir.join(candidate.as_str()).exists()
            || dir.join(format!("{}.partial", candidate.as_str())).exists();
        if !exists {
            return Ok(candidate);
        }
    }
    Err(PipelineError::Internal(
        "unable to allocate a unique backup filename".into(),
    ))
}
