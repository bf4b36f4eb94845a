use std::path::Path;

use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use super::sniff::ArtifactKind;
use super::{declared_kind, sanitize_display_name, ValidationError};
use crate::config::StagingLimits;
use crate::error::PipelineError;

/// Streams an upload into a temporary file inside the upload directory.
///
/// The temporary file is removed when the writer (or the [`StagedUpload`]
/// it produces) is dropped, whichever way the request ends.
pub struct StagingWriter {
    file: File,
    path: TempPath,
    declared: ArtifactKind,
    display_name: String,
    written: u64,
    limits: StagingLimits,
}

/// A fully received upload that passed the extension and size gates.
#[derive(Debug)]
pub struct StagedUpload {
    path: TempPath,
    declared: ArtifactKind,
    display_name: String,
    size: u64,
}

impl StagingWriter {
    /// The extension is checked before anything touches the disk.
    pub async fn create(
        upload_dir: &Path,
        client_name: &str,
        limits: StagingLimits,
    ) -> Result<Self, PipelineError> {
        let declared = declared_kind(client_name)?;
        tokio::fs::create_dir_all(upload_dir)
            .await
            .map_err(|err| PipelineError::internal("create upload directory", err))?;
        let named = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(".part")
            .tempfile_in(upload_dir)
            .map_err(|err| PipelineError::internal("create staging file", err))?;
        let (file, path) = named.into_parts();
        Ok(Self {
            file: File::from_std(file),
            path,
            declared,
            display_name: sanitize_display_name(client_name),
            written: 0,
            limits,
        })
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), PipelineError> {
        let next = self.written.saturating_add(chunk.len() as u64);
        if next > self.limits.max_bytes {
            return Err(ValidationError::TooLarge {
                size: next,
                limit: self.limits.max_bytes,
            }
            .into());
        }
        self.file
            .write_all(chunk)
            .await
            .map_err(|err| PipelineError::internal("write staging file", err))?;
        self.written = next;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub async fn finish(mut self) -> Result<StagedUpload, PipelineError> {
        self.file
            .flush()
            .await
            .map_err(|err| PipelineError::internal("flush staging file", err))?;
        self.file
            .sync_all()
            .await
            .map_err(|err| PipelineError::internal("sync staging file", err))?;
        if self.written < self.limits.min_bytes {
            return Err(ValidationError::TooSmall {
                size: self.written,
                minimum: self.limits.min_bytes,
            }
            .into());
        }
        Ok(StagedUpload {
            path: self.path,
            declared: self.declared,
            display_name: self.display_name,
            size: self.written,
        })
    }
}

impl StagedUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn declared(&self) -> ArtifactKind {
        self.declared
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Remove the staged file now, logging instead of failing.
    pub fn discard(self) {
        if let Err(err) = self.path.close() {
            tracing::warn!(
                target: "stoner_backup",
                event = "staging_cleanup_failed",
                error = %err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const LIMITS: StagingLimits = StagingLimits {
        max_bytes: 1_000,
        min_bytes: 100,
    };

    fn staged_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|it| it.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn rejects_extension_before_creating_a_file() {
        let tmp = tempdir().unwrap();
        let uploads = tmp.path().join("uploads");
        let err = StagingWriter::create(&uploads, "evil.php", LIMITS)
            .await
            .err()
            .expect("extension rejected");
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::UnsupportedExtension)
        ));
        assert!(!uploads.exists());
    }

    #[tokio::test]
    async fn undersized_upload_is_rejected_and_removed() {
        let tmp = tempdir().unwrap();
        let mut writer = StagingWriter::create(tmp.path(), "tiny.sql", LIMITS)
            .await
            .unwrap();
        writer.write_chunk(&[b'-'; 50]).await.unwrap();
        let err = writer.finish().await.expect_err("too small");
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::TooSmall { size: 50, minimum: 100 })
        ));
        assert_eq!(staged_files(tmp.path()), 0);
    }

    #[tokio::test]
    async fn oversized_upload_stops_at_the_ceiling() {
        let tmp = tempdir().unwrap();
        let mut writer = StagingWriter::create(tmp.path(), "big.db", LIMITS)
            .await
            .unwrap();
        writer.write_chunk(&[0_u8; 600]).await.unwrap();
        let err = writer.write_chunk(&[0_u8; 600]).await.expect_err("too large");
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::TooLarge { size: 1_200, limit: 1_000 })
        ));
        assert_eq!(writer.written(), 600);
        drop(writer);
        assert_eq!(staged_files(tmp.path()), 0);
    }

    #[tokio::test]
    async fn staged_upload_is_removed_on_drop() {
        let tmp = tempdir().unwrap();
        let mut writer = StagingWriter::create(tmp.path(), "../x/dump.sql", LIMITS)
            .await
            .unwrap();
        writer.write_chunk(&[b'x'; 200]).await.unwrap();
        let staged = writer.finish().await.unwrap();
        assert_eq!(staged.size(), 200);
        assert_eq!(staged.display_name(), "dump.sql");
        assert_eq!(staged.declared(), ArtifactKind::TextDump);
        assert!(staged.path().exists());
        let path = staged.path().to_path_buf();
        drop(staged);
        assert!(!path.exists());
    }
}
