use std::fmt;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncReadExt;

/// Header every SQLite database file starts with.
pub const EMBEDDED_MAGIC: &[u8; 15] = b"SQLite format 3";
/// Substrings `pg_dump` writes near the top of a plain-text dump.
pub const TEXT_DUMP_MARKERS: [&str; 2] = ["PostgreSQL database dump", "pg_dump"];
pub const SNIFF_WINDOW: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    EmbeddedFile,
    TextDump,
    Unrecognized,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArtifactKind::EmbeddedFile => "a SQLite database file",
            ArtifactKind::TextDump => "a PostgreSQL text dump",
            ArtifactKind::Unrecognized => "an unrecognized format",
        })
    }
}

#[derive(Debug, Error)]
pub enum SniffError {
    #[error("file content is neither a SQLite database nor a PostgreSQL text dump")]
    Unrecognized,
    #[error("file extension claims {declared} but the content is {detected}")]
    KindMismatch {
        declared: ArtifactKind,
        detected: ArtifactKind,
    },
    #[error("failed to read uploaded file: {0}")]
    Io(#[from] std::io::Error),
}

pub fn sniff_bytes(head: &[u8]) -> ArtifactKind {
    if head.starts_with(EMBEDDED_MAGIC) {
        return ArtifactKind::EmbeddedFile;
    }
    let window = &head[..head.len().min(SNIFF_WINDOW)];
    let text = String::from_utf8_lossy(window);
    if TEXT_DUMP_MARKERS.iter().any(|marker| text.contains(marker)) {
        return ArtifactKind::TextDump;
    }
    ArtifactKind::Unrecognized
}

pub async fn sniff_file(path: &Path) -> std::io::Result<ArtifactKind> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut head = vec![0_u8; SNIFF_WINDOW];
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    head.truncate(filled);
    Ok(sniff_bytes(&head))
}

/// Classify by content. The declared kind (from the extension) must agree
/// with what the bytes say.
pub async fn classify(path: &Path, declared: ArtifactKind) -> Result<ArtifactKind, SniffError> {
    let detected = sniff_file(path).await?;
    match detected {
        ArtifactKind::Unrecognized => Err(SniffError::Unrecognized),
        detected if detected != declared => Err(SniffError::KindMismatch { declared, detected }),
        detected => Ok(detected),
    }
}
