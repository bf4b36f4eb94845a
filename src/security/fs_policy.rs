use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum FsPolicyError {
    #[error("UNC paths are not allowed")]
    UncRejected,
    #[error("Parent traversal is not allowed")]
    DotDotRejected,
    #[error("Path is outside the allowed root")]
    OutsideRoot,
    #[error("Symlinks are not allowed")]
    Symlink,
    #[error("File not found")]
    NotFound,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FsPolicyError {
    pub fn name(&self) -> &'static str {
        match self {
            FsPolicyError::UncRejected => "UncRejected",
            FsPolicyError::DotDotRejected => "DotDotRejected",
            FsPolicyError::OutsideRoot => "OutsideRoot",
            FsPolicyError::Symlink => "Symlink",
            FsPolicyError::NotFound => "NotFound",
            FsPolicyError::Io(_) => "Io",
        }
    }
}

fn not_found_or(err: io::Error) -> FsPolicyError {
    if err.kind() == io::ErrorKind::NotFound {
        FsPolicyError::NotFound
    } else {
        FsPolicyError::Io(err)
    }
}

/// Resolve a bare file name inside the flat directory `base`.
///
/// Rejects separators, `..`, UNC prefixes and symlinks, then confirms the
/// canonical result is still **within** the canonical base.
pub fn resolve_within(base: &Path, name: &str) -> Result<PathBuf, FsPolicyError> {
    let norm = name.replace('\\', "/");
    if norm.starts_with("//") {
        return Err(FsPolicyError::UncRejected);
    }
    if norm.split('/').any(|seg| seg == "..") {
        return Err(FsPolicyError::DotDotRejected);
    }
    if norm.contains('/') || Path::new(name).is_absolute() {
        return Err(FsPolicyError::OutsideRoot);
    }

    let base = fs::canonicalize(base).map_err(not_found_or)?;
    let candidate = base.join(name);
    let meta = fs::symlink_metadata(&candidate).map_err(not_found_or)?;
    if meta.file_type().is_symlink() {
        return Err(FsPolicyError::Symlink);
    }
    if !meta.is_file() {
        return Err(FsPolicyError::NotFound);
    }

    let real = fs::canonicalize(&candidate).map_err(not_found_or)?;
    if !real.starts_with(&base) {
        return Err(FsPolicyError::OutsideRoot);
    }
    Ok(real)
}
