use super::fs_policy::{resolve_within, FsPolicyError};
use tempfile::tempdir;

fn setup() -> tempfile::TempDir {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("backups")).unwrap();
    std::fs::write(dir.path().join("backups").join("dump.sql"), b"-- dump").unwrap();
    std::fs::write(dir.path().join("secret.txt"), b"secret").unwrap();
    dir
}

#[test]
fn reject_dotdot() {
    let tmp = setup();
    let err = resolve_within(&tmp.path().join("backups"), "../secret.txt").unwrap_err();
    assert!(matches!(err, FsPolicyError::DotDotRejected));
}

#[test]
fn reject_unc() {
    let tmp = setup();
    let err = resolve_within(&tmp.path().join("backups"), "\\\\server\\share\\x").unwrap_err();
    assert!(matches!(err, FsPolicyError::UncRejected));
}

#[test]
fn reject_nested_and_absolute() {
    let tmp = setup();
    let base = tmp.path().join("backups");
    assert!(matches!(
        resolve_within(&base, "nested/dump.sql").unwrap_err(),
        FsPolicyError::OutsideRoot
    ));
    let abs = tmp.path().join("secret.txt");
    assert!(matches!(
        resolve_within(&base, abs.to_str().unwrap()).unwrap_err(),
        FsPolicyError::OutsideRoot
    ));
}

#[test]
fn allow_plain_name_inside() {
    let tmp = setup();
    let base = tmp.path().join("backups");
    let res = resolve_within(&base, "dump.sql").unwrap();
    assert_eq!(res, std::fs::canonicalize(base.join("dump.sql")).unwrap());
}

#[test]
fn missing_file_is_not_found() {
    let tmp = setup();
    let err = resolve_within(&tmp.path().join("backups"), "absent.sql").unwrap_err();
    assert!(matches!(err, FsPolicyError::NotFound));
}

#[cfg(unix)]
#[test]
fn reject_symlinked_artifact() {
    use std::os::unix::fs::symlink;
    let tmp = setup();
    let base = tmp.path().join("backups");
    symlink(tmp.path().join("secret.txt"), base.join("link.sql")).unwrap();
    let err = resolve_within(&base, "link.sql").unwrap_err();
    assert!(matches!(err, FsPolicyError::Symlink));
}
