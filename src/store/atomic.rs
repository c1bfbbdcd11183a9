//! Atomic file persistence: write to a tmp sibling, then rename.
//!
//! A crash between the tmp write and the rename leaves the previous file
//! intact; readers never observe a truncated store.

use std::fs;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::errors::{CcsError, Result};

/// Create a directory (and parents) with mode `0700`.
///
/// # Errors
///
/// Returns an IO error with path context.
pub fn ensure_private_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| CcsError::io(dir, e))?;
    restrict_mode(dir, 0o700)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| CcsError::io(path, e))
}

#[cfg(not(unix))]
fn restrict_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// `<path>.tmp.<pid>` next to the target file.
fn tmp_sibling(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".tmp.{}", std::process::id()));
    path.with_file_name(name)
}

/// Write bytes atomically: tmp sibling, mode `0600`, rename over the
/// target. The tmp file is removed on any failure.
///
/// # Errors
///
/// Returns an IO error with path context.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| CcsError::io(path, std::io::Error::other("path has no parent")))?;
    ensure_private_dir(parent)?;

    let tmp = tmp_sibling(path);
    let write = || -> Result<()> {
        fs::write(&tmp, bytes).map_err(|e| CcsError::io(&tmp, e))?;
        restrict_mode(&tmp, 0o600)?;
        fs::rename(&tmp, path).map_err(|e| CcsError::io(path, e))?;
        Ok(())
    };
    write().inspect_err(|_| {
        if let Err(e) = fs::remove_file(&tmp) {
            tracing::debug!(tmp = %tmp.display(), error = %e, "Failed to remove tmp file");
        }
    })
}

/// Serialize as pretty two-space JSON with a trailing newline and write
/// atomically.
///
/// # Errors
///
/// Returns an IO error with path context; serialization failures are
/// reported as parse errors.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut text =
        serde_json::to_string_pretty(value).map_err(|e| CcsError::parse(path, e.to_string()))?;
    text.push('\n');
    write_atomic(path, text.as_bytes())
}

/// Serialize as block-style YAML and write atomically.
///
/// # Errors
///
/// Returns an IO error with path context; serialization failures are
/// reported as parse errors.
pub fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_yaml::to_string(value).map_err(|e| CcsError::parse(path, e.to_string()))?;
    write_atomic(path, text.as_bytes())
}

/// Read and parse a JSON file; an absent file yields `None`.
///
/// # Errors
///
/// Parse failures are fatal and carry the path.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| CcsError::parse(path, e.to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CcsError::io(path, e)),
    }
}

/// Read and parse a YAML file; an absent file yields `None`.
///
/// # Errors
///
/// Parse failures are fatal and carry the path.
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(text) => serde_yaml::from_str(&text)
            .map(Some)
            .map_err(|e| CcsError::parse(path, e.to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CcsError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/file.json");
        write_atomic(&path, b"{}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{}");
    }

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.json");
        write_atomic(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("tmp"))
            .collect();
        assert!(leftovers.is_empty(), "tmp files left behind: {leftovers:?}");
    }

    #[cfg(unix)]
    #[test]
    fn test_write_atomic_modes() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub/file.json");
        write_atomic(&path, b"{}").unwrap();
        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        let dir_mode = fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(file_mode, 0o600);
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn test_read_json_absent_is_none() {
        let dir = TempDir::new().unwrap();
        let got: Option<serde_json::Value> = read_json(&dir.path().join("nope.json")).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn test_read_json_parse_failure_carries_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();
        let err = read_json::<serde_json::Value>(&path).unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn test_json_output_shape() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shape.json");
        write_json(&path, &serde_json::json!({"a": {"b": 1}})).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.ends_with('\n'));
        assert!(text.contains("  \"a\""), "two-space indent expected");
    }

    #[test]
    fn test_interrupted_write_preserves_old_file() {
        // Simulate the crash window: a stale tmp sibling exists from a
        // dead writer. The target must still read as the old content and
        // the next write must succeed.
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        write_atomic(&path, b"old").unwrap();
        fs::write(super::tmp_sibling(&path), b"half-writ").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"old");
        write_atomic(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }
}
