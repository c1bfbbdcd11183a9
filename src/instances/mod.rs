//! Instance Manager: per-account workspace directories.
//!
//! The child CLI is pointed at these directories via `CLAUDE_CONFIG_DIR`.
//! Isolated accounts get `<root>/instances/<sanitized-name>/`; shared
//! accounts get `<root>/instances/shared/<group>/`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::errors::{CcsError, Result};
use crate::core::profile::{ContextPolicy, ContinuityMode, sanitize_name};
use crate::store::atomic::ensure_private_dir;
use crate::utils::paths::CcsPaths;

/// Host files seeded into a shared directory under deeper continuity.
/// The set covers the Claude CLI's session-memory state.
const DEEPER_CONTINUITY_FILES: &[&str] = &[".claude.json", "projects", "todos", "session-env"];

/// Materializes and removes instance directories.
#[derive(Debug, Clone)]
pub struct InstanceManager {
    paths: CcsPaths,
    host_source: PathBuf,
    deeper_files: Vec<String>,
}

impl InstanceManager {
    /// A manager rooted at the given path set, seeding deeper-continuity
    /// state from `~/.claude`.
    #[must_use]
    pub fn new(paths: CcsPaths) -> Self {
        let host_source = dirs::home_dir().unwrap_or_default().join(".claude");
        Self {
            paths,
            host_source,
            deeper_files: DEEPER_CONTINUITY_FILES
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
        }
    }

    /// Override the host directory deeper continuity copies from.
    #[must_use]
    pub fn with_host_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.host_source = source.into();
        self
    }

    /// Override the deeper-continuity file set.
    #[must_use]
    pub fn with_deeper_files(mut self, files: Vec<String>) -> Self {
        self.deeper_files = files;
        self
    }

    /// Ensure the instance directory for an account exists and return
    /// its absolute path. Idempotent.
    ///
    /// # Errors
    ///
    /// Directory creation failures propagate; a partially created
    /// directory is left in place (retry-safe).
    pub fn ensure_instance(&self, name: &str, policy: &ContextPolicy) -> Result<PathBuf> {
        match policy {
            ContextPolicy::Isolated => {
                let dir = self.paths.instance_dir(&sanitize_name(name));
                ensure_private_dir(&dir)?;
                Ok(dir)
            }
            ContextPolicy::Shared { group, continuity } => {
                let dir = self.paths.shared_instance_dir(group);
                ensure_private_dir(&dir)?;
                if *continuity == ContinuityMode::Deeper {
                    self.seed_deeper_state(&dir);
                }
                Ok(dir)
            }
        }
    }

    /// Remove an isolated account's instance directory. Shared
    /// directories are left alone: other accounts may depend on them.
    ///
    /// # Errors
    ///
    /// Removal failures propagate with path context.
    pub fn delete_instance(&self, name: &str, policy: &ContextPolicy) -> Result<()> {
        match policy {
            ContextPolicy::Isolated => {
                let dir = self.paths.instance_dir(&sanitize_name(name));
                match fs::remove_dir_all(&dir) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(CcsError::io(&dir, e)),
                }
            }
            ContextPolicy::Shared { group, .. } => {
                tracing::debug!(
                    name,
                    group,
                    "Shared instance left in place; other accounts may use it"
                );
                Ok(())
            }
        }
    }

    /// The instance path an account would use, without creating it.
    #[must_use]
    pub fn instance_path(&self, name: &str, policy: &ContextPolicy) -> PathBuf {
        match policy {
            ContextPolicy::Isolated => self.paths.instance_dir(&sanitize_name(name)),
            ContextPolicy::Shared { group, .. } => self.paths.shared_instance_dir(group),
        }
    }

    /// Copy the deeper-continuity file set into a shared directory.
    /// Idempotent and best-effort: entries already present are skipped,
    /// failures are logged and never block instance use.
    fn seed_deeper_state(&self, dir: &Path) {
        for entry in &self.deeper_files {
            let src = self.host_source.join(entry);
            let dst = dir.join(entry);
            if !src.exists() || dst.exists() {
                continue;
            }
            if let Err(e) = copy_tree(&src, &dst) {
                tracing::warn!(
                    source = %src.display(),
                    dest = %dst.display(),
                    error = %e,
                    "Failed to seed continuity state"
                );
            }
        }
    }
}

/// Copy a file or directory tree.
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    if src.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_tree(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> InstanceManager {
        InstanceManager::new(CcsPaths::new(dir.path()))
    }

    #[test]
    fn test_isolated_instance_created_idempotently() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let first = mgr.ensure_instance("Work", &ContextPolicy::Isolated).unwrap();
        let second = mgr.ensure_instance("Work", &ContextPolicy::Isolated).unwrap();
        assert_eq!(first, second);
        assert!(first.ends_with("instances/work"));
        assert!(first.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_isolated_instance_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let path = mgr.ensure_instance("work", &ContextPolicy::Isolated).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[test]
    fn test_shared_instances_converge_on_group() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let policy = ContextPolicy::Shared {
            group: "sprint-a".to_owned(),
            continuity: ContinuityMode::Standard,
        };
        let a = mgr.ensure_instance("alpha", &policy).unwrap();
        let b = mgr.ensure_instance("beta", &policy).unwrap();
        assert_eq!(a, b);
        assert!(a.ends_with("instances/shared/sprint-a"));
    }

    #[test]
    fn test_delete_isolated_removes_directory() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let path = mgr.ensure_instance("work", &ContextPolicy::Isolated).unwrap();
        mgr.delete_instance("work", &ContextPolicy::Isolated).unwrap();
        assert!(!path.exists());
        // Deleting again is a no-op.
        mgr.delete_instance("work", &ContextPolicy::Isolated).unwrap();
    }

    #[test]
    fn test_delete_shared_is_noop() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let policy = ContextPolicy::Shared {
            group: "team".to_owned(),
            continuity: ContinuityMode::Standard,
        };
        let path = mgr.ensure_instance("alpha", &policy).unwrap();
        mgr.delete_instance("alpha", &policy).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_deeper_continuity_seeds_once() {
        let root = TempDir::new().unwrap();
        let host = TempDir::new().unwrap();
        fs::write(host.path().join(".claude.json"), "{\"host\":true}").unwrap();
        fs::create_dir_all(host.path().join("projects/p1")).unwrap();
        fs::write(host.path().join("projects/p1/session.jsonl"), "x").unwrap();

        let mgr = manager(&root).with_host_source(host.path());
        let policy = ContextPolicy::Shared {
            group: "team".to_owned(),
            continuity: ContinuityMode::Deeper,
        };
        let dir = mgr.ensure_instance("alpha", &policy).unwrap();
        assert_eq!(
            fs::read_to_string(dir.join(".claude.json")).unwrap(),
            "{\"host\":true}"
        );
        assert!(dir.join("projects/p1/session.jsonl").is_file());

        // Second call must not clobber local mutations.
        fs::write(dir.join(".claude.json"), "{\"local\":true}").unwrap();
        mgr.ensure_instance("beta", &policy).unwrap();
        assert_eq!(
            fs::read_to_string(dir.join(".claude.json")).unwrap(),
            "{\"local\":true}"
        );
    }

    #[test]
    fn test_deeper_continuity_missing_host_is_fine() {
        let root = TempDir::new().unwrap();
        let mgr = manager(&root).with_host_source("/nonexistent/claude");
        let policy = ContextPolicy::Shared {
            group: "team".to_owned(),
            continuity: ContinuityMode::Deeper,
        };
        assert!(mgr.ensure_instance("alpha", &policy).is_ok());
    }
}
