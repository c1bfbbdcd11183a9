use std::path::{Path, PathBuf};

/// Default CLIProxy port; its session lock lives in `sessions.json`
/// rather than a port-suffixed file.
pub const DEFAULT_PROXY_PORT: u16 = 8317;

/// Resolve the CCS root directory.
///
/// `CCS_HOME` overrides the default of `~/.ccs`.
///
/// # Panics
///
/// Panics if neither `CCS_HOME` nor the home directory can be determined.
#[must_use]
pub fn base_dir() -> PathBuf {
    if let Ok(root) = std::env::var("CCS_HOME") {
        if !root.trim().is_empty() {
            return PathBuf::from(root);
        }
    }
    #[expect(clippy::expect_used, reason = "home directory is required for operation")]
    dirs::home_dir()
        .expect("Could not find home directory")
        .join(".ccs")
}

/// All on-disk locations CCS reads and writes, rooted at one directory.
///
/// Every component takes a `CcsPaths` instead of calling [`base_dir`]
/// directly so tests can point the whole tree at a temp directory.
#[derive(Debug, Clone)]
pub struct CcsPaths {
    root: PathBuf,
}

impl CcsPaths {
    /// Create a path set rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a path set rooted at the resolved CCS home.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(base_dir())
    }

    /// The CCS root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Legacy profile store: `<root>/profiles.json`.
    #[must_use]
    pub fn profiles_file(&self) -> PathBuf {
        self.root.join("profiles.json")
    }

    /// Unified store: `<root>/config.yaml`.
    #[must_use]
    pub fn unified_config_file(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    /// Root of all instance directories.
    #[must_use]
    pub fn instances_dir(&self) -> PathBuf {
        self.root.join("instances")
    }

    /// Isolated instance directory for a filesystem-sanitized account name.
    #[must_use]
    pub fn instance_dir(&self, sanitized: &str) -> PathBuf {
        self.instances_dir().join(sanitized)
    }

    /// Shared instance directory for a context group.
    #[must_use]
    pub fn shared_instance_dir(&self, group: &str) -> PathBuf {
        self.instances_dir().join("shared").join(group)
    }

    /// Default per-provider settings file: `<root>/<provider>.settings.json`.
    #[must_use]
    pub fn provider_settings_file(&self, provider: &str) -> PathBuf {
        self.root.join(format!("{provider}.settings.json"))
    }

    /// Per-variant settings file: `<root>/<provider>-<variant>.settings.json`.
    #[must_use]
    pub fn variant_settings_file(&self, provider: &str, variant: &str) -> PathBuf {
        self.root.join(format!("{provider}-{variant}.settings.json"))
    }

    /// Composite variant settings file: `<root>/composite-<variant>.settings.json`.
    #[must_use]
    pub fn composite_settings_file(&self, variant: &str) -> PathBuf {
        self.root.join(format!("composite-{variant}.settings.json"))
    }

    /// Directory holding CLIProxy locks, per-port configs, and the
    /// upstream OAuth account registry.
    #[must_use]
    pub fn cliproxy_dir(&self) -> PathBuf {
        self.root.join("cliproxy")
    }

    /// Session lock file for a port. The default port uses the bare
    /// `sessions.json` name.
    #[must_use]
    pub fn sessions_file(&self, port: u16) -> PathBuf {
        if port == DEFAULT_PROXY_PORT {
            self.cliproxy_dir().join("sessions.json")
        } else {
            self.cliproxy_dir().join(format!("sessions-{port}.json"))
        }
    }

    /// Per-port proxy config file written when a proxy is started.
    #[must_use]
    pub fn proxy_config_file(&self, port: u16) -> PathBuf {
        self.cliproxy_dir().join(format!("config-{port}.json"))
    }

    /// Directory for per-run log files.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Render a path as a `~`-relative string when it lives under the
    /// home directory, else absolute.
    ///
    /// Variant records persist their settings path in this form so the
    /// store stays readable when the home directory moves.
    #[must_use]
    pub fn display_path(&self, path: &Path) -> String {
        if let Some(home) = dirs::home_dir() {
            if let Ok(rest) = path.strip_prefix(&home) {
                return format!("~/{}", rest.display());
            }
        }
        path.display().to_string()
    }
}

/// Expand a leading tilde to the home directory.
#[must_use]
pub fn expand_tilde(path: &str) -> PathBuf {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            if let Some(rest) = path.strip_prefix("~/") {
                return home.join(rest);
            }
            if path == "~" {
                return home;
            }
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sessions_file_default_port() {
        let paths = CcsPaths::new("/tmp/ccs");
        assert_eq!(
            paths.sessions_file(DEFAULT_PROXY_PORT),
            PathBuf::from("/tmp/ccs/cliproxy/sessions.json")
        );
    }

    #[test]
    fn test_sessions_file_other_port() {
        let paths = CcsPaths::new("/tmp/ccs");
        assert_eq!(
            paths.sessions_file(8318),
            PathBuf::from("/tmp/ccs/cliproxy/sessions-8318.json")
        );
    }

    #[test]
    fn test_variant_settings_file_name() {
        let paths = CcsPaths::new("/tmp/ccs");
        assert_eq!(
            paths.variant_settings_file("gemini", "g3"),
            PathBuf::from("/tmp/ccs/gemini-g3.settings.json")
        );
    }

    #[test]
    fn test_composite_settings_file_name() {
        let paths = CcsPaths::new("/tmp/ccs");
        assert_eq!(
            paths.composite_settings_file("mix"),
            PathBuf::from("/tmp/ccs/composite-mix.settings.json")
        );
    }

    #[test]
    fn test_shared_instance_dir() {
        let paths = CcsPaths::new("/tmp/ccs");
        assert_eq!(
            paths.shared_instance_dir("sprint-a"),
            PathBuf::from("/tmp/ccs/instances/shared/sprint-a")
        );
    }

    #[test]
    fn test_expand_tilde_passthrough() {
        assert_eq!(
            expand_tilde("/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }

    #[test]
    fn test_expand_tilde_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde("~/x.json"), home.join("x.json"));
    }
}
