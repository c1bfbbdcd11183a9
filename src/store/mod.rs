//! On-disk configuration stores.
//!
//! The Config Store exclusively owns the bytes of `profiles.json` and
//! `config.yaml`; all writers route through it. One logical mutation is
//! one read → in-memory mutate → one atomic write.

/// Atomic tmp-and-rename persistence helpers.
pub mod atomic;
/// Legacy `profiles.json` store.
pub mod profiles;
/// Unified `config.yaml` store.
pub mod unified;

use crate::utils::paths::CcsPaths;

pub use profiles::{AccountTag, LegacyAccount, PROFILES_VERSION, ProfilesFile, ProfilesStore};
pub use unified::{
    CliproxyAuth, CliproxySection, CliproxyServerSection, GlobalEnv, LocalProxyServer,
    Preferences, RemoteProxyServer, UNIFIED_VERSION, UnifiedConfig, UnifiedStore,
};

/// Which store an operation targets.
///
/// Higher layers never branch on this: the Registry takes it at
/// construction and routes writes itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Accounts live in `profiles.json`.
    Legacy,
    /// Accounts live in `config.yaml`.
    Unified,
}

/// Detect the active store mode: unified when `config.yaml` exists or
/// the environment requests it via `CCS_UNIFIED=1`.
#[must_use]
pub fn detect_mode(paths: &CcsPaths) -> StoreMode {
    if paths.unified_config_file().is_file() {
        return StoreMode::Unified;
    }
    match std::env::var("CCS_UNIFIED") {
        Ok(v) if matches!(v.trim(), "1" | "true" | "yes") => StoreMode::Unified,
        _ => StoreMode::Legacy,
    }
}

/// Typed access to both stores for one CCS root.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    profiles: ProfilesStore,
    unified: UnifiedStore,
}

impl ConfigStore {
    /// A config store rooted at the given path set.
    #[must_use]
    pub fn new(paths: &CcsPaths) -> Self {
        Self {
            profiles: ProfilesStore::new(paths.profiles_file()),
            unified: UnifiedStore::new(paths.unified_config_file()),
        }
    }

    /// The legacy store.
    #[must_use]
    pub fn profiles(&self) -> &ProfilesStore {
        &self.profiles
    }

    /// The unified store.
    #[must_use]
    pub fn unified(&self) -> &UnifiedStore {
        &self.unified
    }

    /// Whether the unified file exists on disk.
    #[must_use]
    pub fn unified_exists(&self) -> bool {
        self.unified.exists()
    }
}
