//! The record of service handles constructed once at startup and passed
//! to each command.

use crate::instances::InstanceManager;
use crate::registry::ProfileRegistry;
use crate::resolver::EnvResolver;
use crate::sessions::SessionManager;
use crate::store::{ConfigStore, StoreMode, detect_mode};
use crate::utils::paths::CcsPaths;
use crate::variants::VariantService;

/// All core services for one CCS root.
#[derive(Debug, Clone)]
pub struct Services {
    /// Filesystem layout.
    pub paths: CcsPaths,
    /// Profile namespace over both stores.
    pub registry: ProfileRegistry,
    /// Instance directories.
    pub instances: InstanceManager,
    /// Proxy session registry.
    pub sessions: SessionManager,
    /// Variant CRUD.
    pub variants: VariantService,
    /// Child environment composition.
    pub resolver: EnvResolver,
}

impl Services {
    /// Build the service record for a root, with the store mode
    /// detected from disk and environment.
    #[cfg(unix)]
    #[must_use]
    pub fn new(paths: CcsPaths) -> Self {
        let mode = detect_mode(&paths);
        Self::with_mode(paths, mode)
    }

    /// Build the service record with an explicit store mode.
    #[cfg(unix)]
    #[must_use]
    pub fn with_mode(paths: CcsPaths, mode: StoreMode) -> Self {
        let registry = ProfileRegistry::new(ConfigStore::new(&paths), mode);
        let sessions = SessionManager::new(paths.clone());
        let variants = VariantService::new(paths.clone(), registry.clone(), sessions.clone());
        Self {
            instances: InstanceManager::new(paths.clone()),
            resolver: EnvResolver::new(paths.clone()),
            registry,
            sessions,
            variants,
            paths,
        }
    }

    /// Build the service record from the ambient environment
    /// (`CCS_HOME` or `~/.ccs`).
    #[cfg(unix)]
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(CcsPaths::from_env())
    }
}
