//! Shared test utilities for integration tests.

use std::sync::Arc;

use ccs::registry::ProfileRegistry;
use ccs::sessions::SessionManager;
use ccs::sessions::os::mock::MockProcessAdapter;
use ccs::store::{ConfigStore, StoreMode};
use ccs::utils::paths::CcsPaths;
use ccs::variants::VariantService;
use tempfile::TempDir;

/// Everything a scenario needs, rooted in one temp directory.
pub struct TestEnv {
    pub root: TempDir,
    pub paths: CcsPaths,
    pub registry: ProfileRegistry,
    pub sessions: SessionManager,
    pub variants: VariantService,
    pub adapter: Arc<MockProcessAdapter>,
}

/// Build a test environment in the given store mode. Unified mode seeds
/// an empty `config.yaml` so mode detection and composite creation see
/// a unified root.
#[must_use]
pub fn test_env(mode: StoreMode) -> TestEnv {
    let root = TempDir::new().expect("temp root");
    let paths = CcsPaths::new(root.path());
    if mode == StoreMode::Unified {
        std::fs::write(paths.unified_config_file(), "version: \"1.0\"\n")
            .expect("seed unified store");
    }
    let registry = ProfileRegistry::new(ConfigStore::new(&paths), mode);
    let adapter = Arc::new(MockProcessAdapter::new());
    let sessions = SessionManager::with_adapter(paths.clone(), Arc::clone(&adapter) as _);
    let variants = VariantService::new(paths.clone(), registry.clone(), sessions.clone());
    TestEnv {
        root,
        paths,
        registry,
        sessions,
        variants,
        adapter,
    }
}
