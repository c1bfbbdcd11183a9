//! Variant Service: transactional CRUD for CLIProxy variants.
//!
//! Every top-level operation is all-or-nothing: forward steps register
//! idempotent reversal closures that run in reverse on the error path.
//! Reversal failures are logged at debug and swallowed; they never
//! convert the primary outcome.

/// Port allocation.
pub mod ports;
/// Settings-file rendering and regeneration.
pub mod settings;

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::core::errors::{CcsError, Result};
use crate::core::profile::validate_profile_name;
use crate::core::variant::{
    CompositeTag, CompositeTiers, CompositeVariant, SingleVariant, Target, TierName, TiersPatch,
    VariantRecord,
};
use crate::providers::{BUILTIN_PROXY_API_KEY, Provider, ProxyBackend};
use crate::registry::ProfileRegistry;
use crate::sessions::SessionManager;
use crate::store::{StoreMode, UnifiedConfig};
use crate::utils::paths::{CcsPaths, expand_tilde};

pub use settings::SettingsFile;

/// Ordered stack of reversal closures; ran in reverse on failure.
struct Rollback {
    steps: Vec<(String, Box<dyn FnOnce() + Send>)>,
}

impl Rollback {
    fn new() -> Self {
        Self { steps: Vec::new() }
    }

    fn push(&mut self, label: impl Into<String>, step: impl FnOnce() + Send + 'static) {
        self.steps.push((label.into(), Box::new(step)));
    }

    /// Run every reversal, newest first.
    fn run(self) {
        for (label, step) in self.steps.into_iter().rev() {
            tracing::debug!(step = %label, "Rolling back");
            step();
        }
    }

    /// Forget the reversals; the operation committed.
    fn disarm(mut self) {
        self.steps.clear();
    }
}

/// Remove the port-keyed proxy artifacts a variant owns. Idempotent,
/// best-effort.
fn remove_port_artifacts(paths: &CcsPaths, port: u16) {
    let remove = |path: &Path| {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %path.display(), error = %e, "Failed to remove port artifact");
            }
        }
    };
    remove(&paths.sessions_file(port));
    let prefix = format!("config-{port}.");
    if let Ok(entries) = std::fs::read_dir(paths.cliproxy_dir()) {
        for entry in entries.filter_map(std::result::Result::ok) {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                remove(&entry.path());
            }
        }
    }
}

/// Best-effort file delete used by reversal closures.
fn remove_file_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %e, "Failed to remove file during rollback");
        }
    }
}

/// Partial update of a single-provider variant.
#[derive(Debug, Clone, Default)]
pub struct SingleUpdate {
    /// New provider; requires `model` as well.
    pub provider: Option<Provider>,
    /// New model.
    pub model: Option<String>,
    /// New upstream account pin.
    pub account: Option<String>,
    /// New child CLI target.
    pub target: Option<Target>,
}

/// Partial update of a composite variant.
#[derive(Debug, Clone, Default)]
pub struct CompositeUpdate {
    /// New default tier.
    pub default_tier: Option<TierName>,
    /// Per-tier patches, merged into the stored tiers.
    pub tiers: Option<TiersPatch>,
    /// New child CLI target.
    pub target: Option<Target>,
}

/// Listing row for a variant, as surfaced by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct VariantSummary {
    /// Variant name.
    pub name: String,
    /// Record kind: `single` or `composite`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Exclusive port.
    pub port: u16,
    /// Child CLI target.
    pub target: Target,
    /// Provider (single variants).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    /// Model (single variants).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Default tier (composite variants).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_tier: Option<TierName>,
    /// Tier map (composite variants).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiers: Option<CompositeTiers>,
    /// Whether any tier declares a fallback (composite variants).
    #[serde(rename = "hasFallback", skip_serializing_if = "Option::is_none")]
    pub has_fallback: Option<bool>,
    /// Settings path as stored.
    pub settings: String,
}

impl VariantSummary {
    fn from_record(name: String, record: VariantRecord) -> Self {
        match record {
            VariantRecord::Single(s) => Self {
                name,
                kind: "single",
                port: s.port,
                target: s.target,
                provider: Some(s.provider),
                model: s.model,
                default_tier: None,
                tiers: None,
                has_fallback: None,
                settings: s.settings,
            },
            VariantRecord::Composite(c) => Self {
                name,
                kind: "composite",
                port: c.port,
                target: c.target,
                provider: None,
                model: None,
                default_tier: Some(c.default_tier),
                has_fallback: Some(c.tiers.has_fallback()),
                tiers: Some(c.tiers),
                settings: c.settings,
            },
        }
    }
}

/// Transactional CRUD over CLIProxy variants.
#[derive(Debug, Clone)]
pub struct VariantService {
    paths: CcsPaths,
    registry: ProfileRegistry,
    sessions: SessionManager,
}

impl VariantService {
    /// A service over the given registry and session manager.
    #[must_use]
    pub fn new(paths: CcsPaths, registry: ProfileRegistry, sessions: SessionManager) -> Self {
        Self {
            paths,
            registry,
            sessions,
        }
    }

    fn load_config(&self) -> Result<UnifiedConfig> {
        self.registry.store().unified().load()
    }

    fn save_config(&self, config: &UnifiedConfig) -> Result<()> {
        self.registry.store().unified().save(config)
    }

    fn effective_api_key(config: &UnifiedConfig) -> String {
        config
            .proxy_api_key()
            .unwrap_or(BUILTIN_PROXY_API_KEY)
            .to_owned()
    }

    /// Name must be new across accounts and variants, and must not
    /// collide on disk with an existing profile.
    fn ensure_name_free(&self, name: &str) -> Result<()> {
        if self.registry.get_variant(name)?.is_some()
            || self.registry.get_all_accounts_merged()?.contains_key(name)
        {
            return Err(CcsError::ProfileExists {
                name: name.to_owned(),
            });
        }
        self.registry.check_filesystem_collision(name)
    }

    fn taken_ports(config: &UnifiedConfig) -> BTreeSet<u16> {
        config
            .cliproxy
            .variants
            .values()
            .map(VariantRecord::port)
            .collect()
    }

    fn reject_plus_only(config: &UnifiedConfig, provider: Provider) -> Result<()> {
        if config.backend() == ProxyBackend::Original && provider.plus_only() {
            return Err(CcsError::ProviderNeedsPlus {
                provider: provider.to_string(),
            });
        }
        Ok(())
    }

    /// Persist a variant record. The config is re-read immediately
    /// before writing to narrow the concurrent-writer window.
    fn persist_record(&self, name: &str, record: VariantRecord) -> Result<()> {
        let mut config = self.load_config()?;
        config.cliproxy.variants.insert(name.to_owned(), record);
        self.save_config(&config)
    }

    // ========== create ==========

    /// Create a single-provider variant: validate, allocate a port,
    /// render the settings file, persist the record.
    ///
    /// # Errors
    ///
    /// `validation`/`conflict` on bad input, `io` on store failures. On
    /// failure after allocation, the settings file and port artifacts
    /// are removed again.
    pub fn create_single(
        &self,
        name: &str,
        provider: Provider,
        model: String,
        account: Option<String>,
        target: Target,
    ) -> Result<SingleVariant> {
        validate_profile_name(name)?;
        self.ensure_name_free(name)?;

        let config = self.load_config()?;
        Self::reject_plus_only(&config, provider)?;
        if model.trim().is_empty() {
            return Err(CcsError::validation("Model must not be empty"));
        }

        let port = ports::allocate_port(&self.paths, &Self::taken_ports(&config))?;
        let api_key = Self::effective_api_key(&config);

        let settings_path = self.paths.variant_settings_file(provider.as_str(), name);
        settings::render_single(provider, port, &model, &api_key).save(&settings_path)?;

        let mut rollback = Rollback::new();
        {
            let path = settings_path.clone();
            rollback.push("remove settings file", move || remove_file_quietly(&path));
        }
        {
            let paths = self.paths.clone();
            rollback.push("remove port artifacts", move || {
                remove_port_artifacts(&paths, port);
            });
        }

        let record = SingleVariant {
            provider,
            model: Some(model),
            account,
            settings: self.paths.display_path(&settings_path),
            port,
            target,
            extra: BTreeMap::new(),
        };

        match self.persist_record(name, VariantRecord::Single(record.clone())) {
            Ok(()) => {
                rollback.disarm();
                tracing::info!(name, provider = %provider, port, "Created variant");
                Ok(record)
            }
            Err(e) => {
                rollback.run();
                Err(e)
            }
        }
    }

    /// Create a composite variant. Unified-store only; all three tiers
    /// are required and validated, including the fallback non-cycle.
    ///
    /// # Errors
    ///
    /// As [`Self::create_single`], plus `validation` when the registry
    /// is not in unified mode.
    pub fn create_composite(
        &self,
        name: &str,
        default_tier: TierName,
        tiers: CompositeTiers,
        target: Target,
    ) -> Result<CompositeVariant> {
        validate_profile_name(name)?;
        if self.registry.mode() != StoreMode::Unified {
            return Err(CcsError::CompositeNeedsUnified);
        }
        self.ensure_name_free(name)?;
        tiers.validate()?;

        let config = self.load_config()?;
        for &tier in crate::core::variant::ALL_TIERS {
            Self::reject_plus_only(&config, tiers.get(tier).provider)?;
        }

        let port = ports::allocate_port(&self.paths, &Self::taken_ports(&config))?;
        let api_key = Self::effective_api_key(&config);

        let settings_path = self.paths.composite_settings_file(name);
        settings::render_composite(port, &tiers, default_tier, &api_key).save(&settings_path)?;

        let mut rollback = Rollback::new();
        {
            let path = settings_path.clone();
            rollback.push("remove settings file", move || remove_file_quietly(&path));
        }
        {
            let paths = self.paths.clone();
            rollback.push("remove port artifacts", move || {
                remove_port_artifacts(&paths, port);
            });
        }

        let record = CompositeVariant {
            kind: CompositeTag::Composite,
            default_tier,
            tiers,
            settings: self.paths.display_path(&settings_path),
            port,
            target,
            extra: BTreeMap::new(),
        };

        match self.persist_record(name, VariantRecord::Composite(record.clone())) {
            Ok(()) => {
                rollback.disarm();
                tracing::info!(name, port, default_tier = %default_tier, "Created composite variant");
                Ok(record)
            }
            Err(e) => {
                rollback.run();
                Err(e)
            }
        }
    }

    // ========== update ==========

    fn get_required(&self, name: &str) -> Result<VariantRecord> {
        self.registry
            .get_variant(name)?
            .ok_or_else(|| CcsError::ProfileNotFound {
                name: name.to_owned(),
            })
    }

    /// Update a single-provider variant. A provider change rewrites all
    /// six core settings keys (and moves the settings file to the new
    /// provider prefix); a model-only change rewrites just the model
    /// keys. User keys and hooks survive either way.
    ///
    /// # Errors
    ///
    /// `not_found` for missing variants, `validation` for a provider
    /// change without a model, kind mismatch for composite records.
    pub fn update_single(&self, name: &str, update: SingleUpdate) -> Result<SingleVariant> {
        let record = match self.get_required(name)? {
            VariantRecord::Single(s) => s,
            other @ VariantRecord::Composite(_) => {
                return Err(CcsError::VariantKindMismatch {
                    name: name.to_owned(),
                    expected: "single",
                    actual: other.type_name(),
                });
            }
        };
        if update.provider.is_some() && update.model.is_none() {
            return Err(CcsError::validation(
                "Changing the provider requires --model with the new provider's model",
            ));
        }

        let config = self.load_config()?;
        if let Some(provider) = update.provider {
            Self::reject_plus_only(&config, provider)?;
        }

        let old_path = expand_tilde(&record.settings);
        let prior_settings = std::fs::read(&old_path).ok();

        let mut updated = record.clone();
        if let Some(provider) = update.provider {
            updated.provider = provider;
        }
        if let Some(model) = update.model.clone() {
            updated.model = Some(model);
        }
        if let Some(account) = update.account.clone() {
            updated.account = Some(account);
        }
        if let Some(target) = update.target {
            updated.target = target;
        }

        let mut rollback = Rollback::new();
        let model = updated
            .model
            .clone()
            .unwrap_or_else(|| updated.provider.default_model().to_owned());

        if let Some(provider) = update.provider {
            let api_key = Self::effective_api_key(&config);
            let mut settings_file = SettingsFile::load(&old_path)?.unwrap_or_default();
            let new_path = self.paths.variant_settings_file(provider.as_str(), name);
            settings_file.set_single_core(provider, updated.port, &model, &api_key);
            settings_file.save(&new_path)?;
            if new_path != old_path {
                let created = new_path.clone();
                rollback.push("remove relocated settings file", move || {
                    remove_file_quietly(&created);
                });
                remove_file_quietly(&old_path);
                let restore_path = old_path.clone();
                let restore_bytes = prior_settings.clone();
                rollback.push("restore prior settings file", move || {
                    if let Some(bytes) = restore_bytes {
                        let _ = std::fs::write(&restore_path, bytes);
                    }
                });
            }
            updated.settings = self.paths.display_path(&new_path);
        } else if update.model.is_some() {
            let mut settings_file = SettingsFile::load(&old_path)?.unwrap_or_default();
            settings_file.set_single_models(&model);
            settings_file.save(&old_path)?;
            let restore_path = old_path.clone();
            rollback.push("restore prior settings file", move || {
                if let Some(bytes) = prior_settings {
                    let _ = std::fs::write(&restore_path, bytes);
                }
            });
        }

        match self.persist_record(name, VariantRecord::Single(updated.clone())) {
            Ok(()) => {
                rollback.disarm();
                tracing::info!(name, "Updated variant");
                Ok(updated)
            }
            Err(e) => {
                rollback.run();
                Err(e)
            }
        }
    }

    /// Update a composite variant: deep-merge partial tiers, revalidate
    /// the full set, and regenerate the settings file in place (atomic
    /// rewrite; never delete-then-write).
    ///
    /// # Errors
    ///
    /// `not_found` for missing variants, kind mismatch for single
    /// records, `validation` when the merged tier set is invalid.
    pub fn update_composite(&self, name: &str, update: CompositeUpdate) -> Result<CompositeVariant> {
        let record = match self.get_required(name)? {
            VariantRecord::Composite(c) => c,
            other @ VariantRecord::Single(_) => {
                return Err(CcsError::VariantKindMismatch {
                    name: name.to_owned(),
                    expected: "composite",
                    actual: other.type_name(),
                });
            }
        };

        let mut updated = record.clone();
        if let Some(tiers) = update.tiers {
            updated.tiers.apply(tiers);
        }
        if let Some(default_tier) = update.default_tier {
            updated.default_tier = default_tier;
        }
        if let Some(target) = update.target {
            updated.target = target;
        }
        updated.validate()?;

        let config = self.load_config()?;
        for &tier in crate::core::variant::ALL_TIERS {
            Self::reject_plus_only(&config, updated.tiers.get(tier).provider)?;
        }

        let settings_path = expand_tilde(&updated.settings);
        let prior_settings = std::fs::read(&settings_path).ok();
        let mut settings_file = match SettingsFile::load(&settings_path)? {
            Some(existing) => existing,
            None => settings::render_composite(
                updated.port,
                &updated.tiers,
                updated.default_tier,
                &Self::effective_api_key(&config),
            ),
        };
        settings_file.set_composite_models(&updated.tiers, updated.default_tier);
        settings_file.save(&settings_path)?;

        let mut rollback = Rollback::new();
        {
            let restore_path = settings_path.clone();
            rollback.push("restore prior settings file", move || {
                if let Some(bytes) = prior_settings {
                    let _ = std::fs::write(&restore_path, bytes);
                } else {
                    remove_file_quietly(&restore_path);
                }
            });
        }

        match self.persist_record(name, VariantRecord::Composite(updated.clone())) {
            Ok(()) => {
                rollback.disarm();
                tracing::info!(name, "Updated composite variant");
                Ok(updated)
            }
            Err(e) => {
                rollback.run();
                Err(e)
            }
        }
    }

    // ========== remove ==========

    /// Remove a variant: refuse while its proxy has live sessions, then
    /// delete the settings file and port artifacts and drop the record.
    ///
    /// # Errors
    ///
    /// `conflict` while sessions are active, `not_found` for missing
    /// variants, `io` on store failures.
    pub fn remove(&self, name: &str) -> Result<VariantRecord> {
        let record = self.get_required(name)?;
        let port = record.port();

        let status = self.sessions.proxy_status(port);
        if status.running && status.session_count > 0 {
            return Err(CcsError::PortBusy {
                port,
                sessions: status.session_count,
            });
        }

        let settings_path = expand_tilde(record.settings());
        remove_file_quietly(&settings_path);
        remove_port_artifacts(&self.paths, port);

        let mut config = self.load_config()?;
        config.cliproxy.variants.remove(name);
        self.save_config(&config)?;
        tracing::info!(name, port, "Removed variant");
        Ok(record)
    }

    // ========== listing ==========

    /// All variant records by name.
    ///
    /// # Errors
    ///
    /// `io` on store failures.
    pub fn list(&self) -> Result<BTreeMap<String, VariantRecord>> {
        self.registry.get_variants()
    }

    /// Listing rows with the derived `type` and `hasFallback` fields.
    ///
    /// # Errors
    ///
    /// `io` on store failures.
    pub fn summaries(&self) -> Result<Vec<VariantSummary>> {
        Ok(self
            .list()?
            .into_iter()
            .map(|(name, record)| VariantSummary::from_record(name, record))
            .collect())
    }

    /// Absolute settings path for a variant record.
    #[must_use]
    pub fn settings_path(record: &VariantRecord) -> PathBuf {
        expand_tilde(record.settings())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::variant::{FallbackSpec, TierPatch, TierSpec};
    use crate::sessions::os::mock::MockProcessAdapter;
    use crate::store::ConfigStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> (VariantService, Arc<MockProcessAdapter>) {
        let paths = CcsPaths::new(dir.path());
        // Unified mode: composite operations require it.
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(paths.unified_config_file(), "version: \"1.0\"\n").unwrap();
        let registry = ProfileRegistry::new(ConfigStore::new(&paths), StoreMode::Unified);
        let adapter = Arc::new(MockProcessAdapter::new());
        let sessions = SessionManager::with_adapter(paths.clone(), Arc::clone(&adapter) as _);
        (
            VariantService::new(paths, registry, sessions),
            adapter,
        )
    }

    fn tier(provider: Provider, model: &str) -> TierSpec {
        TierSpec {
            provider,
            model: model.to_owned(),
            fallback: None,
            thinking: None,
            account: None,
            extra: BTreeMap::new(),
        }
    }

    fn tiers() -> CompositeTiers {
        CompositeTiers {
            opus: tier(Provider::Agy, "claude-opus-4-6-thinking"),
            sonnet: tier(Provider::Agy, "claude-sonnet-4-5-thinking"),
            haiku: tier(Provider::Agy, "claude-haiku-4-5-20251001"),
        }
    }

    #[test]
    fn test_create_single_writes_settings_and_record() {
        let dir = TempDir::new().unwrap();
        let (svc, _) = service(&dir);

        let record = svc
            .create_single(
                "g3",
                Provider::Gemini,
                "gemini-2.5-pro".to_owned(),
                None,
                Target::Claude,
            )
            .unwrap();

        let settings_path = dir.path().join("gemini-g3.settings.json");
        assert!(settings_path.is_file());
        let settings = SettingsFile::load(&settings_path).unwrap().unwrap();
        assert_eq!(
            settings.env_str(settings::ENV_BASE_URL),
            Some(format!("http://127.0.0.1:{}/api/provider/gemini", record.port).as_str())
        );

        let listed = svc.list().unwrap();
        assert_eq!(listed["g3"].port(), record.port);
        assert_eq!(listed["g3"].target(), Target::Claude);
    }

    #[test]
    fn test_create_duplicate_name_fails() {
        let dir = TempDir::new().unwrap();
        let (svc, _) = service(&dir);
        svc.create_single(
            "g3",
            Provider::Gemini,
            "gemini-2.5-pro".to_owned(),
            None,
            Target::Claude,
        )
        .unwrap();
        let err = svc
            .create_single(
                "g3",
                Provider::Codex,
                "gpt-5.3-codex".to_owned(),
                None,
                Target::Claude,
            )
            .unwrap_err();
        assert!(matches!(err, CcsError::ProfileExists { .. }));
    }

    #[test]
    fn test_create_many_distinct_ports() {
        let dir = TempDir::new().unwrap();
        let (svc, _) = service(&dir);
        let mut ports = BTreeSet::new();
        for i in 0..4 {
            let record = svc
                .create_single(
                    &format!("v{i}"),
                    Provider::Gemini,
                    "gemini-2.5-pro".to_owned(),
                    None,
                    Target::Claude,
                )
                .unwrap();
            assert!(ports.insert(record.port), "duplicate port {}", record.port);
            assert!(record.port >= ports::PORT_RANGE_START);
        }
    }

    #[test]
    fn test_plus_only_provider_rejected_on_original_backend() {
        let dir = TempDir::new().unwrap();
        let (svc, _) = service(&dir);
        let err = svc
            .create_single(
                "k1",
                Provider::Kiro,
                "claude-sonnet-4-5".to_owned(),
                None,
                Target::Claude,
            )
            .unwrap_err();
        assert!(matches!(err, CcsError::ProviderNeedsPlus { .. }));
    }

    #[test]
    fn test_create_composite_root_url_and_tiers() {
        let dir = TempDir::new().unwrap();
        let (svc, _) = service(&dir);
        let record = svc
            .create_composite("mix", TierName::Sonnet, tiers(), Target::Claude)
            .unwrap();

        let settings_path = dir.path().join("composite-mix.settings.json");
        let settings = SettingsFile::load(&settings_path).unwrap().unwrap();
        assert_eq!(
            settings.env_str(settings::ENV_BASE_URL),
            Some(format!("http://127.0.0.1:{}", record.port).as_str())
        );
        assert_eq!(
            settings.env_str(settings::ENV_MODEL),
            Some("claude-sonnet-4-5-thinking")
        );
        assert_eq!(
            settings.env_str("ANTHROPIC_DEFAULT_HAIKU_MODEL"),
            Some("claude-haiku-4-5-20251001")
        );
    }

    #[test]
    fn test_composite_rejects_fallback_cycle() {
        let dir = TempDir::new().unwrap();
        let (svc, _) = service(&dir);
        let mut bad = tiers();
        bad.sonnet.fallback = Some(FallbackSpec {
            provider: Provider::Agy,
            model: "claude-sonnet-4-5-thinking".to_owned(),
            extra: BTreeMap::new(),
        });
        let err = svc
            .create_composite("mix", TierName::Sonnet, bad, Target::Claude)
            .unwrap_err();
        assert!(matches!(err, CcsError::InvalidTier { .. }));
        assert!(!dir.path().join("composite-mix.settings.json").exists());
    }

    #[test]
    fn test_update_provider_requires_model() {
        let dir = TempDir::new().unwrap();
        let (svc, _) = service(&dir);
        svc.create_single(
            "g3",
            Provider::Gemini,
            "gemini-2.5-pro".to_owned(),
            None,
            Target::Claude,
        )
        .unwrap();
        let err = svc
            .update_single(
                "g3",
                SingleUpdate {
                    provider: Some(Provider::Codex),
                    ..SingleUpdate::default()
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("--model"));
    }

    #[test]
    fn test_update_provider_moves_settings_and_preserves_user_keys() {
        let dir = TempDir::new().unwrap();
        let (svc, _) = service(&dir);
        svc.create_single(
            "g3",
            Provider::Gemini,
            "gemini-2.5-pro".to_owned(),
            None,
            Target::Claude,
        )
        .unwrap();

        // User edits their settings file by hand.
        let old_path = dir.path().join("gemini-g3.settings.json");
        let mut settings = SettingsFile::load(&old_path).unwrap().unwrap();
        settings.env.insert(
            "ANTHROPIC_MAX_TOKENS".to_owned(),
            serde_json::Value::String("32000".to_owned()),
        );
        settings
            .extra
            .insert("hooks".to_owned(), serde_json::json!({"preLaunch": "x"}));
        settings.save(&old_path).unwrap();

        let updated = svc
            .update_single(
                "g3",
                SingleUpdate {
                    provider: Some(Provider::Codex),
                    model: Some("gpt-5.3-codex".to_owned()),
                    ..SingleUpdate::default()
                },
            )
            .unwrap();

        let new_path = dir.path().join("codex-g3.settings.json");
        assert!(new_path.is_file());
        assert!(!old_path.exists());
        assert!(updated.settings.ends_with("codex-g3.settings.json"));

        let moved = SettingsFile::load(&new_path).unwrap().unwrap();
        assert_eq!(moved.env_str("ANTHROPIC_MAX_TOKENS"), Some("32000"));
        assert_eq!(moved.extra["hooks"]["preLaunch"], "x");
        assert_eq!(
            moved.env_str(settings::ENV_BASE_URL),
            Some(format!("http://127.0.0.1:{}/api/provider/codex", updated.port).as_str())
        );
    }

    #[test]
    fn test_update_model_only_touches_model_keys() {
        let dir = TempDir::new().unwrap();
        let (svc, _) = service(&dir);
        svc.create_single(
            "g3",
            Provider::Gemini,
            "gemini-2.5-pro".to_owned(),
            None,
            Target::Claude,
        )
        .unwrap();
        let path = dir.path().join("gemini-g3.settings.json");
        let before = SettingsFile::load(&path).unwrap().unwrap();

        svc.update_single(
            "g3",
            SingleUpdate {
                model: Some("gemini-2.5-flash".to_owned()),
                ..SingleUpdate::default()
            },
        )
        .unwrap();

        let after = SettingsFile::load(&path).unwrap().unwrap();
        assert_eq!(
            after.env_str(settings::ENV_BASE_URL),
            before.env_str(settings::ENV_BASE_URL)
        );
        assert_eq!(after.env_str(settings::ENV_MODEL), Some("gemini-2.5-flash"));
    }

    #[test]
    fn test_update_single_refuses_composite() {
        let dir = TempDir::new().unwrap();
        let (svc, _) = service(&dir);
        svc.create_composite("mix", TierName::Sonnet, tiers(), Target::Claude)
            .unwrap();
        let err = svc
            .update_single(
                "mix",
                SingleUpdate {
                    model: Some("x".to_owned()),
                    ..SingleUpdate::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, CcsError::VariantKindMismatch { .. }));
    }

    #[test]
    fn test_update_composite_merges_partial_tiers() {
        let dir = TempDir::new().unwrap();
        let (svc, _) = service(&dir);
        let mut initial = tiers();
        initial.sonnet.thinking = Some(crate::core::thinking::ThinkingLevel::High);
        initial.sonnet.fallback = Some(FallbackSpec {
            provider: Provider::Gemini,
            model: "gemini-2.5-pro".to_owned(),
            extra: BTreeMap::new(),
        });
        svc.create_composite("mix", TierName::Sonnet, initial, Target::Claude)
            .unwrap();

        let updated = svc
            .update_composite(
                "mix",
                CompositeUpdate {
                    default_tier: Some(TierName::Opus),
                    tiers: Some(TiersPatch {
                        sonnet: Some(TierPatch {
                            model: Some("claude-sonnet-4-6-thinking".to_owned()),
                            ..TierPatch::default()
                        }),
                        ..TiersPatch::default()
                    }),
                    target: None,
                },
            )
            .unwrap();

        assert_eq!(updated.default_tier, TierName::Opus);
        assert_eq!(updated.tiers.sonnet.model, "claude-sonnet-4-6-thinking");
        assert!(updated.tiers.sonnet.fallback.is_some());
        assert_eq!(
            updated.tiers.sonnet.thinking,
            Some(crate::core::thinking::ThinkingLevel::High)
        );

        let settings =
            SettingsFile::load(&dir.path().join("composite-mix.settings.json")).unwrap().unwrap();
        assert_eq!(
            settings.env_str(settings::ENV_MODEL),
            Some("claude-opus-4-6-thinking")
        );
        assert_eq!(
            settings.env_str("ANTHROPIC_DEFAULT_SONNET_MODEL"),
            Some("claude-sonnet-4-6-thinking")
        );
    }

    #[test]
    fn test_remove_deletes_artifacts() {
        let dir = TempDir::new().unwrap();
        let (svc, _) = service(&dir);
        let record = svc
            .create_single(
                "g3",
                Provider::Gemini,
                "gemini-2.5-pro".to_owned(),
                None,
                Target::Claude,
            )
            .unwrap();
        let paths = CcsPaths::new(dir.path());
        std::fs::create_dir_all(paths.cliproxy_dir()).unwrap();
        std::fs::write(paths.proxy_config_file(record.port), "{}").unwrap();
        std::fs::write(paths.sessions_file(record.port), "{}").unwrap();

        let removed = svc.remove("g3").unwrap();
        assert_eq!(removed.port(), record.port);
        assert!(!dir.path().join("gemini-g3.settings.json").exists());
        assert!(!paths.proxy_config_file(record.port).exists());
        assert!(!paths.sessions_file(record.port).exists());
        assert!(svc.list().unwrap().is_empty());
    }

    #[test]
    fn test_remove_refuses_active_sessions() {
        let dir = TempDir::new().unwrap();
        let (svc, adapter) = service(&dir);
        let record = svc
            .create_single(
                "g3",
                Provider::Gemini,
                "gemini-2.5-pro".to_owned(),
                None,
                Target::Claude,
            )
            .unwrap();

        adapter.spawn(4242);
        let paths = CcsPaths::new(dir.path());
        let sessions = SessionManager::with_adapter(paths, Arc::clone(&adapter) as _);
        sessions
            .register_session(record.port, 4242, None, None, Target::Claude)
            .unwrap();

        let err = svc.remove("g3").unwrap_err();
        assert!(matches!(err, CcsError::PortBusy { .. }));
        assert!(svc.list().unwrap().contains_key("g3"));
    }

    #[test]
    fn test_summaries_carry_kind_and_fallback() {
        let dir = TempDir::new().unwrap();
        let (svc, _) = service(&dir);
        svc.create_single(
            "g3",
            Provider::Gemini,
            "gemini-2.5-pro".to_owned(),
            None,
            Target::Claude,
        )
        .unwrap();
        let mut with_fb = tiers();
        with_fb.haiku.fallback = Some(FallbackSpec {
            provider: Provider::Gemini,
            model: "gemini-2.5-flash".to_owned(),
            extra: BTreeMap::new(),
        });
        svc.create_composite("mix", TierName::Sonnet, with_fb, Target::Droid)
            .unwrap();

        let summaries = svc.summaries().unwrap();
        let g3 = summaries.iter().find(|s| s.name == "g3").unwrap();
        assert_eq!(g3.kind, "single");
        assert_eq!(g3.provider, Some(Provider::Gemini));
        let mix = summaries.iter().find(|s| s.name == "mix").unwrap();
        assert_eq!(mix.kind, "composite");
        assert_eq!(mix.has_fallback, Some(true));
        assert_eq!(mix.target, Target::Droid);
    }
}
