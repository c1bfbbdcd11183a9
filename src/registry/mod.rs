//! Profile Registry: one logical namespace over both stores.
//!
//! The registry is constructed for an explicit [`StoreMode`]; higher
//! layers never branch on mode. Account reads and writes pass through
//! the canonical normalization in [`crate::core::profile`]; malformed
//! on-disk records canonicalize in memory without rewriting the file.

use chrono::Utc;
use std::collections::BTreeMap;

use crate::core::errors::{CcsError, Result};
use crate::core::profile::{AccountRecord, sanitize_name, validate_profile_name};
use crate::core::variant::VariantRecord;
use crate::store::{ConfigStore, StoreMode};

/// Any profile a name can resolve to.
#[derive(Debug, Clone)]
pub enum ResolvedProfile {
    /// An isolated-login account.
    Account(AccountRecord),
    /// A CLIProxy variant (single or composite).
    Variant(VariantRecord),
}

/// The unified profile namespace over the legacy and unified stores.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    store: ConfigStore,
    mode: StoreMode,
}

impl ProfileRegistry {
    /// A registry over the given store, targeting the given mode.
    #[must_use]
    pub fn new(store: ConfigStore, mode: StoreMode) -> Self {
        Self { store, mode }
    }

    /// The mode this registry writes accounts to.
    #[must_use]
    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    /// Borrow the underlying config store.
    #[must_use]
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    // ========== accounts ==========

    /// Create an account in the chosen store.
    ///
    /// Validates the name, refuses duplicates (unless `force`), and
    /// refuses names whose sanitized form collides with any existing
    /// profile. Does not touch the default pointer.
    ///
    /// # Errors
    ///
    /// `validation` for bad names and collisions, `conflict` for
    /// duplicates, `io` on store failures.
    pub fn create_account(&self, name: &str, record: AccountRecord, force: bool) -> Result<()> {
        validate_profile_name(name)?;
        if !force && self.has_account(name)? {
            return Err(CcsError::ProfileExists {
                name: name.to_owned(),
            });
        }
        self.check_filesystem_collision(name)?;

        let record = record.normalized();
        match self.mode {
            StoreMode::Legacy => {
                let mut file = self.store.profiles().load()?;
                file.profiles.insert(name.to_owned(), record.into());
                self.store.profiles().save(&file)
            }
            StoreMode::Unified => {
                let mut config = self.store.unified().load()?;
                config.accounts.insert(name.to_owned(), record);
                self.store.unified().save(&config)
            }
        }
    }

    /// Merge-then-normalize an update into an existing account.
    ///
    /// # Errors
    ///
    /// `not_found` when the account is absent from the chosen store.
    pub fn update_account(
        &self,
        name: &str,
        mutate: impl FnOnce(&mut AccountRecord),
    ) -> Result<()> {
        match self.mode {
            StoreMode::Legacy => {
                let mut file = self.store.profiles().load()?;
                let entry =
                    file.profiles
                        .get_mut(name)
                        .ok_or_else(|| CcsError::ProfileNotFound {
                            name: name.to_owned(),
                        })?;
                mutate(&mut entry.record);
                entry.record.normalize();
                self.store.profiles().save(&file)
            }
            StoreMode::Unified => {
                let mut config = self.store.unified().load()?;
                let record =
                    config
                        .accounts
                        .get_mut(name)
                        .ok_or_else(|| CcsError::ProfileNotFound {
                            name: name.to_owned(),
                        })?;
                mutate(record);
                record.normalize();
                self.store.unified().save(&config)
            }
        }
    }

    /// Remove an account and return its record.
    ///
    /// In the legacy store a removed default reassigns to the first
    /// remaining account; in the unified store the default is cleared.
    ///
    /// # Errors
    ///
    /// `not_found` when the account is absent from the chosen store.
    pub fn remove_account(&self, name: &str) -> Result<AccountRecord> {
        match self.mode {
            StoreMode::Legacy => {
                let mut file = self.store.profiles().load()?;
                let removed =
                    file.profiles
                        .remove(name)
                        .ok_or_else(|| CcsError::ProfileNotFound {
                            name: name.to_owned(),
                        })?;
                if file.default.as_deref() == Some(name) {
                    file.default = file.profiles.keys().next().cloned();
                }
                self.store.profiles().save(&file)?;
                Ok(removed.record.normalized())
            }
            StoreMode::Unified => {
                let mut config = self.store.unified().load()?;
                let removed =
                    config
                        .accounts
                        .remove(name)
                        .ok_or_else(|| CcsError::ProfileNotFound {
                            name: name.to_owned(),
                        })?;
                if config.preferences.default_profile.as_deref() == Some(name) {
                    config.preferences.default_profile = None;
                }
                self.store.unified().save(&config)?;
                Ok(removed.normalized())
            }
        }
    }

    /// Stamp the account's `last_used` with the current UTC time.
    ///
    /// # Errors
    ///
    /// `not_found` when the account is absent from the chosen store.
    pub fn touch_account(&self, name: &str) -> Result<()> {
        self.update_account(name, |record| {
            record.last_used = Some(Utc::now());
        })
    }

    /// Whether the chosen store holds this account.
    ///
    /// # Errors
    ///
    /// `io` on store failures.
    pub fn has_account(&self, name: &str) -> Result<bool> {
        Ok(match self.mode {
            StoreMode::Legacy => self.store.profiles().load()?.profiles.contains_key(name),
            StoreMode::Unified => self.store.unified().load()?.accounts.contains_key(name),
        })
    }

    /// A normalized copy of the account, if present in the chosen store.
    ///
    /// # Errors
    ///
    /// `io` on store failures.
    pub fn get_account(&self, name: &str) -> Result<Option<AccountRecord>> {
        Ok(match self.mode {
            StoreMode::Legacy => self
                .store
                .profiles()
                .load()?
                .profiles
                .remove(name)
                .map(|entry| entry.record.normalized()),
            StoreMode::Unified => self
                .store
                .unified()
                .load()?
                .accounts
                .remove(name)
                .map(|record| record.normalized()),
        })
    }

    /// All accounts in the chosen store, normalized.
    ///
    /// # Errors
    ///
    /// `io` on store failures.
    pub fn get_all_accounts(&self) -> Result<BTreeMap<String, AccountRecord>> {
        Ok(match self.mode {
            StoreMode::Legacy => self
                .store
                .profiles()
                .load()?
                .profiles
                .into_iter()
                .map(|(name, entry)| (name, entry.record.normalized()))
                .collect(),
            StoreMode::Unified => self
                .store
                .unified()
                .load()?
                .accounts
                .into_iter()
                .map(|(name, record)| (name, record.normalized()))
                .collect(),
        })
    }

    /// All accounts across both stores: legacy entries first, unified
    /// entries overwrite same-name keys.
    ///
    /// # Errors
    ///
    /// `io` on store failures.
    pub fn get_all_accounts_merged(&self) -> Result<BTreeMap<String, AccountRecord>> {
        let mut merged: BTreeMap<String, AccountRecord> = self
            .store
            .profiles()
            .load()?
            .profiles
            .into_iter()
            .map(|(name, entry)| (name, entry.record.normalized()))
            .collect();
        for (name, record) in self.store.unified().load()?.accounts {
            merged.insert(name, record.normalized());
        }
        Ok(merged)
    }

    // ========== variants ==========

    /// All variants. Variants always live in the unified file.
    ///
    /// # Errors
    ///
    /// `io` on store failures.
    pub fn get_variants(&self) -> Result<BTreeMap<String, VariantRecord>> {
        Ok(self.store.unified().load()?.cliproxy.variants)
    }

    /// One variant by name.
    ///
    /// # Errors
    ///
    /// `io` on store failures.
    pub fn get_variant(&self, name: &str) -> Result<Option<VariantRecord>> {
        Ok(self.store.unified().load()?.cliproxy.variants.remove(name))
    }

    // ========== resolution ==========

    /// Resolve a name to any profile kind. Variants shadow same-name
    /// accounts, matching the merged-namespace precedence.
    ///
    /// # Errors
    ///
    /// `not_found` when no profile carries the name.
    pub fn resolve(&self, name: &str) -> Result<ResolvedProfile> {
        if let Some(variant) = self.get_variant(name)? {
            return Ok(ResolvedProfile::Variant(variant));
        }
        if let Some(record) = self.get_all_accounts_merged()?.remove(name) {
            return Ok(ResolvedProfile::Account(record));
        }
        Err(CcsError::ProfileNotFound {
            name: name.to_owned(),
        })
    }

    // ========== default pointer ==========

    /// The chosen store's default pointer.
    ///
    /// # Errors
    ///
    /// `io` on store failures.
    pub fn get_default(&self) -> Result<Option<String>> {
        Ok(match self.mode {
            StoreMode::Legacy => self.store.profiles().load()?.default,
            StoreMode::Unified => self.store.unified().load()?.preferences.default_profile,
        })
    }

    /// The effective default: unified if set, else legacy.
    ///
    /// # Errors
    ///
    /// `io` on store failures.
    pub fn get_default_resolved(&self) -> Result<Option<String>> {
        if let Some(name) = self.store.unified().load()?.preferences.default_profile {
            return Ok(Some(name));
        }
        Ok(self.store.profiles().load()?.default)
    }

    /// Point the chosen store's default at a resolvable profile.
    ///
    /// # Errors
    ///
    /// `not_found` when the name does not resolve.
    pub fn set_default(&self, name: &str) -> Result<()> {
        self.resolve(name)?;
        match self.mode {
            StoreMode::Legacy => {
                let mut file = self.store.profiles().load()?;
                file.default = Some(name.to_owned());
                self.store.profiles().save(&file)
            }
            StoreMode::Unified => {
                let mut config = self.store.unified().load()?;
                config.preferences.default_profile = Some(name.to_owned());
                self.store.unified().save(&config)
            }
        }
    }

    /// Clear the chosen store's default pointer.
    ///
    /// # Errors
    ///
    /// `io` on store failures.
    pub fn clear_default(&self) -> Result<()> {
        match self.mode {
            StoreMode::Legacy => {
                let mut file = self.store.profiles().load()?;
                file.default = None;
                self.store.profiles().save(&file)
            }
            StoreMode::Unified => {
                let mut config = self.store.unified().load()?;
                config.preferences.default_profile = None;
                self.store.unified().save(&config)
            }
        }
    }

    // ========== collision checks ==========

    /// Refuse names whose sanitized form collides with an existing
    /// profile of a different spelling.
    pub(crate) fn check_filesystem_collision(&self, name: &str) -> Result<()> {
        let sanitized = sanitize_name(name);
        let mut existing: Vec<String> = self.get_all_accounts_merged()?.into_keys().collect();
        existing.extend(self.get_variants()?.into_keys());
        for other in existing {
            if other != name && sanitize_name(&other) == sanitized {
                return Err(CcsError::FilesystemCollision {
                    name: name.to_owned(),
                    existing: other,
                });
            }
        }
        Ok(())
    }
}
