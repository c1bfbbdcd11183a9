//! Legacy profile store: `<root>/profiles.json`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::atomic::{read_json, write_json};
use crate::core::errors::Result;
use crate::core::profile::AccountRecord;

/// Version stamp written into fresh legacy stores.
pub const PROFILES_VERSION: &str = "2.0.0";

/// Marker forcing `type: account` on legacy entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountTag {
    /// The only value.
    #[serde(rename = "account")]
    Account,
}

/// One entry of the legacy store; the tag is explicit there (the unified
/// store omits it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyAccount {
    /// Literal `account` discriminator.
    #[serde(rename = "type")]
    pub tag: AccountTag,
    /// The account record proper.
    #[serde(flatten)]
    pub record: AccountRecord,
}

impl From<AccountRecord> for LegacyAccount {
    fn from(record: AccountRecord) -> Self {
        Self {
            tag: AccountTag::Account,
            record,
        }
    }
}

/// Full contents of `profiles.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilesFile {
    /// Store format version.
    pub version: String,
    /// Default profile name, if set.
    #[serde(default)]
    pub default: Option<String>,
    /// Accounts by name.
    #[serde(default)]
    pub profiles: BTreeMap<String, LegacyAccount>,
    /// Unknown fields round-trip untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for ProfilesFile {
    fn default() -> Self {
        Self {
            version: PROFILES_VERSION.to_owned(),
            default: None,
            profiles: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

/// Reader/writer for the legacy store. One logical mutation is one
/// `load` → mutate → `save`.
#[derive(Debug, Clone)]
pub struct ProfilesStore {
    path: PathBuf,
}

impl ProfilesStore {
    /// A store backed by the given file.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read the store; an absent file reads as the empty default.
    ///
    /// # Errors
    ///
    /// Parse failures are fatal and carry the path.
    pub fn load(&self) -> Result<ProfilesFile> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    /// Persist the store atomically.
    ///
    /// # Errors
    ///
    /// Returns an IO error with path context.
    pub fn save(&self, file: &ProfilesFile) -> Result<()> {
        write_json(&self.path, file)
    }
}
