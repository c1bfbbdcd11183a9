//! Account profiles, profile-name rules, and context-policy normalization.
//!
//! Normalization here is the single point of truth: both store reads and
//! store writes pass every account record through [`AccountRecord::normalize`]
//! so malformed on-disk state canonicalizes in memory without rewriting
//! the file.

use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use super::errors::{CcsError, Result};

/// Maximum length of a profile name.
pub const MAX_NAME_LEN: usize = 32;

/// Maximum length of a context group.
pub const MAX_GROUP_LEN: usize = 64;

/// Group used when a shared account has no (valid) group of its own.
pub const DEFAULT_CONTEXT_GROUP: &str = "default";

/// Names that cannot be used for profiles because they collide with CLI
/// words or on-disk directories.
const RESERVED_NAMES: &[&str] = &[
    "default", "shared", "instances", "cliproxy", "auth", "config", "env", "help", "version",
    "all", "none",
];

/// Case-insensitive Windows device names; creating a directory with one of
/// these breaks on NTFS even under WSL interop.
const WINDOWS_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Validate a profile name against the naming rules.
///
/// Names must match `^[A-Za-z][A-Za-z0-9._-]*$`, be at most
/// [`MAX_NAME_LEN`] characters, and avoid reserved and Windows device
/// names.
///
/// # Errors
///
/// Returns a validation error describing the first violated rule.
pub fn validate_profile_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| CcsError::InvalidName {
        name: name.to_owned(),
        reason: reason.to_owned(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name is longer than 32 characters"));
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap_or_default();
    if !first.is_ascii_alphabetic() {
        return Err(invalid("name must start with a letter"));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) {
        return Err(invalid(
            "name may only contain letters, digits, '.', '_', and '-'",
        ));
    }
    if RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name)) {
        return Err(invalid("name is reserved"));
    }
    if WINDOWS_DEVICE_NAMES
        .iter()
        .any(|d| d.eq_ignore_ascii_case(name))
    {
        return Err(invalid("name is a Windows device name"));
    }
    Ok(())
}

/// Filesystem-sanitized form of a profile name.
///
/// Any character outside `[A-Za-z0-9_-]` becomes `-`; the result is
/// lowercased. Two profiles whose sanitized forms collide cannot coexist
/// (they would share an instance directory).
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Workspace-context mode of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    /// Each account gets its own configuration directory.
    #[default]
    Isolated,
    /// Accounts in the same group share one configuration directory.
    Shared,
}

/// Continuity depth for shared-context accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContinuityMode {
    /// The child CLI populates project state on its own.
    #[default]
    Standard,
    /// Session-memory files are seeded into the shared directory.
    Deeper,
}

/// Lenient string-or-anything helper for fields that must tolerate
/// malformed persisted values.
#[derive(Deserialize)]
#[serde(untagged)]
enum MaybeString {
    Text(String),
    Other(IgnoredAny),
}

impl MaybeString {
    fn into_option(self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s),
            Self::Other(_) => None,
        }
    }
}

impl<'de> Deserialize<'de> for ContextMode {
    fn deserialize<D: Deserializer<'de>>(de: D) -> std::result::Result<Self, D::Error> {
        // Anything that is not literally "shared" collapses to isolated.
        let raw = Option::<MaybeString>::deserialize(de)?;
        Ok(match raw.and_then(MaybeString::into_option) {
            Some(s) if s.eq_ignore_ascii_case("shared") => Self::Shared,
            _ => Self::Isolated,
        })
    }
}

impl<'de> Deserialize<'de> for ContinuityMode {
    fn deserialize<D: Deserializer<'de>>(de: D) -> std::result::Result<Self, D::Error> {
        // Unknown continuity collapses to standard.
        let raw = Option::<MaybeString>::deserialize(de)?;
        Ok(match raw.and_then(MaybeString::into_option) {
            Some(s) if s.eq_ignore_ascii_case("deeper") => Self::Deeper,
            _ => Self::Standard,
        })
    }
}

fn de_lenient_group<'de, D: Deserializer<'de>>(
    de: D,
) -> std::result::Result<Option<String>, D::Error> {
    // A non-string persisted group is dropped without raising.
    let raw = Option::<MaybeString>::deserialize(de)?;
    Ok(raw.and_then(MaybeString::into_option))
}

/// One isolated login into the upstream Claude CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    /// When the account was created (RFC 3339 UTC).
    pub created: DateTime<Utc>,

    /// Last time the account was launched, if ever.
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,

    /// Workspace-context mode; defaults to isolated.
    #[serde(default)]
    pub context_mode: ContextMode,

    /// Context group; present iff `context_mode` is shared.
    #[serde(
        default,
        deserialize_with = "de_lenient_group",
        skip_serializing_if = "Option::is_none"
    )]
    pub context_group: Option<String>,

    /// Continuity depth; present iff `context_mode` is shared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuity_mode: Option<ContinuityMode>,

    /// Unknown fields round-trip untouched for forward compatibility.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl AccountRecord {
    /// Create a fresh isolated account record.
    #[must_use]
    pub fn new(created: DateTime<Utc>) -> Self {
        Self {
            created,
            last_used: None,
            context_mode: ContextMode::Isolated,
            context_group: None,
            continuity_mode: None,
            extra: BTreeMap::new(),
        }
    }

    /// Canonicalize context fields in place.
    ///
    /// Non-shared modes never carry a group or continuity mode; a shared
    /// account with a missing or invalid group falls back to
    /// [`DEFAULT_CONTEXT_GROUP`] and a missing continuity mode to
    /// standard. Idempotent.
    pub fn normalize(&mut self) {
        match self.context_mode {
            ContextMode::Isolated => {
                self.context_group = None;
                self.continuity_mode = None;
            }
            ContextMode::Shared => {
                self.context_group = Some(
                    self.context_group
                        .as_deref()
                        .and_then(normalize_context_group)
                        .unwrap_or_else(|| DEFAULT_CONTEXT_GROUP.to_owned()),
                );
                self.continuity_mode = Some(self.continuity_mode.unwrap_or_default());
            }
        }
    }

    /// A normalized copy of this record.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mut copy = self.clone();
        copy.normalize();
        copy
    }

    /// Whether this account shares its workspace context.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.context_mode == ContextMode::Shared
    }

    /// The context policy the Instance Manager materializes.
    #[must_use]
    pub fn context_policy(&self) -> ContextPolicy {
        let record = self.normalized();
        match record.context_mode {
            ContextMode::Isolated => ContextPolicy::Isolated,
            ContextMode::Shared => ContextPolicy::Shared {
                group: record
                    .context_group
                    .unwrap_or_else(|| DEFAULT_CONTEXT_GROUP.to_owned()),
                continuity: record.continuity_mode.unwrap_or_default(),
            },
        }
    }
}

/// Normalize a raw context group: trim, lowercase, whitespace runs become
/// `-`. Returns `None` when the result is empty or fails validation.
#[must_use]
pub fn normalize_context_group(raw: &str) -> Option<String> {
    let collapsed: String = raw
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");
    if collapsed.is_empty() {
        return None;
    }
    validate_context_group(&collapsed).ok().map(|()| collapsed)
}

/// Validate an already-normalized context group.
///
/// # Errors
///
/// Returns a validation error when the group violates
/// `^[A-Za-z][A-Za-z0-9_-]*$` or the length limit.
pub fn validate_context_group(group: &str) -> Result<()> {
    let invalid = |reason: &str| CcsError::InvalidContextGroup {
        group: group.to_owned(),
        reason: reason.to_owned(),
    };
    if group.is_empty() {
        return Err(invalid("group is empty"));
    }
    if group.len() > MAX_GROUP_LEN {
        return Err(invalid("group is longer than 64 characters"));
    }
    let mut chars = group.chars();
    if !chars.next().unwrap_or_default().is_ascii_alphabetic() {
        return Err(invalid("group must start with a letter"));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-')) {
        return Err(invalid(
            "group may only contain letters, digits, '_', and '-'",
        ));
    }
    Ok(())
}

/// Context policy derived from a normalized account record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextPolicy {
    /// Own configuration directory per account.
    Isolated,
    /// Group-shared configuration directory.
    Shared {
        /// Normalized group name.
        group: String,
        /// Continuity depth for seeding project state.
        continuity: ContinuityMode,
    },
}
