//! Unified store: `<root>/config.yaml`.
//!
//! The unified file is a superset of the legacy store. Every section
//! tolerates and round-trips unknown keys so features the core does not
//! know about survive a rewrite.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::atomic::{read_yaml, write_yaml};
use crate::core::errors::Result;
use crate::core::profile::AccountRecord;
use crate::core::thinking::ThinkingConfig;
use crate::core::variant::VariantRecord;
use crate::providers::ProxyBackend;

/// Version stamp written into fresh unified stores.
pub const UNIFIED_VERSION: &str = "1.0";

/// `preferences` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preferences {
    /// Default profile name; overrides the legacy default when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,
    /// Unknown fields round-trip untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// `cliproxy.auth` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliproxyAuth {
    /// API key injected into variant settings files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Unknown fields round-trip untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// `cliproxy` section: the proxy-side state CCS manages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliproxySection {
    /// Upstream OAuth accounts; opaque to the core.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub oauth_accounts: BTreeMap<String, serde_json::Value>,
    /// Provider-level configuration; opaque to the core.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub providers: BTreeMap<String, serde_json::Value>,
    /// Variants by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variants: BTreeMap<String, VariantRecord>,
    /// Which CLIProxy build is installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<ProxyBackend>,
    /// Proxy auth configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<CliproxyAuth>,
    /// Binary the launcher spawns; defaults to `cliproxy` on PATH.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Unknown fields round-trip untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// `cliproxy_server.local` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalProxyServer {
    /// Default port override for the local proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Unknown fields round-trip untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// `cliproxy_server.remote` section; when enabled, resolved base URLs are
/// rewritten from loopback to this host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteProxyServer {
    /// Remote host name or address.
    pub host: String,
    /// Remote port; the protocol default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// `http` or `https`; defaults to `http`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Auth token replacing the local one when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Whether the rewrite is active.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Unknown fields round-trip untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

/// `cliproxy_server` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliproxyServerSection {
    /// Local proxy settings.
    #[serde(default)]
    pub local: LocalProxyServer,
    /// Remote proxy settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteProxyServer>,
    /// Unknown fields round-trip untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// `global_env` section: lowest-precedence env merged into every launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalEnv {
    /// Whether the section is applied at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Key/value pairs merged in below everything else.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Unknown fields round-trip untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for GlobalEnv {
    fn default() -> Self {
        Self {
            enabled: true,
            env: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

/// Full contents of `config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedConfig {
    /// Store format version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Accounts by name; the `type` tag is implicit here.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub accounts: BTreeMap<String, AccountRecord>,
    /// API-settings profiles; opaque to the core.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub profiles: BTreeMap<String, serde_json::Value>,
    /// User preferences.
    #[serde(default)]
    pub preferences: Preferences,
    /// CLIProxy state.
    #[serde(default)]
    pub cliproxy: CliproxySection,
    /// Local/remote proxy server settings.
    #[serde(default)]
    pub cliproxy_server: CliproxyServerSection,
    /// Thinking-suffix configuration.
    #[serde(default)]
    pub thinking: ThinkingConfig,
    /// Global env overlay.
    #[serde(default)]
    pub global_env: GlobalEnv,
    /// Unknown fields round-trip untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_version() -> String {
    UNIFIED_VERSION.to_owned()
}

impl Default for UnifiedConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            accounts: BTreeMap::new(),
            profiles: BTreeMap::new(),
            preferences: Preferences::default(),
            cliproxy: CliproxySection::default(),
            cliproxy_server: CliproxyServerSection::default(),
            thinking: ThinkingConfig::default(),
            global_env: GlobalEnv::default(),
            extra: BTreeMap::new(),
        }
    }
}

impl UnifiedConfig {
    /// Effective CLIProxy backend.
    #[must_use]
    pub fn backend(&self) -> ProxyBackend {
        self.cliproxy.backend.unwrap_or_default()
    }

    /// Effective proxy API key from config, if any.
    #[must_use]
    pub fn proxy_api_key(&self) -> Option<&str> {
        self.cliproxy
            .auth
            .as_ref()
            .and_then(|a| a.api_key.as_deref())
    }

    /// The active remote rewrite target, if configured and enabled.
    #[must_use]
    pub fn active_remote(&self) -> Option<&RemoteProxyServer> {
        self.cliproxy_server
            .remote
            .as_ref()
            .filter(|r| r.enabled && !r.host.trim().is_empty())
    }
}

/// Reader/writer for the unified store. One logical mutation is one
/// `load` → mutate → `save`.
#[derive(Debug, Clone)]
pub struct UnifiedStore {
    path: PathBuf,
}

impl UnifiedStore {
    /// A store backed by the given file.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Whether the backing file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the store; an absent file reads as the empty default.
    ///
    /// # Errors
    ///
    /// Parse failures are fatal and carry the path.
    pub fn load(&self) -> Result<UnifiedConfig> {
        Ok(read_yaml(&self.path)?.unwrap_or_default())
    }

    /// Persist the store atomically.
    ///
    /// # Errors
    ///
    /// Returns an IO error with path context.
    pub fn save(&self, config: &UnifiedConfig) -> Result<()> {
        write_yaml(&self.path, config)
    }
}
