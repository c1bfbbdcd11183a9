//! Variant settings files: `{env: {...}, hooks?, presets?, ...}`.
//!
//! Regenerating the six core env keys must preserve every other `env`
//! key and every non-`env` top-level field verbatim.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::core::errors::Result;
use crate::core::variant::{ALL_TIERS, CompositeTiers, TierName};
use crate::providers::Provider;
use crate::resolver::url::{local_provider_url, local_root_url};
use crate::store::atomic::{read_json, write_json};

/// Base-URL env key.
pub const ENV_BASE_URL: &str = "ANTHROPIC_BASE_URL";
/// Auth-token env key.
pub const ENV_AUTH_TOKEN: &str = "ANTHROPIC_AUTH_TOKEN";
/// Primary model env key.
pub const ENV_MODEL: &str = "ANTHROPIC_MODEL";

/// The six keys the Variant Service owns inside a settings file.
pub const CORE_ENV_KEYS: [&str; 6] = [
    ENV_BASE_URL,
    ENV_AUTH_TOKEN,
    ENV_MODEL,
    "ANTHROPIC_DEFAULT_OPUS_MODEL",
    "ANTHROPIC_DEFAULT_SONNET_MODEL",
    "ANTHROPIC_DEFAULT_HAIKU_MODEL",
];

/// One settings file. `hooks`, `presets`, and anything else the user
/// added live in `extra` and survive regeneration untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsFile {
    /// Env block consumed by the resolver.
    #[serde(default)]
    pub env: BTreeMap<String, serde_json::Value>,
    /// All non-`env` top-level fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SettingsFile {
    /// Read a settings file; absent reads as `None`.
    ///
    /// # Errors
    ///
    /// Parse failures are fatal and carry the path.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        read_json(path)
    }

    /// Persist atomically as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an IO error with path context.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    /// String value of an env key, if present and non-blank.
    #[must_use]
    pub fn env_str(&self, key: &str) -> Option<&str> {
        self.env
            .get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn set(&mut self, key: &str, value: impl Into<String>) {
        self.env
            .insert(key.to_owned(), serde_json::Value::String(value.into()));
    }

    /// Rewrite all six core keys for a single-provider route, keeping
    /// everything else.
    pub fn set_single_core(&mut self, provider: Provider, port: u16, model: &str, api_key: &str) {
        self.set(ENV_BASE_URL, local_provider_url(port, provider));
        self.set(ENV_AUTH_TOKEN, api_key);
        self.set_single_models(model);
    }

    /// Rewrite only the model-related core keys for a single-provider
    /// route. A single route serves every tier with the same model.
    pub fn set_single_models(&mut self, model: &str) {
        self.set(ENV_MODEL, model);
        for &tier in ALL_TIERS {
            self.set(tier.env_key(), model);
        }
    }

    /// Rewrite all six core keys for a composite route. The base URL is
    /// the proxy root; routing is by model name.
    pub fn set_composite_core(
        &mut self,
        port: u16,
        tiers: &CompositeTiers,
        default_tier: TierName,
        api_key: &str,
    ) {
        self.set(ENV_BASE_URL, local_root_url(port));
        self.set(ENV_AUTH_TOKEN, api_key);
        self.set_composite_models(tiers, default_tier);
    }

    /// Rewrite only the model-tier core keys for a composite route.
    pub fn set_composite_models(&mut self, tiers: &CompositeTiers, default_tier: TierName) {
        self.set(ENV_MODEL, tiers.get(default_tier).model.clone());
        for &tier in ALL_TIERS {
            self.set(tier.env_key(), tiers.get(tier).model.clone());
        }
    }
}

/// Fresh settings for a new single-provider variant.
#[must_use]
pub fn render_single(provider: Provider, port: u16, model: &str, api_key: &str) -> SettingsFile {
    let mut settings = SettingsFile::default();
    settings.set_single_core(provider, port, model, api_key);
    settings
}

/// Fresh settings for a new composite variant.
#[must_use]
pub fn render_composite(
    port: u16,
    tiers: &CompositeTiers,
    default_tier: TierName,
    api_key: &str,
) -> SettingsFile {
    let mut settings = SettingsFile::default();
    settings.set_composite_core(port, tiers, default_tier, api_key);
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::variant::TierSpec;
    use tempfile::TempDir;

    fn tiers() -> CompositeTiers {
        let tier = |provider, model: &str| TierSpec {
            provider,
            model: model.to_owned(),
            fallback: None,
            thinking: None,
            account: None,
            extra: BTreeMap::new(),
        };
        CompositeTiers {
            opus: tier(Provider::Agy, "claude-opus-4-6-thinking"),
            sonnet: tier(Provider::Agy, "claude-sonnet-4-5-thinking"),
            haiku: tier(Provider::Agy, "claude-haiku-4-5-20251001"),
        }
    }

    #[test]
    fn test_render_single_core_keys() {
        let s = render_single(Provider::Gemini, 8318, "gemini-2.5-pro", "sk-test");
        assert_eq!(
            s.env_str(ENV_BASE_URL),
            Some("http://127.0.0.1:8318/api/provider/gemini")
        );
        assert_eq!(s.env_str(ENV_AUTH_TOKEN), Some("sk-test"));
        assert_eq!(s.env_str(ENV_MODEL), Some("gemini-2.5-pro"));
        assert_eq!(
            s.env_str("ANTHROPIC_DEFAULT_HAIKU_MODEL"),
            Some("gemini-2.5-pro")
        );
        for key in CORE_ENV_KEYS {
            assert!(s.env.contains_key(key), "missing core key {key}");
        }
    }

    #[test]
    fn test_render_composite_uses_root_url() {
        let s = render_composite(8319, &tiers(), TierName::Sonnet, "sk-test");
        assert_eq!(s.env_str(ENV_BASE_URL), Some("http://127.0.0.1:8319"));
        assert_eq!(s.env_str(ENV_MODEL), Some("claude-sonnet-4-5-thinking"));
        assert_eq!(
            s.env_str("ANTHROPIC_DEFAULT_OPUS_MODEL"),
            Some("claude-opus-4-6-thinking")
        );
    }

    #[test]
    fn test_regeneration_preserves_user_keys() {
        let mut s = render_single(Provider::Gemini, 8318, "gemini-2.5-pro", "sk-test");
        s.env.insert(
            "ANTHROPIC_MAX_TOKENS".to_owned(),
            serde_json::Value::String("32000".to_owned()),
        );
        s.extra.insert(
            "hooks".to_owned(),
            serde_json::json!({"preLaunch": "echo hi"}),
        );
        s.extra
            .insert("presets".to_owned(), serde_json::json!(["fast"]));

        s.set_single_core(Provider::Codex, 8318, "gpt-5.3-codex", "sk-test");
        assert_eq!(s.env_str("ANTHROPIC_MAX_TOKENS"), Some("32000"));
        assert_eq!(s.extra["hooks"]["preLaunch"], "echo hi");
        assert_eq!(s.extra["presets"][0], "fast");
        assert_eq!(
            s.env_str(ENV_BASE_URL),
            Some("http://127.0.0.1:8318/api/provider/codex")
        );
    }

    #[test]
    fn test_model_only_update_keeps_url_and_token() {
        let mut s = render_single(Provider::Gemini, 8318, "gemini-2.5-pro", "sk-test");
        let url = s.env_str(ENV_BASE_URL).unwrap().to_owned();
        s.set_single_models("gemini-2.5-flash");
        assert_eq!(s.env_str(ENV_BASE_URL), Some(url.as_str()));
        assert_eq!(s.env_str(ENV_MODEL), Some("gemini-2.5-flash"));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gemini-g3.settings.json");
        let mut s = render_single(Provider::Gemini, 8318, "gemini-2.5-pro", "sk-test");
        s.extra.insert("hooks".to_owned(), serde_json::json!({}));
        s.save(&path).unwrap();
        let back = SettingsFile::load(&path).unwrap().unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn test_env_str_ignores_blank_and_nonstring() {
        let mut s = SettingsFile::default();
        s.env
            .insert("A".to_owned(), serde_json::Value::String("  ".to_owned()));
        s.env.insert("B".to_owned(), serde_json::json!(42));
        assert_eq!(s.env_str("A"), None);
        assert_eq!(s.env_str("B"), None);
        assert_eq!(s.env_str("C"), None);
    }
}
