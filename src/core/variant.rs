//! Variant records: single-provider routes and composite tier maps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::errors::{CcsError, Result};
use super::thinking::ThinkingLevel;
use crate::providers::Provider;

/// Child CLI a profile launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// The `claude` CLI.
    #[default]
    Claude,
    /// The `droid` CLI.
    Droid,
}

impl Target {
    /// Binary name of the child CLI.
    #[must_use]
    pub const fn binary(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Droid => "droid",
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.binary())
    }
}

impl std::str::FromStr for Target {
    type Err = CcsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "droid" => Ok(Self::Droid),
            other => Err(CcsError::validation(format!(
                "Unknown target '{other}' (use 'claude' or 'droid')"
            ))),
        }
    }
}

/// The three Claude model tiers a composite variant routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierName {
    /// Largest tier.
    Opus,
    /// Default tier.
    Sonnet,
    /// Fastest tier.
    Haiku,
}

/// All tiers, in opus/sonnet/haiku order.
pub const ALL_TIERS: &[TierName] = &[TierName::Opus, TierName::Sonnet, TierName::Haiku];

impl TierName {
    /// Lowercase tier name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Opus => "opus",
            Self::Sonnet => "sonnet",
            Self::Haiku => "haiku",
        }
    }

    /// Env key carrying this tier's model.
    #[must_use]
    pub const fn env_key(self) -> &'static str {
        match self {
            Self::Opus => "ANTHROPIC_DEFAULT_OPUS_MODEL",
            Self::Sonnet => "ANTHROPIC_DEFAULT_SONNET_MODEL",
            Self::Haiku => "ANTHROPIC_DEFAULT_HAIKU_MODEL",
        }
    }

    /// Infer the tier from a model name by substring; anything that is
    /// neither opus nor haiku counts as sonnet.
    #[must_use]
    pub fn detect(model: &str) -> Self {
        let lower = model.to_lowercase();
        if lower.contains("opus") {
            Self::Opus
        } else if lower.contains("haiku") {
            Self::Haiku
        } else {
            Self::Sonnet
        }
    }
}

impl std::fmt::Display for TierName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TierName {
    type Err = CcsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "opus" => Ok(Self::Opus),
            "sonnet" => Ok(Self::Sonnet),
            "haiku" => Ok(Self::Haiku),
            other => Err(CcsError::validation(format!(
                "Unknown tier '{other}' (use opus, sonnet, or haiku)"
            ))),
        }
    }
}

/// Fallback route for one composite tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackSpec {
    /// Provider the tier falls back to.
    pub provider: Provider,
    /// Model the tier falls back to.
    pub model: String,
    /// Unknown fields round-trip untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One tier of a composite variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSpec {
    /// Provider serving this tier.
    pub provider: Provider,
    /// Model served for this tier.
    pub model: String,
    /// Optional fallback route (persisted only; the proxy decides when
    /// to use it).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackSpec>,
    /// Per-tier thinking override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingLevel>,
    /// Upstream OAuth account this tier pins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Unknown fields round-trip untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TierSpec {
    /// Validate this tier's invariants.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty model or a fallback that
    /// cycles back to the tier's own route.
    pub fn validate(&self, tier: TierName) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(CcsError::InvalidTier {
                tier: tier.to_string(),
                reason: "model must not be empty".to_owned(),
            });
        }
        if let Some(fb) = &self.fallback {
            if fb.model.trim().is_empty() {
                return Err(CcsError::InvalidTier {
                    tier: tier.to_string(),
                    reason: "fallback model must not be empty".to_owned(),
                });
            }
            if fb.provider == self.provider && fb.model == self.model {
                return Err(CcsError::InvalidTier {
                    tier: tier.to_string(),
                    reason: format!(
                        "fallback {}:{} is identical to the tier's own route",
                        fb.provider, fb.model
                    ),
                });
            }
        }
        Ok(())
    }

    /// Apply a partial update, preserving untouched fields.
    pub fn apply(&mut self, patch: TierPatch) {
        if let Some(provider) = patch.provider {
            self.provider = provider;
        }
        if let Some(model) = patch.model {
            self.model = model;
        }
        if let Some(fallback) = patch.fallback {
            self.fallback = Some(fallback);
        }
        if let Some(thinking) = patch.thinking {
            self.thinking = Some(thinking);
        }
        if let Some(account) = patch.account {
            self.account = Some(account);
        }
    }
}

/// Partial update of one tier.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TierPatch {
    /// New provider, if changing.
    #[serde(default)]
    pub provider: Option<Provider>,
    /// New model, if changing.
    #[serde(default)]
    pub model: Option<String>,
    /// New fallback, if changing.
    #[serde(default)]
    pub fallback: Option<FallbackSpec>,
    /// New thinking override, if changing.
    #[serde(default)]
    pub thinking: Option<ThinkingLevel>,
    /// New account pin, if changing.
    #[serde(default)]
    pub account: Option<String>,
}

/// Partial update of a composite tier map.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TiersPatch {
    /// Opus tier patch.
    #[serde(default)]
    pub opus: Option<TierPatch>,
    /// Sonnet tier patch.
    #[serde(default)]
    pub sonnet: Option<TierPatch>,
    /// Haiku tier patch.
    #[serde(default)]
    pub haiku: Option<TierPatch>,
}

/// The full tier map of a composite variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeTiers {
    /// Opus tier.
    pub opus: TierSpec,
    /// Sonnet tier.
    pub sonnet: TierSpec,
    /// Haiku tier.
    pub haiku: TierSpec,
}

impl CompositeTiers {
    /// Borrow a tier by name.
    #[must_use]
    pub fn get(&self, tier: TierName) -> &TierSpec {
        match tier {
            TierName::Opus => &self.opus,
            TierName::Sonnet => &self.sonnet,
            TierName::Haiku => &self.haiku,
        }
    }

    /// Mutably borrow a tier by name.
    pub fn get_mut(&mut self, tier: TierName) -> &mut TierSpec {
        match tier {
            TierName::Opus => &mut self.opus,
            TierName::Sonnet => &mut self.sonnet,
            TierName::Haiku => &mut self.haiku,
        }
    }

    /// Validate every tier.
    ///
    /// # Errors
    ///
    /// Returns the first tier validation failure.
    pub fn validate(&self) -> Result<()> {
        for &tier in ALL_TIERS {
            self.get(tier).validate(tier)?;
        }
        Ok(())
    }

    /// Deep-merge a partial update into this tier map.
    pub fn apply(&mut self, patch: TiersPatch) {
        if let Some(p) = patch.opus {
            self.opus.apply(p);
        }
        if let Some(p) = patch.sonnet {
            self.sonnet.apply(p);
        }
        if let Some(p) = patch.haiku {
            self.haiku.apply(p);
        }
    }

    /// Whether any tier declares a fallback route.
    #[must_use]
    pub fn has_fallback(&self) -> bool {
        ALL_TIERS.iter().any(|&t| self.get(t).fallback.is_some())
    }
}

/// A named route into one provider of a running CLIProxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleVariant {
    /// Provider this variant routes to.
    pub provider: Provider,
    /// Model pinned for this variant; the provider default applies when
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Upstream OAuth account this variant pins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Settings file path, `~`-relative when under the home directory.
    pub settings: String,
    /// Exclusive CLIProxy port.
    pub port: u16,
    /// Child CLI target.
    #[serde(default)]
    pub target: Target,
    /// Unknown fields round-trip untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Marker forcing the `type: composite` tag on composite records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositeTag {
    /// The only value.
    #[serde(rename = "composite")]
    Composite,
}

/// A variant whose three Claude tiers resolve to possibly-different
/// upstream providers; routed by model name through the proxy root URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeVariant {
    /// Literal `composite` discriminator.
    #[serde(rename = "type")]
    pub kind: CompositeTag,
    /// Tier whose model lands in `ANTHROPIC_MODEL`.
    pub default_tier: TierName,
    /// The tier map.
    pub tiers: CompositeTiers,
    /// Settings file path, `~`-relative when under the home directory.
    pub settings: String,
    /// Exclusive CLIProxy port.
    pub port: u16,
    /// Child CLI target.
    #[serde(default)]
    pub target: Target,
    /// Unknown fields round-trip untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CompositeVariant {
    /// Validate the full tier set.
    ///
    /// # Errors
    ///
    /// Returns the first failing tier invariant.
    pub fn validate(&self) -> Result<()> {
        self.tiers.validate()
    }

    /// The tier spec behind `default_tier`.
    #[must_use]
    pub fn default_spec(&self) -> &TierSpec {
        self.tiers.get(self.default_tier)
    }
}

/// Any stored variant record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariantRecord {
    /// Composite tier map (tagged `type: composite`).
    Composite(CompositeVariant),
    /// Single-provider route (implicit type).
    Single(SingleVariant),
}

impl VariantRecord {
    /// The variant's exclusive port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        match self {
            Self::Composite(c) => c.port,
            Self::Single(s) => s.port,
        }
    }

    /// The variant's child CLI target.
    #[must_use]
    pub const fn target(&self) -> Target {
        match self {
            Self::Composite(c) => c.target,
            Self::Single(s) => s.target,
        }
    }

    /// The variant's settings path as stored.
    #[must_use]
    pub fn settings(&self) -> &str {
        match self {
            Self::Composite(c) => &c.settings,
            Self::Single(s) => &s.settings,
        }
    }

    /// Human kind name used in errors and listings.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Composite(_) => "composite",
            Self::Single(_) => "single",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    // ========== tier detection ==========

    #[test]
    fn test_detect_tier_substring() {
        assert_eq!(TierName::detect("claude-opus-4-6"), TierName::Opus);
        assert_eq!(TierName::detect("claude-haiku-4-5"), TierName::Haiku);
        assert_eq!(TierName::detect("gemini-2.5-pro"), TierName::Sonnet);
        assert_eq!(TierName::detect("gpt-5.3-codex"), TierName::Sonnet);
    }

    // ========== tier validation ==========

    #[test]
    fn test_tier_rejects_empty_model() {
        let mut t = tier(Provider::Gemini, "");
        assert!(t.validate(TierName::Opus).is_err());
        t.model = "  ".to_owned();
        assert!(t.validate(TierName::Opus).is_err());
    }

    #[test]
    fn test_tier_rejects_fallback_self_cycle() {
        let mut t = tier(Provider::Agy, "claude-sonnet-4-5-thinking");
        t.fallback = Some(FallbackSpec {
            provider: Provider::Agy,
            model: "claude-sonnet-4-5-thinking".to_owned(),
            extra: BTreeMap::new(),
        });
        let err = t.validate(TierName::Sonnet).unwrap_err();
        assert!(err.to_string().contains("identical"));
    }

    #[test]
    fn test_tier_allows_different_fallback() {
        let mut t = tier(Provider::Agy, "claude-sonnet-4-5-thinking");
        t.fallback = Some(FallbackSpec {
            provider: Provider::Gemini,
            model: "gemini-2.5-pro".to_owned(),
            extra: BTreeMap::new(),
        });
        assert!(t.validate(TierName::Sonnet).is_ok());
    }

    // ========== merging ==========

    #[test]
    fn test_partial_merge_preserves_untouched_fields() {
        let mut ts = tiers();
        ts.sonnet.fallback = Some(FallbackSpec {
            provider: Provider::Gemini,
            model: "gemini-2.5-pro".to_owned(),
            extra: BTreeMap::new(),
        });
        ts.sonnet.thinking = Some(ThinkingLevel::High);
        ts.sonnet.account = Some("acct-1".to_owned());

        ts.apply(TiersPatch {
            sonnet: Some(TierPatch {
                model: Some("claude-sonnet-4-6-thinking".to_owned()),
                ..TierPatch::default()
            }),
            ..TiersPatch::default()
        });

        assert_eq!(ts.sonnet.model, "claude-sonnet-4-6-thinking");
        assert!(ts.sonnet.fallback.is_some());
        assert_eq!(ts.sonnet.thinking, Some(ThinkingLevel::High));
        assert_eq!(ts.sonnet.account.as_deref(), Some("acct-1"));
        // Other tiers untouched.
        assert_eq!(ts.opus.model, "claude-opus-4-6-thinking");
    }

    // ========== record serde ==========

    #[test]
    fn test_single_variant_roundtrip() {
        let raw = r#"{
            "provider": "gemini",
            "model": "gemini-2.5-pro",
            "settings": "~/.ccs/gemini-g3.settings.json",
            "port": 8318
        }"#;
        let rec: VariantRecord = serde_json::from_str(raw).unwrap();
        match &rec {
            VariantRecord::Single(s) => {
                assert_eq!(s.provider, Provider::Gemini);
                assert_eq!(s.target, Target::Claude);
                assert_eq!(s.port, 8318);
            }
            VariantRecord::Composite(_) => panic!("expected single"),
        }
        assert_eq!(rec.type_name(), "single");
    }

    #[test]
    fn test_composite_variant_roundtrip() {
        let composite = CompositeVariant {
            kind: CompositeTag::Composite,
            default_tier: TierName::Sonnet,
            tiers: tiers(),
            settings: "~/.ccs/composite-mix.settings.json".to_owned(),
            port: 8319,
            target: Target::Claude,
            extra: BTreeMap::new(),
        };
        let json = serde_json::to_string(&VariantRecord::Composite(composite.clone())).unwrap();
        assert!(json.contains(r#""type":"composite""#));
        let back: VariantRecord = serde_json::from_str(&json).unwrap();
        match back {
            VariantRecord::Composite(c) => assert_eq!(c, composite),
            VariantRecord::Single(_) => panic!("expected composite"),
        }
    }

    #[test]
    fn test_has_fallback() {
        let mut ts = tiers();
        assert!(!ts.has_fallback());
        ts.haiku.fallback = Some(FallbackSpec {
            provider: Provider::Gemini,
            model: "gemini-2.5-flash".to_owned(),
            extra: BTreeMap::new(),
        });
        assert!(ts.has_fallback());
    }
}
