//! Thinking-budget levels and the layered thinking configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::errors::{CcsError, Result};

/// Upper bound accepted for raw thinking budgets. Carried as a constant
/// rather than a provider invariant; the unified config may lower it.
pub const MAX_THINKING_BUDGET: u32 = 100_000;

/// A requested reasoning effort: a named level, a raw token budget, or
/// an explicit opt-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingLevel {
    /// 512-token budget.
    Minimal,
    /// 1K budget.
    Low,
    /// 8K budget.
    Medium,
    /// 24K budget.
    High,
    /// 32K budget.
    XHigh,
    /// Thinking explicitly disabled.
    Off,
    /// Raw token budget.
    Budget(u32),
}

impl ThinkingLevel {
    /// Token budget this level asks for; zero for `Off`.
    #[must_use]
    pub const fn budget(self) -> u32 {
        match self {
            Self::Minimal => 512,
            Self::Low => 1_024,
            Self::Medium => 8_192,
            Self::High => 24_576,
            Self::XHigh => 32_768,
            Self::Off => 0,
            Self::Budget(n) => n,
        }
    }

    /// Text placed inside the model-ID suffix: the level name, or the
    /// raw budget in decimal.
    #[must_use]
    pub fn suffix_value(self) -> String {
        match self {
            Self::Minimal => "minimal".to_owned(),
            Self::Low => "low".to_owned(),
            Self::Medium => "medium".to_owned(),
            Self::High => "high".to_owned(),
            Self::XHigh => "xhigh".to_owned(),
            Self::Off => "off".to_owned(),
            Self::Budget(n) => n.to_string(),
        }
    }

    /// Parse a level from user input or config.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown names and budgets above
    /// the given ceiling.
    pub fn parse(raw: &str, max_budget: u32) -> Result<Self> {
        let trimmed = raw.trim();
        match trimmed.to_lowercase().as_str() {
            "minimal" => return Ok(Self::Minimal),
            "low" => return Ok(Self::Low),
            "medium" => return Ok(Self::Medium),
            "high" => return Ok(Self::High),
            "xhigh" => return Ok(Self::XHigh),
            "off" => return Ok(Self::Off),
            _ => {}
        }
        let budget: u32 = trimmed.parse().map_err(|_| {
            CcsError::validation(format!(
                "Unknown thinking level '{raw}' (use minimal|low|medium|high|xhigh|off or a token budget)"
            ))
        })?;
        if budget > max_budget {
            return Err(CcsError::validation(format!(
                "Thinking budget {budget} exceeds the maximum of {max_budget}"
            )));
        }
        Ok(Self::Budget(budget))
    }
}

impl std::fmt::Display for ThinkingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.suffix_value())
    }
}

impl Serialize for ThinkingLevel {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Budget(n) => ser.serialize_u32(*n),
            other => ser.serialize_str(&other.suffix_value()),
        }
    }
}

impl<'de> Deserialize<'de> for ThinkingLevel {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Num(u64),
            Name(String),
        }
        match Repr::deserialize(de)? {
            Repr::Num(n) => {
                let n = u32::try_from(n)
                    .map_err(|_| serde::de::Error::custom("thinking budget out of range"))?;
                Ok(Self::Budget(n))
            }
            Repr::Name(s) => Self::parse(&s, MAX_THINKING_BUDGET)
                .map_err(|e| serde::de::Error::custom(e.to_string())),
        }
    }
}

/// How thinking suffixes are decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingMode {
    /// Apply tier defaults and overrides automatically.
    #[default]
    Auto,
    /// Never apply a suffix.
    Off,
    /// Apply only the configured manual override.
    Manual,
}

/// Per-tier default levels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierDefaults {
    /// Default level for the opus tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opus: Option<ThinkingLevel>,
    /// Default level for the sonnet tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sonnet: Option<ThinkingLevel>,
    /// Default level for the haiku tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub haiku: Option<ThinkingLevel>,
}

/// The `thinking` section of the unified config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThinkingConfig {
    /// Suffix mode.
    #[serde(default)]
    pub mode: ThinkingMode,

    /// Manual override applied in `manual` mode (and consulted before
    /// tier defaults in `auto` mode).
    #[serde(default, rename = "override", skip_serializing_if = "Option::is_none")]
    pub manual_override: Option<ThinkingLevel>,

    /// Global per-tier defaults.
    #[serde(default)]
    pub tier_defaults: TierDefaults,

    /// Per-provider tier defaults, keyed by provider name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provider_overrides: BTreeMap<String, TierDefaults>,

    /// Optional lowered budget ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_budget: Option<u32>,

    /// Unknown fields round-trip untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ThinkingConfig {
    /// Effective budget ceiling.
    #[must_use]
    pub fn budget_ceiling(&self) -> u32 {
        self.max_budget.unwrap_or(MAX_THINKING_BUDGET)
    }
}
