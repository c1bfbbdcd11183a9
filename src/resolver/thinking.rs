//! Thinking-suffix application.
//!
//! Levels resolve through a fixed priority: CLI override, config manual
//! override, per-tier composite override, provider-specific tier
//! default, global tier default. Codex routes use hyphen suffixes
//! (`-high`); everything else uses parenthesized suffixes (`(high)`).

use crate::core::thinking::{ThinkingConfig, ThinkingLevel, ThinkingMode, TierDefaults};
use crate::core::variant::TierName;
use crate::providers::Provider;

/// Codex hyphen suffixes, including the legacy parenthesized spellings
/// they normalize from.
const CODEX_SUFFIXES: &[&str] = &["medium", "high", "xhigh"];

fn tier_default(defaults: &TierDefaults, tier: TierName) -> Option<ThinkingLevel> {
    match tier {
        TierName::Opus => defaults.opus,
        TierName::Sonnet => defaults.sonnet,
        TierName::Haiku => defaults.haiku,
    }
}

/// Resolve the level to apply for one model slot.
#[must_use]
pub fn effective_level(
    config: &ThinkingConfig,
    cli_override: Option<ThinkingLevel>,
    provider: Provider,
    tier: TierName,
    tier_override: Option<ThinkingLevel>,
) -> Option<ThinkingLevel> {
    match config.mode {
        ThinkingMode::Off => cli_override,
        ThinkingMode::Manual => cli_override.or(config.manual_override),
        ThinkingMode::Auto => cli_override
            .or(config.manual_override)
            .or(tier_override)
            .or_else(|| {
                config
                    .provider_overrides
                    .get(provider.as_str())
                    .and_then(|defaults| tier_default(defaults, tier))
            })
            .or_else(|| tier_default(&config.tier_defaults, tier)),
    }
}

/// Whether the model already carries a parenthesized suffix.
fn has_paren_suffix(model: &str) -> bool {
    model.ends_with(')') && model.contains('(')
}

/// Whether the model already carries a codex hyphen suffix.
fn has_codex_suffix(model: &str) -> bool {
    CODEX_SUFFIXES
        .iter()
        .any(|s| model.strip_suffix(s).is_some_and(|rest| rest.ends_with('-')))
}

/// Rewrite legacy `model(high)` spellings to `model-high` for codex
/// routes; anything else passes through.
#[must_use]
pub fn normalize_codex_suffix(model: &str) -> String {
    for suffix in CODEX_SUFFIXES {
        if let Some(base) = model.strip_suffix(&format!("({suffix})")) {
            return format!("{base}-{suffix}");
        }
    }
    model.to_owned()
}

/// Apply a resolved level to one model identifier.
///
/// Models that do not support thinking receive no suffix; when the user
/// explicitly asked via `--thinking`, a warning is emitted. Existing
/// suffixes are respected as already applied.
#[must_use]
pub fn decorate_model(
    provider: Provider,
    model: &str,
    level: Option<ThinkingLevel>,
    explicit: bool,
) -> String {
    let model = if provider == Provider::Codex {
        normalize_codex_suffix(model)
    } else {
        model.to_owned()
    };

    let Some(level) = level else {
        return model;
    };
    if level == ThinkingLevel::Off {
        return model;
    }

    if !provider.supports_thinking(&model) {
        if explicit {
            tracing::warn!(
                provider = %provider,
                model = %model,
                "Model does not support thinking; ignoring --thinking"
            );
        }
        return model;
    }

    if provider == Provider::Codex {
        if has_codex_suffix(&model) {
            return model;
        }
        // Codex only understands the hyphenated named tiers.
        match level {
            ThinkingLevel::Medium | ThinkingLevel::High | ThinkingLevel::XHigh => {
                format!("{model}-{}", level.suffix_value())
            }
            _ => {
                if explicit {
                    tracing::warn!(
                        model = %model,
                        level = %level,
                        "Codex models only take medium, high, or xhigh; ignoring"
                    );
                }
                model
            }
        }
    } else {
        if has_paren_suffix(&model) {
            return model;
        }
        format!("{model}({})", level.suffix_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config_auto() -> ThinkingConfig {
        ThinkingConfig {
            tier_defaults: TierDefaults {
                opus: Some(ThinkingLevel::XHigh),
                sonnet: Some(ThinkingLevel::High),
                haiku: None,
            },
            ..ThinkingConfig::default()
        }
    }

    // ========== effective_level ==========

    #[test]
    fn test_global_tier_defaults_apply_in_auto() {
        let cfg = config_auto();
        assert_eq!(
            effective_level(&cfg, None, Provider::Codex, TierName::Sonnet, None),
            Some(ThinkingLevel::High)
        );
        assert_eq!(
            effective_level(&cfg, None, Provider::Codex, TierName::Haiku, None),
            None
        );
    }

    #[test]
    fn test_provider_override_beats_global_default() {
        let mut cfg = config_auto();
        cfg.provider_overrides.insert(
            "codex".to_owned(),
            TierDefaults {
                sonnet: Some(ThinkingLevel::Medium),
                ..TierDefaults::default()
            },
        );
        assert_eq!(
            effective_level(&cfg, None, Provider::Codex, TierName::Sonnet, None),
            Some(ThinkingLevel::Medium)
        );
        // Other providers keep the global default.
        assert_eq!(
            effective_level(&cfg, None, Provider::Gemini, TierName::Sonnet, None),
            Some(ThinkingLevel::High)
        );
    }

    #[test]
    fn test_tier_override_beats_provider_override() {
        let mut cfg = config_auto();
        cfg.provider_overrides.insert(
            "codex".to_owned(),
            TierDefaults {
                sonnet: Some(ThinkingLevel::Medium),
                ..TierDefaults::default()
            },
        );
        assert_eq!(
            effective_level(
                &cfg,
                None,
                Provider::Codex,
                TierName::Sonnet,
                Some(ThinkingLevel::Low)
            ),
            Some(ThinkingLevel::Low)
        );
    }

    #[test]
    fn test_cli_override_wins() {
        let mut cfg = config_auto();
        cfg.manual_override = Some(ThinkingLevel::Medium);
        assert_eq!(
            effective_level(
                &cfg,
                Some(ThinkingLevel::XHigh),
                Provider::Gemini,
                TierName::Sonnet,
                Some(ThinkingLevel::Low)
            ),
            Some(ThinkingLevel::XHigh)
        );
    }

    #[test]
    fn test_manual_mode_ignores_tier_defaults() {
        let mut cfg = config_auto();
        cfg.mode = ThinkingMode::Manual;
        cfg.manual_override = Some(ThinkingLevel::Medium);
        assert_eq!(
            effective_level(&cfg, None, Provider::Gemini, TierName::Opus, None),
            Some(ThinkingLevel::Medium)
        );
        cfg.manual_override = None;
        assert_eq!(
            effective_level(&cfg, None, Provider::Gemini, TierName::Opus, None),
            None
        );
    }

    #[test]
    fn test_off_mode_disables_all_tiers() {
        let mut cfg = config_auto();
        cfg.mode = ThinkingMode::Off;
        assert_eq!(
            effective_level(&cfg, None, Provider::Gemini, TierName::Opus, None),
            None
        );
        // The explicit CLI override still wins over a config-level off.
        assert_eq!(
            effective_level(
                &cfg,
                Some(ThinkingLevel::High),
                Provider::Gemini,
                TierName::Opus,
                None
            ),
            Some(ThinkingLevel::High)
        );
    }

    // ========== decorate_model ==========

    #[test]
    fn test_codex_hyphen_suffix() {
        assert_eq!(
            decorate_model(
                Provider::Codex,
                "gpt-5.3-codex",
                Some(ThinkingLevel::High),
                false
            ),
            "gpt-5.3-codex-high"
        );
    }

    #[test]
    fn test_codex_legacy_paren_normalized() {
        assert_eq!(
            decorate_model(Provider::Codex, "gpt-5.3-codex(high)", None, false),
            "gpt-5.3-codex-high"
        );
        // Already applied: a level does not double-suffix.
        assert_eq!(
            decorate_model(
                Provider::Codex,
                "gpt-5.3-codex(high)",
                Some(ThinkingLevel::XHigh),
                false
            ),
            "gpt-5.3-codex-high"
        );
    }

    #[test]
    fn test_codex_rejects_unnamed_levels() {
        assert_eq!(
            decorate_model(
                Provider::Codex,
                "gpt-5.3-codex",
                Some(ThinkingLevel::Budget(4096)),
                true
            ),
            "gpt-5.3-codex"
        );
        assert_eq!(
            decorate_model(
                Provider::Codex,
                "gpt-5.3-codex",
                Some(ThinkingLevel::Low),
                false
            ),
            "gpt-5.3-codex"
        );
    }

    #[test]
    fn test_paren_suffix_for_other_providers() {
        assert_eq!(
            decorate_model(
                Provider::Gemini,
                "gemini-2.5-pro",
                Some(ThinkingLevel::High),
                false
            ),
            "gemini-2.5-pro(high)"
        );
        assert_eq!(
            decorate_model(
                Provider::Gemini,
                "gemini-2.5-pro",
                Some(ThinkingLevel::Budget(4096)),
                false
            ),
            "gemini-2.5-pro(4096)"
        );
    }

    #[test]
    fn test_existing_paren_suffix_respected() {
        assert_eq!(
            decorate_model(
                Provider::Gemini,
                "gemini-2.5-pro(low)",
                Some(ThinkingLevel::High),
                false
            ),
            "gemini-2.5-pro(low)"
        );
    }

    #[test]
    fn test_off_level_applies_no_suffix() {
        assert_eq!(
            decorate_model(
                Provider::Gemini,
                "gemini-2.5-pro",
                Some(ThinkingLevel::Off),
                false
            ),
            "gemini-2.5-pro"
        );
    }

    #[test]
    fn test_unsupported_model_gets_no_suffix() {
        assert_eq!(
            decorate_model(
                Provider::Agy,
                "claude-haiku-4-5-20251001",
                Some(ThinkingLevel::High),
                true
            ),
            "claude-haiku-4-5-20251001"
        );
    }

    #[test]
    fn test_no_level_passthrough() {
        assert_eq!(
            decorate_model(Provider::Gemini, "gemini-2.5-pro", None, false),
            "gemini-2.5-pro"
        );
    }

    #[test]
    fn test_provider_overrides_via_map_lookup() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "agy".to_owned(),
            TierDefaults {
                haiku: Some(ThinkingLevel::Minimal),
                ..TierDefaults::default()
            },
        );
        let cfg = ThinkingConfig {
            provider_overrides: overrides,
            ..ThinkingConfig::default()
        };
        assert_eq!(
            effective_level(&cfg, None, Provider::Agy, TierName::Haiku, None),
            Some(ThinkingLevel::Minimal)
        );
    }
}
