//! CLIProxy provider catalog: the supported provider set, bundled model
//! defaults, thinking-capability rules, and model-ID normalization.

use serde::{Deserialize, Serialize};

use crate::core::errors::{CcsError, Result};

/// API key the resolver falls back to when neither the variant nor the
/// unified config carries one. The local CLIProxy accepts any bearer
/// token; this constant keeps the settings files self-consistent.
pub const BUILTIN_PROXY_API_KEY: &str = "sk-ccs-local";

/// Upstream providers the CLIProxy can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google Gemini.
    Gemini,
    /// OpenAI Codex.
    Codex,
    /// Antigravity.
    Agy,
    /// Qwen.
    Qwen,
    /// iFlow.
    Iflow,
    /// Kiro (plus backend only).
    Kiro,
    /// GitHub Copilot (plus backend only).
    Ghcp,
    /// Generic OpenAI-compatible endpoint.
    Openai,
}

/// All supported providers, in display order.
pub const ALL_PROVIDERS: &[Provider] = &[
    Provider::Gemini,
    Provider::Codex,
    Provider::Agy,
    Provider::Qwen,
    Provider::Iflow,
    Provider::Kiro,
    Provider::Ghcp,
    Provider::Openai,
];

impl Provider {
    /// Lowercase wire name of the provider (URL path segment, settings
    /// file prefix).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Codex => "codex",
            Self::Agy => "agy",
            Self::Qwen => "qwen",
            Self::Iflow => "iflow",
            Self::Kiro => "kiro",
            Self::Ghcp => "ghcp",
            Self::Openai => "openai",
        }
    }

    /// Whether the provider is only available on the plus CLIProxy backend.
    #[must_use]
    pub const fn plus_only(self) -> bool {
        matches!(self, Self::Kiro | Self::Ghcp)
    }

    /// Bundled default model used when no settings file supplies one.
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.5-pro",
            Self::Codex => "gpt-5.3-codex",
            Self::Agy => "claude-sonnet-4-5-thinking",
            Self::Qwen => "qwen3-coder-plus",
            Self::Iflow => "qwen3-max",
            Self::Kiro => "claude-sonnet-4-5",
            Self::Ghcp => "gpt-5.1",
            Self::Openai => "gpt-5.2",
        }
    }

    /// Whether a model accepts a thinking budget when routed through this
    /// provider. Catalog heuristics over model-name families.
    #[must_use]
    pub fn supports_thinking(self, model: &str) -> bool {
        match self {
            Self::Codex => model.contains("codex") || model.starts_with("gpt-5"),
            Self::Gemini => model.starts_with("gemini-2.5") || model.starts_with("gemini-3"),
            Self::Openai => model.starts_with("gpt-5"),
            Self::Agy | Self::Qwen | Self::Iflow | Self::Kiro | Self::Ghcp => {
                model.contains("thinking")
            }
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = CcsError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        ALL_PROVIDERS
            .iter()
            .copied()
            .find(|p| p.as_str() == lower)
            .ok_or_else(|| CcsError::UnknownProvider {
                provider: s.to_owned(),
                supported: supported_list(),
            })
    }
}

/// Comma-separated supported provider names for error messages.
#[must_use]
pub fn supported_list() -> String {
    ALL_PROVIDERS
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// CLIProxy build flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyBackend {
    /// Upstream CLIProxy build.
    #[default]
    Original,
    /// Extended build carrying the kiro/ghcp routes.
    Plus,
}

impl std::fmt::Display for ProxyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Original => f.write_str("original"),
            Self::Plus => f.write_str("plus"),
        }
    }
}

impl std::str::FromStr for ProxyBackend {
    type Err = CcsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "original" => Ok(Self::Original),
            "plus" => Ok(Self::Plus),
            other => Err(CcsError::validation(format!(
                "Unknown CLIProxy backend '{other}' (use 'original' or 'plus')"
            ))),
        }
    }
}

/// Replace every `.` that sits between two ASCII digits with `-`.
fn hyphenate_dotted_digits(model: &str) -> String {
    let chars: Vec<char> = model.chars().collect();
    let mut out = String::with_capacity(model.len());
    for (i, &c) in chars.iter().enumerate() {
        let dotted = c == '.'
            && i > 0
            && chars[i - 1].is_ascii_digit()
            && chars.get(i + 1).is_some_and(char::is_ascii_digit);
        out.push(if dotted { '-' } else { c });
    }
    out
}

/// Normalize a model identifier for a provider route.
///
/// Antigravity rejects dotted Claude major.minor IDs, so every
/// `claude-*` model is hyphenated there. Other routes hyphenate only
/// dotted thinking IDs, preserving vendors whose non-thinking IDs are
/// legitimately dotted (`gpt-5.3-codex`).
#[must_use]
pub fn normalize_model_id(provider: Provider, model: &str) -> String {
    let applies = match provider {
        Provider::Agy => model.starts_with("claude"),
        _ => model.contains("thinking"),
    };
    if applies {
        hyphenate_dotted_digits(model)
    } else {
        model.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_roundtrip() {
        for p in ALL_PROVIDERS {
            let parsed: Provider = p.as_str().parse().unwrap();
            assert_eq!(parsed, *p);
        }
    }

    #[test]
    fn test_provider_parse_case_insensitive() {
        assert_eq!("GEMINI".parse::<Provider>().unwrap(), Provider::Gemini);
        assert_eq!(" codex ".parse::<Provider>().unwrap(), Provider::Codex);
    }

    #[test]
    fn test_provider_parse_unknown() {
        let err = "grok".parse::<Provider>().unwrap_err();
        assert!(err.to_string().contains("gemini"));
    }

    #[test]
    fn test_plus_only_set() {
        assert!(Provider::Kiro.plus_only());
        assert!(Provider::Ghcp.plus_only());
        assert!(!Provider::Gemini.plus_only());
        assert!(!Provider::Codex.plus_only());
    }

    #[test]
    fn test_normalize_agy_dotted_claude() {
        assert_eq!(
            normalize_model_id(Provider::Agy, "claude-sonnet-4.6-thinking"),
            "claude-sonnet-4-6-thinking"
        );
        assert_eq!(
            normalize_model_id(Provider::Agy, "claude-opus-4.6"),
            "claude-opus-4-6"
        );
    }

    #[test]
    fn test_normalize_non_agy_only_thinking() {
        assert_eq!(
            normalize_model_id(Provider::Kiro, "claude-sonnet-4.5-thinking"),
            "claude-sonnet-4-5-thinking"
        );
        // Dotted non-thinking IDs pass through untouched off the agy route.
        assert_eq!(
            normalize_model_id(Provider::Codex, "gpt-5.3-codex"),
            "gpt-5.3-codex"
        );
    }

    #[test]
    fn test_normalize_leaves_non_claude_agy_models() {
        assert_eq!(
            normalize_model_id(Provider::Agy, "gemini-3-pro"),
            "gemini-3-pro"
        );
    }

    #[test]
    fn test_hyphenate_edge_positions() {
        assert_eq!(hyphenate_dotted_digits("4.6"), "4-6");
        assert_eq!(hyphenate_dotted_digits(".5"), ".5");
        assert_eq!(hyphenate_dotted_digits("5."), "5.");
        assert_eq!(hyphenate_dotted_digits("a.b"), "a.b");
    }

    #[test]
    fn test_supports_thinking() {
        assert!(Provider::Codex.supports_thinking("gpt-5.3-codex"));
        assert!(Provider::Agy.supports_thinking("claude-sonnet-4-5-thinking"));
        assert!(!Provider::Agy.supports_thinking("claude-haiku-4-5-20251001"));
        assert!(Provider::Gemini.supports_thinking("gemini-2.5-pro"));
        assert!(!Provider::Gemini.supports_thinking("gemini-1.5-flash"));
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!(
            "plus".parse::<ProxyBackend>().unwrap(),
            ProxyBackend::Plus
        );
        assert!("turbo".parse::<ProxyBackend>().is_err());
    }
}
