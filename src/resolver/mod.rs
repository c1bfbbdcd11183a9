//! Environment Resolver: composes the child CLI's environment.
//!
//! A total function of the provider/port, optional settings files,
//! optional remote rewrite, optional composite tier map, the thinking
//! override, and the ambient process environment. Precedence, highest
//! first: computed routing keys, CLI thinking override, custom settings,
//! per-provider settings, bundled defaults, `global_env`.

/// Thinking-suffix resolution and application.
pub mod thinking;
/// Defensive base-URL construction.
pub mod url;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::errors::Result;
use crate::core::thinking::ThinkingLevel;
use crate::core::variant::{ALL_TIERS, CompositeTiers, TierName};
use crate::providers::{BUILTIN_PROXY_API_KEY, Provider, normalize_model_id};
use crate::store::unified::{RemoteProxyServer, UnifiedConfig};
use crate::variants::settings::{ENV_AUTH_TOKEN, ENV_BASE_URL, ENV_MODEL};
use crate::utils::paths::CcsPaths;

/// Env prefixes whose ambient values are stripped before launch.
const CREDENTIAL_PREFIXES: &[&str] = &[
    "ANTHROPIC_",
    "OPENAI_",
    "GOOGLE_",
    "GEMINI_",
    "MINIMAX_",
    "QWEN_",
    "DEEPSEEK_",
    "KIMI_",
    "AZURE_",
    "OLLAMA_",
    "OPENROUTER_",
    "XAI_",
    "MISTRAL_",
    "COHERE_",
    "PERPLEXITY_",
    "TOGETHER_",
    "FIREWORKS_",
];

/// Env suffixes whose ambient values are stripped before launch.
const CREDENTIAL_SUFFIXES: &[&str] = &[
    "_API_KEY",
    "_AUTH_TOKEN",
    "_ACCESS_TOKEN",
    "_SECRET_KEY",
    "_API_TOKEN",
    "_BEARER_TOKEN",
    "_SESSION_TOKEN",
];

/// Exact ambient keys stripped regardless of shape.
const CREDENTIAL_KEYS: &[&str] = &[
    "CLAUDE_CODE_OAUTH_TOKEN",
    "AWS_BEARER_TOKEN_BEDROCK",
    "GOOGLE_APPLICATION_CREDENTIALS",
];

/// Ambient keys never stripped.
const PRESERVED_KEYS: &[&str] = &["CLAUDE_CONFIG_DIR"];

/// Model identifiers that still carry the deprecated prefix are
/// rewritten and the settings file is migrated best-effort.
const DEPRECATED_MODEL_PREFIX: &str = "gemini-claude-";

/// Whether an ambient env var must be withheld from the child.
#[must_use]
pub fn is_stripped_key(key: &str) -> bool {
    let upper = key.to_uppercase();
    if PRESERVED_KEYS.contains(&upper.as_str()) {
        return false;
    }
    CREDENTIAL_PREFIXES.iter().any(|p| upper.starts_with(p))
        || CREDENTIAL_SUFFIXES.iter().any(|s| upper.ends_with(s))
        || CREDENTIAL_KEYS.contains(&upper.as_str())
}

/// Copy the ambient environment minus credentials.
#[must_use]
pub fn strip_ambient(ambient: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    ambient
        .iter()
        .filter(|(key, _)| !is_stripped_key(key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Remote proxy target applied to loopback base URLs.
#[derive(Debug, Clone)]
pub struct RemoteRewrite {
    /// Remote host.
    pub host: String,
    /// Remote port; protocol default when absent.
    pub port: Option<u16>,
    /// Normalized protocol (`http`/`https`).
    pub protocol: String,
    /// Replacement auth token, when the remote requires its own.
    pub auth_token: Option<String>,
}

impl From<&RemoteProxyServer> for RemoteRewrite {
    fn from(remote: &RemoteProxyServer) -> Self {
        Self {
            host: remote.host.clone(),
            port: remote.port,
            protocol: url::normalize_protocol(remote.protocol.as_deref()),
            auth_token: remote.auth_token.clone(),
        }
    }
}

/// Composite inputs: the tier map drives the four model keys and the
/// base URL collapses to the proxy root.
#[derive(Debug, Clone)]
pub struct CompositeEnvSpec<'a> {
    /// The tier map.
    pub tiers: &'a CompositeTiers,
    /// Tier whose model lands in `ANTHROPIC_MODEL`.
    pub default_tier: TierName,
}

/// Everything the resolver needs for one launch.
#[derive(Debug, Clone)]
pub struct ResolveRequest<'a> {
    /// Provider routed to (ignored for URL purposes when composite).
    pub provider: Provider,
    /// Local proxy port.
    pub port: u16,
    /// Per-variant settings file, tried before the provider default.
    pub custom_settings: Option<PathBuf>,
    /// Remote rewrite target, when configured.
    pub remote: Option<RemoteRewrite>,
    /// Composite tier map, for composite variants.
    pub composite: Option<CompositeEnvSpec<'a>>,
    /// Explicit `--thinking` override.
    pub thinking_override: Option<ThinkingLevel>,
    /// Per-variant auth token, consulted before the global key.
    pub variant_auth: Option<String>,
}

impl<'a> ResolveRequest<'a> {
    /// A minimal request for a provider route.
    #[must_use]
    pub fn new(provider: Provider, port: u16) -> Self {
        Self {
            provider,
            port,
            custom_settings: None,
            remote: None,
            composite: None,
            thinking_override: None,
            variant_auth: None,
        }
    }
}

/// Composes child environments from layered sources.
#[derive(Debug, Clone)]
pub struct EnvResolver {
    paths: CcsPaths,
}

impl EnvResolver {
    /// A resolver rooted at the given path set.
    #[must_use]
    pub fn new(paths: CcsPaths) -> Self {
        Self { paths }
    }

    /// Resolve the full child environment.
    ///
    /// # Errors
    ///
    /// Settings files are adopted best-effort; errors are reserved for
    /// store-backed sources.
    pub fn resolve(
        &self,
        req: &ResolveRequest<'_>,
        config: &UnifiedConfig,
        ambient: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        // Ambient credentials never reach the child.
        let mut env = strip_ambient(ambient);

        // global_env merges in lowest.
        if config.global_env.enabled {
            for (key, value) in &config.global_env.env {
                env.insert(key.clone(), value.clone());
            }
        }

        // Settings: custom first, then the provider default, else the
        // bundled defaults.
        let api_key = self.effective_api_key(req, config);
        match self.load_settings_env(req)? {
            Some(settings_env) => {
                for (key, value) in settings_env {
                    env.insert(key, value);
                }
            }
            None => {
                let model = req.provider.default_model();
                env.insert(
                    ENV_BASE_URL.to_owned(),
                    url::local_provider_url(req.port, req.provider),
                );
                env.insert(ENV_AUTH_TOKEN.to_owned(), api_key.clone());
                env.insert(ENV_MODEL.to_owned(), model.to_owned());
                for &tier in ALL_TIERS {
                    env.insert(tier.env_key().to_owned(), model.to_owned());
                }
            }
        }

        // Required-vars backfill.
        if blank(env.get(ENV_BASE_URL)) {
            env.insert(
                ENV_BASE_URL.to_owned(),
                url::local_provider_url(req.port, req.provider),
            );
        }
        if blank(env.get(ENV_AUTH_TOKEN)) {
            env.insert(ENV_AUTH_TOKEN.to_owned(), api_key);
        }

        // Remote rewrite applies only to loopback bases.
        let mut rewrote_remote = false;
        if let Some(remote) = &req.remote {
            if env.get(ENV_BASE_URL).is_some_and(|u| url::is_loopback_url(u)) {
                env.insert(
                    ENV_BASE_URL.to_owned(),
                    url::provider_url(&remote.protocol, &remote.host, remote.port, req.provider),
                );
                if let Some(token) = &remote.auth_token {
                    env.insert(ENV_AUTH_TOKEN.to_owned(), token.clone());
                }
                rewrote_remote = true;
            }
        }

        // Composite routing goes through the proxy root; models carry
        // the tier routing.
        if let Some(composite) = &req.composite {
            let root = match (&req.remote, rewrote_remote) {
                (Some(remote), true) => {
                    url::root_url(&remote.protocol, &remote.host, remote.port)
                }
                _ => url::local_root_url(req.port),
            };
            env.insert(ENV_BASE_URL.to_owned(), root);
            env.insert(
                ENV_MODEL.to_owned(),
                composite.tiers.get(composite.default_tier).model.clone(),
            );
            for &tier in ALL_TIERS {
                env.insert(
                    tier.env_key().to_owned(),
                    composite.tiers.get(tier).model.clone(),
                );
            }
        }

        // Normalization and thinking suffix, per model slot.
        self.decorate_models(req, config, &mut env);

        Ok(env)
    }

    /// Per-variant auth, then the global proxy key, then the built-in.
    fn effective_api_key(&self, req: &ResolveRequest<'_>, config: &UnifiedConfig) -> String {
        req.variant_auth
            .clone()
            .or_else(|| config.proxy_api_key().map(str::to_owned))
            .unwrap_or_else(|| BUILTIN_PROXY_API_KEY.to_owned())
    }

    /// Adopt the env block of the first settings file that parses and
    /// carries an `env` object: the custom path, then the per-provider
    /// default. A file that does not parse falls through. The deprecated
    /// model prefix is migrated in the returned env and persisted back
    /// best-effort.
    fn load_settings_env(
        &self,
        req: &ResolveRequest<'_>,
    ) -> Result<Option<BTreeMap<String, String>>> {
        if let Some(path) = &req.custom_settings {
            if let Some(env) = self.adopt_settings_file(path)? {
                return Ok(Some(env));
            }
        }
        let default_path = self.paths.provider_settings_file(req.provider.as_str());
        self.adopt_settings_file(&default_path)
    }

    fn adopt_settings_file(&self, path: &Path) -> Result<Option<BTreeMap<String, String>>> {
        let value: Option<serde_json::Value> = match crate::store::atomic::read_json(path) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Ignoring unreadable settings file");
                None
            }
        };
        let Some(mut value) = value else {
            return Ok(None);
        };
        let Some(env_obj) = value.get("env").and_then(serde_json::Value::as_object) else {
            return Ok(None);
        };

        let mut env = BTreeMap::new();
        for (key, raw) in env_obj {
            let text = match raw {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            env.insert(key.clone(), text);
        }

        self.migrate_deprecated_models(path, &mut value, &mut env);
        Ok(Some(env))
    }

    /// Rewrite `gemini-claude-*` model ids to `claude-*`, persisting the
    /// settings file back without ever blocking the launch.
    fn migrate_deprecated_models(
        &self,
        path: &Path,
        value: &mut serde_json::Value,
        env: &mut BTreeMap<String, String>,
    ) {
        let mut migrated = false;
        for key in model_keys() {
            let Some(current) = env.get(key) else { continue };
            let Some(rest) = current.strip_prefix(DEPRECATED_MODEL_PREFIX) else {
                continue;
            };
            let replacement = format!("claude-{rest}");
            tracing::debug!(key, from = %current, to = %replacement, "Migrating deprecated model name");
            env.insert(key.to_owned(), replacement.clone());
            if let Some(obj) = value.get_mut("env").and_then(serde_json::Value::as_object_mut) {
                obj.insert(key.to_owned(), serde_json::Value::String(replacement));
            }
            migrated = true;
        }
        if migrated {
            if let Err(e) = crate::store::atomic::write_json(path, value) {
                tracing::debug!(path = %path.display(), error = %e, "Could not persist migrated settings");
            }
        }
    }

    /// Apply model-ID normalization and the thinking suffix to every
    /// model slot.
    fn decorate_models(
        &self,
        req: &ResolveRequest<'_>,
        config: &UnifiedConfig,
        env: &mut BTreeMap<String, String>,
    ) {
        let explicit = req.thinking_override.is_some();
        for key in model_keys() {
            let Some(current) = env.get(key).cloned() else {
                continue;
            };

            let (provider, tier, tier_override) = match &req.composite {
                Some(composite) => {
                    let tier = slot_tier(key).unwrap_or(composite.default_tier);
                    let spec = composite.tiers.get(tier);
                    (spec.provider, tier, spec.thinking)
                }
                None => {
                    let tier = slot_tier(key).unwrap_or_else(|| TierName::detect(&current));
                    (req.provider, tier, None)
                }
            };

            let normalized = normalize_model_id(provider, &current);
            let level = thinking::effective_level(
                &config.thinking,
                req.thinking_override,
                provider,
                tier,
                tier_override,
            );
            let decorated = thinking::decorate_model(provider, &normalized, level, explicit);
            env.insert(key.to_owned(), decorated);
        }
    }
}

/// The four env keys carrying model identifiers.
fn model_keys() -> [&'static str; 4] {
    [
        ENV_MODEL,
        TierName::Opus.env_key(),
        TierName::Sonnet.env_key(),
        TierName::Haiku.env_key(),
    ]
}

/// Fixed tier of a model slot; `ANTHROPIC_MODEL` has none.
fn slot_tier(key: &str) -> Option<TierName> {
    ALL_TIERS.iter().copied().find(|t| t.env_key() == key)
}

fn blank(value: Option<&String>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}
