use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

use ccs::core::errors::{CcsError, ErrorKind};
use ccs::core::profile::{AccountRecord, ContextMode, ContinuityMode, normalize_context_group};
use ccs::core::thinking::ThinkingLevel;
use ccs::core::variant::{
    CompositeTiers, Target, TierName, TierPatch, TierSpec, TiersPatch,
};
use ccs::launcher::{self, LaunchOptions};
use ccs::providers::{Provider, ProxyBackend};
use ccs::services::Services;
use ccs::variants::{CompositeUpdate, SingleUpdate};

#[derive(Parser)]
#[command(name = "ccs")]
#[command(version)]
#[command(about = "Profile switcher and launcher for Claude-compatible CLIs")]
#[command(args_conflicts_with_subcommands = true)]
#[command(long_about = "\
ccs launches the claude CLI (or the compatible droid CLI) against many
backends: isolated multi-account logins, and a local or remote CLIProxy
that speaks the Anthropic API over Gemini, Codex, Antigravity, Qwen,
iFlow, Kiro, GHCP, and OpenAI-compatible endpoints.

Profiles come in three kinds:
  - accounts: isolated logins with their own configuration directory
  - variants: a fixed provider/model route through the CLIProxy
  - composite variants: each Claude tier mapped to its own provider")]
#[command(after_long_help = "\
QUICK START:
    ccs auth create work
    ccs work 'refactor the parser'

    ccs cliproxy create g3 --provider gemini --model gemini-2.5-pro
    ccs g3 'explain this diff'

ENVIRONMENT VARIABLES:
    CCS_HOME        Root directory (default: ~/.ccs)
    CCS_UNIFIED     Set to 1 to force the unified config.yaml store
    RUST_LOG        Log filter (default: ccs=warn)

FILE LOCATIONS:
    ~/.ccs/profiles.json        Legacy account store
    ~/.ccs/config.yaml          Unified store
    ~/.ccs/instances/           Per-account configuration directories
    ~/.ccs/cliproxy/            Proxy locks and per-port configs

Use 'ccs <command> --help' for command-specific information.")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args)]
struct RunArgs {
    /// Profile to launch (default profile when omitted)
    profile: Option<String>,

    /// Thinking level override (minimal|low|medium|high|xhigh|off or a budget)
    #[arg(long = "thinking")]
    thinking: Option<String>,

    /// Prompt and arguments passed to the child CLI
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    prompt: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage isolated claude accounts
    #[command(subcommand)]
    Auth(AuthCommands),

    /// Manage CLIProxy variants and the proxy lifecycle
    Cliproxy(CliproxyArgs),

    /// Print the environment a profile would launch with
    #[command(after_help = "\
EXAMPLES:
    ccs env g3
    ccs env g3 --format openai --shell fish
    eval \"$(ccs env work)\"")]
    Env {
        /// Profile name
        profile: String,

        /// Output key set
        #[arg(long, default_value = "anthropic", value_parser = ["anthropic", "openai", "raw"])]
        format: String,

        /// Shell syntax for export lines
        #[arg(long, default_value = "auto", value_parser = ["auto", "bash", "fish", "powershell"])]
        shell: String,

        /// Thinking level override applied to the resolved models
        #[arg(long = "thinking")]
        thinking: Option<String>,
    },

    /// Inspect and edit CCS configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Create an isolated account profile
    #[command(after_help = "\
EXAMPLES:
    ccs auth create work
    ccs auth create backup --share-context --context-group 'Sprint A'
    ccs auth create pair --share-context --deeper-continuity")]
    Create {
        /// Profile name
        name: String,

        /// Overwrite an existing profile of the same name
        #[arg(long)]
        force: bool,

        /// Share workspace context with other accounts in the group
        #[arg(long)]
        share_context: bool,

        /// Context group to share with (implies --share-context)
        #[arg(long)]
        context_group: Option<String>,

        /// Seed session-memory files into the shared context
        #[arg(long)]
        deeper_continuity: bool,
    },

    /// List account profiles
    List {
        /// Machine-readable JSON output
        #[arg(long)]
        json: bool,

        /// Include context policy and instance directory status
        #[arg(long, short)]
        verbose: bool,
    },

    /// Show one account profile
    Show {
        /// Profile name
        name: String,
    },

    /// Remove an account and its isolated instance directory
    Remove {
        /// Profile name
        name: String,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Point the default profile at an account or variant
    Default {
        /// Profile name
        name: String,
    },

    /// Clear the default profile
    ResetDefault,
}

#[derive(Args)]
struct CliproxyArgs {
    /// CLIProxy build to validate against and record
    #[arg(long, value_parser = ["original", "plus"])]
    backend: Option<String>,

    #[command(subcommand)]
    command: CliproxyCommands,
}

#[derive(Subcommand)]
enum CliproxyCommands {
    /// Create a variant (single-provider, or composite with --composite)
    #[command(after_help = "\
EXAMPLES:
    ccs cliproxy create g3 --provider gemini --model gemini-2.5-pro
    ccs cliproxy create cx --provider codex --model gpt-5.3-codex --target droid
    ccs cliproxy create mix --composite --default-tier sonnet \\
        --opus agy:claude-opus-4-6-thinking \\
        --sonnet agy:claude-sonnet-4-5-thinking \\
        --haiku agy:claude-haiku-4-5-20251001")]
    Create {
        /// Variant name
        name: String,

        /// Provider (single-provider variants)
        #[arg(long)]
        provider: Option<String>,

        /// Model (single-provider variants)
        #[arg(long)]
        model: Option<String>,

        /// Upstream OAuth account to pin
        #[arg(long)]
        account: Option<String>,

        /// Child CLI to launch
        #[arg(long, default_value = "claude", value_parser = ["claude", "droid"])]
        target: String,

        /// Create a composite variant (requires all three tier flags)
        #[arg(long)]
        composite: bool,

        /// Tier whose model becomes ANTHROPIC_MODEL
        #[arg(long)]
        default_tier: Option<String>,

        /// Opus tier as provider:model
        #[arg(long)]
        opus: Option<String>,

        /// Sonnet tier as provider:model
        #[arg(long)]
        sonnet: Option<String>,

        /// Haiku tier as provider:model
        #[arg(long)]
        haiku: Option<String>,
    },

    /// Edit a variant in place
    Edit {
        /// Variant name
        name: String,

        /// New provider (requires --model)
        #[arg(long)]
        provider: Option<String>,

        /// New model
        #[arg(long)]
        model: Option<String>,

        /// New upstream account pin
        #[arg(long)]
        account: Option<String>,

        /// New child CLI target
        #[arg(long, value_parser = ["claude", "droid"])]
        target: Option<String>,

        /// New default tier (composite)
        #[arg(long)]
        default_tier: Option<String>,

        /// New opus tier as provider:model (composite)
        #[arg(long)]
        opus: Option<String>,

        /// New sonnet tier as provider:model (composite)
        #[arg(long)]
        sonnet: Option<String>,

        /// New haiku tier as provider:model (composite)
        #[arg(long)]
        haiku: Option<String>,
    },

    /// Remove a variant and its port artifacts
    Remove {
        /// Variant name
        name: String,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// List variants
    List {
        /// Machine-readable JSON output
        #[arg(long)]
        json: bool,
    },

    /// Start (or adopt) the proxy for a variant
    Start {
        /// Variant name
        name: String,
    },

    /// Stop the proxy for a variant or port
    Stop {
        /// Variant name
        name: Option<String>,

        /// Stop by port instead of name
        #[arg(long)]
        port: Option<u16>,
    },

    /// Stop and start a variant's proxy (re-reads the record)
    Restart {
        /// Variant name
        name: String,
    },

    /// Show proxy status for one variant or all
    Status {
        /// Variant name
        name: Option<String>,

        /// Machine-readable JSON output
        #[arg(long)]
        json: bool,
    },

    /// Point the default profile at a variant
    Default {
        /// Variant name
        name: String,
    },

    /// Show the supported providers and their bundled default models
    Catalog,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Inspect or edit the thinking-budget configuration
    #[command(after_help = "\
EXAMPLES:
    ccs config thinking --show
    ccs config thinking --mode manual --override high
    ccs config thinking --tier opus xhigh
    ccs config thinking --provider-override codex sonnet high
    ccs config thinking --clear-provider-override codex")]
    Thinking {
        /// Suffix mode
        #[arg(long, value_parser = ["auto", "off", "manual"])]
        mode: Option<String>,

        /// Manual override level
        #[arg(long = "override")]
        override_level: Option<String>,

        /// Clear the manual override
        #[arg(long)]
        clear_override: bool,

        /// Set a global tier default: <tier> <level>
        #[arg(long, num_args = 2, value_names = ["TIER", "LEVEL"])]
        tier: Option<Vec<String>>,

        /// Set a provider tier default: <provider> <tier> <level>
        #[arg(long, num_args = 3, value_names = ["PROVIDER", "TIER", "LEVEL"])]
        provider_override: Option<Vec<String>>,

        /// Clear provider overrides: <provider> [tier]
        #[arg(long, num_args = 1..=2, value_names = ["PROVIDER", "TIER"])]
        clear_provider_override: Option<Vec<String>>,

        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    initialize_logging();
    let cli = Cli::parse();
    let services = Services::from_env();

    let outcome = dispatch(cli, &services).await;
    match outcome {
        Ok(code) => std::process::ExitCode::from(u8::try_from(code.clamp(0, 255)).unwrap_or(1)),
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
        }
    }
}

fn initialize_logging() {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "ccs=warn".into()),
    );
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    // CCS_LOG_FILE=1 adds a debug-level daily file under <root>/logs/.
    let file_logging = std::env::var("CCS_LOG_FILE").is_ok_and(|v| v == "1");
    if file_logging {
        let logs_dir = ccs::utils::paths::CcsPaths::from_env().logs_dir();
        let _ = std::fs::create_dir_all(&logs_dir);
        let appender = tracing_appender::rolling::daily(logs_dir, "ccs.log");
        tracing_subscriber::registry()
            .with(console_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(appender)
                    .with_ansi(false)
                    .with_filter(tracing_subscriber::EnvFilter::new("ccs=debug")),
            )
            .init();
    } else {
        tracing_subscriber::registry().with(console_layer).init();
    }
}

async fn dispatch(cli: Cli, services: &Services) -> Result<i32, CcsError> {
    match cli.command {
        None => {
            let options = LaunchOptions {
                thinking_override: parse_thinking(services, cli.run.thinking.as_deref())?,
            };
            launcher::run_profile(
                services,
                cli.run.profile.as_deref(),
                &cli.run.prompt,
                &options,
            )
            .await
        }
        Some(Commands::Auth(cmd)) => match handle_auth(cmd, services) {
            Ok(()) => Ok(0),
            Err(err) => {
                eprintln!("Error: {err}");
                Ok(auth_exit_code(&err))
            }
        },
        Some(Commands::Cliproxy(args)) => handle_cliproxy(args, services).await,
        Some(Commands::Env {
            profile,
            format,
            shell,
            thinking,
        }) => {
            let options = LaunchOptions {
                thinking_override: parse_thinking(services, thinking.as_deref())?,
            };
            handle_env(services, &profile, &format, &shell, &options).map(|()| 0)
        }
        Some(Commands::Config(cmd)) => handle_config(cmd, services).map(|()| 0),
    }
}

/// Auth failures use their own exit code band: missing or conflicting
/// accounts exit 3, everything else keeps its kind's code.
fn auth_exit_code(err: &CcsError) -> i32 {
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::Conflict => 3,
        _ => err.exit_code(),
    }
}

/// Parse a `--thinking` value against the configured budget ceiling
/// (`thinking.max_budget` in the unified config, when lowered).
fn parse_thinking(
    services: &Services,
    raw: Option<&str>,
) -> Result<Option<ThinkingLevel>, CcsError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let ceiling = services
        .registry
        .store()
        .unified()
        .load()?
        .thinking
        .budget_ceiling();
    ThinkingLevel::parse(raw, ceiling).map(Some)
}

fn confirm(prompt: &str) -> bool {
    println!("{prompt} (y/N)");
    let mut input = String::new();
    if std::io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    input.trim().eq_ignore_ascii_case("y")
}

// ========== auth ==========

fn handle_auth(cmd: AuthCommands, services: &Services) -> Result<(), CcsError> {
    match cmd {
        AuthCommands::Create {
            name,
            force,
            share_context,
            context_group,
            deeper_continuity,
        } => {
            let mut record = AccountRecord::new(chrono::Utc::now());
            if share_context || context_group.is_some() {
                record.context_mode = ContextMode::Shared;
                if let Some(group) = &context_group {
                    if normalize_context_group(group).is_none() {
                        return Err(CcsError::InvalidContextGroup {
                            group: group.clone(),
                            reason: "must start with a letter and use letters, digits, '_', '-'"
                                .to_owned(),
                        });
                    }
                    record.context_group = Some(group.clone());
                }
                if deeper_continuity {
                    record.continuity_mode = Some(ContinuityMode::Deeper);
                }
            } else if deeper_continuity {
                return Err(CcsError::validation(
                    "--deeper-continuity requires --share-context",
                ));
            }

            services.registry.create_account(&name, record, force)?;
            let record = services
                .registry
                .get_account(&name)?
                .unwrap_or_else(|| AccountRecord::new(chrono::Utc::now()));
            let dir = services
                .instances
                .ensure_instance(&name, &record.context_policy())?;
            println!("Created account '{name}'");
            println!("Instance directory: {}", dir.display());
            Ok(())
        }
        AuthCommands::List { json, verbose } => {
            let accounts = services.registry.get_all_accounts_merged()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&accounts).map_err(
                    |e| CcsError::validation(format!("Could not serialize accounts: {e}"))
                )?);
                return Ok(());
            }
            if accounts.is_empty() {
                println!("No accounts. Create one with 'ccs auth create <name>'.");
                return Ok(());
            }
            let default = services.registry.get_default_resolved()?;
            for (name, record) in accounts {
                let marker = if default.as_deref() == Some(name.as_str()) {
                    "*"
                } else {
                    " "
                };
                let last_used = record
                    .last_used
                    .map_or_else(|| "never".to_owned(), |t| t.to_rfc3339());
                println!("{marker} {name:<24} last used: {last_used}");
                if verbose {
                    let policy = record.context_policy();
                    let dir = services.instances.instance_path(&name, &policy);
                    let status = if dir.is_dir() { "exists" } else { "missing" };
                    println!("      context: {policy:?}");
                    println!("      instance: {} ({status})", dir.display());
                }
            }
            Ok(())
        }
        AuthCommands::Show { name } => {
            let record = services
                .registry
                .get_account(&name)?
                .ok_or(CcsError::ProfileNotFound { name: name.clone() })?;
            println!("{name}");
            println!("  created: {}", record.created.to_rfc3339());
            println!(
                "  last used: {}",
                record
                    .last_used
                    .map_or_else(|| "never".to_owned(), |t| t.to_rfc3339())
            );
            println!("  context: {:?}", record.context_policy());
            Ok(())
        }
        AuthCommands::Remove { name, yes } => {
            if !yes && !confirm(&format!("Remove account '{name}' and its instance directory?")) {
                println!("Aborted");
                return Ok(());
            }
            let record = services.registry.remove_account(&name)?;
            services
                .instances
                .delete_instance(&name, &record.context_policy())?;
            println!("Removed account '{name}'");
            Ok(())
        }
        AuthCommands::Default { name } => {
            services.registry.set_default(&name)?;
            println!("Default profile is now '{name}'");
            Ok(())
        }
        AuthCommands::ResetDefault => {
            services.registry.clear_default()?;
            println!("Default profile cleared");
            Ok(())
        }
    }
}

// ========== cliproxy ==========

fn parse_tier_arg(raw: &str) -> Result<(Provider, String), CcsError> {
    let (provider, model) = raw.split_once(':').ok_or_else(|| {
        CcsError::validation(format!("Tier '{raw}' must be provider:model"))
    })?;
    let provider: Provider = provider.parse()?;
    if model.trim().is_empty() {
        return Err(CcsError::validation(format!(
            "Tier '{raw}' is missing a model"
        )));
    }
    Ok((provider, model.to_owned()))
}

fn tier_spec(raw: &str) -> Result<TierSpec, CcsError> {
    let (provider, model) = parse_tier_arg(raw)?;
    Ok(TierSpec {
        provider,
        model,
        fallback: None,
        thinking: None,
        account: None,
        extra: std::collections::BTreeMap::new(),
    })
}

fn tier_patch(raw: &str) -> Result<TierPatch, CcsError> {
    let (provider, model) = parse_tier_arg(raw)?;
    Ok(TierPatch {
        provider: Some(provider),
        model: Some(model),
        ..TierPatch::default()
    })
}

async fn handle_cliproxy(args: CliproxyArgs, services: &Services) -> Result<i32, CcsError> {
    if let Some(backend) = &args.backend {
        let backend: ProxyBackend = backend.parse()?;
        let store = services.registry.store().unified();
        let mut config = store.load()?;
        if config.cliproxy.backend != Some(backend) {
            config.cliproxy.backend = Some(backend);
            store.save(&config)?;
        }
    }

    match args.command {
        CliproxyCommands::Create {
            name,
            provider,
            model,
            account,
            target,
            composite,
            default_tier,
            opus,
            sonnet,
            haiku,
        } => {
            let target: Target = target.parse()?;
            if composite {
                let default_tier: TierName = default_tier
                    .ok_or_else(|| CcsError::validation("--composite requires --default-tier"))?
                    .parse()?;
                let (opus, sonnet, haiku) = match (opus, sonnet, haiku) {
                    (Some(o), Some(s), Some(h)) => (o, s, h),
                    _ => {
                        return Err(CcsError::validation(
                            "--composite requires --opus, --sonnet, and --haiku tiers",
                        ));
                    }
                };
                let tiers = CompositeTiers {
                    opus: tier_spec(&opus)?,
                    sonnet: tier_spec(&sonnet)?,
                    haiku: tier_spec(&haiku)?,
                };
                let record = services
                    .variants
                    .create_composite(&name, default_tier, tiers, target)?;
                println!("Created composite variant '{name}' on port {}", record.port);
            } else {
                let provider: Provider = provider
                    .ok_or_else(|| CcsError::validation("--provider is required"))?
                    .parse()?;
                let model =
                    model.ok_or_else(|| CcsError::validation("--model is required"))?;
                let record =
                    services
                        .variants
                        .create_single(&name, provider, model, account, target)?;
                println!("Created variant '{name}' on port {}", record.port);
                println!("Settings file: {}", record.settings);
            }
            Ok(0)
        }
        CliproxyCommands::Edit {
            name,
            provider,
            model,
            account,
            target,
            default_tier,
            opus,
            sonnet,
            haiku,
        } => {
            let target = target.map(|t| t.parse::<Target>()).transpose()?;
            let is_composite_edit =
                default_tier.is_some() || opus.is_some() || sonnet.is_some() || haiku.is_some();
            if is_composite_edit {
                let update = CompositeUpdate {
                    default_tier: default_tier.map(|t| t.parse()).transpose()?,
                    tiers: Some(TiersPatch {
                        opus: opus.as_deref().map(tier_patch).transpose()?,
                        sonnet: sonnet.as_deref().map(tier_patch).transpose()?,
                        haiku: haiku.as_deref().map(tier_patch).transpose()?,
                    }),
                    target,
                };
                services.variants.update_composite(&name, update)?;
            } else {
                let update = SingleUpdate {
                    provider: provider.map(|p| p.parse::<Provider>()).transpose()?,
                    model,
                    account,
                    target,
                };
                services.variants.update_single(&name, update)?;
            }
            println!("Updated variant '{name}'");
            Ok(0)
        }
        CliproxyCommands::Remove { name, yes } => {
            if !yes && !confirm(&format!("Remove variant '{name}'?")) {
                println!("Aborted");
                return Ok(0);
            }
            let removed = services.variants.remove(&name)?;
            println!("Removed variant '{name}' (port {})", removed.port());
            Ok(0)
        }
        CliproxyCommands::List { json } => {
            let summaries = services.variants.summaries()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries).map_err(
                    |e| CcsError::validation(format!("Could not serialize variants: {e}"))
                )?);
                return Ok(0);
            }
            if summaries.is_empty() {
                println!("No variants. Create one with 'ccs cliproxy create <name> ...'.");
                return Ok(0);
            }
            for summary in summaries {
                match summary.kind {
                    "composite" => println!(
                        "{:<20} composite  port {:<6} default {}  target {}",
                        summary.name,
                        summary.port,
                        summary
                            .default_tier
                            .map_or_else(String::new, |t| t.to_string()),
                        summary.target,
                    ),
                    _ => println!(
                        "{:<20} {:<10} port {:<6} model {}  target {}",
                        summary.name,
                        summary
                            .provider
                            .map_or_else(String::new, |p| p.to_string()),
                        summary.port,
                        summary.model.as_deref().unwrap_or("(default)"),
                        summary.target,
                    ),
                }
            }
            Ok(0)
        }
        CliproxyCommands::Start { name } => {
            let pid = launcher::start_proxy(services, &name).await?;
            println!("CLIProxy for '{name}' is running (pid {pid})");
            Ok(0)
        }
        CliproxyCommands::Stop { name, port } => {
            let port = match (name, port) {
                (_, Some(port)) => port,
                (Some(name), None) => services
                    .registry
                    .get_variant(&name)?
                    .ok_or(CcsError::ProfileNotFound { name })?
                    .port(),
                (None, None) => ccs::utils::paths::DEFAULT_PROXY_PORT,
            };
            let outcome = services.sessions.stop_proxy(port).await?;
            if outcome.stopped {
                println!(
                    "Stopped CLIProxy on port {port} (pid {})",
                    outcome.pid.unwrap_or_default()
                );
            } else {
                println!("No CLIProxy running on port {port}");
            }
            Ok(0)
        }
        CliproxyCommands::Restart { name } => {
            let record = services
                .registry
                .get_variant(&name)?
                .ok_or(CcsError::ProfileNotFound { name: name.clone() })?;
            let outcome = services.sessions.stop_proxy(record.port()).await?;
            if outcome.stopped {
                println!("Stopped CLIProxy on port {}", record.port());
            }
            let pid = launcher::start_proxy(services, &name).await?;
            println!("CLIProxy for '{name}' is running (pid {pid})");
            Ok(0)
        }
        CliproxyCommands::Status { name, json } => {
            let targets: Vec<(String, u16)> = match name {
                Some(name) => {
                    let record = services
                        .registry
                        .get_variant(&name)?
                        .ok_or(CcsError::ProfileNotFound { name: name.clone() })?;
                    vec![(name, record.port())]
                }
                None => services
                    .variants
                    .list()?
                    .into_iter()
                    .map(|(name, record)| (name, record.port()))
                    .collect(),
            };
            if json {
                let mut rows = Vec::new();
                for (name, port) in targets {
                    let status = services.sessions.proxy_status(port);
                    let mut row = serde_json::to_value(&status).map_err(|e| {
                        CcsError::validation(format!("Could not serialize status: {e}"))
                    })?;
                    if let Some(obj) = row.as_object_mut() {
                        obj.insert("name".to_owned(), serde_json::Value::String(name));
                        obj.insert("port".to_owned(), serde_json::Value::from(port));
                    }
                    rows.push(row);
                }
                println!("{}", serde_json::to_string_pretty(&rows).map_err(
                    |e| CcsError::validation(format!("Could not serialize status: {e}"))
                )?);
                return Ok(0);
            }
            if targets.is_empty() {
                println!("No variants configured");
                return Ok(0);
            }
            for (name, port) in targets {
                let status = services.sessions.proxy_status(port);
                if status.running {
                    println!(
                        "{name:<20} port {port:<6} running  pid {:<8} sessions {}  target {}  backend {}  version {}  started {}",
                        status.pid.unwrap_or_default(),
                        status.session_count,
                        status
                            .target
                            .map_or_else(|| "-".to_owned(), |t| t.to_string()),
                        status
                            .backend
                            .map_or_else(|| "-".to_owned(), |b| b.to_string()),
                        status.version.as_deref().unwrap_or("-"),
                        status
                            .started_at
                            .map_or_else(|| "-".to_owned(), |t| t.to_rfc3339()),
                    );
                } else {
                    println!("{name:<20} port {port:<6} stopped");
                }
            }
            Ok(0)
        }
        CliproxyCommands::Default { name } => {
            services.registry.set_default(&name)?;
            println!("Default profile is now '{name}'");
            Ok(0)
        }
        CliproxyCommands::Catalog => {
            let config = services.registry.store().unified().load()?;
            let backend = config.backend();
            println!("CLIProxy backend: {backend}");
            for provider in ccs::providers::ALL_PROVIDERS {
                let note = if provider.plus_only() && backend == ProxyBackend::Original {
                    "  (requires plus backend)"
                } else {
                    ""
                };
                println!(
                    "{:<8} default model: {}{note}",
                    provider.as_str(),
                    provider.default_model(),
                );
            }
            Ok(0)
        }
    }
}

// ========== env ==========

fn handle_env(
    services: &Services,
    profile: &str,
    format: &str,
    shell: &str,
    options: &LaunchOptions,
) -> Result<(), CcsError> {
    let env = launcher::resolve_profile_env(services, profile, options)?;

    let pairs: Vec<(String, String)> = match format {
        "openai" => {
            let map = |from: &str, to: &str| {
                env.get(from).map(|v| (to.to_owned(), v.clone()))
            };
            [
                map("ANTHROPIC_BASE_URL", "OPENAI_BASE_URL"),
                map("ANTHROPIC_AUTH_TOKEN", "OPENAI_API_KEY"),
                map("ANTHROPIC_MODEL", "OPENAI_MODEL"),
            ]
            .into_iter()
            .flatten()
            .collect()
        }
        _ => env
            .iter()
            .filter(|(key, _)| key.starts_with("ANTHROPIC_") || key.as_str() == "CLAUDE_CONFIG_DIR")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    };

    let shell = match shell {
        "auto" => detect_shell(),
        other => other.to_owned(),
    };
    for (key, value) in pairs {
        match (format, shell.as_str()) {
            ("raw", _) => println!("{key}={value}"),
            (_, "fish") => println!("set -gx {key} \"{value}\""),
            (_, "powershell") => println!("$env:{key} = \"{value}\""),
            _ => println!("export {key}=\"{value}\""),
        }
    }
    Ok(())
}

fn detect_shell() -> String {
    if cfg!(windows) {
        return "powershell".to_owned();
    }
    match std::env::var("SHELL") {
        Ok(shell) if shell.contains("fish") => "fish".to_owned(),
        _ => "bash".to_owned(),
    }
}

// ========== config ==========

fn handle_config(cmd: ConfigCommands, services: &Services) -> Result<(), CcsError> {
    match cmd {
        ConfigCommands::Thinking {
            mode,
            override_level,
            clear_override,
            tier,
            provider_override,
            clear_provider_override,
            show,
        } => {
            let store = services.registry.store().unified();
            let mut config = store.load()?;
            let ceiling = config.thinking.budget_ceiling();
            let mut changed = false;

            if let Some(mode) = mode {
                config.thinking.mode = match mode.as_str() {
                    "off" => ccs::core::thinking::ThinkingMode::Off,
                    "manual" => ccs::core::thinking::ThinkingMode::Manual,
                    _ => ccs::core::thinking::ThinkingMode::Auto,
                };
                changed = true;
            }
            if let Some(level) = override_level {
                config.thinking.manual_override = Some(ThinkingLevel::parse(&level, ceiling)?);
                changed = true;
            }
            if clear_override {
                config.thinking.manual_override = None;
                changed = true;
            }
            if let Some(pair) = tier {
                let tier: TierName = pair[0].parse()?;
                let level = ThinkingLevel::parse(&pair[1], ceiling)?;
                let defaults = &mut config.thinking.tier_defaults;
                match tier {
                    TierName::Opus => defaults.opus = Some(level),
                    TierName::Sonnet => defaults.sonnet = Some(level),
                    TierName::Haiku => defaults.haiku = Some(level),
                }
                changed = true;
            }
            if let Some(triple) = provider_override {
                let provider: Provider = triple[0].parse()?;
                let tier: TierName = triple[1].parse()?;
                let level = ThinkingLevel::parse(&triple[2], ceiling)?;
                let defaults = config
                    .thinking
                    .provider_overrides
                    .entry(provider.to_string())
                    .or_default();
                match tier {
                    TierName::Opus => defaults.opus = Some(level),
                    TierName::Sonnet => defaults.sonnet = Some(level),
                    TierName::Haiku => defaults.haiku = Some(level),
                }
                changed = true;
            }
            if let Some(args) = clear_provider_override {
                let provider: Provider = args[0].parse()?;
                match args.get(1) {
                    Some(tier) => {
                        let tier: TierName = tier.parse()?;
                        if let Some(defaults) = config
                            .thinking
                            .provider_overrides
                            .get_mut(&provider.to_string())
                        {
                            match tier {
                                TierName::Opus => defaults.opus = None,
                                TierName::Sonnet => defaults.sonnet = None,
                                TierName::Haiku => defaults.haiku = None,
                            }
                        }
                    }
                    None => {
                        config
                            .thinking
                            .provider_overrides
                            .remove(&provider.to_string());
                    }
                }
                changed = true;
            }

            if changed {
                store.save(&config)?;
                println!("Thinking configuration updated");
            }
            if show || !changed {
                println!("mode: {:?}", config.thinking.mode);
                println!(
                    "override: {}",
                    config
                        .thinking
                        .manual_override
                        .map_or_else(|| "none".to_owned(), |l| l.to_string())
                );
                let defaults = &config.thinking.tier_defaults;
                for (tier, level) in [
                    ("opus", defaults.opus),
                    ("sonnet", defaults.sonnet),
                    ("haiku", defaults.haiku),
                ] {
                    println!(
                        "tier {tier}: {}",
                        level.map_or_else(|| "none".to_owned(), |l| l.to_string())
                    );
                }
                for (provider, defaults) in &config.thinking.provider_overrides {
                    for (tier, level) in [
                        ("opus", defaults.opus),
                        ("sonnet", defaults.sonnet),
                        ("haiku", defaults.haiku),
                    ] {
                        if let Some(level) = level {
                            println!("provider {provider} {tier}: {level}");
                        }
                    }
                }
            }
            Ok(())
        }
    }
}
