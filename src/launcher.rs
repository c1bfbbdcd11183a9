//! Launch orchestration: resolve a profile, wire the proxy and
//! environment, spawn the child CLI, and tear down on exit.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use fs2::FileExt;

use crate::core::errors::{CcsError, Result};
use crate::core::profile::AccountRecord;
use crate::core::thinking::ThinkingLevel;
use crate::core::variant::VariantRecord;
use crate::providers::Provider;
use crate::registry::ResolvedProfile;
use crate::resolver::{CompositeEnvSpec, RemoteRewrite, ResolveRequest, strip_ambient};
use crate::services::Services;
use crate::store::UnifiedConfig;
use crate::store::atomic::write_json;
use crate::utils::paths::expand_tilde;

/// Time a freshly spawned proxy gets to start listening.
const PROXY_START_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for the proxy port.
const PROXY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Brief delay after spawn to catch immediate crashes.
const SPAWN_HEALTH_CHECK_DELAY: Duration = Duration::from_millis(200);

/// Options carried from the CLI into a launch.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Explicit `--thinking` override.
    pub thinking_override: Option<ThinkingLevel>,
}

/// Launch a profile by name (or the resolved default) and return the
/// child's exit code.
///
/// # Errors
///
/// `not_found` for unknown profiles, `external` when the child CLI or
/// proxy binary cannot be started.
pub async fn run_profile(
    services: &Services,
    name: Option<&str>,
    prompt: &[String],
    options: &LaunchOptions,
) -> Result<i32> {
    let name = match name {
        Some(n) => n.to_owned(),
        None => services
            .registry
            .get_default_resolved()?
            .ok_or_else(|| CcsError::validation("No profile given and no default configured"))?,
    };

    match services.registry.resolve(&name)? {
        ResolvedProfile::Account(record) => run_account(services, &name, &record, prompt).await,
        ResolvedProfile::Variant(record) => {
            run_variant(services, &name, &record, prompt, options).await
        }
    }
}

/// Resolve the environment a profile would launch with, without
/// spawning anything. Backs the `ccs env` command.
///
/// # Errors
///
/// `not_found` for unknown profiles, `io` on store failures.
pub fn resolve_profile_env(
    services: &Services,
    name: &str,
    options: &LaunchOptions,
) -> Result<BTreeMap<String, String>> {
    let ambient: BTreeMap<String, String> = std::env::vars().collect();
    match services.registry.resolve(name)? {
        ResolvedProfile::Account(record) => {
            let mut env = strip_ambient(&ambient);
            let dir = services.instances.instance_path(name, &record.context_policy());
            env.insert("CLAUDE_CONFIG_DIR".to_owned(), dir.display().to_string());
            Ok(env)
        }
        ResolvedProfile::Variant(record) => {
            let config = services.registry.store().unified().load()?;
            let request = variant_request(&record, &config, options);
            services.resolver.resolve(&request, &config, &ambient)
        }
    }
}

/// Build the resolver request for a variant record.
fn variant_request<'a>(
    record: &'a VariantRecord,
    config: &UnifiedConfig,
    options: &LaunchOptions,
) -> ResolveRequest<'a> {
    let (provider, composite) = match record {
        VariantRecord::Single(s) => (s.provider, None),
        VariantRecord::Composite(c) => (
            c.default_spec().provider,
            Some(CompositeEnvSpec {
                tiers: &c.tiers,
                default_tier: c.default_tier,
            }),
        ),
    };
    ResolveRequest {
        provider,
        port: record.port(),
        custom_settings: Some(expand_tilde(record.settings())),
        remote: config.active_remote().map(RemoteRewrite::from),
        composite,
        thinking_override: options.thinking_override,
        variant_auth: None,
    }
}

async fn run_account(
    services: &Services,
    name: &str,
    record: &AccountRecord,
    prompt: &[String],
) -> Result<i32> {
    let policy = record.context_policy();
    let dir = services.instances.ensure_instance(name, &policy)?;

    // The touch is best-effort: the account may live in the other store.
    if let Err(e) = services.registry.touch_account(name) {
        tracing::debug!(name, error = %e, "Could not stamp last_used");
    }

    let ambient: BTreeMap<String, String> = std::env::vars().collect();
    let mut env = strip_ambient(&ambient);
    env.insert("CLAUDE_CONFIG_DIR".to_owned(), dir.display().to_string());

    tracing::info!(name, instance = %dir.display(), "Launching claude for account");
    spawn_child("claude", prompt, &env).await
}

async fn run_variant(
    services: &Services,
    name: &str,
    record: &VariantRecord,
    prompt: &[String],
    options: &LaunchOptions,
) -> Result<i32> {
    let port = record.port();
    let target = record.target();
    let config = services.registry.store().unified().load()?;

    let proxy_pid = ensure_proxy_running(services, name, record, &config).await?;
    let session_id = services.sessions.register_session(
        port,
        proxy_pid,
        None,
        config.cliproxy.backend,
        target,
    )?;

    let launch = async {
        let ambient: BTreeMap<String, String> = std::env::vars().collect();
        let request = variant_request(record, &config, options);
        let env = services.resolver.resolve(&request, &config, &ambient)?;
        tracing::info!(name, port, target = %target, "Launching child CLI");
        spawn_child(target.binary(), prompt, &env).await
    };
    let outcome = launch.await;

    // Teardown runs on every path; the child's outcome wins.
    match services.sessions.unregister_session(&session_id, port) {
        Ok(true) => {
            if let Err(e) = services.sessions.stop_proxy(port).await {
                tracing::debug!(port, error = %e, "Proxy stop after last session failed");
            }
        }
        Ok(false) => {}
        Err(e) => tracing::debug!(port, error = %e, "Session unregister failed"),
    }

    outcome
}

/// Spawn the child CLI with inherited stdio and the resolved
/// environment; wait for it, re-arming on Ctrl-C (the child receives
/// the signal through the shared terminal).
async fn spawn_child(binary: &str, prompt: &[String], env: &BTreeMap<String, String>) -> Result<i32> {
    let mut command = tokio::process::Command::new(binary);
    command.args(prompt).env_clear().envs(env);

    let mut child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CcsError::External {
                message: format!("'{binary}' was not found on PATH; install it first"),
            }
        } else {
            CcsError::External {
                message: format!("Failed to launch '{binary}': {e}"),
            }
        }
    })?;

    let status = loop {
        tokio::select! {
            status = child.wait() => {
                break status.map_err(|e| CcsError::External {
                    message: format!("Failed waiting for '{binary}': {e}"),
                })?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::debug!(binary, "Interrupt received; waiting for child to exit");
            }
        }
    };
    Ok(status.code().unwrap_or(130))
}

/// Start (or adopt) the proxy for a named variant without launching a
/// child CLI. Backs `ccs cliproxy start`.
///
/// # Errors
///
/// `not_found` for unknown variants, `external` on spawn failures.
pub async fn start_proxy(services: &Services, name: &str) -> Result<u32> {
    let record = services
        .registry
        .get_variant(name)?
        .ok_or_else(|| CcsError::ProfileNotFound {
            name: name.to_owned(),
        })?;
    let config = services.registry.store().unified().load()?;
    ensure_proxy_running(services, name, &record, &config).await
}

/// Ensure a CLIProxy serves the variant's port: adopt a live lock,
/// adopt an identifiable foreign proxy, or spawn a fresh one under a
/// file lock so concurrent invocations do not double-spawn.
async fn ensure_proxy_running(
    services: &Services,
    name: &str,
    record: &VariantRecord,
    config: &UnifiedConfig,
) -> Result<u32> {
    let port = record.port();

    if let Some(lock) = services.sessions.read_lock(port) {
        if services.sessions.adapter().is_alive(lock.pid) {
            tracing::debug!(port, pid = lock.pid, "Adopting running proxy");
            return Ok(lock.pid);
        }
        let _ = services.sessions.cleanup_orphaned_sessions(port);
    }

    if let Some(info) = services.sessions.adapter().find_listener(port) {
        if info.name.to_lowercase().contains("cliproxy") {
            tracing::debug!(port, pid = info.pid, "Adopting foreign proxy process");
            return Ok(info.pid);
        }
        return Err(CcsError::ForeignListener {
            port,
            program: info.name,
        });
    }

    // Serialize spawns per port; the loser of the race adopts.
    let guard = match acquire_spawn_lock(services, port) {
        Ok(guard) => guard,
        Err(_) => {
            tracing::debug!(port, "Another invocation is spawning; waiting to adopt");
            wait_for_port(port, PROXY_START_TIMEOUT).await?;
            return services
                .sessions
                .adapter()
                .find_listener(port)
                .map(|info| info.pid)
                .ok_or_else(|| CcsError::External {
                    message: format!("CLIProxy on port {port} vanished while starting"),
                });
        }
    };

    let pid = spawn_proxy(services, name, record, config, port)?;
    wait_for_port(port, PROXY_START_TIMEOUT).await?;
    drop(guard);
    Ok(pid)
}

/// RAII guard for the per-port spawn lock.
struct SpawnLockGuard {
    _file: std::fs::File,
    path: PathBuf,
}

impl Drop for SpawnLockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn acquire_spawn_lock(services: &Services, port: u16) -> Result<SpawnLockGuard> {
    let path = services
        .paths
        .cliproxy_dir()
        .join(format!("spawn-{port}.lock"));
    crate::store::atomic::ensure_private_dir(&services.paths.cliproxy_dir())?;

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .map_err(|e| CcsError::io(&path, e))?;
    file.try_lock_exclusive().map_err(|_| CcsError::Transient {
        message: format!("Another process is spawning the proxy for port {port}"),
    })?;

    let mut file = file;
    let _ = writeln!(file, "{}", std::process::id());
    Ok(SpawnLockGuard { _file: file, path })
}

/// Write the per-port proxy config and spawn the proxy detached into
/// its own process group.
fn spawn_proxy(
    services: &Services,
    name: &str,
    record: &VariantRecord,
    config: &UnifiedConfig,
    port: u16,
) -> Result<u32> {
    let config_path = services.paths.proxy_config_file(port);
    write_json(&config_path, &proxy_config_body(name, record, config, port))?;

    let binary = config
        .cliproxy
        .command
        .clone()
        .unwrap_or_else(|| "cliproxy".to_owned());

    let mut command = std::process::Command::new(&binary);
    command
        .arg("--port")
        .arg(port.to_string())
        .arg("--config")
        .arg(&config_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // A new process group keeps parent Ctrl-C away from the proxy.
        command.process_group(0);
    }

    let mut child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CcsError::External {
                message: format!("CLIProxy binary '{binary}' was not found on PATH"),
            }
        } else {
            CcsError::External {
                message: format!("Failed to spawn CLIProxy '{binary}': {e}"),
            }
        }
    })?;

    std::thread::sleep(SPAWN_HEALTH_CHECK_DELAY);
    match child.try_wait() {
        Ok(Some(status)) => Err(CcsError::External {
            message: format!("CLIProxy exited immediately with status {status}"),
        }),
        Ok(None) => {
            let pid = child.id();
            tracing::info!(port, pid, "Spawned CLIProxy");
            Ok(pid)
        }
        Err(e) => Err(CcsError::External {
            message: format!("Could not check CLIProxy health: {e}"),
        }),
    }
}

/// Minimal per-port proxy config: which providers and accounts this
/// port serves.
fn proxy_config_body(
    name: &str,
    record: &VariantRecord,
    config: &UnifiedConfig,
    port: u16,
) -> serde_json::Value {
    let backend = config.backend();
    match record {
        VariantRecord::Single(s) => serde_json::json!({
            "port": port,
            "variant": name,
            "backend": backend,
            "provider": s.provider,
            "account": s.account,
        }),
        VariantRecord::Composite(c) => {
            let providers: Vec<Provider> = {
                let mut seen = Vec::new();
                for &tier in crate::core::variant::ALL_TIERS {
                    let p = c.tiers.get(tier).provider;
                    if !seen.contains(&p) {
                        seen.push(p);
                    }
                }
                seen
            };
            serde_json::json!({
                "port": port,
                "variant": name,
                "backend": backend,
                "routing": "model",
                "providers": providers,
                "default_tier": c.default_tier,
            })
        }
    }
}

/// Wait for something to accept connections on the loopback port.
async fn wait_for_port(port: u16, timeout: Duration) -> Result<()> {
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout {
        if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return Ok(());
        }
        tokio::time::sleep(PROXY_POLL_INTERVAL).await;
    }
    Err(CcsError::External {
        message: format!("CLIProxy did not start listening on port {port} within {}s", timeout.as_secs()),
    })
}
