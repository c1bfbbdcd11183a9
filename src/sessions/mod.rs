//! CLIProxy Session Manager: per-port reference counting and proxy
//! lifecycle.
//!
//! State lives in whole-file-atomic JSON locks under
//! `<root>/cliproxy/`. Readers tolerate missing or partial locks by
//! reporting "no lock"; the caller re-spawns or re-adopts. Multiple
//! concurrent `ccs` invocations race only here.

/// Platform process probing behind a small adapter trait.
pub mod os;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::errors::{CcsError, Result};
use crate::core::variant::Target;
use crate::providers::ProxyBackend;
use crate::store::atomic::write_json;
use crate::utils::paths::CcsPaths;

pub use os::{ListenerInfo, ProcessAdapter};

/// How long a proxy gets to exit after SIGTERM.
const GRACEFUL_WAIT: Duration = Duration::from_secs(3);

/// How long a proxy gets to exit after SIGKILL.
const FORCE_WAIT: Duration = Duration::from_secs(1);

/// Poll interval while waiting for a signalled proxy to exit.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Target recorded on a lock; `mixed` appears when concurrent sessions
/// disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockTarget {
    /// All sessions launched `claude`.
    Claude,
    /// All sessions launched `droid`.
    Droid,
    /// Sessions disagree.
    Mixed,
}

impl From<Target> for LockTarget {
    fn from(target: Target) -> Self {
        match target {
            Target::Claude => Self::Claude,
            Target::Droid => Self::Droid,
        }
    }
}

impl std::fmt::Display for LockTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Claude => f.write_str("claude"),
            Self::Droid => f.write_str("droid"),
            Self::Mixed => f.write_str("mixed"),
        }
    }
}

/// Authoritative per-port record: proxy PID and the set of live CCS
/// invocations sharing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLock {
    /// The port this lock governs.
    pub port: u16,
    /// Proxy process id.
    pub pid: u32,
    /// Live session ids (8-byte hex).
    pub sessions: Vec<String>,
    /// When the proxy was spawned or adopted.
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    /// Proxy version, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Proxy build flavor, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<ProxyBackend>,
    /// Aggregated child-CLI target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<LockTarget>,
    /// Unknown fields round-trip untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Snapshot returned by [`SessionManager::proxy_status`]. Serializes
/// with the same camelCase keys as the lock file.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyStatus {
    /// Whether a live proxy holds the port.
    pub running: bool,
    /// Proxy pid when running.
    pub pid: Option<u32>,
    /// Number of live sessions.
    #[serde(rename = "sessionCount")]
    pub session_count: usize,
    /// When the proxy started.
    #[serde(rename = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    /// Proxy version, when recorded.
    pub version: Option<String>,
    /// Proxy build flavor, when recorded.
    pub backend: Option<ProxyBackend>,
    /// Aggregated target, when recorded.
    pub target: Option<LockTarget>,
}

/// Outcome of [`SessionManager::stop_proxy`].
#[derive(Debug, Clone, Copy)]
pub struct StopOutcome {
    /// Whether this call terminated a process.
    pub stopped: bool,
    /// The pid that was (or had been) holding the port.
    pub pid: Option<u32>,
    /// Sessions recorded on the lock at stop time.
    pub session_count: usize,
}

/// Per-port session registry and proxy lifecycle.
#[derive(Debug, Clone)]
pub struct SessionManager {
    paths: CcsPaths,
    os: Arc<dyn ProcessAdapter>,
}

impl SessionManager {
    /// A manager using the platform process adapter.
    #[cfg(unix)]
    #[must_use]
    pub fn new(paths: CcsPaths) -> Self {
        Self::with_adapter(paths, Arc::new(os::UnixProcessAdapter))
    }

    /// A manager with an explicit process adapter (tests).
    #[must_use]
    pub fn with_adapter(paths: CcsPaths, os: Arc<dyn ProcessAdapter>) -> Self {
        Self { paths, os }
    }

    /// Borrow the process adapter.
    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn ProcessAdapter> {
        &self.os
    }

    /// Read the lock for a port. Missing or unreadable locks read as
    /// `None`; the caller re-spawns or re-adopts.
    #[must_use]
    pub fn read_lock(&self, port: u16) -> Option<SessionLock> {
        let path = self.paths.sessions_file(port);
        match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(lock) => Some(lock),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Ignoring unreadable session lock");
                    None
                }
            },
            Err(_) => None,
        }
    }

    fn write_lock(&self, lock: &SessionLock) -> Result<()> {
        write_json(&self.paths.sessions_file(lock.port), lock)
    }

    fn delete_lock(&self, port: u16) {
        let path = self.paths.sessions_file(port);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %path.display(), error = %e, "Failed to delete session lock");
            }
        }
    }

    /// Register a session against a port, creating the lock when this
    /// is the first session. Returns the new session id.
    ///
    /// # Errors
    ///
    /// `io` on lock-write failures.
    pub fn register_session(
        &self,
        port: u16,
        proxy_pid: u32,
        version: Option<String>,
        backend: Option<ProxyBackend>,
        target: Target,
    ) -> Result<String> {
        let id = new_session_id();
        let mut lock = self.read_lock(port).unwrap_or_else(|| SessionLock {
            port,
            pid: proxy_pid,
            sessions: Vec::new(),
            started_at: Utc::now(),
            version: version.clone(),
            backend,
            target: None,
            extra: BTreeMap::new(),
        });

        lock.pid = proxy_pid;
        if lock.version.is_none() {
            lock.version = version;
        }
        if lock.backend.is_none() {
            lock.backend = backend;
        }
        lock.target = Some(match lock.target {
            None => target.into(),
            Some(existing) if existing == target.into() => existing,
            Some(_) => LockTarget::Mixed,
        });
        lock.sessions.push(id.clone());
        self.write_lock(&lock)?;
        tracing::debug!(port, pid = proxy_pid, session = %id, count = lock.sessions.len(), "Registered proxy session");
        Ok(id)
    }

    /// Drop a session id from a port's lock. Returns `true` when this
    /// was the last session (the lock is deleted and the caller owns
    /// proxy termination). A missing lock counts as last.
    ///
    /// # Errors
    ///
    /// `io` on lock-write failures.
    pub fn unregister_session(&self, id: &str, port: u16) -> Result<bool> {
        let Some(mut lock) = self.read_lock(port) else {
            return Ok(true);
        };
        lock.sessions.retain(|s| s != id);
        if lock.sessions.is_empty() {
            self.delete_lock(port);
            tracing::debug!(port, session = %id, "Last session unregistered; lock removed");
            return Ok(true);
        }
        self.write_lock(&lock)?;
        tracing::debug!(port, session = %id, remaining = lock.sessions.len(), "Unregistered proxy session");
        Ok(false)
    }

    /// Status snapshot for a port. A lock pointing at a dead PID is
    /// cleaned up and reported as not running.
    #[must_use]
    pub fn proxy_status(&self, port: u16) -> ProxyStatus {
        match self.read_lock(port) {
            Some(lock) if self.os.is_alive(lock.pid) => ProxyStatus {
                running: true,
                pid: Some(lock.pid),
                session_count: lock.sessions.len(),
                started_at: Some(lock.started_at),
                version: lock.version,
                backend: lock.backend,
                target: lock.target,
            },
            Some(lock) => {
                tracing::debug!(port, pid = lock.pid, "Lock references dead proxy; removing");
                self.delete_lock(port);
                ProxyStatus {
                    running: false,
                    pid: None,
                    session_count: 0,
                    started_at: None,
                    version: None,
                    backend: None,
                    target: None,
                }
            }
            None => ProxyStatus {
                running: false,
                pid: None,
                session_count: 0,
                started_at: None,
                version: None,
                backend: None,
                target: None,
            },
        }
    }

    /// Remove a lock whose PID has died. Returns whether a stale lock
    /// was removed.
    #[must_use]
    pub fn cleanup_orphaned_sessions(&self, port: u16) -> bool {
        match self.read_lock(port) {
            Some(lock) if !self.os.is_alive(lock.pid) => {
                self.delete_lock(port);
                tracing::debug!(port, pid = lock.pid, "Removed orphaned session lock");
                true
            }
            _ => false,
        }
    }

    /// Stop the proxy on a port: SIGTERM, wait up to 3 s, SIGKILL, wait
    /// up to 1 s more, then delete the lock. Without a lock, the port is
    /// probed; an identifiable CLIProxy is stopped the same way.
    ///
    /// # Errors
    ///
    /// `conflict` when the port is held by a foreign program; `io` on
    /// signal failures other than already-gone races.
    pub async fn stop_proxy(&self, port: u16) -> Result<StopOutcome> {
        if let Some(lock) = self.read_lock(port) {
            let session_count = lock.sessions.len();
            if self.os.is_alive(lock.pid) {
                self.escalate(lock.pid).await?;
                self.delete_lock(port);
                return Ok(StopOutcome {
                    stopped: true,
                    pid: Some(lock.pid),
                    session_count,
                });
            }
            // Already gone; just clean up.
            self.delete_lock(port);
            return Ok(StopOutcome {
                stopped: false,
                pid: Some(lock.pid),
                session_count,
            });
        }

        match self.os.find_listener(port) {
            Some(info) if looks_like_cliproxy(&info.name) => {
                self.escalate(info.pid).await?;
                self.delete_lock(port);
                Ok(StopOutcome {
                    stopped: true,
                    pid: Some(info.pid),
                    session_count: 0,
                })
            }
            Some(info) => Err(CcsError::ForeignListener {
                port,
                program: info.name,
            }),
            None => Ok(StopOutcome {
                stopped: false,
                pid: None,
                session_count: 0,
            }),
        }
    }

    /// SIGTERM → poll → SIGKILL → poll.
    async fn escalate(&self, pid: u32) -> Result<()> {
        if let Err(e) = self.os.terminate(pid, true) {
            // The process may have exited between the liveness check and
            // the signal.
            if !self.os.is_alive(pid) {
                return Ok(());
            }
            return Err(CcsError::External {
                message: format!("Failed to signal proxy pid {pid}: {e}"),
            });
        }
        if self.wait_for_exit(pid, GRACEFUL_WAIT).await {
            return Ok(());
        }

        tracing::warn!(pid, "Proxy ignored SIGTERM; escalating to SIGKILL");
        if let Err(e) = self.os.terminate(pid, false) {
            if !self.os.is_alive(pid) {
                return Ok(());
            }
            return Err(CcsError::External {
                message: format!("Failed to kill proxy pid {pid}: {e}"),
            });
        }
        if !self.wait_for_exit(pid, FORCE_WAIT).await {
            tracing::warn!(pid, "Proxy still alive after SIGKILL");
        }
        Ok(())
    }

    async fn wait_for_exit(&self, pid: u32, timeout: Duration) -> bool {
        let start = tokio::time::Instant::now();
        while start.elapsed() < timeout {
            if !self.os.is_alive(pid) {
                return true;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        !self.os.is_alive(pid)
    }
}

/// Process-name heuristic for adoptable proxies.
fn looks_like_cliproxy(name: &str) -> bool {
    name.to_lowercase().contains("cliproxy")
}

/// Fresh 8-byte hex session id.
fn new_session_id() -> String {
    let mut bytes = [0_u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
