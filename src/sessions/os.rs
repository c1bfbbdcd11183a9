//! OS adapter for process probing and termination.
//!
//! The Session Manager stays OS-neutral: everything platform-specific
//! sits behind [`ProcessAdapter`].

use std::process::Command;

/// A process found listening on a TCP port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerInfo {
    /// Listening process id.
    pub pid: u32,
    /// Process command name.
    pub name: String,
}

/// Platform-specific process operations.
pub trait ProcessAdapter: Send + Sync + std::fmt::Debug {
    /// Whether the process exists. Permission errors count as alive.
    fn is_alive(&self, pid: u32) -> bool;

    /// Send a termination signal: SIGTERM when graceful, SIGKILL
    /// otherwise (or the platform equivalent).
    fn terminate(&self, pid: u32, graceful: bool) -> std::io::Result<()>;

    /// Find the process listening on a loopback TCP port, if any.
    fn find_listener(&self, port: u16) -> Option<ListenerInfo>;
}

/// Unix implementation: signal 0 liveness, `kill(2)` termination, and
/// `lsof` for listener identification.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixProcessAdapter;

#[cfg(unix)]
impl ProcessAdapter for UnixProcessAdapter {
    fn is_alive(&self, pid: u32) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(pid) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(pid), None) {
            Ok(()) => true,
            // The process exists but belongs to someone else.
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    fn terminate(&self, pid: u32, graceful: bool) -> std::io::Result<()> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let pid = i32::try_from(pid).map_err(std::io::Error::other)?;
        let signal = if graceful {
            Signal::SIGTERM
        } else {
            Signal::SIGKILL
        };
        kill(Pid::from_raw(pid), signal).map_err(std::io::Error::from)
    }

    fn find_listener(&self, port: u16) -> Option<ListenerInfo> {
        // -Fpc emits machine-readable "p<pid>" / "c<name>" lines.
        let output = Command::new("lsof")
            .args([
                "-nP",
                &format!("-iTCP:{port}"),
                "-sTCP:LISTEN",
                "-Fpc",
            ])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        parse_lsof_fields(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse the first pid/name pair out of `lsof -Fpc` output.
fn parse_lsof_fields(stdout: &str) -> Option<ListenerInfo> {
    let mut pid: Option<u32> = None;
    let mut name: Option<String> = None;
    for line in stdout.lines() {
        match line.split_at_checked(1) {
            Some(("p", rest)) if pid.is_none() => pid = rest.trim().parse().ok(),
            Some(("c", rest)) if name.is_none() => name = Some(rest.trim().to_owned()),
            _ => {}
        }
        if pid.is_some() && name.is_some() {
            break;
        }
    }
    Some(ListenerInfo {
        pid: pid?,
        name: name.unwrap_or_else(|| "unknown".to_owned()),
    })
}

/// In-memory adapter for tests.
pub mod mock {
    use super::{ListenerInfo, ProcessAdapter};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Scriptable process table.
    #[derive(Debug, Default)]
    pub struct MockProcessAdapter {
        state: Mutex<MockState>,
    }

    #[derive(Debug, Default)]
    struct MockState {
        alive: HashSet<u32>,
        listeners: HashMap<u16, ListenerInfo>,
        signals: Vec<(u32, bool)>,
        survives_sigterm: HashSet<u32>,
    }

    impl MockProcessAdapter {
        /// An adapter with no live processes.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Mark a pid as alive.
        pub fn spawn(&self, pid: u32) {
            self.state.lock().unwrap().alive.insert(pid);
        }

        /// Mark a pid as ignoring SIGTERM (dies only on SIGKILL).
        pub fn ignore_sigterm(&self, pid: u32) {
            self.state.lock().unwrap().survives_sigterm.insert(pid);
        }

        /// Register a listener on a port.
        pub fn listen(&self, port: u16, pid: u32, name: &str) {
            self.state.lock().unwrap().listeners.insert(
                port,
                ListenerInfo {
                    pid,
                    name: name.to_owned(),
                },
            );
        }

        /// Signals delivered so far, as `(pid, graceful)` pairs.
        #[must_use]
        pub fn delivered_signals(&self) -> Vec<(u32, bool)> {
            self.state.lock().unwrap().signals.clone()
        }
    }

    impl ProcessAdapter for MockProcessAdapter {
        fn is_alive(&self, pid: u32) -> bool {
            self.state.lock().unwrap().alive.contains(&pid)
        }

        fn terminate(&self, pid: u32, graceful: bool) -> std::io::Result<()> {
            let mut state = self.state.lock().unwrap();
            state.signals.push((pid, graceful));
            if !state.alive.contains(&pid) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no such process",
                ));
            }
            if !graceful || !state.survives_sigterm.contains(&pid) {
                state.alive.remove(&pid);
            }
            Ok(())
        }

        fn find_listener(&self, port: u16) -> Option<ListenerInfo> {
            self.state.lock().unwrap().listeners.get(&port).cloned()
        }
    }
}
