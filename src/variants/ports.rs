//! Port allocation for CLIProxy variants.

use std::collections::BTreeSet;
use std::net::TcpListener;

use crate::core::errors::{CcsError, Result};
use crate::utils::paths::CcsPaths;

/// First candidate port; the default proxy port sits just below.
pub const PORT_RANGE_START: u16 = 8318;

/// Last candidate port.
pub const PORT_RANGE_END: u16 = 65_000;

/// Check if a port is actually free by trying to bind the loopback
/// address.
fn is_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Whether any port-keyed proxy artifact already exists for a port.
fn artifacts_exist(paths: &CcsPaths, port: u16) -> bool {
    if paths.sessions_file(port).exists() {
        return true;
    }
    // config-<port>.* with any extension counts.
    let prefix = format!("config-{port}.");
    match std::fs::read_dir(paths.cliproxy_dir()) {
        Ok(entries) => entries
            .filter_map(std::result::Result::ok)
            .any(|e| e.file_name().to_string_lossy().starts_with(&prefix)),
        Err(_) => false,
    }
}

/// Allocate the smallest free port: not recorded by any existing
/// variant, not currently bound on loopback, and with no leftover
/// port-keyed files.
///
/// # Errors
///
/// Returns a `NoFreePort` error when the range is exhausted.
pub fn allocate_port(paths: &CcsPaths, taken: &BTreeSet<u16>) -> Result<u16> {
    allocate_port_in(paths, taken, PORT_RANGE_START, PORT_RANGE_END)
}

fn allocate_port_in(paths: &CcsPaths, taken: &BTreeSet<u16>, low: u16, high: u16) -> Result<u16> {
    for port in low..=high {
        if taken.contains(&port) || artifacts_exist(paths, port) {
            continue;
        }
        if !is_port_available(port) {
            tracing::debug!(port, "Skipping port already bound on loopback");
            continue;
        }
        tracing::debug!(port, "Allocated variant port");
        return Ok(port);
    }
    Err(CcsError::NoFreePort { low, high })
}
