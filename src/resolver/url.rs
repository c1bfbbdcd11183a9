//! Defensive base-URL construction for proxy routes.

use crate::providers::Provider;

/// Hosts treated as "the local proxy" for remote rewriting.
const LOOPBACK_HOSTS: &[&str] = &["127.0.0.1", "localhost", "0.0.0.0"];

/// Standard web port for a protocol.
#[must_use]
pub fn default_port(protocol: &str) -> u16 {
    if protocol.eq_ignore_ascii_case("https") {
        443
    } else {
        80
    }
}

/// Normalize a protocol string: lowercase, defaulting to `http` for
/// anything unrecognized.
#[must_use]
pub fn normalize_protocol(protocol: Option<&str>) -> String {
    match protocol.map(str::trim).map(str::to_lowercase).as_deref() {
        Some("https") => "https".to_owned(),
        _ => "http".to_owned(),
    }
}

/// `host[:port]` with the protocol's standard port omitted.
fn authority(protocol: &str, host: &str, port: Option<u16>) -> String {
    match port {
        Some(p) if p != 0 && p != default_port(protocol) => format!("{host}:{p}"),
        _ => host.to_owned(),
    }
}

/// Root URL of a proxy: `<protocol>://<host>[:<port>]`.
#[must_use]
pub fn root_url(protocol: &str, host: &str, port: Option<u16>) -> String {
    format!("{protocol}://{}", authority(protocol, host, port))
}

/// Provider route URL: `<root>/api/provider/<provider>`.
#[must_use]
pub fn provider_url(protocol: &str, host: &str, port: Option<u16>, provider: Provider) -> String {
    format!("{}/api/provider/{provider}", root_url(protocol, host, port))
}

/// Local provider route on the loopback proxy.
#[must_use]
pub fn local_provider_url(port: u16, provider: Provider) -> String {
    format!("http://127.0.0.1:{port}/api/provider/{provider}")
}

/// Local proxy root (composite routing goes through the root).
#[must_use]
pub fn local_root_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

/// Host portion of a URL, without scheme, port, path, or userinfo.
#[must_use]
pub fn url_host(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let rest = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let rest = rest.rsplit_once('@').map_or(rest, |(_, host)| host);
    let host = rest.split(':').next().unwrap_or(rest);
    if host.is_empty() { None } else { Some(host) }
}

/// Whether a URL points at the local proxy.
#[must_use]
pub fn is_loopback_url(url: &str) -> bool {
    url_host(url).is_some_and(|host| {
        LOOPBACK_HOSTS
            .iter()
            .any(|l| l.eq_ignore_ascii_case(host))
    })
}
