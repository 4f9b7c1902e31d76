//! Routing decision for a single URL.
//!
//! # Responsibilities
//! - Refuse bridge-internal loopback URLs unconditionally
//! - Apply exclude patterns, then include patterns
//! - Fall back to an http/https scheme check when no include rule exists
//!
//! # Design Decisions
//! - Scheme comparison is case-insensitive
//! - Priority: reserved > exclude > include > scheme
//! - Pure function of (url, snapshot); no side effects

use crate::routing::pattern::{Pattern, RoutingConfig};

/// Schemes the host uses for its own IPC and asset loopback.
pub const RESERVED_SCHEMES: &[&str] = &["ipc", "asset"];

/// Hosts that serve the same loopback over plain http on some platforms.
pub const RESERVED_HOSTS: &[&str] = &["ipc.localhost", "asset.localhost"];

/// Returns true if `url` must go through the bridge.
pub fn should_route(url: &str, config: &RoutingConfig) -> bool {
    if is_reserved(url) {
        return false;
    }

    if any_match(&config.exclude, url) {
        return false;
    }

    if !config.include.is_empty() {
        return any_match(&config.include, url);
    }

    matches!(scheme(url), Some(s) if s.eq_ignore_ascii_case("http") || s.eq_ignore_ascii_case("https"))
}

/// Returns true for URLs addressing the bridge's own transport.
pub fn is_reserved(url: &str) -> bool {
    if let Some(s) = scheme(url) {
        if RESERVED_SCHEMES.iter().any(|r| s.eq_ignore_ascii_case(r)) {
            return true;
        }
    }

    match url::Url::parse(url) {
        Ok(parsed) => parsed
            .host_str()
            .map(|host| RESERVED_HOSTS.iter().any(|r| host.eq_ignore_ascii_case(r)))
            .unwrap_or(false),
        Err(_) => false,
    }
}

fn any_match(patterns: &[Pattern], url: &str) -> bool {
    patterns.iter().any(|p| p.matches(url))
}

/// The scheme as written, without the trailing colon.
fn scheme(url: &str) -> Option<&str> {
    let (scheme, _) = url.split_once(':')?;
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}
