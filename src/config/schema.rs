//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bridge.
//! All types derive Serde traits for deserialization from config files.
//! [`RequestOptions`] doubles as the per-request transport options carried on
//! the wire, so its keys are camelCase with snake_case aliases.

use serde::{Deserialize, Serialize};

/// Root configuration for the fetch bridge.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Which requests are forwarded, and the transport defaults they carry.
    pub routing: RoutingSection,

    /// Reorder buffer limits.
    pub reassembly: ReassemblyConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Routing rules as written in the config file.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RoutingSection {
    /// Global toggle: route by pattern, force everything, or nothing.
    pub mode: RouteMode,

    /// URLs matching any of these are forwarded (when non-empty).
    pub include: Vec<PatternConfig>,

    /// URLs matching any of these are never forwarded. Beats `include`.
    pub exclude: Vec<PatternConfig>,

    /// Transport defaults applied to every forwarded request.
    pub request: RequestOptions,
}

/// Global routing toggle.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMode {
    /// Consult the include/exclude patterns.
    #[default]
    Auto = 0,
    /// Forward every request except bridge-internal URLs.
    Always = 1,
    /// Forward nothing.
    Never = 2,
}

impl From<u8> for RouteMode {
    fn from(val: u8) -> Self {
        match val {
            1 => RouteMode::Always,
            2 => RouteMode::Never,
            _ => RouteMode::Auto,
        }
    }
}

/// A URL pattern: a bare string is a substring, a table is a regex.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PatternConfig {
    Literal(String),
    Regex { regex: String },
}

impl From<&str> for PatternConfig {
    fn from(s: &str) -> Self {
        PatternConfig::Literal(s.to_string())
    }
}

/// Per-request transport options passed through to the bridge.
///
/// Every field is optional. Unset fields are omitted from the wire record.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestOptions {
    /// Proxy to route the request through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySettings>,

    /// Connect timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none", alias = "connect_timeout")]
    pub connect_timeout: Option<u64>,

    /// Maximum redirects to follow; 0 disables redirects.
    #[serde(skip_serializing_if = "Option::is_none", alias = "max_redirections")]
    pub max_redirections: Option<usize>,

    /// TLS verification overrides.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub danger: Option<DangerSettings>,

    /// User-Agent override.
    #[serde(skip_serializing_if = "Option::is_none", alias = "user_agent")]
    pub user_agent: Option<String>,
}

impl RequestOptions {
    /// Returns a new value where every field set in `per_call` wins over `self`.
    pub fn overlay(&self, per_call: &RequestOptions) -> RequestOptions {
        RequestOptions {
            proxy: per_call.proxy.clone().or_else(|| self.proxy.clone()),
            connect_timeout: per_call.connect_timeout.or(self.connect_timeout),
            max_redirections: per_call.max_redirections.or(self.max_redirections),
            danger: per_call.danger.clone().or_else(|| self.danger.clone()),
            user_agent: per_call.user_agent.clone().or_else(|| self.user_agent.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == RequestOptions::default()
    }
}

/// Proxy selection per scheme.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ProxySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all: Option<ProxyTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<ProxyTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub https: Option<ProxyTarget>,
}

impl ProxySettings {
    /// Iterate the configured targets in `all`, `http`, `https` order.
    pub fn targets(&self) -> impl Iterator<Item = &ProxyTarget> {
        [&self.all, &self.http, &self.https]
            .into_iter()
            .filter_map(Option::as_ref)
    }
}

/// Either a bare proxy URL or a URL with credentials and bypass list.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ProxyTarget {
    Url(String),
    Endpoint(ProxyEndpoint),
}

impl ProxyTarget {
    pub fn url(&self) -> &str {
        match self {
            ProxyTarget::Url(url) => url,
            ProxyTarget::Endpoint(endpoint) => &endpoint.url,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyEndpoint {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "basic_auth")]
    pub basic_auth: Option<BasicAuth>,
    /// Comma-separated hosts that bypass the proxy.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "no_proxy")]
    pub no_proxy: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// TLS verification overrides. Both default to strict.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct DangerSettings {
    #[serde(alias = "accept_invalid_certs")]
    pub accept_invalid_certs: bool,
    #[serde(alias = "accept_invalid_hostnames")]
    pub accept_invalid_hostnames: bool,
}

/// Reorder buffer configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReassemblyConfig {
    /// Maximum out-of-order events held per request; 0 = unbounded.
    pub max_pending_chunks: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            max_pending_chunks: 4096,
        }
    }
}

impl ReassemblyConfig {
    /// The cap as an option, `None` when unbounded.
    pub fn limit(&self) -> Option<usize> {
        (self.max_pending_chunks > 0).then_some(self.max_pending_chunks)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
