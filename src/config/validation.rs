//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that regex patterns compile and literals are non-empty
//! - Validate value ranges (timeouts > 0, proxy URLs parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BridgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::{BridgeConfig, PatternConfig, RequestOptions};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{list}[{index}]: invalid regex: {message}")]
    InvalidRegex {
        list: &'static str,
        index: usize,
        message: String,
    },

    #[error("{list}[{index}]: empty pattern")]
    EmptyPattern { list: &'static str, index: usize },

    #[error("invalid proxy url {url:?}: {message}")]
    InvalidProxyUrl { url: String, message: String },

    #[error("connectTimeout must be greater than zero")]
    ZeroConnectTimeout,

    #[error("invalid metrics address {0:?}")]
    InvalidMetricsAddress(String),
}

/// Validate a whole configuration file.
pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    errors.extend(validate_patterns("include", &config.routing.include));
    errors.extend(validate_patterns("exclude", &config.routing.exclude));
    errors.extend(validate_request_options(&config.routing.request));

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check a pattern list. `list` names the list in error messages.
pub fn validate_patterns(list: &'static str, patterns: &[PatternConfig]) -> Vec<ValidationError> {
    patterns
        .iter()
        .enumerate()
        .filter_map(|(index, pattern)| match pattern {
            PatternConfig::Literal(s) if s.is_empty() => {
                Some(ValidationError::EmptyPattern { list, index })
            }
            PatternConfig::Literal(_) => None,
            PatternConfig::Regex { regex } => {
                regex::Regex::new(regex)
                    .err()
                    .map(|e| ValidationError::InvalidRegex {
                        list,
                        index,
                        message: e.to_string(),
                    })
            }
        })
        .collect()
}

/// Check transport options, whether configured defaults or per-call values.
pub fn validate_request_options(options: &RequestOptions) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if options.connect_timeout == Some(0) {
        errors.push(ValidationError::ZeroConnectTimeout);
    }

    if let Some(proxy) = &options.proxy {
        for target in proxy.targets() {
            if let Err(e) = url::Url::parse(target.url()) {
                errors.push(ValidationError::InvalidProxyUrl {
                    url: target.url().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    errors
}
