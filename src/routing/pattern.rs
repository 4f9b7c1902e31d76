//! Compiled routing rules.
//!
//! A [`RoutingConfig`] is an immutable snapshot. Reconfiguration builds a new
//! value through [`RoutingConfig::merged`]; nothing mutates a snapshot that a
//! request may already be holding.

use std::fmt;

use regex::Regex;
use serde::Deserialize;

use crate::config::schema::{PatternConfig, RequestOptions, RoutingSection};
use crate::config::validation::{validate_patterns, validate_request_options};
use crate::config::{ConfigError, ValidationError};

/// A compiled URL pattern.
#[derive(Clone)]
pub enum Pattern {
    /// Matches when the URL contains the string.
    Literal(String),
    /// Matches when the regex finds a match anywhere in the URL.
    Regex(Regex),
}

impl Pattern {
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Pattern::Literal(needle) => url.contains(needle.as_str()),
            Pattern::Regex(re) => re.is_match(url),
        }
    }

    fn source(&self) -> &str {
        match self {
            Pattern::Literal(s) => s,
            Pattern::Regex(re) => re.as_str(),
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Literal(s) => write!(f, "Literal({s:?})"),
            Pattern::Regex(re) => write!(f, "Regex({:?})", re.as_str()),
        }
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Pattern::Literal(_), Pattern::Literal(_)) | (Pattern::Regex(_), Pattern::Regex(_))
        ) && self.source() == other.source()
    }
}

/// Routing snapshot shared read-only by in-flight requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingConfig {
    pub include: Vec<Pattern>,
    pub exclude: Vec<Pattern>,
    /// Transport defaults; per-call options override these field by field.
    pub defaults: RequestOptions,
}

/// A reconfiguration request. Supplied fields replace the old value wholesale.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoutingUpdate {
    pub include: Option<Vec<PatternConfig>>,
    pub exclude: Option<Vec<PatternConfig>>,
    pub request: Option<RequestOptions>,
}

impl RoutingConfig {
    /// Compile the routing section of a config file.
    pub fn compile(section: &RoutingSection) -> Result<Self, ConfigError> {
        Ok(Self {
            include: compile_list("include", &section.include)?,
            exclude: compile_list("exclude", &section.exclude)?,
            defaults: checked_options(&section.request)?,
        })
    }

    /// Returns a new snapshot with `update` applied on top of `self`.
    ///
    /// `request` is replaced as a whole, so fields absent from the update's
    /// options are cleared rather than inherited.
    pub fn merged(&self, update: &RoutingUpdate) -> Result<Self, ConfigError> {
        let include = match &update.include {
            Some(list) => compile_list("include", list)?,
            None => self.include.clone(),
        };
        let exclude = match &update.exclude {
            Some(list) => compile_list("exclude", list)?,
            None => self.exclude.clone(),
        };
        let defaults = match &update.request {
            Some(options) => checked_options(options)?,
            None => self.defaults.clone(),
        };
        Ok(Self {
            include,
            exclude,
            defaults,
        })
    }
}

fn compile_list(list: &'static str, patterns: &[PatternConfig]) -> Result<Vec<Pattern>, ConfigError> {
    let errors = validate_patterns(list, patterns);
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors));
    }
    patterns
        .iter()
        .enumerate()
        .map(|(index, p)| match p {
            PatternConfig::Literal(s) => Ok(Pattern::Literal(s.clone())),
            PatternConfig::Regex { regex } => Regex::new(regex).map(Pattern::Regex).map_err(|e| {
                ConfigError::Validation(vec![ValidationError::InvalidRegex {
                    list,
                    index,
                    message: e.to_string(),
                }])
            }),
        })
        .collect()
}

fn checked_options(options: &RequestOptions) -> Result<RequestOptions, ConfigError> {
    let errors = validate_request_options(options);
    if errors.is_empty() {
        Ok(options.clone())
    } else {
        Err(ConfigError::Validation(errors))
    }
}
