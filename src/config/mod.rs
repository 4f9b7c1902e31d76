//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BridgeConfig (validated, immutable)
//!     → compiled into a RoutingConfig snapshot by the dispatcher
//!
//! On file change:
//!     watcher.rs detects change, waits out the burst
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → watcher.rs compiles the RoutingConfig
//!     → dispatcher swaps its Arc<RoutingConfig>
//!     → requests dispatched afterwards observe the new config
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BasicAuth, BridgeConfig, DangerSettings, ObservabilityConfig, PatternConfig, ProxyEndpoint,
    ProxySettings, ProxyTarget, ReassemblyConfig, RequestOptions, RouteMode, RoutingSection,
};
pub use validation::ValidationError;
pub use watcher::{ConfigWatcher, Reload};
