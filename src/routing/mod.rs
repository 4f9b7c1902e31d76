//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Outgoing request URL
//!     → matcher.rs (reserved / exclude / include / scheme checks)
//!     → Return: forward through the bridge, or fetch directly
//!
//! Pattern Compilation (at load or reconfigure):
//!     RoutingSection / RoutingUpdate
//!     → pattern.rs (compile literals and regexes)
//!     → Freeze as immutable RoutingConfig
//! ```
//!
//! # Design Decisions
//! - Snapshots are immutable; reconfiguration swaps in a new one
//! - Deterministic: same input always yields the same decision

pub mod matcher;
pub mod pattern;

pub use matcher::{is_reserved, should_route};
pub use pattern::{Pattern, RoutingConfig, RoutingUpdate};
