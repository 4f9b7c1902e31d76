//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! dispatch, lifecycle, bridge:
//!     → logging.rs (structured log events, one span per forwarded request)
//!     → metrics.rs (counters, histograms)
//! ```
//!
//! # Design Decisions
//! - Request ID is a span field, so every event under it carries it
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
