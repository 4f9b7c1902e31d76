//! Request lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! Idle ─ open ─▶ Opened ─ send ─▶ Sending ─ header ─▶ Streaming
//!   │              │                 │                    │
//!   ▼              ▼                 ▼                    ▼
//! Errored     Cancelled/Errored  Cancelled/Errored   Closed/Cancelled/Errored
//! ```
//!
//! # Design Decisions
//! - Terminal states are final; later events and signals are no-ops
//! - Remote handles are released exactly once, body handle first

pub mod controller;

pub use controller::{LifecycleController, RequestState};
