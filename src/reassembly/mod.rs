//! Event reassembly subsystem.
//!
//! # Data Flow
//! ```text
//! Envelope{index, BodyEvent} (any arrival order)
//!     → reassembler.rs (pending map + next-expected cursor)
//!     → Released events in index order → lifecycle controller
//! ```

pub mod reassembler;

pub use reassembler::{Ready, Reassembler, Released};
