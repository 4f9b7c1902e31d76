//! Fetch entry point.
//!
//! # Data Flow
//! ```text
//! fetch(input, init)
//!     → split bridge options off init
//!     → route mode + matcher (one RoutingConfig snapshot)
//!     → not routed: NativeFetch, untouched
//!     → routed: new request id → LifecycleController::forward
//! ```

pub mod dispatcher;

pub use dispatcher::Dispatcher;
