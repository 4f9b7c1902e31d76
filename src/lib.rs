//! Fetch bridge library.
//!
//! Intercepts fetch-style requests and forwards the matching ones to an
//! out-of-process bridge that performs the network I/O, then rebuilds a
//! streaming response from the bridge's out-of-order event channel.

// Core subsystems
pub mod config;
pub mod dispatch;
pub mod http;
pub mod routing;
pub mod wire;

// Forwarding
pub mod bridge;
pub mod lifecycle;
pub mod reassembly;

// Cross-cutting concerns
pub mod error;
pub mod observability;

pub use bridge::{Bridge, LocalBridge, NativeFetch, ReqwestFetch};
pub use config::BridgeConfig;
pub use dispatch::Dispatcher;
pub use error::{BridgeError, ErrorKind, FetchError, FetchResult};
pub use http::{FetchInit, Request, Response, ResponseBody};
