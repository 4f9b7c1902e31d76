//! Remote bridge and direct fetch interfaces.
//!
//! # Data Flow
//! ```text
//! controller ── open(WireRequest) ──────────▶ bridge   → rid
//! controller ── send(rid, EventSender) ─────▶ bridge
//! controller ◀── Envelope{index, BodyEvent} ── bridge   (any order)
//! controller ◀── End ───────────────────────── bridge
//! controller ── cancel_body(body_rid) ──────▶ bridge   (release / abort)
//! controller ── cancel(rid) ────────────────▶ bridge   (release / abort)
//! ```
//!
//! # Design Decisions
//! - Calls are plain async methods so any IPC transport can implement them
//! - `cancel` and `cancel_body` are idempotent; unknown handles are a no-op
//! - Bypassed requests go through [`NativeFetch`], untouched

use std::future::Future;

use crate::error::{BridgeError, FetchResult};
use crate::http::{Request, Response};
use crate::wire::types::{ResourceId, WireRequest};

pub mod channel;
pub mod local;
pub mod native;

pub use channel::{event_channel, EventReceiver, EventSender};
pub use local::LocalBridge;
pub use native::ReqwestFetch;

/// The out-of-process peer that performs network I/O.
pub trait Bridge: Send + Sync + 'static {
    /// Allocate a request resource.
    fn open(&self, request: WireRequest) -> impl Future<Output = Result<ResourceId, BridgeError>> + Send;

    /// Start executing an opened request, streaming its events to `events`.
    fn send(
        &self,
        rid: ResourceId,
        events: EventSender,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;

    /// Release or abort a request resource.
    fn cancel(&self, rid: ResourceId) -> impl Future<Output = Result<(), BridgeError>> + Send;

    /// Release or abort a response body resource.
    fn cancel_body(&self, body_rid: ResourceId) -> impl Future<Output = Result<(), BridgeError>> + Send;
}

/// The fetch implementation used when a request is not forwarded.
pub trait NativeFetch: Send + Sync + 'static {
    fn fetch(&self, request: Request) -> impl Future<Output = FetchResult<Response>> + Send;
}
