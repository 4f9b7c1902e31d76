//! Per-request state machine for forwarded requests.
//!
//! # Responsibilities
//! - Drive the remote call sequence: open, register channel, send
//! - Feed channel events through a [`Reassembler`] into the response body
//! - Resolve the caller's response as soon as the header is released
//! - Release every remote handle exactly once on any terminal path
//!
//! # Data Flow
//! ```text
//! forward() ── spawn ──▶ LiveRequest::run
//!    ▲                      │ open → Opened
//!    │                      │ event_channel + send → Sending
//!    │ oneshot (header)     │ Released::Header → Streaming ──▶ caller gets Response
//!    └──────────────────────┤ Released::Chunk ──▶ BodySender ──▶ ResponseBody
//!                           │ Done / Error / cancel
//!                           ▼
//!                  release(): cancel_body(body_rid), cancel(rid)
//! ```
//!
//! # Design Decisions
//! - One spawned driver task owns all per-request state; no locks
//! - The caller learns the outcome first; remote releases follow, so a slow
//!   cancel call never delays it
//! - An error before the header is a network failure, like the direct path's
//! - Dropping the response future or the body counts as cancellation
//! - Cleanup failures are logged and never replace the primary outcome

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::bridge::{event_channel, Bridge, EventReceiver};
use crate::config::RequestOptions;
use crate::error::{FetchError, FetchResult};
use crate::http::{BodySender, Request, Response, ResponseBody};
use crate::observability::metrics;
use crate::reassembly::{Reassembler, Released};
use crate::wire::codec::{from_wire_response, to_wire_request};
use crate::wire::types::{ChannelEvent, Envelope, ResourceId, WireRequest};

/// Lifecycle state of one forwarded request.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle = 0,
    Opened = 1,
    Sending = 2,
    Streaming = 3,
    Closed = 4,
    Errored = 5,
    Cancelled = 6,
}

impl From<u8> for RequestState {
    fn from(val: u8) -> Self {
        match val {
            1 => RequestState::Opened,
            2 => RequestState::Sending,
            3 => RequestState::Streaming,
            4 => RequestState::Closed,
            5 => RequestState::Errored,
            6 => RequestState::Cancelled,
            _ => RequestState::Idle,
        }
    }
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Closed | RequestState::Errored | RequestState::Cancelled
        )
    }

    /// Label used for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            RequestState::Idle => "idle",
            RequestState::Opened => "opened",
            RequestState::Sending => "sending",
            RequestState::Streaming => "streaming",
            RequestState::Closed => "closed",
            RequestState::Errored => "errored",
            RequestState::Cancelled => "cancelled",
        }
    }
}

type Responder = oneshot::Sender<FetchResult<Response>>;

/// Forwards requests over a [`Bridge`].
pub struct LifecycleController<B> {
    bridge: Arc<B>,
    max_pending: Option<usize>,
}

impl<B> Clone for LifecycleController<B> {
    fn clone(&self) -> Self {
        Self {
            bridge: self.bridge.clone(),
            max_pending: self.max_pending,
        }
    }
}

impl<B: Bridge> LifecycleController<B> {
    /// `max_pending` caps each request's reorder buffer; `None` is unbounded.
    pub fn new(bridge: Arc<B>, max_pending: Option<usize>) -> Self {
        Self { bridge, max_pending }
    }

    pub fn bridge(&self) -> &Arc<B> {
        &self.bridge
    }

    /// Forward one request and wait for its response header.
    ///
    /// The returned body keeps streaming after this resolves. A signal that
    /// already fired fails immediately, before anything is allocated.
    pub async fn forward(
        &self,
        request_id: u64,
        request: Request,
        options: RequestOptions,
    ) -> FetchResult<Response> {
        let signal = request.signal().cloned().unwrap_or_default();
        if signal.is_cancelled() {
            tracing::debug!(request_id, "Cancelled before open");
            metrics::record_outcome(RequestState::Cancelled.as_str());
            return Err(FetchError::Cancelled);
        }

        let wire = to_wire_request(request_id, &request, options);
        let (responder, response) = oneshot::channel();
        let live = LiveRequest {
            bridge: self.bridge.clone(),
            state: RequestState::Idle,
            signal,
            reassembler: Reassembler::new(self.max_pending),
            responder: Some(responder),
            body: None,
            rid: None,
            body_rid: None,
            finished: false,
        };

        let span = tracing::info_span!("forward", request_id);
        tokio::spawn(live.run(wire).instrument(span));

        response
            .await
            .unwrap_or_else(|_| Err(FetchError::Stream("request driver exited".into())))
    }
}

/// Result of one wait in the event loop.
enum Step {
    Abandoned,
    Event(Option<ChannelEvent>),
}

/// Whether the event loop keeps going after handling a message.
#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// State of one in-flight request, owned by its driver task.
struct LiveRequest<B> {
    bridge: Arc<B>,
    state: RequestState,
    signal: CancellationToken,
    reassembler: Reassembler,
    /// Pending response; `None` once settled.
    responder: Option<Responder>,
    /// Live body; `Some` only while streaming.
    body: Option<BodySender>,
    rid: Option<ResourceId>,
    body_rid: Option<ResourceId>,
    /// Set once the release sequence has started.
    finished: bool,
}

impl<B: Bridge> LiveRequest<B> {
    async fn run(mut self, wire: WireRequest) {
        // Cancellation during open is observed once open returns, so the
        // allocated handle is never leaked.
        let rid = match self.bridge.open(wire).await {
            Ok(rid) => rid,
            Err(e) => {
                tracing::debug!(error = %e, "Open failed");
                self.transition(RequestState::Errored);
                self.settle(Err(FetchError::RemoteOpen(e)));
                return;
            }
        };
        self.rid = Some(rid);
        self.transition(RequestState::Opened);

        if self.signal.is_cancelled() || self.caller_gone() {
            self.cancel().await;
            return;
        }

        // Registered before send, so no event can be missed.
        let (events_tx, mut events) = event_channel();
        self.transition(RequestState::Sending);

        let sent = tokio::select! {
            biased;
            _ = abandoned(&self.signal, &mut self.responder, None) => None,
            sent = self.bridge.send(rid, events_tx) => Some(sent),
        };
        match sent {
            None => {
                self.cancel().await;
                return;
            }
            Some(Err(e)) => {
                self.fail(FetchError::RemoteSend(e)).await;
                return;
            }
            Some(Ok(())) => {}
        }

        self.pump(&mut events).await;
        // Dropping `events` unregisters the channel; late emits fail on the bridge side.
    }

    async fn pump(&mut self, events: &mut EventReceiver) {
        loop {
            let step = tokio::select! {
                biased;
                _ = abandoned(&self.signal, &mut self.responder, self.body.as_ref()) => Step::Abandoned,
                event = events.recv() => Step::Event(event),
            };

            match step {
                Step::Abandoned => {
                    self.cancel().await;
                    return;
                }
                Step::Event(Some(ChannelEvent::Message(envelope))) => {
                    if self.on_message(envelope).await == Flow::Stop {
                        return;
                    }
                }
                Step::Event(Some(ChannelEvent::End)) | Step::Event(None) => {
                    if self.state == RequestState::Streaming && self.reassembler.pending_len() == 0 {
                        tracing::debug!("Channel ended with the body drained");
                        self.close().await;
                        return;
                    }
                    tracing::debug!(
                        next_expected = self.reassembler.next_expected(),
                        pending = self.reassembler.pending_len(),
                        "Channel ended before a terminal event"
                    );
                    self.fail(FetchError::Stream("event channel ended before completion".into()))
                        .await;
                    return;
                }
            }
        }
    }

    async fn on_message(&mut self, envelope: Envelope) -> Flow {
        let released: Vec<Released> = match self.reassembler.accept(envelope.index, envelope.message) {
            Ok(ready) => ready.collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Reorder buffer overflow");
                self.fail(e).await;
                return Flow::Stop;
            }
        };
        metrics::record_reorder_depth(self.reassembler.pending_len());

        for event in released {
            if self.on_released(event).await == Flow::Stop {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    async fn on_released(&mut self, event: Released) -> Flow {
        match event {
            Released::Header(header) => {
                if self.state == RequestState::Streaming {
                    tracing::debug!("Ignoring duplicate response header");
                    return Flow::Continue;
                }
                self.body_rid = header.body_rid;
                let (body_tx, body) = ResponseBody::channel();
                let response = match from_wire_response(header, body) {
                    Ok(response) => response,
                    Err(e) => {
                        self.fail(e).await;
                        return Flow::Stop;
                    }
                };

                tracing::debug!(status = response.status().as_u16(), "Response header received");
                if !response.has_body() {
                    // Nothing may be streamed for this status; finish now.
                    self.transition(RequestState::Closed);
                    self.settle(Ok(response));
                    self.release().await;
                    return Flow::Stop;
                }

                self.transition(RequestState::Streaming);
                self.body = Some(body_tx);
                self.settle(Ok(response));
                Flow::Continue
            }
            Released::Chunk(bytes) => match &self.body {
                Some(body) => {
                    if !body.push(bytes) {
                        tracing::debug!("Body dropped by consumer");
                        self.cancel().await;
                        return Flow::Stop;
                    }
                    Flow::Continue
                }
                None => {
                    self.fail(FetchError::Stream("body data before response header".into()))
                        .await;
                    Flow::Stop
                }
            },
            Released::Done => {
                if self.body.is_none() {
                    self.fail(FetchError::Stream("stream completed without a response".into()))
                        .await;
                    return Flow::Stop;
                }
                self.close().await;
                Flow::Stop
            }
            Released::Failed(message) => {
                let err = if self.responder.is_some() {
                    FetchError::Network(message)
                } else {
                    FetchError::Stream(message)
                };
                self.fail(err).await;
                Flow::Stop
            }
        }
    }

    /// Normal completion: end the body, then release.
    async fn close(&mut self) {
        self.transition(RequestState::Closed);
        // Dropping the sender ends the body stream.
        self.body = None;
        self.release().await;
    }

    /// Cancellation path: the signal fired or the caller went away.
    async fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        tracing::debug!(state = self.state.as_str(), "Request cancelled");
        self.transition(RequestState::Cancelled);
        self.notify(FetchError::Cancelled);
        self.release().await;
    }

    async fn fail(&mut self, err: FetchError) {
        if self.state.is_terminal() {
            return;
        }
        tracing::debug!(state = self.state.as_str(), error = %err, "Request failed");
        self.transition(RequestState::Errored);
        self.notify(err);
        self.release().await;
    }

    /// Deliver a terminal error to whichever of response or body is outstanding.
    fn notify(&mut self, err: FetchError) {
        if self.responder.is_some() {
            self.settle(Err(err));
        } else if let Some(body) = self.body.take() {
            body.fail(err);
        }
    }

    fn settle(&mut self, result: FetchResult<Response>) {
        if let Some(responder) = self.responder.take() {
            if responder.send(result).is_err() {
                tracing::debug!("Caller dropped the response before it settled");
            }
        }
    }

    /// Release remote handles, body first. Runs at most once.
    async fn release(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if let Some(body_rid) = self.body_rid.take() {
            let result = self.bridge.cancel_body(body_rid).await;
            if let Err(e) = &result {
                tracing::warn!(body_rid = %body_rid, error = %e, "Failed to release body");
            }
            metrics::record_cleanup("body", result.is_ok());
        }
        if let Some(rid) = self.rid.take() {
            let result = self.bridge.cancel(rid).await;
            if let Err(e) = &result {
                tracing::warn!(rid = %rid, error = %e, "Failed to release request");
            }
            metrics::record_cleanup("request", result.is_ok());
        }
    }

    fn caller_gone(&self) -> bool {
        match (&self.responder, &self.body) {
            (Some(responder), _) => responder.is_closed(),
            (None, Some(body)) => body.is_closed(),
            (None, None) => false,
        }
    }

    fn transition(&mut self, next: RequestState) {
        tracing::debug!(from = self.state.as_str(), to = next.as_str(), "State transition");
        self.state = next;
        if next.is_terminal() {
            metrics::record_outcome(next.as_str());
        }
    }
}

/// Resolves when the signal fires or the caller stops listening.
async fn abandoned(
    signal: &CancellationToken,
    responder: &mut Option<Responder>,
    body: Option<&BodySender>,
) {
    let caller_gone = async {
        match (responder.as_mut(), body) {
            (Some(responder), _) => responder.closed().await,
            (None, Some(body)) => body.closed().await,
            (None, None) => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = signal.cancelled() => {}
        _ = caller_gone => {}
    }
}
