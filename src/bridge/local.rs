//! In-process bridge backed by reqwest.
//!
//! # Responsibilities
//! - Turn a [`WireRequest`] into a configured client and request
//! - Hold opened requests and live bodies in a resource table
//! - Stream status, headers and body chunks as indexed events
//! - Abort the matching task when a handle is cancelled
//!
//! # Design Decisions
//! - One client per request, since transport options are per request
//! - The response header is event 0; body chunks follow from 1
//! - A body resource's token is a child of its request's token, so
//!   cancelling the request also stops the body
//! - A body slot is removed when its stream task exits, so a body the
//!   consumer never saw the header of cannot outlive its request
//! - Unknown handles are a no-op on cancel

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use http::header::{self, HeaderName, HeaderValue};
use http::Method;
use reqwest::redirect::Policy;
use reqwest::NoProxy;
use tokio_util::sync::CancellationToken;

use crate::bridge::{Bridge, EventSender};
use crate::config::schema::{ProxySettings, ProxyTarget, RequestOptions};
use crate::error::BridgeError;
use crate::wire::types::{BodyEvent, ResourceId, WireRequest, WireResponseHeader};

type PendingRequest = (reqwest::Client, reqwest::Request);

enum SlotKind {
    /// Opened, not yet sent.
    Request(Mutex<Option<PendingRequest>>),
    /// A response body being streamed.
    Body,
}

struct Slot {
    kind: SlotKind,
    cancel: CancellationToken,
}

struct Inner {
    resources: DashMap<ResourceId, Slot>,
    next_rid: AtomicU64,
}

impl Inner {
    fn allocate(&self, kind: SlotKind, cancel: CancellationToken) -> ResourceId {
        let rid = ResourceId(self.next_rid.fetch_add(1, Ordering::Relaxed));
        self.resources.insert(rid, Slot { kind, cancel });
        rid
    }

    fn release(&self, rid: ResourceId) -> bool {
        match self.resources.remove(&rid) {
            Some((_, slot)) => {
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    async fn execute(
        self: Arc<Self>,
        rid: ResourceId,
        (client, request): PendingRequest,
        cancel: CancellationToken,
        events: EventSender,
    ) {
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(rid = %rid, "Request cancelled before response");
                let _ = events.end();
                return;
            }
            result = client.execute(request) => result,
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(rid = %rid, error = %e, "Upstream request failed");
                let _ = events.emit(0, BodyEvent::Error(e.to_string()));
                let _ = events.end();
                return;
            }
        };

        let body_cancel = cancel.child_token();
        let body_rid = self.allocate(SlotKind::Body, body_cancel.clone());
        let status = response.status();
        let header = WireResponseHeader {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            url: response.url().to_string(),
            headers: response
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect(),
            body_rid: Some(body_rid),
        };

        if events.emit(0, BodyEvent::Response(header)).is_ok() {
            stream_body(body_rid, response, &body_cancel, &events).await;
        }
        if self.resources.remove(&body_rid).is_some() {
            tracing::trace!(rid = %rid, body_rid = %body_rid, "Body slot dropped with its stream");
        }
        let _ = events.end();
    }
}

/// Emit body chunks from index 1 until the body ends or is abandoned.
async fn stream_body(
    body_rid: ResourceId,
    response: reqwest::Response,
    cancel: &CancellationToken,
    events: &EventSender,
) {
    let mut stream = response.bytes_stream();
    let mut index = 1;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(body_rid = %body_rid, "Body cancelled");
                return;
            }
            _ = events.closed() => return,
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    if events.emit(index, BodyEvent::Data(bytes)).is_err() {
                        return;
                    }
                    index += 1;
                }
                Some(Err(e)) => {
                    let _ = events.emit(index, BodyEvent::Error(e.to_string()));
                    return;
                }
                None => {
                    let _ = events.emit(index, BodyEvent::Done);
                    return;
                }
            },
        }
    }
}

/// A [`Bridge`] that performs the I/O itself, in this process.
#[derive(Clone)]
pub struct LocalBridge {
    inner: Arc<Inner>,
}

impl LocalBridge {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                resources: DashMap::new(),
                next_rid: AtomicU64::new(1),
            }),
        }
    }

    /// Number of live resource handles.
    pub fn live_resources(&self) -> usize {
        self.inner.resources.len()
    }
}

impl Default for LocalBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge for LocalBridge {
    async fn open(&self, request: WireRequest) -> Result<ResourceId, BridgeError> {
        let pending = build_request(&request)?;
        let rid = self.inner.allocate(
            SlotKind::Request(Mutex::new(Some(pending))),
            CancellationToken::new(),
        );
        tracing::debug!(request_id = request.request_id, rid = %rid, "Opened request");
        Ok(rid)
    }

    async fn send(&self, rid: ResourceId, events: EventSender) -> Result<(), BridgeError> {
        let (pending, cancel) = {
            let slot = self
                .inner
                .resources
                .get(&rid)
                .ok_or(BridgeError::UnknownResource(rid))?;
            let pending = match &slot.kind {
                SlotKind::Request(pending) => pending
                    .lock()
                    .map_err(|_| BridgeError::Remote("resource table poisoned".into()))?
                    .take(),
                SlotKind::Body => None,
            };
            let pending = pending.ok_or_else(|| {
                BridgeError::InvalidRequest(format!("{rid} is not an unsent request"))
            })?;
            (pending, slot.cancel.clone())
        };

        tokio::spawn(self.inner.clone().execute(rid, pending, cancel, events));
        Ok(())
    }

    async fn cancel(&self, rid: ResourceId) -> Result<(), BridgeError> {
        if self.inner.release(rid) {
            tracing::trace!(rid = %rid, "Released request");
        }
        Ok(())
    }

    async fn cancel_body(&self, body_rid: ResourceId) -> Result<(), BridgeError> {
        if self.inner.release(body_rid) {
            tracing::trace!(body_rid = %body_rid, "Released body");
        }
        Ok(())
    }
}

/// Build the client and request a wire record describes.
pub fn build_request(wire: &WireRequest) -> Result<PendingRequest, BridgeError> {
    let method = Method::from_bytes(wire.method.as_bytes())
        .map_err(|_| BridgeError::InvalidRequest(format!("invalid method {:?}", wire.method)))?;
    let url = reqwest::Url::parse(&wire.url)
        .map_err(|e| BridgeError::InvalidRequest(format!("invalid url {:?}: {e}", wire.url)))?;

    let client = build_client(&wire.options)?;
    let mut request = client.request(method.clone(), url);

    for (name, value) in &wire.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| BridgeError::InvalidRequest(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_bytes(value.as_bytes())
            .map_err(|e| BridgeError::InvalidRequest(format!("invalid header value: {e}")))?;
        request = request.header(name, value);
    }

    // https://fetch.spec.whatwg.org/#http-network-or-cache-fetch
    if wire.body.is_none() && matches!(method, Method::POST | Method::PUT) {
        request = request.header(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    }

    if wire.headers.iter().any(|(name, _)| name.eq_ignore_ascii_case("range")) {
        request = request.header(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    }

    if let Some(body) = &wire.body {
        request = request.body(body.clone());
    }

    let request = request.build().map_err(into_bridge_error)?;
    Ok((client, request))
}

fn build_client(options: &RequestOptions) -> Result<reqwest::Client, BridgeError> {
    let mut builder = reqwest::Client::builder();

    if let Some(timeout) = options.connect_timeout {
        builder = builder.connect_timeout(Duration::from_millis(timeout));
    }

    if let Some(max_redirections) = options.max_redirections {
        builder = builder.redirect(if max_redirections == 0 {
            Policy::none()
        } else {
            Policy::limited(max_redirections)
        });
    }

    if let Some(proxy) = &options.proxy {
        builder = attach_proxy(proxy, builder)?;
    }

    if let Some(danger) = &options.danger {
        builder = builder
            .danger_accept_invalid_certs(danger.accept_invalid_certs)
            .danger_accept_invalid_hostnames(danger.accept_invalid_hostnames);
    }

    if let Some(user_agent) = &options.user_agent {
        builder = builder.user_agent(user_agent.as_str());
    }

    builder.build().map_err(into_bridge_error)
}

fn attach_proxy(
    proxy: &ProxySettings,
    mut builder: reqwest::ClientBuilder,
) -> Result<reqwest::ClientBuilder, BridgeError> {
    if let Some(all) = &proxy.all {
        builder = builder.proxy(proxy_for(all, |url| reqwest::Proxy::all(url))?);
    }
    if let Some(http) = &proxy.http {
        builder = builder.proxy(proxy_for(http, |url| reqwest::Proxy::http(url))?);
    }
    if let Some(https) = &proxy.https {
        builder = builder.proxy(proxy_for(https, |url| reqwest::Proxy::https(url))?);
    }
    Ok(builder)
}

fn proxy_for<F>(target: &ProxyTarget, proxy_fn: F) -> Result<reqwest::Proxy, BridgeError>
where
    F: FnOnce(&str) -> reqwest::Result<reqwest::Proxy>,
{
    let mut proxy = proxy_fn(target.url()).map_err(into_bridge_error)?;
    if let ProxyTarget::Endpoint(endpoint) = target {
        if let Some(auth) = &endpoint.basic_auth {
            proxy = proxy.basic_auth(&auth.username, &auth.password);
        }
        if let Some(no_proxy) = &endpoint.no_proxy {
            proxy = proxy.no_proxy(NoProxy::from_string(no_proxy));
        }
    }
    Ok(proxy)
}

fn into_bridge_error(err: reqwest::Error) -> BridgeError {
    if err.is_builder() {
        BridgeError::InvalidRequest(err.to_string())
    } else {
        BridgeError::Network(err.to_string())
    }
}
