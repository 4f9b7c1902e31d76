//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream;
use http::{HeaderMap, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};

use fetch_bridge::bridge::{Bridge, EventSender, NativeFetch};
use fetch_bridge::error::{BridgeError, FetchResult};
use fetch_bridge::http::{Request, Response, ResponseBody};
use fetch_bridge::wire::{BodyEvent, ChannelEvent, Envelope, ResourceId, WireRequest, WireResponseHeader};

/// Guard against hangs in tests driving spawned tasks.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle of the body resource scripted responses carry.
pub const BODY_RID: ResourceId = ResourceId(100);

/// A remote call observed by [`MockBridge`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open(u64),
    Send(ResourceId),
    Cancel(ResourceId),
    CancelBody(ResourceId),
}

/// Scriptable bridge that records every call.
#[derive(Default)]
pub struct MockBridge {
    calls: Mutex<Vec<Call>>,
    opened: Mutex<Vec<WireRequest>>,
    senders: Mutex<Vec<(ResourceId, EventSender)>>,
    script: Mutex<Vec<ChannelEvent>>,
    next_rid: AtomicU64,
    sent: Notify,
    pub fail_open: Mutex<Option<BridgeError>>,
    pub fail_send: Mutex<Option<BridgeError>>,
    pub fail_cancel: Mutex<bool>,
    /// `send` never returns when set.
    pub hang_send: Mutex<bool>,
    /// `cancel` and `cancel_body` are recorded but never return when set.
    pub hang_cancel: Mutex<bool>,
}

impl MockBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_rid: AtomicU64::new(1),
            ..Default::default()
        })
    }

    /// Events delivered, in the given order, as soon as `send` is called.
    pub fn script(&self, events: Vec<ChannelEvent>) {
        *self.script.lock().unwrap() = events;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    /// Every release call issued, in order.
    pub fn releases(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Cancel(_) | Call::CancelBody(_)))
            .collect()
    }

    pub fn opened(&self) -> Vec<WireRequest> {
        self.opened.lock().unwrap().clone()
    }

    /// Sender registered by the most recent `send`.
    pub fn sender(&self) -> EventSender {
        self.senders.lock().unwrap().last().unwrap().1.clone()
    }

    /// Wait until `send` has been called.
    pub async fn wait_sent(&self) {
        tokio::time::timeout(TEST_TIMEOUT, self.sent.notified())
            .await
            .expect("send was never called");
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    async fn maybe_hang(&self) {
        let hang = *self.hang_cancel.lock().unwrap();
        if hang {
            std::future::pending::<()>().await;
        }
    }
}

impl Bridge for MockBridge {
    async fn open(&self, request: WireRequest) -> Result<ResourceId, BridgeError> {
        self.record(Call::Open(request.request_id));
        self.opened.lock().unwrap().push(request);
        if let Some(err) = self.fail_open.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(ResourceId(self.next_rid.fetch_add(1, Ordering::Relaxed)))
    }

    async fn send(&self, rid: ResourceId, events: EventSender) -> Result<(), BridgeError> {
        self.record(Call::Send(rid));
        if let Some(err) = self.fail_send.lock().unwrap().clone() {
            return Err(err);
        }
        let script = std::mem::take(&mut *self.script.lock().unwrap());
        for event in script {
            let _ = events.deliver(event);
        }
        self.senders.lock().unwrap().push((rid, events));
        self.sent.notify_one();

        let hang = *self.hang_send.lock().unwrap();
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn cancel(&self, rid: ResourceId) -> Result<(), BridgeError> {
        self.record(Call::Cancel(rid));
        self.maybe_hang().await;
        if *self.fail_cancel.lock().unwrap() {
            return Err(BridgeError::Remote("cancel refused".into()));
        }
        Ok(())
    }

    async fn cancel_body(&self, body_rid: ResourceId) -> Result<(), BridgeError> {
        self.record(Call::CancelBody(body_rid));
        self.maybe_hang().await;
        if *self.fail_cancel.lock().unwrap() {
            return Err(BridgeError::Remote("cancel refused".into()));
        }
        Ok(())
    }
}

/// Direct fetch stand-in recording the URLs it served.
#[derive(Clone, Default)]
pub struct MockNative {
    urls: Arc<Mutex<Vec<String>>>,
}

impl MockNative {
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl NativeFetch for MockNative {
    async fn fetch(&self, request: Request) -> FetchResult<Response> {
        self.urls.lock().unwrap().push(request.url().to_string());
        let body = ResponseBody::from_stream(stream::iter(vec![Ok(Bytes::from_static(b"native"))]));
        Ok(Response::new(
            StatusCode::OK,
            "OK",
            request.url().clone(),
            HeaderMap::new(),
            Some(body),
        ))
    }
}

pub fn message(index: u64, message: BodyEvent) -> ChannelEvent {
    ChannelEvent::Message(Envelope { index, message })
}

pub fn header_event(index: u64, status: u16, headers: &[(&str, &str)]) -> ChannelEvent {
    message(
        index,
        BodyEvent::Response(WireResponseHeader {
            status,
            status_text: StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or_default()
                .to_string(),
            url: "https://example.com/data".into(),
            headers: headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            body_rid: Some(BODY_RID),
        }),
    )
}

pub fn data_event(index: u64, data: &'static str) -> ChannelEvent {
    message(index, BodyEvent::Data(Bytes::from_static(data.as_bytes())))
}

pub fn done_event(index: u64) -> ChannelEvent {
    message(index, BodyEvent::Done)
}

pub fn error_event(index: u64, reason: &str) -> ChannelEvent {
    message(index, BodyEvent::Error(reason.to_string()))
}

/// Start a raw HTTP/1.1 backend on an ephemeral port.
///
/// `respond` maps the received request head to the full response bytes.
/// Request heads are also sent on the returned channel.
pub async fn start_mock_backend<F>(respond: F) -> (SocketAddr, mpsc::UnboundedReceiver<String>)
where
    F: Fn(&str) -> Vec<u8> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let respond = Arc::new(respond);
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let respond = respond.clone();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let head = read_head(&mut socket).await;
                        let response = respond(&head);
                        let _ = tx.send(head);
                        let _ = socket.write_all(&response).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, rx)
}

/// A loopback address nothing listens on.
pub fn closed_port_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// A complete `Connection: close` response with a fixed body.
pub fn fixed_response(status_line: &str, headers: &[(&str, &str)], body: &str) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n", body.len());
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    out.push_str(body);
    out.into_bytes()
}

async fn read_head(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
