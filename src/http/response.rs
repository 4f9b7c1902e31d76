//! Fetch-style response and its lazily pulled body.
//!
//! # Design Decisions
//! - The body is a single-use stream; reading it consumes it
//! - Bridged bodies are fed through an unbounded channel by the request's
//!   driver task, so dropping the body is observable upstream
//! - Status, URL and headers are exactly what the producer reported

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{BoxStream, Stream, StreamExt};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{FetchError, FetchResult};

/// A received response.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    status_text: String,
    url: Url,
    headers: HeaderMap,
    body: Option<ResponseBody>,
}

impl Response {
    pub fn new(
        status: StatusCode,
        status_text: impl Into<String>,
        url: Url,
        headers: HeaderMap,
        body: Option<ResponseBody>,
    ) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            url,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// True for 2xx statuses.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Final URL, after any redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// False when the response has no body at all, as for 204 or 304.
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn body_mut(&mut self) -> Option<&mut ResponseBody> {
        self.body.as_mut()
    }

    pub fn take_body(&mut self) -> Option<ResponseBody> {
        self.body.take()
    }

    /// Read the whole body. A response without a body yields empty bytes.
    pub async fn bytes(mut self) -> FetchResult<Bytes> {
        match self.body.take() {
            Some(body) => body.collect_bytes().await,
            None => Ok(Bytes::new()),
        }
    }

    /// Read the body as UTF-8, replacing invalid sequences.
    pub async fn text(self) -> FetchResult<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(self) -> FetchResult<T> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Stream(format!("invalid json body: {e}")))
    }
}

enum BodyInner {
    Channel(mpsc::UnboundedReceiver<FetchResult<Bytes>>),
    Stream(BoxStream<'static, FetchResult<Bytes>>),
}

/// A finite stream of body chunks.
pub struct ResponseBody {
    inner: BodyInner,
}

impl ResponseBody {
    /// A body fed through the returned sender.
    pub fn channel() -> (BodySender, ResponseBody) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            BodySender { tx },
            ResponseBody {
                inner: BodyInner::Channel(rx),
            },
        )
    }

    /// Wrap any chunk stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = FetchResult<Bytes>> + Send + 'static,
    {
        Self {
            inner: BodyInner::Stream(stream.boxed()),
        }
    }

    /// Drain the stream into one buffer, stopping at the first error.
    pub async fn collect_bytes(mut self) -> FetchResult<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.inner {
            BodyInner::Channel(_) => "channel",
            BodyInner::Stream(_) => "stream",
        };
        f.debug_struct("ResponseBody").field("kind", &kind).finish()
    }
}

impl Stream for ResponseBody {
    type Item = FetchResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().inner {
            BodyInner::Channel(rx) => rx.poll_recv(cx),
            BodyInner::Stream(stream) => stream.as_mut().poll_next(cx),
        }
    }
}

/// Producer half of a channel-backed [`ResponseBody`].
#[derive(Debug, Clone)]
pub struct BodySender {
    tx: mpsc::UnboundedSender<FetchResult<Bytes>>,
}

impl BodySender {
    /// Queue a chunk. Returns false once the consumer has dropped the body.
    pub fn push(&self, chunk: Bytes) -> bool {
        self.tx.send(Ok(chunk)).is_ok()
    }

    /// Queue a terminal error for the consumer.
    pub fn fail(&self, err: FetchError) -> bool {
        self.tx.send(Err(err)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the consumer drops the body.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}
