//! Direct fetch path for requests that bypass the bridge.

use std::pin::Pin;

use futures_util::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::bridge::NativeFetch;
use crate::error::{FetchError, FetchResult};
use crate::http::{Request, Response, ResponseBody};
use crate::wire::codec::is_null_body_status;

/// [`NativeFetch`] on a shared reqwest client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl NativeFetch for ReqwestFetch {
    async fn fetch(&self, request: Request) -> FetchResult<Response> {
        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone());
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body() {
            builder = builder.body(body.clone());
        }

        let signal = request.signal().cloned().unwrap_or_default();
        let response = tokio::select! {
            _ = signal.cancelled() => return Err(FetchError::Cancelled),
            response = builder.send() => response?,
        };

        let status = response.status();
        let url = response.url().clone();
        let headers = response.headers().clone();
        tracing::debug!(url = %url, status = status.as_u16(), "Direct fetch completed");

        let body = if is_null_body_status(status.as_u16()) {
            None
        } else {
            let chunks = response.bytes_stream().map(|chunk| chunk.map_err(FetchError::from));
            Some(ResponseBody::from_stream(until_cancelled(chunks, signal)))
        };

        Ok(Response::new(
            status,
            status.canonical_reason().unwrap_or_default(),
            url,
            headers,
            body,
        ))
    }
}

/// Forward `chunks` until `signal` fires, then yield a single `Cancelled`.
fn until_cancelled<S>(
    chunks: S,
    signal: CancellationToken,
) -> impl Stream<Item = FetchResult<bytes::Bytes>> + Send + 'static
where
    S: Stream<Item = FetchResult<bytes::Bytes>> + Send + 'static,
{
    let chunks: Pin<Box<S>> = Box::pin(chunks);
    stream::unfold(Some((chunks, signal)), |state| async move {
        let (mut chunks, signal) = state?;
        tokio::select! {
            _ = signal.cancelled() => Some((Err(FetchError::Cancelled), None)),
            chunk = chunks.next() => chunk.map(|chunk| (chunk, Some((chunks, signal)))),
        }
    })
}
