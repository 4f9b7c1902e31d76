//! Fetch-style request construction.
//!
//! # Responsibilities
//! - Resolve the effective URL from a URL string or an existing request
//! - Normalize header shapes into ordered name/value pairs
//! - Split bridge-only transport options off the init object
//!
//! # Design Decisions
//! - A built [`Request`] never carries bridge options; those stay in
//!   [`FetchInit::options`] and are taken out before construction
//! - Standard method names are upper-cased, others kept as written

use std::collections::BTreeMap;

use bytes::Bytes;
use http::{HeaderMap, Method};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::schema::{DangerSettings, ProxySettings, RequestOptions};
use crate::error::{FetchError, FetchResult};
use crate::wire::codec::normalize_headers;

/// The first argument of a fetch: a URL or a request to copy.
#[derive(Debug, Clone)]
pub enum RequestInput {
    Url(String),
    Request(Request),
}

impl RequestInput {
    /// The URL this input addresses, as written.
    pub fn url(&self) -> &str {
        match self {
            RequestInput::Url(url) => url,
            RequestInput::Request(request) => request.url.as_str(),
        }
    }
}

impl From<&str> for RequestInput {
    fn from(url: &str) -> Self {
        RequestInput::Url(url.to_string())
    }
}

impl From<String> for RequestInput {
    fn from(url: String) -> Self {
        RequestInput::Url(url)
    }
}

impl From<Url> for RequestInput {
    fn from(url: Url) -> Self {
        RequestInput::Url(url.into())
    }
}

impl From<Request> for RequestInput {
    fn from(request: Request) -> Self {
        RequestInput::Request(request)
    }
}

/// Headers in any of the shapes a caller may hand over.
#[derive(Debug, Clone)]
pub enum HeaderSource {
    /// Ordered pairs, duplicates allowed.
    Pairs(Vec<(String, String)>),
    /// A name → value map.
    Map(BTreeMap<String, String>),
    /// A JSON object or an array of `[name, value]` pairs; values of any
    /// type are stringified.
    Json(serde_json::Value),
    /// A native header collection.
    Native(HeaderMap),
}

impl<K: Into<String>, V: Into<String>> From<Vec<(K, V)>> for HeaderSource {
    fn from(pairs: Vec<(K, V)>) -> Self {
        HeaderSource::Pairs(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<BTreeMap<String, String>> for HeaderSource {
    fn from(map: BTreeMap<String, String>) -> Self {
        HeaderSource::Map(map)
    }
}

impl From<serde_json::Value> for HeaderSource {
    fn from(value: serde_json::Value) -> Self {
        HeaderSource::Json(value)
    }
}

impl From<HeaderMap> for HeaderSource {
    fn from(map: HeaderMap) -> Self {
        HeaderSource::Native(map)
    }
}

/// The second argument of a fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchInit {
    pub method: Option<String>,
    pub headers: Option<HeaderSource>,
    pub body: Option<Bytes>,
    pub signal: Option<CancellationToken>,
    /// Bridge-only transport options, ignored by the direct fetch path.
    pub options: RequestOptions,
}

impl FetchInit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn headers(mut self, headers: impl Into<HeaderSource>) -> Self {
        self.headers = Some(headers.into());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn proxy(mut self, proxy: ProxySettings) -> Self {
        self.options.proxy = Some(proxy);
        self
    }

    /// Connect timeout in milliseconds.
    pub fn connect_timeout(mut self, millis: u64) -> Self {
        self.options.connect_timeout = Some(millis);
        self
    }

    pub fn max_redirections(mut self, max: usize) -> Self {
        self.options.max_redirections = Some(max);
        self
    }

    pub fn danger(mut self, danger: DangerSettings) -> Self {
        self.options.danger = Some(danger);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.options.user_agent = Some(user_agent.into());
        self
    }

    /// Removes the bridge-only options, leaving a plain init behind.
    pub fn take_options(&mut self) -> RequestOptions {
        std::mem::take(&mut self.options)
    }
}

/// A fully resolved request.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
    signal: Option<CancellationToken>,
}

impl Request {
    /// Build a request the way `new Request(input, init)` does: fields set in
    /// `init` override those copied from a request input.
    pub fn new(input: impl Into<RequestInput>, init: FetchInit) -> FetchResult<Self> {
        let FetchInit {
            method,
            headers,
            body,
            signal,
            options: _,
        } = init;

        let mut request = match input.into() {
            RequestInput::Url(raw) => Request {
                method: Method::GET,
                url: Url::parse(&raw)
                    .map_err(|e| FetchError::InvalidRequest(format!("invalid url {raw:?}: {e}")))?,
                headers: Vec::new(),
                body: None,
                signal: None,
            },
            RequestInput::Request(request) => request,
        };

        if let Some(method) = method {
            request.method = parse_method(&method)?;
        }
        if let Some(headers) = headers {
            request.headers = normalize_headers(headers)?;
        }
        if body.is_some() {
            request.body = body;
        }
        if signal.is_some() {
            request.signal = signal;
        }

        if request.body.is_some() && matches!(request.method, Method::GET | Method::HEAD) {
            return Err(FetchError::InvalidRequest(format!(
                "{} request cannot have a body",
                request.method
            )));
        }

        Ok(request)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn signal(&self) -> Option<&CancellationToken> {
        self.signal.as_ref()
    }
}

fn parse_method(raw: &str) -> FetchResult<Method> {
    const NORMALIZED: &[&str] = &["DELETE", "GET", "HEAD", "OPTIONS", "POST", "PUT", "PATCH"];
    let name = NORMALIZED
        .iter()
        .find(|m| m.eq_ignore_ascii_case(raw))
        .map(|m| m.to_string())
        .unwrap_or_else(|| raw.to_string());
    Method::from_bytes(name.as_bytes())
        .map_err(|_| FetchError::InvalidRequest(format!("invalid method {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_url_defaults() {
        let request = Request::new("https://example.com/a", FetchInit::new()).unwrap();
        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.url().as_str(), "https://example.com/a");
        assert!(request.headers().is_empty());
        assert!(request.body().is_none());
    }

    #[test]
    fn test_invalid_url() {
        let err = Request::new("not a url", FetchInit::new()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_method_normalization() {
        let request = Request::new(
            "https://example.com",
            FetchInit::new().method("post").body("x"),
        )
        .unwrap();
        assert_eq!(request.method(), &Method::POST);

        let custom = Request::new("https://example.com", FetchInit::new().method("purge")).unwrap();
        assert_eq!(custom.method().as_str(), "purge");
    }

    #[test]
    fn test_get_with_body_rejected() {
        assert!(Request::new("https://example.com", FetchInit::new().body("x")).is_err());
    }

    #[test]
    fn test_init_overrides_request_input() {
        let base = Request::new(
            "https://example.com",
            FetchInit::new().headers(vec![("a", "1")]),
        )
        .unwrap();
        let copy = Request::new(
            base.clone(),
            FetchInit::new().method("PUT").headers(json!({ "b": 2 })),
        )
        .unwrap();
        assert_eq!(copy.url(), base.url());
        assert_eq!(copy.method(), &Method::PUT);
        assert_eq!(copy.headers(), &[("b".to_string(), "2".to_string())]);
    }

    #[test]
    fn test_take_options_strips_bridge_fields() {
        let mut init = FetchInit::new()
            .connect_timeout(500)
            .user_agent("agent")
            .headers(vec![("accept", "*/*")]);
        let options = init.take_options();
        assert_eq!(options.connect_timeout, Some(500));
        assert_eq!(options.user_agent.as_deref(), Some("agent"));
        assert!(init.options.is_empty());

        let request = Request::new("https://example.com", init).unwrap();
        assert_eq!(request.headers().len(), 1);
        assert!(request.headers().iter().all(|(k, _)| k != "user-agent"));
    }
}
