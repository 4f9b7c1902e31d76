//! Conversion between fetch-style objects and wire records.
//!
//! # Responsibilities
//! - Normalize every header shape to ordered string pairs
//! - Encode a request (empty body → absent) with its transport options
//! - Decode a response header, forcing URL/headers to the reported values
//!
//! # Design Decisions
//! - Header values are stringified, never dropped
//! - Null-body statuses get no body whatever the bridge streams

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde_json::Value;
use url::Url;

use crate::config::schema::RequestOptions;
use crate::error::{FetchError, FetchResult};
use crate::http::request::{HeaderSource, Request};
use crate::http::response::{Response, ResponseBody};
use crate::wire::types::{WireRequest, WireResponseHeader};

/// Statuses whose responses never carry a body.
pub const NULL_BODY_STATUSES: [u16; 5] = [101, 103, 204, 205, 304];

pub fn is_null_body_status(status: u16) -> bool {
    NULL_BODY_STATUSES.contains(&status)
}

/// Turn any header shape into ordered `(name, value)` pairs.
pub fn normalize_headers(source: HeaderSource) -> FetchResult<Vec<(String, String)>> {
    match source {
        HeaderSource::Pairs(pairs) => Ok(pairs),
        HeaderSource::Map(map) => Ok(map.into_iter().collect()),
        HeaderSource::Native(map) => Ok(map
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect()),
        HeaderSource::Json(value) => match value {
            Value::Null => Ok(Vec::new()),
            Value::Object(map) => Ok(map
                .into_iter()
                .map(|(name, value)| (name, stringify(&value)))
                .collect()),
            Value::Array(entries) => entries
                .iter()
                .map(|entry| match entry.as_array().map(Vec::as_slice) {
                    Some([name, value]) => Ok((stringify(name), stringify(value))),
                    _ => Err(FetchError::InvalidRequest(format!(
                        "header entry must be a [name, value] pair, got {entry}"
                    ))),
                })
                .collect(),
            other => Err(FetchError::InvalidRequest(format!(
                "headers must be an object or a list of pairs, got {other}"
            ))),
        },
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(stringify).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

/// Encode a request for the bridge's `open` call.
pub fn to_wire_request(request_id: u64, request: &Request, options: RequestOptions) -> WireRequest {
    WireRequest {
        request_id,
        method: request.method().as_str().to_string(),
        url: request.url().as_str().to_string(),
        headers: request.headers().to_vec(),
        body: request
            .body()
            .filter(|body| !body.is_empty())
            .map(|body| body.to_vec()),
        options,
    }
}

/// Build a response from the bridge-reported header and a body stream.
pub fn from_wire_response(header: WireResponseHeader, body: ResponseBody) -> FetchResult<Response> {
    let status = StatusCode::from_u16(header.status)
        .map_err(|_| FetchError::Stream(format!("bridge reported invalid status {}", header.status)))?;
    let url = Url::parse(&header.url)
        .map_err(|e| FetchError::Stream(format!("bridge reported invalid url {:?}: {e}", header.url)))?;

    let mut headers = HeaderMap::with_capacity(header.headers.len());
    for (name, value) in &header.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::warn!(header = %name, "Skipping malformed response header"),
        }
    }

    let body = (!is_null_body_status(header.status)).then_some(body);

    Ok(Response::new(status, header.status_text, url, headers, body))
}
