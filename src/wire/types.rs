//! Serializable records exchanged with the bridge.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::schema::RequestOptions;

/// Opaque bridge-issued handle for a server-held resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rid-{}", self.0)
    }
}

/// A request as sent to the bridge's `open` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRequest {
    pub request_id: u64,
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Absent when the request has no body or an empty one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
    #[serde(flatten)]
    pub options: RequestOptions,
}

/// Status line and headers of the bridge's response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResponseHeader {
    pub status: u16,
    pub status_text: String,
    /// Final URL after redirects.
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Handle of the response body resource, if the bridge allocated one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_rid: Option<ResourceId>,
}

/// One message on a request's event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BodyEvent {
    Response(WireResponseHeader),
    Data(Bytes),
    Error(String),
    Done,
}

impl BodyEvent {
    /// True for events after which no further indices are meaningful.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BodyEvent::Error(_) | BodyEvent::Done)
    }
}

/// An indexed message. Indices start at 0 and are unique per request.
///
/// The header and the body share one sequence: a bridge sends `Response` at
/// 0 and numbers `Data` from 1. A `Data` event reusing the header's index is
/// a duplicate and is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub index: u64,
    pub message: BodyEvent,
}

/// What travels over the event channel: indexed messages, then an end marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChannelEvent {
    Message(Envelope),
    /// Out-of-band teardown marker; the channel is unregistered after it.
    End,
}
