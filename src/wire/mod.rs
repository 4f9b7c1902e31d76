//! Wire format shared with the bridge.
//!
//! # Data Flow
//! ```text
//! Request + RequestOptions
//!     → codec.rs (normalize headers, encode body)
//!     → WireRequest → bridge open/send
//!
//! Event channel (Envelope{index, BodyEvent}, then End)
//!     → reassembly (reorder)
//!     → codec.rs (WireResponseHeader → Response)
//! ```

pub mod codec;
pub mod types;

pub use codec::{from_wire_response, is_null_body_status, normalize_headers, to_wire_request};
pub use types::{BodyEvent, ChannelEvent, Envelope, ResourceId, WireRequest, WireResponseHeader};
