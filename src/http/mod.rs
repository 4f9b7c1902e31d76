//! Fetch-style request and response types.
//!
//! # Data Flow
//! ```text
//! caller input + FetchInit
//!     → request.rs (resolve method, URL, headers, body, signal)
//!     → [dispatch decides bridge or native]
//!     → response.rs (status, final URL, headers, streamed body)
//!     → caller
//! ```

pub mod request;
pub mod response;

pub use request::{FetchInit, HeaderSource, Request, RequestInput};
pub use response::{BodySender, Response, ResponseBody};
