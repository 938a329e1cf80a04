//! Flow abstraction between policy modules and the proxy engine.
//!
//! # Data Flow
//! ```text
//! host engine request/response
//!     → HttpFlow (owned, buffered copy of the exchange)
//!     → &mut dyn Flow handed to each policy module
//!     → committed FlowResponse (if any) replaces the upstream exchange
//! ```
//!
//! # Design Decisions
//! - Modules only see the `Flow` trait, never the engine types
//! - A terminal response can be committed once; later commits are rejected
//!   and the first response stays authoritative
//! - All operations are synchronous and local to the flow

pub mod http_flow;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode};
use thiserror::Error;

pub use http_flow::HttpFlow;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// Errors raised by flow operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// A terminal response was already committed on this flow.
    #[error("response already committed with status {existing}, rejected {rejected}")]
    AlreadyCommitted {
        existing: StatusCode,
        rejected: StatusCode,
    },
}

/// Read-only view of the client request.
#[derive(Debug, Clone, Copy)]
pub struct RequestView<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
}

/// A terminal response committed by a policy module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowResponse {
    pub status: StatusCode,
    pub body: Bytes,
    pub content_type: String,
    pub set_cookie: Option<(String, String)>,
}

impl FlowResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>, content_type: &str) -> Self {
        Self {
            status,
            body: body.into(),
            content_type: content_type.to_string(),
            set_cookie: None,
        }
    }

    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self::new(status, body.into(), CONTENT_TYPE_TEXT)
    }

    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string(), CONTENT_TYPE_JSON)
    }

    /// The response used to deny a connection.
    pub fn denied() -> Self {
        Self::text(StatusCode::FORBIDDEN, "Unauthorized request!")
    }

    pub fn with_cookie(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_cookie = Some((key.into(), value.into()));
        self
    }

    /// Value for the `Set-Cookie` header, if a cookie was attached.
    pub fn set_cookie_header(&self) -> Option<String> {
        self.set_cookie
            .as_ref()
            .map(|(key, value)| format!("{}={}", key, value))
    }
}

/// Capability surface a policy module may use on one in-flight exchange.
pub trait Flow: Send {
    /// Request host without port, lowercased.
    fn host(&self) -> &str;

    fn request(&self) -> RequestView<'_>;

    fn cookie(&self, key: &str) -> Option<String>;

    /// Header of the upstream response; `None` during the request phase.
    fn response_header(&self, name: &str) -> Option<&str>;

    fn is_committed(&self) -> bool;

    /// Commits a terminal response. Fails if one was already committed.
    fn commit(&mut self, response: FlowResponse) -> Result<(), FlowError>;

    fn make_response(
        &mut self,
        status: StatusCode,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), FlowError> {
        self.commit(FlowResponse::new(status, body, content_type))
    }

    fn make_response_with_cookie(
        &mut self,
        status: StatusCode,
        body: Bytes,
        content_type: &str,
        key: &str,
        value: &str,
    ) -> Result<(), FlowError> {
        self.commit(FlowResponse::new(status, body, content_type).with_cookie(key, value))
    }

    /// Denies the exchange with 403 "Unauthorized request!".
    fn kill(&mut self) -> Result<(), FlowError> {
        self.commit(FlowResponse::denied())
    }
}

/// Parses a `Cookie` header value into its `key=value` pairs.
pub fn parse_cookies(header: &str) -> impl Iterator<Item = (&str, &str)> {
    header.split(';').filter_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        Some((key.trim(), value.trim()))
    })
}
