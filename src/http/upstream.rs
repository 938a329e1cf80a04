//! Forwarding of admitted requests to the origin server.
//!
//! The proxy is a plain HTTP forward proxy: the target comes from the
//! absolute-form request URI, or from the `Host` header for origin-form
//! requests. Both directions are fully buffered so policy modules see whole
//! messages.

use axum::body::{Body, Bytes};
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{header, request, HeaderMap, Request, StatusCode, Uri};
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use thiserror::Error;

use crate::flow::http_flow::UpstreamResponse;

/// Headers that only apply to one hop and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("no upstream target in request: {0}")]
    InvalidTarget(String),

    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),

    #[error("upstream request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("upstream body could not be buffered: {0}")]
    Body(String),
}

impl UpstreamError {
    /// Status returned to the client for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            UpstreamError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            UpstreamError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            UpstreamError::Request(_) | UpstreamError::Body(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
    max_body_size: usize,
}

impl Forwarder {
    pub fn new(connect_timeout: Duration, timeout: Duration, max_body_size: usize) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            client,
            timeout,
            max_body_size,
        }
    }

    /// Sends the buffered request upstream and buffers the answer.
    pub async fn forward(
        &self,
        parts: &request::Parts,
        body: Bytes,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let uri = target_uri(parts)?;

        let mut req = Request::builder()
            .method(parts.method.clone())
            .uri(uri)
            .body(Body::from(body))
            .map_err(|e| UpstreamError::InvalidTarget(e.to_string()))?;
        *req.headers_mut() = parts.headers.clone();
        strip_hop_by_hop(req.headers_mut());

        let response: hyper::Response<Incoming> =
            tokio::time::timeout(self.timeout, self.client.request(req))
                .await
                .map_err(|_| UpstreamError::Timeout(self.timeout))??;

        let (mut parts, body) = response.into_parts();
        let body = axum::body::to_bytes(Body::new(body), self.max_body_size)
            .await
            .map_err(|e| UpstreamError::Body(e.to_string()))?;
        strip_hop_by_hop(&mut parts.headers);

        Ok(UpstreamResponse::from_parts(parts, body))
    }
}

/// Resolves the absolute `http://` URI of the origin server.
pub fn target_uri(parts: &request::Parts) -> Result<Uri, UpstreamError> {
    if parts.uri.authority().is_some() {
        if parts.uri.scheme() != Some(&Scheme::HTTP) {
            return Err(UpstreamError::InvalidTarget(format!(
                "unsupported scheme in {}",
                parts.uri
            )));
        }
        return Ok(parts.uri.clone());
    }

    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| UpstreamError::InvalidTarget("missing Host header".to_string()))?;
    let authority = host
        .parse::<Authority>()
        .map_err(|e| UpstreamError::InvalidTarget(format!("{}: {}", host, e)))?;
    let path = parts
        .uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));

    Uri::builder()
        .scheme(Scheme::HTTP)
        .authority(authority)
        .path_and_query(path)
        .build()
        .map_err(|e| UpstreamError::InvalidTarget(e.to_string()))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}
