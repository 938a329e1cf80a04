//! `Flow` implementation over buffered `axum::http` messages.

use axum::body::{Body, Bytes};
use axum::http::{header, request, response, HeaderMap, HeaderValue, Method, Response, StatusCode};

use super::{parse_cookies, Flow, FlowError, FlowResponse, RequestView};

/// Buffered upstream response attached before the response phase.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn from_parts(parts: response::Parts, body: Bytes) -> Self {
        Self {
            status: parts.status,
            headers: parts.headers,
            body,
        }
    }
}

/// One proxied exchange, fully buffered.
#[derive(Debug)]
pub struct HttpFlow {
    host: String,
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Bytes,
    upstream: Option<UpstreamResponse>,
    committed: Option<FlowResponse>,
}

impl HttpFlow {
    pub fn new(host: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            upstream: None,
            committed: None,
        }
    }

    /// Builds a flow from buffered request parts.
    ///
    /// The host comes from the absolute-form URI when present, otherwise from
    /// the `Host` header. The port is dropped.
    pub fn from_request(parts: &request::Parts, body: Bytes) -> Self {
        let host = parts
            .uri
            .host()
            .map(str::to_string)
            .or_else(|| {
                parts
                    .headers
                    .get(header::HOST)
                    .and_then(|h| h.to_str().ok())
                    .map(strip_port)
            })
            .unwrap_or_default();

        Self::new(host, parts.method.clone(), parts.uri.path())
            .with_headers(parts.headers.clone())
            .with_body(body)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_header(mut self, name: header::HeaderName, value: &str) -> Self {
        if let Ok(v) = HeaderValue::from_str(value) {
            self.headers.append(name, v);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Attaches the upstream response ahead of the response phase.
    pub fn set_upstream(&mut self, upstream: UpstreamResponse) {
        self.upstream = Some(upstream);
    }

    pub fn upstream(&self) -> Option<&UpstreamResponse> {
        self.upstream.as_ref()
    }

    pub fn committed(&self) -> Option<&FlowResponse> {
        self.committed.as_ref()
    }

    /// Converts the flow into the response sent to the client.
    ///
    /// A committed response wins over the upstream one. Returns `None` when
    /// neither exists.
    pub fn into_response(self) -> Option<Response<Body>> {
        if let Some(committed) = self.committed {
            let mut res = Response::new(Body::from(committed.body.clone()));
            *res.status_mut() = committed.status;
            if let Ok(ct) = HeaderValue::from_str(&committed.content_type) {
                res.headers_mut().insert(header::CONTENT_TYPE, ct);
            }
            if let Some(cookie) = committed.set_cookie_header() {
                if let Ok(v) = HeaderValue::from_str(&cookie) {
                    res.headers_mut().insert(header::SET_COOKIE, v);
                }
            }
            return Some(res);
        }

        self.upstream.map(|upstream| {
            let mut res = Response::new(Body::from(upstream.body));
            *res.status_mut() = upstream.status;
            *res.headers_mut() = upstream.headers;
            res
        })
    }
}

impl Flow for HttpFlow {
    fn host(&self) -> &str {
        &self.host
    }

    fn request(&self) -> RequestView<'_> {
        RequestView {
            method: &self.method,
            path: &self.path,
            headers: &self.headers,
            body: &self.body,
        }
    }

    fn cookie(&self, key: &str) -> Option<String> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .flat_map(parse_cookies)
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    }

    fn response_header(&self, name: &str) -> Option<&str> {
        self.upstream
            .as_ref()?
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
    }

    fn is_committed(&self) -> bool {
        self.committed.is_some()
    }

    fn commit(&mut self, response: FlowResponse) -> Result<(), FlowError> {
        if let Some(existing) = &self.committed {
            tracing::error!(
                host = %self.host,
                path = %self.path,
                existing = %existing.status,
                rejected = %response.status,
                "Second response commit on one flow rejected"
            );
            return Err(FlowError::AlreadyCommitted {
                existing: existing.status,
                rejected: response.status,
            });
        }
        self.committed = Some(response);
        Ok(())
    }
}

fn strip_port(host: &str) -> String {
    // Bracketed IPv6 literals keep their colons.
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or_default().to_string();
    }
    host.split(':').next().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(req: Request<()>) -> request::Parts {
        req.into_parts().0
    }

    #[test]
    fn test_host_from_absolute_uri() {
        let p = parts(
            Request::builder()
                .uri("http://Shop.Example.com:8080/cart?id=1")
                .body(())
                .unwrap(),
        );
        let flow = HttpFlow::from_request(&p, Bytes::new());
        assert_eq!(flow.host(), "shop.example.com");
        assert_eq!(flow.request().path, "/cart");
    }

    #[test]
    fn test_host_from_header() {
        let p = parts(
            Request::builder()
                .uri("/index.html")
                .header("Host", "www.example.com:443")
                .body(())
                .unwrap(),
        );
        let flow = HttpFlow::from_request(&p, Bytes::new());
        assert_eq!(flow.host(), "www.example.com");
        assert_eq!(strip_port("[::1]:8080"), "::1");
    }

    #[test]
    fn test_cookie_lookup() {
        let flow = HttpFlow::new("settings.it", Method::GET, "/api/auth/check")
            .with_header(header::COOKIE, "theme=dark; session=abc123");
        assert_eq!(flow.cookie("session").as_deref(), Some("abc123"));
        assert_eq!(flow.cookie("missing"), None);
    }

    #[test]
    fn test_first_commit_wins() {
        let mut flow = HttpFlow::new("example.com", Method::GET, "/");
        flow.kill().unwrap();
        let err = flow
            .make_response(StatusCode::OK, Bytes::from_static(b"late"), "text/plain")
            .unwrap_err();
        assert_eq!(
            err,
            FlowError::AlreadyCommitted {
                existing: StatusCode::FORBIDDEN,
                rejected: StatusCode::OK,
            }
        );
        assert_eq!(flow.committed().unwrap().status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_committed_response_replaces_upstream() {
        let mut flow = HttpFlow::new("example.com", Method::GET, "/logo.png");
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
        flow.set_upstream(UpstreamResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::from_static(b"\x89PNG"),
        });
        assert_eq!(flow.response_header("content-type"), Some("image/png"));

        flow.make_response_with_cookie(
            StatusCode::OK,
            Bytes::from_static(b"{}"),
            "application/json",
            "session",
            "xyz",
        )
        .unwrap();
        let res = flow.into_response().unwrap();
        assert_eq!(res.headers()[header::SET_COOKIE], "session=xyz");
        assert_eq!(res.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_no_response() {
        let flow = HttpFlow::new("example.com", Method::GET, "/");
        assert!(flow.into_response().is_none());
    }
}
