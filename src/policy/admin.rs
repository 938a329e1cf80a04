//! Helpers shared by the administrative endpoints of the policy modules.

use axum::http::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::flow::{Flow, FlowError, FlowResponse};
use crate::observability::metrics;

/// Strips one leading `www.`.
pub fn normalize_host(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// The administrative host name. Requests to it never leave the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminHost(String);

impl AdminHost {
    pub fn new(host: impl Into<String>) -> Self {
        Self(host.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_admin(&self, flow: &dyn Flow) -> bool {
        self.is_admin_host(flow.host())
    }

    pub fn is_admin_host(&self, host: &str) -> bool {
        normalize_host(host) == self.0
    }

    /// True for admin-host requests whose path ends with `endpoint`.
    pub fn targets(&self, flow: &dyn Flow, endpoint: &str) -> bool {
        self.is_admin(flow) && flow.request().path.ends_with(endpoint)
    }
}

impl Default for AdminHost {
    fn default() -> Self {
        Self::new("settings.it")
    }
}

/// Decodes the JSON request body.
pub fn parse_body<T: DeserializeOwned>(flow: &dyn Flow) -> Result<T, serde_json::Error> {
    serde_json::from_slice(flow.request().body)
}

pub fn respond_text(
    flow: &mut dyn Flow,
    status: StatusCode,
    message: impl Into<String>,
) -> Result<(), FlowError> {
    flow.commit(FlowResponse::text(status, message))
}

pub fn respond_json(flow: &mut dyn Flow, status: StatusCode, value: &Value) -> Result<(), FlowError> {
    flow.commit(FlowResponse::json(status, value))
}

pub fn method_not_allowed(flow: &mut dyn Flow) -> Result<(), FlowError> {
    let method = flow.request().method.clone();
    respond_text(
        flow,
        StatusCode::METHOD_NOT_ALLOWED,
        format!("Method {} not allowed", method),
    )
}

/// Answers a failed durable write.
pub fn storage_failure(flow: &mut dyn Flow, module: &'static str) -> Result<(), FlowError> {
    metrics::record_admin_mutation(module, "error");
    respond_text(
        flow,
        StatusCode::INTERNAL_SERVER_ERROR,
        "Failed to persist the change",
    )
}

/// Trims and rejects empty strings.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::HttpFlow;
    use axum::http::Method;

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("www.example.com"), "example.com");
        assert_eq!(normalize_host("example.com"), "example.com");
        assert_eq!(normalize_host("www.www.example.com"), "www.example.com");
        assert_eq!(normalize_host("wwwexample.com"), "wwwexample.com");
    }

    #[test]
    fn test_admin_targets() {
        let admin = AdminHost::default();
        let flow = HttpFlow::new("www.settings.it", Method::GET, "/api/contents");
        assert!(admin.is_admin(&flow));
        assert!(admin.targets(&flow, "/api/contents"));
        assert!(!admin.targets(&flow, "/api/approved-domains"));

        let other = HttpFlow::new("settings.it.example.com", Method::GET, "/api/contents");
        assert!(!admin.is_admin(&other));
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("  a.com ".into())).as_deref(), Some("a.com"));
        assert_eq!(non_empty(Some("   ".into())), None);
        assert_eq!(non_empty(None), None);
    }
}
