//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all proxy handler
//! - Wire up middleware (tracing, limits, request ID, timeout)
//! - Buffer each request and run the request phase
//! - Forward admitted requests upstream and run the response phase
//! - Answer admin-host requests no module handled with a local 404

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::flow::{Flow, HttpFlow};
use crate::http::request::{self, MakeRequestUuid};
use crate::http::upstream::Forwarder;
use crate::observability::metrics;
use crate::pipeline::Interceptor;
use crate::policy::AdminHost;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub interceptor: Interceptor,
    pub forwarder: Arc<Forwarder>,
    pub admin: AdminHost,
    pub max_body_size: usize,
}

/// HTTP server hosting the policy pipeline.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    /// Create a new HTTP server around a ready interceptor.
    pub fn new(config: ProxyConfig, interceptor: Interceptor) -> Self {
        let forwarder = Arc::new(Forwarder::new(
            Duration::from_secs(config.timeouts.connect_secs),
            Duration::from_secs(config.timeouts.upstream_secs),
            config.security.max_body_size,
        ));

        let state = AppState {
            interceptor,
            forwarder,
            admin: AdminHost::new(&config.admin.host),
            max_body_size: config.security.max_body_size,
        };

        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(ConcurrencyLimitLayer::new(config.listener.max_connections))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server until the shutdown signal fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            admin_host = %self.config.admin.host,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Main proxy handler.
/// Buffers the request, runs both phases around the upstream exchange.
async fn proxy_handler(State(state): State<AppState>, req: Request<Body>) -> Response {
    let request_id = request::request_id(req.headers()).to_string();
    let (parts, body) = req.into_parts();

    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Request body rejected");
            metrics::record_request("rejected");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let flow = HttpFlow::from_request(&parts, body.clone());
    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        host = %flow.host(),
        path = %parts.uri.path(),
        "Intercepted request"
    );

    // Policy modules may touch the table file, keep them off the reactor.
    let interceptor = state.interceptor.clone();
    let flow = match tokio::task::spawn_blocking(move || {
        let mut flow = flow;
        interceptor.on_request_received(&mut flow);
        flow
    })
    .await
    {
        Ok(flow) => flow,
        Err(e) => return pipeline_failure(&request_id, e),
    };

    if flow.is_committed() {
        metrics::record_request("answered");
        return finish(flow);
    }

    if state.admin.is_admin_host(flow.host()) {
        tracing::debug!(request_id = %request_id, path = %parts.uri.path(), "Unhandled admin request");
        metrics::record_request("not_found");
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    }

    let upstream = match state.forwarder.forward(&parts, body).await {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::error!(request_id = %request_id, host = %flow.host(), error = %e, "Upstream error");
            metrics::record_request("upstream_error");
            return (e.status(), "Upstream request failed").into_response();
        }
    };

    let interceptor = state.interceptor.clone();
    let flow = match tokio::task::spawn_blocking(move || {
        let mut flow = flow;
        interceptor.on_response_received(&mut flow, upstream);
        flow
    })
    .await
    {
        Ok(flow) => flow,
        Err(e) => return pipeline_failure(&request_id, e),
    };

    metrics::record_request(if flow.is_committed() { "answered" } else { "forwarded" });
    finish(flow)
}

fn finish(flow: HttpFlow) -> Response {
    flow.into_response()
        .unwrap_or_else(|| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn pipeline_failure(request_id: &str, error: tokio::task::JoinError) -> Response {
    tracing::error!(request_id = %request_id, error = %error, "Policy pipeline task failed");
    metrics::record_request("pipeline_error");
    (StatusCode::INTERNAL_SERVER_ERROR, "Policy evaluation failed").into_response()
}
