//! HTTP forward proxy with a pluggable policy pipeline.

pub mod config;
pub mod flow;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod policy;
pub mod store;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
