//! HTTP host engine.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, body buffering)
//!     → request.rs (request ID)
//!     → pipeline request phase
//!     → upstream.rs (forward to origin, buffer answer)
//!     → pipeline response phase
//!     → Send to client
//! ```

pub mod request;
pub mod server;
pub mod upstream;

pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use server::HttpServer;
pub use upstream::{Forwarder, UpstreamError};
