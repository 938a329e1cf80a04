//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! pipeline, policy modules, http server
//!     → logging.rs (tracing events, fmt subscriber)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout
//!     → Metrics endpoint (Prometheus scrape)
//! ```

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
