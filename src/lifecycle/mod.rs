//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Open store → Load ordering → Build modules → Pipeline
//!
//! Shutdown (shutdown.rs):
//!     Ctrl+C → broadcast → server stops accepting → drain → exit
//! ```

pub mod shutdown;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{build_interceptor, StartupError};
