//! Client for the policy proxy's administrative API.
//!
//! Every call is sent through the proxy to the admin host, the same way a
//! browser configured to use the proxy would reach it.

pub mod client;

pub use client::{AdminClient, ContentRule, ModuleOrdering, DEFAULT_ADMIN_HOST};
