//! Policy modules.
//!
//! # Data Flow
//! ```text
//! Pipeline
//!     → Policy::on_request  (auth, plugins_management, allow_list, content_type)
//!     → [upstream exchange]
//!     → Policy::on_response (content_type)
//! ```
//!
//! # Design Decisions
//! - Each module declares the phases it takes part in; the pipeline checks
//!   the declaration instead of probing for handlers
//! - Modules are constructed once at startup and shared by every connection
//! - Rule caches sit behind a per-module read-write lock; the cache is only
//!   refreshed after the store accepted the write

pub mod admin;
pub mod allow_list;
pub mod auth;
pub mod content_type;
pub mod plugins;
pub mod registry;

use thiserror::Error;

use crate::flow::{Flow, FlowError};
use crate::store::StoreError;

pub use admin::{normalize_host, AdminHost};
pub use allow_list::AllowListPolicy;
pub use auth::{AuthPolicy, SessionToken};
pub use content_type::ContentTypePolicy;
pub use plugins::PluginsManagement;
pub use registry::{ModuleContext, ModuleSet, RegistryError};

/// Pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Request,
    Response,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Request => "request",
            Phase::Response => "response",
        }
    }
}

/// Set of phases a module participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phases {
    request: bool,
    response: bool,
}

impl Phases {
    pub const REQUEST: Phases = Phases {
        request: true,
        response: false,
    };
    pub const RESPONSE: Phases = Phases {
        request: false,
        response: true,
    };
    pub const BOTH: Phases = Phases {
        request: true,
        response: true,
    };

    pub const fn contains(self, phase: Phase) -> bool {
        match phase {
            Phase::Request => self.request,
            Phase::Response => self.response,
        }
    }
}

/// Outcome of one module for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Hand the flow to the next module.
    Continue,
    /// End the phase. The flow carries the terminal response.
    Stop,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Continue => "continue",
            Verdict::Stop => "stop",
        }
    }
}

/// Errors a module can surface to the pipeline.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type PhaseResult = Result<Verdict, PolicyError>;

/// A statically registered policy module.
pub trait Policy: Send + Sync {
    /// Identifier used in the persisted module ordering.
    fn id(&self) -> &'static str;

    /// Human readable name.
    fn title(&self) -> &'static str;

    fn phases(&self) -> Phases;

    fn on_request(&self, _flow: &mut dyn Flow) -> PhaseResult {
        Ok(Verdict::Continue)
    }

    fn on_response(&self, _flow: &mut dyn Flow) -> PhaseResult {
        Ok(Verdict::Continue)
    }
}
