//! Ordered dispatch of flows through the policy modules.
//!
//! # Data Flow
//! ```text
//! Interceptor::on_request_received
//!     → Pipeline::run_request_phase  (ordering.request_modules, in order)
//!     → [host engine forwards upstream unless a response was committed]
//! Interceptor::on_response_received
//!     → Pipeline::run_response_phase (ordering.response_modules, in order)
//! ```
//!
//! # Design Decisions
//! - The ordering is an `ArcSwap` snapshot taken once per phase; admin
//!   changes apply to the next phase that starts
//! - Modules not declaring the current phase are skipped
//! - A `Stop` verdict ends the phase immediately
//! - Module errors follow the configured fail mode

pub mod interceptor;

use arc_swap::ArcSwap;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::flow::{Flow, FlowResponse};
use crate::observability::metrics;
use crate::policy::{ModuleSet, Phase, Policy, PolicyError, Verdict};
use crate::store::ModuleOrdering;

pub use interceptor::Interceptor;

/// Ordering shared between the pipeline and the management module.
pub type SharedOrdering = Arc<ArcSwap<ModuleOrdering>>;

/// What to do when a module returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Stop the phase; commit a 500 unless a response already exists.
    #[default]
    Closed,
    /// Log and continue with the next module.
    Open,
}

pub struct Pipeline {
    modules: ModuleSet,
    ordering: SharedOrdering,
    fail_mode: FailMode,
}

impl Pipeline {
    pub fn new(modules: ModuleSet, ordering: SharedOrdering, fail_mode: FailMode) -> Self {
        Self {
            modules,
            ordering,
            fail_mode,
        }
    }

    /// Builds a pipeline from explicit per-phase chains.
    pub fn from_chains(
        request: Vec<Arc<dyn Policy>>,
        response: Vec<Arc<dyn Policy>>,
        fail_mode: FailMode,
    ) -> Self {
        let ordering = ModuleOrdering {
            request_modules: request.iter().map(|m| m.id().to_string()).collect(),
            response_modules: response.iter().map(|m| m.id().to_string()).collect(),
        };
        let modules = request
            .into_iter()
            .chain(response)
            .map(|m| (m.id(), m))
            .collect();
        Self::new(modules, Arc::new(ArcSwap::from_pointee(ordering)), fail_mode)
    }

    pub fn ordering(&self) -> Arc<ModuleOrdering> {
        self.ordering.load_full()
    }

    pub fn fail_mode(&self) -> FailMode {
        self.fail_mode
    }

    pub fn run_request_phase(&self, flow: &mut dyn Flow) -> Verdict {
        self.run(Phase::Request, flow)
    }

    pub fn run_response_phase(&self, flow: &mut dyn Flow) -> Verdict {
        self.run(Phase::Response, flow)
    }

    fn run(&self, phase: Phase, flow: &mut dyn Flow) -> Verdict {
        let start = Instant::now();
        let ordering = self.ordering.load_full();
        let ids = match phase {
            Phase::Request => &ordering.request_modules,
            Phase::Response => &ordering.response_modules,
        };

        let mut verdict = Verdict::Continue;
        for id in ids {
            let Some(module) = self.modules.get(id.as_str()) else {
                tracing::warn!(module = %id, phase = phase.as_str(), "Unregistered module in ordering, skipped");
                continue;
            };
            if !module.phases().contains(phase) {
                continue;
            }

            let result = match phase {
                Phase::Request => module.on_request(flow),
                Phase::Response => module.on_response(flow),
            };
            let module_verdict = match result {
                Ok(v) => v,
                Err(e) => self.on_module_error(module.id(), phase, flow, e),
            };
            metrics::record_verdict(module.id(), phase, module_verdict);

            if module_verdict == Verdict::Stop {
                tracing::debug!(
                    module = module.id(),
                    phase = phase.as_str(),
                    host = %flow.host(),
                    "Phase stopped"
                );
                verdict = Verdict::Stop;
                break;
            }
        }

        metrics::record_phase_duration(phase, start);
        verdict
    }

    fn on_module_error(
        &self,
        module: &'static str,
        phase: Phase,
        flow: &mut dyn Flow,
        error: PolicyError,
    ) -> Verdict {
        tracing::error!(
            module,
            phase = phase.as_str(),
            host = %flow.host(),
            error = %error,
            fail_mode = ?self.fail_mode,
            "Policy module failed"
        );
        match self.fail_mode {
            FailMode::Open => Verdict::Continue,
            FailMode::Closed => {
                if !flow.is_committed() {
                    let _ = flow.commit(FlowResponse::text(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Policy evaluation failed",
                    ));
                }
                Verdict::Stop
            }
        }
    }
}
