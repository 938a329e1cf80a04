//! Hooks the host engine calls at each interception point.

use std::sync::Arc;

use super::Pipeline;
use crate::flow::http_flow::UpstreamResponse;
use crate::flow::{Flow, HttpFlow};
use crate::policy::Verdict;

#[derive(Clone)]
pub struct Interceptor {
    pipeline: Arc<Pipeline>,
}

impl Interceptor {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Runs the request phase on a freshly received flow.
    ///
    /// The caller forwards upstream only when the flow has no committed
    /// response afterwards.
    pub fn on_request_received(&self, flow: &mut HttpFlow) -> Verdict {
        let verdict = self.pipeline.run_request_phase(flow);
        tracing::debug!(
            host = %flow.host(),
            path = %flow.request().path,
            verdict = verdict.as_str(),
            committed = flow.is_committed(),
            "Request phase done"
        );
        verdict
    }

    /// Attaches the upstream response and runs the response phase.
    ///
    /// Skipped when the request phase already committed a response.
    pub fn on_response_received(&self, flow: &mut HttpFlow, upstream: UpstreamResponse) -> Verdict {
        flow.set_upstream(upstream);
        if flow.is_committed() {
            return Verdict::Stop;
        }
        self.pipeline.run_response_phase(flow)
    }
}
