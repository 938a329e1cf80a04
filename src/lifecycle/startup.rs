//! Startup orchestration.
//!
//! Store first, then the persisted module ordering, then the modules, then
//! the pipeline. Any failure is fatal; listeners are bound by the caller
//! only once this succeeded.

use arc_swap::ArcSwap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ProxyConfig;
use crate::pipeline::{Interceptor, Pipeline};
use crate::policy::registry::{self, ModuleContext};
use crate::policy::{AdminHost, SessionToken};
use crate::store::{ConfigStore, StoreError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("policy store: {0}")]
    Store(#[from] StoreError),
}

/// Opens the store and builds the interceptor the server runs.
pub fn build_interceptor(config: &ProxyConfig) -> Result<Interceptor, StartupError> {
    let store = Arc::new(ConfigStore::open(&config.store.path)?);

    let ordering = Arc::new(ArcSwap::from_pointee(registry::load_ordering(&store)?));
    let ctx = ModuleContext {
        store,
        admin: AdminHost::new(&config.admin.host),
        session: Arc::new(SessionToken::generate()),
        ordering: ordering.clone(),
        require_session: config.admin.require_session,
    };
    let modules = registry::instantiate(&ctx)?;

    let current = ordering.load();
    tracing::info!(
        request = ?current.request_modules,
        response = ?current.response_modules,
        fail_mode = ?config.pipeline.fail_mode,
        "Pipeline ready"
    );

    let pipeline = Pipeline::new(modules, ordering.clone(), config.pipeline.fail_mode);
    Ok(Interceptor::new(Arc::new(pipeline)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{Flow, HttpFlow};
    use axum::http::{Method, StatusCode};

    #[test]
    fn test_fresh_store_denies_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ProxyConfig::default();
        config.store.path = dir.path().join("nested").join("db.json");

        let interceptor = build_interceptor(&config).unwrap();
        assert!(config.store.path.exists());

        let mut flow = HttpFlow::new("example.com", Method::GET, "/");
        interceptor.on_request_received(&mut flow);
        assert_eq!(flow.committed().unwrap().status, StatusCode::FORBIDDEN);
        assert!(flow.is_committed());
    }
}
