//! Administrative control over which registered modules run, and in what
//! order, for each phase.
//!
//! The ordering is persisted in the `plugins` table and swapped into the
//! pipeline as a whole; flows already in a phase keep the ordering they
//! started with. Modules can only be selected among the static registry, no
//! code is ever uploaded.

use axum::http::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};

use super::admin::{self, AdminHost};
use super::registry::{self, RegistryError};
use super::{Phases, PhaseResult, Policy, PolicyError, Verdict};
use crate::flow::Flow;
use crate::observability::metrics;
use crate::pipeline::SharedOrdering;
use crate::store::{ConfigStore, ModuleOrdering, StoreError, PLUGINS};

pub const ID: &str = "plugins_management";
const ENDPOINT: &str = "/api/plugins";

/// PUT body. At least one list must be present.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OrderingPatch {
    #[serde(default, alias = "request_plugins_list")]
    request_modules: Option<Vec<String>>,
    #[serde(default, alias = "response_plugins_list")]
    response_modules: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RemoveBody {
    plugin_name: Option<String>,
}

/// Persists `ordering` as the single row of the `plugins` table.
pub fn save_ordering(store: &ConfigStore, ordering: &ModuleOrdering) -> Result<(), StoreError> {
    store.replace_all(PLUGINS, std::slice::from_ref(ordering))
}

/// Checks ids against the registry. Returns the first problem found.
pub fn validate_ordering(ordering: &ModuleOrdering) -> Result<(), RegistryError> {
    for list in [&ordering.request_modules, &ordering.response_modules] {
        for (i, id) in list.iter().enumerate() {
            if !registry::is_registered(id) {
                return Err(RegistryError::UnknownModule(id.clone()));
            }
            if list[..i].contains(id) {
                return Err(RegistryError::Duplicate(id.clone()));
            }
        }
    }
    if !ordering.request_modules.iter().any(|id| id == ID) {
        return Err(RegistryError::Required(ID));
    }
    Ok(())
}

pub struct PluginsManagement {
    store: Arc<ConfigStore>,
    admin: AdminHost,
    ordering: SharedOrdering,
    update: Mutex<()>,
}

impl PluginsManagement {
    pub fn new(store: Arc<ConfigStore>, admin: AdminHost, ordering: SharedOrdering) -> Self {
        Self {
            store,
            admin,
            ordering,
            update: Mutex::new(()),
        }
    }

    fn handle_admin(&self, flow: &mut dyn Flow) -> Result<(), PolicyError> {
        let method = flow.request().method.clone();
        match method {
            Method::GET => {
                let current = self.ordering.load_full();
                admin::respond_json(flow, StatusCode::OK, &json!(*current))?;
            }
            Method::PUT => self.handle_put(flow)?,
            Method::DELETE => self.handle_delete(flow)?,
            Method::POST => {
                admin::respond_text(
                    flow,
                    StatusCode::METHOD_NOT_ALLOWED,
                    "Plugin upload is not supported, only registered modules can be ordered",
                )?;
            }
            _ => admin::method_not_allowed(flow)?,
        }
        Ok(())
    }

    /// Validates, persists, then publishes `f(current)`.
    fn apply(
        &self,
        flow: &mut dyn Flow,
        f: impl FnOnce(&ModuleOrdering) -> ModuleOrdering,
        success: String,
    ) -> Result<(), PolicyError> {
        let _guard = self.update.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.ordering.load_full();
        let next = f(current.as_ref());

        if let Err(e) = validate_ordering(&next) {
            tracing::warn!(error = %e, "Module ordering rejected");
            admin::respond_text(flow, StatusCode::BAD_REQUEST, e.to_string())?;
            return Ok(());
        }

        if let Err(e) = save_ordering(&self.store, &next) {
            tracing::error!(error = %e, "Failed to persist module ordering");
            admin::storage_failure(flow, ID)?;
            return Ok(());
        }

        tracing::info!(
            request = ?next.request_modules,
            response = ?next.response_modules,
            "Module ordering updated"
        );
        self.ordering.store(Arc::new(next));
        metrics::record_admin_mutation(ID, "ok");
        admin::respond_text(flow, StatusCode::OK, success)?;
        Ok(())
    }

    fn handle_put(&self, flow: &mut dyn Flow) -> Result<(), PolicyError> {
        let patch = match admin::parse_body::<OrderingPatch>(flow) {
            Ok(patch) if patch.request_modules.is_some() || patch.response_modules.is_some() => patch,
            Ok(_) => {
                admin::respond_text(flow, StatusCode::BAD_REQUEST, "No module list given")?;
                return Ok(());
            }
            Err(e) => {
                tracing::debug!(error = %e, "Malformed module ordering body");
                admin::respond_text(flow, StatusCode::BAD_REQUEST, "Invalid format")?;
                return Ok(());
            }
        };

        self.apply(
            flow,
            |current| ModuleOrdering {
                request_modules: patch
                    .request_modules
                    .unwrap_or_else(|| current.request_modules.clone()),
                response_modules: patch
                    .response_modules
                    .unwrap_or_else(|| current.response_modules.clone()),
            },
            "Plugins list updated successfully".to_string(),
        )
    }

    fn handle_delete(&self, flow: &mut dyn Flow) -> Result<(), PolicyError> {
        let name = admin::parse_body::<RemoveBody>(flow)
            .ok()
            .and_then(|b| admin::non_empty(b.plugin_name));
        let Some(name) = name else {
            admin::respond_text(flow, StatusCode::BAD_REQUEST, "Invalid format")?;
            return Ok(());
        };

        let current = self.ordering.load_full();
        let active = current.request_modules.contains(&name) || current.response_modules.contains(&name);
        if !active {
            admin::respond_text(flow, StatusCode::BAD_REQUEST, "Plugin is not active")?;
            return Ok(());
        }

        let success = format!("Plugin '{}' removed successfully.", name);
        self.apply(
            flow,
            |current| ModuleOrdering {
                request_modules: current
                    .request_modules
                    .iter()
                    .filter(|id| **id != name)
                    .cloned()
                    .collect(),
                response_modules: current
                    .response_modules
                    .iter()
                    .filter(|id| **id != name)
                    .cloned()
                    .collect(),
            },
            success,
        )
    }
}

impl Policy for PluginsManagement {
    fn id(&self) -> &'static str {
        ID
    }

    fn title(&self) -> &'static str {
        "Plugins Management"
    }

    fn phases(&self) -> Phases {
        Phases::REQUEST
    }

    fn on_request(&self, flow: &mut dyn Flow) -> PhaseResult {
        if self.admin.targets(flow, ENDPOINT) {
            self.handle_admin(flow)?;
        }
        Ok(Verdict::Continue)
    }
}
