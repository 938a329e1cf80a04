//! Static module registry.
//!
//! Every policy module the proxy can run is listed here with its
//! constructor. The persisted ordering may only reference these ids.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::{
    allow_list, auth, content_type, plugins, AdminHost, AllowListPolicy, AuthPolicy,
    ContentTypePolicy, PluginsManagement, Policy, SessionToken,
};
use crate::pipeline::SharedOrdering;
use crate::store::{ConfigStore, ModuleOrdering, StoreError, PLUGINS};

/// Dependencies handed to module constructors.
#[derive(Clone)]
pub struct ModuleContext {
    pub store: Arc<ConfigStore>,
    pub admin: AdminHost,
    pub session: Arc<SessionToken>,
    pub ordering: SharedOrdering,
    pub require_session: bool,
}

/// Reasons a module ordering is refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown module: {0}")]
    UnknownModule(String),

    #[error("Module listed twice: {0}")]
    Duplicate(String),

    #[error("{0} must stay in the request modules")]
    Required(&'static str),
}

type Constructor = fn(&ModuleContext) -> Result<Arc<dyn Policy>, StoreError>;

pub struct ModuleEntry {
    pub id: &'static str,
    build: Constructor,
}

/// Instantiated modules keyed by id.
pub type ModuleSet = HashMap<&'static str, Arc<dyn Policy>>;

pub static REGISTRY: &[ModuleEntry] = &[
    ModuleEntry {
        id: auth::ID,
        build: build_auth,
    },
    ModuleEntry {
        id: plugins::ID,
        build: build_plugins_management,
    },
    ModuleEntry {
        id: allow_list::ID,
        build: build_allow_list,
    },
    ModuleEntry {
        id: content_type::ID,
        build: build_content_type,
    },
];

fn build_auth(ctx: &ModuleContext) -> Result<Arc<dyn Policy>, StoreError> {
    let policy: Arc<dyn Policy> = Arc::new(AuthPolicy::new(
        ctx.store.clone(),
        ctx.admin.clone(),
        ctx.session.clone(),
        ctx.require_session,
    ));
    Ok(policy)
}

fn build_plugins_management(ctx: &ModuleContext) -> Result<Arc<dyn Policy>, StoreError> {
    let policy: Arc<dyn Policy> = Arc::new(PluginsManagement::new(
        ctx.store.clone(),
        ctx.admin.clone(),
        ctx.ordering.clone(),
    ));
    Ok(policy)
}

fn build_allow_list(ctx: &ModuleContext) -> Result<Arc<dyn Policy>, StoreError> {
    let policy: Arc<dyn Policy> = Arc::new(AllowListPolicy::new(ctx.store.clone(), ctx.admin.clone())?);
    Ok(policy)
}

fn build_content_type(ctx: &ModuleContext) -> Result<Arc<dyn Policy>, StoreError> {
    let policy: Arc<dyn Policy> =
        Arc::new(ContentTypePolicy::new(ctx.store.clone(), ctx.admin.clone())?);
    Ok(policy)
}

pub fn is_registered(id: &str) -> bool {
    REGISTRY.iter().any(|entry| entry.id == id)
}

/// Ordering used when the `plugins` table is empty.
pub fn default_ordering() -> ModuleOrdering {
    ModuleOrdering {
        request_modules: REGISTRY.iter().map(|e| e.id.to_string()).collect(),
        response_modules: vec![content_type::ID.to_string()],
    }
}

/// Loads the persisted ordering, seeding the table with the default one on
/// first start.
pub fn load_ordering(store: &ConfigStore) -> Result<ModuleOrdering, StoreError> {
    if let Some(ordering) = store.fetch_all_as::<ModuleOrdering>(PLUGINS)?.into_iter().next() {
        for id in ordering.request_modules.iter().chain(&ordering.response_modules) {
            if !is_registered(id) {
                tracing::warn!(module = %id, "Persisted ordering names an unregistered module");
            }
        }
        return Ok(ordering);
    }

    let ordering = default_ordering();
    plugins::save_ordering(store, &ordering)?;
    tracing::info!("Module ordering seeded with defaults");
    Ok(ordering)
}

/// Builds one instance of every registered module.
pub fn instantiate(ctx: &ModuleContext) -> Result<ModuleSet, StoreError> {
    let mut modules = ModuleSet::new();
    for entry in REGISTRY {
        let module = (entry.build)(ctx)?;
        tracing::info!(module = entry.id, title = module.title(), "Policy module ready");
        modules.insert(entry.id, module);
    }
    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arc_swap::ArcSwap;

    #[test]
    fn test_default_ordering_is_valid() {
        let ordering = default_ordering();
        assert_eq!(ordering.request_modules.first().map(String::as_str), Some(auth::ID));
        assert!(plugins::validate_ordering(&ordering).is_ok());

        let mut bad = ordering.clone();
        bad.response_modules.push("settings".to_string());
        assert_eq!(
            plugins::validate_ordering(&bad),
            Err(RegistryError::UnknownModule("settings".to_string()))
        );
    }

    #[test]
    fn test_load_seeds_then_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("db.json")).unwrap();
        assert_eq!(load_ordering(&store).unwrap(), default_ordering());
        assert_eq!(store.fetch_all(PLUGINS).len(), 1);

        let custom = ModuleOrdering {
            request_modules: vec![plugins::ID.to_string()],
            response_modules: vec![],
        };
        plugins::save_ordering(&store, &custom).unwrap();
        assert_eq!(load_ordering(&store).unwrap(), custom);
    }

    #[test]
    fn test_instantiate_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConfigStore::open(dir.path().join("db.json")).unwrap());
        let ctx = ModuleContext {
            store,
            admin: AdminHost::default(),
            session: Arc::new(SessionToken::generate()),
            ordering: Arc::new(ArcSwap::from_pointee(default_ordering())),
            require_session: false,
        };
        let modules = instantiate(&ctx).unwrap();
        assert_eq!(modules.len(), REGISTRY.len());
        for entry in REGISTRY {
            assert_eq!(modules[entry.id].id(), entry.id);
        }
        assert!(is_registered("allow_list"));
        assert!(!is_registered("settings"));
    }
}
