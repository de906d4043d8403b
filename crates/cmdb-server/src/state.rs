//! Shared application state handed to every handler.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use cmdb_audit::hooks::TracingHook;
use cmdb_audit::AuditHooks;
use cmdb_core::config::CmdbConfig;
use cmdb_core::packs::{PackCatalog, PackTab};
use cmdb_core::rbac::AccessControl;
use cmdb_core::registry::TypeRegistry;
use cmdb_graph::{NodeStore, StoreAuditHook};

use crate::service::NodeService;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: CmdbConfig,
    pub registry: Arc<TypeRegistry>,
    pub acl: Arc<AccessControl>,
    pub store: Arc<dyn NodeStore>,
    pub hooks: Arc<AuditHooks>,
    pub service: NodeService,
    catalog: RwLock<PackCatalog>,
}

impl AppState {
    /// Build state over `store`. The registry starts empty; call
    /// [`crate::bootstrap::load`] to populate it from the packs directory.
    pub fn new(config: CmdbConfig, store: Arc<dyn NodeStore>) -> Self {
        let registry = Arc::new(TypeRegistry::new());
        let acl = Arc::new(AccessControl::from_config(&config.auth));
        let hooks = Arc::new(AuditHooks::new());
        hooks.register(Arc::new(StoreAuditHook::new(store.clone())));
        hooks.register(Arc::new(TracingHook));

        let service = NodeService::new(registry.clone(), store.clone(), hooks.clone());
        Self {
            config,
            registry,
            acl,
            store,
            hooks,
            service,
            catalog: RwLock::new(PackCatalog::new()),
        }
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(self)
    }

    pub fn packs_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.packs.dir)
    }

    pub fn tabs_for(&self, label: &str) -> Vec<PackTab> {
        let catalog = self.catalog.read().unwrap_or_else(|e| e.into_inner());
        catalog.tabs_for(label)
    }

    pub fn replace_catalog(&self, catalog: PackCatalog) {
        let mut guard = self.catalog.write().unwrap_or_else(|e| e.into_inner());
        *guard = catalog;
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("types", &self.registry.len())
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}
