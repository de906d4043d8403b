//! Startup wiring: feature packs on disk → pack catalog in the store →
//! type registry, tabs and permissions in memory.
//!
//! Pack records remember whether a pack is enabled. A pack seen for the first
//! time is enabled; afterwards the stored flag wins, so toggling a pack in the
//! UI survives a restart. Only enabled packs contribute types.

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;

use cmdb_core::packs::{
    check_dependencies, discover_packs, needs_sync, PackCatalog, PackError, PackRecord,
    TypeDefinitionRecord,
};
use cmdb_core::rbac::SyncStats;
use cmdb_core::types::Label;
use cmdb_graph::NodeStore;

use crate::error::{AppError, Result};
use crate::state::AppState;

/// Outcome of reconciling the packs directory with the store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PackSyncReport {
    pub discovered: usize,
    /// Packs whose record and type definitions were (re)written.
    pub synced: Vec<String>,
    pub enabled: Vec<String>,
    pub disabled: Vec<String>,
}

/// What [`load`] did, for logging and the CLI.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub packs: PackSyncReport,
    pub types: usize,
    pub tabs: usize,
    pub permissions: SyncStats,
}

/// Write every new or modified pack under `dir` to the store.
pub async fn sync_packs(store: &dyn NodeStore, dir: &Path) -> Result<PackSyncReport> {
    let discovered = discover_packs(dir)?;
    let mut report = PackSyncReport {
        discovered: discovered.len(),
        ..Default::default()
    };

    for pack in &discovered {
        let stored = store.get_pack(&pack.name).await?;
        let enabled = stored.as_ref().map(|p| p.enabled).unwrap_or(true);

        if needs_sync(stored.as_ref(), pack) {
            store
                .upsert_pack(&PackRecord::from_discovered(pack, enabled, Utc::now()))
                .await?;
            for record in TypeDefinitionRecord::for_pack(pack, enabled) {
                store.upsert_type_definition(&record).await?;
            }
            tracing::info!(pack = %pack.name, types = pack.types.len(), enabled, "Synced feature pack");
            report.synced.push(pack.name.clone());
        }

        if enabled {
            report.enabled.push(pack.name.clone());
        } else {
            report.disabled.push(pack.name.clone());
        }
    }
    Ok(report)
}

/// Bring `state` up: schema, pack sync, registry, tabs, permissions.
pub async fn load(state: &AppState) -> Result<LoadReport> {
    state.store.ensure_schema().await?;
    let packs = sync_packs(state.store.as_ref(), &state.packs_dir()).await?;

    state.registry.clear();
    for pack in state.store.list_packs().await? {
        if pack.enabled && Path::new(&pack.path).is_dir() {
            register_pack_types(state, &pack.name).await?;
        }
    }
    let tabs = rebuild_catalog(state).await?;
    let permissions = state.acl.sync_all(&state.registry);

    let report = LoadReport {
        packs,
        types: state.registry.len(),
        tabs,
        permissions,
    };
    tracing::info!(
        packs = report.packs.discovered,
        enabled = report.packs.enabled.len(),
        types = report.types,
        tabs = report.tabs,
        "Type registry loaded"
    );
    Ok(report)
}

/// Enable or disable a pack and apply the change to the live registry.
///
/// Enabling checks the pack's dependencies first. Disabling keeps the
/// permissions of the pack's types so group assignments survive a re-enable.
pub async fn set_pack_enabled(state: &AppState, name: &str, enabled: bool) -> Result<PackRecord> {
    let pack = state
        .store
        .get_pack(name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Feature pack \"{name}\" not found")))?;

    if enabled {
        let installed: HashMap<String, bool> = state
            .store
            .list_packs()
            .await?
            .into_iter()
            .map(|p| (p.name, p.enabled))
            .collect();
        check_dependencies(&pack.manifest(), &installed).map_err(PackError::from)?;
    }

    if !state.store.set_pack_enabled(name, enabled).await? {
        return Err(AppError::NotFound(format!("Feature pack \"{name}\" not found")));
    }

    if enabled {
        for label in register_pack_types(state, name).await? {
            state.acl.create_permissions_for_type(&label);
        }
    } else {
        let removed = state.registry.unregister_pack(name);
        tracing::debug!(pack = name, types = ?removed, "Unregistered pack types");
    }
    rebuild_catalog(state).await?;
    tracing::info!(pack = name, enabled, "Feature pack toggled");

    state
        .store
        .get_pack(name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Feature pack \"{name}\" not found")))
}

/// Register the stored type definitions of one pack. Returns their labels.
async fn register_pack_types(state: &AppState, pack: &str) -> Result<Vec<String>> {
    let mut labels = Vec::new();
    for record in state.store.type_definitions_for_pack(pack).await? {
        let label = Label::parse(&record.label)?;
        state.store.ensure_label_schema(&label).await?;
        state
            .registry
            .register(label.as_str(), record.metadata, Some(pack));
        labels.push(record.label);
    }
    Ok(labels)
}

/// Recompute detail-page tabs from the enabled packs. Returns the tab count.
async fn rebuild_catalog(state: &AppState) -> Result<usize> {
    let mut catalog = PackCatalog::new();
    for pack in state.store.list_packs().await? {
        if pack.enabled {
            catalog.add_pack(&pack.name, &pack.manifest());
        }
    }
    let count = catalog.len();
    state.replace_catalog(catalog);
    Ok(count)
}
