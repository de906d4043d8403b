//! The storage seam between the service layer and the graph.
//!
//! [`NodeStore`] is implemented by [`GraphClient`](crate::GraphClient) for
//! Neo4j and by [`MemoryStore`](crate::memory::MemoryStore) for tests and
//! the `memory` backend. Labels and relationship types arrive pre-validated
//! as [`Label`]/[`RelType`], so implementations may splice them into queries.

use std::sync::Arc;

use async_trait::async_trait;

use cmdb_audit::{AuditEntry, AuditError, AuditHook, AuditQuery};
use cmdb_core::packs::{PackRecord, TypeDefinitionRecord};
use cmdb_core::types::{
    Label, NodeId, NodeRecord, NodeRelationships, Page, Properties, RelType, RelationshipSpec,
};

use crate::client::GraphError;

#[async_trait]
pub trait NodeStore: Send + Sync {
    // ── Nodes ────────────────────────────────────────────────────

    /// Create a node with a fresh id.
    async fn create_node(&self, label: &Label, properties: &Properties) -> Result<NodeRecord, GraphError>;

    async fn get_node(&self, label: &Label, id: &NodeId) -> Result<Option<NodeRecord>, GraphError>;

    /// One page of nodes, oldest first.
    async fn list_nodes(&self, label: &Label, page: Page) -> Result<Vec<NodeRecord>, GraphError>;

    async fn count_nodes(&self, label: &Label) -> Result<u64, GraphError>;

    /// Replace a node's properties. `None` if the node does not exist.
    async fn update_node(
        &self,
        label: &Label,
        id: &NodeId,
        properties: &Properties,
    ) -> Result<Option<NodeRecord>, GraphError>;

    /// Delete a node and every relationship touching it.
    async fn delete_node(&self, label: &Label, id: &NodeId) -> Result<bool, GraphError>;

    /// Label of the CMDB node with this id, whatever its type.
    async fn node_label(&self, id: &NodeId) -> Result<Option<String>, GraphError>;

    // ── Relationships ────────────────────────────────────────────

    /// Create (or refresh) a relationship. False if either end is missing.
    async fn connect(&self, spec: &RelationshipSpec) -> Result<bool, GraphError>;

    /// Remove a relationship. False if there was nothing to remove.
    async fn disconnect(
        &self,
        source_label: &Label,
        source_id: &NodeId,
        rel_type: &RelType,
        target_label: &Label,
        target_id: &NodeId,
    ) -> Result<bool, GraphError>;

    async fn relationships(&self, label: &Label, id: &NodeId) -> Result<NodeRelationships, GraphError>;

    // ── Audit Log ────────────────────────────────────────────────

    /// Append a sealed entry. There is no update or delete.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), GraphError>;

    /// Matching entries, newest first.
    async fn list_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, GraphError>;

    // ── Feature Pack Catalog ─────────────────────────────────────

    async fn upsert_pack(&self, pack: &PackRecord) -> Result<(), GraphError>;

    async fn get_pack(&self, name: &str) -> Result<Option<PackRecord>, GraphError>;

    async fn list_packs(&self) -> Result<Vec<PackRecord>, GraphError>;

    /// Flip a pack and all of its type definitions. False if unknown.
    async fn set_pack_enabled(&self, name: &str, enabled: bool) -> Result<bool, GraphError>;

    async fn upsert_type_definition(&self, record: &TypeDefinitionRecord) -> Result<(), GraphError>;

    async fn type_definitions_for_pack(&self, name: &str) -> Result<Vec<TypeDefinitionRecord>, GraphError>;

    // ── Schema ───────────────────────────────────────────────────

    async fn ensure_schema(&self) -> Result<(), GraphError> {
        Ok(())
    }

    async fn ensure_label_schema(&self, _label: &Label) -> Result<(), GraphError> {
        Ok(())
    }
}

/// Log every entry whose content hash no longer matches.
pub(crate) fn warn_on_tampered(entries: &[AuditEntry]) {
    for entry in entries.iter().filter(|e| !e.verify_integrity()) {
        tracing::warn!(
            audit_id = %entry.id,
            node_id = %entry.node_id,
            "Audit entry failed integrity check"
        );
    }
}

/// Audit hook that persists entries through a [`NodeStore`].
pub struct StoreAuditHook {
    store: Arc<dyn NodeStore>,
}

impl StoreAuditHook {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditHook for StoreAuditHook {
    fn name(&self) -> &str {
        "store"
    }

    async fn on_audit(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.store
            .append_audit(entry)
            .await
            .map_err(|e| AuditError::Hook {
                hook: self.name().to_string(),
                message: e.to_string(),
            })
    }
}
