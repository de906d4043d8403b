//! [`NodeStore`] backed by Neo4j. Each method delegates to the inherent
//! query or mutation on [`GraphClient`].

use async_trait::async_trait;

use cmdb_audit::{AuditEntry, AuditQuery};
use cmdb_core::packs::{PackRecord, TypeDefinitionRecord};
use cmdb_core::types::{
    Label, NodeId, NodeRecord, NodeRelationships, Page, Properties, RelType, RelationshipSpec,
};

use crate::client::{GraphClient, GraphError};
use crate::store::NodeStore;

#[async_trait]
impl NodeStore for GraphClient {
    async fn create_node(&self, label: &Label, properties: &Properties) -> Result<NodeRecord, GraphError> {
        GraphClient::create_node(self, label, properties).await
    }

    async fn get_node(&self, label: &Label, id: &NodeId) -> Result<Option<NodeRecord>, GraphError> {
        GraphClient::get_node(self, label, id).await
    }

    async fn list_nodes(&self, label: &Label, page: Page) -> Result<Vec<NodeRecord>, GraphError> {
        GraphClient::list_nodes(self, label, page).await
    }

    async fn count_nodes(&self, label: &Label) -> Result<u64, GraphError> {
        GraphClient::count_nodes(self, label).await
    }

    async fn update_node(
        &self,
        label: &Label,
        id: &NodeId,
        properties: &Properties,
    ) -> Result<Option<NodeRecord>, GraphError> {
        GraphClient::update_node(self, label, id, properties).await
    }

    async fn delete_node(&self, label: &Label, id: &NodeId) -> Result<bool, GraphError> {
        GraphClient::delete_node(self, label, id).await
    }

    async fn node_label(&self, id: &NodeId) -> Result<Option<String>, GraphError> {
        GraphClient::node_label(self, id).await
    }

    async fn connect(&self, spec: &RelationshipSpec) -> Result<bool, GraphError> {
        GraphClient::connect_nodes(self, spec).await
    }

    async fn disconnect(
        &self,
        source_label: &Label,
        source_id: &NodeId,
        rel_type: &RelType,
        target_label: &Label,
        target_id: &NodeId,
    ) -> Result<bool, GraphError> {
        GraphClient::disconnect(self, source_label, source_id, rel_type, target_label, target_id).await
    }

    async fn relationships(&self, label: &Label, id: &NodeId) -> Result<NodeRelationships, GraphError> {
        GraphClient::relationships(self, label, id).await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), GraphError> {
        GraphClient::append_audit(self, entry).await
    }

    async fn list_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, GraphError> {
        GraphClient::list_audit(self, query).await
    }

    async fn upsert_pack(&self, pack: &PackRecord) -> Result<(), GraphError> {
        GraphClient::upsert_pack(self, pack).await
    }

    async fn get_pack(&self, name: &str) -> Result<Option<PackRecord>, GraphError> {
        GraphClient::get_pack(self, name).await
    }

    async fn list_packs(&self) -> Result<Vec<PackRecord>, GraphError> {
        GraphClient::list_packs(self).await
    }

    async fn set_pack_enabled(&self, name: &str, enabled: bool) -> Result<bool, GraphError> {
        GraphClient::set_pack_enabled(self, name, enabled).await
    }

    async fn upsert_type_definition(&self, record: &TypeDefinitionRecord) -> Result<(), GraphError> {
        GraphClient::upsert_type_definition(self, record).await
    }

    async fn type_definitions_for_pack(&self, name: &str) -> Result<Vec<TypeDefinitionRecord>, GraphError> {
        GraphClient::type_definitions_for_pack(self, name).await
    }

    async fn ensure_schema(&self) -> Result<(), GraphError> {
        GraphClient::ensure_schema(self).await
    }

    async fn ensure_label_schema(&self, label: &Label) -> Result<(), GraphError> {
        GraphClient::ensure_label_schema(self, label).await
    }
}
