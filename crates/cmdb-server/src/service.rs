//! The single mutation path shared by the JSON API and the HTML views.
//!
//! Every label is checked against the [`TypeRegistry`] before it reaches the
//! store, and every successful mutation emits exactly one audit entry through
//! the registered [`AuditHooks`].

use std::sync::Arc;

use cmdb_audit::{builder, AuditEntry, AuditHooks, AuditQuery};
use cmdb_core::registry::TypeRegistry;
use cmdb_core::types::{
    Label, NodeId, NodeRecord, NodeRelationships, Page, Properties, RelType, RelationshipSpec,
    TypeDefinition,
};
use cmdb_core::CmdbError;
use cmdb_graph::NodeStore;

use crate::error::{AppError, Result};

/// Upper bound on the nodes offered in a relationship target picker.
pub const TARGET_OPTION_LIMIT: u32 = 500;

/// Entries shown in a node's audit tab.
pub const NODE_AUDIT_LIMIT: usize = 100;

/// A resolved relationship request, as submitted by a form or API body.
#[derive(Debug, Clone, Default)]
pub struct ConnectRequest {
    pub rel_type: String,
    pub target_label: String,
    pub target_id: String,
    pub properties: Properties,
}

pub struct NodeService {
    registry: Arc<TypeRegistry>,
    store: Arc<dyn NodeStore>,
    hooks: Arc<AuditHooks>,
}

impl NodeService {
    pub fn new(registry: Arc<TypeRegistry>, store: Arc<dyn NodeStore>, hooks: Arc<AuditHooks>) -> Self {
        Self {
            registry,
            store,
            hooks,
        }
    }

    /// Registered label plus its definition, or `UnknownType`.
    pub fn resolve(&self, label: &str) -> Result<(Label, TypeDefinition)> {
        let definition = self
            .registry
            .get(label)
            .ok_or_else(|| CmdbError::UnknownType(label.to_string()))?;
        Ok((Label::parse(label)?, definition))
    }

    // ── Reads ────────────────────────────────────────────────────

    pub async fn list(&self, label: &str, page: Page) -> Result<(Vec<NodeRecord>, u64)> {
        let (label, _) = self.resolve(label)?;
        let nodes = self.store.list_nodes(&label, page).await?;
        let total = self.store.count_nodes(&label).await?;
        Ok((nodes, total))
    }

    pub async fn count(&self, label: &str) -> Result<u64> {
        let (label, _) = self.resolve(label)?;
        Ok(self.store.count_nodes(&label).await?)
    }

    pub async fn get(&self, label: &str, id: &str) -> Result<NodeRecord> {
        let (label, _) = self.resolve(label)?;
        self.fetch(&label, &NodeId::from(id)).await
    }

    pub async fn relationships(&self, label: &str, id: &str) -> Result<NodeRelationships> {
        let (label, _) = self.resolve(label)?;
        let id = NodeId::from(id);
        self.fetch(&label, &id).await?;
        Ok(self.store.relationships(&label, &id).await?)
    }

    /// `(id, display name)` pairs for a target picker, sorted by name.
    pub async fn target_options(&self, label: &str) -> Result<Vec<(NodeId, String)>> {
        let (label, _) = self.resolve(label)?;
        let nodes = self
            .store
            .list_nodes(&label, Page::new(TARGET_OPTION_LIMIT, 0))
            .await?;
        let mut options: Vec<(NodeId, String)> = nodes
            .into_iter()
            .map(|n| {
                let name = n.display_name();
                (n.id, name)
            })
            .collect();
        options.sort_by(|a, b| a.1.to_lowercase().cmp(&b.1.to_lowercase()));
        Ok(options)
    }

    pub async fn audit_for_node(&self, label: &str, id: &str) -> Result<Vec<AuditEntry>> {
        let query = AuditQuery::for_node(label, id).with_limit(NODE_AUDIT_LIMIT);
        Ok(self.store.list_audit(&query).await?)
    }

    pub async fn audit_log(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
        Ok(self.store.list_audit(query).await?)
    }

    // ── Mutations ────────────────────────────────────────────────

    pub async fn create(&self, label: &str, properties: Properties, actor: Option<&str>) -> Result<NodeRecord> {
        let (label, definition) = self.resolve(label)?;
        let missing = definition.missing_required(&properties);
        if !missing.is_empty() {
            return Err(CmdbError::MissingRequired(missing).into());
        }
        definition.validate_choices(&properties)?;

        let node = self.store.create_node(&label, &properties).await?;
        tracing::info!(label = %label, id = %node.id, user = actor.unwrap_or_default(), "Node created");

        self.audit(builder::create(label.as_str(), node.id.as_str(), &node.properties, actor))
            .await;
        Ok(node)
    }

    /// Merge `patch` into the node's properties. Keys absent from the patch
    /// keep their current value.
    pub async fn update(&self, label: &str, id: &str, patch: Properties, actor: Option<&str>) -> Result<NodeRecord> {
        let (label, definition) = self.resolve(label)?;
        let id = NodeId::from(id);
        let current = self.fetch(&label, &id).await?;
        definition.validate_choices(&patch)?;

        let mut merged = current.properties.clone();
        merged.extend(patch);

        let node = self
            .store
            .update_node(&label, &id, &merged)
            .await?
            .ok_or_else(|| not_found(&label, &id))?;
        tracing::info!(label = %label, id = %id, user = actor.unwrap_or_default(), "Node updated");

        self.audit(builder::update(
            label.as_str(),
            id.as_str(),
            &current.properties,
            &node.properties,
            actor,
        ))
        .await;
        Ok(node)
    }

    pub async fn delete(&self, label: &str, id: &str, actor: Option<&str>) -> Result<NodeRecord> {
        let (label, _) = self.resolve(label)?;
        let id = NodeId::from(id);
        let node = self.fetch(&label, &id).await?;

        if !self.store.delete_node(&label, &id).await? {
            return Err(not_found(&label, &id));
        }
        tracing::info!(label = %label, id = %id, user = actor.unwrap_or_default(), "Node deleted");

        self.audit(builder::delete(label.as_str(), id.as_str(), &node.properties, actor))
            .await;
        Ok(node)
    }

    pub async fn connect(&self, label: &str, id: &str, request: ConnectRequest, actor: Option<&str>) -> Result<()> {
        if request.rel_type.is_empty() || request.target_label.is_empty() || request.target_id.is_empty() {
            return Err(AppError::BadRequest(
                "relationship_type, target_label and target_id are required".to_string(),
            ));
        }
        let (label, _) = self.resolve(label)?;
        let (target_label, _) = self.resolve(&request.target_label)?;
        let rel_type = RelType::parse(&request.rel_type)?;
        let id = NodeId::from(id);
        let target_id = NodeId::from(request.target_id.as_str());

        let source = self.fetch(&label, &id).await?;
        if self.store.get_node(&target_label, &target_id).await?.is_none() {
            return Err(AppError::NotFound("Target node not found".to_string()));
        }

        let spec = RelationshipSpec {
            source_label: label.clone(),
            source_id: id.clone(),
            rel_type: rel_type.clone(),
            target_label: target_label.clone(),
            target_id: target_id.clone(),
            properties: request.properties,
        };
        if !self.store.connect(&spec).await? {
            return Err(AppError::NotFound("Target node not found".to_string()));
        }
        tracing::info!(
            label = %label,
            id = %id,
            rel_type = %rel_type,
            target_label = %target_label,
            target_id = %target_id,
            "Relationship created"
        );

        self.audit(builder::connect(
            label.as_str(),
            id.as_str(),
            source.name().map(str::to_string),
            rel_type.as_str(),
            target_label.as_str(),
            target_id.as_str(),
            actor,
        ))
        .await;
        Ok(())
    }

    /// Remove one relationship. The target's label is looked up when the
    /// caller does not know it.
    pub async fn disconnect(
        &self,
        label: &str,
        id: &str,
        rel_type: &str,
        target_label: Option<&str>,
        target_id: &str,
        actor: Option<&str>,
    ) -> Result<()> {
        let (label, _) = self.resolve(label)?;
        let rel_type = RelType::parse(rel_type)?;
        let id = NodeId::from(id);
        let target_id = NodeId::from(target_id);
        let source = self.fetch(&label, &id).await?;

        let target_label = match target_label.filter(|l| !l.is_empty()) {
            Some(l) => l.to_string(),
            None => self
                .store
                .node_label(&target_id)
                .await?
                .ok_or_else(relationship_not_found)?,
        };
        let target_label = Label::parse(&target_label)?;

        let removed = self
            .store
            .disconnect(&label, &id, &rel_type, &target_label, &target_id)
            .await?;
        if !removed {
            return Err(relationship_not_found());
        }
        tracing::info!(
            label = %label,
            id = %id,
            rel_type = %rel_type,
            target_id = %target_id,
            "Relationship removed"
        );

        self.audit(builder::disconnect(
            label.as_str(),
            id.as_str(),
            source.name().map(str::to_string),
            rel_type.as_str(),
            target_label.as_str(),
            target_id.as_str(),
            actor,
        ))
        .await;
        Ok(())
    }

    // ── Helpers ──────────────────────────────────────────────────

    async fn fetch(&self, label: &Label, id: &NodeId) -> Result<NodeRecord> {
        self.store
            .get_node(label, id)
            .await?
            .ok_or_else(|| not_found(label, id))
    }

    async fn audit(&self, entry: AuditEntry) {
        self.hooks.emit(&entry).await;
    }
}

fn not_found(label: &Label, id: &NodeId) -> AppError {
    CmdbError::NotFound {
        label: label.to_string(),
        id: id.to_string(),
    }
    .into()
}

fn relationship_not_found() -> AppError {
    AppError::NotFound("Relationship not found".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdb_audit::{AuditAction, AuditHook};
    use cmdb_core::types::PropertyDef;
    use cmdb_graph::{MemoryStore, StoreAuditHook};
    use serde_json::json;

    fn rack_type() -> TypeDefinition {
        TypeDefinition {
            display_name: "Rack".into(),
            properties: vec![
                PropertyDef::Name("name".into()),
                PropertyDef::WithChoices {
                    name: "status".into(),
                    choices: vec!["active".into(), "retired".into()],
                },
            ],
            required: vec!["name".into()],
            ..Default::default()
        }
    }

    fn service() -> (NodeService, Arc<MemoryStore>) {
        let registry = Arc::new(TypeRegistry::new());
        registry.register("Rack", rack_type(), None);
        registry.register("Room", TypeDefinition::fallback("Room"), None);
        let store = Arc::new(MemoryStore::new());
        let hooks = Arc::new(AuditHooks::new());
        let hook: Arc<dyn AuditHook> = Arc::new(StoreAuditHook::new(store.clone()));
        hooks.register(hook);
        (NodeService::new(registry, store.clone(), hooks), store)
    }

    fn props(value: serde_json::Value) -> Properties {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_create_requires_registered_label() {
        let (svc, _) = service();
        let err = svc.create("Widget", Properties::new(), None).await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown node type: Widget");
    }

    #[tokio::test]
    async fn test_create_checks_required_and_choices() {
        let (svc, _) = service();
        let err = svc.create("Rack", props(json!({"status": "active"})), None).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing required property: name");

        let err = svc
            .create("Rack", props(json!({"name": "r1", "status": "lost"})), None)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value 'lost' for status; expected one of: active, retired"
        );
    }

    #[tokio::test]
    async fn test_each_mutation_writes_one_audit_entry() {
        let (svc, store) = service();
        let rack = svc.create("Rack", props(json!({"name": "r1"})), Some("alice")).await.unwrap();
        let room = svc.create("Room", props(json!({"name": "hall"})), None).await.unwrap();

        svc.update("Rack", rack.id.as_str(), props(json!({"units": 42})), Some("alice"))
            .await
            .unwrap();
        svc.connect(
            "Rack",
            rack.id.as_str(),
            ConnectRequest {
                rel_type: "LOCATED_IN".into(),
                target_label: "Room".into(),
                target_id: room.id.to_string(),
                properties: Properties::new(),
            },
            Some("alice"),
        )
        .await
        .unwrap();
        svc.disconnect("Rack", rack.id.as_str(), "LOCATED_IN", None, room.id.as_str(), Some("alice"))
            .await
            .unwrap();
        svc.delete("Rack", rack.id.as_str(), Some("alice")).await.unwrap();

        let entries = store
            .list_audit(&AuditQuery::for_node("Rack", rack.id.as_str()))
            .await
            .unwrap();
        assert_eq!(entries.len(), 5);
        for action in [
            AuditAction::Create,
            AuditAction::Update,
            AuditAction::Connect,
            AuditAction::Disconnect,
            AuditAction::Delete,
        ] {
            assert_eq!(entries.iter().filter(|e| e.action == action).count(), 1);
        }
        assert!(entries.iter().all(|e| e.user == "alice" && e.verify_integrity()));
    }

    #[tokio::test]
    async fn test_update_merges_properties() {
        let (svc, _) = service();
        let rack = svc
            .create("Rack", props(json!({"name": "r1", "status": "active"})), None)
            .await
            .unwrap();
        let updated = svc
            .update("Rack", rack.id.as_str(), props(json!({"units": 42})), None)
            .await
            .unwrap();
        assert_eq!(updated.properties["name"], json!("r1"));
        assert_eq!(updated.properties["status"], json!("active"));
        assert_eq!(updated.properties["units"], json!(42));
    }

    #[tokio::test]
    async fn test_missing_node_and_relationship_are_not_found() {
        let (svc, _) = service();
        let err = svc.get("Rack", "nope").await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);

        let rack = svc.create("Rack", props(json!({"name": "r1"})), None).await.unwrap();
        let err = svc
            .disconnect("Rack", rack.id.as_str(), "LOCATED_IN", Some("Room"), "nope", None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Relationship not found");
    }

    #[tokio::test]
    async fn test_target_options_sorted_by_name() {
        let (svc, _) = service();
        svc.create("Room", props(json!({"name": "zeta"})), None).await.unwrap();
        svc.create("Room", props(json!({"name": "Alpha"})), None).await.unwrap();
        let options = svc.target_options("Room").await.unwrap();
        let names: Vec<&str> = options.iter().map(|(_, n)| n.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "zeta"]);
    }
}
