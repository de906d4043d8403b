//! In-memory [`NodeStore`] for tests and the `memory` storage backend.
//!
//! All state lives in `tokio::sync::RwLock` collections. Semantics follow
//! the Neo4j implementation: nodes ordered by creation, relationships
//! merged on (source, type, target), audit entries append-only.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use cmdb_audit::{AuditEntry, AuditQuery};
use cmdb_core::packs::{PackRecord, TypeDefinitionRecord};
use cmdb_core::types::{
    Label, NodeId, NodeRecord, NodeRelationships, Page, Properties, RelType, RelatedNode,
    RelationshipSpec,
};

use crate::client::GraphError;
use crate::store::{warn_on_tampered, NodeStore};

#[derive(Debug, Clone)]
struct StoredRel {
    source: NodeId,
    rel_type: String,
    target: NodeId,
    #[allow(dead_code)]
    properties: Properties,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    nodes: RwLock<HashMap<NodeId, NodeRecord>>,
    rels: RwLock<Vec<StoredRel>>,
    audit: RwLock<Vec<AuditEntry>>,
    packs: RwLock<BTreeMap<String, PackRecord>>,
    type_defs: RwLock<BTreeMap<String, TypeDefinitionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn related(node: &NodeRecord) -> RelatedNode {
        RelatedNode {
            id: node.id.clone(),
            label: node.label.clone(),
            name: node.name().map(str::to_string),
        }
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn create_node(&self, label: &Label, properties: &Properties) -> Result<NodeRecord, GraphError> {
        let now = Utc::now();
        let node = NodeRecord {
            id: NodeId::new(),
            label: label.to_string(),
            properties: properties.clone(),
            created_at: Some(now),
            updated_at: Some(now),
        };
        self.nodes.write().await.insert(node.id.clone(), node.clone());
        Ok(node)
    }

    async fn get_node(&self, label: &Label, id: &NodeId) -> Result<Option<NodeRecord>, GraphError> {
        let nodes = self.nodes.read().await;
        Ok(nodes
            .get(id)
            .filter(|n| n.label == label.as_str())
            .cloned())
    }

    async fn list_nodes(&self, label: &Label, page: Page) -> Result<Vec<NodeRecord>, GraphError> {
        let nodes = self.nodes.read().await;
        let mut matching: Vec<&NodeRecord> =
            nodes.values().filter(|n| n.label == label.as_str()).collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn count_nodes(&self, label: &Label) -> Result<u64, GraphError> {
        let nodes = self.nodes.read().await;
        Ok(nodes.values().filter(|n| n.label == label.as_str()).count() as u64)
    }

    async fn update_node(
        &self,
        label: &Label,
        id: &NodeId,
        properties: &Properties,
    ) -> Result<Option<NodeRecord>, GraphError> {
        let mut nodes = self.nodes.write().await;
        let Some(node) = nodes.get_mut(id).filter(|n| n.label == label.as_str()) else {
            return Ok(None);
        };
        node.properties = properties.clone();
        node.updated_at = Some(Utc::now());
        Ok(Some(node.clone()))
    }

    async fn delete_node(&self, label: &Label, id: &NodeId) -> Result<bool, GraphError> {
        let mut nodes = self.nodes.write().await;
        if !nodes.get(id).is_some_and(|n| n.label == label.as_str()) {
            return Ok(false);
        }
        nodes.remove(id);
        self.rels
            .write()
            .await
            .retain(|r| &r.source != id && &r.target != id);
        Ok(true)
    }

    async fn node_label(&self, id: &NodeId) -> Result<Option<String>, GraphError> {
        Ok(self.nodes.read().await.get(id).map(|n| n.label.clone()))
    }

    async fn connect(&self, spec: &RelationshipSpec) -> Result<bool, GraphError> {
        {
            let nodes = self.nodes.read().await;
            let source_ok = nodes
                .get(&spec.source_id)
                .is_some_and(|n| n.label == spec.source_label.as_str());
            let target_ok = nodes
                .get(&spec.target_id)
                .is_some_and(|n| n.label == spec.target_label.as_str());
            if !source_ok || !target_ok {
                return Ok(false);
            }
        }

        let mut rels = self.rels.write().await;
        match rels.iter_mut().find(|r| {
            r.source == spec.source_id
                && r.target == spec.target_id
                && r.rel_type == spec.rel_type.as_str()
        }) {
            Some(existing) => existing.properties = spec.properties.clone(),
            None => rels.push(StoredRel {
                source: spec.source_id.clone(),
                rel_type: spec.rel_type.to_string(),
                target: spec.target_id.clone(),
                properties: spec.properties.clone(),
            }),
        }
        Ok(true)
    }

    async fn disconnect(
        &self,
        source_label: &Label,
        source_id: &NodeId,
        rel_type: &RelType,
        target_label: &Label,
        target_id: &NodeId,
    ) -> Result<bool, GraphError> {
        let labels_match = {
            let nodes = self.nodes.read().await;
            nodes
                .get(source_id)
                .is_some_and(|n| n.label == source_label.as_str())
                && nodes
                    .get(target_id)
                    .is_some_and(|n| n.label == target_label.as_str())
        };
        if !labels_match {
            return Ok(false);
        }

        let mut rels = self.rels.write().await;
        let before = rels.len();
        rels.retain(|r| {
            !(&r.source == source_id && &r.target == target_id && r.rel_type == rel_type.as_str())
        });
        Ok(rels.len() < before)
    }

    async fn relationships(&self, label: &Label, id: &NodeId) -> Result<NodeRelationships, GraphError> {
        let nodes = self.nodes.read().await;
        let mut result = NodeRelationships::default();
        if !nodes.get(id).is_some_and(|n| n.label == label.as_str()) {
            return Ok(result);
        }

        let rels = self.rels.read().await;
        for rel in rels.iter() {
            if &rel.source == id {
                if let Some(other) = nodes.get(&rel.target) {
                    result
                        .outgoing
                        .entry(rel.rel_type.clone())
                        .or_default()
                        .push(Self::related(other));
                }
            }
            if &rel.target == id {
                if let Some(other) = nodes.get(&rel.source) {
                    result
                        .incoming
                        .entry(rel.rel_type.clone())
                        .or_default()
                        .push(Self::related(other));
                }
            }
        }
        for group in result.outgoing.values_mut().chain(result.incoming.values_mut()) {
            group.sort_by(|a, b| a.id.cmp(&b.id));
        }
        Ok(result)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), GraphError> {
        self.audit.write().await.push(entry.clone());
        Ok(())
    }

    async fn list_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, GraphError> {
        let audit = self.audit.read().await;
        let entries = query.apply(audit.iter());
        warn_on_tampered(&entries);
        Ok(entries)
    }

    async fn upsert_pack(&self, pack: &PackRecord) -> Result<(), GraphError> {
        self.packs.write().await.insert(pack.name.clone(), pack.clone());
        Ok(())
    }

    async fn get_pack(&self, name: &str) -> Result<Option<PackRecord>, GraphError> {
        Ok(self.packs.read().await.get(name).cloned())
    }

    async fn list_packs(&self) -> Result<Vec<PackRecord>, GraphError> {
        Ok(self.packs.read().await.values().cloned().collect())
    }

    async fn set_pack_enabled(&self, name: &str, enabled: bool) -> Result<bool, GraphError> {
        let mut packs = self.packs.write().await;
        let Some(pack) = packs.get_mut(name) else {
            return Ok(false);
        };
        pack.enabled = enabled;
        let mut defs = self.type_defs.write().await;
        for def in defs.values_mut().filter(|d| d.feature_pack_name == name) {
            def.enabled = enabled;
        }
        Ok(true)
    }

    async fn upsert_type_definition(&self, record: &TypeDefinitionRecord) -> Result<(), GraphError> {
        self.type_defs
            .write()
            .await
            .insert(record.label.clone(), record.clone());
        Ok(())
    }

    async fn type_definitions_for_pack(&self, name: &str) -> Result<Vec<TypeDefinitionRecord>, GraphError> {
        let defs = self.type_defs.read().await;
        Ok(defs
            .values()
            .filter(|d| d.feature_pack_name == name)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdb_audit::builder;
    use serde_json::json;

    fn label(s: &str) -> Label {
        Label::parse(s).unwrap()
    }

    fn props(name: &str) -> Properties {
        let mut p = Properties::new();
        p.insert("name".into(), json!(name));
        p
    }

    #[tokio::test]
    async fn node_crud() {
        let store = MemoryStore::new();
        let rack = label("Rack");

        let created = store.create_node(&rack, &props("rack-a1")).await.unwrap();
        assert_eq!(store.count_nodes(&rack).await.unwrap(), 1);

        let fetched = store.get_node(&rack, &created.id).await.unwrap().unwrap();
        assert_eq!(fetched.name(), Some("rack-a1"));
        assert!(store.get_node(&label("Room"), &created.id).await.unwrap().is_none());

        let updated = store
            .update_node(&rack, &created.id, &props("rack-b2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name(), Some("rack-b2"));

        assert_eq!(store.node_label(&created.id).await.unwrap().as_deref(), Some("Rack"));
        assert!(store.delete_node(&rack, &created.id).await.unwrap());
        assert!(!store.delete_node(&rack, &created.id).await.unwrap());
        assert_eq!(store.count_nodes(&rack).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn list_pages_in_creation_order() {
        let store = MemoryStore::new();
        let rack = label("Rack");
        for i in 0..5 {
            store.create_node(&rack, &props(&format!("r{i}"))).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let page = store.list_nodes(&rack, Page::new(2, 1)).await.unwrap();
        let names: Vec<&str> = page.iter().filter_map(|n| n.name()).collect();
        assert_eq!(names, vec!["r1", "r2"]);
    }

    #[tokio::test]
    async fn relationships_and_detach_delete() {
        let store = MemoryStore::new();
        let (rack, room) = (label("Rack"), label("Room"));
        let a = store.create_node(&rack, &props("rack-a1")).await.unwrap();
        let b = store.create_node(&room, &props("room-1")).await.unwrap();
        let rel = RelType::parse("LOCATED_IN").unwrap();

        let spec = RelationshipSpec {
            source_label: rack.clone(),
            source_id: a.id.clone(),
            rel_type: rel.clone(),
            target_label: room.clone(),
            target_id: b.id.clone(),
            properties: Properties::new(),
        };
        assert!(store.connect(&spec).await.unwrap());
        assert!(store.connect(&spec).await.unwrap());

        let out = store.relationships(&rack, &a.id).await.unwrap();
        assert_eq!(out.outgoing["LOCATED_IN"].len(), 1);
        assert_eq!(out.outgoing["LOCATED_IN"][0].name.as_deref(), Some("room-1"));
        let inc = store.relationships(&room, &b.id).await.unwrap();
        assert_eq!(inc.incoming["LOCATED_IN"][0].label, "Rack");

        assert!(store.disconnect(&rack, &a.id, &rel, &room, &b.id).await.unwrap());
        assert!(!store.disconnect(&rack, &a.id, &rel, &room, &b.id).await.unwrap());

        store.connect(&spec).await.unwrap();
        store.delete_node(&room, &b.id).await.unwrap();
        assert!(store.relationships(&rack, &a.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn connect_requires_both_ends() {
        let store = MemoryStore::new();
        let rack = label("Rack");
        let a = store.create_node(&rack, &props("rack-a1")).await.unwrap();
        let spec = RelationshipSpec {
            source_label: rack.clone(),
            source_id: a.id.clone(),
            rel_type: RelType::parse("LOCATED_IN").unwrap(),
            target_label: label("Room"),
            target_id: NodeId::from("missing"),
            properties: Properties::new(),
        };
        assert!(!store.connect(&spec).await.unwrap());
    }

    #[tokio::test]
    async fn audit_is_append_only_and_queryable() {
        let store = MemoryStore::new();
        let entry = builder::create("Rack", "r-1", &props("rack-a1"), Some("alice"));
        store.append_audit(&entry).await.unwrap();
        store
            .append_audit(&builder::delete("Rack", "r-2", &Properties::new(), None))
            .await
            .unwrap();

        let found = store.list_audit(&AuditQuery::for_node("Rack", "r-1")).await.unwrap();
        assert_eq!(found, vec![entry]);
        assert_eq!(store.list_audit(&AuditQuery::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn pack_enable_flips_type_definitions() {
        let store = MemoryStore::new();
        let pack = PackRecord {
            name: "dns_pack".into(),
            display_name: "DNS Pack".into(),
            enabled: true,
            path: "/packs/dns_pack".into(),
            last_modified: None,
            last_synced: Some(Utc::now()),
            config: json!({}),
            types: vec!["DNS_Zone".into()],
        };
        store.upsert_pack(&pack).await.unwrap();
        store
            .upsert_type_definition(&TypeDefinitionRecord {
                label: "DNS_Zone".into(),
                feature_pack_name: "dns_pack".into(),
                metadata: Default::default(),
                enabled: true,
            })
            .await
            .unwrap();

        assert!(store.set_pack_enabled("dns_pack", false).await.unwrap());
        assert!(!store.get_pack("dns_pack").await.unwrap().unwrap().enabled);
        let defs = store.type_definitions_for_pack("dns_pack").await.unwrap();
        assert!(defs.iter().all(|d| !d.enabled));
        assert!(!store.set_pack_enabled("nope", true).await.unwrap());
    }
}
