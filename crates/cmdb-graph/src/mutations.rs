//! Write operations for the CMDB graph.
//!
//! CMDB nodes are stored as `(n:Label {id, custom_properties, created_at,
//! updated_at})` with the user-defined properties serialized into the single
//! `custom_properties` JSON string. Labels and relationship types are
//! validated identifiers and are spliced into the Cypher in backticks.

use chrono::{DateTime, SecondsFormat, Utc};
use neo4rs::query;

use cmdb_audit::AuditEntry;
use cmdb_core::packs::{PackRecord, TypeDefinitionRecord};
use cmdb_core::types::{Label, NodeId, NodeRecord, Properties, RelType, RelationshipSpec};

use crate::client::{GraphClient, GraphError};

impl GraphClient {
    // ── Node Writes ──────────────────────────────────────────────

    /// Create a CMDB node with a fresh UUID.
    pub async fn create_node(
        &self,
        label: &Label,
        properties: &Properties,
    ) -> Result<NodeRecord, GraphError> {
        let id = NodeId::new();
        let now = Utc::now();
        let cypher = format!(
            "CREATE (n:`{label}` {{id: $id, custom_properties: $props,
                                  created_at: $now, updated_at: $now}})"
        );

        let q = query(&cypher)
            .param("id", id.as_str())
            .param("props", serde_json::to_string(properties)?)
            .param("now", timestamp(&now));
        self.run(q).await?;

        tracing::debug!(label = %label, id = %id, "Created node");
        Ok(NodeRecord {
            id,
            label: label.to_string(),
            properties: properties.clone(),
            created_at: Some(now),
            updated_at: Some(now),
        })
    }

    /// Overwrite a node's `custom_properties`.
    pub async fn update_node(
        &self,
        label: &Label,
        id: &NodeId,
        properties: &Properties,
    ) -> Result<Option<NodeRecord>, GraphError> {
        let now = Utc::now();
        let cypher = format!(
            "MATCH (n:`{label}` {{id: $id}})
             SET n.custom_properties = $props, n.updated_at = $now
             RETURN n.created_at AS created_at"
        );

        let q = query(&cypher)
            .param("id", id.as_str())
            .param("props", serde_json::to_string(properties)?)
            .param("now", timestamp(&now));

        let Some(row) = self.query_one(q).await? else {
            return Ok(None);
        };
        let created_at = row.get::<String>("created_at").ok().and_then(|s| parse_timestamp(&s));
        Ok(Some(NodeRecord {
            id: id.clone(),
            label: label.to_string(),
            properties: properties.clone(),
            created_at,
            updated_at: Some(now),
        }))
    }

    /// DETACH DELETE a node. Returns whether anything was deleted.
    pub async fn delete_node(&self, label: &Label, id: &NodeId) -> Result<bool, GraphError> {
        let cypher = format!(
            "MATCH (n:`{label}` {{id: $id}})
             DETACH DELETE n
             RETURN count(*) AS cnt"
        );
        let q = query(&cypher).param("id", id.as_str());
        Ok(self.query_count(q).await? > 0)
    }

    // ── Relationship Writes ──────────────────────────────────────

    /// MERGE a directed relationship between two existing nodes.
    pub async fn connect_nodes(&self, spec: &RelationshipSpec) -> Result<bool, GraphError> {
        let cypher = format!(
            "MATCH (a:`{src}` {{id: $source_id}}), (b:`{dst}` {{id: $target_id}})
             MERGE (a)-[r:`{rel}`]->(b)
             SET r.properties = $props
             RETURN count(r) AS cnt",
            src = spec.source_label,
            dst = spec.target_label,
            rel = spec.rel_type,
        );

        let q = query(&cypher)
            .param("source_id", spec.source_id.as_str())
            .param("target_id", spec.target_id.as_str())
            .param("props", serde_json::to_string(&spec.properties)?);
        Ok(self.query_count(q).await? > 0)
    }

    pub async fn disconnect(
        &self,
        source_label: &Label,
        source_id: &NodeId,
        rel_type: &RelType,
        target_label: &Label,
        target_id: &NodeId,
    ) -> Result<bool, GraphError> {
        let cypher = format!(
            "MATCH (a:`{source_label}` {{id: $source_id}})-[r:`{rel_type}`]->(b:`{target_label}` {{id: $target_id}})
             DELETE r
             RETURN count(*) AS cnt"
        );

        let q = query(&cypher)
            .param("source_id", source_id.as_str())
            .param("target_id", target_id.as_str());
        Ok(self.query_count(q).await? > 0)
    }

    // ── Audit Log ────────────────────────────────────────────────

    /// CREATE an `AuditLogEntry` node. Entries are never matched for update.
    pub async fn append_audit(&self, entry: &AuditEntry) -> Result<(), GraphError> {
        let q = query(
            "CREATE (:AuditLogEntry {
               id: $id, timestamp: $timestamp, action: $action,
               node_label: $node_label, node_id: $node_id, node_name: $node_name,
               user: $user, changes: $changes,
               relationship_type: $relationship_type,
               target_label: $target_label, target_id: $target_id,
               content_hash: $content_hash
             })",
        )
        .param("id", entry.id.to_string())
        .param("timestamp", timestamp(&entry.timestamp))
        .param("action", entry.action.as_str())
        .param("node_label", entry.node_label.clone())
        .param("node_id", entry.node_id.clone())
        .param("node_name", opt_string(&entry.node_name))
        .param("user", entry.user.clone())
        .param("changes", entry.changes.clone())
        .param("relationship_type", opt_string(&entry.relationship_type))
        .param("target_label", opt_string(&entry.target_label))
        .param("target_id", opt_string(&entry.target_id))
        .param("content_hash", opt_string(&entry.content_hash));

        self.run(q).await
    }

    // ── Feature Pack Catalog ─────────────────────────────────────

    pub async fn upsert_pack(&self, pack: &PackRecord) -> Result<(), GraphError> {
        let q = query(
            "MERGE (p:FeaturePack {name: $name})
             SET p.display_name = $display_name, p.enabled = $enabled,
                 p.path = $path, p.last_modified = $last_modified,
                 p.last_synced = $last_synced, p.config = $config,
                 p.types = $types",
        )
        .param("name", pack.name.clone())
        .param("display_name", pack.display_name.clone())
        .param("enabled", pack.enabled)
        .param("path", pack.path.clone())
        .param("last_modified", opt_timestamp(&pack.last_modified))
        .param("last_synced", opt_timestamp(&pack.last_synced))
        .param("config", serde_json::to_string(&pack.config)?)
        .param("types", pack.types.clone());

        self.run(q).await
    }

    /// Flip a pack and its type definitions in one statement.
    pub async fn set_pack_enabled(&self, name: &str, enabled: bool) -> Result<bool, GraphError> {
        let q = query(
            "MATCH (p:FeaturePack {name: $name})
             SET p.enabled = $enabled
             WITH p
             OPTIONAL MATCH (t:TypeDefinition {feature_pack_name: $name})
             SET t.enabled = $enabled
             RETURN count(DISTINCT p) AS cnt",
        )
        .param("name", name)
        .param("enabled", enabled);

        Ok(self.query_count(q).await? > 0)
    }

    pub async fn upsert_type_definition(
        &self,
        record: &TypeDefinitionRecord,
    ) -> Result<(), GraphError> {
        let q = query(
            "MERGE (t:TypeDefinition {label: $label})
             SET t.feature_pack_name = $pack, t.metadata = $metadata,
                 t.enabled = $enabled
             WITH t
             OPTIONAL MATCH (p:FeaturePack {name: $pack})
             FOREACH (_ IN CASE WHEN p IS NULL THEN [] ELSE [1] END |
               MERGE (p)-[:DEFINES]->(t))",
        )
        .param("label", record.label.clone())
        .param("pack", record.feature_pack_name.clone())
        .param("metadata", serde_json::to_string(&record.metadata)?)
        .param("enabled", record.enabled);

        self.run(q).await
    }
}

// ── Helpers ──────────────────────────────────────────────────────

/// Fixed-width UTC timestamps so string order is time order.
pub(crate) fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn opt_timestamp(t: &Option<DateTime<Utc>>) -> String {
    t.as_ref().map(timestamp).unwrap_or_default()
}

pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn opt_string(opt: &Option<String>) -> String {
    opt.clone().unwrap_or_default()
}
