//! Read operations for the CMDB graph.

use neo4rs::query;

use cmdb_audit::{AuditAction, AuditEntry, AuditEntryId, AuditQuery};
use cmdb_core::packs::{PackRecord, TypeDefinitionRecord};
use cmdb_core::types::{
    Label, NodeId, NodeRecord, NodeRelationships, Page, Properties, RelatedNode,
};

use crate::client::{GraphClient, GraphError};
use crate::mutations::{parse_timestamp, timestamp};

/// Labels that belong to the catalog and audit log, never to CMDB data.
const SYSTEM_LABELS: [&str; 3] = ["AuditLogEntry", "FeaturePack", "TypeDefinition"];

const NODE_COLUMNS: &str = "n.id AS id, n.custom_properties AS props,
                            n.created_at AS created_at, n.updated_at AS updated_at";

impl GraphClient {
    // ── Node Lookups ─────────────────────────────────────────────

    pub async fn get_node(&self, label: &Label, id: &NodeId) -> Result<Option<NodeRecord>, GraphError> {
        let cypher = format!(
            "MATCH (n:`{label}` {{id: $id}})
             RETURN {NODE_COLUMNS}"
        );
        let q = query(&cypher).param("id", id.as_str());

        match self.query_one(q).await? {
            Some(row) => Ok(Some(row_to_node(&row, label)?)),
            None => Ok(None),
        }
    }

    pub async fn list_nodes(&self, label: &Label, page: Page) -> Result<Vec<NodeRecord>, GraphError> {
        let cypher = format!(
            "MATCH (n:`{label}`)
             RETURN {NODE_COLUMNS}
             ORDER BY n.created_at, n.id
             SKIP $offset LIMIT $limit"
        );
        let q = query(&cypher)
            .param("limit", page.limit as i64)
            .param("offset", page.offset as i64);

        let rows = self.query_rows(q).await?;
        rows.iter().map(|row| row_to_node(row, label)).collect()
    }

    pub async fn count_nodes(&self, label: &Label) -> Result<u64, GraphError> {
        let cypher = format!(
            "MATCH (n:`{label}`)
             RETURN count(n) AS cnt"
        );
        let cnt = self.query_count(query(&cypher)).await?;
        Ok(cnt.max(0) as u64)
    }

    /// Label of the node with this id, ignoring catalog and audit nodes.
    pub async fn node_label(&self, id: &NodeId) -> Result<Option<String>, GraphError> {
        let q = query(
            "MATCH (n {id: $id})
             WHERE NOT n:AuditLogEntry
             RETURN labels(n) AS labels
             LIMIT 1",
        )
        .param("id", id.as_str());

        let Some(row) = self.query_one(q).await? else {
            return Ok(None);
        };
        let labels: Vec<String> = row.get("labels").unwrap_or_default();
        Ok(labels.into_iter().find(|l| !SYSTEM_LABELS.contains(&l.as_str())))
    }

    // ── Relationships ────────────────────────────────────────────

    /// Outgoing and incoming relationships, grouped by type.
    pub async fn relationships(&self, label: &Label, id: &NodeId) -> Result<NodeRelationships, GraphError> {
        let mut result = NodeRelationships::default();

        for outgoing in [true, false] {
            let pattern = if outgoing {
                "-[r]->(m)"
            } else {
                "<-[r]-(m)"
            };
            let cypher = format!(
                "MATCH (n:`{label}` {{id: $id}}){pattern}
                 WHERE NOT m:AuditLogEntry AND NOT m:FeaturePack AND NOT m:TypeDefinition
                 RETURN type(r) AS rel_type, m.id AS id, labels(m) AS labels,
                        m.custom_properties AS props
                 ORDER BY rel_type, id"
            );
            let q = query(&cypher).param("id", id.as_str());

            let groups = if outgoing {
                &mut result.outgoing
            } else {
                &mut result.incoming
            };
            for row in self.query_rows(q).await? {
                let rel_type: String = row.get("rel_type").unwrap_or_default();
                let labels: Vec<String> = row.get("labels").unwrap_or_default();
                let props = parse_props(&row.get::<String>("props").unwrap_or_default());
                groups.entry(rel_type).or_default().push(RelatedNode {
                    id: NodeId(row.get::<String>("id").unwrap_or_default()),
                    label: labels.into_iter().next().unwrap_or_default(),
                    name: props.get("name").and_then(|v| v.as_str()).map(str::to_string),
                });
            }
        }
        Ok(result)
    }

    // ── Audit Log ────────────────────────────────────────────────

    pub async fn list_audit(&self, filter: &AuditQuery) -> Result<Vec<AuditEntry>, GraphError> {
        let mut clauses = Vec::new();
        if filter.node_id.is_some() {
            clauses.push("e.node_id = $node_id");
        }
        if filter.node_label.is_some() {
            clauses.push("e.node_label = $node_label");
        }
        if filter.action.is_some() {
            clauses.push("e.action = $action");
        }
        if filter.user.is_some() {
            clauses.push("e.user = $user");
        }
        if filter.from.is_some() {
            clauses.push("e.timestamp >= $from");
        }
        if filter.to.is_some() {
            clauses.push("e.timestamp <= $to");
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let limit = filter.limit.map(|l| format!("LIMIT {l}")).unwrap_or_default();
        let cypher = format!(
            "MATCH (e:AuditLogEntry)
             {where_clause}
             RETURN e
             ORDER BY e.timestamp DESC
             {limit}"
        );

        let mut q = query(&cypher);
        if let Some(v) = &filter.node_id {
            q = q.param("node_id", v.clone());
        }
        if let Some(v) = &filter.node_label {
            q = q.param("node_label", v.clone());
        }
        if let Some(v) = filter.action {
            q = q.param("action", v.as_str());
        }
        if let Some(v) = &filter.user {
            q = q.param("user", v.clone());
        }
        if let Some(v) = &filter.from {
            q = q.param("from", timestamp(v));
        }
        if let Some(v) = &filter.to {
            q = q.param("to", timestamp(v));
        }

        let rows = self.query_rows(q).await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let node: neo4rs::Node = row.get("e").map_err(|e| {
                GraphError::Serialization(format!("Failed to deserialize audit entry: {e}"))
            })?;
            entries.push(node_to_audit_entry(&node)?);
        }
        crate::store::warn_on_tampered(&entries);
        Ok(entries)
    }

    // ── Feature Pack Catalog ─────────────────────────────────────

    pub async fn get_pack(&self, name: &str) -> Result<Option<PackRecord>, GraphError> {
        let q = query("MATCH (p:FeaturePack {name: $name}) RETURN p").param("name", name);
        match self.query_one(q).await? {
            Some(row) => {
                let node: neo4rs::Node = row.get("p").map_err(|e| {
                    GraphError::Serialization(format!("Failed to deserialize feature pack: {e}"))
                })?;
                Ok(Some(node_to_pack(&node)))
            }
            None => Ok(None),
        }
    }

    pub async fn list_packs(&self) -> Result<Vec<PackRecord>, GraphError> {
        let q = query("MATCH (p:FeaturePack) RETURN p ORDER BY p.name");
        let rows = self.query_rows(q).await?;
        let mut packs = Vec::with_capacity(rows.len());
        for row in rows {
            let node: neo4rs::Node = row.get("p").map_err(|e| {
                GraphError::Serialization(format!("Failed to deserialize feature pack: {e}"))
            })?;
            packs.push(node_to_pack(&node));
        }
        Ok(packs)
    }

    pub async fn type_definitions_for_pack(
        &self,
        name: &str,
    ) -> Result<Vec<TypeDefinitionRecord>, GraphError> {
        let q = query(
            "MATCH (t:TypeDefinition {feature_pack_name: $name})
             RETURN t.label AS label, t.metadata AS metadata, t.enabled AS enabled
             ORDER BY t.label",
        )
        .param("name", name);

        let rows = self.query_rows(q).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let metadata: String = row.get("metadata").unwrap_or_default();
            out.push(TypeDefinitionRecord {
                label: row.get("label").unwrap_or_default(),
                feature_pack_name: name.to_string(),
                metadata: serde_json::from_str(&metadata)?,
                enabled: row.get("enabled").unwrap_or(false),
            });
        }
        Ok(out)
    }
}

// ── Row Conversion ───────────────────────────────────────────────

fn parse_props(raw: &str) -> Properties {
    if raw.is_empty() {
        return Properties::new();
    }
    serde_json::from_str(raw).unwrap_or_default()
}

fn row_to_node(row: &neo4rs::Row, label: &Label) -> Result<NodeRecord, GraphError> {
    let id: String = row
        .get("id")
        .map_err(|e| GraphError::Serialization(format!("Node row without id: {e}")))?;
    let raw: String = row.get("props").unwrap_or_default();
    Ok(NodeRecord {
        id: NodeId(id),
        label: label.to_string(),
        properties: parse_props(&raw),
        created_at: row
            .get::<String>("created_at")
            .ok()
            .and_then(|s| parse_timestamp(&s)),
        updated_at: row
            .get::<String>("updated_at")
            .ok()
            .and_then(|s| parse_timestamp(&s)),
    })
}

fn non_empty(node: &neo4rs::Node, key: &str) -> Option<String> {
    node.get::<String>(key).ok().filter(|s| !s.is_empty())
}

fn node_to_audit_entry(node: &neo4rs::Node) -> Result<AuditEntry, GraphError> {
    let id: String = node.get("id").unwrap_or_default();
    let id = uuid::Uuid::parse_str(&id)
        .map_err(|e| GraphError::Serialization(format!("Bad audit entry id {id}: {e}")))?;
    let action: String = node.get("action").unwrap_or_default();
    let action = AuditAction::parse(&action)
        .ok_or_else(|| GraphError::Serialization(format!("Unknown audit action: {action}")))?;
    let raw_ts: String = node.get("timestamp").unwrap_or_default();
    let timestamp = parse_timestamp(&raw_ts)
        .ok_or_else(|| GraphError::Serialization(format!("Bad audit timestamp: {raw_ts}")))?;

    Ok(AuditEntry {
        id: AuditEntryId(id),
        timestamp,
        action,
        node_label: node.get("node_label").unwrap_or_default(),
        node_id: node.get("node_id").unwrap_or_default(),
        node_name: non_empty(node, "node_name"),
        user: node.get("user").unwrap_or_default(),
        changes: node.get("changes").unwrap_or_default(),
        relationship_type: non_empty(node, "relationship_type"),
        target_label: non_empty(node, "target_label"),
        target_id: non_empty(node, "target_id"),
        content_hash: non_empty(node, "content_hash"),
    })
}

fn node_to_pack(node: &neo4rs::Node) -> PackRecord {
    let config: String = node.get("config").unwrap_or_default();
    PackRecord {
        name: node.get("name").unwrap_or_default(),
        display_name: node.get("display_name").unwrap_or_default(),
        enabled: node.get("enabled").unwrap_or(false),
        path: node.get("path").unwrap_or_default(),
        last_modified: non_empty(node, "last_modified").and_then(|s| parse_timestamp(&s)),
        last_synced: non_empty(node, "last_synced").and_then(|s| parse_timestamp(&s)),
        config: serde_json::from_str(&config).unwrap_or(serde_json::Value::Null),
        types: node.get("types").unwrap_or_default(),
    }
}
