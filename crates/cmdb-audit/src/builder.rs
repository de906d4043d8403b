//! Construction of audit entries.
//!
//! [`AuditEntryBuilder`] covers the general case; the free functions build
//! the entry for each mutation kind with the standard `changes` text:
//!
//! ```
//! # use cmdb_audit::builder;
//! # use cmdb_core::types::Properties;
//! let mut props = Properties::new();
//! props.insert("name".into(), serde_json::json!("srv-01"));
//! let entry = builder::create("Device", "d-1", &props, Some("alice"));
//! assert_eq!(entry.changes, "Created with properties: name");
//! assert!(entry.verify_integrity());
//! ```

use std::collections::BTreeMap;

use chrono::Utc;
use cmdb_core::types::Properties;
use serde::Serialize;

use crate::{AuditAction, AuditEntry, AuditEntryId, SYSTEM_ACTOR};

/// Username, or [`SYSTEM_ACTOR`] for anonymous mutations.
pub fn actor(user: Option<&str>) -> String {
    match user {
        Some(u) if !u.is_empty() => u.to_string(),
        _ => SYSTEM_ACTOR.to_string(),
    }
}

fn name_of(props: &Properties) -> Option<String> {
    props
        .get("name")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub struct AuditEntryBuilder {
    entry: AuditEntry,
}

impl AuditEntryBuilder {
    pub fn new(action: AuditAction, node_label: &str, node_id: &str) -> Self {
        Self {
            entry: AuditEntry {
                id: AuditEntryId::new(),
                timestamp: Utc::now(),
                action,
                node_label: node_label.to_string(),
                node_id: node_id.to_string(),
                node_name: None,
                user: SYSTEM_ACTOR.to_string(),
                changes: String::new(),
                relationship_type: None,
                target_label: None,
                target_id: None,
                content_hash: None,
            },
        }
    }

    pub fn node_name(mut self, name: Option<String>) -> Self {
        self.entry.node_name = name;
        self
    }

    pub fn user(mut self, user: Option<&str>) -> Self {
        self.entry.user = actor(user);
        self
    }

    pub fn changes(mut self, changes: impl Into<String>) -> Self {
        self.entry.changes = changes.into();
        self
    }

    pub fn relationship(mut self, rel_type: &str, target_label: &str, target_id: &str) -> Self {
        self.entry.relationship_type = Some(rel_type.to_string());
        self.entry.target_label = Some(target_label.to_string());
        self.entry.target_id = Some(target_id.to_string());
        self
    }

    /// Finish the entry and seal its content hash.
    pub fn build(self) -> AuditEntry {
        self.entry.seal()
    }
}

pub fn create(label: &str, id: &str, props: &Properties, user: Option<&str>) -> AuditEntry {
    let keys: Vec<&str> = props.keys().map(String::as_str).collect();
    AuditEntryBuilder::new(AuditAction::Create, label, id)
        .node_name(name_of(props))
        .user(user)
        .changes(format!("Created with properties: {}", keys.join(", ")))
        .build()
}

#[derive(Serialize)]
struct Change<'a> {
    old: Option<&'a serde_json::Value>,
    new: Option<&'a serde_json::Value>,
}

/// Pretty-printed `{key: {old, new}}` for every key whose value differs,
/// keys sorted. `None` when nothing differs.
pub fn diff_properties(old: &Properties, new: &Properties) -> Option<String> {
    let mut changes: BTreeMap<&str, Change<'_>> = BTreeMap::new();
    for key in old.keys().chain(new.keys()) {
        let (before, after) = (old.get(key), new.get(key));
        if before != after {
            changes.insert(
                key.as_str(),
                Change {
                    old: before,
                    new: after,
                },
            );
        }
    }
    if changes.is_empty() {
        return None;
    }
    serde_json::to_string_pretty(&changes).ok()
}

pub fn update(
    label: &str,
    id: &str,
    old: &Properties,
    new: &Properties,
    user: Option<&str>,
) -> AuditEntry {
    let changes = diff_properties(old, new).unwrap_or_else(|| "Properties updated".to_string());
    AuditEntryBuilder::new(AuditAction::Update, label, id)
        .node_name(name_of(new))
        .user(user)
        .changes(changes)
        .build()
}

pub fn delete(label: &str, id: &str, props: &Properties, user: Option<&str>) -> AuditEntry {
    let name = name_of(props);
    let shown = name.clone().unwrap_or_else(|| id.to_string());
    AuditEntryBuilder::new(AuditAction::Delete, label, id)
        .node_name(name)
        .user(user)
        .changes(format!("Deleted: {shown}"))
        .build()
}

pub fn connect(
    label: &str,
    id: &str,
    node_name: Option<String>,
    rel_type: &str,
    target_label: &str,
    target_id: &str,
    user: Option<&str>,
) -> AuditEntry {
    AuditEntryBuilder::new(AuditAction::Connect, label, id)
        .node_name(node_name)
        .user(user)
        .changes(format!("Connected via {rel_type} to {target_label} {target_id}"))
        .relationship(rel_type, target_label, target_id)
        .build()
}

pub fn disconnect(
    label: &str,
    id: &str,
    node_name: Option<String>,
    rel_type: &str,
    target_label: &str,
    target_id: &str,
    user: Option<&str>,
) -> AuditEntry {
    AuditEntryBuilder::new(AuditAction::Disconnect, label, id)
        .node_name(node_name)
        .user(user)
        .changes(format!("Removed {rel_type} to {target_label} {target_id}"))
        .relationship(rel_type, target_label, target_id)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(pairs: &[(&str, serde_json::Value)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn anonymous_actor_is_system() {
        assert_eq!(actor(None), "System");
        assert_eq!(actor(Some("")), "System");
        assert_eq!(actor(Some("bob")), "bob");
    }

    #[test]
    fn update_diff_is_sorted_and_complete() {
        let old = props(&[("name", json!("a")), ("status", json!("active")), ("gone", json!(1))]);
        let new = props(&[("name", json!("a")), ("status", json!("retired")), ("added", json!(true))]);

        let diff = diff_properties(&old, &new).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&diff).unwrap();
        assert_eq!(
            parsed,
            json!({
                "added": {"old": null, "new": true},
                "gone": {"old": 1, "new": null},
                "status": {"old": "active", "new": "retired"}
            })
        );
        let added = diff.find("\"added\"").unwrap();
        let status = diff.find("\"status\"").unwrap();
        assert!(added < status);

        let entry = update("Device", "d-1", &old, &new, Some("alice"));
        assert_eq!(entry.action, AuditAction::Update);
        assert_eq!(entry.node_name.as_deref(), Some("a"));
        assert_eq!(entry.changes, diff);
    }

    #[test]
    fn update_without_differences() {
        let same = props(&[("name", json!("a"))]);
        assert!(diff_properties(&same, &same).is_none());
        let entry = update("Device", "d-1", &same, &same, None);
        assert_eq!(entry.changes, "Properties updated");
        assert_eq!(entry.user, "System");
    }

    #[test]
    fn relationship_entries_record_target() {
        let entry = connect("Rack", "r-1", Some("rack-a1".into()), "LOCATED_IN", "Room", "room-9", Some("ops"));
        assert_eq!(entry.action, AuditAction::Connect);
        assert_eq!(entry.relationship_type.as_deref(), Some("LOCATED_IN"));
        assert_eq!(entry.target_label.as_deref(), Some("Room"));
        assert_eq!(entry.target_id.as_deref(), Some("room-9"));
        assert!(entry.verify_integrity());

        let entry = disconnect("Rack", "r-1", None, "LOCATED_IN", "Room", "room-9", None);
        assert_eq!(entry.action, AuditAction::Disconnect);
        assert!(entry.node_name.is_none());
    }

    #[test]
    fn delete_names_the_node() {
        let entry = delete("Rack", "r-1", &props(&[("name", json!("rack-a1"))]), None);
        assert_eq!(entry.changes, "Deleted: rack-a1");
        let entry = delete("Rack", "r-2", &Properties::new(), None);
        assert_eq!(entry.changes, "Deleted: r-2");
    }
}
