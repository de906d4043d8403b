//! Filters for listing audit entries.

use chrono::{DateTime, Utc};

use crate::{AuditAction, AuditEntry};

/// Query parameters for listing audit entries. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub node_id: Option<String>,
    pub node_label: Option<String>,
    pub action: Option<AuditAction>,
    pub user: Option<String>,
    /// Only include entries at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Only include entries at or before this time.
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    /// Entries for one node.
    pub fn for_node(label: &str, id: &str) -> Self {
        Self {
            node_label: Some(label.to_string()),
            node_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(id) = &self.node_id {
            if &entry.node_id != id {
                return false;
            }
        }
        if let Some(label) = &self.node_label {
            if &entry.node_label != label {
                return false;
            }
        }
        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }
        if let Some(user) = &self.user {
            if &entry.user != user {
                return false;
            }
        }
        if let Some(from) = &self.from {
            if entry.timestamp < *from {
                return false;
            }
        }
        if let Some(to) = &self.to {
            if entry.timestamp > *to {
                return false;
            }
        }
        true
    }

    /// Filter, order newest first, and truncate to `limit`.
    pub fn apply<'a, I>(&self, entries: I) -> Vec<AuditEntry>
    where
        I: IntoIterator<Item = &'a AuditEntry>,
    {
        let mut out: Vec<AuditEntry> = entries
            .into_iter()
            .filter(|e| self.matches(e))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder;
    use chrono::Duration;
    use cmdb_core::types::Properties;

    fn entry_at(label: &str, id: &str, user: &str, offset_secs: i64) -> AuditEntry {
        let mut e = builder::create(label, id, &Properties::new(), Some(user));
        e.timestamp = Utc::now() - Duration::seconds(offset_secs);
        e.seal()
    }

    #[test]
    fn filters_by_node_and_action() {
        let entries = vec![
            entry_at("Rack", "r-1", "alice", 30),
            entry_at("Rack", "r-2", "alice", 20),
            entry_at("Room", "r-1", "bob", 10),
        ];

        let q = AuditQuery::for_node("Rack", "r-1");
        let found = q.apply(&entries);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].node_label, "Rack");

        let q = AuditQuery {
            action: Some(AuditAction::Delete),
            ..Default::default()
        };
        assert!(q.apply(&entries).is_empty());

        let q = AuditQuery {
            user: Some("alice".into()),
            ..Default::default()
        };
        assert_eq!(q.apply(&entries).len(), 2);
    }

    #[test]
    fn orders_newest_first_and_limits() {
        let entries = vec![
            entry_at("Rack", "a", "u", 300),
            entry_at("Rack", "b", "u", 100),
            entry_at("Rack", "c", "u", 200),
        ];
        let found = AuditQuery::default().with_limit(2).apply(&entries);
        let ids: Vec<&str> = found.iter().map(|e| e.node_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn time_window() {
        let entries = vec![entry_at("Rack", "old", "u", 3600), entry_at("Rack", "new", "u", 5)];
        let q = AuditQuery {
            from: Some(Utc::now() - Duration::seconds(60)),
            ..Default::default()
        };
        let found = q.apply(&entries);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].node_id, "new");
    }
}
