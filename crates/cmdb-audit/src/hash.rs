//! BLAKE3 content hashing for tamper evidence.
//!
//! Hashes a canonical JSON rendering of every audit field except
//! `content_hash` itself.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{AuditAction, AuditEntry, AuditEntryId};

#[derive(Serialize)]
struct HashableEntry<'a> {
    id: &'a AuditEntryId,
    timestamp: &'a DateTime<Utc>,
    action: &'a AuditAction,
    node_label: &'a str,
    node_id: &'a str,
    node_name: &'a Option<String>,
    user: &'a str,
    changes: &'a str,
    relationship_type: &'a Option<String>,
    target_label: &'a Option<String>,
    target_id: &'a Option<String>,
}

/// Hex-encoded BLAKE3 hash of an entry's content.
pub fn compute_entry_hash(entry: &AuditEntry) -> String {
    let hashable = HashableEntry {
        id: &entry.id,
        timestamp: &entry.timestamp,
        action: &entry.action,
        node_label: &entry.node_label,
        node_id: &entry.node_id,
        node_name: &entry.node_name,
        user: &entry.user,
        changes: &entry.changes,
        relationship_type: &entry.relationship_type,
        target_label: &entry.target_label,
        target_id: &entry.target_id,
    };

    // Only strings, options and a timestamp: serialization cannot fail.
    let json = serde_json::to_vec(&hashable).unwrap_or_default();
    blake3::hash(&json).to_hex().to_string()
}
