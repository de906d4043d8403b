//! cmdb-audit: Tamper-evident audit log for GraphCMDB.
//!
//! Every node and relationship mutation produces one [`AuditEntry`]. Entries
//! are content-hashed with BLAKE3 when built, so any later modification of
//! a stored entry is detectable on read. Delivery to storage, logs, or
//! anything else goes through the [`hooks::AuditHooks`] dispatcher.

pub mod builder;
pub mod hash;
pub mod hooks;
pub mod query;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use builder::AuditEntryBuilder;
pub use hooks::{AuditHook, AuditHooks};
pub use query::AuditQuery;

/// Actor recorded when no user is attached to a mutation.
pub const SYSTEM_ACTOR: &str = "System";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Integrity check failed for audit entry {0}: stored hash does not match content")]
    IntegrityViolation(AuditEntryId),

    #[error("Audit entry {0} is not sealed")]
    NotSealed(AuditEntryId),

    #[error("Audit hook {hook} failed: {message}")]
    Hook { hook: String, message: String },
}

// ── Core Types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct AuditEntryId(pub Uuid);

impl AuditEntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AuditEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AuditEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Connect,
    Disconnect,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "connect" => Some(Self::Connect),
            "disconnect" => Some(Self::Disconnect),
            _ => None,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable record of a mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub node_label: String,
    pub node_id: String,
    /// The node's `name` property at the time of the mutation.
    pub node_name: Option<String>,
    /// Username, or [`SYSTEM_ACTOR`].
    pub user: String,
    pub changes: String,
    pub relationship_type: Option<String>,
    pub target_label: Option<String>,
    pub target_id: Option<String>,
    /// BLAKE3 content hash (hex), set by [`AuditEntry::seal`].
    pub content_hash: Option<String>,
}

impl AuditEntry {
    /// Hash of every field except `content_hash`.
    pub fn compute_hash(&self) -> String {
        hash::compute_entry_hash(self)
    }

    /// Compute and store the content hash.
    pub fn seal(mut self) -> Self {
        self.content_hash = Some(self.compute_hash());
        self
    }

    pub fn is_sealed(&self) -> bool {
        self.content_hash.is_some()
    }

    /// Verify that the stored content_hash matches a freshly computed hash.
    pub fn verify_integrity(&self) -> bool {
        match &self.content_hash {
            Some(stored) => stored == &self.compute_hash(),
            None => false,
        }
    }

    /// Like [`verify_integrity`](Self::verify_integrity) but as a `Result`.
    pub fn check(&self) -> Result<(), AuditError> {
        if !self.is_sealed() {
            return Err(AuditError::NotSealed(self.id));
        }
        if !self.verify_integrity() {
            return Err(AuditError::IntegrityViolation(self.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdb_core::types::Properties;
    use serde_json::json;

    fn sample() -> AuditEntry {
        let mut props = Properties::new();
        props.insert("name".into(), json!("rack-a1"));
        builder::create("Rack", "r-1", &props, Some("alice"))
    }

    #[test]
    fn sealed_entry_verifies() {
        let entry = sample();
        assert!(entry.is_sealed());
        assert!(entry.verify_integrity());
        assert!(entry.check().is_ok());
    }

    #[test]
    fn tampering_is_detected() {
        let mut entry = sample();
        entry.user = "mallory".into();
        assert!(!entry.verify_integrity());
        assert!(matches!(entry.check(), Err(AuditError::IntegrityViolation(_))));
    }

    #[test]
    fn unsealed_entry_fails_check() {
        let mut entry = sample();
        entry.content_hash = None;
        assert!(!entry.verify_integrity());
        assert!(matches!(entry.check(), Err(AuditError::NotSealed(_))));
    }

    #[test]
    fn survives_json_round_trip() {
        let entry = sample();
        let json = serde_json::to_string(&entry).unwrap();
        let back: AuditEntry = serde_json::from_str(&json).unwrap();
        assert!(back.verify_integrity());
        assert_eq!(back, entry);
    }

    #[test]
    fn action_parse() {
        assert_eq!(AuditAction::parse("disconnect"), Some(AuditAction::Disconnect));
        assert_eq!(AuditAction::parse("bogus"), None);
        assert_eq!(AuditAction::Update.to_string(), "update");
    }
}
