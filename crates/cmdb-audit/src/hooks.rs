//! Audit hook dispatch.
//!
//! Hooks receive every audit entry. A failing hook is logged and skipped:
//! auditing never fails the mutation that produced the entry.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::{AuditEntry, AuditError};

#[async_trait]
pub trait AuditHook: Send + Sync {
    /// Stable name; a second hook with the same name is not registered.
    fn name(&self) -> &str;

    async fn on_audit(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

/// Ordered set of hooks, de-duplicated by name.
#[derive(Default)]
pub struct AuditHooks {
    hooks: RwLock<Vec<Arc<dyn AuditHook>>>,
}

impl AuditHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if a hook with the same name is already registered.
    pub fn register(&self, hook: Arc<dyn AuditHook>) -> bool {
        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        if hooks.iter().any(|h| h.name() == hook.name()) {
            return false;
        }
        tracing::debug!(hook = hook.name(), "Registered audit hook");
        hooks.push(hook);
        true
    }

    pub fn names(&self) -> Vec<String> {
        let hooks = self.hooks.read().unwrap_or_else(|e| e.into_inner());
        hooks.iter().map(|h| h.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.hooks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `entry` to every hook in registration order.
    pub async fn emit(&self, entry: &AuditEntry) {
        let hooks: Vec<Arc<dyn AuditHook>> = {
            let guard = self.hooks.read().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        for hook in hooks {
            if let Err(e) = hook.on_audit(entry).await {
                tracing::warn!(
                    hook = hook.name(),
                    audit_id = %entry.id,
                    error = %e,
                    "Audit hook failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for AuditHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditHooks")
            .field("hooks", &self.names())
            .finish()
    }
}

/// Emits each entry as a structured `tracing` event on the `cmdb::audit` target.
pub struct TracingHook;

#[async_trait]
impl AuditHook for TracingHook {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn on_audit(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        tracing::info!(
            target: "cmdb::audit",
            audit_id = %entry.id,
            action = %entry.action,
            node_label = %entry.node_label,
            node_id = %entry.node_id,
            user = %entry.user,
            relationship_type = entry.relationship_type.as_deref().unwrap_or(""),
            "Audit"
        );
        Ok(())
    }
}
