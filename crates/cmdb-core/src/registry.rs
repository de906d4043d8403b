//! In-memory registry of node types.
//!
//! Populated at startup from enabled feature packs and rewritten when a pack
//! is enabled or disabled. Reads vastly outnumber writes, so the whole map
//! sits behind a single `RwLock`.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::types::TypeDefinition;

#[derive(Debug, Clone)]
struct Entry {
    definition: TypeDefinition,
    pack: Option<String>,
}

/// Label → type definition, with the owning feature pack recorded per entry.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a type definition.
    pub fn register(&self, label: &str, definition: TypeDefinition, pack: Option<&str>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let replaced = entries
            .insert(
                label.to_string(),
                Entry {
                    definition,
                    pack: pack.map(str::to_string),
                },
            )
            .is_some();
        tracing::debug!(label, pack = pack.unwrap_or("-"), replaced, "Registered type");
    }

    /// Remove a label. Returns true if it was registered.
    pub fn unregister(&self, label: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(label).is_some()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    pub fn contains(&self, label: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(label)
    }

    pub fn get(&self, label: &str) -> Option<TypeDefinition> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(label).map(|e| e.definition.clone())
    }

    /// Definition for `label`, or a fallback for unregistered labels.
    pub fn metadata(&self, label: &str) -> TypeDefinition {
        let mut def = self
            .get(label)
            .unwrap_or_else(|| TypeDefinition::fallback(label));
        if def.display_name.is_empty() {
            def.display_name = label.to_string();
        }
        def
    }

    pub fn known_labels(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut labels: Vec<String> = entries.keys().cloned().collect();
        labels.sort();
        labels
    }

    /// Labels grouped by category; both levels sorted.
    pub fn categories(&self) -> BTreeMap<String, Vec<String>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (label, entry) in entries.iter() {
            out.entry(entry.definition.category().to_string())
                .or_default()
                .push(label.clone());
        }
        for labels in out.values_mut() {
            labels.sort();
        }
        out
    }

    pub fn types_for_pack(&self, pack: &str) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut labels: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.pack.as_deref() == Some(pack))
            .map(|(l, _)| l.clone())
            .collect();
        labels.sort();
        labels
    }

    pub fn pack_for_type(&self, label: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(label).and_then(|e| e.pack.clone())
    }

    /// Drop every type owned by `pack`. Returns the removed labels.
    pub fn unregister_pack(&self, pack: &str) -> Vec<String> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut removed: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.pack.as_deref() == Some(pack))
            .map(|(l, _)| l.clone())
            .collect();
        for label in &removed {
            entries.remove(label);
        }
        removed.sort();
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PropertyDef;

    fn def(category: Option<&str>) -> TypeDefinition {
        TypeDefinition {
            display_name: String::new(),
            category: category.map(str::to_string),
            properties: vec![PropertyDef::Name("name".into())],
            ..Default::default()
        }
    }

    #[test]
    fn register_and_lookup() {
        let reg = TypeRegistry::new();
        reg.register("Rack", def(Some("Data Center")), Some("data_center_pack"));
        reg.register("Device", def(None), None);

        assert!(reg.contains("Rack"));
        assert_eq!(reg.known_labels(), vec!["Device", "Rack"]);
        assert_eq!(reg.pack_for_type("Rack").as_deref(), Some("data_center_pack"));
        assert_eq!(reg.pack_for_type("Device"), None);
        assert_eq!(reg.types_for_pack("data_center_pack"), vec!["Rack"]);
    }

    #[test]
    fn metadata_falls_back_for_unknown_label() {
        let reg = TypeRegistry::new();
        let meta = reg.metadata("Ghost");
        assert_eq!(meta.display_name, "Ghost");
        assert_eq!(meta.description, "No description");

        reg.register("Rack", def(None), None);
        assert_eq!(reg.metadata("Rack").display_name, "Rack");
    }

    #[test]
    fn categories_default_to_uncategorized() {
        let reg = TypeRegistry::new();
        reg.register("Rack", def(Some("Data Center")), None);
        reg.register("Room", def(Some("Data Center")), None);
        reg.register("Widget", def(None), None);

        let cats = reg.categories();
        assert_eq!(cats["Data Center"], vec!["Rack", "Room"]);
        assert_eq!(cats["Uncategorized"], vec!["Widget"]);
    }

    #[test]
    fn unregister_pack_removes_only_its_types() {
        let reg = TypeRegistry::new();
        reg.register("DNS_Zone", def(None), Some("dns_pack"));
        reg.register("DNS_Record", def(None), Some("dns_pack"));
        reg.register("Rack", def(None), Some("data_center_pack"));

        let removed = reg.unregister_pack("dns_pack");
        assert_eq!(removed, vec!["DNS_Record", "DNS_Zone"]);
        assert_eq!(reg.known_labels(), vec!["Rack"]);

        assert!(reg.unregister("Rack"));
        assert!(!reg.unregister("Rack"));
        assert!(reg.is_empty());
    }
}
