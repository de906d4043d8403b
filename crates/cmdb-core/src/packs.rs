//! Feature packs: directories of JSON that define node types.
//!
//! A pack directory holds a `types.json` (label → [`TypeDefinition`]) and an
//! optional `pack.json` manifest with dependencies and detail-page tabs.
//! Discovery is pure filesystem work; persisting the result and deciding
//! which packs are enabled is the caller's job.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{is_valid_identifier, TypeDefinition};

pub const TYPES_FILE: &str = "types.json";
pub const MANIFEST_FILE: &str = "pack.json";

#[derive(Error, Debug)]
pub enum PackError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Dependency(#[from] DependencyError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DependencyError {
    #[error("Missing dependencies: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("Dependencies are disabled: {}", .0.join(", "))]
    Disabled(Vec<String>),
}

// ── Manifest ─────────────────────────────────────────────────────

/// A tab a pack contributes to node detail pages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TabDef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub for_labels: Vec<String>,
}

/// Contents of `pack.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PackManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub applies_to_labels: Vec<String>,
    #[serde(default)]
    pub tabs: Vec<TabDef>,
}

/// A pack as found on disk.
#[derive(Debug, Clone)]
pub struct DiscoveredPack {
    pub name: String,
    pub path: PathBuf,
    pub manifest: PackManifest,
    /// `pack.json` as written, kept for persistence.
    pub raw_manifest: serde_json::Value,
    pub types: BTreeMap<String, TypeDefinition>,
    pub modified: Option<DateTime<Utc>>,
}

impl DiscoveredPack {
    pub fn display_name(&self) -> String {
        self.manifest
            .display_name
            .clone()
            .unwrap_or_else(|| title_case(&self.name))
    }

    pub fn labels(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }
}

/// `data_center_pack` → `Data Center Pack`.
pub fn title_case(name: &str) -> String {
    name.split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Persisted Records ────────────────────────────────────────────

/// A feature pack as stored in the graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackRecord {
    pub name: String,
    pub display_name: String,
    pub enabled: bool,
    pub path: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub last_synced: Option<DateTime<Utc>>,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub types: Vec<String>,
}

impl PackRecord {
    /// Build the record for a freshly synced pack.
    pub fn from_discovered(pack: &DiscoveredPack, enabled: bool, synced_at: DateTime<Utc>) -> Self {
        Self {
            name: pack.name.clone(),
            display_name: pack.display_name(),
            enabled,
            path: pack.path.display().to_string(),
            last_modified: pack.modified,
            last_synced: Some(synced_at),
            config: pack.raw_manifest.clone(),
            types: pack.labels(),
        }
    }

    pub fn manifest(&self) -> PackManifest {
        serde_json::from_value(self.config.clone()).unwrap_or_default()
    }
}

/// A type definition as stored in the graph, owned by one pack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypeDefinitionRecord {
    pub label: String,
    pub feature_pack_name: String,
    pub metadata: TypeDefinition,
    pub enabled: bool,
}

impl TypeDefinitionRecord {
    pub fn for_pack(pack: &DiscoveredPack, enabled: bool) -> Vec<Self> {
        pack.types
            .iter()
            .map(|(label, def)| Self {
                label: label.clone(),
                feature_pack_name: pack.name.clone(),
                metadata: def.clone(),
                enabled,
            })
            .collect()
    }
}

// ── Discovery ────────────────────────────────────────────────────

/// Scan `dir` for pack directories. A missing directory yields no packs.
///
/// A pack whose JSON cannot be parsed is skipped with a warning so that one
/// broken pack does not take the others down with it.
pub fn discover_packs(dir: &Path) -> Result<Vec<DiscoveredPack>, PackError> {
    if !dir.is_dir() {
        tracing::warn!(dir = %dir.display(), "Feature pack directory not found");
        return Ok(Vec::new());
    }

    let read = std::fs::read_dir(dir).map_err(|source| PackError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut packs = Vec::new();
    for entry in read {
        let entry = entry.map_err(|source| PackError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match load_pack(&path) {
            Ok(pack) => packs.push(pack),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping feature pack"),
        }
    }
    packs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(packs)
}

/// Load a single pack directory.
pub fn load_pack(path: &Path) -> Result<DiscoveredPack, PackError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let types_path = path.join(TYPES_FILE);
    let mut types = BTreeMap::new();
    if types_path.is_file() {
        let raw: BTreeMap<String, TypeDefinition> = read_json(&types_path)?;
        for (label, def) in raw {
            if is_valid_identifier(&label) {
                types.insert(label, def);
            } else {
                tracing::warn!(pack = %name, label = %label, "Ignoring type with invalid label");
            }
        }
    }

    let manifest_path = path.join(MANIFEST_FILE);
    let raw_manifest: serde_json::Value = if manifest_path.is_file() {
        read_json(&manifest_path)?
    } else {
        serde_json::Value::Object(Default::default())
    };
    let manifest: PackManifest =
        serde_json::from_value(raw_manifest.clone()).map_err(|source| PackError::Parse {
            path: manifest_path.clone(),
            source,
        })?;

    let modified = [path.to_path_buf(), types_path, manifest_path]
        .iter()
        .filter_map(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok())
        .max()
        .map(system_time_to_utc);

    Ok(DiscoveredPack {
        name,
        path: path.to_path_buf(),
        manifest,
        raw_manifest,
        types,
        modified,
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, PackError> {
    let text = std::fs::read_to_string(path).map_err(|source| PackError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| PackError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn system_time_to_utc(t: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(t)
}

/// Whether a discovered pack must be (re)written to the store.
pub fn needs_sync(stored: Option<&PackRecord>, discovered: &DiscoveredPack) -> bool {
    let Some(stored) = stored else {
        return true;
    };
    match (stored.last_modified, discovered.modified) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(prev), Some(now)) => now > prev,
    }
}

/// Verify that every dependency of `manifest` is installed and enabled.
///
/// `installed` maps pack name to its enabled flag.
pub fn check_dependencies(
    manifest: &PackManifest,
    installed: &HashMap<String, bool>,
) -> Result<(), DependencyError> {
    let missing: Vec<String> = manifest
        .dependencies
        .iter()
        .filter(|d| !installed.contains_key(d.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(DependencyError::Missing(missing));
    }

    let disabled: Vec<String> = manifest
        .dependencies
        .iter()
        .filter(|d| installed.get(d.as_str()) == Some(&false))
        .cloned()
        .collect();
    if !disabled.is_empty() {
        return Err(DependencyError::Disabled(disabled));
    }
    Ok(())
}

// ── Tabs ─────────────────────────────────────────────────────────

/// A tab resolved against its owning pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackTab {
    pub pack: String,
    pub id: String,
    pub name: String,
}

/// Detail-page tabs contributed by enabled packs.
#[derive(Debug, Clone, Default)]
pub struct PackCatalog {
    tabs: Vec<(Vec<String>, PackTab)>,
}

impl PackCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the tabs of one enabled pack. A tab without `for_labels` applies
    /// to the pack's `applies_to_labels`.
    pub fn add_pack(&mut self, pack: &str, manifest: &PackManifest) {
        for tab in &manifest.tabs {
            let labels = if tab.for_labels.is_empty() {
                manifest.applies_to_labels.clone()
            } else {
                tab.for_labels.clone()
            };
            self.tabs.push((
                labels,
                PackTab {
                    pack: pack.to_string(),
                    id: tab.id.clone(),
                    name: tab.name.clone(),
                },
            ));
        }
    }

    pub fn tabs_for(&self, label: &str) -> Vec<PackTab> {
        self.tabs
            .iter()
            .filter(|(labels, _)| labels.iter().any(|l| l == label))
            .map(|(_, tab)| tab.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn write_pack(root: &Path, name: &str, types: &str, manifest: Option<&str>) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(TYPES_FILE), types).unwrap();
        if let Some(m) = manifest {
            std::fs::write(dir.join(MANIFEST_FILE), m).unwrap();
        }
        dir
    }

    #[test]
    fn discover_reads_types_and_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        write_pack(
            tmp.path(),
            "dns_pack",
            r#"{"DNS_Zone": {"display_name": "DNS Zone", "properties": ["name"], "required": ["name"]}}"#,
            Some(r#"{"name": "dns_pack", "dependencies": ["core_pack"], "tabs": [{"id": "records", "name": "Records", "for_labels": ["DNS_Zone"]}]}"#),
        );
        write_pack(tmp.path(), "data_center_pack", r#"{"Rack": {"display_name": "Rack"}}"#, None);

        let packs = discover_packs(tmp.path()).unwrap();
        assert_eq!(packs.len(), 2);
        assert_eq!(packs[0].name, "data_center_pack");
        assert_eq!(packs[0].display_name(), "Data Center Pack");
        assert!(packs[0].manifest.dependencies.is_empty());

        let dns = &packs[1];
        assert_eq!(dns.labels(), vec!["DNS_Zone"]);
        assert_eq!(dns.manifest.dependencies, vec!["core_pack"]);
        assert!(dns.modified.is_some());
    }

    #[test]
    fn discover_skips_broken_pack_and_bad_labels() {
        let tmp = tempfile::tempdir().unwrap();
        write_pack(tmp.path(), "broken", "{not json", None);
        write_pack(
            tmp.path(),
            "ok",
            r#"{"Good": {}, "Bad-Label": {}}"#,
            None,
        );
        let packs = discover_packs(tmp.path()).unwrap();
        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].labels(), vec!["Good"]);
    }

    #[test]
    fn missing_directory_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let packs = discover_packs(&tmp.path().join("nope")).unwrap();
        assert!(packs.is_empty());
    }

    #[test]
    fn needs_sync_compares_mtime() {
        let now = Utc::now();
        let pack = DiscoveredPack {
            name: "p".into(),
            path: PathBuf::from("/tmp/p"),
            manifest: PackManifest::default(),
            raw_manifest: serde_json::json!({}),
            types: BTreeMap::new(),
            modified: Some(now),
        };
        assert!(needs_sync(None, &pack));

        let mut stored = PackRecord::from_discovered(&pack, true, now);
        assert!(!needs_sync(Some(&stored), &pack));

        stored.last_modified = Some(now - Duration::seconds(60));
        assert!(needs_sync(Some(&stored), &pack));

        stored.last_modified = None;
        assert!(needs_sync(Some(&stored), &pack));
    }

    #[test]
    fn dependency_check() {
        let manifest = PackManifest {
            dependencies: vec!["core".into(), "ipam".into()],
            ..Default::default()
        };
        let mut installed = HashMap::new();
        installed.insert("core".to_string(), true);
        assert_eq!(
            check_dependencies(&manifest, &installed),
            Err(DependencyError::Missing(vec!["ipam".into()]))
        );

        installed.insert("ipam".to_string(), false);
        assert_eq!(
            check_dependencies(&manifest, &installed),
            Err(DependencyError::Disabled(vec!["ipam".into()]))
        );

        installed.insert("ipam".to_string(), true);
        assert!(check_dependencies(&manifest, &installed).is_ok());
    }

    #[test]
    fn tabs_resolve_per_label() {
        let manifest = PackManifest {
            applies_to_labels: vec!["Rack".into()],
            tabs: vec![
                TabDef {
                    id: "units".into(),
                    name: "Rack Units".into(),
                    for_labels: vec![],
                },
                TabDef {
                    id: "racks".into(),
                    name: "Racks".into(),
                    for_labels: vec!["Row".into(), "Room".into()],
                },
            ],
            ..Default::default()
        };
        let mut catalog = PackCatalog::new();
        catalog.add_pack("data_center_pack", &manifest);

        let rack_tabs = catalog.tabs_for("Rack");
        assert_eq!(rack_tabs.len(), 1);
        assert_eq!(rack_tabs[0].id, "units");
        assert_eq!(catalog.tabs_for("Room")[0].name, "Racks");
        assert!(catalog.tabs_for("Device").is_empty());
    }
}
