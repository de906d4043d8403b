//! Core types for the CMDB graph: node identifiers, labels, type
//! definitions, and relationship records.
//!
//! Node types are not compiled in. Every label is described at runtime by a
//! [`TypeDefinition`] loaded from a feature pack's `types.json`, and node
//! properties travel as an untyped JSON object.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CmdbError;

/// Free-form node properties, persisted as a JSON blob.
pub type Properties = serde_json::Map<String, serde_json::Value>;

// ── Identifiers ──────────────────────────────────────────────────

/// Opaque identifier of a node in the graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form used when a node has no `name` property.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Returns true if `s` is safe to splice into Cypher as a label or
/// relationship type: `^[A-Za-z_][A-Za-z0-9_]*$`.
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A node label (e.g. `Device`, `DNS_Zone`).
///
/// Labels are interpolated into Cypher, so construction validates the
/// identifier shape. Whether the label is *registered* is a separate check
/// against the [`TypeRegistry`](crate::registry::TypeRegistry).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct Label(String);

impl Label {
    pub fn parse(s: &str) -> Result<Self, CmdbError> {
        if is_valid_identifier(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(CmdbError::InvalidIdentifier(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Label {
    type Error = CmdbError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Relationship type such as `LOCATED_IN`. Same identifier rules as [`Label`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct RelType(String);

impl RelType {
    pub fn parse(s: &str) -> Result<Self, CmdbError> {
        if is_valid_identifier(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(CmdbError::InvalidIdentifier(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RelType {
    type Error = CmdbError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<RelType> for String {
    fn from(rel: RelType) -> Self {
        rel.0
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Type Definitions ─────────────────────────────────────────────

/// A property declared by a type: either a bare name or a name with a
/// closed set of allowed values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PropertyDef {
    Name(String),
    WithChoices {
        name: String,
        #[serde(default)]
        choices: Vec<String>,
    },
}

impl PropertyDef {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::WithChoices { name, .. } => name,
        }
    }

    pub fn choices(&self) -> Option<&[String]> {
        match self {
            Self::WithChoices { choices, .. } if !choices.is_empty() => Some(choices),
            _ => None,
        }
    }

    /// Human-readable form: `status (choices: active, retired)`.
    pub fn display(&self) -> String {
        match self.choices() {
            Some(choices) => format!("{} (choices: {})", self.name(), choices.join(", ")),
            None => self.name().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Out,
    In,
}

/// A relationship a type declares it may participate in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationshipDef {
    pub target: String,
    #[serde(default)]
    pub direction: Direction,
}

/// Schema for one node label, as written in a feature pack's `types.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TypeDefinition {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipDef>,
}

pub const DEFAULT_CATEGORY: &str = "Uncategorized";
const DEFAULT_COLUMN_COUNT: usize = 5;

impl TypeDefinition {
    /// Definition used for labels that are not registered.
    pub fn fallback(label: &str) -> Self {
        Self {
            display_name: label.to_string(),
            description: "No description".to_string(),
            ..Default::default()
        }
    }

    pub fn property_names(&self) -> Vec<&str> {
        self.properties.iter().map(PropertyDef::name).collect()
    }

    /// Columns shown in list views: the declared subset, or the first five
    /// properties when none is declared.
    pub fn columns(&self) -> Vec<String> {
        if !self.columns.is_empty() {
            return self.columns.clone();
        }
        self.properties
            .iter()
            .take(DEFAULT_COLUMN_COUNT)
            .map(|p| p.name().to_string())
            .collect()
    }

    pub fn category(&self) -> &str {
        self.category.as_deref().unwrap_or(DEFAULT_CATEGORY)
    }

    pub fn display_name_or<'a>(&'a self, label: &'a str) -> &'a str {
        if self.display_name.is_empty() {
            label
        } else {
            &self.display_name
        }
    }

    pub fn choices_for(&self, property: &str) -> Option<&[String]> {
        self.properties
            .iter()
            .find(|p| p.name() == property)
            .and_then(PropertyDef::choices)
    }

    pub fn is_required(&self, property: &str) -> bool {
        self.required.iter().any(|r| r == property)
    }

    /// Required properties absent from `props`, in declaration order.
    pub fn missing_required(&self, props: &Properties) -> Vec<String> {
        self.required
            .iter()
            .filter(|r| !props.contains_key(r.as_str()))
            .cloned()
            .collect()
    }

    /// Check every choice-constrained property present in `props`.
    pub fn validate_choices(&self, props: &Properties) -> Result<(), CmdbError> {
        for (key, value) in props {
            let Some(choices) = self.choices_for(key) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let rendered = value_to_plain_string(value);
            if !choices.iter().any(|c| c == &rendered) {
                return Err(CmdbError::InvalidChoice {
                    property: key.clone(),
                    value: rendered,
                    choices: choices.to_vec(),
                });
            }
        }
        Ok(())
    }
}

/// Render a JSON value without quotes around strings.
pub fn value_to_plain_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ── Records ──────────────────────────────────────────────────────

/// A node as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub label: String,
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl NodeRecord {
    /// The `name` property, if it is a string.
    pub fn name(&self) -> Option<&str> {
        self.properties.get("name").and_then(|v| v.as_str())
    }

    /// Name for display and sorting; falls back to the node id.
    pub fn display_name(&self) -> String {
        match self.name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.id.to_string(),
        }
    }
}

/// The other end of a relationship, seen from one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelatedNode {
    pub id: NodeId,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl RelatedNode {
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("{}...", self.id.short()),
        }
    }
}

/// All relationships touching a node, grouped by relationship type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NodeRelationships {
    pub outgoing: BTreeMap<String, Vec<RelatedNode>>,
    pub incoming: BTreeMap<String, Vec<RelatedNode>>,
}

impl NodeRelationships {
    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty() && self.incoming.is_empty()
    }
}

/// A directed relationship to create: `(source)-[rel_type]->(target)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipSpec {
    pub source_label: Label,
    pub source_id: NodeId,
    pub rel_type: RelType,
    pub target_label: Label,
    pub target_id: NodeId,
    pub properties: Properties,
}

/// Pagination window for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub const DEFAULT_LIMIT: u32 = 100;

    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }
}
