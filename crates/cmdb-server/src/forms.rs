//! HTML form decoding for node create/edit.
//!
//! Property inputs are named `prop_{name}`. A form may also carry the whole
//! property map as raw JSON in `properties`, plus the JSON the edit form was
//! rendered with in `original_json`.

use serde_json::Value;

use cmdb_core::types::{value_to_plain_string, Properties, TypeDefinition};

pub const PROP_PREFIX: &str = "prop_";

/// A decoded `application/x-www-form-urlencoded` body.
#[derive(Debug, Clone, Default)]
pub struct NodeForm {
    /// `prop_*` fields in submission order, prefix stripped.
    pub fields: Vec<(String, String)>,
    pub raw_json: Option<String>,
    pub original_json: Option<String>,
}

impl NodeForm {
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut form = Self::default();
        for (key, value) in pairs {
            if let Some(name) = key.strip_prefix(PROP_PREFIX) {
                if !name.is_empty() {
                    form.fields.push((name.to_string(), value));
                }
            } else if key == "properties" {
                form.raw_json = Some(value).filter(|v| !v.trim().is_empty());
            } else if key == "original_json" {
                form.original_json = Some(value);
            }
        }
        form
    }

    /// Properties for a new node. Raw JSON is the base; non-empty fields
    /// override it.
    pub fn create_properties(&self) -> Result<Properties, String> {
        let mut props = match &self.raw_json {
            Some(raw) => parse_object(raw)?,
            None => Properties::new(),
        };
        for (name, value) in &self.fields {
            if !value.trim().is_empty() {
                props.insert(name.clone(), coerce(value));
            }
        }
        Ok(props)
    }

    /// The patch for an edit. The fields win unless the raw JSON was changed
    /// by hand, in which case it replaces them.
    pub fn edit_properties(&self) -> Result<Properties, String> {
        if let Some(raw) = &self.raw_json {
            let edited = parse_object(raw)?;
            let original = self
                .original_json
                .as_deref()
                .and_then(|o| serde_json::from_str::<Value>(o).ok());
            if original.as_ref() != Some(&Value::Object(edited.clone())) {
                return Ok(edited);
            }
        }
        Ok(self
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), coerce(value)))
            .collect())
    }

    /// Submitted values keyed by property name, for re-rendering a form.
    pub fn submitted(&self) -> Properties {
        self.fields
            .iter()
            .map(|(name, value)| (name.clone(), Value::String(value.clone())))
            .collect()
    }
}

fn parse_object(raw: &str) -> Result<Properties, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("Invalid raw JSON: expected an object".to_string()),
        Err(e) => Err(format!("Invalid raw JSON: {e}")),
    }
}

/// `true`/`false` become booleans, integers i64, decimals f64, JSON arrays
/// and objects are parsed, anything else stays a string.
pub fn coerce(raw: &str) -> Value {
    let trimmed = raw.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(v @ (Value::Array(_) | Value::Object(_))) = serde_json::from_str::<Value>(trimmed) {
            return v;
        }
    }
    let numeric = !trimmed.is_empty()
        && trimmed.chars().all(|c| c.is_ascii_digit() || c == '-' || c == '.')
        && trimmed.chars().any(|c| c.is_ascii_digit());
    if numeric {
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::from(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }
    Value::String(raw.to_string())
}

// ── Field Descriptions ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Boolean,
    TextArea,
    Select,
}

/// One input of a create or edit form.
#[derive(Debug, Clone, PartialEq)]
pub struct FormField {
    pub name: String,
    pub value: String,
    pub kind: FieldKind,
    pub required: bool,
    pub choices: Vec<String>,
}

impl FormField {
    pub fn input_name(&self) -> String {
        format!("{PROP_PREFIX}{}", self.name)
    }
}

/// Inputs for a new node: one per declared property, pre-filled from
/// `submitted` when re-rendering after a validation error.
pub fn create_fields(definition: &TypeDefinition, submitted: &Properties) -> Vec<FormField> {
    definition
        .properties
        .iter()
        .map(|prop| {
            let choices = prop.choices().map(<[String]>::to_vec).unwrap_or_default();
            FormField {
                name: prop.name().to_string(),
                value: submitted.get(prop.name()).map(value_to_plain_string).unwrap_or_default(),
                kind: if choices.is_empty() {
                    FieldKind::Text
                } else {
                    FieldKind::Select
                },
                required: definition.is_required(prop.name()),
                choices,
            }
        })
        .collect()
}

/// Inputs for editing: every current property (declared ones first), typed
/// by the value it holds.
pub fn edit_fields(definition: &TypeDefinition, current: &Properties) -> Vec<FormField> {
    let mut names: Vec<String> = definition.property_names().into_iter().map(str::to_string).collect();
    for key in current.keys() {
        if !names.iter().any(|n| n == key) {
            names.push(key.clone());
        }
    }

    names
        .into_iter()
        .map(|name| {
            let value = current.get(&name);
            let choices = definition.choices_for(&name).map(<[String]>::to_vec).unwrap_or_default();
            let kind = match value {
                _ if !choices.is_empty() => FieldKind::Select,
                Some(Value::Bool(_)) => FieldKind::Boolean,
                Some(Value::Number(_)) => FieldKind::Number,
                Some(Value::Array(_)) | Some(Value::Object(_)) => FieldKind::TextArea,
                _ => FieldKind::Text,
            };
            let rendered = match value {
                Some(v @ (Value::Array(_) | Value::Object(_))) => v.to_string(),
                Some(v) => value_to_plain_string(v),
                None => String::new(),
            };
            FormField {
                required: definition.is_required(&name),
                name,
                value: rendered,
                kind,
                choices,
            }
        })
        .collect()
}
