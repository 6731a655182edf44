//! Claim spec fields described by a CompositeResourceDefinition

use std::fmt;

use kube::api::DynamicObject;
use serde_json::Value as JsonValue;

use crate::error::{KubeError, Result};
use crate::object::ObjectExt;

/// OpenAPI type of a spec field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Boolean,
    Integer,
    Number,
    String,
}

impl FieldType {
    fn from_schema(value: Option<&str>) -> Self {
        match value {
            Some("boolean") => FieldType::Boolean,
            Some("integer") => FieldType::Integer,
            Some("number") => FieldType::Number,
            _ => FieldType::String,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Boolean => "boolean",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::String => "string",
        };
        f.write_str(name)
    }
}

/// A top-level property of the claim spec
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    /// Schema default, rendered as text
    pub default: Option<String>,
}

impl Field {
    /// The schema default as a typed value
    pub fn default_value(&self) -> Result<Option<JsonValue>> {
        self.default
            .as_deref()
            .map(|raw| self.parse_value(raw))
            .transpose()
    }

    /// Convert user input to this field's type
    pub fn parse_value(&self, input: &str) -> Result<JsonValue> {
        let input = input.trim();
        let invalid = || {
            KubeError::InvalidManifest(format!(
                "'{}' is not a valid {} for field '{}'",
                input, self.field_type, self.name
            ))
        };

        match self.field_type {
            FieldType::Boolean => input
                .parse::<bool>()
                .map(JsonValue::Bool)
                .map_err(|_| invalid()),
            FieldType::Integer => input
                .parse::<i64>()
                .map(|n| JsonValue::Number(n.into()))
                .map_err(|_| invalid()),
            FieldType::Number => input
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .ok_or_else(invalid),
            FieldType::String => Ok(JsonValue::String(input.to_string())),
        }
    }
}

/// Fields of `spec` in the first version of an XRD's schema
///
/// Fields are returned sorted by name.
pub fn spec_fields(xrd: &DynamicObject) -> Result<Vec<Field>> {
    let versions = xrd
        .field(&["spec", "versions"])
        .and_then(JsonValue::as_array)
        .ok_or_else(|| {
            KubeError::InvalidManifest(format!("XRD '{}' has no spec.versions", xrd.name()))
        })?;

    let spec_schema = versions
        .first()
        .and_then(|v| v.pointer("/schema/openAPIV3Schema/properties/spec"))
        .ok_or_else(|| {
            KubeError::InvalidManifest(format!(
                "XRD '{}' has no openAPIV3Schema for spec",
                xrd.name()
            ))
        })?;

    let required: Vec<&str> = spec_schema
        .get("required")
        .and_then(JsonValue::as_array)
        .map(|names| names.iter().filter_map(JsonValue::as_str).collect())
        .unwrap_or_default();

    let Some(properties) = spec_schema.get("properties").and_then(JsonValue::as_object) else {
        return Ok(Vec::new());
    };

    Ok(properties
        .iter()
        .map(|(name, schema)| Field {
            name: name.clone(),
            field_type: FieldType::from_schema(schema.get("type").and_then(JsonValue::as_str)),
            required: required.contains(&name.as_str()),
            default: schema.get("default").map(|d| match d {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            }),
        })
        .collect())
}
