//! Schema-free objects
//!
//! Objects are kube's [`DynamicObject`]: typed metadata plus an untyped JSON
//! body. [`ObjectExt`] adds the accessors the workflows need, and [`decode`]
//! turns a raw YAML or JSON document into an object and its kind.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::{KubeError, Result};
use crate::kinds::{KindRef, ResourceRef};

/// Label marking objects created by this tool
pub const INSTALLED_BY_LABEL: &str = "platformnow.io/installed-by";
/// Value of [`INSTALLED_BY_LABEL`]
pub const INSTALLED_BY_VALUE: &str = "lash";
/// Label carrying the catalog package an object belongs to
pub const PACKAGE_NAME_LABEL: &str = "platformnow.io/package-name";

/// Accessors over [`DynamicObject`]
pub trait ObjectExt {
    /// Object name, empty if unset
    fn name(&self) -> &str;

    /// Object namespace
    fn namespace(&self) -> Option<&str>;

    /// Value of a label
    fn label(&self, key: &str) -> Option<&str>;

    /// Set a label, keeping existing ones
    fn set_label(&mut self, key: &str, value: &str);

    /// Finalizers, empty if unset
    fn finalizers(&self) -> &[String];

    /// Whether any finalizer is still pending
    fn has_finalizers(&self) -> bool {
        !self.finalizers().is_empty()
    }

    /// Whether deletion was requested but is blocked
    fn is_terminating(&self) -> bool;

    /// Kind reference from the object's own type metadata
    fn kind_ref(&self) -> Option<KindRef>;

    /// Nested field of the body, e.g. `&["spec", "forProvider"]`
    fn field(&self, path: &[&str]) -> Option<&JsonValue>;

    /// Set a nested field of the body, creating intermediate maps
    fn set_field(&mut self, path: &[&str], value: JsonValue) -> Result<()>;

    /// Reference to this object under the given kind
    fn resource_ref(&self, kind: &KindRef) -> ResourceRef;
}

impl ObjectExt for DynamicObject {
    fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    fn set_label(&mut self, key: &str, value: &str) {
        self.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
    }

    fn finalizers(&self) -> &[String] {
        self.metadata.finalizers.as_deref().unwrap_or_default()
    }

    fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    fn kind_ref(&self) -> Option<KindRef> {
        self.types.as_ref().map(KindRef::from_type_meta)
    }

    fn field(&self, path: &[&str]) -> Option<&JsonValue> {
        path.iter()
            .try_fold(&self.data, |value, key| value.as_object()?.get(*key))
    }

    fn set_field(&mut self, path: &[&str], value: JsonValue) -> Result<()> {
        set_nested(&mut self.data, path, value)
    }

    fn resource_ref(&self, kind: &KindRef) -> ResourceRef {
        ResourceRef::new(
            kind.clone(),
            self.name(),
            self.namespace().map(str::to_string),
        )
    }
}

/// Minimal object with a name and optional namespace
pub fn new_object(name: &str, namespace: Option<&str>) -> DynamicObject {
    DynamicObject {
        types: None,
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: namespace.map(str::to_string),
            ..Default::default()
        },
        data: JsonValue::Object(serde_json::Map::new()),
    }
}

/// Set a nested value by path, replacing scalars on the way with maps
pub(crate) fn set_nested(value: &mut JsonValue, path: &[&str], new_value: JsonValue) -> Result<()> {
    let Some((key, remaining)) = path.split_first() else {
        *value = new_value;
        return Ok(());
    };

    if !value.is_object() {
        *value = JsonValue::Object(serde_json::Map::new());
    }

    let map = value.as_object_mut().ok_or_else(|| {
        KubeError::Serialization(format!("cannot set '{}' on a non-object value", key))
    })?;

    if remaining.is_empty() {
        map.insert((*key).to_string(), new_value);
        Ok(())
    } else {
        let entry = map
            .entry((*key).to_string())
            .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
        set_nested(entry, remaining, new_value)
    }
}

/// Parse one YAML or JSON document into an object and its kind
///
/// Documents that are empty, contain more than one object, or lack
/// `apiVersion`, `kind` or `metadata.name` are rejected.
pub fn decode(raw: &[u8]) -> Result<(DynamicObject, KindRef)> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_slice(raw) {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| KubeError::InvalidManifest(format!("YAML parse error: {}", e)))?;
        if !value.is_null() {
            documents.push(value);
        }
    }

    let value = match documents.len() {
        1 => documents.remove(0),
        0 => return Err(KubeError::InvalidManifest("document is empty".to_string())),
        n => {
            return Err(KubeError::InvalidManifest(format!(
                "expected a single document, found {}",
                n
            )));
        }
    };

    let obj: DynamicObject = serde_yaml::from_value(value)
        .map_err(|e| KubeError::InvalidManifest(format!("not a Kubernetes object: {}", e)))?;

    let types = obj
        .types
        .as_ref()
        .filter(|t| !t.api_version.is_empty() && !t.kind.is_empty())
        .ok_or_else(|| {
            KubeError::InvalidManifest("resource missing apiVersion or kind".to_string())
        })?;
    let kind = KindRef::from_type_meta(types);

    if obj.name().is_empty() {
        return Err(KubeError::InvalidManifest(format!(
            "{} is missing metadata.name",
            kind.kind
        )));
    }

    Ok((obj, kind))
}
