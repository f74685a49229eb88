//! Manifest decoding: text -> generic document -> group/version/kind identity.

use kube::core::{DynamicObject, GroupVersionKind};
use serde::Deserialize;
use serde_json::Value as Json;

use crate::config::ManifestLimits;
use crate::error::{DecodeError, KindLookupError};
use crate::kinds::{self, Kind};

/// One decoded resource definition. Read-only once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    doc: Json,
    gvk: GroupVersionKind,
    name: Option<String>,
    namespace: Option<String>,
}

impl Manifest {
    /// Parse a single-document manifest with default limits.
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        Self::parse_with(text, &ManifestLimits::default())
    }

    pub fn parse_with(text: &str, limits: &ManifestLimits) -> Result<Self, DecodeError> {
        Self::from_value(parse_document(text, limits)?)
    }

    /// Parse a `---` separated stream. Empty documents are skipped.
    pub fn parse_all(text: &str, limits: &ManifestLimits) -> Result<Vec<Self>, DecodeError> {
        check_size(text, limits)?;
        let mut out = Vec::new();
        for de in serde_yaml::Deserializer::from_str(text) {
            let val = serde_yaml::Value::deserialize(de)?;
            if val.is_null() {
                continue;
            }
            let json = serde_json::to_value(val)?;
            check_nodes(&json, limits)?;
            out.push(Self::from_value(json)?);
        }
        if out.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(out)
    }

    /// Build from an already-parsed generic document.
    pub fn from_value(doc: Json) -> Result<Self, DecodeError> {
        if !doc.is_object() {
            return Err(DecodeError::NotAMapping);
        }
        let gvk = gvk_of(&doc)?;
        let name = doc.pointer("/metadata/name").and_then(|v| v.as_str()).map(|s| s.to_string());
        let namespace = doc
            .pointer("/metadata/namespace")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        Ok(Self { doc, gvk, name, namespace })
    }

    pub fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    pub fn kind(&self) -> &str {
        &self.gvk.kind
    }

    pub fn api_version(&self) -> String {
        self.gvk.api_version()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Declared namespace; an empty string counts as unset.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn document(&self) -> &Json {
        &self.doc
    }

    /// Registry entry for this manifest's kind, if recognized.
    pub fn recognized_kind(&self) -> Option<Kind> {
        kinds::lookup(&self.gvk.kind)
    }

    pub fn to_dynamic_object(&self) -> Result<DynamicObject, DecodeError> {
        Ok(serde_json::from_value(self.doc.clone())?)
    }
}

/// Parse manifest text into a generic mapping, enforcing size and node budgets.
pub fn parse_document(text: &str, limits: &ManifestLimits) -> Result<Json, DecodeError> {
    check_size(text, limits)?;
    if text.trim().is_empty() {
        return Err(DecodeError::Empty);
    }
    let val: serde_yaml::Value = serde_yaml::from_str(text)?;
    if val.is_null() {
        return Err(DecodeError::Empty);
    }
    let json = serde_json::to_value(val)?;
    if !json.is_object() {
        return Err(DecodeError::NotAMapping);
    }
    check_nodes(&json, limits)?;
    Ok(json)
}

/// Read the `kind` field and check it against the registry, under default limits.
///
/// A missing kind and a kind outside the registry are both NotFound-class.
pub fn extract_kind(text: &str) -> Result<Kind, KindLookupError> {
    extract_kind_with(text, &ManifestLimits::default())
}

/// [`extract_kind`] with explicit size and node limits.
pub fn extract_kind_with(text: &str, limits: &ManifestLimits) -> Result<Kind, KindLookupError> {
    let doc = parse_document(text, limits)?;
    let kind = doc.get("kind").and_then(|v| v.as_str()).ok_or(KindLookupError::Missing)?;
    kinds::lookup(kind).ok_or_else(|| KindLookupError::Unrecognized(kind.to_string()))
}

/// Parse `apiVersion` and `kind` without consulting the registry, under default limits.
pub fn extract_gvk(text: &str) -> Result<GroupVersionKind, DecodeError> {
    extract_gvk_with(text, &ManifestLimits::default())
}

pub fn extract_gvk_with(text: &str, limits: &ManifestLimits) -> Result<GroupVersionKind, DecodeError> {
    gvk_of(&parse_document(text, limits)?)
}

fn gvk_of(doc: &Json) -> Result<GroupVersionKind, DecodeError> {
    let api_version = doc
        .get("apiVersion")
        .and_then(|v| v.as_str())
        .ok_or(DecodeError::MissingField("apiVersion"))?;
    let kind = doc
        .get("kind")
        .and_then(|v| v.as_str())
        .filter(|k| !k.is_empty())
        .ok_or(DecodeError::MissingField("kind"))?;
    let (group, version) = split_api_version(api_version)?;
    Ok(GroupVersionKind::gvk(group, version, kind))
}

fn split_api_version(api_version: &str) -> Result<(&str, &str), DecodeError> {
    let invalid = || DecodeError::InvalidApiVersion(api_version.to_string());
    match api_version.split_once('/') {
        None if !api_version.is_empty() => Ok(("", api_version)),
        None => Err(invalid()),
        Some((g, v)) if !g.is_empty() && !v.is_empty() && !v.contains('/') => Ok((g, v)),
        Some(_) => Err(invalid()),
    }
}

/// `v1/Kind` for the core group, `group/v1/Kind` otherwise.
pub fn gvk_key(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        format!("{}/{}", gvk.version, gvk.kind)
    } else {
        format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
    }
}

pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind, DecodeError> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind::gvk("", version, kind)),
        [group, version, kind] if !group.is_empty() && !version.is_empty() && !kind.is_empty() => {
            Ok(GroupVersionKind::gvk(group, version, kind))
        }
        _ => Err(DecodeError::InvalidGvkKey(key.to_string())),
    }
}

/// Drop server-populated fields before display or comparison.
pub fn strip_server_fields(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
        meta.remove("resourceVersion");
        meta.remove("generation");
        meta.remove("creationTimestamp");
    }
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
    v
}

fn check_size(text: &str, limits: &ManifestLimits) -> Result<(), DecodeError> {
    if text.len() > limits.max_bytes {
        return Err(DecodeError::TooLarge { size: text.len(), max: limits.max_bytes });
    }
    Ok(())
}

fn check_nodes(v: &Json, limits: &ManifestLimits) -> Result<(), DecodeError> {
    if node_budget_exceeded(v, limits.max_nodes) {
        return Err(DecodeError::TooComplex { max: limits.max_nodes });
    }
    Ok(())
}

fn node_budget_exceeded(v: &Json, max: usize) -> bool {
    // bail out as soon as the running count passes max
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur > max {
            return;
        }
        *cur += 1;
        match v {
            Json::Object(map) => {
                for vv in map.values() {
                    if *cur > max {
                        break;
                    }
                    walk(vv, cur, max);
                }
            }
            Json::Array(arr) => {
                for vv in arr {
                    if *cur > max {
                        break;
                    }
                    walk(vv, cur, max);
                }
            }
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count > max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_api_version_core_and_grouped() {
        assert_eq!(split_api_version("v1").unwrap(), ("", "v1"));
        assert_eq!(split_api_version("apps/v1").unwrap(), ("apps", "v1"));
        assert_eq!(split_api_version("monitoring.coreos.com/v1").unwrap(), ("monitoring.coreos.com", "v1"));
        for bad in ["", "/v1", "apps/", "a/b/c"] {
            assert!(matches!(split_api_version(bad), Err(DecodeError::InvalidApiVersion(_))), "{bad:?}");
        }
    }

    #[test]
    fn node_budget_counts_nested_values() {
        let v = serde_json::json!({"a": [1, 2, {"b": 3}]});
        // root, a, 1, 2, {b}, 3
        assert!(!node_budget_exceeded(&v, 6));
        assert!(node_budget_exceeded(&v, 5));
    }

    #[test]
    fn strip_server_fields_prunes_common_fields() {
        let v = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "x",
                "namespace": "ns",
                "managedFields": [ {"foo": "bar"} ],
                "resourceVersion": "123",
                "generation": 5,
                "creationTimestamp": "2020-01-01T00:00:00Z"
            },
            "status": { "obs": true },
            "data": { "k": "v" }
        });
        let pruned = strip_server_fields(v);
        let meta = pruned.get("metadata").unwrap().as_object().unwrap();
        assert!(!meta.contains_key("managedFields"));
        assert!(!meta.contains_key("resourceVersion"));
        assert!(!meta.contains_key("generation"));
        assert!(!meta.contains_key("creationTimestamp"));
        assert_eq!(meta.get("name").and_then(|v| v.as_str()), Some("x"));
        assert!(!pruned.as_object().unwrap().contains_key("status"));
    }

    #[test]
    fn gvk_keys_round_trip_shape() {
        let core = parse_gvk_key("v1/ConfigMap").unwrap();
        assert_eq!((core.group.as_str(), core.version.as_str(), core.kind.as_str()), ("", "v1", "ConfigMap"));
        assert_eq!(gvk_key(&core), "v1/ConfigMap");
        let apps = parse_gvk_key("apps/v1/Deployment").unwrap();
        assert_eq!(apps.group, "apps");
        assert_eq!(gvk_key(&apps), "apps/v1/Deployment");
        for bad in ["invalid", "", "a/b/c/d", "v1/", "/v1/Kind"] {
            assert!(parse_gvk_key(bad).is_err(), "{bad:?}");
        }
    }
}
