//! Accessors for the well-known paths of schemaless cluster objects.
//!
//! Objects are plain `serde_json::Value` trees; nothing in the core binds
//! to concrete per-kind types. Missing fields read as empty strings so
//! identity extraction never fails.

use serde_json::Value;

pub fn kind(o: &Value) -> &str {
    o.get("kind").and_then(Value::as_str).unwrap_or("")
}

pub fn api_version(o: &Value) -> &str {
    o.get("apiVersion").and_then(Value::as_str).unwrap_or("")
}

/// Group half of `apiVersion`; empty for the core group (`v1`).
pub fn group(o: &Value) -> &str {
    match api_version(o).split_once('/') {
        Some((g, _)) => g,
        None => "",
    }
}

/// Version half of `apiVersion`.
pub fn version(o: &Value) -> &str {
    let av = api_version(o);
    match av.split_once('/') {
        Some((_, v)) => v,
        None => av,
    }
}

pub fn group_kind(o: &Value) -> crate::GroupKind {
    crate::GroupKind::new(group(o), kind(o))
}

pub fn name(o: &Value) -> &str {
    metadata_str(o, "name")
}

pub fn namespace(o: &Value) -> &str {
    metadata_str(o, "namespace")
}

pub fn uid(o: &Value) -> &str {
    metadata_str(o, "uid")
}

fn metadata_str<'a>(o: &'a Value, field: &str) -> &'a str {
    o.get("metadata")
        .and_then(|m| m.get(field))
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// Set or clear the object's namespace. An empty namespace removes the
/// field so cluster-scoped objects stay canonical.
pub fn set_namespace(o: &mut Value, ns: &str) {
    let meta = match o.as_object_mut() {
        Some(root) => root
            .entry("metadata")
            .or_insert_with(|| Value::Object(serde_json::Map::new())),
        None => return,
    };
    if let Some(m) = meta.as_object_mut() {
        if ns.is_empty() {
            m.remove("namespace");
        } else {
            m.insert("namespace".into(), Value::String(ns.to_string()));
        }
    }
}

pub fn label<'a>(o: &'a Value, key: &str) -> &'a str {
    o.get("metadata")
        .and_then(|m| m.get("labels"))
        .and_then(|l| l.get(key))
        .and_then(Value::as_str)
        .unwrap_or("")
}

pub fn annotation<'a>(o: &'a Value, key: &str) -> &'a str {
    o.get("metadata")
        .and_then(|m| m.get("annotations"))
        .and_then(|a| a.get(key))
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// The owning application's name, per the configured instance label key.
pub fn app_instance_label<'a>(o: &'a Value, key: &str) -> &'a str {
    label(o, key)
}

/// Nested string lookup, e.g. `nested_str(o, &["status", "phase"])`.
pub fn nested_str<'a>(o: &'a Value, path: &[&str]) -> Option<&'a str> {
    nested(o, path).and_then(Value::as_str)
}

pub fn nested_i64(o: &Value, path: &[&str]) -> Option<i64> {
    nested(o, path).and_then(Value::as_i64)
}

pub fn nested_bool(o: &Value, path: &[&str]) -> Option<bool> {
    nested(o, path).and_then(Value::as_bool)
}

fn nested<'a>(o: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = o;
    for p in path {
        cur = cur.get(p)?;
    }
    Some(cur)
}

/// `spec.replicas` when present; workload health rules treat absence as 1.
pub fn replicas(o: &Value) -> Option<i64> {
    nested_i64(o, &["spec", "replicas"])
}

/// Find a `status.conditions` entry by its `type`.
pub fn status_condition<'a>(o: &'a Value, cond_type: &str) -> Option<&'a Value> {
    o.get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(Value::as_array)?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(cond_type))
}
