//! Field-level semantic comparison of desired and live objects.
//!
//! Both sides pass through a normalizer before comparison so that
//! server-populated noise and user-ignored paths cannot masquerade as
//! drift. Normalization is deterministic and idempotent.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use serde_json::Value;

use rudder_api::ResourceOverride;
use rudder_core::{obj, GroupKind, IgnoreDifference};

/// Outcome of comparing one aligned slot. `modified` is the authoritative
/// needs-apply bit.
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    pub modified: bool,
    pub normalized_target: Option<Value>,
    pub normalized_live: Option<Value>,
    /// Normalized target merged over normalized live: what the object is
    /// expected to look like after an apply. `None` for prune slots.
    pub predicted_live: Option<Value>,
}

/// Makes an object semantically comparable.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, obj: &mut Value) -> Result<()>;
}

/// Strips runtime fields only; applies no ignore rules.
pub struct NoopNormalizer;

impl Normalizer for NoopNormalizer {
    fn normalize(&self, o: &mut Value) -> Result<()> {
        remove_runtime_fields(o);
        sort_merge_lists(o);
        Ok(())
    }
}

struct NormalizerRule {
    group: String,
    kind: String,
    name: String,
    namespace: String,
    pointers: Vec<String>,
}

impl NormalizerRule {
    fn matches(&self, o: &Value) -> bool {
        let field_matches = |want: &str, have: &str| want.is_empty() || want == have;
        field_matches(&self.group, obj::group(o))
            && field_matches(&self.kind, obj::kind(o))
            && field_matches(&self.name, obj::name(o))
            && field_matches(&self.namespace, obj::namespace(o))
    }
}

/// Normalizer combining per-application ignore rules with global
/// per-group/kind overrides.
pub struct IgnoreNormalizer {
    rules: Vec<NormalizerRule>,
}

impl IgnoreNormalizer {
    pub fn new(
        ignore: &[IgnoreDifference],
        overrides: &HashMap<GroupKind, ResourceOverride>,
    ) -> Result<Self> {
        let mut rules = Vec::new();
        for ig in ignore {
            rules.push(NormalizerRule {
                group: ig.group.clone(),
                kind: ig.kind.clone(),
                name: ig.name.clone(),
                namespace: ig.namespace.clone(),
                pointers: validated_pointers(&ig.json_pointers)?,
            });
        }
        for (gk, ov) in overrides {
            if ov.ignore_differences.is_empty() {
                continue;
            }
            rules.push(NormalizerRule {
                group: gk.group.clone(),
                kind: gk.kind.clone(),
                name: String::new(),
                namespace: String::new(),
                pointers: validated_pointers(&ov.ignore_differences)?,
            });
        }
        Ok(Self { rules })
    }
}

fn validated_pointers(pointers: &[String]) -> Result<Vec<String>> {
    for p in pointers {
        if !p.starts_with('/') {
            bail!("invalid JSON pointer {p:?}: must start with '/'");
        }
    }
    Ok(pointers.to_vec())
}

impl Normalizer for IgnoreNormalizer {
    fn normalize(&self, o: &mut Value) -> Result<()> {
        remove_runtime_fields(o);
        for rule in &self.rules {
            if !rule.matches(o) {
                continue;
            }
            for ptr in &rule.pointers {
                remove_pointer(o, ptr);
            }
        }
        sort_merge_lists(o);
        Ok(())
    }
}

/// Strip fields the server populates at runtime so they never count as
/// drift: object status, bookkeeping metadata, and the last-applied
/// annotation. Label/annotation maps emptied by the strip are dropped so
/// both sides stay canonical.
pub fn remove_runtime_fields(o: &mut Value) {
    let Some(root) = o.as_object_mut() else { return };
    root.remove("status");
    let Some(meta) = root.get_mut("metadata").and_then(Value::as_object_mut) else {
        return;
    };
    for field in [
        "managedFields",
        "resourceVersion",
        "generation",
        "creationTimestamp",
        "uid",
        "selfLink",
    ] {
        meta.remove(field);
    }
    if let Some(annotations) = meta.get_mut("annotations").and_then(Value::as_object_mut) {
        annotations.remove("kubectl.kubernetes.io/last-applied-configuration");
    }
    for map in ["annotations", "labels"] {
        if meta.get(map).and_then(Value::as_object).is_some_and(|m| m.is_empty()) {
            meta.remove(map);
        }
    }
}

/// Remove the field addressed by an RFC 6901 JSON Pointer; absent paths
/// are a no-op.
pub fn remove_pointer(o: &mut Value, pointer: &str) {
    let segments: Vec<String> = pointer
        .split('/')
        .skip(1)
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect();
    let Some((last, parents)) = segments.split_last() else { return };
    let mut cur = o;
    for seg in parents {
        cur = match cur {
            Value::Object(m) => match m.get_mut(seg.as_str()) {
                Some(v) => v,
                None => return,
            },
            Value::Array(a) => match seg.parse::<usize>().ok().and_then(|i| a.get_mut(i)) {
                Some(v) => v,
                None => return,
            },
            _ => return,
        };
    }
    match cur {
        Value::Object(m) => {
            m.remove(last.as_str());
        }
        Value::Array(a) => {
            if let Ok(i) = last.parse::<usize>() {
                if i < a.len() {
                    a.remove(i);
                }
            }
        }
        _ => {}
    }
}

// Merge keys recognized for list-of-map fields, in lookup order.
static MERGE_KEYS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["name", "containerPort", "port", "mountPath", "devicePath", "ip", "topologyKey"]);

/// Canonicalize the order of lists whose elements are keyed maps, so two
/// trees that differ only in list order compare equal.
pub fn sort_merge_lists(o: &mut Value) {
    match o {
        Value::Object(m) => {
            for (_, v) in m.iter_mut() {
                sort_merge_lists(v);
            }
        }
        Value::Array(a) => {
            for v in a.iter_mut() {
                sort_merge_lists(v);
            }
            if let Some(key) = merge_key_for(a) {
                a.sort_by_cached_key(|e| scalar_string(e.get(key)));
            }
        }
        _ => {}
    }
}

fn merge_key_for(a: &[Value]) -> Option<&'static str> {
    if a.len() < 2 {
        return None;
    }
    MERGE_KEYS.iter().copied().find(|k| {
        a.iter().all(|e| {
            matches!(
                e.get(k),
                Some(Value::String(_)) | Some(Value::Number(_)) | Some(Value::Bool(_))
            )
        })
    })
}

fn scalar_string(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Compare one slot. A one-sided slot is always modified: it needs either
/// a create or a prune.
pub fn diff(
    target: Option<&Value>,
    live: Option<&Value>,
    normalizer: &dyn Normalizer,
) -> Result<DiffResult> {
    let normalized = |v: Option<&Value>| -> Result<Option<Value>> {
        match v {
            Some(v) => {
                let mut n = v.clone();
                normalizer.normalize(&mut n)?;
                Ok(Some(n))
            }
            None => Ok(None),
        }
    };
    let normalized_target = normalized(target)?;
    let normalized_live = normalized(live)?;
    let (modified, predicted_live) = match (&normalized_target, &normalized_live) {
        (Some(t), Some(l)) => (t != l, Some(merge_over(l, t))),
        (Some(t), None) => (true, Some(t.clone())),
        (None, Some(_)) => (true, None),
        (None, None) => (false, None),
    };
    Ok(DiffResult { modified, normalized_target, normalized_live, predicted_live })
}

/// Compare aligned slot arrays; lengths must match.
pub fn diff_array(
    targets: &[Option<Value>],
    lives: &[Option<Value>],
    normalizer: &dyn Normalizer,
) -> Result<Vec<DiffResult>> {
    if targets.len() != lives.len() {
        bail!("slot arrays differ in length: {} vs {}", targets.len(), lives.len());
    }
    targets
        .iter()
        .zip(lives.iter())
        .map(|(t, l)| diff(t.as_ref(), l.as_ref(), normalizer))
        .collect()
}

// Recursive merge with target precedence: live keys absent from the
// target survive, arrays are replaced wholesale.
fn merge_over(live: &Value, target: &Value) -> Value {
    match (live, target) {
        (Value::Object(l), Value::Object(t)) => {
            let mut out = l.clone();
            for (k, tv) in t {
                let merged = match l.get(k) {
                    Some(lv) => merge_over(lv, tv),
                    None => tv.clone(),
                };
                out.insert(k.clone(), merged);
            }
            Value::Object(out)
        }
        (_, t) => t.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment(replicas: i64) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "n"},
            "spec": {"replicas": replicas}
        })
    }

    #[test]
    fn runtime_fields_do_not_count_as_drift() {
        let target = deployment(3);
        let mut live = deployment(3);
        live["status"] = json!({"readyReplicas": 3});
        live["metadata"]["uid"] = json!("6a9c7f2e-0000-0000-0000-000000000000");
        live["metadata"]["resourceVersion"] = json!("12345");
        live["metadata"]["creationTimestamp"] = json!("2024-01-01T00:00:00Z");
        let res = diff(Some(&target), Some(&live), &NoopNormalizer).unwrap();
        assert!(!res.modified);
    }

    #[test]
    fn spec_drift_is_modified() {
        let target = deployment(3);
        let live = deployment(2);
        let res = diff(Some(&target), Some(&live), &NoopNormalizer).unwrap();
        assert!(res.modified);
    }

    #[test]
    fn one_sided_slots_are_modified() {
        let t = deployment(3);
        let res = diff(Some(&t), None, &NoopNormalizer).unwrap();
        assert!(res.modified);
        assert!(res.predicted_live.is_some());

        let res = diff(None, Some(&t), &NoopNormalizer).unwrap();
        assert!(res.modified);
        assert!(res.predicted_live.is_none());
    }

    #[test]
    fn ignore_rule_masks_configured_path() {
        let ignore = vec![IgnoreDifference {
            group: "apps".into(),
            kind: "Deployment".into(),
            json_pointers: vec!["/spec/replicas".into()],
            ..Default::default()
        }];
        let n = IgnoreNormalizer::new(&ignore, &HashMap::new()).unwrap();
        let res = diff(Some(&deployment(3)), Some(&deployment(2)), &n).unwrap();
        assert!(!res.modified);
    }

    #[test]
    fn ignore_rule_scoping_respects_kind() {
        let ignore = vec![IgnoreDifference {
            kind: "StatefulSet".into(),
            json_pointers: vec!["/spec/replicas".into()],
            ..Default::default()
        }];
        let n = IgnoreNormalizer::new(&ignore, &HashMap::new()).unwrap();
        let res = diff(Some(&deployment(3)), Some(&deployment(2)), &n).unwrap();
        assert!(res.modified, "rule for another kind must not apply");
    }

    #[test]
    fn override_rules_apply_by_group_kind() {
        let mut overrides = HashMap::new();
        overrides.insert(
            GroupKind::new("apps", "Deployment"),
            ResourceOverride {
                ignore_differences: vec!["/spec/replicas".into()],
                health: None,
            },
        );
        let n = IgnoreNormalizer::new(&[], &overrides).unwrap();
        let res = diff(Some(&deployment(1)), Some(&deployment(9)), &n).unwrap();
        assert!(!res.modified);
    }

    #[test]
    fn invalid_pointer_is_rejected_at_construction() {
        let ignore = vec![IgnoreDifference {
            kind: "Deployment".into(),
            json_pointers: vec!["spec.replicas".into()],
            ..Default::default()
        }];
        assert!(IgnoreNormalizer::new(&ignore, &HashMap::new()).is_err());
    }

    #[test]
    fn normalize_is_idempotent() {
        let ignore = vec![IgnoreDifference {
            kind: "Deployment".into(),
            json_pointers: vec!["/spec/template/spec/serviceAccountName".into()],
            ..Default::default()
        }];
        let n = IgnoreNormalizer::new(&ignore, &HashMap::new()).unwrap();
        let mut once = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "n", "labels": {}},
            "spec": {
                "replicas": 2,
                "template": {"spec": {
                    "serviceAccountName": "default",
                    "containers": [
                        {"name": "b", "image": "b:1"},
                        {"name": "a", "image": "a:1"}
                    ]
                }}
            },
            "status": {"observedGeneration": 4}
        });
        n.normalize(&mut once).unwrap();
        let mut twice = once.clone();
        n.normalize(&mut twice).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn keyed_lists_compare_order_insensitively() {
        let mk = |order: [&str; 2]| {
            json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {"name": "p", "namespace": "n"},
                "spec": {"containers": [
                    {"name": order[0], "image": "img"},
                    {"name": order[1], "image": "img"}
                ]}
            })
        };
        let res = diff(Some(&mk(["a", "b"])), Some(&mk(["b", "a"])), &NoopNormalizer).unwrap();
        assert!(!res.modified);
    }

    #[test]
    fn unkeyed_lists_stay_order_sensitive() {
        let mk = |order: [&str; 2]| {
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "m", "namespace": "n"},
                "data": {"items": [order[0], order[1]]}
            })
        };
        let res = diff(Some(&mk(["a", "b"])), Some(&mk(["b", "a"])), &NoopNormalizer).unwrap();
        assert!(res.modified);
    }

    #[test]
    fn predicted_live_keeps_server_fields_and_applies_target() {
        let target = deployment(3);
        let mut live = deployment(2);
        live["spec"]["progressDeadlineSeconds"] = json!(600);
        let res = diff(Some(&target), Some(&live), &NoopNormalizer).unwrap();
        let predicted = res.predicted_live.unwrap();
        assert_eq!(predicted["spec"]["replicas"], 3);
        assert_eq!(predicted["spec"]["progressDeadlineSeconds"], 600);
    }

    #[test]
    fn remove_pointer_handles_escapes_and_indices() {
        let mut o = json!({
            "metadata": {"annotations": {"a/b": "x", "keep": "y"}},
            "spec": {"items": [1, 2, 3]}
        });
        remove_pointer(&mut o, "/metadata/annotations/a~1b");
        remove_pointer(&mut o, "/spec/items/1");
        remove_pointer(&mut o, "/missing/path");
        assert_eq!(o["metadata"]["annotations"], json!({"keep": "y"}));
        assert_eq!(o["spec"]["items"], json!([1, 3]));
    }

    #[test]
    fn diff_array_rejects_length_mismatch() {
        assert!(diff_array(&[None], &[], &NoopNormalizer).is_err());
    }
}
