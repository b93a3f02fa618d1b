//! Turns rendered manifest text into a normalized desired-object list:
//! YAML stream splitting, best-effort parsing, namespace imputation and
//! last-wins deduplication.

#![forbid(unsafe_code)]

use std::collections::hash_map::Entry;

use anyhow::{anyhow, Error, Result};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::warn;

use rudder_core::{obj, AppCondition, ConditionType, ResourceInfoProvider, ResourceKey};

/// Split one text blob into YAML documents and parse each into a
/// schemaless object. Parsing is best-effort: the first failure is
/// retained while remaining documents are still processed. Empty
/// documents are skipped silently.
pub fn split_yaml(text: &str) -> (Vec<Value>, Option<Error>) {
    let mut objs = Vec::new();
    let mut first_err: Option<Error> = None;
    for doc in split_documents(text) {
        match parse_document(&doc) {
            Ok(Some(o)) => objs.push(o),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "skipping unparsable manifest document");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }
    (objs, first_err)
}

// A separator is any line beginning with `---`; the leading marker of the
// first document therefore flushes an empty (skipped) document.
fn split_documents(text: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut cur = String::new();
    for line in text.lines() {
        if line.starts_with("---") {
            docs.push(std::mem::take(&mut cur));
        } else {
            cur.push_str(line);
            cur.push('\n');
        }
    }
    docs.push(cur);
    docs
}

fn parse_document(doc: &str) -> Result<Option<Value>> {
    if doc.trim().is_empty() {
        return Ok(None);
    }
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(doc).map_err(|e| anyhow!("failed to unmarshal manifest: {e}"))?;
    let json = serde_json::to_value(yaml)?;
    match json {
        Value::Null => Ok(None),
        Value::Object(ref m) if m.is_empty() => Ok(None),
        Value::Object(_) => Ok(Some(json)),
        other => Err(anyhow!("manifest document is not an object: {other}")),
    }
}

/// Parse every blob of a manifest response. Partial failures surface as a
/// `ComparisonError` condition; only a stream where nothing parsed at all
/// is a hard error.
pub fn parse_manifests(blobs: &[String]) -> Result<(Vec<Value>, Vec<AppCondition>)> {
    let mut objs = Vec::new();
    let mut first_err: Option<Error> = None;
    let mut failed = 0usize;
    for blob in blobs {
        let (mut parsed, err) = split_yaml(blob);
        objs.append(&mut parsed);
        if let Some(e) = err {
            failed += 1;
            if first_err.is_none() {
                first_err = Some(e);
            }
        }
    }
    match first_err {
        Some(e) if objs.is_empty() => Err(e),
        Some(e) => {
            let cond = AppCondition::new(
                ConditionType::ComparisonError,
                format!("{failed} manifest blob(s) had unparsable documents; first error: {e}"),
            );
            Ok((objs, vec![cond]))
        }
        None => Ok((objs, Vec::new())),
    }
}

/// Impute namespaces and collapse duplicate identities, keeping the last
/// occurrence in document order. Emits a `RepeatedResourceWarning` per
/// duplicated key and a `ComparisonError` when the scope of a kind could
/// not be determined (such kinds are treated as cluster-scoped).
pub fn dedup_targets(
    namespace: &str,
    objs: Vec<Value>,
    info: &dyn ResourceInfoProvider,
) -> (Vec<Value>, Vec<AppCondition>) {
    let mut conditions = Vec::new();
    let mut scope_failures: Vec<String> = Vec::new();

    let mut order: Vec<ResourceKey> = Vec::new();
    let mut by_key: FxHashMap<ResourceKey, (Value, usize)> = FxHashMap::default();

    for mut o in objs {
        let gk = obj::group_kind(&o);
        match info.is_namespaced(&gk) {
            Ok(false) => obj::set_namespace(&mut o, ""),
            Ok(true) => {
                if obj::namespace(&o).is_empty() {
                    obj::set_namespace(&mut o, namespace);
                }
            }
            Err(e) => {
                // Unknown scope falls back to cluster-scoped; the condition
                // makes a possible mis-scoping observable.
                let gk_s = gk.to_string();
                if !scope_failures.contains(&gk_s) {
                    warn!(group_kind = %gk_s, error = %e, "scope lookup failed; assuming cluster-scoped");
                    scope_failures.push(gk_s);
                }
                obj::set_namespace(&mut o, "");
            }
        }
        let key = ResourceKey::from_obj(&o);
        match by_key.entry(key) {
            Entry::Occupied(mut e) => {
                let slot = e.get_mut();
                slot.0 = o;
                slot.1 += 1;
            }
            Entry::Vacant(e) => {
                order.push(e.key().clone());
                e.insert((o, 1));
            }
        }
    }

    for gk in scope_failures {
        conditions.push(AppCondition::new(
            ConditionType::ComparisonError,
            format!("Could not determine scope of {gk}; treating it as cluster-scoped"),
        ));
    }

    let mut result = Vec::with_capacity(order.len());
    for key in order {
        if let Some((o, count)) = by_key.remove(&key) {
            if count > 1 {
                conditions.push(AppCondition::new(
                    ConditionType::RepeatedResourceWarning,
                    format!("Resource {key} appeared {count} times among application resources."),
                ));
            }
            result.push(o);
        }
    }
    (result, conditions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_core::{ClusterScopedStub, GroupKind};
    use serde_json::json;
    use std::collections::HashMap;

    struct TableProvider {
        namespaced: HashMap<GroupKind, bool>,
        failing: Vec<GroupKind>,
    }

    impl ResourceInfoProvider for TableProvider {
        fn is_namespaced(&self, gk: &GroupKind) -> anyhow::Result<bool> {
            if self.failing.contains(gk) {
                anyhow::bail!("no cluster connection");
            }
            Ok(*self.namespaced.get(gk).unwrap_or(&true))
        }
    }

    fn all_namespaced() -> TableProvider {
        TableProvider { namespaced: HashMap::new(), failing: vec![] }
    }

    #[test]
    fn split_yaml_separates_documents() {
        let text = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n";
        let (objs, err) = split_yaml(text);
        assert!(err.is_none());
        assert_eq!(objs.len(), 2);
        assert_eq!(obj::name(&objs[0]), "a");
        assert_eq!(obj::name(&objs[1]), "b");
    }

    #[test]
    fn split_yaml_skips_empty_documents() {
        let text = "---\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\n";
        let (objs, err) = split_yaml(text);
        assert!(err.is_none());
        assert_eq!(objs.len(), 1);
    }

    #[test]
    fn split_yaml_keeps_going_after_bad_document() {
        let text = "{not yaml:\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: ok\n";
        let (objs, err) = split_yaml(text);
        assert!(err.is_some());
        assert_eq!(objs.len(), 1);
        assert_eq!(obj::name(&objs[0]), "ok");
    }

    #[test]
    fn parse_manifests_fails_only_when_nothing_parses() {
        let blobs = vec!["{bad:".to_string()];
        assert!(parse_manifests(&blobs).is_err());

        let blobs = vec!["{bad:".to_string(), "kind: ConfigMap\napiVersion: v1\nmetadata:\n  name: m\n".to_string()];
        let (objs, conds) = parse_manifests(&blobs).unwrap();
        assert_eq!(objs.len(), 1);
        assert_eq!(conds.len(), 1);
        assert_eq!(conds[0].condition_type, ConditionType::ComparisonError);
    }

    #[test]
    fn dedup_imputes_destination_namespace() {
        let objs = vec![json!({
            "apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "m"}
        })];
        let (out, conds) = dedup_targets("dest", objs, &all_namespaced());
        assert!(conds.is_empty());
        assert_eq!(obj::namespace(&out[0]), "dest");
    }

    #[test]
    fn dedup_forces_empty_namespace_for_cluster_scoped() {
        let objs = vec![json!({
            "apiVersion": "rbac.authorization.k8s.io/v1", "kind": "ClusterRole",
            "metadata": {"name": "admin", "namespace": "oops"}
        })];
        let (out, _) = dedup_targets("dest", objs, &ClusterScopedStub);
        assert_eq!(obj::namespace(&out[0]), "");
    }

    #[test]
    fn dedup_keeps_last_and_counts_occurrences() {
        let first = json!({
            "apiVersion": "v1", "kind": "Service", "metadata": {"name": "s", "namespace": "n"},
            "spec": {"type": "NodePort"}
        });
        let second = json!({
            "apiVersion": "v1", "kind": "Service", "metadata": {"name": "s", "namespace": "n"},
            "spec": {"type": "ClusterIP"}
        });
        let (out, conds) = dedup_targets("n", vec![first, second], &all_namespaced());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["spec"]["type"], "ClusterIP");
        assert_eq!(conds.len(), 1);
        assert_eq!(conds[0].condition_type, ConditionType::RepeatedResourceWarning);
        assert!(conds[0].message.contains("2 times"), "message: {}", conds[0].message);
    }

    #[test]
    fn dedup_preserves_first_appearance_order() {
        let mk = |name: &str| {
            json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": name, "namespace": "n"}})
        };
        let objs = vec![mk("a"), mk("b"), mk("a"), mk("c")];
        let (out, _) = dedup_targets("n", objs, &all_namespaced());
        let names: Vec<_> = out.iter().map(|o| obj::name(o).to_string()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn dedup_reports_scope_lookup_failure() {
        let p = TableProvider {
            namespaced: HashMap::new(),
            failing: vec![GroupKind::new("example.io", "Widget")],
        };
        let objs = vec![json!({
            "apiVersion": "example.io/v1", "kind": "Widget",
            "metadata": {"name": "w", "namespace": "n"}
        })];
        let (out, conds) = dedup_targets("n", objs, &p);
        // falls back to cluster-scoped
        assert_eq!(obj::namespace(&out[0]), "");
        assert_eq!(conds.len(), 1);
        assert_eq!(conds[0].condition_type, ConditionType::ComparisonError);
        assert!(conds[0].message.contains("example.io/Widget"));
    }
}
