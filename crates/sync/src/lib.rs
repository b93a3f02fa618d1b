//! Pairs desired and live objects by identity into aligned slots. The
//! reconciler never looks inside objects beyond their identity metadata;
//! annotation semantics live in [`hook`] and [`annotations`].

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde_json::Value;

use rudder_core::{obj, ResourceInfoProvider, ResourceKey};

pub mod annotations;
pub mod hook;

/// Two parallel arrays of equal length; each index is one logical slot.
/// `target[i] == None` marks a prune candidate, `live[i] == None` a
/// create.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationResult {
    pub target: Vec<Option<Value>>,
    pub live: Vec<Option<Value>>,
}

/// Identity of an object as the reconciler sees it: cluster-scoped kinds
/// get an empty namespace, namespaced kinds default to the destination
/// namespace. Scope-lookup failures fall back to cluster-scoped.
pub fn resource_key(o: &Value, namespace: &str, info: &dyn ResourceInfoProvider) -> ResourceKey {
    let namespaced = info.is_namespaced(&obj::group_kind(o)).unwrap_or(false);
    let ns = if !namespaced {
        ""
    } else if obj::namespace(o).is_empty() {
        namespace
    } else {
        obj::namespace(o)
    };
    ResourceKey::new(obj::group(o), obj::kind(o), ns, obj::name(o))
}

/// Align targets with live objects. Target-bearing slots come first in
/// input order; remaining live objects follow in key order as prune
/// candidates. Repeat invocation on equal inputs yields the same slot
/// indexing.
pub fn reconcile(
    targets: Vec<Value>,
    mut live_by_key: BTreeMap<ResourceKey, Value>,
    namespace: &str,
    info: &dyn ResourceInfoProvider,
) -> ReconciliationResult {
    let mut result = ReconciliationResult {
        target: Vec::with_capacity(targets.len()),
        live: Vec::with_capacity(targets.len()),
    };
    for t in targets {
        let key = resource_key(&t, namespace, info);
        let live = live_by_key.remove(&key);
        result.target.push(Some(t));
        result.live.push(live);
    }
    for (_, live) in live_by_key {
        result.target.push(None);
        result.live.push(Some(live));
    }
    result
}
