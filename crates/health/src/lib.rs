//! Operational health of live objects.
//!
//! Standard workload kinds carry built-in rules; foreign kinds can opt in
//! through a condition rule on their resource override. Kinds with
//! neither stay out of the application-level aggregate.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use anyhow::{bail, Result};
use serde_json::Value;

use rudder_api::{ConditionHealthRule, ResourceOverride};
use rudder_core::{obj, GroupKind, HealthStatus, HealthStatusCode, ResourceStatus};

mod kinds;

/// Classify one live object. `None` means no rule applies and the object
/// does not participate in aggregation.
pub fn resource_health(
    o: &Value,
    overrides: &HashMap<GroupKind, ResourceOverride>,
) -> Option<HealthStatus> {
    let gk = obj::group_kind(o);
    match (gk.group.as_str(), gk.kind.as_str()) {
        ("apps", "Deployment") => Some(kinds::deployment(o)),
        ("apps", "StatefulSet") => Some(kinds::stateful_set(o)),
        ("apps", "ReplicaSet") => Some(kinds::replica_set(o)),
        ("apps", "DaemonSet") => Some(kinds::daemon_set(o)),
        ("", "Pod") => Some(kinds::pod(o)),
        ("batch", "Job") => Some(kinds::job(o)),
        ("", "Service") => Some(kinds::service(o)),
        ("networking.k8s.io", "Ingress") => Some(kinds::ingress(o)),
        ("", "PersistentVolumeClaim") => Some(kinds::pvc(o)),
        _ => overrides
            .get(&gk)
            .and_then(|ov| ov.health.as_ref())
            .map(|rule| condition_rule_health(o, rule)),
    }
}

// Generic rule for foreign kinds: an optional suspension flag plus a
// readiness condition.
fn condition_rule_health(o: &Value, rule: &ConditionHealthRule) -> HealthStatus {
    if let Some(ptr) = &rule.suspend_pointer {
        if o.pointer(ptr).and_then(Value::as_bool) == Some(true) {
            return HealthStatus::new(HealthStatusCode::Suspended);
        }
    }
    match obj::status_condition(o, &rule.ready_type) {
        Some(c) => match c.get("status").and_then(Value::as_str) {
            Some("True") => HealthStatus::new(HealthStatusCode::Healthy),
            Some("False") => HealthStatus::with_message(
                HealthStatusCode::Degraded,
                c.get("message").and_then(Value::as_str).unwrap_or(""),
            ),
            _ => HealthStatus::new(HealthStatusCode::Unknown),
        },
        None => HealthStatus::with_message(
            HealthStatusCode::Progressing,
            format!("waiting for {} condition", rule.ready_type),
        ),
    }
}

/// Classify every slot and aggregate to the application level. `consider`
/// filters objects out of aggregation (the application's own
/// representation, most notably); `resources` and `live` are the parallel
/// slot arrays of one pass.
pub fn set_application_health(
    resources: &mut [ResourceStatus],
    live: &[Option<Value>],
    overrides: &HashMap<GroupKind, ResourceOverride>,
    consider: &dyn Fn(&Value) -> bool,
) -> Result<HealthStatus> {
    if resources.len() != live.len() {
        bail!("health evaluation: {} summaries but {} live slots", resources.len(), live.len());
    }

    let mut participating: Vec<HealthStatusCode> = Vec::new();
    for (res, live_obj) in resources.iter_mut().zip(live.iter()) {
        let health = match live_obj {
            None => Some(HealthStatus::with_message(
                HealthStatusCode::Missing,
                format!("{} {} not found", res.kind, res.name),
            )),
            Some(o) => {
                if !consider(o) {
                    res.health = None;
                    continue;
                }
                resource_health(o, overrides)
            }
        };
        res.health = health.clone();
        if res.hook {
            continue;
        }
        if let Some(h) = health {
            participating.push(h.status);
        }
    }

    let code = aggregate(&participating);
    Ok(HealthStatus::new(code))
}

fn aggregate(codes: &[HealthStatusCode]) -> HealthStatusCode {
    use HealthStatusCode::*;
    if codes.iter().any(|c| *c == Missing) {
        Missing
    } else if codes.iter().any(|c| *c == Degraded) {
        Degraded
    } else if codes.iter().any(|c| *c == Progressing) {
        Progressing
    } else if !codes.is_empty() && codes.iter().all(|c| *c == Suspended) {
        Suspended
    } else if codes.iter().all(|c| *c == Healthy) {
        Healthy
    } else {
        Unknown
    }
}
