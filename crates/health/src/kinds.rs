//! Built-in health rules for the standard workload kinds. Each rule only
//! reads the paths that kind is known to populate.

use serde_json::Value;

use rudder_core::obj::{nested_bool, nested_i64, nested_str, replicas, status_condition};
use rudder_core::{HealthStatus, HealthStatusCode};

use HealthStatusCode::{Degraded, Healthy, Progressing, Suspended, Unknown};

fn healthy() -> HealthStatus {
    HealthStatus::new(Healthy)
}

fn progressing(msg: impl Into<String>) -> HealthStatus {
    HealthStatus::with_message(Progressing, msg)
}

fn degraded(msg: impl Into<String>) -> HealthStatus {
    HealthStatus::with_message(Degraded, msg)
}

fn observed_generation_behind(o: &Value) -> bool {
    let generation = nested_i64(o, &["metadata", "generation"]).unwrap_or(0);
    let observed = nested_i64(o, &["status", "observedGeneration"]).unwrap_or(0);
    observed < generation
}

fn condition_message(c: &Value) -> &str {
    c.get("message").and_then(Value::as_str).unwrap_or("")
}

pub fn deployment(o: &Value) -> HealthStatus {
    if nested_bool(o, &["spec", "paused"]) == Some(true) {
        return HealthStatus::with_message(Suspended, "deployment is paused");
    }
    if let Some(c) = status_condition(o, "Progressing") {
        if c.get("reason").and_then(Value::as_str) == Some("ProgressDeadlineExceeded") {
            return degraded(format!("deployment exceeded its progress deadline: {}", condition_message(c)));
        }
    }
    if observed_generation_behind(o) {
        return progressing("waiting for spec update to be observed");
    }
    let desired = replicas(o).unwrap_or(1);
    let updated = nested_i64(o, &["status", "updatedReplicas"]).unwrap_or(0);
    let total = nested_i64(o, &["status", "replicas"]).unwrap_or(0);
    let available = nested_i64(o, &["status", "availableReplicas"]).unwrap_or(0);
    if updated < desired {
        return progressing(format!("{updated} of {desired} updated replicas"));
    }
    if total > updated {
        return progressing(format!("{} old replicas pending termination", total - updated));
    }
    if available < updated {
        return progressing(format!("{available} of {updated} updated replicas are available"));
    }
    healthy()
}

pub fn stateful_set(o: &Value) -> HealthStatus {
    if observed_generation_behind(o) {
        return progressing("waiting for spec update to be observed");
    }
    let desired = replicas(o).unwrap_or(1);
    let ready = nested_i64(o, &["status", "readyReplicas"]).unwrap_or(0);
    if ready < desired {
        return progressing(format!("{ready} of {desired} replicas are ready"));
    }
    let current = nested_str(o, &["status", "currentRevision"]);
    let update = nested_str(o, &["status", "updateRevision"]);
    if update.is_some() && current != update {
        return progressing("waiting for rolling update to complete");
    }
    healthy()
}

pub fn replica_set(o: &Value) -> HealthStatus {
    if let Some(c) = status_condition(o, "ReplicaFailure") {
        if c.get("status").and_then(Value::as_str) == Some("True") {
            return degraded(condition_message(c));
        }
    }
    if observed_generation_behind(o) {
        return progressing("waiting for spec update to be observed");
    }
    let desired = replicas(o).unwrap_or(1);
    let available = nested_i64(o, &["status", "availableReplicas"]).unwrap_or(0);
    if available < desired {
        return progressing(format!("{available} of {desired} replicas are available"));
    }
    healthy()
}

pub fn daemon_set(o: &Value) -> HealthStatus {
    if observed_generation_behind(o) {
        return progressing("waiting for spec update to be observed");
    }
    let desired = nested_i64(o, &["status", "desiredNumberScheduled"]).unwrap_or(0);
    let updated = nested_i64(o, &["status", "updatedNumberScheduled"]).unwrap_or(0);
    let available = nested_i64(o, &["status", "numberAvailable"]).unwrap_or(0);
    if updated < desired {
        return progressing(format!("{updated} of {desired} nodes run the updated pod"));
    }
    if available < desired {
        return progressing(format!("{available} of {desired} nodes have an available pod"));
    }
    healthy()
}

pub fn pod(o: &Value) -> HealthStatus {
    match nested_str(o, &["status", "phase"]) {
        Some("Succeeded") => healthy(),
        Some("Failed") => degraded(nested_str(o, &["status", "message"]).unwrap_or("")),
        Some("Pending") => progressing(nested_str(o, &["status", "message"]).unwrap_or("")),
        Some("Running") => match status_condition(o, "Ready")
            .and_then(|c| c.get("status"))
            .and_then(Value::as_str)
        {
            Some("True") => healthy(),
            _ => progressing("pod is running but not ready"),
        },
        _ => HealthStatus::new(Unknown),
    }
}

pub fn job(o: &Value) -> HealthStatus {
    if let Some(c) = status_condition(o, "Failed") {
        if c.get("status").and_then(Value::as_str) == Some("True") {
            return degraded(condition_message(c));
        }
    }
    if let Some(c) = status_condition(o, "Complete") {
        if c.get("status").and_then(Value::as_str) == Some("True") {
            return healthy();
        }
    }
    progressing("job is running")
}

pub fn service(o: &Value) -> HealthStatus {
    if nested_str(o, &["spec", "type"]) == Some("LoadBalancer") {
        let has_ingress = o
            .pointer("/status/loadBalancer/ingress")
            .and_then(Value::as_array)
            .is_some_and(|a| !a.is_empty());
        if !has_ingress {
            return progressing("waiting for load balancer");
        }
    }
    healthy()
}

pub fn ingress(o: &Value) -> HealthStatus {
    let has_ingress = o
        .pointer("/status/loadBalancer/ingress")
        .and_then(Value::as_array)
        .is_some_and(|a| !a.is_empty());
    if has_ingress {
        healthy()
    } else {
        progressing("waiting for load balancer")
    }
}

pub fn pvc(o: &Value) -> HealthStatus {
    match nested_str(o, &["status", "phase"]) {
        Some("Bound") => healthy(),
        Some("Pending") => progressing("claim is pending"),
        Some("Lost") => degraded("claim lost its underlying volume"),
        _ => HealthStatus::new(Unknown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deployment_states() {
        let mut o = json!({
            "apiVersion": "apps/v1", "kind": "Deployment",
            "metadata": {"name": "web", "generation": 1},
            "spec": {"replicas": 3},
            "status": {
                "observedGeneration": 1,
                "updatedReplicas": 3,
                "replicas": 3,
                "availableReplicas": 3
            }
        });
        assert_eq!(deployment(&o).status, Healthy);

        o["status"]["availableReplicas"] = json!(1);
        assert_eq!(deployment(&o).status, Progressing);

        o["spec"]["paused"] = json!(true);
        assert_eq!(deployment(&o).status, Suspended);

        o["spec"]["paused"] = json!(false);
        o["status"]["conditions"] = json!([
            {"type": "Progressing", "status": "False", "reason": "ProgressDeadlineExceeded"}
        ]);
        assert_eq!(deployment(&o).status, Degraded);
    }

    #[test]
    fn deployment_stale_observation_is_progressing() {
        let o = json!({
            "apiVersion": "apps/v1", "kind": "Deployment",
            "metadata": {"name": "web", "generation": 5},
            "spec": {"replicas": 1},
            "status": {"observedGeneration": 4}
        });
        assert_eq!(deployment(&o).status, Progressing);
    }

    #[test]
    fn replica_set_states() {
        let mut o = json!({
            "metadata": {"generation": 2},
            "spec": {"replicas": 2},
            "status": {"observedGeneration": 2, "availableReplicas": 2}
        });
        assert_eq!(replica_set(&o).status, Healthy);

        o["status"]["availableReplicas"] = json!(1);
        assert_eq!(replica_set(&o).status, Progressing);

        o["status"]["observedGeneration"] = json!(1);
        assert_eq!(replica_set(&o).status, Progressing);

        o["status"]["conditions"] = json!([
            {"type": "ReplicaFailure", "status": "True", "message": "quota exceeded"}
        ]);
        let h = replica_set(&o);
        assert_eq!(h.status, Degraded);
        assert_eq!(h.message, "quota exceeded");
    }

    #[test]
    fn daemon_set_states() {
        let mut o = json!({
            "metadata": {"generation": 1},
            "status": {
                "observedGeneration": 1,
                "desiredNumberScheduled": 3,
                "updatedNumberScheduled": 3,
                "numberAvailable": 3
            }
        });
        assert_eq!(daemon_set(&o).status, Healthy);

        o["status"]["numberAvailable"] = json!(2);
        assert_eq!(daemon_set(&o).status, Progressing);

        o["status"]["updatedNumberScheduled"] = json!(1);
        assert_eq!(daemon_set(&o).status, Progressing);

        o["metadata"]["generation"] = json!(2);
        assert_eq!(daemon_set(&o).status, Progressing);
    }

    #[test]
    fn stateful_set_waits_for_revision_convergence() {
        let o = json!({
            "metadata": {"generation": 1},
            "spec": {"replicas": 2},
            "status": {
                "observedGeneration": 1,
                "readyReplicas": 2,
                "currentRevision": "web-1",
                "updateRevision": "web-2"
            }
        });
        assert_eq!(stateful_set(&o).status, Progressing);
    }

    #[test]
    fn pod_phases() {
        assert_eq!(pod(&json!({"status": {"phase": "Succeeded"}})).status, Healthy);
        assert_eq!(pod(&json!({"status": {"phase": "Failed"}})).status, Degraded);
        assert_eq!(pod(&json!({"status": {"phase": "Pending"}})).status, Progressing);
        assert_eq!(pod(&json!({"status": {"phase": "Unknown"}})).status, Unknown);
        let running_ready = json!({"status": {
            "phase": "Running",
            "conditions": [{"type": "Ready", "status": "True"}]
        }});
        assert_eq!(pod(&running_ready).status, Healthy);
        let running_not_ready = json!({"status": {"phase": "Running"}});
        assert_eq!(pod(&running_not_ready).status, Progressing);
    }

    #[test]
    fn job_conditions() {
        let failed = json!({"status": {"conditions": [
            {"type": "Failed", "status": "True", "message": "backoff limit exceeded"}
        ]}});
        let h = job(&failed);
        assert_eq!(h.status, Degraded);
        assert_eq!(h.message, "backoff limit exceeded");

        let complete = json!({"status": {"conditions": [{"type": "Complete", "status": "True"}]}});
        assert_eq!(job(&complete).status, Healthy);
        assert_eq!(job(&json!({})).status, Progressing);
    }

    #[test]
    fn load_balancer_service_waits_for_ingress() {
        let lb = json!({"spec": {"type": "LoadBalancer"}, "status": {"loadBalancer": {}}});
        assert_eq!(service(&lb).status, Progressing);
        let lb_done = json!({
            "spec": {"type": "LoadBalancer"},
            "status": {"loadBalancer": {"ingress": [{"ip": "10.0.0.1"}]}}
        });
        assert_eq!(service(&lb_done).status, Healthy);
        let cluster_ip = json!({"spec": {"type": "ClusterIP"}});
        assert_eq!(service(&cluster_ip).status, Healthy);
    }

    #[test]
    fn ingress_waits_for_load_balancer() {
        let pending = json!({"status": {"loadBalancer": {}}});
        assert_eq!(ingress(&pending).status, Progressing);
        let empty_list = json!({"status": {"loadBalancer": {"ingress": []}}});
        assert_eq!(ingress(&empty_list).status, Progressing);
        let routed = json!({
            "status": {"loadBalancer": {"ingress": [{"hostname": "lb.example.com"}]}}
        });
        assert_eq!(ingress(&routed).status, Healthy);
    }

    #[test]
    fn pvc_phases() {
        assert_eq!(pvc(&json!({"status": {"phase": "Bound"}})).status, Healthy);
        assert_eq!(pvc(&json!({"status": {"phase": "Pending"}})).status, Progressing);
        assert_eq!(pvc(&json!({"status": {"phase": "Lost"}})).status, Degraded);
    }
}
