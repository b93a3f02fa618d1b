//! Rudder core types: object identity, statuses, conditions and the
//! schemaless object accessors shared by every crate in the workspace.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod app;
pub mod obj;
pub mod status;

pub use app::{
    Application, ApplicationSource, ApplicationSpec, ApplicationStatus, Destination,
    IgnoreDifference, RevisionHistory,
};
pub use status::{
    merge_conditions, AppCondition, ComparedTo, ConditionType, HealthStatus, HealthStatusCode,
    ResourceStatus, SyncStatus, SyncStatusCode,
};

/// Annotation marking a manifest as a lifecycle hook. Any value qualifies.
pub const ANNOTATION_HOOK: &str = "rudder.io/hook";
/// Helm hook annotation, honored for charts rendered into plain manifests.
pub const ANNOTATION_HELM_HOOK: &str = "helm.sh/hook";
/// Comma-separated comparison options (e.g. `IgnoreExtraneous`).
pub const ANNOTATION_COMPARE_OPTIONS: &str = "rudder.io/compare-options";
/// Comma-separated sync options (e.g. `Ignore`).
pub const ANNOTATION_SYNC_OPTIONS: &str = "rudder.io/sync-options";
/// Default label key used to track which application owns a live object.
pub const DEFAULT_APP_INSTANCE_LABEL_KEY: &str = "app.kubernetes.io/instance";

/// A logical resource type. API version is deliberately absent: a
/// group/kind is one type no matter which version the server serves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), kind: kind.into() }
    }
}

impl std::fmt::Display for GroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}/{}", self.group, self.kind)
        }
    }
}

/// Canonical identity of a cluster object. Cluster-scoped kinds carry an
/// empty namespace. Ordering is derived so key-addressed maps iterate
/// deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(
        group: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of a schemaless object, as stored in its metadata.
    pub fn from_obj(o: &serde_json::Value) -> Self {
        Self::new(obj::group(o), obj::kind(o), obj::namespace(o), obj::name(o))
    }

    pub fn group_kind(&self) -> GroupKind {
        GroupKind::new(self.group.clone(), self.kind.clone())
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}/{}", self.group, self.kind, self.namespace, self.name)
    }
}

/// Stable reference to a concrete live object; used to recognize an
/// application's own representation during health evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub uid: String,
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl ObjectRef {
    pub fn from_obj(o: &serde_json::Value) -> Self {
        Self {
            uid: obj::uid(o).to_string(),
            api_version: obj::api_version(o).to_string(),
            kind: obj::kind(o).to_string(),
            name: obj::name(o).to_string(),
            namespace: obj::namespace(o).to_string(),
        }
    }
}

/// Capability answering whether a group/kind is namespace-scoped on the
/// destination cluster.
pub trait ResourceInfoProvider: Send + Sync {
    fn is_namespaced(&self, gk: &GroupKind) -> anyhow::Result<bool>;
}

/// Fallback provider used when cluster information is unavailable: every
/// kind is treated as cluster-scoped.
pub struct ClusterScopedStub;

impl ResourceInfoProvider for ClusterScopedStub {
    fn is_namespaced(&self, _gk: &GroupKind) -> anyhow::Result<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_key_string_preserves_empty_fields() {
        let k = ResourceKey::new("", "ConfigMap", "", "m");
        assert_eq!(k.to_string(), "/ConfigMap//m");
        let k = ResourceKey::new("apps", "Deployment", "prod", "web");
        assert_eq!(k.to_string(), "apps/Deployment/prod/web");
    }

    #[test]
    fn resource_key_from_obj_splits_api_version() {
        let o = serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "prod"}
        });
        let k = ResourceKey::from_obj(&o);
        assert_eq!(k, ResourceKey::new("apps", "Deployment", "prod", "web"));

        let o = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "m"}
        });
        let k = ResourceKey::from_obj(&o);
        assert_eq!(k, ResourceKey::new("", "ConfigMap", "", "m"));
    }

    #[test]
    fn keys_ignore_api_version_differences() {
        let a = serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "n"}
        });
        let b = serde_json::json!({
            "apiVersion": "apps/v1beta2",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "n"}
        });
        assert_eq!(ResourceKey::from_obj(&a), ResourceKey::from_obj(&b));
    }

    #[test]
    fn object_ref_captures_identity_fields() {
        let o = serde_json::json!({
            "apiVersion": "rudder.io/v1alpha1",
            "kind": "Application",
            "metadata": {
                "name": "shop",
                "namespace": "control",
                "uid": "4fd8a1c3-0000-0000-0000-000000000002"
            }
        });
        let r = ObjectRef::from_obj(&o);
        assert_eq!(r.api_version, "rudder.io/v1alpha1");
        assert_eq!(r.kind, "Application");
        assert_eq!(r.name, "shop");
        assert_eq!(r.namespace, "control");
        assert_eq!(r.uid, "4fd8a1c3-0000-0000-0000-000000000002");
    }

    #[test]
    fn cluster_scoped_stub_answers_false() {
        let gk = GroupKind::new("apps", "Deployment");
        assert!(!ClusterScopedStub.is_namespaced(&gk).unwrap());
    }
}
