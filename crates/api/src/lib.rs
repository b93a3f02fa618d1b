//! Capability traits for the collaborators the reconciliation core
//! consumes: manifest generation, live-state cache, settings, project
//! policy and application persistence.
//!
//! The core never constructs implementations; production wiring injects
//! real ones and tests inject the in-memory fakes from [`mock`].

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use rudder_core::{Application, ApplicationSource, GroupKind, ResourceInfoProvider, ResourceKey};

pub mod mock;

/// Errors crossing the capability boundary. Variants map to the failure
/// classes the comparator distinguishes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("settings: {0}")]
    Settings(String),
    #[error("manifest generation: {0}")]
    ManifestGeneration(String),
    #[error("live state: {0}")]
    LiveState(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// A config-management plugin the manifest service may invoke.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigManagementPlugin {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generate_command: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KustomizeOptions {
    pub build_options: String,
}

/// Request for one manifest-generation round trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestRequest {
    pub repo: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auxiliary_repos: Vec<String>,
    pub revision: String,
    pub no_cache: bool,
    pub app_label_key: String,
    pub app_label_value: String,
    pub namespace: String,
    pub source: ApplicationSource,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<ConfigManagementPlugin>,
    pub kustomize_options: KustomizeOptions,
    pub kube_version: String,
}

/// Response: rendered YAML documents plus the resolved revision and the
/// toolchain tag that produced them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestResponse {
    pub manifests: Vec<String>,
    pub revision: String,
    pub source_type: String,
}

/// Renders an application source into manifest text blobs.
#[async_trait::async_trait]
pub trait ManifestSource: Send + Sync {
    async fn generate(&self, req: ManifestRequest) -> ApiResult<ManifestResponse>;
}

/// Read access to cached live cluster state. Returned objects are shared
/// with the cache and must be treated read-only.
#[async_trait::async_trait]
pub trait LiveStateCache: Send + Sync {
    /// Live objects managed by the application, keyed by identity. The
    /// key-sorted map gives prune candidates a deterministic order.
    async fn get_managed_live_objs(
        &self,
        app: &Application,
        targets: &[Value],
    ) -> ApiResult<BTreeMap<ResourceKey, Value>>;

    /// Scope oracle for the destination cluster.
    fn get_cluster_cache(&self, server: &str) -> ApiResult<Arc<dyn ResourceInfoProvider>>;

    async fn get_server_version(&self, server: &str) -> ApiResult<String>;

    fn is_namespaced(&self, server: &str, gk: &GroupKind) -> ApiResult<bool>;
}

/// A field-comparison override for one group/kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOverride {
    /// JSON Pointers stripped from both sides before diffing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_differences: Vec<String>,
    /// Health classification rule for kinds without a built-in one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<ConditionHealthRule>,
}

/// Declarative health rule: a `status.conditions` type that signals
/// readiness, plus an optional pointer to a boolean suspension field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionHealthRule {
    pub ready_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_pointer: Option<String>,
}

/// Global exclusion list over (group, kind, server). `*` matches anything;
/// an empty rule list excludes nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcesFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded: Vec<FilterRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<String>,
}

impl FilterRule {
    fn matches(&self, group: &str, kind: &str, server: &str) -> bool {
        list_matches(&self.api_groups, group)
            && list_matches(&self.kinds, kind)
            && list_matches(&self.clusters, server)
    }
}

fn list_matches(patterns: &[String], value: &str) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| p == "*" || p == value)
}

impl ResourcesFilter {
    pub fn is_excluded_resource(&self, group: &str, kind: &str, server: &str) -> bool {
        self.excluded.iter().any(|r| r.matches(group, kind, server))
    }
}

/// Comparison-relevant settings, resolved once per pass.
pub trait SettingsProvider: Send + Sync {
    fn resource_overrides(&self) -> ApiResult<HashMap<GroupKind, ResourceOverride>>;
    fn app_instance_label_key(&self) -> ApiResult<String>;
    fn resources_filter(&self) -> ApiResult<ResourcesFilter>;
    fn config_management_plugins(&self) -> ApiResult<Vec<ConfigManagementPlugin>>;
    fn kustomize_build_options(&self) -> ApiResult<String>;
}

/// Project policy: which clusters and group/kinds an application may
/// address.
pub trait Project: Send + Sync {
    fn is_live_resource_permitted(&self, obj: &Value, server: &str) -> bool;
    fn is_group_kind_permitted(&self, gk: &GroupKind, namespaced: bool) -> bool;
}

/// Persistence seam for application status updates. The only write the
/// core performs is a merge patch against `/status`.
#[async_trait::async_trait]
pub trait AppStore: Send + Sync {
    async fn merge_patch_status(&self, app_name: &str, patch: Value) -> ApiResult<()>;
}
