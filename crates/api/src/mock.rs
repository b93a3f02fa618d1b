//! In-memory fakes for tests. Construct with struct literals, flip the
//! `fail_*` switches to exercise the degraded paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use rudder_core::{
    Application, GroupKind, ResourceInfoProvider, ResourceKey, DEFAULT_APP_INSTANCE_LABEL_KEY,
};

use crate::{
    ApiError, ApiResult, AppStore, ConfigManagementPlugin, LiveStateCache, ManifestRequest,
    ManifestResponse, ManifestSource, Project, ResourceOverride, ResourcesFilter,
    SettingsProvider,
};

/// Serves a fixed manifest response; errors when none is configured.
#[derive(Default)]
pub struct StaticManifestSource {
    pub response: Option<ManifestResponse>,
    pub requests: Mutex<Vec<ManifestRequest>>,
}

impl StaticManifestSource {
    pub fn new(manifests: Vec<&str>, revision: &str) -> Self {
        Self {
            response: Some(ManifestResponse {
                manifests: manifests.into_iter().map(String::from).collect(),
                revision: revision.to_string(),
                source_type: "directory".to_string(),
            }),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl ManifestSource for StaticManifestSource {
    async fn generate(&self, req: ManifestRequest) -> ApiResult<ManifestResponse> {
        self.requests.lock().unwrap().push(req);
        self.response
            .clone()
            .ok_or_else(|| ApiError::ManifestGeneration("no response configured".into()))
    }
}

/// Scope oracle backed by a fixed table.
#[derive(Default)]
pub struct StaticInfoProvider {
    pub namespaced: HashMap<GroupKind, bool>,
    /// Answer for kinds absent from the table.
    pub default_namespaced: bool,
    /// Group/kinds whose lookup fails outright.
    pub failing: Vec<GroupKind>,
}

impl StaticInfoProvider {
    /// Everything namespaced unless listed otherwise; handy default for
    /// workload-only fixtures.
    pub fn namespaced_by_default() -> Self {
        Self { default_namespaced: true, ..Default::default() }
    }
}

impl ResourceInfoProvider for StaticInfoProvider {
    fn is_namespaced(&self, gk: &GroupKind) -> anyhow::Result<bool> {
        if self.failing.contains(gk) {
            anyhow::bail!("scope lookup failed for {gk}");
        }
        Ok(*self.namespaced.get(gk).unwrap_or(&self.default_namespaced))
    }
}

/// Live-state cache over a fixed object map.
pub struct StaticLiveStateCache {
    pub objs: BTreeMap<ResourceKey, Value>,
    pub info: Arc<StaticInfoProvider>,
    pub server_version: String,
    pub fail_live_objs: bool,
    pub fail_cluster_cache: bool,
}

impl Default for StaticLiveStateCache {
    fn default() -> Self {
        Self {
            objs: BTreeMap::new(),
            info: Arc::new(StaticInfoProvider::namespaced_by_default()),
            server_version: "1.29".to_string(),
            fail_live_objs: false,
            fail_cluster_cache: false,
        }
    }
}

impl StaticLiveStateCache {
    pub fn with_objs(objs: Vec<Value>) -> Self {
        let objs = objs
            .into_iter()
            .map(|o| (ResourceKey::from_obj(&o), o))
            .collect();
        Self { objs, ..Default::default() }
    }
}

#[async_trait::async_trait]
impl LiveStateCache for StaticLiveStateCache {
    async fn get_managed_live_objs(
        &self,
        _app: &Application,
        _targets: &[Value],
    ) -> ApiResult<BTreeMap<ResourceKey, Value>> {
        if self.fail_live_objs {
            return Err(ApiError::LiveState("cluster cache unavailable".into()));
        }
        Ok(self.objs.clone())
    }

    fn get_cluster_cache(&self, _server: &str) -> ApiResult<Arc<dyn ResourceInfoProvider>> {
        if self.fail_cluster_cache {
            return Err(ApiError::LiveState("no such cluster".into()));
        }
        Ok(self.info.clone())
    }

    async fn get_server_version(&self, _server: &str) -> ApiResult<String> {
        Ok(self.server_version.clone())
    }

    fn is_namespaced(&self, _server: &str, gk: &GroupKind) -> ApiResult<bool> {
        self.info
            .is_namespaced(gk)
            .map_err(|e| ApiError::LiveState(e.to_string()))
    }
}

/// Settings provider over fixed values; `fail` simulates the settings
/// store being unreachable.
pub struct StaticSettings {
    pub overrides: HashMap<GroupKind, ResourceOverride>,
    pub label_key: String,
    pub filter: ResourcesFilter,
    pub plugins: Vec<ConfigManagementPlugin>,
    pub kustomize_build_options: String,
    pub fail: bool,
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
            label_key: DEFAULT_APP_INSTANCE_LABEL_KEY.to_string(),
            filter: ResourcesFilter::default(),
            plugins: Vec::new(),
            kustomize_build_options: String::new(),
            fail: false,
        }
    }
}

impl StaticSettings {
    fn check(&self) -> ApiResult<()> {
        if self.fail {
            return Err(ApiError::Settings("settings store unavailable".into()));
        }
        Ok(())
    }
}

impl SettingsProvider for StaticSettings {
    fn resource_overrides(&self) -> ApiResult<HashMap<GroupKind, ResourceOverride>> {
        self.check()?;
        Ok(self.overrides.clone())
    }

    fn app_instance_label_key(&self) -> ApiResult<String> {
        self.check()?;
        Ok(self.label_key.clone())
    }

    fn resources_filter(&self) -> ApiResult<ResourcesFilter> {
        self.check()?;
        Ok(self.filter.clone())
    }

    fn config_management_plugins(&self) -> ApiResult<Vec<ConfigManagementPlugin>> {
        self.check()?;
        Ok(self.plugins.clone())
    }

    fn kustomize_build_options(&self) -> ApiResult<String> {
        self.check()?;
        Ok(self.kustomize_build_options.clone())
    }
}

/// Project policy permitting everything.
pub struct AllowAll;

impl Project for AllowAll {
    fn is_live_resource_permitted(&self, _obj: &Value, _server: &str) -> bool {
        true
    }

    fn is_group_kind_permitted(&self, _gk: &GroupKind, _namespaced: bool) -> bool {
        true
    }
}

/// Project policy with explicit deny lists.
#[derive(Default)]
pub struct RestrictedProject {
    pub denied_kinds: Vec<GroupKind>,
    pub denied_servers: Vec<String>,
}

impl Project for RestrictedProject {
    fn is_live_resource_permitted(&self, obj: &Value, server: &str) -> bool {
        if self.denied_servers.iter().any(|s| s == server) {
            return false;
        }
        !self.denied_kinds.contains(&rudder_core::obj::group_kind(obj))
    }

    fn is_group_kind_permitted(&self, gk: &GroupKind, _namespaced: bool) -> bool {
        !self.denied_kinds.contains(gk)
    }
}

/// Records every status patch instead of persisting it.
#[derive(Default)]
pub struct RecordingAppStore {
    pub patches: Mutex<Vec<(String, Value)>>,
}

#[async_trait::async_trait]
impl AppStore for RecordingAppStore {
    async fn merge_patch_status(&self, app_name: &str, patch: Value) -> ApiResult<()> {
        self.patches.lock().unwrap().push((app_name.to_string(), patch));
        Ok(())
    }
}
