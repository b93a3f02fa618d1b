//! The state comparator: one pass over an application produces a
//! `ComparisonResult` pairing desired and live objects, their diffs, the
//! aggregate sync and health statuses and any advisory conditions.
//!
//! Every upstream failure short of the settings store is recoverable: the
//! pass completes with a `ComparisonError` condition and degraded
//! statuses instead of aborting.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use metrics::histogram;
use serde_json::Value;
use tracing::{debug, info};

use rudder_api::{
    ApiResult, AppStore, KustomizeOptions, LiveStateCache, ManifestRequest, ManifestResponse,
    ManifestSource, Project, ResourceOverride, SettingsProvider,
};
use rudder_core::{
    merge_conditions, obj, AppCondition, Application, ApplicationSource, ClusterScopedStub,
    ComparedTo, ConditionType, GroupKind, HealthStatus, HealthStatusCode, ObjectRef,
    ResourceInfoProvider, ResourceKey, ResourceStatus, RevisionHistory, SyncStatus,
    SyncStatusCode,
};
use rudder_diff::{DiffResult, IgnoreNormalizer};
use rudder_sync::{annotations, hook};

/// Condition kinds a pass fully re-evaluates: previous conditions of
/// these types are replaced wholesale by each pass's output.
const EVALUATED_CONDITIONS: [ConditionType; 4] = [
    ConditionType::ComparisonError,
    ConditionType::SharedResourceWarning,
    ConditionType::RepeatedResourceWarning,
    ConditionType::ExcludedResourceWarning,
];

/// One aligned slot with its diff. At least one of `target`/`live` is
/// present; live objects are shared with the cache and must be treated
/// read-only.
#[derive(Debug, Clone)]
pub struct ManagedResource {
    pub target: Option<Value>,
    pub live: Option<Value>,
    pub diff: DiffResult,
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub hook: bool,
}

impl ManagedResource {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(
            self.group.clone(),
            self.kind.clone(),
            self.namespace.clone(),
            self.name.clone(),
        )
    }
}

/// Output of one comparison pass. Immutable once returned.
#[derive(Debug, Clone)]
pub struct ComparisonResult {
    pub sync_status: SyncStatus,
    pub health_status: HealthStatus,
    pub resources: Vec<ResourceStatus>,
    pub managed_resources: Vec<ManagedResource>,
    pub conditions: Vec<AppCondition>,
    /// Which manifest toolchain produced the desired objects, when known.
    pub app_source_type: Option<String>,
}

struct ComparisonSettings {
    app_label_key: String,
    overrides: HashMap<GroupKind, ResourceOverride>,
    normalizer: IgnoreNormalizer,
}

/// Compares application desired state against live cluster state. All
/// collaborators are injected; the comparator itself holds no mutable
/// state and passes for distinct applications may run concurrently.
pub struct StateComparator {
    manifest_source: Arc<dyn ManifestSource>,
    live_state: Arc<dyn LiveStateCache>,
    settings: Arc<dyn SettingsProvider>,
    app_store: Arc<dyn AppStore>,
}

impl StateComparator {
    pub fn new(
        manifest_source: Arc<dyn ManifestSource>,
        live_state: Arc<dyn LiveStateCache>,
        settings: Arc<dyn SettingsProvider>,
        app_store: Arc<dyn AppStore>,
    ) -> Self {
        Self { manifest_source, live_state, settings, app_store }
    }

    fn comparison_settings(&self, app: &Application) -> anyhow::Result<ComparisonSettings> {
        let overrides = self.settings.resource_overrides()?;
        let app_label_key = self.settings.app_instance_label_key()?;
        let normalizer = IgnoreNormalizer::new(&app.spec.ignore_differences, &overrides)?;
        Ok(ComparisonSettings { app_label_key, overrides, normalizer })
    }

    async fn repo_objs(
        &self,
        app: &Application,
        source: &ApplicationSource,
        app_label_key: &str,
        revision: &str,
        no_cache: bool,
    ) -> anyhow::Result<(Vec<Value>, ManifestResponse, Vec<AppCondition>)> {
        let plugins = self.settings.config_management_plugins()?;
        let build_options = self.settings.kustomize_build_options()?;
        let kube_version = self
            .live_state
            .get_server_version(&app.spec.destination.server)
            .await?;
        let revision = if revision.is_empty() { &source.target_revision } else { revision };
        let resp = self
            .manifest_source
            .generate(ManifestRequest {
                repo: source.repo_url.clone(),
                auxiliary_repos: Vec::new(),
                revision: revision.to_string(),
                no_cache,
                app_label_key: app_label_key.to_string(),
                app_label_value: app.name.clone(),
                namespace: app.spec.destination.namespace.clone(),
                source: source.clone(),
                plugins,
                kustomize_options: KustomizeOptions { build_options },
                kube_version,
            })
            .await?;
        let (objs, conditions) = rudder_manifest::parse_manifests(&resp.manifests)?;
        Ok((objs, resp, conditions))
    }

    /// Compare the application's desired state at `revision` (or the
    /// source's target revision) against live state. `local_manifests`
    /// short-circuits manifest generation when non-empty.
    pub async fn compare_app_state(
        &self,
        app: &Application,
        project: &dyn Project,
        revision: &str,
        source: ApplicationSource,
        no_cache: bool,
        local_manifests: &[String],
    ) -> ComparisonResult {
        let started = Instant::now();
        let destination = app.spec.destination.clone();
        info!(
            application = %app.name,
            server = %destination.server,
            namespace = %destination.namespace,
            "comparing application state"
        );

        let settings = match self.comparison_settings(app) {
            Ok(s) => s,
            // Without comparison settings nothing can be said about the app.
            Err(_) => {
                return ComparisonResult {
                    sync_status: SyncStatus {
                        status: SyncStatusCode::Unknown,
                        compared_to: ComparedTo { source, destination },
                        revision: None,
                    },
                    health_status: HealthStatus::new(HealthStatusCode::Unknown),
                    resources: Vec::new(),
                    managed_resources: Vec::new(),
                    conditions: Vec::new(),
                    app_source_type: None,
                };
            }
        };

        let mut failed_to_load = false;
        let mut conditions: Vec<AppCondition> = Vec::new();
        let mut resolved_revision: Option<String> = None;
        let mut app_source_type: Option<String> = None;

        let mut target_objs: Vec<Value> = if local_manifests.is_empty() {
            match self
                .repo_objs(app, &source, &settings.app_label_key, revision, no_cache)
                .await
            {
                Ok((objs, resp, conds)) => {
                    resolved_revision = Some(resp.revision);
                    app_source_type = Some(resp.source_type);
                    conditions.extend(conds);
                    objs
                }
                Err(e) => {
                    conditions.push(AppCondition::new(ConditionType::ComparisonError, e.to_string()));
                    failed_to_load = true;
                    Vec::new()
                }
            }
        } else {
            match rudder_manifest::parse_manifests(local_manifests) {
                Ok((objs, conds)) => {
                    conditions.extend(conds);
                    objs
                }
                Err(e) => {
                    conditions.push(AppCondition::new(ConditionType::ComparisonError, e.to_string()));
                    failed_to_load = true;
                    Vec::new()
                }
            }
        };
        debug!(targets = target_objs.len(), "generated desired manifests");

        let info: Arc<dyn ResourceInfoProvider> =
            match self.live_state.get_cluster_cache(&destination.server) {
                Ok(p) => p,
                Err(_) => Arc::new(ClusterScopedStub),
            };

        let (deduped, dedup_conditions) =
            rudder_manifest::dedup_targets(&destination.namespace, target_objs, info.as_ref());
        conditions.extend(dedup_conditions);
        target_objs = deduped;

        match self.settings.resources_filter() {
            Ok(filter) => {
                let mut kept = Vec::with_capacity(target_objs.len());
                for t in target_objs {
                    let (group, kind) = (obj::group(&t).to_string(), obj::kind(&t).to_string());
                    if filter.is_excluded_resource(&group, &kind, &destination.server) {
                        conditions.push(AppCondition::new(
                            ConditionType::ExcludedResourceWarning,
                            format!(
                                "Resource {}/{} {} is excluded in the settings",
                                group,
                                kind,
                                obj::name(&t)
                            ),
                        ));
                    } else {
                        kept.push(t);
                    }
                }
                target_objs = kept;
            }
            Err(e) => {
                conditions.push(AppCondition::new(ConditionType::ComparisonError, e.to_string()));
            }
        }

        let mut live_by_key: BTreeMap<ResourceKey, Value> =
            match self.live_state.get_managed_live_objs(app, &target_objs).await {
                Ok(m) => m,
                Err(e) => {
                    conditions.push(AppCondition::new(ConditionType::ComparisonError, e.to_string()));
                    failed_to_load = true;
                    BTreeMap::new()
                }
            };
        debug!(live = live_by_key.len(), "retrieved live manifests");

        live_by_key.retain(|_, v| project.is_live_resource_permitted(v, &destination.server));

        for live in live_by_key.values() {
            let owner = obj::app_instance_label(live, &settings.app_label_key);
            if !owner.is_empty() && owner != app.name {
                conditions.push(AppCondition::new(
                    ConditionType::SharedResourceWarning,
                    format!(
                        "{}/{} is part of a different application: {}",
                        obj::kind(live),
                        obj::name(live),
                        owner
                    ),
                ));
            }
        }

        let reconciliation =
            rudder_sync::reconcile(target_objs, live_by_key, &destination.namespace, info.as_ref());

        let diffs = match rudder_diff::diff_array(
            &reconciliation.target,
            &reconciliation.live,
            &settings.normalizer,
        ) {
            Ok(d) => d,
            Err(e) => {
                conditions.push(AppCondition::new(ConditionType::ComparisonError, e.to_string()));
                failed_to_load = true;
                vec![DiffResult::default(); reconciliation.target.len()]
            }
        };

        let mut sync_code = SyncStatusCode::Synced;
        let mut summaries: Vec<ResourceStatus> = Vec::with_capacity(reconciliation.target.len());
        for (i, diff_res) in diffs.iter().enumerate() {
            let target_obj = &reconciliation.target[i];
            let live_obj = &reconciliation.live[i];
            let Some(o) = live_obj.as_ref().or(target_obj.as_ref()) else {
                summaries.push(ResourceStatus::default());
                continue;
            };
            let requires_pruning = target_obj.is_none() && live_obj.is_some();
            let mut res = ResourceStatus {
                group: obj::group(o).to_string(),
                version: obj::version(o).to_string(),
                kind: obj::kind(o).to_string(),
                namespace: obj::namespace(o).to_string(),
                name: obj::name(o).to_string(),
                status: SyncStatusCode::Synced,
                health: None,
                hook: hook::is_hook(o),
                requires_pruning,
            };
            let out_of_sync = diff_res.modified || target_obj.is_none() || live_obj.is_none();
            if res.hook || annotations::is_ignored(o) {
                // Recorded, but never drives the aggregate.
                res.status = if out_of_sync { SyncStatusCode::OutOfSync } else { SyncStatusCode::Synced };
            } else if out_of_sync {
                res.status = SyncStatusCode::OutOfSync;
                if !(requires_pruning && annotations::ignores_extraneous(o)) {
                    sync_code = SyncStatusCode::OutOfSync;
                }
            } else {
                res.status = SyncStatusCode::Synced;
            }

            let gk = obj::group_kind(o);
            let namespaced = matches!(
                self.live_state.is_namespaced(&destination.server, &gk),
                Ok(true)
            );
            if !project.is_group_kind_permitted(&gk, namespaced) {
                res.status = SyncStatusCode::Unknown;
            }
            // nothing definite can be said when an upstream failed to load
            if failed_to_load {
                res.status = SyncStatusCode::Unknown;
            }
            summaries.push(res);
        }

        if failed_to_load {
            sync_code = SyncStatusCode::Unknown;
        }
        let sync_status = SyncStatus {
            status: sync_code,
            compared_to: ComparedTo { source, destination },
            revision: resolved_revision,
        };

        let health_status = match rudder_health::set_application_health(
            &mut summaries,
            &reconciliation.live,
            &settings.overrides,
            &|o| !is_self_referenced(app, o),
        ) {
            Ok(h) => h,
            Err(e) => {
                conditions.push(AppCondition::new(ConditionType::ComparisonError, e.to_string()));
                HealthStatus::new(HealthStatusCode::Unknown)
            }
        };

        let managed_resources: Vec<ManagedResource> = reconciliation
            .target
            .into_iter()
            .zip(reconciliation.live)
            .zip(diffs)
            .zip(summaries.iter())
            .map(|(((target, live), diff), res)| ManagedResource {
                target,
                live,
                diff,
                group: res.group.clone(),
                version: res.version.clone(),
                kind: res.kind.clone(),
                namespace: res.namespace.clone(),
                name: res.name.clone(),
                hook: res.hook,
            })
            .collect();

        let conditions = merge_conditions(&app.status.conditions, conditions, &EVALUATED_CONDITIONS);

        histogram!("compare_app_state_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(
            application = %app.name,
            sync = ?sync_status.status,
            health = ?health_status.status,
            resources = summaries.len(),
            took_ms = %started.elapsed().as_millis(),
            "comparison finished"
        );

        ComparisonResult {
            sync_status,
            health_status,
            resources: summaries,
            managed_resources,
            conditions,
            app_source_type,
        }
    }

    /// Append one deployment record to `/status/history`, truncated to the
    /// application's configured limit, as a single merge patch.
    pub async fn persist_revision_history(
        &self,
        app: &Application,
        revision: &str,
        source: ApplicationSource,
    ) -> ApiResult<()> {
        let mut history = app.status.history.clone();
        let next_id = history.last().map(|h| h.id + 1).unwrap_or(0);
        history.push(RevisionHistory {
            id: next_id,
            revision: revision.to_string(),
            deployed_at: Utc::now(),
            source,
        });
        let limit = app.spec.revision_history_limit();
        if history.len() > limit {
            history.drain(..history.len() - limit);
        }
        let patch = serde_json::json!({ "status": { "history": history } });
        self.app_store.merge_patch_status(&app.name, patch).await
    }
}

/// The live representation of the application itself is excluded from its
/// own health aggregation.
fn is_self_referenced(app: &Application, o: &Value) -> bool {
    let r = ObjectRef::from_obj(o);
    r.kind == "Application" && r.api_version.starts_with("rudder.io/") && r.name == app.name
}

/// Live objects of a pass, slot-aligned with its resources.
pub fn live_objs(res: &[ManagedResource]) -> Vec<Option<&Value>> {
    res.iter().map(|m| m.live.as_ref()).collect()
}
