//! Sync and health status codes, per-resource summaries and application
//! conditions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::{ApplicationSource, Destination};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatusCode {
    Synced,
    OutOfSync,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HealthStatusCode {
    Healthy,
    Suspended,
    Progressing,
    Degraded,
    Missing,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthStatusCode,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl HealthStatus {
    pub fn new(status: HealthStatusCode) -> Self {
        Self { status, message: String::new() }
    }

    pub fn with_message(status: HealthStatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

/// What a sync status was computed against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparedTo {
    pub source: ApplicationSource,
    pub destination: Destination,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub status: SyncStatusCode,
    pub compared_to: ComparedTo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// Per-slot summary row of a comparison pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub status: SyncStatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthStatus>,
    pub hook: bool,
    pub requires_pruning: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    ComparisonError,
    RepeatedResourceWarning,
    ExcludedResourceWarning,
    SharedResourceWarning,
}

/// Advisory diagnostic attached to an application by a comparison pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppCondition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl AppCondition {
    pub fn new(condition_type: ConditionType, message: impl Into<String>) -> Self {
        Self { condition_type, message: message.into(), last_transition_time: Utc::now() }
    }
}

/// Merge a pass's fresh conditions into an existing set. Types listed in
/// `evaluated` are replace-all-of-kind: every existing condition of such a
/// type is dropped in favor of the fresh ones. Other types pass through
/// untouched. A fresh condition whose type and message match a dropped one
/// keeps the earlier transition timestamp.
pub fn merge_conditions(
    existing: &[AppCondition],
    fresh: Vec<AppCondition>,
    evaluated: &[ConditionType],
) -> Vec<AppCondition> {
    let mut out: Vec<AppCondition> = existing
        .iter()
        .filter(|c| !evaluated.contains(&c.condition_type))
        .cloned()
        .collect();
    for mut c in fresh {
        if let Some(prev) = existing
            .iter()
            .find(|p| p.condition_type == c.condition_type && p.message == c.message)
        {
            c.last_transition_time = prev.last_transition_time;
        }
        out.push(c);
    }
    out
}
