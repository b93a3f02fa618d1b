//! The application model: a named bundle of desired resources with a
//! source reference, a destination cluster/namespace and project
//! membership.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::{AppCondition, HealthStatus, ResourceStatus, SyncStatus};

const DEFAULT_REVISION_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    pub spec: ApplicationSpec,
    #[serde(default)]
    pub status: ApplicationStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSpec {
    pub source: ApplicationSource,
    pub destination: Destination,
    pub project: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_differences: Vec<IgnoreDifference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<usize>,
}

impl ApplicationSpec {
    pub fn revision_history_limit(&self) -> usize {
        self.revision_history_limit.unwrap_or(DEFAULT_REVISION_HISTORY_LIMIT)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSource {
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_revision: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub server: String,
    pub namespace: String,
}

/// A field-level ignore rule scoped by group/kind (empty matches any) and
/// optionally by object name/namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreDifference {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub json_pointers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<AppCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<RevisionHistory>,
}

/// One deployed-revision record kept under `/status/history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionHistory {
    pub id: i64,
    pub revision: String,
    pub deployed_at: DateTime<Utc>,
    pub source: ApplicationSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_history_limit_defaults_to_ten() {
        let spec = ApplicationSpec::default();
        assert_eq!(spec.revision_history_limit(), 10);
        let spec = ApplicationSpec { revision_history_limit: Some(3), ..Default::default() };
        assert_eq!(spec.revision_history_limit(), 3);
    }
}
