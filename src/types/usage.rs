// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[kube(
    group = "servicecatalog.kyma-project.io",
    version = "v1alpha1",
    kind = "ServiceBindingUsage"
)]
#[kube(namespaced)]
#[kube(status = "ServiceBindingUsageStatus")]
#[serde(rename_all = "camelCase")]
pub struct ServiceBindingUsageSpec {
    pub service_binding_ref: LocalReference,
    pub used_by: UsedBy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
    /// Bumped externally (or by the guard) to force another reconcile
    #[serde(default)]
    pub reprocess_request: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
pub struct LocalReference {
    pub name: String,
}

/// Target workload: `kind` is the name of a registered usage kind, e.g. `deployment`
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, schemars::JsonSchema)]
pub struct UsedBy {
    pub kind: String,
    pub name: String,
}

impl fmt::Display for UsedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Parameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_prefix: Option<EnvPrefix>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
pub struct EnvPrefix {
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBindingUsageStatus {
    #[serde(default)]
    pub conditions: Vec<UsageCondition>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsageCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub const READY_CONDITION: &str = "Ready";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Reasons reported on the Ready condition when a reconcile fails
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub enum ConditionReason {
    ServiceBindingGetError,
    ServiceBindingOngoingAsyncOperation,
    ServiceBindingNotReady,
    PodPresetUpsertError,
    PodPresetDeleteError,
    FetchBindingLabelsError,
    ApplyLabelsConflictError,
    EnsureLabelsAppliedError,
    EnsureLabelsDeletedError,
    AddOwnerReferenceError,
    GetStoredSpecError,
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Namespace/name identity of a usage
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UsageKey {
    pub namespace: String,
    pub name: String,
}

impl UsageKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for UsageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl ServiceBindingUsage {
    pub fn key(&self) -> UsageKey {
        UsageKey::new(self.namespace().unwrap_or_default(), self.name_any())
    }

    pub fn env_prefix(&self) -> Option<&str> {
        self.spec
            .parameters
            .as_ref()
            .and_then(|p| p.env_prefix.as_ref())
            .map(|p| p.name.as_str())
            .filter(|p| !p.is_empty())
    }

    pub fn ready_condition(&self) -> Option<&UsageCondition> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.iter().find(|c| c.condition_type == READY_CONDITION))
    }
}

/// Replace the Ready condition. The transition time only moves when the status flips.
/// Returns false when nothing but the update time would change.
pub fn set_ready_condition(
    conditions: &mut Vec<UsageCondition>,
    status: ConditionStatus,
    reason: Option<ConditionReason>,
    message: Option<String>,
    now: &str,
) -> bool {
    let reason = reason.map(|r| r.to_string());
    let existing = conditions
        .iter()
        .position(|c| c.condition_type == READY_CONDITION);

    let last_transition_time = match existing.and_then(|i| conditions.get(i)) {
        Some(current)
            if current.status == status
                && current.reason == reason
                && current.message == message =>
        {
            return false;
        }
        Some(current) if current.status == status => current.last_transition_time.clone(),
        _ => Some(now.to_string()),
    };

    let condition = UsageCondition {
        condition_type: READY_CONDITION.to_string(),
        status,
        last_update_time: Some(now.to_string()),
        last_transition_time,
        reason,
        message,
    };

    match existing {
        Some(i) => conditions[i] = condition,
        None => conditions.push(condition),
    }
    true
}
