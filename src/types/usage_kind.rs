// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use kube::core::GroupVersionKind;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Describes a workload kind that usages may target, and where its pod labels live.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[kube(
    group = "servicecatalog.kyma-project.io",
    version = "v1alpha1",
    kind = "UsageKind"
)]
#[serde(rename_all = "camelCase")]
pub struct UsageKindSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub resource: UsageKindResource,
    /// Dotted path to the label map, e.g. `spec.template.metadata.labels`
    pub labels_path: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub struct UsageKindResource {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl UsageKind {
    pub fn group_version_kind(&self) -> GroupVersionKind {
        let r = &self.spec.resource;
        GroupVersionKind::gvk(&r.group, &r.version, &r.kind)
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|name| name == finalizer))
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
