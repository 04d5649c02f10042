// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The subset of the service-catalog API this controller reads.

use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[kube(group = "servicecatalog.k8s.io", version = "v1beta1", kind = "ServiceBinding")]
#[kube(namespaced)]
#[kube(status = "ServiceBindingStatus")]
#[serde(rename_all = "camelCase")]
pub struct ServiceBindingSpec {
    pub instance_ref: NameReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
pub struct NameReference {
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBindingStatus {
    #[serde(default)]
    pub async_op_in_progress: bool,
    #[serde(default)]
    pub conditions: Vec<ServiceBindingCondition>,
}

#[derive(Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBindingCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ServiceBinding {
    pub fn is_async_operation_in_progress(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.async_op_in_progress)
    }

    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| {
            s.conditions
                .iter()
                .any(|c| c.condition_type == "Ready" && c.status == "True")
        })
    }

    /// Name of the secret holding the credentials, defaulting to the binding name
    pub fn secret_name(&self) -> String {
        self.spec
            .secret_name
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.name_any())
    }
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[kube(group = "servicecatalog.k8s.io", version = "v1beta1", kind = "ServiceInstance")]
#[kube(namespaced)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_service_class_ref: Option<NameReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_class_ref: Option<NameReference>,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[kube(group = "servicecatalog.k8s.io", version = "v1beta1", kind = "ClusterServiceClass")]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceClassSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_metadata: Option<serde_json::Value>,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[kube(group = "servicecatalog.k8s.io", version = "v1beta1", kind = "ServiceClass")]
#[kube(namespaced)]
#[serde(rename_all = "camelCase")]
pub struct ServiceClassSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_metadata: Option<serde_json::Value>,
}
