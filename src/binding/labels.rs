// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Labels a service class asks to have put on every workload bound to it.

use crate::error::{BindingUsageError, Result};
use crate::types::service_catalog::{ClusterServiceClass, ServiceBinding, ServiceClass, ServiceInstance};
use async_trait::async_trait;
use kube::{Api, Client, ResourceExt};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

#[async_trait]
pub trait BindingLabelsFetcher: Send + Sync {
    async fn fetch(&self, binding: &ServiceBinding) -> Result<BTreeMap<String, String>>;
}

/// Follows binding → instance → (cluster) service class and reads
/// `spec.externalMetadata.labels`.
pub struct ServiceClassLabelsFetcher {
    client: Client,
}

impl ServiceClassLabelsFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BindingLabelsFetcher for ServiceClassLabelsFetcher {
    async fn fetch(&self, binding: &ServiceBinding) -> Result<BTreeMap<String, String>> {
        let namespace = binding.namespace().unwrap_or_default();
        let instance_name = &binding.spec.instance_ref.name;

        let instances: Api<ServiceInstance> = Api::namespaced(self.client.clone(), &namespace);
        let instance = instances.get_opt(instance_name).await?.ok_or_else(|| {
            BindingUsageError::NotFound(format!("service instance {}/{}", namespace, instance_name))
        })?;

        let metadata = if let Some(class_ref) = &instance.spec.cluster_service_class_ref {
            let classes: Api<ClusterServiceClass> = Api::all(self.client.clone());
            classes
                .get_opt(&class_ref.name)
                .await?
                .ok_or_else(|| BindingUsageError::NotFound(format!("cluster service class {}", class_ref.name)))?
                .spec
                .external_metadata
        } else if let Some(class_ref) = &instance.spec.service_class_ref {
            let classes: Api<ServiceClass> = Api::namespaced(self.client.clone(), &namespace);
            classes
                .get_opt(&class_ref.name)
                .await?
                .ok_or_else(|| {
                    BindingUsageError::NotFound(format!("service class {}/{}", namespace, class_ref.name))
                })?
                .spec
                .external_metadata
        } else {
            return Err(BindingUsageError::InvalidResource(format!(
                "service instance {}/{} references no service class",
                namespace, instance_name
            )));
        };

        let labels = labels_from_external_metadata(metadata.as_ref())?;
        debug!(
            "Service class of binding {}/{} declares {} label(s)",
            namespace,
            binding.name_any(),
            labels.len()
        );
        Ok(labels)
    }
}

fn labels_from_external_metadata(metadata: Option<&Value>) -> Result<BTreeMap<String, String>> {
    let labels = match metadata.and_then(|m| m.get("labels")) {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(BindingUsageError::FieldShape {
                path: "spec.externalMetadata.labels".to_string(),
                reason: format!("expected a map, found {}", other),
            })
        }
    };

    labels
        .iter()
        .map(|(k, v)| match v {
            Value::String(s) => Ok((k.clone(), s.clone())),
            other => Err(BindingUsageError::FieldShape {
                path: format!("spec.externalMetadata.labels.{}", k),
                reason: format!("expected a string, found {}", other),
            }),
        })
        .collect()
}
