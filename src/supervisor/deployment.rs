// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Built-in supervisor for apps/v1 Deployments. Labels go on the pod template and
//! changes are written with a merge patch.

use crate::error::{BindingUsageError, Result};
use crate::kubernetes::{create_merge_patch, is_empty_patch, patch_params};
use crate::supervisor::tracer::{MetaTracer, UsageAnnotationTracer};
use crate::supervisor::{plan_injection, verify_injected, KubernetesResourceSupervisor};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::Patch;
use kube::{Api, Client};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

pub struct DeploymentSupervisor {
    client: Client,
    tracer: MetaTracer,
}

impl DeploymentSupervisor {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            tracer: MetaTracer,
        }
    }

    fn api(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn patch(&self, namespace: &str, original: &Deployment, modified: &Deployment) -> Result<()> {
        let patch = create_merge_patch(
            &serde_json::to_value(original)?,
            &serde_json::to_value(modified)?,
        );
        if is_empty_patch(&patch) {
            debug!("Deployment {}/{} already up to date", namespace, name_of(original));
            return Ok(());
        }
        self.api(namespace)
            .patch(&name_of(original), &patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

fn name_of(deployment: &Deployment) -> String {
    deployment.metadata.name.clone().unwrap_or_default()
}

fn template_labels(deployment: &Deployment) -> BTreeMap<String, String> {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.metadata.as_ref())
        .and_then(|m| m.labels.clone())
        .unwrap_or_default()
}

fn template_labels_mut(deployment: &mut Deployment) -> Result<&mut BTreeMap<String, String>> {
    let spec = deployment.spec.as_mut().ok_or_else(|| {
        BindingUsageError::InvalidResource(format!("deployment {} has no spec", name_of_meta(&deployment.metadata)))
    })?;
    Ok(spec
        .template
        .metadata
        .get_or_insert_with(Default::default)
        .labels
        .get_or_insert_with(BTreeMap::new))
}

fn name_of_meta(meta: &kube::api::ObjectMeta) -> String {
    meta.name.clone().unwrap_or_default()
}

#[async_trait]
impl KubernetesResourceSupervisor for DeploymentSupervisor {
    #[instrument(skip(self, labels))]
    async fn ensure_labels_created(
        &self,
        namespace: &str,
        name: &str,
        usage_name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        let Some(original) = self.get(namespace, name).await? else {
            return Err(BindingUsageError::NotFound(format!(
                "deployment {}/{}",
                namespace, name
            )));
        };

        let mut modified = original.clone();
        let previously = self.tracer.get_injected_labels(&modified.metadata, usage_name)?;
        let stale = plan_injection(&template_labels(&original), &previously, labels)?;

        let target = template_labels_mut(&mut modified)?;
        for key in &stale {
            target.remove(key);
        }
        target.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));

        self.tracer
            .set_annotation_about_binding_usage(&mut modified.metadata, usage_name, labels)?;
        self.patch(namespace, &original, &modified).await?;

        info!("Labels injected into deployment {}/{}", namespace, name);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn ensure_labels_deleted(&self, namespace: &str, name: &str, usage_name: &str) -> Result<()> {
        let Some(original) = self.get(namespace, name).await? else {
            debug!("Deployment {}/{} is gone, nothing to revert", namespace, name);
            return Ok(());
        };

        let mut modified = original.clone();
        let injected = self.tracer.get_injected_labels(&modified.metadata, usage_name)?;
        if !injected.is_empty() {
            let target = template_labels_mut(&mut modified)?;
            for key in injected.keys() {
                target.remove(key);
            }
        }

        self.tracer
            .delete_annotation_about_binding_usage(&mut modified.metadata, usage_name)?;
        self.patch(namespace, &original, &modified).await?;

        info!("Labels reverted on deployment {}/{}", namespace, name);
        Ok(())
    }

    async fn get_injected_labels(
        &self,
        namespace: &str,
        name: &str,
        usage_name: &str,
    ) -> Result<BTreeMap<String, String>> {
        let Some(deployment) = self.get(namespace, name).await? else {
            return Err(BindingUsageError::NotFound(format!(
                "deployment {}/{}",
                namespace, name
            )));
        };
        let injected = self.tracer.get_injected_labels(&deployment.metadata, usage_name)?;
        verify_injected(
            &template_labels(&deployment),
            injected,
            &format!("deployment {}/{}", namespace, name),
            usage_name,
        )
    }

    /// Reads go straight to the API server, there is no cache to wait for.
    fn has_synced(&self) -> bool {
        true
    }
}
