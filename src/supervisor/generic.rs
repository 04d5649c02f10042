// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Supervisor for any kind described by a UsageKind.
//!
//! Objects are handled as untyped JSON: the label map is found through the kind's
//! labels path and the ledger lives in `metadata.annotations`. Writes are full
//! updates carrying the resourceVersion we read, so a concurrent edit surfaces as a
//! 409 and the reconcile is retried.

use crate::error::{BindingUsageError, Result};
use crate::supervisor::manipulator::LabelManipulator;
use crate::supervisor::tracer::{UsageAnnotationTracer, ValueTracer};
use crate::supervisor::{plan_injection, verify_injected, KubernetesResourceSupervisor};
use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject, PostParams};
use kube::{Api, Client};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

pub struct GenericSupervisor {
    client: Client,
    resource: ApiResource,
    manipulator: LabelManipulator,
    tracer: ValueTracer,
}

impl GenericSupervisor {
    pub fn new(client: Client, resource: ApiResource, manipulator: LabelManipulator) -> Self {
        Self {
            client,
            resource,
            manipulator,
            tracer: ValueTracer::new(),
        }
    }

    pub fn resource(&self) -> &ApiResource {
        &self.resource
    }

    pub fn labels_path(&self) -> String {
        self.manipulator.path()
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }

    fn describe(&self, namespace: &str, name: &str) -> String {
        format!("{} {}/{}", self.resource.kind, namespace, name)
    }

    async fn fetch(&self, namespace: &str, name: &str) -> Result<Option<Value>> {
        match self.api(namespace).get_opt(name).await? {
            Some(obj) => Ok(Some(serde_json::to_value(obj)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, namespace: &str, name: &str, object: Value) -> Result<()> {
        let object: DynamicObject = serde_json::from_value(object)?;
        self.api(namespace)
            .replace(name, &PostParams::default(), &object)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KubernetesResourceSupervisor for GenericSupervisor {
    #[instrument(skip(self, labels), fields(kind = %self.resource.kind))]
    async fn ensure_labels_created(
        &self,
        namespace: &str,
        name: &str,
        usage_name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        let Some(mut object) = self.fetch(namespace, name).await? else {
            return Err(BindingUsageError::NotFound(self.describe(namespace, name)));
        };

        let live = self.manipulator.labels(&object)?;
        let previously = self.tracer.get_injected_labels(&object, usage_name)?;
        let stale = plan_injection(&live, &previously, labels)?;
        let in_place = labels.iter().all(|(k, v)| live.get(k) == Some(v));
        if stale.is_empty() && previously == *labels && in_place {
            debug!("{} already carries the labels", self.describe(namespace, name));
            return Ok(());
        }

        self.manipulator.delete(&mut object, &stale)?;
        self.manipulator.apply(&mut object, labels)?;
        self.tracer
            .set_annotation_about_binding_usage(&mut object, usage_name, labels)?;
        self.update(namespace, name, object).await?;

        info!("Labels injected into {}", self.describe(namespace, name));
        Ok(())
    }

    #[instrument(skip(self), fields(kind = %self.resource.kind))]
    async fn ensure_labels_deleted(&self, namespace: &str, name: &str, usage_name: &str) -> Result<()> {
        let Some(mut object) = self.fetch(namespace, name).await? else {
            debug!("{} is gone, nothing to revert", self.describe(namespace, name));
            return Ok(());
        };

        let injected = self.tracer.get_injected_labels(&object, usage_name)?;
        if injected.is_empty() {
            debug!("Nothing tracked for usage {} on {}", usage_name, self.describe(namespace, name));
            return Ok(());
        }

        self.manipulator.delete(&mut object, injected.keys())?;
        self.tracer
            .delete_annotation_about_binding_usage(&mut object, usage_name)?;
        self.update(namespace, name, object).await?;

        info!("Labels reverted on {}", self.describe(namespace, name));
        Ok(())
    }

    async fn get_injected_labels(
        &self,
        namespace: &str,
        name: &str,
        usage_name: &str,
    ) -> Result<BTreeMap<String, String>> {
        let Some(object) = self.fetch(namespace, name).await? else {
            return Err(BindingUsageError::NotFound(self.describe(namespace, name)));
        };
        let injected = self.tracer.get_injected_labels(&object, usage_name)?;
        verify_injected(
            &self.manipulator.labels(&object)?,
            injected,
            &self.describe(namespace, name),
            usage_name,
        )
    }

    /// Reads go straight to the API server, there is no cache to wait for.
    fn has_synced(&self) -> bool {
        true
    }
}
