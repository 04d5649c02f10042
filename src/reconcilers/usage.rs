// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Usage reconciler - drives every ServiceBindingUsage to its PodPreset plus labels on
//! the target workload, and reverts both when the usage goes away.

use crate::binding::{build_pod_preset, delete_pod_preset, merge_labels, pod_preset_name, upsert_pod_preset, BindingLabelsFetcher};
use crate::binding::pod_preset::selector_labels;
use crate::constants::finalizers::USAGE;
use crate::error::{BindingUsageError, Result, WithReason};
use crate::guard::GuardHandle;
use crate::kubernetes::patch_params;
use crate::retry::{backoff_delay, RetryTracker};
use crate::shutdown::{self, ShutdownRx};
use crate::storage::{AppliedSpec, AppliedSpecStore};
use crate::supervisor::SupervisorRegistry;
use crate::types::usage::{set_ready_condition, ConditionReason, ConditionStatus, UsageKey, UsedBy};
use crate::types::{PodPreset, ServiceBinding, ServiceBindingUsage};
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{
    api::Patch,
    runtime::{
        controller::{self, Action},
        finalizer::{finalizer, Event as Finalizer},
        reflector::ObjectRef,
        watcher, Controller,
    },
    Api, Client, Resource, ResourceExt,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Told about every usage whose cleanup finished, before its finalizer is released,
/// once per kind the usage was attached to.
pub trait UsageDeleteListener: Send + Sync {
    fn on_deleted(&self, key: &UsageKey, kind: &str);
}

pub struct UsageReconciler {
    client: Client,
    registry: Arc<SupervisorRegistry>,
    store: AppliedSpecStore,
    labels_fetcher: Arc<dyn BindingLabelsFetcher>,
    guard: GuardHandle,
    delete_listeners: Vec<Arc<dyn UsageDeleteListener>>,
    retries: RetryTracker,
}

impl UsageReconciler {
    pub fn new(
        client: Client,
        registry: Arc<SupervisorRegistry>,
        store: AppliedSpecStore,
        labels_fetcher: Arc<dyn BindingLabelsFetcher>,
        guard: GuardHandle,
    ) -> Self {
        Self {
            client,
            registry,
            store,
            labels_fetcher,
            guard,
            delete_listeners: Vec::new(),
            retries: RetryTracker::new(),
        }
    }

    pub fn with_delete_listener(mut self, listener: Arc<dyn UsageDeleteListener>) -> Self {
        self.delete_listeners.push(listener);
        self
    }

    pub async fn run(self, shutdown_rx: ShutdownRx) -> anyhow::Result<()> {
        let usages: Api<ServiceBindingUsage> = Api::all(self.client.clone());
        let bindings: Api<ServiceBinding> = Api::all(self.client.clone());
        let context = Arc::new(self);

        let controller = Controller::new(usages, watcher::Config::default())
            .with_config(controller::Config::default().concurrency(1));
        let cache = controller.store();

        controller
            .watches(bindings, watcher::Config::default(), move |binding| {
                usages_for_binding(&cache.state(), &binding)
            })
            .graceful_shutdown_on(shutdown::requested(shutdown_rx))
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled usage: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        info!("Usage reconciler stopped");
        Ok(())
    }

    fn usages(&self, namespace: &str) -> Api<ServiceBindingUsage> {
        Api::namespaced(self.client.clone(), namespace)
    }

    #[instrument(skip(self, usage), fields(usage = %usage.key()))]
    async fn apply(&self, usage: &ServiceBindingUsage) -> Result<Action> {
        let key = usage.key();
        let binding = self.ensure_binding(usage).await?;

        if binding.is_async_operation_in_progress() {
            return Err(BindingUsageError::reconcile(
                ConditionReason::ServiceBindingOngoingAsyncOperation,
                format!("ServiceBinding {} has an ongoing async operation", binding.name_any()),
            ));
        }
        if !binding.is_ready() {
            return Err(BindingUsageError::reconcile(
                ConditionReason::ServiceBindingNotReady,
                format!("ServiceBinding {} is not ready", binding.name_any()),
            ));
        }

        let preset = build_pod_preset(usage, &binding).with_reason(ConditionReason::PodPresetUpsertError)?;
        let presets: Api<PodPreset> = Api::namespaced(self.client.clone(), &key.namespace);
        upsert_pod_preset(&presets, &preset)
            .await
            .with_reason(ConditionReason::PodPresetUpsertError)?;

        let binding_labels = self
            .labels_fetcher
            .fetch(&binding)
            .await
            .with_reason(ConditionReason::FetchBindingLabelsError)?;
        let labels = selector_labels(usage)
            .and_then(|selector| merge_labels(&selector, &binding_labels))
            .with_reason(ConditionReason::ApplyLabelsConflictError)?;

        self.reconcile_labels(&key, &usage.spec.used_by, labels).await?;
        self.guard.register(key).await;

        self.set_ready(usage, ConditionStatus::True, None, None).await?;
        info!("Usage {} is ready", usage.key());
        Ok(Action::await_change())
    }

    #[instrument(skip(self, usage), fields(usage = %usage.key()))]
    async fn cleanup(&self, usage: &ServiceBindingUsage) -> Result<Action> {
        let key = usage.key();

        let presets: Api<PodPreset> = Api::namespaced(self.client.clone(), &key.namespace);
        delete_pod_preset(&presets, &pod_preset_name(&key.name))
            .await
            .with_reason(ConditionReason::PodPresetDeleteError)?;

        let stored = self
            .store
            .get(&key)
            .await
            .with_reason(ConditionReason::GetStoredSpecError)?;
        let mut kinds = vec![usage.spec.used_by.kind.clone()];
        if let Some(stored) = stored {
            self.revert(&key, &stored.used_by).await?;
            self.store
                .delete(&key)
                .await
                .with_reason(ConditionReason::EnsureLabelsDeletedError)?;
            if stored.used_by.kind != usage.spec.used_by.kind {
                kinds.push(stored.used_by.kind);
            }
        }

        for listener in &self.delete_listeners {
            for kind in &kinds {
                listener.on_deleted(&key, kind);
            }
        }
        self.guard.unregister(key.clone()).await;

        info!("Usage {} cleaned up", key);
        Ok(Action::await_change())
    }

    /// Fetch the binding and make sure the usage carries an owner reference to it.
    async fn ensure_binding(&self, usage: &ServiceBindingUsage) -> Result<ServiceBinding> {
        let key = usage.key();
        let binding_name = &usage.spec.service_binding_ref.name;
        let bindings: Api<ServiceBinding> = Api::namespaced(self.client.clone(), &key.namespace);

        let binding = bindings
            .get_opt(binding_name)
            .await
            .with_reason(ConditionReason::ServiceBindingGetError)?;
        let Some(binding) = binding else {
            if binding_owner_ref(usage, binding_name).is_some() {
                self.remove_binding_owner_ref(usage, binding_name)
                    .await
                    .with_reason(ConditionReason::ServiceBindingGetError)?;
            }
            return Err(BindingUsageError::reconcile(
                ConditionReason::ServiceBindingGetError,
                format!("ServiceBinding {}/{} not found", key.namespace, binding_name),
            ));
        };

        if binding_owner_ref(usage, binding_name).is_none() {
            self.add_binding_owner_ref(usage, &binding)
                .await
                .with_reason(ConditionReason::AddOwnerReferenceError)?;
        }
        Ok(binding)
    }

    async fn add_binding_owner_ref(&self, usage: &ServiceBindingUsage, binding: &ServiceBinding) -> Result<()> {
        let owner = binding.owner_ref(&()).ok_or_else(|| {
            BindingUsageError::InvalidResource(format!("ServiceBinding {} has no uid", binding.name_any()))
        })?;
        let mut owners = usage.owner_references().to_vec();
        owners.push(owner);
        self.patch_owner_refs(usage, owners).await?;
        debug!("Added owner reference to ServiceBinding {}", binding.name_any());
        Ok(())
    }

    async fn remove_binding_owner_ref(&self, usage: &ServiceBindingUsage, binding_name: &str) -> Result<()> {
        let owners = usage
            .owner_references()
            .iter()
            .filter(|o| !is_binding_ref(o, binding_name))
            .cloned()
            .collect();
        self.patch_owner_refs(usage, owners).await?;
        debug!("Removed stale owner reference to ServiceBinding {}", binding_name);
        Ok(())
    }

    async fn patch_owner_refs(&self, usage: &ServiceBindingUsage, owners: Vec<OwnerReference>) -> Result<()> {
        let patch = json!({
            "metadata": {
                "ownerReferences": owners,
                "resourceVersion": usage.resource_version(),
            }
        });
        self.usages(&usage.namespace().unwrap_or_default())
            .patch(&usage.name_any(), &patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    /// Bring the target in line with `labels`, using the stored spec to know what was
    /// applied before.
    async fn reconcile_labels(&self, key: &UsageKey, used_by: &UsedBy, labels: BTreeMap<String, String>) -> Result<()> {
        let stored = self
            .store
            .get(key)
            .await
            .with_reason(ConditionReason::GetStoredSpecError)?;
        let desired = AppliedSpec {
            used_by: used_by.clone(),
            labels,
            applied: false,
        };

        match stored {
            None => self.apply_fresh(key, desired).await,
            Some(stored) if stored.used_by != desired.used_by || stored.labels != desired.labels => {
                info!("Usage {} moves from {} to {}, reverting previous labels", key, stored.used_by, desired.used_by);
                self.revert(key, &stored.used_by).await?;
                self.store
                    .delete(key)
                    .await
                    .with_reason(ConditionReason::EnsureLabelsDeletedError)?;
                self.apply_fresh(key, desired).await
            }
            Some(stored) => {
                if !stored.applied {
                    info!("Completing interrupted apply of usage {}", key);
                }
                self.ensure_labels(key, &desired).await?;
                if !stored.applied {
                    self.mark_applied(key, desired).await?;
                }
                Ok(())
            }
        }
    }

    /// Two phases: record the intent, label the target, then flip `applied`.
    async fn apply_fresh(&self, key: &UsageKey, desired: AppliedSpec) -> Result<()> {
        self.store
            .upsert(key, &desired)
            .await
            .with_reason(ConditionReason::EnsureLabelsAppliedError)?;
        self.ensure_labels(key, &desired).await?;
        self.mark_applied(key, desired).await
    }

    async fn mark_applied(&self, key: &UsageKey, mut spec: AppliedSpec) -> Result<()> {
        spec.applied = true;
        self.store
            .upsert(key, &spec)
            .await
            .with_reason(ConditionReason::EnsureLabelsAppliedError)
    }

    async fn ensure_labels(&self, key: &UsageKey, spec: &AppliedSpec) -> Result<()> {
        let supervisor = self
            .registry
            .get_synced(&spec.used_by.kind)
            .await
            .with_reason(ConditionReason::EnsureLabelsAppliedError)?;
        supervisor
            .ensure_labels_created(&key.namespace, &spec.used_by.name, &key.name, &spec.labels)
            .await
            .with_reason(ConditionReason::EnsureLabelsAppliedError)
    }

    async fn revert(&self, key: &UsageKey, used_by: &UsedBy) -> Result<()> {
        let supervisor = self
            .registry
            .get_synced(&used_by.kind)
            .await
            .with_reason(ConditionReason::EnsureLabelsDeletedError)?;
        match supervisor
            .ensure_labels_deleted(&key.namespace, &used_by.name, &key.name)
            .await
        {
            Err(e) if e.is_not_found() => {
                debug!("{} of usage {} is gone", used_by, key);
                Ok(())
            }
            other => other.with_reason(ConditionReason::EnsureLabelsDeletedError),
        }
    }

    /// Write the Ready condition when it changed.
    async fn set_ready(
        &self,
        usage: &ServiceBindingUsage,
        status: ConditionStatus,
        reason: Option<ConditionReason>,
        message: Option<String>,
    ) -> Result<()> {
        let mut conditions = usage
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default();
        let now = Utc::now().to_rfc3339();
        if !set_ready_condition(&mut conditions, status, reason, message, &now) {
            return Ok(());
        }

        let patch = json!({"status": {"conditions": conditions}});
        self.usages(&usage.namespace().unwrap_or_default())
            .patch_status(&usage.name_any(), &patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    /// Requeue until the retry budget is spent, then record the failure on the usage
    /// and stop.
    async fn handle_failure(&self, usage: &ServiceBindingUsage, err: BindingUsageError) -> Result<Action> {
        let key = usage.key().to_string();
        let attempts = self.retries.record_failure(&key);
        if !RetryTracker::is_exhausted(attempts) {
            warn!("Reconcile of usage {} failed (attempt {}): {}", key, attempts, err);
            return Err(err);
        }

        error!("Giving up on usage {} after {} attempts: {}", key, attempts, err);
        self.retries.forget(&key);
        let message = format!("{} (attempts: {})", err.message(), attempts);
        if let Err(e) = self
            .set_ready(usage, ConditionStatus::False, err.reason(), Some(message))
            .await
        {
            error!("Failed to record failure on usage {}: {}", key, e);
        }
        Ok(Action::await_change())
    }
}

async fn reconcile(usage: Arc<ServiceBindingUsage>, ctx: Arc<UsageReconciler>) -> Result<Action> {
    let key = usage.key();
    let api = ctx.usages(&key.namespace);

    let outcome = finalizer(&api, USAGE, usage.clone(), |event| async {
        match event {
            Finalizer::Apply(usage) => ctx.apply(&usage).await,
            Finalizer::Cleanup(usage) => ctx.cleanup(&usage).await,
        }
    })
    .await
    .map_err(BindingUsageError::from);

    match outcome {
        Ok(action) => {
            ctx.retries.forget(&key.to_string());
            Ok(action)
        }
        Err(err) => ctx.handle_failure(&usage, err).await,
    }
}

fn error_policy(usage: Arc<ServiceBindingUsage>, error: &BindingUsageError, ctx: Arc<UsageReconciler>) -> Action {
    let attempts = ctx.retries.attempts(&usage.key().to_string()).max(1);
    let delay = backoff_delay(attempts);
    debug!("Requeueing usage {} in {:?}: {}", usage.key(), delay, error);
    Action::requeue(delay)
}

fn is_binding_ref(owner: &OwnerReference, binding_name: &str) -> bool {
    owner.kind == ServiceBinding::kind(&()) && owner.name == binding_name
}

fn binding_owner_ref<'a>(usage: &'a ServiceBindingUsage, binding_name: &str) -> Option<&'a OwnerReference> {
    usage
        .owner_references()
        .iter()
        .find(|o| is_binding_ref(o, binding_name))
}

/// Usages in the binding's namespace that reference it by name.
fn usages_for_binding(usages: &[Arc<ServiceBindingUsage>], binding: &ServiceBinding) -> Vec<ObjectRef<ServiceBindingUsage>> {
    let namespace = binding.namespace();
    let name = binding.name_any();
    usages
        .iter()
        .filter(|u| u.namespace() == namespace && u.spec.service_binding_ref.name == name)
        .map(|u| ObjectRef::from_obj(u.as_ref()))
        .collect()
}
