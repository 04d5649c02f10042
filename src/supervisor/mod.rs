// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-kind label injection into target workloads.
//!
//! A supervisor owns three operations on one kind of target: inject a usage's labels,
//! revert exactly what that usage injected, and report what it injected. The built-in
//! Deployment supervisor works on typed objects; every other kind goes through the
//! generic supervisor built from a UsageKind.

pub mod deployment;
pub mod generic;
pub mod manipulator;
pub mod registry;
pub mod tracer;

pub use deployment::DeploymentSupervisor;
pub use generic::GenericSupervisor;
pub use manipulator::LabelManipulator;
pub use registry::SupervisorRegistry;
pub use tracer::{MetaTracer, UsageAnnotationTracer, ValueTracer};

use crate::error::{BindingUsageError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;

#[async_trait]
pub trait KubernetesResourceSupervisor: Send + Sync {
    /// Inject `labels` into the target on behalf of `usage_name`. Fails without writing
    /// anything if one of the keys is already set by someone else.
    async fn ensure_labels_created(
        &self,
        namespace: &str,
        name: &str,
        usage_name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Remove the labels `usage_name` injected. A missing target is not an error.
    async fn ensure_labels_deleted(&self, namespace: &str, name: &str, usage_name: &str) -> Result<()>;

    /// Labels injected by `usage_name`. Returns the not-found kind when the target is
    /// gone or the injected labels are no longer on it.
    async fn get_injected_labels(
        &self,
        namespace: &str,
        name: &str,
        usage_name: &str,
    ) -> Result<BTreeMap<String, String>>;

    fn has_synced(&self) -> bool;
}

/// Check `desired` against the live labels and return the keys this usage injected
/// earlier but no longer wants.
pub(crate) fn plan_injection(
    live: &BTreeMap<String, String>,
    previously_injected: &BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
) -> Result<Vec<String>> {
    let conflicts: Vec<String> = desired
        .keys()
        .filter(|k| live.contains_key(*k) && !previously_injected.contains_key(*k))
        .cloned()
        .collect();
    if !conflicts.is_empty() {
        return Err(BindingUsageError::LabelsConflict { keys: conflicts });
    }

    Ok(previously_injected
        .keys()
        .filter(|k| !desired.contains_key(*k))
        .cloned()
        .collect())
}

/// Not-found unless every injected label is still on the target with its value.
pub(crate) fn verify_injected(
    live: &BTreeMap<String, String>,
    injected: BTreeMap<String, String>,
    target: &str,
    usage_name: &str,
) -> Result<BTreeMap<String, String>> {
    let missing: Vec<&String> = injected
        .iter()
        .filter(|(k, v)| live.get(*k) != Some(*v))
        .map(|(k, _)| k)
        .collect();
    if !missing.is_empty() {
        return Err(BindingUsageError::NotFound(format!(
            "labels {:?} injected by usage {} are missing on {}",
            missing, usage_name, target
        )));
    }
    Ok(injected)
}
