// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The PodPreset derived from a usage: injects the binding secret as environment into
//! every pod carrying the usage's selector label.

use crate::constants::labels::USAGE_PREFIX;
use crate::error::{BindingUsageError, Result};
use crate::types::pod_preset::{EnvFromSource, PodPreset, PodPresetSelector, PodPresetSpec, SecretReference};
use crate::types::{ServiceBinding, ServiceBindingUsage};
use kube::api::{DeleteParams, ObjectMeta, PostParams};
use kube::{Api, Resource, ResourceExt};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Stable, DNS-safe PodPreset name for a usage
pub fn pod_preset_name(usage_name: &str) -> String {
    format!("{:x}", Sha256::digest(usage_name.as_bytes()))
}

/// Selector label `use-<uid>: <generation>`.
///
/// The value is `metadata.generation`, not the resourceVersion: status and finalizer
/// writes bump the resourceVersion but leave the generation alone, so only a spec
/// change moves the label and the pods of the old generation stop matching.
pub fn selector_labels(usage: &ServiceBindingUsage) -> Result<BTreeMap<String, String>> {
    let uid = usage.uid().ok_or_else(|| {
        BindingUsageError::InvalidResource(format!("usage {} has no uid", usage.key()))
    })?;
    let generation = usage.metadata.generation.unwrap_or_default();
    Ok(BTreeMap::from([(
        format!("{}{}", USAGE_PREFIX, uid),
        generation.to_string(),
    )]))
}

pub fn build_pod_preset(usage: &ServiceBindingUsage, binding: &ServiceBinding) -> Result<PodPreset> {
    let owner = usage.controller_owner_ref(&()).ok_or_else(|| {
        BindingUsageError::InvalidResource(format!("usage {} has no uid", usage.key()))
    })?;

    Ok(PodPreset {
        metadata: ObjectMeta {
            name: Some(pod_preset_name(&usage.name_any())),
            namespace: usage.namespace(),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: PodPresetSpec {
            selector: PodPresetSelector {
                match_labels: selector_labels(usage)?,
            },
            env_from: vec![EnvFromSource {
                prefix: usage.env_prefix().map(String::from),
                secret_ref: Some(SecretReference {
                    name: binding.secret_name(),
                }),
            }],
        },
    })
}

/// Union of the selector labels and the labels the service class declares. A key in
/// both is a conflict; the union would silently drop one of the values.
pub fn merge_labels(
    selector: &BTreeMap<String, String>,
    binding_labels: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let clashing: Vec<&str> = binding_labels
        .keys()
        .filter(|k| selector.contains_key(*k))
        .map(String::as_str)
        .collect();
    if !clashing.is_empty() {
        return Err(BindingUsageError::LabelsConflict {
            keys: clashing.into_iter().map(String::from).collect(),
        });
    }

    let mut merged = selector.clone();
    merged.extend(binding_labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(merged)
}

/// Create the PodPreset; an existing one is deleted and recreated so consumers
/// watching it observe a fresh object.
pub async fn upsert_pod_preset(api: &Api<PodPreset>, preset: &PodPreset) -> Result<()> {
    let name = preset.name_any();
    match api.create(&PostParams::default(), preset).await {
        Ok(_) => {
            info!("Created PodPreset {}", name);
            return Ok(());
        }
        Err(e) => {
            let err = BindingUsageError::from(e);
            if !err.is_already_exists() {
                return Err(err);
            }
        }
    }

    debug!("PodPreset {} exists, recreating", name);
    delete_pod_preset(api, &name).await?;
    api.create(&PostParams::default(), preset).await?;
    info!("Recreated PodPreset {}", name);
    Ok(())
}

/// Idempotent: a missing PodPreset is not an error.
pub async fn delete_pod_preset(api: &Api<PodPreset>, name: &str) -> Result<()> {
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(e) => {
            let err = BindingUsageError::from(e);
            if err.is_not_found() {
                Ok(())
            } else {
                Err(err)
            }
        }
    }
}
