// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! One drift check: are the labels a usage injected still on its target?

use crate::error::Result;
use crate::kubernetes::patch_params;
use crate::supervisor::SupervisorRegistry;
use crate::types::usage::UsageKey;
use crate::types::ServiceBindingUsage;
use kube::api::Patch;
use kube::{Api, Client};
use serde_json::json;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Every injected label is in place
    Intact,
    /// Drift found, the usage was nudged through `spec.reprocessRequest`
    Reprocessed,
    /// The usage no longer exists
    Gone,
}

#[instrument(skip(client, registry), fields(key = %key))]
pub async fn check_usage(client: &Client, registry: &SupervisorRegistry, key: &UsageKey) -> Result<CheckOutcome> {
    let api: Api<ServiceBindingUsage> = Api::namespaced(client.clone(), &key.namespace);
    let Some(usage) = api.get_opt(&key.name).await? else {
        debug!("Usage {} is gone", key);
        return Ok(CheckOutcome::Gone);
    };

    let used_by = &usage.spec.used_by;
    let supervisor = registry.get_synced(&used_by.kind).await?;
    let drifted = match supervisor
        .get_injected_labels(&key.namespace, &used_by.name, &key.name)
        .await
    {
        Ok(labels) => labels.is_empty(),
        Err(e) if e.is_not_found() => true,
        Err(e) => return Err(e),
    };
    if !drifted {
        return Ok(CheckOutcome::Intact);
    }

    let patch = json!({"spec": {"reprocessRequest": usage.spec.reprocess_request + 1}});
    api.patch(&key.name, &patch_params(), &Patch::Merge(&patch))
        .await?;
    info!("Labels of usage {} drifted from {}, requested reprocessing", key, used_by);
    Ok(CheckOutcome::Reprocessed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::{DeploymentSupervisor, KubernetesResourceSupervisor};
    use crate::test_utils::{deployment_json, deployment_path, usage_json, usage_path, FakeApiServer};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    async fn setup() -> (FakeApiServer, SupervisorRegistry) {
        let server = FakeApiServer::new()
            .with_object(&usage_path("prod", "u1"), usage_json("prod", "u1", "redis", "app"))
            .with_object(
                &deployment_path("prod", "app"),
                deployment_json("prod", "app", json!({"app": "app"})),
            );
        let registry = SupervisorRegistry::new();
        registry
            .register("deployment", Arc::new(DeploymentSupervisor::new(server.client())))
            .await;
        (server, registry)
    }

    #[tokio::test]
    async fn test_intact_usage_is_left_alone() {
        let (server, registry) = setup().await;
        DeploymentSupervisor::new(server.client())
            .ensure_labels_created(
                "prod",
                "app",
                "u1",
                &BTreeMap::from([("use-uid-u1".to_string(), "1".to_string())]),
            )
            .await
            .unwrap();

        let outcome = check_usage(&server.client(), &registry, &UsageKey::new("prod", "u1"))
            .await
            .unwrap();

        assert_eq!(outcome, CheckOutcome::Intact);
        assert_eq!(server.count("PATCH", &usage_path("prod", "u1")), 0);
    }

    #[tokio::test]
    async fn test_drift_bumps_reprocess_request() {
        let (server, registry) = setup().await;

        let outcome = check_usage(&server.client(), &registry, &UsageKey::new("prod", "u1"))
            .await
            .unwrap();

        assert_eq!(outcome, CheckOutcome::Reprocessed);
        let usage = server.object(&usage_path("prod", "u1")).unwrap();
        assert_eq!(usage["spec"]["reprocessRequest"], json!(1));
    }

    #[tokio::test]
    async fn test_missing_target_bumps_reprocess_request() {
        let (server, registry) = setup().await;
        server.remove_object(&deployment_path("prod", "app"));

        let outcome = check_usage(&server.client(), &registry, &UsageKey::new("prod", "u1"))
            .await
            .unwrap();

        assert_eq!(outcome, CheckOutcome::Reprocessed);
    }

    #[tokio::test]
    async fn test_deleted_usage() {
        let (server, registry) = setup().await;
        let outcome = check_usage(&server.client(), &registry, &UsageKey::new("prod", "other"))
            .await
            .unwrap();
        assert_eq!(outcome, CheckOutcome::Gone);
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_an_error() {
        let (server, _) = setup().await;
        let result = check_usage(
            &server.client(),
            &SupervisorRegistry::new(),
            &UsageKey::new("prod", "u1"),
        )
        .await;
        assert!(result.is_err());
    }
}
