// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use std::sync::Arc;
use tracing::info;

use binding_usage_controller::binding::ServiceClassLabelsFetcher;
use binding_usage_controller::config::Config;
use binding_usage_controller::constants::DEPLOYMENT_KIND;
use binding_usage_controller::guard::Guard;
use binding_usage_controller::kubernetes::wait_for_usage_crds;
use binding_usage_controller::reconcilers::{KindController, ProtectionController, UsageReconciler};
use binding_usage_controller::shutdown;
use binding_usage_controller::storage::AppliedSpecStore;
use binding_usage_controller::supervisor::{DeploymentSupervisor, SupervisorRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Starting binding usage controller");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: applied_spec={}/{}",
        config.applied_spec_namespace, config.applied_spec_config_map_name
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    info!("Waiting for usage CRDs to become available...");
    wait_for_usage_crds(&client).await?;

    let registry = Arc::new(SupervisorRegistry::new());
    registry
        .register(DEPLOYMENT_KIND, Arc::new(DeploymentSupervisor::new(client.clone())))
        .await;

    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    tokio::spawn(shutdown::forward_signals(shutdown_tx));

    let (guard, guard_handle) = Guard::new(client.clone(), registry.clone(), &config);
    let (protection, protection_handle) = ProtectionController::new(client.clone());
    let store = AppliedSpecStore::new(
        client.clone(),
        &config.applied_spec_namespace,
        &config.applied_spec_config_map_name,
    );
    let usage_reconciler = UsageReconciler::new(
        client.clone(),
        registry.clone(),
        store,
        Arc::new(ServiceClassLabelsFetcher::new(client.clone())),
        guard_handle,
    )
    .with_delete_listener(Arc::new(protection_handle));
    let kind_controller = KindController::new(client, registry);

    info!("Starting controllers...");

    tokio::try_join!(
        guard.run(shutdown_rx.clone()),
        kind_controller.run(shutdown_rx.clone()),
        protection.run(shutdown_rx.clone()),
        usage_reconciler.run(shutdown_rx)
    )?;

    info!("All controllers stopped");
    Ok(())
}
