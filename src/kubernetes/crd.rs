// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRD availability checking utilities

use crate::constants::crd::{GROUP, POLL_INTERVAL_SECS, POLL_MAX_INTERVAL_SECS};
use crate::error::Result;
use crate::types::{ServiceBindingUsage, UsageKind};
use kube::{discovery::Discovery, Client, Resource};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Wait until the API server serves both ServiceBindingUsage and UsageKind.
/// This uses exponential backoff starting at POLL_INTERVAL_SECS seconds.
pub async fn wait_for_usage_crds(client: &Client) -> Result<()> {
    let mut interval = POLL_INTERVAL_SECS;
    let wanted = required_kinds();

    loop {
        match missing_kinds(client, &wanted).await {
            Ok(missing) if missing.is_empty() => {
                info!("Usage CRDs ({}) are available", GROUP);
                return Ok(());
            }
            Ok(missing) => {
                info!(
                    "Usage CRDs not yet available (missing: {}), waiting {} seconds...",
                    missing.join(", "),
                    interval
                );
            }
            Err(e) => {
                warn!(
                    "Error checking for usage CRDs: {}, retrying in {} seconds...",
                    e, interval
                );
            }
        }

        sleep(Duration::from_secs(interval)).await;

        // Exponential backoff with max cap
        interval = (interval * 2).min(POLL_MAX_INTERVAL_SECS);
    }
}

fn required_kinds() -> Vec<(String, String)> {
    vec![
        (
            ServiceBindingUsage::kind(&()).to_string(),
            ServiceBindingUsage::version(&()).to_string(),
        ),
        (
            UsageKind::kind(&()).to_string(),
            UsageKind::version(&()).to_string(),
        ),
    ]
}

/// Kinds from `wanted` that discovery does not report in our API group.
async fn missing_kinds(client: &Client, wanted: &[(String, String)]) -> Result<Vec<String>> {
    let discovery = Discovery::new(client.clone())
        .filter(&[GROUP])
        .run()
        .await?;

    let served: Vec<(String, String)> = discovery
        .groups()
        .filter(|g| g.name() == GROUP)
        .flat_map(|g| g.recommended_resources())
        .map(|(ar, _)| (ar.kind, ar.version))
        .collect();

    Ok(wanted
        .iter()
        .filter(|w| !served.contains(w))
        .map(|(kind, version)| format!("{}/{}", kind, version))
        .collect())
}
