// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kind name to supervisor lookup, shared by every controller.

use crate::error::{BindingUsageError, Result};
use crate::supervisor::KubernetesResourceSupervisor;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Default)]
pub struct SupervisorRegistry {
    supervisors: RwLock<HashMap<String, Arc<dyn KubernetesResourceSupervisor>>>,
}

impl SupervisorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, kind: &str, supervisor: Arc<dyn KubernetesResourceSupervisor>) {
        let replaced = self
            .supervisors
            .write()
            .await
            .insert(kind.to_string(), supervisor)
            .is_some();
        info!("Supervisor for kind '{}' {}", kind, if replaced { "replaced" } else { "registered" });
    }

    pub async fn unregister(&self, kind: &str) {
        if self.supervisors.write().await.remove(kind).is_some() {
            info!("Supervisor for kind '{}' unregistered", kind);
        }
    }

    /// Not-found while the kind is unregistered; that is retryable, the UsageKind may
    /// simply not be synced yet.
    pub async fn get(&self, kind: &str) -> Result<Arc<dyn KubernetesResourceSupervisor>> {
        self.supervisors
            .read()
            .await
            .get(kind)
            .cloned()
            .ok_or_else(|| BindingUsageError::NotFound(format!("supervisor for kind '{}'", kind)))
    }

    /// Like `get`, but refuses a supervisor whose cache is still filling.
    pub async fn get_synced(&self, kind: &str) -> Result<Arc<dyn KubernetesResourceSupervisor>> {
        let supervisor = self.get(kind).await?;
        if !supervisor.has_synced() {
            return Err(BindingUsageError::NotSynced(kind.to_string()));
        }
        Ok(supervisor)
    }

    pub async fn contains(&self, kind: &str) -> bool {
        self.supervisors.read().await.contains_key(kind)
    }
}
