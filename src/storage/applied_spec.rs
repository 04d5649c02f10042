// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Durable record of what was last applied for each usage.
//!
//! One ConfigMap holds an entry per usage, keyed `<namespace>.<name>`. The record, not the
//! usage's current spec, decides what gets reverted, since by the time we revert the
//! usage may already point somewhere else. Every operation is a read-modify-write of the
//! whole ConfigMap; only the usage reconciler writes it.

use crate::error::{BindingUsageError, Result};
use crate::types::usage::{UsageKey, UsedBy};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{ObjectMeta, PostParams};
use kube::{Api, Client};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// What was applied for one usage. `applied` stays false between recording the intent
/// and the supervisor confirming the labels, so a crash in that window is visible.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppliedSpec {
    pub used_by: UsedBy,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub applied: bool,
}

pub struct AppliedSpecStore {
    api: Api<ConfigMap>,
    namespace: String,
    name: String,
}

impl AppliedSpecStore {
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn entry_key(key: &UsageKey) -> String {
        format!("{}.{}", key.namespace, key.name)
    }

    #[instrument(skip(self), fields(key = %key))]
    pub async fn get(&self, key: &UsageKey) -> Result<Option<AppliedSpec>> {
        let Some(config_map) = self.api.get_opt(&self.name).await? else {
            return Ok(None);
        };
        let Some(raw) = config_map
            .data
            .as_ref()
            .and_then(|d| d.get(&Self::entry_key(key)))
        else {
            return Ok(None);
        };
        serde_json::from_str(raw).map(Some).map_err(|e| {
            BindingUsageError::InvalidResource(format!(
                "applied spec of {} in ConfigMap {}/{} is malformed: {}",
                key, self.namespace, self.name, e
            ))
        })
    }

    #[instrument(skip(self, spec), fields(key = %key, applied = spec.applied))]
    pub async fn upsert(&self, key: &UsageKey, spec: &AppliedSpec) -> Result<()> {
        let raw = serde_json::to_string(spec)?;
        match self.api.get_opt(&self.name).await? {
            Some(mut config_map) => {
                config_map
                    .data
                    .get_or_insert_with(BTreeMap::new)
                    .insert(Self::entry_key(key), raw);
                self.api
                    .replace(&self.name, &PostParams::default(), &config_map)
                    .await?;
            }
            None => {
                let config_map = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(self.name.clone()),
                        namespace: Some(self.namespace.clone()),
                        ..Default::default()
                    },
                    data: Some(BTreeMap::from([(Self::entry_key(key), raw)])),
                    ..Default::default()
                };
                self.api.create(&PostParams::default(), &config_map).await?;
            }
        }
        debug!("Stored applied spec for {}", key);
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key))]
    pub async fn delete(&self, key: &UsageKey) -> Result<()> {
        let Some(mut config_map) = self.api.get_opt(&self.name).await? else {
            return Ok(());
        };
        let removed = config_map
            .data
            .as_mut()
            .and_then(|d| d.remove(&Self::entry_key(key)))
            .is_some();
        if removed {
            self.api
                .replace(&self.name, &PostParams::default(), &config_map)
                .await?;
            debug!("Deleted applied spec for {}", key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeApiServer;
    use serde_json::json;

    const PATH: &str = "/api/v1/namespaces/kyma-system/configmaps/applied";

    fn make_spec(applied: bool) -> AppliedSpec {
        AppliedSpec {
            used_by: UsedBy {
                kind: "deployment".to_string(),
                name: "app".to_string(),
            },
            labels: BTreeMap::from([("use-uid".to_string(), "1".to_string())]),
            applied,
        }
    }

    #[tokio::test]
    async fn test_get_without_config_map() {
        let store = AppliedSpecStore::new(FakeApiServer::new().client(), "kyma-system", "applied");
        assert_eq!(store.get(&UsageKey::new("prod", "u1")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let server = FakeApiServer::new();
        let store = AppliedSpecStore::new(server.client(), "kyma-system", "applied");
        let key = UsageKey::new("prod", "u1");

        store.upsert(&key, &make_spec(false)).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(make_spec(false)));

        store.upsert(&key, &make_spec(true)).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(make_spec(true)));

        let raw = server.object(PATH).unwrap()["data"]["prod.u1"].clone();
        let decoded: serde_json::Value = serde_json::from_str(raw.as_str().unwrap()).unwrap();
        assert_eq!(decoded["usedBy"], json!({"kind": "deployment", "name": "app"}));
        assert_eq!(decoded["applied"], json!(true));
    }

    #[tokio::test]
    async fn test_entries_are_independent() {
        let server = FakeApiServer::new();
        let store = AppliedSpecStore::new(server.client(), "kyma-system", "applied");
        let first = UsageKey::new("prod", "u1");
        let second = UsageKey::new("dev", "u1");

        store.upsert(&first, &make_spec(true)).await.unwrap();
        store.upsert(&second, &make_spec(false)).await.unwrap();
        store.delete(&first).await.unwrap();

        assert_eq!(store.get(&first).await.unwrap(), None);
        assert_eq!(store.get(&second).await.unwrap(), Some(make_spec(false)));
    }

    #[tokio::test]
    async fn test_delete_missing_is_noop() {
        let server = FakeApiServer::new();
        let store = AppliedSpecStore::new(server.client(), "kyma-system", "applied");

        store.delete(&UsageKey::new("prod", "u1")).await.unwrap();
        assert!(server.requests().iter().all(|(m, _)| m == "GET"));
    }

    #[tokio::test]
    async fn test_malformed_entry_is_an_error() {
        let server = FakeApiServer::new().with_object(
            PATH,
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "applied", "namespace": "kyma-system"},
                "data": {"prod.u1": "{broken"}
            }),
        );
        let store = AppliedSpecStore::new(server.client(), "kyma-system", "applied");

        assert!(store.get(&UsageKey::new("prod", "u1")).await.is_err());
    }
}
