// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Periodic drift scanner over usages whose labels were applied.

use crate::config::Config;
use crate::guard::check::{check_usage, CheckOutcome};
use crate::shutdown::{self, ShutdownRx};
use crate::supervisor::SupervisorRegistry;
use crate::types::usage::UsageKey;
use kube::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Events the usage reconciler sends to the Guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardEvent {
    /// Labels of this usage were applied and should be watched
    Register(UsageKey),
    /// The usage was deleted
    Unregister(UsageKey),
}

/// Handle to send events to the Guard
#[derive(Clone)]
pub struct GuardHandle {
    event_tx: mpsc::Sender<GuardEvent>,
}

impl GuardHandle {
    pub async fn send(&self, event: GuardEvent) {
        if let Err(e) = self.event_tx.send(event).await {
            error!("Failed to send event to Guard: {}", e);
        }
    }

    pub async fn register(&self, key: UsageKey) {
        self.send(GuardEvent::Register(key)).await;
    }

    pub async fn unregister(&self, key: UsageKey) {
        self.send(GuardEvent::Unregister(key)).await;
    }
}

pub struct Guard {
    client: Client,
    registry: Arc<SupervisorRegistry>,
    interval: Duration,
    delay: Duration,
    event_rx: mpsc::Receiver<GuardEvent>,
    last_checked: HashMap<UsageKey, Instant>,
}

impl Guard {
    pub fn new(client: Client, registry: Arc<SupervisorRegistry>, config: &Config) -> (Self, GuardHandle) {
        let (event_tx, event_rx) = mpsc::channel(256);

        let guard = Self {
            client,
            registry,
            interval: config.guard_interval,
            delay: config.guard_delay,
            event_rx,
            last_checked: HashMap::new(),
        };

        (guard, GuardHandle { event_tx })
    }

    pub async fn run(mut self, shutdown_rx: ShutdownRx) -> anyhow::Result<()> {
        info!(
            "Guard started: interval={:?}, delay={:?}",
            self.interval, self.delay
        );

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let stop = shutdown::requested(shutdown_rx);
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                event = self.event_rx.recv() => match event {
                    Some(event) => self.handle_event(event, Instant::now()),
                    None => break,
                },
                _ = ticker.tick() => self.scan(Instant::now()).await,
            }
        }

        info!("Guard stopped");
        Ok(())
    }

    fn handle_event(&mut self, event: GuardEvent, now: Instant) {
        debug!("Handling event: {:?}", event);
        match event {
            GuardEvent::Register(key) => {
                self.last_checked.insert(key, now);
            }
            GuardEvent::Unregister(key) => {
                self.last_checked.remove(&key);
            }
        }
    }

    async fn scan(&mut self, now: Instant) {
        let due = due_keys(&self.last_checked, now, self.delay);
        if due.is_empty() {
            return;
        }
        debug!("Checking {} usage(s) for drift", due.len());

        for key in due {
            match check_usage(&self.client, &self.registry, &key).await {
                Ok(CheckOutcome::Gone) => {
                    self.last_checked.remove(&key);
                }
                Ok(_) => {
                    self.last_checked.insert(key, now);
                }
                Err(e) => {
                    warn!("Drift check of usage {} failed: {}", key, e);
                    self.last_checked.insert(key, now);
                }
            }
        }
    }
}

/// Keys last checked at least `delay` before `now`, in a stable order.
fn due_keys(last_checked: &HashMap<UsageKey, Instant>, now: Instant, delay: Duration) -> Vec<UsageKey> {
    let mut due: Vec<UsageKey> = last_checked
        .iter()
        .filter(|(_, checked)| now.saturating_duration_since(**checked) >= delay)
        .map(|(key, _)| key.clone())
        .collect();
    due.sort();
    due
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{deployment_json, deployment_path, usage_json, usage_path, FakeApiServer};
    use crate::supervisor::DeploymentSupervisor;
    use serde_json::json;

    fn make_config() -> Config {
        Config {
            applied_spec_namespace: "kyma-system".to_string(),
            applied_spec_config_map_name: "applied".to_string(),
            guard_interval: Duration::from_secs(300),
            guard_delay: Duration::from_secs(600),
        }
    }

    #[test]
    fn test_due_keys() {
        let start = Instant::now();
        let delay = Duration::from_secs(600);
        let entries = HashMap::from([
            (UsageKey::new("prod", "old"), start),
            (UsageKey::new("prod", "new"), start + Duration::from_secs(500)),
        ]);

        assert!(due_keys(&entries, start + Duration::from_secs(100), delay).is_empty());
        assert_eq!(
            due_keys(&entries, start + delay, delay),
            vec![UsageKey::new("prod", "old")]
        );
        assert_eq!(due_keys(&entries, start + Duration::from_secs(1200), delay).len(), 2);
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let server = FakeApiServer::new();
        let (mut guard, _handle) = Guard::new(server.client(), Arc::new(SupervisorRegistry::new()), &make_config());
        let now = Instant::now();
        let key = UsageKey::new("prod", "u1");

        guard.handle_event(GuardEvent::Register(key.clone()), now);
        assert!(guard.last_checked.contains_key(&key));

        guard.handle_event(GuardEvent::Unregister(key.clone()), now);
        assert!(guard.last_checked.is_empty());
    }

    #[tokio::test]
    async fn test_scan_only_checks_due_usages() {
        let server = FakeApiServer::new()
            .with_object(&usage_path("prod", "u1"), usage_json("prod", "u1", "redis", "app"))
            .with_object(
                &deployment_path("prod", "app"),
                deployment_json("prod", "app", json!({"app": "app"})),
            );
        let registry = Arc::new(SupervisorRegistry::new());
        registry
            .register("deployment", Arc::new(DeploymentSupervisor::new(server.client())))
            .await;
        let (mut guard, _handle) = Guard::new(server.client(), registry, &make_config());
        let start = Instant::now();
        guard.handle_event(GuardEvent::Register(UsageKey::new("prod", "u1")), start);
        guard.handle_event(GuardEvent::Register(UsageKey::new("prod", "gone")), start);

        guard.scan(start + Duration::from_secs(60)).await;
        assert!(server.requests().is_empty());

        let later = start + Duration::from_secs(600);
        guard.scan(later).await;

        // labels were never applied to the deployment, so u1 is nudged
        assert_eq!(
            server.object(&usage_path("prod", "u1")).unwrap()["spec"]["reprocessRequest"],
            json!(1)
        );
        assert_eq!(guard.last_checked.get(&UsageKey::new("prod", "u1")), Some(&later));
        assert!(!guard.last_checked.contains_key(&UsageKey::new("prod", "gone")));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let server = FakeApiServer::new();
        let (guard, handle) = Guard::new(server.client(), Arc::new(SupervisorRegistry::new()), &make_config());
        let (tx, rx) = shutdown::channel();

        let task = tokio::spawn(guard.run(rx));
        handle.register(UsageKey::new("prod", "u1")).await;
        tx.send(true).unwrap();

        task.await.unwrap().unwrap();
    }
}
