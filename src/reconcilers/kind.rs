// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kind controller - keeps the supervisor registry in step with the UsageKinds in the
//! cluster.
//!
//! This loop consumes the raw watch stream instead of a `Controller`, because a
//! deleted UsageKind has to be seen to be unregistered.

use crate::constants::retry::MAX_RETRIES;
use crate::constants::DEPLOYMENT_KIND;
use crate::error::Result;
use crate::retry::backoff_delay;
use crate::shutdown::{self, ShutdownRx};
use crate::supervisor::{GenericSupervisor, LabelManipulator, SupervisorRegistry};
use crate::types::UsageKind;
use futures::TryStreamExt;
use kube::discovery::pinned_kind;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

pub struct KindController {
    client: Client,
    registry: Arc<SupervisorRegistry>,
}

impl KindController {
    pub fn new(client: Client, registry: Arc<SupervisorRegistry>) -> Self {
        Self { client, registry }
    }

    pub async fn run(self, shutdown_rx: ShutdownRx) -> anyhow::Result<()> {
        let kinds: Api<UsageKind> = Api::all(self.client.clone());
        let events = watcher(kinds, watcher::Config::default()).default_backoff();
        tokio::pin!(events);

        let stop = shutdown::requested(shutdown_rx);
        tokio::pin!(stop);

        let mut tracker = KindTracker::default();
        loop {
            let event = tokio::select! {
                _ = &mut stop => break,
                event = events.try_next() => event,
            };
            match event {
                Ok(Some(event)) => {
                    tokio::select! {
                        _ = &mut stop => break,
                        _ = self.handle(event, &mut tracker) => {}
                    }
                }
                Ok(None) => break,
                Err(e) => warn!("UsageKind watch error: {}", e),
            }
        }

        info!("Kind controller stopped");
        Ok(())
    }

    pub(crate) async fn handle(&self, event: watcher::Event<UsageKind>, tracker: &mut KindTracker) {
        match event {
            watcher::Event::Init => tracker.relist_started(),
            watcher::Event::InitApply(kind) | watcher::Event::Apply(kind) => {
                tracker.present(&kind.name_any());
                self.register_with_retry(&kind).await;
            }
            watcher::Event::InitDone => {
                for name in tracker.relist_done() {
                    info!("UsageKind '{}' vanished during a watch gap", name);
                    self.registry.unregister(&name).await;
                }
            }
            watcher::Event::Delete(kind) => {
                let name = kind.name_any();
                tracker.deleted(&name);
                if name != DEPLOYMENT_KIND {
                    self.registry.unregister(&name).await;
                }
            }
        }
    }

    async fn register_with_retry(&self, kind: &UsageKind) {
        for attempt in 1..=MAX_RETRIES {
            match self.register(kind).await {
                Ok(()) => return,
                Err(e) if attempt < MAX_RETRIES => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        "Registering UsageKind '{}' failed (attempt {}), retrying in {:?}: {}",
                        kind.name_any(),
                        attempt,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!("Giving up on UsageKind '{}' after {} attempts: {}", kind.name_any(), attempt, e);
                }
            }
        }
    }

    #[instrument(skip(self, kind), fields(kind = %kind.name_any()))]
    async fn register(&self, kind: &UsageKind) -> Result<()> {
        let name = kind.name_any();
        if name == DEPLOYMENT_KIND {
            debug!("'{}' is served by the built-in supervisor", name);
            return Ok(());
        }

        let manipulator = LabelManipulator::new(&kind.spec.labels_path)?;
        let (resource, _capabilities) = pinned_kind(&self.client, &kind.group_version_kind()).await?;
        let supervisor = GenericSupervisor::new(self.client.clone(), resource, manipulator);
        debug!(
            "Resolved {} with labels at '{}'",
            supervisor.resource().kind,
            supervisor.labels_path()
        );

        self.registry.register(&name, Arc::new(supervisor)).await;
        Ok(())
    }
}

/// Names seen by the watch, and during a relist the names seen so far, so that kinds
/// deleted while the watch was down can be dropped at `InitDone`.
#[derive(Debug, Default)]
pub(crate) struct KindTracker {
    known: HashSet<String>,
    relisting: Option<HashSet<String>>,
}

impl KindTracker {
    fn relist_started(&mut self) {
        self.relisting = Some(HashSet::new());
    }

    fn present(&mut self, name: &str) {
        self.known.insert(name.to_string());
        if let Some(seen) = self.relisting.as_mut() {
            seen.insert(name.to_string());
        }
    }

    /// Names known before the relist and not seen in it, built-in kind excluded.
    fn relist_done(&mut self) -> Vec<String> {
        let Some(seen) = self.relisting.take() else {
            return Vec::new();
        };
        let mut stale: Vec<String> = self
            .known
            .difference(&seen)
            .filter(|name| name.as_str() != DEPLOYMENT_KIND)
            .cloned()
            .collect();
        stale.sort();
        self.known = seen;
        stale
    }

    fn deleted(&mut self, name: &str) {
        self.known.remove(name);
    }
}
