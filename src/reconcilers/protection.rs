// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Protection controller - holds a finalizer on every UsageKind and releases it only
//! once no usage references the kind.

use crate::constants::finalizers::USAGE_KIND_PROTECTION;
use crate::constants::protection::BLOCKED_RECHECK_SECS;
use crate::error::{BindingUsageError, Result};
use crate::kubernetes::patch_params;
use crate::reconcilers::usage::UsageDeleteListener;
use crate::retry::{backoff_delay, RetryTracker};
use crate::shutdown::{self, ShutdownRx};
use crate::types::{ServiceBindingUsage, UsageKey, UsageKind};
use futures::{future, StreamExt};
use kube::{
    api::Patch,
    runtime::{
        controller::{self, Action},
        reflector::ObjectRef,
        watcher, Controller, WatchStreamExt,
    },
    Api, Client, ResourceExt,
};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Usage keys by the kind they target, fed from the usage watch.
///
/// Holds sets of keys rather than counters: replaying an event leaves it unchanged.
#[derive(Clone, Default)]
pub struct UsageIndex {
    state: Arc<RwLock<IndexState>>,
}

#[derive(Default)]
struct IndexState {
    by_kind: HashMap<String, HashSet<UsageKey>>,
    kind_of: HashMap<UsageKey, String>,
    /// Entries of a relist in progress, swapped in at `InitDone`
    relisting: Option<HashMap<UsageKey, String>>,
}

impl IndexState {
    fn insert(&mut self, key: UsageKey, kind: String) {
        if let Some(previous) = self.kind_of.insert(key.clone(), kind.clone()) {
            self.detach(&key, &previous);
        }
        self.by_kind.entry(kind).or_default().insert(key);
    }

    fn remove(&mut self, key: &UsageKey) {
        if let Some(previous) = self.kind_of.remove(key) {
            self.detach(key, &previous);
        }
    }

    fn detach(&mut self, key: &UsageKey, kind: &str) {
        if let Some(keys) = self.by_kind.get_mut(kind) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_kind.remove(kind);
            }
        }
    }

    fn replace_all(&mut self, entries: HashMap<UsageKey, String>) {
        self.by_kind.clear();
        self.kind_of.clear();
        for (key, kind) in entries {
            self.insert(key, kind);
        }
    }
}

impl UsageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_event(&self, event: &watcher::Event<ServiceBindingUsage>) {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        match event {
            watcher::Event::Init => state.relisting = Some(HashMap::new()),
            watcher::Event::InitApply(usage) => {
                let (key, kind) = (usage.key(), usage.spec.used_by.kind.clone());
                match state.relisting.as_mut() {
                    Some(seen) => {
                        seen.insert(key, kind);
                    }
                    None => state.insert(key, kind),
                }
            }
            watcher::Event::InitDone => {
                if let Some(seen) = state.relisting.take() {
                    state.replace_all(seen);
                }
            }
            watcher::Event::Apply(usage) => state.insert(usage.key(), usage.spec.used_by.kind.clone()),
            watcher::Event::Delete(usage) => state.remove(&usage.key()),
        }
    }

    /// Number of usages targeting `kind`, not counting `excluded`.
    pub fn count(&self, kind: &str, excluded: Option<&UsageKey>) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.by_kind.get(kind).map_or(0, |keys| {
            keys.len() - excluded.map_or(0, |key| usize::from(keys.contains(key)))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionAction {
    AddFinalizer,
    RemoveFinalizer,
    Nothing,
}

pub fn decide(kind: &UsageKind, references: usize) -> ProtectionAction {
    let protected = kind.has_finalizer(USAGE_KIND_PROTECTION);
    match (kind.is_being_deleted(), protected) {
        (false, false) => ProtectionAction::AddFinalizer,
        (true, true) if references == 0 => ProtectionAction::RemoveFinalizer,
        _ => ProtectionAction::Nothing,
    }
}

/// Shared by the controller loop and the out-of-band delete notifications.
struct Protector {
    client: Client,
    index: UsageIndex,
}

impl Protector {
    #[instrument(skip(self, kind), fields(kind = %kind.name_any()))]
    async fn evaluate(&self, kind: &UsageKind, excluded: Option<&UsageKey>) -> Result<ProtectionAction> {
        let name = kind.name_any();
        let references = self.index.count(&name, excluded);

        let action = decide(kind, references);
        match action {
            ProtectionAction::AddFinalizer => {
                let mut finalizers = kind.finalizers().to_vec();
                finalizers.push(USAGE_KIND_PROTECTION.to_string());
                self.patch_finalizers(kind, finalizers).await?;
                info!("Protection finalizer added to UsageKind '{}'", name);
            }
            ProtectionAction::RemoveFinalizer => {
                let finalizers = kind
                    .finalizers()
                    .iter()
                    .filter(|f| f.as_str() != USAGE_KIND_PROTECTION)
                    .cloned()
                    .collect();
                self.patch_finalizers(kind, finalizers).await?;
                info!("UsageKind '{}' is no longer used, protection released", name);
            }
            ProtectionAction::Nothing => {
                if kind.is_being_deleted() {
                    debug!("UsageKind '{}' still used by {} usage(s)", name, references);
                }
            }
        }
        Ok(action)
    }

    async fn patch_finalizers(&self, kind: &UsageKind, finalizers: Vec<String>) -> Result<()> {
        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": kind.resource_version(),
            }
        });
        let kinds: Api<UsageKind> = Api::all(self.client.clone());
        kinds
            .patch(&kind.name_any(), &patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    /// Re-check the kind of a usage that was just cleaned up. The cache may still hold
    /// the usage, so it is left out of the count.
    async fn usage_deleted(&self, key: &UsageKey, kind_name: &str) -> Result<()> {
        let kinds: Api<UsageKind> = Api::all(self.client.clone());
        let Some(kind) = kinds.get_opt(kind_name).await? else {
            return Ok(());
        };
        self.evaluate(&kind, Some(key)).await?;
        Ok(())
    }
}

/// Delete listener handed to the usage reconciler.
#[derive(Clone)]
pub struct ProtectionHandle {
    protector: Arc<Protector>,
}

impl UsageDeleteListener for ProtectionHandle {
    fn on_deleted(&self, key: &UsageKey, kind: &str) {
        let protector = self.protector.clone();
        let key = key.clone();
        let kind_name = kind.to_string();
        tokio::spawn(async move {
            if let Err(e) = protector.usage_deleted(&key, &kind_name).await {
                warn!("Re-checking UsageKind '{}' after deletion of {} failed: {}", kind_name, key, e);
            }
        });
    }
}

pub struct ProtectionController {
    protector: Arc<Protector>,
    retries: RetryTracker,
}

impl ProtectionController {
    pub fn new(client: Client) -> (Self, ProtectionHandle) {
        let protector = Arc::new(Protector {
            client,
            index: UsageIndex::new(),
        });

        let controller = Self {
            protector: protector.clone(),
            retries: RetryTracker::new(),
        };
        (controller, ProtectionHandle { protector })
    }

    pub async fn run(self, shutdown_rx: ShutdownRx) -> anyhow::Result<()> {
        let client = self.protector.client.clone();
        let kinds: Api<UsageKind> = Api::all(client.clone());
        let usages: Api<ServiceBindingUsage> = Api::all(client);

        let Self { protector, retries } = self;

        let index = protector.index.clone();
        let cache = watcher(usages.clone(), watcher::Config::default())
            .default_backoff()
            .take_until(shutdown::requested(shutdown_rx.clone()))
            .for_each(move |event| {
                match event {
                    Ok(event) => index.apply_event(&event),
                    Err(e) => warn!("Usage index watch error: {}", e),
                }
                future::ready(())
            });

        let context = Arc::new(Context { protector, retries });
        let controller = Controller::new(kinds, watcher::Config::default())
            .with_config(controller::Config::default().concurrency(1))
            .watches(usages, watcher::Config::default(), |usage| {
                Some(ObjectRef::new(&usage.spec.used_by.kind))
            })
            .graceful_shutdown_on(shutdown::requested(shutdown_rx))
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled UsageKind: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            });

        future::join(cache, controller).await;
        info!("Protection controller stopped");
        Ok(())
    }
}

struct Context {
    protector: Arc<Protector>,
    retries: RetryTracker,
}

async fn reconcile(kind: Arc<UsageKind>, ctx: Arc<Context>) -> Result<Action> {
    let name = kind.name_any();
    match ctx.protector.evaluate(&kind, None).await {
        Ok(action) => {
            ctx.retries.forget(&name);
            Ok(next_action(&kind, action))
        }
        Err(err) => {
            let attempts = ctx.retries.record_failure(&name);
            if !RetryTracker::is_exhausted(attempts) {
                return Err(err);
            }
            error!("Giving up on UsageKind '{}' after {} attempts: {}", name, attempts, err);
            ctx.retries.forget(&name);
            Ok(Action::await_change())
        }
    }
}

/// A kind whose deletion is blocked is checked again later: a usage moving to another
/// kind only triggers the kind it moves to.
fn next_action(kind: &UsageKind, action: ProtectionAction) -> Action {
    let blocked = action == ProtectionAction::Nothing
        && kind.is_being_deleted()
        && kind.has_finalizer(USAGE_KIND_PROTECTION);
    if blocked {
        Action::requeue(Duration::from_secs(BLOCKED_RECHECK_SECS))
    } else {
        Action::await_change()
    }
}

fn error_policy(kind: Arc<UsageKind>, error: &BindingUsageError, ctx: Arc<Context>) -> Action {
    let attempts = ctx.retries.attempts(&kind.name_any()).max(1);
    warn!("Protecting UsageKind '{}' failed: {}", kind.name_any(), error);
    Action::requeue(backoff_delay(attempts))
}
