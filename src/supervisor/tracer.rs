// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Provenance of injected labels, kept in an annotation on the labeled object.
//!
//! The annotation value is a JSON ledger `{usageName: {"injectedLabels": {k: v}}}`. An absent
//! annotation or entry means nothing is tracked; an annotation that does not parse is an
//! error, never an empty ledger, otherwise a revert would silently leave labels behind.

use crate::constants::annotations::BINDING_USAGE_TRACING;
use crate::error::{BindingUsageError, Result};
use crate::supervisor::manipulator::LabelManipulator;
use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct LedgerEntry {
    #[serde(default)]
    injected_labels: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(transparent)]
struct UsageLedger(BTreeMap<String, LedgerEntry>);

impl UsageLedger {
    fn parse(raw: Option<&str>) -> Result<Self> {
        match raw {
            None => Ok(Self::default()),
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                BindingUsageError::CorruptAnnotation(format!(
                    "cannot decode {}: {}",
                    BINDING_USAGE_TRACING, e
                ))
            }),
        }
    }

    /// `None` once the last entry is gone, so the annotation gets removed.
    fn encode(&self) -> Result<Option<String>> {
        if self.0.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::to_string(self)?))
    }

    fn injected(&self, usage_name: &str) -> BTreeMap<String, String> {
        self.0
            .get(usage_name)
            .map(|e| e.injected_labels.clone())
            .unwrap_or_default()
    }

    fn set(&mut self, usage_name: &str, labels: &BTreeMap<String, String>) {
        self.0.insert(
            usage_name.to_string(),
            LedgerEntry {
                injected_labels: labels.clone(),
            },
        );
    }

    fn remove(&mut self, usage_name: &str) {
        self.0.remove(usage_name);
    }
}

/// Reads and writes the provenance ledger on some representation of an object.
pub trait UsageAnnotationTracer<T: ?Sized> {
    /// Labels injected by the usage; empty when nothing is tracked.
    fn get_injected_labels(&self, target: &T, usage_name: &str) -> Result<BTreeMap<String, String>>;

    fn set_annotation_about_binding_usage(
        &self,
        target: &mut T,
        usage_name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()>;

    fn delete_annotation_about_binding_usage(&self, target: &mut T, usage_name: &str) -> Result<()>;
}

/// Tracer for typed objects, working on `ObjectMeta` annotations.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetaTracer;

impl MetaTracer {
    fn ledger(meta: &ObjectMeta) -> Result<UsageLedger> {
        UsageLedger::parse(
            meta.annotations
                .as_ref()
                .and_then(|a| a.get(BINDING_USAGE_TRACING))
                .map(String::as_str),
        )
    }

    fn store(meta: &mut ObjectMeta, ledger: &UsageLedger) -> Result<()> {
        match ledger.encode()? {
            Some(raw) => {
                meta.annotations
                    .get_or_insert_with(BTreeMap::new)
                    .insert(BINDING_USAGE_TRACING.to_string(), raw);
            }
            None => {
                if let Some(annotations) = meta.annotations.as_mut() {
                    annotations.remove(BINDING_USAGE_TRACING);
                }
            }
        }
        Ok(())
    }
}

impl UsageAnnotationTracer<ObjectMeta> for MetaTracer {
    fn get_injected_labels(&self, target: &ObjectMeta, usage_name: &str) -> Result<BTreeMap<String, String>> {
        Ok(Self::ledger(target)?.injected(usage_name))
    }

    fn set_annotation_about_binding_usage(
        &self,
        target: &mut ObjectMeta,
        usage_name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut ledger = Self::ledger(target)?;
        ledger.set(usage_name, labels);
        Self::store(target, &ledger)
    }

    fn delete_annotation_about_binding_usage(&self, target: &mut ObjectMeta, usage_name: &str) -> Result<()> {
        let mut ledger = Self::ledger(target)?;
        ledger.remove(usage_name);
        Self::store(target, &ledger)
    }
}

/// Tracer for untyped objects, working on `metadata.annotations` of a JSON value.
#[derive(Debug, Clone)]
pub struct ValueTracer {
    annotations: LabelManipulator,
}

impl ValueTracer {
    pub fn new() -> Self {
        Self {
            annotations: LabelManipulator::from_segments(&["metadata", "annotations"]),
        }
    }

    fn ledger(&self, target: &Value) -> Result<UsageLedger> {
        let annotations = self.annotations.labels(target)?;
        UsageLedger::parse(annotations.get(BINDING_USAGE_TRACING).map(String::as_str))
    }

    fn store(&self, target: &mut Value, ledger: &UsageLedger) -> Result<()> {
        let encoded = ledger.encode()?;
        let annotations = self.annotations.labels_mut(target)?;
        match encoded {
            Some(raw) => {
                annotations.insert(BINDING_USAGE_TRACING.to_string(), Value::String(raw));
            }
            None => {
                annotations.remove(BINDING_USAGE_TRACING);
            }
        }
        Ok(())
    }
}

impl Default for ValueTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageAnnotationTracer<Value> for ValueTracer {
    fn get_injected_labels(&self, target: &Value, usage_name: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.ledger(target)?.injected(usage_name))
    }

    fn set_annotation_about_binding_usage(
        &self,
        target: &mut Value,
        usage_name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut ledger = self.ledger(target)?;
        ledger.set(usage_name, labels);
        self.store(target, &ledger)
    }

    fn delete_annotation_about_binding_usage(&self, target: &mut Value, usage_name: &str) -> Result<()> {
        let mut ledger = self.ledger(target)?;
        ledger.remove(usage_name);
        self.store(target, &ledger)
    }
}
