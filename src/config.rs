// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

const DEFAULT_APPLIED_SPEC_CONFIG_MAP_NAME: &str = "binding-usage-controller-process-sbu-spec";
const DEFAULT_GUARD_INTERVAL_SECS: u64 = 300;
const DEFAULT_GUARD_DELAY_SECS: u64 = 600;

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace holding the applied-spec ConfigMap
    pub applied_spec_namespace: String,
    /// Name of the applied-spec ConfigMap
    pub applied_spec_config_map_name: String,
    /// How often the guard wakes up
    pub guard_interval: Duration,
    /// How long a usage stays registered before the guard checks it again
    pub guard_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let applied_spec_namespace = lookup("APPLIED_SPEC_NAMESPACE")
            .context("APPLIED_SPEC_NAMESPACE environment variable not set")?;
        let applied_spec_config_map_name = lookup("APPLIED_SPEC_CONFIG_MAP_NAME")
            .unwrap_or_else(|| DEFAULT_APPLIED_SPEC_CONFIG_MAP_NAME.to_string());

        Ok(Config {
            applied_spec_namespace,
            applied_spec_config_map_name,
            guard_interval: secs(&lookup, "GUARD_INTERVAL_SECS", DEFAULT_GUARD_INTERVAL_SECS)?,
            guard_delay: secs(&lookup, "GUARD_DELAY_SECS", DEFAULT_GUARD_DELAY_SECS)?,
        })
    }
}

fn secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration> {
    match lookup(key) {
        Some(raw) => raw
            .parse()
            .map(Duration::from_secs)
            .with_context(|| format!("{} must be a number of seconds, got '{}'", key, raw)),
        None => Ok(Duration::from_secs(default)),
    }
}
