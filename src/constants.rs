// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Kubernetes annotation keys used by the controller
pub mod annotations {
    /// JSON ledger of labels injected into a target, keyed by usage name
    pub const BINDING_USAGE_TRACING: &str = "servicecatalog.kyma-project.io/binding-usage";
}

/// Finalizers owned by the controller
pub mod finalizers {
    /// Held on every usage until its labels and PodPreset are reverted
    pub const USAGE: &str = "servicecatalog.kyma-project.io/binding-usage";
    /// Held on a UsageKind while any usage still references it
    pub const USAGE_KIND_PROTECTION: &str = "servicecatalog.kyma-project.io/usage-kind-protection";
}

/// Label keys written by the controller
pub mod labels {
    /// Prefix of the PodPreset selector label, followed by the usage UID
    pub const USAGE_PREFIX: &str = "use-";
}

/// Kind name of the built-in Deployment supervisor
pub const DEPLOYMENT_KIND: &str = "deployment";

/// The operator name used as field manager
pub const OPERATOR_NAME: &str = "binding-usage-controller";

/// CRD polling configuration
pub mod crd {
    /// API group that serves ServiceBindingUsage and UsageKind
    pub const GROUP: &str = "servicecatalog.kyma-project.io";
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}

/// UsageKind protection
pub mod protection {
    /// Re-check interval in seconds for a UsageKind whose deletion is blocked
    pub const BLOCKED_RECHECK_SECS: u64 = 30;
}

/// Work queue retry policy
pub mod retry {
    /// Failed reconciles are retried this many times before the failure becomes terminal
    pub const MAX_RETRIES: u32 = 15;
    /// First backoff step in milliseconds, doubled on every failure
    pub const BASE_DELAY_MILLIS: u64 = 5;
    /// Backoff cap in seconds
    pub const MAX_DELAY_SECS: u64 = 1000;
}
