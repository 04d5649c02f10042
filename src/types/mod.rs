// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resources watched, read and written by the controller.

pub mod pod_preset;
pub mod service_catalog;
pub mod usage;
pub mod usage_kind;

pub use pod_preset::PodPreset;
pub use service_catalog::ServiceBinding;
pub use usage::{ServiceBindingUsage, UsageKey, UsedBy};
pub use usage_kind::UsageKind;
