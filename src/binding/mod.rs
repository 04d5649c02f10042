// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Everything derived from a ServiceBinding: the labels its service class declares and
//! the PodPreset that injects its secret.

pub mod labels;
pub mod pod_preset;

pub use labels::{BindingLabelsFetcher, ServiceClassLabelsFetcher};
pub use pod_preset::{build_pod_preset, delete_pod_preset, merge_labels, pod_preset_name, upsert_pod_preset};
