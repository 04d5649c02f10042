// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD discovery and patch computation.

pub mod crd;
pub mod patch;

pub use crd::wait_for_usage_crds;
pub use patch::{create_merge_patch, is_empty_patch, patch_params};
