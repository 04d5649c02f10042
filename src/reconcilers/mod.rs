// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes reconcilers that react to watch events.

pub mod kind;
pub mod protection;
pub mod usage;

pub use kind::KindController;
pub use protection::{ProtectionController, ProtectionHandle};
pub use usage::{UsageDeleteListener, UsageReconciler};
