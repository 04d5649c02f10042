// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Durable state kept outside the watched objects.

pub mod applied_spec;

pub use applied_spec::{AppliedSpec, AppliedSpecStore};
