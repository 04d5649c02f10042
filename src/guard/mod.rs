// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The Guard re-checks applied usages on a timer and nudges the ones whose labels
//! vanished from their target. Watch events alone never notice that kind of drift.

pub mod check;
pub mod manager;

pub use check::{check_usage, CheckOutcome};
pub use manager::{Guard, GuardEvent, GuardHandle};
