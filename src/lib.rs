// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
pub mod binding;
pub mod config;
pub mod constants;
pub mod error;
pub mod guard;
pub mod kubernetes;
pub mod reconcilers;
pub mod retry;
pub mod shutdown;
pub mod storage;
pub mod supervisor;
pub mod types;

#[cfg(test)]
pub mod test_utils;
