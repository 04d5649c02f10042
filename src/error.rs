// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::types::usage::ConditionReason;
use kube::runtime::finalizer;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BindingUsageError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Expected absence: callers branch on this with `is_not_found`.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Supervisor for kind '{0}' has not synced yet")]
    NotSynced(String),

    #[error("Labels conflict on keys: {}", keys.join(", "))]
    LabelsConflict { keys: Vec<String> },

    #[error("Field '{path}' has unexpected shape: {reason}")]
    FieldShape { path: String, reason: String },

    #[error("Corrupted binding usage annotation: {0}")]
    CorruptAnnotation(String),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("{reason}: {message}")]
    Reconcile {
        reason: ConditionReason,
        message: String,
    },
}

impl BindingUsageError {
    pub fn reconcile(reason: ConditionReason, message: impl Into<String>) -> Self {
        BindingUsageError::Reconcile {
            reason,
            message: message.into(),
        }
    }

    /// True for both our own not-found kind and a 404 coming back from the API server.
    pub fn is_not_found(&self) -> bool {
        match self {
            BindingUsageError::NotFound(_) => true,
            BindingUsageError::KubeError(kube::Error::Api(err)) => err.code == 404,
            _ => false,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, BindingUsageError::KubeError(kube::Error::Api(err)) if err.code == 409 && err.reason == "AlreadyExists")
    }

    /// Status condition reason for failures that surface on the usage.
    pub fn reason(&self) -> Option<ConditionReason> {
        match self {
            BindingUsageError::Reconcile { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            BindingUsageError::Reconcile { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<finalizer::Error<BindingUsageError>> for BindingUsageError {
    fn from(err: finalizer::Error<BindingUsageError>) -> Self {
        match err {
            finalizer::Error::ApplyFailed(e) | finalizer::Error::CleanupFailed(e) => e,
            finalizer::Error::AddFinalizer(e) | finalizer::Error::RemoveFinalizer(e) => {
                BindingUsageError::KubeError(e)
            }
            finalizer::Error::UnnamedObject => {
                BindingUsageError::InvalidResource("object has no name".to_string())
            }
            finalizer::Error::InvalidFinalizer => {
                BindingUsageError::InvalidResource("invalid finalizer name".to_string())
            }
        }
    }
}

/// Attach a condition reason to any error, keeping its text as the message.
pub trait WithReason<T> {
    fn with_reason(self, reason: ConditionReason) -> Result<T>;
}

impl<T, E: Into<BindingUsageError>> WithReason<T> for std::result::Result<T, E> {
    fn with_reason(self, reason: ConditionReason) -> Result<T> {
        self.map_err(|e| match e.into() {
            already @ BindingUsageError::Reconcile { .. } => already,
            other => BindingUsageError::reconcile(reason, other.to_string()),
        })
    }
}

pub type Result<T> = std::result::Result<T, BindingUsageError>;
