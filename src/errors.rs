//! Typed error hierarchy for Mender.
//!
//! `HealerError` covers every failure a job can hit. Only the
//! test → diagnose → patch cycle is retried; every other variant ends the job
//! on the first occurrence.

use thiserror::Error;

use mender_common::JobId;

#[derive(Debug, Error)]
pub enum HealerError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Job {id} not found")]
    JobNotFound { id: JobId },

    #[error("Job {id} already exists")]
    DuplicateJob { id: JobId },

    #[error("Job {id} is already completed")]
    JobCompleted { id: JobId },

    #[error("Failed to fork repository: {0}")]
    Fork(String),

    #[error("Sandbox provisioning failed: {0}")]
    Provisioning(String),

    #[error("Repository clone failed: {0}")]
    Clone(String),

    #[error("No parsable failures found on iteration {iteration}")]
    DiagnosisEmpty { iteration: u32 },

    #[error("Failed to apply patch to {file}: {message}")]
    PatchApplication { file: String, message: String },

    #[error("Refusing to push protected branch {branch}")]
    ProtectedBranch { branch: String },

    #[error("Push of branch {branch} failed: {message}")]
    Push { branch: String, message: String },

    #[error("Retry limit reached after {iterations} iterations without a passing pipeline")]
    BudgetExhausted { iterations: u32 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HealerError {
    /// True for errors caused by the caller rather than by a job step.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::JobNotFound { .. })
    }
}
