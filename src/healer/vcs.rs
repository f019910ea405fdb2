use std::collections::HashMap;
use std::sync::Mutex;

use mender_common::{COMMIT_MARKER, JobId};

use super::github::redact_credentials;
use super::sandbox::{ExecRequest, Sandbox, SandboxHandle};
use crate::errors::HealerError;

const BRANCH_SUFFIX: &str = "AI_Fix";
const PROTECTED_BRANCHES: [&str; 2] = ["MAIN", "MASTER"];
const COMMITTER_NAME: &str = "Mender";
const COMMITTER_EMAIL: &str = "mender@users.noreply.github.com";

/// Uppercase, whitespace runs become `_`, anything not `A-Z` or `_` is dropped.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_uppercase() || *c == '_')
        .collect()
}

pub fn is_protected_branch(branch: &str) -> bool {
    PROTECTED_BRANCHES
        .iter()
        .any(|p| branch.eq_ignore_ascii_case(p))
}

/// Prefix `message` with the commit marker unless it already starts with it.
pub fn ensure_commit_marker(message: &str) -> String {
    let message = message.trim();
    if message.starts_with(COMMIT_MARKER) {
        message.to_string()
    } else {
        format!("{} {}", COMMIT_MARKER, message)
    }
}

/// Git operations against a job's sandbox workspace.
///
/// Branch names are computed once per job and cached; later calls for the same
/// job return the cached name regardless of the names passed in.
#[derive(Default)]
pub struct VersionControlManager {
    branches: Mutex<HashMap<JobId, String>>,
}

impl VersionControlManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn branch_name(&self, job_id: JobId, team_name: &str, leader_name: &str) -> String {
        let mut branches = self
            .branches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        branches
            .entry(job_id)
            .or_insert_with(|| {
                format!(
                    "{}_{}_{}",
                    normalize_name(team_name),
                    normalize_name(leader_name),
                    BRANCH_SUFFIX
                )
            })
            .clone()
    }

    /// Write `content` to `file`, stage it and commit on the job branch.
    /// Returns `false` on any failure; nothing is raised.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_and_commit(
        &self,
        sandbox: &dyn Sandbox,
        handle: &SandboxHandle,
        job_id: JobId,
        team_name: &str,
        leader_name: &str,
        file: &str,
        content: &str,
        message: &str,
    ) -> bool {
        let branch = self.branch_name(job_id, team_name, leader_name);
        let message = ensure_commit_marker(message);

        match self
            .commit_file(sandbox, handle, &branch, file, content, &message)
            .await
        {
            Ok(()) => {
                tracing::info!(%job_id, %branch, file, "committed change");
                true
            }
            Err(e) => {
                tracing::warn!(%job_id, %branch, file, error = %e, "apply and commit failed");
                false
            }
        }
    }

    async fn commit_file(
        &self,
        sandbox: &dyn Sandbox,
        handle: &SandboxHandle,
        branch: &str,
        file: &str,
        content: &str,
        message: &str,
    ) -> Result<(), HealerError> {
        let patch_error = |message: String| HealerError::PatchApplication {
            file: file.to_string(),
            message,
        };

        for (key, value) in [("user.name", COMMITTER_NAME), ("user.email", COMMITTER_EMAIL)] {
            sandbox
                .exec(handle, ExecRequest::new(["git", "config", key, value]).in_workspace())
                .await?;
        }
        let checked_out = sandbox
            .exec(handle, ExecRequest::new(["git", "checkout", "-B", branch]).in_workspace())
            .await?;
        if !checked_out.success() {
            return Err(patch_error(format!(
                "git checkout failed: {}",
                checked_out.stderr.trim()
            )));
        }

        let written = sandbox.write_file(handle, file, content).await?;
        if !written.success() {
            return Err(patch_error(format!("write failed: {}", written.stderr.trim())));
        }

        let added = sandbox
            .exec(handle, ExecRequest::new(["git", "add", "--", file]).in_workspace())
            .await?;
        if !added.success() {
            return Err(patch_error(format!("git add failed: {}", added.stderr.trim())));
        }

        let committed = sandbox
            .exec(handle, ExecRequest::new(["git", "commit", "-m", message]).in_workspace())
            .await?;
        if !committed.success() {
            let detail = if committed.stderr.trim().is_empty() {
                committed.stdout.trim()
            } else {
                committed.stderr.trim()
            };
            return Err(patch_error(format!("git commit failed: {}", detail)));
        }
        Ok(())
    }

    /// Force-push the current `HEAD` to the job branch on `origin`. The branch
    /// need not exist locally, so a run that never committed still publishes it.
    pub async fn push_branch(
        &self,
        sandbox: &dyn Sandbox,
        handle: &SandboxHandle,
        job_id: JobId,
        team_name: &str,
        leader_name: &str,
    ) -> Result<(), HealerError> {
        let branch = self.branch_name(job_id, team_name, leader_name);
        self.push_ref(sandbox, handle, &branch).await?;
        tracing::info!(%job_id, %branch, "branch pushed");
        Ok(())
    }

    async fn push_ref(
        &self,
        sandbox: &dyn Sandbox,
        handle: &SandboxHandle,
        branch: &str,
    ) -> Result<(), HealerError> {
        if is_protected_branch(branch) {
            return Err(HealerError::ProtectedBranch {
                branch: branch.to_string(),
            });
        }
        let refspec = format!("HEAD:refs/heads/{}", branch);
        let output = sandbox
            .exec(
                handle,
                ExecRequest::new(["git", "push", "-f", "origin", refspec.as_str()]).in_workspace(),
            )
            .await
            .map_err(|e| HealerError::Push {
                branch: branch.to_string(),
                message: redact_credentials(&format!("{:#}", e)),
            })?;
        if !output.success() {
            return Err(HealerError::Push {
                branch: branch.to_string(),
                message: redact_credentials(output.stderr.trim()),
            });
        }
        Ok(())
    }
}
