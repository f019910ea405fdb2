use std::fmt;

use serde::{Deserialize, Serialize};

use crate::failure::FixRecord;
use crate::job::TimelineEvent;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CiStatus {
    Passed,
    Failed,
}

impl CiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for CiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal snapshot of a job. Built once, at finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Results {
    pub repo_url: String,
    pub team_name: String,
    pub leader_name: String,
    pub branch_created: String,
    pub total_failures: u32,
    pub total_fixes: u32,
    pub ci_cd_status: CiStatus,
    pub total_time_taken: String,
    pub elapsed_ms: u64,
    pub iterations_used: u32,
    pub max_retries: u32,
    pub fixes: Vec<FixRecord>,
    pub timeline: Vec<TimelineEvent>,
}

/// Render a duration as `"{m}m {s}s"`.
pub fn format_elapsed(elapsed_ms: u64) -> String {
    let mins = elapsed_ms / 60_000;
    let secs = (elapsed_ms % 60_000) / 1000;
    format!("{}m {}s", mins, secs)
}
