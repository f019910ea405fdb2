use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::results::Results;

pub type JobId = Uuid;

/// Status labels used both for the job lifecycle and for timeline events.
///
/// A job's lifecycle only ever moves `Initializing → InProgress → Completed`;
/// `Passed` and `Failed` appear on timeline events and as the last event
/// outcome while the job is still running.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Initializing,
    InProgress,
    Passed,
    Failed,
    Completed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::InProgress => "IN_PROGRESS",
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIALIZING" => Ok(Self::Initializing),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "PASSED" => Ok(Self::Passed),
            "FAILED" => Ok(Self::Failed),
            "COMPLETED" => Ok(Self::Completed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// Where the orchestrator currently is in its state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPhase {
    Initializing,
    Forking,
    Provisioning,
    Bootstrapping,
    Iterating,
    Finalizing,
    Completed,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Forking => "FORKING",
            Self::Provisioning => "PROVISIONING",
            Self::Bootstrapping => "BOOTSTRAPPING",
            Self::Iterating => "ITERATING",
            Self::Finalizing => "FINALIZING",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated submission payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub repo_url: String,
    pub team_name: String,
    pub leader_name: String,
}

/// One append-only progress entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEvent {
    pub iteration: u32,
    pub status: JobStatus,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub repo_url: String,
    pub team_name: String,
    pub leader_name: String,
    /// Lifecycle state; never set to `Passed`/`Failed`.
    pub status: JobStatus,
    /// Status label of the most recent timeline event.
    pub last_event_status: Option<JobStatus>,
    pub phase: JobPhase,
    pub current_iteration: u32,
    pub timeline: Vec<TimelineEvent>,
    pub start_time: DateTime<Utc>,
    pub results: Option<Results>,
}

impl Job {
    pub fn new(id: JobId, request: JobRequest) -> Self {
        Self {
            id,
            repo_url: request.repo_url,
            team_name: request.team_name,
            leader_name: request.leader_name,
            status: JobStatus::Initializing,
            last_event_status: None,
            phase: JobPhase::Initializing,
            current_iteration: 0,
            timeline: Vec::new(),
            start_time: Utc::now(),
            results: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    /// Append a timeline event. The iteration counter only moves forward and
    /// the first event takes the job out of `Initializing`.
    pub fn record_event(&mut self, iteration: u32, status: JobStatus, message: impl Into<String>) {
        self.timeline.push(TimelineEvent {
            iteration,
            status,
            timestamp: Utc::now(),
            message: message.into(),
        });
        self.current_iteration = self.current_iteration.max(iteration);
        self.last_event_status = Some(status);
        if self.status == JobStatus::Initializing {
            self.status = JobStatus::InProgress;
        }
    }

    pub fn complete(&mut self, results: Results) {
        self.status = JobStatus::Completed;
        self.phase = JobPhase::Completed;
        self.results = Some(results);
    }
}
