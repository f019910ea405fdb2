//! Shared domain types for Mender.
//!
//! Everything that crosses a boundary (HTTP responses, the results snapshot,
//! sandbox execution output) is defined here so the service crate and any
//! client tooling agree on one wire format.

pub mod exec;
pub mod failure;
pub mod job;
pub mod results;

pub use exec::{ExecOutput, TestRun};
pub use failure::{BugType, Failure, FixRecord, FixStatus};
pub use job::{Job, JobId, JobPhase, JobRequest, JobStatus, TimelineEvent};
pub use results::{CiStatus, Results, format_elapsed};

/// Prefix every automated commit message must carry.
pub const COMMIT_MARKER: &str = "[AI-AGENT]";
