//! Foreground healing command — `mender run`.

use anyhow::{Context, Result};

use mender::config::MenderConfig;
use mender::healer;
use mender_common::{CiStatus, JobRequest};

/// Run one job to completion and print its results on stdout.
/// Returns whether the pipeline ended up passing.
pub async fn cmd_run(
    config: MenderConfig,
    repo_url: String,
    team: String,
    leader: String,
    github_token: Option<String>,
) -> Result<bool> {
    config.ensure_valid()?;

    let orchestrator = healer::assemble(&config, github_token);
    let job_id = orchestrator
        .create_job(JobRequest {
            repo_url,
            team_name: team,
            leader_name: leader,
        })
        .await?;
    tracing::info!(%job_id, "job started");

    let results = orchestrator.run(job_id).await?;
    let json = serde_json::to_string_pretty(&results).context("Failed to serialize results")?;
    println!("{}", json);

    tracing::info!(
        %job_id,
        status = %results.ci_cd_status,
        fixes = results.total_fixes,
        elapsed = %results.total_time_taken,
        "job finished"
    );
    Ok(results.ci_cd_status == CiStatus::Passed)
}
