//! AI capability contracts and the `claude` CLI adapter behind them.
//!
//! Every capability validates model output at the boundary and degrades to a
//! documented fallback: diagnostics to an empty list, patches to `None`,
//! workflows to an error the caller may ignore.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use mender_common::Failure;

use super::vcs::ensure_commit_marker;

/// Settings for the model CLI (`[llm]` in `mender.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub command: String,
    pub timeout_secs: u64,
    /// Diagnostics only see this many trailing characters of the test log.
    pub log_tail_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            timeout_secs: 60,
            log_tail_chars: 20_000,
        }
    }
}

/// A complete replacement file plus the commit that should carry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchProposal {
    pub patched_content: String,
    pub commit_message: String,
    pub short_fix_description: String,
}

#[async_trait]
pub trait DiagnosticsClient: Send + Sync {
    /// Structured failures found in a raw test log. Empty on any internal failure.
    async fn extract(&self, raw_log: &str) -> Vec<Failure>;
}

#[async_trait]
pub trait PatchClient: Send + Sync {
    async fn generate(&self, file_content: &str, failure: &Failure) -> Option<PatchProposal>;
}

#[async_trait]
pub trait WorkflowGenerator: Send + Sync {
    /// A complete pipeline definition whose job label names the leader.
    async fn generate(&self, file_listing: &str, repo_name: &str, leader_name: &str) -> Result<String>;
}

/// The last `max_chars` characters of `text`.
pub fn truncate_tail(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    match text.char_indices().nth(total - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Slice from the first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Remove a surrounding markdown code fence, if any.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => "",
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim_end()
        .to_string()
}

/// Parse a diagnostics reply. Malformed entries and paths that escape the
/// workspace are dropped individually.
pub fn parse_failures(response: &str) -> Vec<Failure> {
    let Some(json) = extract_json_object(response) else {
        return Vec::new();
    };
    let value: serde_json::Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "diagnostics reply is not valid JSON");
            return Vec::new();
        }
    };
    let Some(entries) = value.get("failures").and_then(|f| f.as_array()) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| match serde_json::from_value::<Failure>(entry.clone()) {
            Ok(failure) if failure.has_safe_path() => Some(failure),
            Ok(failure) => {
                tracing::warn!(file = %failure.file, "dropping failure with unsafe path");
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed failure entry");
                None
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPatch {
    patched_content: String,
    #[serde(default)]
    short_fix_description: Option<String>,
    #[serde(default)]
    commit_message: Option<String>,
}

/// Parse a patch reply for `failure`. `None` when the reply has no usable content.
pub fn parse_patch(response: &str, failure: &Failure) -> Option<PatchProposal> {
    let json = extract_json_object(response)?;
    let raw: RawPatch = match serde_json::from_str(json) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(file = %failure.file, error = %e, "patch reply failed validation");
            return None;
        }
    };

    let patched_content = strip_code_fences(&raw.patched_content);
    if patched_content.is_empty() {
        return None;
    }
    let patched_content = if patched_content.ends_with('\n') {
        patched_content
    } else {
        format!("{}\n", patched_content)
    };

    let commit_message = raw
        .commit_message
        .filter(|m| !m.trim().is_empty())
        .map(|m| ensure_commit_marker(&m))
        .unwrap_or_else(|| format!("[AI-AGENT] Fixed {} in {}", failure.bug_type, failure.file));

    let short_fix_description = raw
        .short_fix_description
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| "apply suggested fix".to_string());

    Some(PatchProposal {
        patched_content,
        commit_message,
        short_fix_description,
    })
}

/// Strip fences and check the text is a YAML mapping with a `jobs` key.
pub fn validate_workflow(response: &str) -> Result<String> {
    let text = strip_code_fences(response);
    let doc: serde_yaml::Value =
        serde_yaml::from_str(&text).context("Generated workflow is not valid YAML")?;
    let mapping = doc
        .as_mapping()
        .context("Generated workflow is not a YAML mapping")?;
    if !mapping.contains_key("jobs") {
        anyhow::bail!("Generated workflow has no jobs");
    }
    Ok(format!("{}\n", text.trim_end()))
}

const DIAGNOSTICS_SYSTEM_PROMPT: &str = r#"You analyze test and lint output and extract every failure.

You MUST respond with valid JSON only (no markdown, no explanation) matching this schema:
{
  "failures": [
    {
      "file": "path/relative/to/repo/root.py",
      "lineNumber": 12,
      "errorMessage": "Brief description of the error",
      "bugType": "LINTING" | "SYNTAX" | "LOGIC" | "TYPE_ERROR" | "IMPORT" | "INDENTATION"
    }
  ]
}

Rules:
- bugType MUST be exactly one of the listed values.
- Paths are relative to the repository root.
- Return {"failures": []} if nothing in the output can be attributed to a file.
"#;

const PATCH_SYSTEM_PROMPT: &str = r#"You are an expert developer fixing one bug in one file.

You MUST respond with valid JSON only (no markdown, no explanation) matching this schema:
{
  "patchedContent": "The COMPLETE file content after the fix, never a diff",
  "shortFixDescription": "a very short lowercase phrase, e.g. remove the unused import",
  "commitMessage": "[AI-AGENT] summary of the fix"
}

Rules:
- patchedContent must be ready to write to disk as-is. Do not wrap it in code fences.
- commitMessage must start exactly with "[AI-AGENT] ".
- Change only what is needed to fix the reported failure.
"#;

const WORKFLOW_SYSTEM_PROMPT: &str = r#"You are a DevOps engineer who writes reliable GitHub Actions workflows.

Output ONLY the raw YAML of one workflow file. No markdown fences, no explanation.

Requirements:
- Trigger on push and pull_request for every branch.
- Use current stable actions (actions/checkout@v4, actions/setup-node@v4, actions/setup-python@v5).
- Match the toolchain implied by the files (Node.js for package.json, Python for requirements.txt, pytest.ini or setup.py).
- Install dependencies, then run the test suite or linter.
"#;

/// Runs every capability through `claude --print`.
pub struct ClaudeCapabilities {
    config: LlmConfig,
}

impl ClaudeCapabilities {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }

    fn diagnostics_prompt(&self, raw_log: &str) -> String {
        format!(
            "Extract the failures from this test output.\n\nTEST OUTPUT:\n{}",
            truncate_tail(raw_log, self.config.log_tail_chars)
        )
    }

    fn patch_prompt(file_content: &str, failure: &Failure) -> String {
        format!(
            "Failure details:\n- File: {}\n- Line: {}\n- Error: {}\n- Bug type: {}\n\nFILE CONTENT:\n{}",
            failure.file, failure.line_number, failure.error_message, failure.bug_type, file_content
        )
    }

    fn workflow_prompt(file_listing: &str, repo_name: &str, leader_name: &str) -> String {
        format!(
            "Write a CI workflow for the repository {}.\n\
             The single job's name must be exactly: \"Continuous Integration ({})\"\n\n\
             REPOSITORY FILES:\n{}",
            repo_name, leader_name, file_listing
        )
    }

    async fn call_claude(&self, system: &str, prompt: &str) -> Result<String> {
        let output = Command::new(&self.config.command)
            .args([
                "--print",
                "--output-format",
                "text",
                "-p",
                prompt,
                "--system",
                system,
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), output)
            .await
            .with_context(|| format!("{} timed out after {}s", self.config.command, self.config.timeout_secs))?
            .with_context(|| format!("Failed to run {} CLI", self.config.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} exited with {}: {}", self.config.command, output.status, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl DiagnosticsClient for ClaudeCapabilities {
    async fn extract(&self, raw_log: &str) -> Vec<Failure> {
        let prompt = self.diagnostics_prompt(raw_log);
        match self.call_claude(DIAGNOSTICS_SYSTEM_PROMPT, &prompt).await {
            Ok(response) => parse_failures(&response),
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "diagnostics call failed");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl PatchClient for ClaudeCapabilities {
    async fn generate(&self, file_content: &str, failure: &Failure) -> Option<PatchProposal> {
        let prompt = Self::patch_prompt(file_content, failure);
        let response = match self.call_claude(PATCH_SYSTEM_PROMPT, &prompt).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(file = %failure.file, error = %format!("{:#}", e), "patch call failed");
                return None;
            }
        };
        let proposal = parse_patch(&response, failure)?;
        tracing::info!(
            "{} error in {} line {} → Fix: {}",
            failure.bug_type,
            failure.file,
            failure.line_number,
            proposal.short_fix_description
        );
        Some(proposal)
    }
}

#[async_trait]
impl WorkflowGenerator for ClaudeCapabilities {
    async fn generate(&self, file_listing: &str, repo_name: &str, leader_name: &str) -> Result<String> {
        let prompt = Self::workflow_prompt(file_listing, repo_name, leader_name);
        let response = self.call_claude(WORKFLOW_SYSTEM_PROMPT, &prompt).await?;
        validate_workflow(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mender_common::BugType;

    fn failure() -> Failure {
        Failure {
            file: "src/utils.py".to_string(),
            line_number: 15,
            error_message: "unused import os".to_string(),
            bug_type: BugType::Linting,
        }
    }

    fn missing_cli() -> ClaudeCapabilities {
        ClaudeCapabilities::new(LlmConfig {
            command: "/nonexistent/mender-llm".to_string(),
            timeout_secs: 5,
            log_tail_chars: 100,
        })
    }

    // ── text helpers ─────────────────────────────────────────────────

    #[test]
    fn test_truncate_tail_keeps_end() {
        assert_eq!(truncate_tail("abcdef", 3), "def");
        assert_eq!(truncate_tail("abc", 10), "abc");
        assert_eq!(truncate_tail("", 3), "");
    }

    #[test]
    fn test_truncate_tail_respects_char_boundaries() {
        assert_eq!(truncate_tail("héllo→wörld", 5), "wörld");
        assert_eq!(truncate_tail("→→→", 2), "→→");
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(
            extract_json_object("Here you go:\n{\"a\": {\"b\": 1}}\nDone."),
            Some("{\"a\": {\"b\": 1}}")
        );
        assert_eq!(extract_json_object("no json"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```yaml\nname: CI\n```"), "name: CI");
        assert_eq!(strip_code_fences("```\nx = 1\n```\n"), "x = 1");
        assert_eq!(strip_code_fences("  plain text  "), "plain text");
    }

    // ── diagnostics ──────────────────────────────────────────────────

    #[test]
    fn test_parse_failures_valid() {
        let response = r#"```json
{"failures": [
  {"file": "src/utils.py", "lineNumber": 15, "errorMessage": "unused import", "bugType": "LINTING"},
  {"file": "app.js", "lineNumber": 3, "errorMessage": "missing paren", "bugType": "SYNTAX"}
]}
```"#;
        let failures = parse_failures(response);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].bug_type, BugType::Linting);
        assert_eq!(failures[1].line_number, 3);
    }

    #[test]
    fn test_parse_failures_drops_bad_entries() {
        let response = r#"{"failures": [
  {"file": "ok.py", "lineNumber": 1, "errorMessage": "x", "bugType": "LOGIC"},
  {"file": "bad.py", "lineNumber": 1, "errorMessage": "x", "bugType": "SPELLING"},
  {"file": "../../etc/passwd", "lineNumber": 1, "errorMessage": "x", "bugType": "LOGIC"},
  {"file": "/abs.py", "lineNumber": 1, "errorMessage": "x", "bugType": "LOGIC"},
  {"file": "no_line.py", "errorMessage": "x", "bugType": "LOGIC"}
]}"#;
        let failures = parse_failures(response);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].file, "ok.py");
    }

    #[test]
    fn test_parse_failures_garbage_is_empty() {
        assert!(parse_failures("I could not find anything").is_empty());
        assert!(parse_failures("{not json}").is_empty());
        assert!(parse_failures(r#"{"errors": []}"#).is_empty());
    }

    #[test]
    fn test_diagnostics_prompt_is_tail_truncated() {
        let caps = missing_cli();
        let log = format!("{}TAIL", "x".repeat(500));
        let prompt = caps.diagnostics_prompt(&log);
        assert!(prompt.ends_with("TAIL"));
        assert!(!prompt.contains(&"x".repeat(101)));
    }

    #[tokio::test]
    async fn test_extract_falls_back_to_empty_when_cli_missing() {
        let caps = missing_cli();
        assert!(caps.extract("FAIL src/app.test.js").await.is_empty());
    }

    // ── patches ──────────────────────────────────────────────────────

    #[test]
    fn test_parse_patch_full() {
        let response = r#"{"patchedContent": "print('ok')", "shortFixDescription": "remove the import statement", "commitMessage": "[AI-AGENT] Remove unused import"}"#;
        let patch = parse_patch(response, &failure()).unwrap();
        assert_eq!(patch.patched_content, "print('ok')\n");
        assert_eq!(patch.commit_message, "[AI-AGENT] Remove unused import");
        assert_eq!(patch.short_fix_description, "remove the import statement");
    }

    #[test]
    fn test_parse_patch_defaults_and_marker() {
        let patch = parse_patch(r#"{"patchedContent": "x = 1\n"}"#, &failure()).unwrap();
        assert_eq!(patch.commit_message, "[AI-AGENT] Fixed LINTING in src/utils.py");

        let patch = parse_patch(
            r#"{"patchedContent": "x = 1\n", "commitMessage": "Remove import"}"#,
            &failure(),
        )
        .unwrap();
        assert_eq!(patch.commit_message, "[AI-AGENT] Remove import");
    }

    #[test]
    fn test_parse_patch_strips_fences() {
        let response = r#"{"patchedContent": "```python\nimport sys\n```"}"#;
        let patch = parse_patch(response, &failure()).unwrap();
        assert_eq!(patch.patched_content, "import sys\n");
    }

    #[test]
    fn test_parse_patch_rejects_empty_or_invalid() {
        assert!(parse_patch(r#"{"patchedContent": "   "}"#, &failure()).is_none());
        assert!(parse_patch(r#"{"commitMessage": "x"}"#, &failure()).is_none());
        assert!(parse_patch("sorry", &failure()).is_none());
    }

    #[tokio::test]
    async fn test_generate_patch_none_when_cli_missing() {
        let caps = missing_cli();
        assert!(PatchClient::generate(&caps, "x", &failure()).await.is_none());
    }

    // ── workflows ────────────────────────────────────────────────────

    #[test]
    fn test_validate_workflow_accepts_fenced_yaml() {
        let response = "```yaml\nname: CI\non: [push]\njobs:\n  test:\n    name: Continuous Integration (Ada)\n    runs-on: ubuntu-latest\n```";
        let workflow = validate_workflow(response).unwrap();
        assert!(workflow.starts_with("name: CI"));
        assert!(workflow.ends_with("ubuntu-latest\n"));
    }

    #[test]
    fn test_validate_workflow_rejects_missing_jobs() {
        assert!(validate_workflow("name: CI\non: [push]\n").is_err());
        assert!(validate_workflow("- just\n- a list\n").is_err());
        assert!(validate_workflow("jobs: [unclosed").is_err());
    }

    #[test]
    fn test_workflow_prompt_names_leader() {
        let prompt = ClaudeCapabilities::workflow_prompt("./package.json", "widgets", "Jane Doe");
        assert!(prompt.contains("Continuous Integration (Jane Doe)"));
        assert!(prompt.contains("./package.json"));
    }

    #[tokio::test]
    async fn test_generate_workflow_errors_when_cli_missing() {
        let caps = missing_cli();
        assert!(WorkflowGenerator::generate(&caps, "", "r", "l").await.is_err());
    }
}
