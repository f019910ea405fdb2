use serde::{Deserialize, Serialize};

/// Captured result of one command inside a sandbox. The two streams are kept
/// separate, never interleaved.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Output of a test-discovery run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    /// Framework reported by the discovery script (`FRAMEWORK_DETECTED:` line).
    pub framework: Option<String>,
    pub output: ExecOutput,
}

const FAILURE_MARKERS: [&str; 2] = ["FAIL", "failed"];
const FRAMEWORK_PREFIX: &str = "FRAMEWORK_DETECTED:";

impl TestRun {
    pub fn from_output(output: ExecOutput) -> Self {
        let framework = output
            .stdout
            .lines()
            .find_map(|line| line.trim().strip_prefix(FRAMEWORK_PREFIX))
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        Self { framework, output }
    }

    /// Textual pass heuristic: exit code 0 and neither stream mentions
    /// `FAIL` or `failed` (case-sensitive). Frameworks that print those words
    /// in passing output are reported as failing.
    pub fn passed(&self) -> bool {
        self.output.success()
            && !FAILURE_MARKERS.iter().any(|marker| {
                self.output.stdout.contains(marker) || self.output.stderr.contains(marker)
            })
    }

    /// stdout and stderr joined for diagnosis.
    pub fn combined_log(&self) -> String {
        format!("{}\n{}", self.output.stdout, self.output.stderr)
    }
}
