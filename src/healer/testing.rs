//! In-process fakes for the healer seams, shared by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use mender_common::{ExecOutput, Failure, JobId, TestRun};

use super::capability::{DiagnosticsClient, PatchClient, PatchProposal, WorkflowGenerator};
use super::github::RepositoryHost;
use super::sandbox::{ExecRequest, Sandbox, SandboxHandle};
use crate::errors::HealerError;

type Responder = Box<dyn Fn(&ExecRequest) -> ExecOutput + Send + Sync>;

pub fn exec_output(exit_code: i64, stdout: &str) -> ExecOutput {
    ExecOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code,
    }
}

/// Sandbox that records every `exec` and replays scripted test runs.
pub struct FakeSandbox {
    requests: Mutex<Vec<ExecRequest>>,
    local_branches: Mutex<HashSet<String>>,
    respond: Responder,
    test_runs: Mutex<VecDeque<ExecOutput>>,
    workflows: Vec<String>,
    files: HashMap<String, String>,
    fail_create: bool,
    fail_clone: bool,
    panic_on_tests: bool,
    pub test_run_count: AtomicUsize,
    pub cloned: Mutex<Vec<String>>,
    pub destroyed: Mutex<Vec<SandboxHandle>>,
}

impl Default for FakeSandbox {
    fn default() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            local_branches: Mutex::new(HashSet::new()),
            respond: Box::new(|_| ExecOutput::default()),
            test_runs: Mutex::new(VecDeque::new()),
            workflows: vec![".github/workflows/ci.yml".to_string()],
            files: HashMap::new(),
            fail_create: false,
            fail_clone: false,
            panic_on_tests: false,
            test_run_count: AtomicUsize::new(0),
            cloned: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
        }
    }
}

impl FakeSandbox {
    pub fn respond_with(
        mut self,
        respond: impl Fn(&ExecRequest) -> ExecOutput + Send + Sync + 'static,
    ) -> Self {
        self.respond = Box::new(respond);
        self
    }

    /// Discovery results in order; the last one repeats once the queue drains.
    pub fn with_test_runs(self, runs: Vec<ExecOutput>) -> Self {
        *self.test_runs.lock().unwrap() = runs.into();
        self
    }

    pub fn without_workflows(mut self) -> Self {
        self.workflows.clear();
        self
    }

    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.insert(path.to_string(), content.to_string());
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_clone(mut self) -> Self {
        self.fail_clone = true;
        self
    }

    pub fn panicking_tests(mut self) -> Self {
        self.panic_on_tests = true;
        self
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Last content written to `path` through `write_file`.
    pub fn written(&self, path: &str) -> Option<String> {
        self.requests()
            .iter()
            .rev()
            .find(|r| r.argv.get(3).map(String::as_str) == Some("mender-write") && r.argv.get(4).map(String::as_str) == Some(path))
            .and_then(|r| r.stdin.as_ref())
            .map(|b64| String::from_utf8(BASE64.decode(b64).unwrap()).unwrap())
    }

    pub fn commits(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter(|r| r.argv.len() == 4 && r.argv[..3] == ["git", "commit", "-m"])
            .map(|r| r.argv[3].clone())
            .collect()
    }

    /// Mirrors git ref resolution: `checkout -B` creates a local branch, and a
    /// push whose source is neither `HEAD` nor a local branch is rejected.
    fn git_refs(&self, request: &ExecRequest) -> Option<ExecOutput> {
        let argv: Vec<&str> = request.argv.iter().map(String::as_str).collect();
        match argv.as_slice() {
            ["git", "checkout", "-B", branch] => {
                self.local_branches.lock().unwrap().insert(branch.to_string());
                None
            }
            ["git", "push", .., refspec] => {
                let source = refspec.split(':').next().unwrap_or_default();
                let known = source == "HEAD" || self.local_branches.lock().unwrap().contains(source);
                (!known).then(|| ExecOutput {
                    stdout: String::new(),
                    stderr: format!("error: src refspec {} does not match any", source),
                    exit_code: 1,
                })
            }
            _ => None,
        }
    }

    pub fn pushes(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.argv.get(1).map(String::as_str) == Some("push"))
            .count()
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    async fn provision_image(&self) -> Result<(), HealerError> {
        Ok(())
    }

    async fn create_instance(&self, job_id: JobId) -> Result<SandboxHandle, HealerError> {
        if self.fail_create {
            return Err(HealerError::Provisioning("no docker daemon".to_string()));
        }
        Ok(SandboxHandle {
            name: format!("fake-{}", job_id),
        })
    }

    async fn destroy_instance(&self, handle: &SandboxHandle) {
        self.destroyed.lock().unwrap().push(handle.clone());
    }

    async fn exec(&self, _handle: &SandboxHandle, request: ExecRequest) -> Result<ExecOutput> {
        let output = self
            .git_refs(&request)
            .unwrap_or_else(|| (self.respond)(&request));
        self.requests.lock().unwrap().push(request);
        Ok(output)
    }

    async fn clone_repository(&self, _handle: &SandboxHandle, url: &str) -> Result<(), HealerError> {
        self.cloned.lock().unwrap().push(url.to_string());
        if self.fail_clone {
            return Err(HealerError::Clone("repository not found".to_string()));
        }
        Ok(())
    }

    async fn run_test_discovery(&self, _handle: &SandboxHandle) -> Result<TestRun> {
        if self.panic_on_tests {
            panic!("discovery exploded");
        }
        self.test_run_count.fetch_add(1, Ordering::SeqCst);
        let mut runs = self.test_runs.lock().unwrap();
        let output = if runs.len() > 1 {
            runs.pop_front().unwrap_or_default()
        } else {
            runs.front().cloned().unwrap_or_default()
        };
        Ok(TestRun::from_output(output))
    }

    async fn read_file(&self, _handle: &SandboxHandle, path: &str) -> Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Could not read {}", path))
    }

    async fn list_pipeline_definitions(&self, _handle: &SandboxHandle) -> Result<Vec<String>> {
        Ok(self.workflows.clone())
    }

    async fn list_workspace_files(&self, _handle: &SandboxHandle) -> Result<String> {
        Ok("./package.json\n./src/index.js\n".to_string())
    }
}

/// Repository host that forks instantly, or fails.
#[derive(Default)]
pub struct FakeHost {
    pub fail: bool,
}

#[async_trait]
impl RepositoryHost for FakeHost {
    async fn fork(&self, repo_url: &str) -> Result<String, HealerError> {
        if self.fail {
            return Err(HealerError::Fork("403 Forbidden".to_string()));
        }
        let name = repo_url.rsplit('/').next().unwrap_or("repo");
        Ok(format!("https://github.com/bot/{}.git", name.trim_end_matches(".git")))
    }

    fn authenticated_clone_url(&self, clone_url: &str) -> String {
        clone_url.replacen("https://", "https://x-access-token:fake@", 1)
    }
}

/// Capabilities with canned answers.
pub struct FakeCapabilities {
    pub failures: Vec<Failure>,
    pub patch: bool,
    pub workflow: Option<String>,
    pub diagnose_calls: AtomicUsize,
}

impl Default for FakeCapabilities {
    fn default() -> Self {
        Self {
            failures: Vec::new(),
            patch: true,
            workflow: Some("name: CI\non: [push]\njobs:\n  test:\n    runs-on: ubuntu-latest\n".to_string()),
            diagnose_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DiagnosticsClient for FakeCapabilities {
    async fn extract(&self, _raw_log: &str) -> Vec<Failure> {
        self.diagnose_calls.fetch_add(1, Ordering::SeqCst);
        self.failures.clone()
    }
}

#[async_trait]
impl PatchClient for FakeCapabilities {
    async fn generate(&self, file_content: &str, failure: &Failure) -> Option<PatchProposal> {
        self.patch.then(|| PatchProposal {
            patched_content: format!("{}// fixed line {}\n", file_content, failure.line_number),
            commit_message: format!("[AI-AGENT] Fixed {} in {}", failure.bug_type, failure.file),
            short_fix_description: "patched".to_string(),
        })
    }
}

#[async_trait]
impl WorkflowGenerator for FakeCapabilities {
    async fn generate(&self, _file_listing: &str, _repo_name: &str, _leader_name: &str) -> Result<String> {
        self.workflow
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generator unavailable"))
    }
}
