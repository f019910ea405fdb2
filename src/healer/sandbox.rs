use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::OnceCell;

use mender_common::{ExecOutput, JobId, TestRun};

use super::github::redact_credentials;
use crate::errors::HealerError;

/// Where the target repository lives inside every sandbox.
pub const WORKSPACE_DIR: &str = "/sandbox/repo";

/// Directory scanned for existing pipeline definitions, relative to the workspace.
pub const WORKFLOWS_DIR: &str = ".github/workflows";

/// Bound on `docker rm -f` when no exec timeout is configured.
const DEFAULT_TEARDOWN_SECS: u64 = 30;

/// Decodes base64 from stdin into the file named by `$1`, creating parent
/// directories. The path is a positional argument, never spliced into the script.
const WRITE_FILE_SCRIPT: &str = r#"mkdir -p "$(dirname -- "$1")" && base64 -d > "$1""#;

/// Test discovery cascade. First matching framework wins; without one, every
/// JavaScript and Python file is syntax-checked instead.
pub const DISCOVERY_SCRIPT: &str = r#"
cd /sandbox/repo || exit 1

if [ -f package.json ]; then
  if grep -q '"jest"' package.json; then
    echo "FRAMEWORK_DETECTED: jest"
    npm install --silent >/dev/null 2>&1
    npx jest 2>&1
    exit $?
  elif grep -q '"mocha"' package.json; then
    echo "FRAMEWORK_DETECTED: mocha"
    npm install --silent >/dev/null 2>&1
    npx mocha 2>&1
    exit $?
  elif grep -q '"test"' package.json; then
    echo "FRAMEWORK_DETECTED: npm test"
    npm install --silent >/dev/null 2>&1
    npm test 2>&1
    exit $?
  fi
fi

if [ -f pytest.ini ] || [ -f setup.py ] || [ -f requirements.txt ] || [ -d tests ] || ls test_*.py >/dev/null 2>&1; then
  echo "FRAMEWORK_DETECTED: pytest"
  if [ -f requirements.txt ]; then
    pip3 install -q -r requirements.txt >/dev/null 2>&1
  fi
  python3 -m pytest 2>&1
  exit $?
fi

echo "FRAMEWORK_DETECTED: syntax_fallback"
echo "No test framework detected; running syntax checks."
errors=""
while IFS= read -r -d '' file; do
  out=$(node --check "$file" 2>&1) || errors="$errors$out"$'\n'
done < <(find . -name '*.js' -not -path './node_modules/*' -not -path './.git/*' -print0)
while IFS= read -r -d '' file; do
  out=$(python3 -m py_compile "$file" 2>&1) || errors="$errors$out"$'\n'
done < <(find . -name '*.py' -not -path './venv/*' -not -path './.venv/*' -not -path './.git/*' -print0)

if [ -z "$errors" ]; then
  echo "All syntax checks passed."
  exit 0
fi
echo "SYNTAX ERRORS FOUND:"
printf '%s' "$errors"
exit 1
"#;

/// Configuration for sandbox containers (`[sandbox]` in `mender.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Docker CLI binary (`DOCKER_CMD` overrides).
    pub docker_command: String,
    pub image: String,
    pub dockerfile: PathBuf,
    pub build_context: PathBuf,
    pub memory: Option<String>,
    pub cpus: Option<f64>,
    /// Upper bound for a single in-sandbox command. Unset means commands may
    /// block their job indefinitely.
    pub exec_timeout_secs: Option<u64>,
    pub env: HashMap<String, String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            docker_command: "docker".to_string(),
            image: "mender-sandbox".to_string(),
            dockerfile: PathBuf::from("docker/Dockerfile.sandbox"),
            build_context: PathBuf::from("."),
            memory: Some("4g".to_string()),
            cpus: Some(2.0),
            exec_timeout_secs: None,
            env: HashMap::new(),
        }
    }
}

/// A running sandbox instance owned by one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub name: String,
}

/// One command inside a sandbox, passed as an explicit argument vector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecRequest {
    pub argv: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub workdir: Option<String>,
}

impl ExecRequest {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            stdin: None,
            workdir: None,
        }
    }

    /// Run a multi-line script with bash.
    pub fn script(script: &str) -> Self {
        Self::new(["bash", "-c", script])
    }

    pub fn in_workspace(mut self) -> Self {
        self.workdir = Some(WORKSPACE_DIR.to_string());
        self
    }

    pub fn with_stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }
}

/// Isolated, disposable execution environment, one instance per job.
///
/// Implementors provide the four primitives; the workspace operations are
/// built on `exec` and may be overridden.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Make sure the execution image exists. Idempotent.
    async fn provision_image(&self) -> Result<(), HealerError>;

    async fn create_instance(&self, job_id: JobId) -> Result<SandboxHandle, HealerError>;

    /// Best-effort teardown; failures are logged, never returned.
    async fn destroy_instance(&self, handle: &SandboxHandle);

    async fn exec(&self, handle: &SandboxHandle, request: ExecRequest) -> Result<ExecOutput>;

    async fn execute(&self, handle: &SandboxHandle, script: &str) -> Result<ExecOutput> {
        self.exec(handle, ExecRequest::script(script)).await
    }

    /// Wipe the workspace and clone `url` into it.
    async fn clone_repository(&self, handle: &SandboxHandle, url: &str) -> Result<(), HealerError> {
        let wipe = self
            .exec(handle, ExecRequest::new(["rm", "-rf", WORKSPACE_DIR]))
            .await?;
        if !wipe.success() {
            return Err(HealerError::Clone(format!(
                "could not clear workspace: {}",
                wipe.stderr.trim()
            )));
        }

        let output = self
            .exec(handle, ExecRequest::new(["git", "clone", "--", url, WORKSPACE_DIR]))
            .await
            .map_err(|e| HealerError::Clone(redact_credentials(&format!("{:#}", e))))?;
        if !output.success() {
            return Err(HealerError::Clone(redact_credentials(output.stderr.trim())));
        }
        Ok(())
    }

    async fn run_test_discovery(&self, handle: &SandboxHandle) -> Result<TestRun> {
        let output = self.execute(handle, DISCOVERY_SCRIPT).await?;
        Ok(TestRun::from_output(output))
    }

    /// Read a workspace-relative file.
    async fn read_file(&self, handle: &SandboxHandle, path: &str) -> Result<String> {
        let output = self
            .exec(handle, ExecRequest::new(["cat", "--", path]).in_workspace())
            .await?;
        if !output.success() {
            anyhow::bail!("Could not read {}: {}", path, output.stderr.trim());
        }
        Ok(output.stdout)
    }

    /// Write a workspace-relative file. Content travels base64-encoded on stdin.
    async fn write_file(&self, handle: &SandboxHandle, path: &str, content: &str) -> Result<ExecOutput> {
        let request = ExecRequest::new(["sh", "-c", WRITE_FILE_SCRIPT, "mender-write", path])
            .in_workspace()
            .with_stdin(BASE64.encode(content.as_bytes()));
        self.exec(handle, request).await
    }

    /// Existing pipeline definitions (`.github/workflows/*.yml|*.yaml`).
    async fn list_pipeline_definitions(&self, handle: &SandboxHandle) -> Result<Vec<String>> {
        let request = ExecRequest::new([
            "find", WORKFLOWS_DIR, "-maxdepth", "1", "-type", "f", "(", "-name", "*.yml", "-o",
            "-name", "*.yaml", ")",
        ])
        .in_workspace();
        let output = self.exec(handle, request).await?;
        if !output.success() {
            // find exits non-zero when the directory does not exist
            return Ok(Vec::new());
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Top two levels of the workspace, for pipeline synthesis.
    async fn list_workspace_files(&self, handle: &SandboxHandle) -> Result<String> {
        let request = ExecRequest::new([
            "find", ".", "-maxdepth", "2", "-type", "f", "-not", "-path", "*/.git/*", "-not",
            "-path", "*/node_modules/*",
        ])
        .in_workspace();
        let output = self.exec(handle, request).await?;
        Ok(output.stdout)
    }
}

/// Docker-backed sandbox. The daemon is queried through `bollard`; container
/// lifecycle and exec go through the `docker` CLI so stdin can be streamed
/// into `docker exec -i`.
pub struct DockerSandbox {
    config: SandboxConfig,
    image_ready: OnceCell<()>,
}

impl DockerSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            image_ready: OnceCell::new(),
        }
    }

    fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.config.exec_timeout_secs.unwrap_or(DEFAULT_TEARDOWN_SECS))
    }

    pub fn container_name(job_id: JobId) -> String {
        format!("mender-sandbox-{}", job_id)
    }

    fn run_args(&self, name: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name.to_string(),
        ];
        if let Some(memory) = &self.config.memory {
            args.push("--memory".to_string());
            args.push(memory.clone());
        }
        if let Some(cpus) = self.config.cpus {
            args.push("--cpus".to_string());
            args.push(cpus.to_string());
        }
        let mut env: Vec<_> = self.config.env.iter().collect();
        env.sort();
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(self.config.image.clone());
        args.push("sleep".to_string());
        args.push("infinity".to_string());
        args
    }

    fn exec_args(handle: &SandboxHandle, request: &ExecRequest) -> Vec<String> {
        let mut args = vec!["exec".to_string(), "-i".to_string()];
        if let Some(dir) = &request.workdir {
            args.push("-w".to_string());
            args.push(dir.clone());
        }
        args.push(handle.name.clone());
        args.extend(request.argv.iter().cloned());
        args
    }

    async fn image_present(&self) -> Result<bool> {
        let docker = bollard::Docker::connect_with_local_defaults()
            .context("Failed to connect to the Docker daemon")?;
        docker
            .ping()
            .await
            .context("Docker daemon is not responding")?;
        match docker.inspect_image(&self.config.image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e).context("Failed to inspect sandbox image"),
        }
    }

    async fn build_image(&self) -> Result<()> {
        tracing::info!(image = %self.config.image, dockerfile = %self.config.dockerfile.display(), "building sandbox image");
        let output = Command::new(&self.config.docker_command)
            .arg("build")
            .arg("-t")
            .arg(&self.config.image)
            .arg("-f")
            .arg(&self.config.dockerfile)
            .arg(&self.config.build_context)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run docker build")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("docker build exited with {}: {}", output.status, stderr.trim());
        }
        tracing::info!(image = %self.config.image, "sandbox image built");
        Ok(())
    }

    async fn run_exec(&self, handle: &SandboxHandle, request: ExecRequest) -> Result<ExecOutput> {
        let mut cmd = Command::new(&self.config.docker_command);
        cmd.args(Self::exec_args(handle, &request))
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().context("Failed to spawn docker exec")?;

        // Feed stdin from its own task so a chatty command cannot deadlock us
        let writer = match request.stdin {
            Some(bytes) => {
                let mut stdin = child
                    .stdin
                    .take()
                    .context("Failed to capture stdin of docker exec")?;
                Some(tokio::spawn(async move {
                    stdin.write_all(&bytes).await?;
                    stdin.shutdown().await
                }))
            }
            None => None,
        };

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for docker exec")?;

        if let Some(writer) = writer {
            writer
                .await
                .context("stdin writer task panicked")?
                .context("Failed to write stdin to docker exec")?;
        }

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().map(i64::from).unwrap_or(-1),
        })
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn provision_image(&self) -> Result<(), HealerError> {
        self.image_ready
            .get_or_try_init(|| async {
                if self.image_present().await? {
                    tracing::debug!(image = %self.config.image, "sandbox image already present");
                    return Ok(());
                }
                self.build_image().await
            })
            .await
            .map(|_| ())
            .map_err(|e: anyhow::Error| HealerError::Provisioning(format!("{:#}", e)))
    }

    async fn create_instance(&self, job_id: JobId) -> Result<SandboxHandle, HealerError> {
        let name = Self::container_name(job_id);
        let output = Command::new(&self.config.docker_command)
            .args(self.run_args(&name))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| HealerError::Provisioning(format!("failed to run docker: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HealerError::Provisioning(format!(
                "docker run failed for {}: {}",
                name,
                stderr.trim()
            )));
        }
        tracing::info!(%job_id, container = %name, "sandbox instance started");
        Ok(SandboxHandle { name })
    }

    async fn destroy_instance(&self, handle: &SandboxHandle) {
        let limit = self.teardown_timeout();
        let removal = Command::new(&self.config.docker_command)
            .args(["rm", "-f", handle.name.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        let Ok(result) = tokio::time::timeout(limit, removal).await else {
            tracing::warn!(
                container = %handle.name,
                timeout_secs = limit.as_secs(),
                "docker rm timed out; leaving sandbox instance behind"
            );
            return;
        };
        match result {
            Ok(output) if output.status.success() => {
                tracing::info!(container = %handle.name, "sandbox instance removed");
            }
            Ok(output) => {
                tracing::warn!(
                    container = %handle.name,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "failed to remove sandbox instance"
                );
            }
            Err(e) => {
                tracing::warn!(container = %handle.name, error = %e, "failed to run docker rm");
            }
        }
    }

    async fn exec(&self, handle: &SandboxHandle, request: ExecRequest) -> Result<ExecOutput> {
        match self.config.exec_timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), self.run_exec(handle, request))
                .await
                .with_context(|| format!("Sandbox command timed out after {}s", secs))?,
            None => self.run_exec(handle, request).await,
        }
    }
}
