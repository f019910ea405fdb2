//! `mender.toml` loading.
//!
//! Every section is optional and falls back to its defaults field by field.
//! Lookup order: `--config`, then `.mender/mender.toml` in the working
//! directory, then `<config dir>/mender/mender.toml`. Environment overrides
//! are applied after the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::healer::capability::LlmConfig;
use crate::healer::github::GitHubConfig;
use crate::healer::orchestrator::OrchestratorConfig;
use crate::healer::sandbox::SandboxConfig;
use crate::healer::server::ServerConfig;
use crate::logging::LoggingConfig;

pub const CONFIG_DIR: &str = ".mender";
pub const CONFIG_FILE: &str = "mender.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MenderConfig {
    pub server: ServerConfig,
    pub orchestrator: OrchestratorConfig,
    pub sandbox: SandboxConfig,
    pub github: GitHubConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
}

impl MenderConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse mender.toml")
    }

    /// Project-local config path for `project_dir`.
    pub fn project_path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// First existing config file, project before user.
    pub fn locate(project_dir: &Path) -> Option<PathBuf> {
        let project = Self::project_path(project_dir);
        if project.is_file() {
            return Some(project);
        }
        dirs::config_dir()
            .map(|dir| dir.join("mender").join(CONFIG_FILE))
            .filter(|path| path.is_file())
    }

    /// Load from `explicit` or the usual locations, then apply environment
    /// overrides. Returns the file that was used, if any.
    pub fn resolve(explicit: Option<&Path>, project_dir: &Path) -> Result<(Self, Option<PathBuf>)> {
        let source = match explicit {
            Some(path) => {
                if !path.is_file() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => Self::locate(project_dir),
        };

        let mut config = match &source {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok((config, source))
    }

    /// Apply `MENDER_PORT`, `MENDER_ITERATION_BUDGET`, `MENDER_RESULTS_PATH`,
    /// `CLAUDE_CMD` and `DOCKER_CMD` from `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("MENDER_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid MENDER_PORT '{}'", port))?;
        }
        if let Some(budget) = lookup("MENDER_ITERATION_BUDGET") {
            self.orchestrator.iteration_budget = budget
                .trim()
                .parse()
                .with_context(|| format!("Invalid MENDER_ITERATION_BUDGET '{}'", budget))?;
        }
        if let Some(path) = lookup("MENDER_RESULTS_PATH").filter(|p| !p.trim().is_empty()) {
            self.orchestrator.results_path = PathBuf::from(path);
        }
        if let Some(cmd) = lookup("CLAUDE_CMD").filter(|c| !c.trim().is_empty()) {
            self.llm.command = cmd;
        }
        if let Some(cmd) = lookup("DOCKER_CMD").filter(|c| !c.trim().is_empty()) {
            self.sandbox.docker_command = cmd;
        }
        Ok(())
    }

    /// Problems that make the configuration unusable. Empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.orchestrator.iteration_budget == 0 {
            problems.push("orchestrator.iteration_budget must be at least 1".to_string());
        }
        if self.server.port == 0 {
            problems.push("server.port must not be 0".to_string());
        }
        if self.llm.log_tail_chars == 0 {
            problems.push("llm.log_tail_chars must be at least 1".to_string());
        }
        if self.llm.timeout_secs == 0 {
            problems.push("llm.timeout_secs must be at least 1".to_string());
        }
        if self.github.fork_poll_attempts == 0 {
            problems.push("github.fork_poll_attempts must be at least 1".to_string());
        }
        if self.sandbox.exec_timeout_secs == Some(0) {
            problems.push("sandbox.exec_timeout_secs must be at least 1 when set".to_string());
        }
        if self.sandbox.docker_command.trim().is_empty() {
            problems.push("sandbox.docker_command must not be empty".to_string());
        }
        if self.sandbox.image.trim().is_empty() {
            problems.push("sandbox.image must not be empty".to_string());
        }
        problems
    }

    /// Fail with every problem listed when the configuration is invalid.
    pub fn ensure_valid(&self) -> Result<()> {
        let problems = self.validate();
        if problems.is_empty() {
            return Ok(());
        }
        anyhow::bail!("Invalid configuration:\n  - {}", problems.join("\n  - "))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize mender.toml")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, self.to_toml_string()?)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}
