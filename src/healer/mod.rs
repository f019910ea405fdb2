//! Healer: autonomous CI repair.
//!
//! ## Overview
//!
//! A job forks the target repository, clones the fork into a throwaway
//! container, makes sure a CI workflow exists, then loops
//! `test → diagnose → patch → commit` until the suite passes or the
//! iteration budget runs out. Fixes land on a `TEAM_LEADER_AI_Fix` branch
//! that is force-pushed to the fork. Every job ends with a `Results` record
//! kept in the store and mirrored to `results.json`.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘          │         │                                        │
//!                       │         │ Orchestrator::submit()                 │
//!                       │         v                                        │
//!                       │  orchestrator.rs  (job lifecycle, budget)        │
//!                       │     │        │         │           │             │
//!                       │  github.rs  sandbox.rs  vcs.rs  capability.rs    │
//!                       │  (fork)     (docker)   (git)    (claude CLI)     │
//!                       │     │                                            │
//!                       │  store.rs (JobStore)   snapshot.rs (results.json)│
//!                       └──────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod capability;
pub mod github;
pub mod orchestrator;
pub mod sandbox;
pub mod server;
pub mod snapshot;
pub mod store;
pub mod vcs;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use crate::config::MenderConfig;
use capability::ClaudeCapabilities;
use github::GitHubHost;
use orchestrator::{Capabilities, Orchestrator};
use sandbox::DockerSandbox;
use store::InMemoryJobStore;

/// Wire the production collaborators: in-memory store, Docker sandbox,
/// GitHub host and the `claude` CLI for all three model capabilities.
pub fn assemble(config: &MenderConfig, github_token: Option<String>) -> Arc<Orchestrator> {
    let claude = Arc::new(ClaudeCapabilities::new(config.llm.clone()));
    let capabilities = Capabilities {
        diagnostics: claude.clone(),
        patches: claude.clone(),
        workflows: claude,
    };

    Arc::new(Orchestrator::new(
        Arc::new(InMemoryJobStore::new()),
        Arc::new(DockerSandbox::new(config.sandbox.clone())),
        Arc::new(GitHubHost::new(config.github.clone(), github_token)),
        capabilities,
        &config.orchestrator,
    ))
}
