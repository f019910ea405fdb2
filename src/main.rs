use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use mender::config::MenderConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "mender")]
#[command(version, about = "Autonomous CI repair: fork, test, diagnose, patch and push")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to mender.toml. Defaults to .mender/mender.toml, then the user config dir.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API
    Serve {
        /// Port to serve on (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (bind all interfaces, permissive CORS)
        #[arg(long)]
        dev: bool,

        /// Token used to fork and push
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        github_token: Option<String>,
    },
    /// Heal one repository in the foreground and print the results as JSON
    Run {
        /// https://github.com/<owner>/<repo>
        #[arg(long)]
        repo_url: String,

        #[arg(long)]
        team: String,

        #[arg(long)]
        leader: String,

        /// Token used to fork and push
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        github_token: Option<String>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and list any problems
    Validate,
    /// Write a default mender.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    if let Commands::Config { command } = &cli.command {
        cmd::cmd_config(&project_dir, cli.config.as_deref(), command.clone())?;
        return Ok(ExitCode::SUCCESS);
    }

    let (config, source) = MenderConfig::resolve(cli.config.as_deref(), &project_dir)?;
    let _log_guard = mender::logging::init(&config.logging, cli.verbose)?;
    match &source {
        Some(path) => tracing::debug!(path = %path.display(), "loaded configuration"),
        None => tracing::debug!("no mender.toml found, using defaults"),
    }

    match cli.command {
        Commands::Serve {
            port,
            dev,
            github_token,
        } => {
            cmd::cmd_serve(config, port, dev, github_token).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            repo_url,
            team,
            leader,
            github_token,
        } => {
            let passed = cmd::cmd_run(config, repo_url, team, leader, github_token).await?;
            Ok(if passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Config { .. } => Ok(ExitCode::SUCCESS),
    }
}
