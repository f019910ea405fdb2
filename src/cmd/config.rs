//! Configuration view and validation commands — `mender config`.

use std::path::Path;

use anyhow::Result;

use mender::config::MenderConfig;

use super::super::ConfigCommands;

pub fn cmd_config(
    project_dir: &Path,
    explicit: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let (config, source) = MenderConfig::resolve(explicit, project_dir)?;

            println!();
            println!("Mender Configuration");
            println!("====================");
            println!();
            match &source {
                Some(path) => println!("Config file: {}", path.display()),
                None => println!("No mender.toml found. Using defaults."),
            }
            println!();
            println!("Effective values (with env overrides):");
            println!();
            println!("{}", config.to_toml_string()?);

            if source.is_none() {
                println!("Run 'mender config init' to create a mender.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let (config, source) = MenderConfig::resolve(explicit, project_dir)?;
            if source.is_none() {
                println!("No mender.toml found. Using defaults.");
            }

            let problems = config.validate();
            if problems.is_empty() {
                println!("Configuration is valid.");
                println!();
            } else {
                println!("Configuration problems:");
                for problem in &problems {
                    println!("  - {}", problem);
                }
                println!();
                anyhow::bail!("{} configuration problem(s) found", problems.len());
            }
        }
        Some(ConfigCommands::Init) => {
            let config_path = explicit
                .map(Path::to_path_buf)
                .unwrap_or_else(|| MenderConfig::project_path(project_dir));

            if config_path.exists() {
                println!("mender.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            MenderConfig::default().save(&config_path)?;

            println!("Created mender.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, dev_mode");
            println!("  - [orchestrator] iteration_budget, results_path");
            println!("  - [sandbox] image, memory, cpus, env");
            println!("  - [llm] command, timeout_secs, log_tail_chars");
            println!();
        }
    }

    Ok(())
}
