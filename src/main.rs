//! Mailforge - compile MJML email templates into static HTML with live preview.

mod build;
mod cli;
mod config;
mod logger;
mod paths;
mod reload;
mod render;
mod serve;
mod tasks;
mod watch;

use anyhow::Result;
use build::{BuildMode, build_batch};
use clap::Parser;
use cli::{Cli, Commands};
use config::ProjectConfig;
use serve::serve_templates;
use std::{path::Path, process::ExitCode};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logger::log_error_chain(&err);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config: &'static ProjectConfig = Box::leak(Box::new(load_config(&cli)?));

    let templates = paths::discover_templates(config)?;

    match &cli.command {
        Commands::Build => build_batch(config, &templates, BuildMode::OneShot),
        Commands::Serve { .. } => {
            // Without the watcher there is no reload server, so the pages
            // must not carry a reload script tag either.
            let mode = if config.serve.watch {
                BuildMode::Live
            } else {
                BuildMode::OneShot
            };
            build_batch(config, &templates, mode)?;
            serve_templates(config, templates)
        }
    }
}

/// Load and validate configuration from CLI arguments.
///
/// The config file is optional; defaults apply when it is absent.
fn load_config(cli: &Cli) -> Result<ProjectConfig> {
    let root = cli.root.as_deref().unwrap_or(Path::new("./"));
    let config_path = root.join(&cli.config);

    let mut config = if config_path.exists() {
        ProjectConfig::from_path(&config_path)?
    } else {
        ProjectConfig::default()
    };
    config.update_with_cli(cli);
    config.validate()?;

    Ok(config)
}
